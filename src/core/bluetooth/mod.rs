//! Bluetooth functionality for the dice scanner
//! This module handles radio availability, scanning, advertisement
//! bookkeeping and the handles used to reach a die later.

mod bluest_transport;
mod constants;
mod manager;
mod notification;
mod registry;
mod scanner;
pub mod simulated;
mod transport;
mod types;

// Re-export types that should be publicly accessible
pub use bluest_transport::BluestTransport;
pub use constants::*; // Re-export all constants
pub use manager::BluetoothManager;
pub use notification::{ChannelListener, NotificationFanout, ScanEvent, ScanListener};
pub use registry::{DeviceRegistry, DieHandle};
pub use scanner::{DeviceChange, ScanSession};
pub use transport::{ScanTransport, TransportEvent};
pub use types::{BluetoothState, DiscoveredDevice, PeripheralHandle, RawAdvertisement};
