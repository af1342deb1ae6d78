//! Platform BLE transport seam
//!
//! A transport owns the radio. Commands sent to it are fire-and-forget; their
//! effect is observed later through the [`TransportEvent`] channel.

use uuid::Uuid;

use crate::core::bluetooth::types::{BluetoothState, RawAdvertisement};

/// Something the transport observed
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Radio availability or the transport's own scanning flag changed.
    /// Read [`ScanTransport::is_scanning`] for the flag; it may have moved on
    /// since the event was queued.
    StateChanged(BluetoothState),
    /// An advertisement was received while serving discovery request `generation`.
    Advertisement {
        generation: u64,
        advertisement: RawAdvertisement,
    },
}

/// BLE central role as far as scanning is concerned
pub trait ScanTransport: Send + Sync {
    /// Current radio availability
    fn state(&self) -> BluetoothState;

    /// Whether the transport is currently discovering
    fn is_scanning(&self) -> bool;

    /// Begin discovery of peripherals advertising any of `services`.
    /// Calling it again replaces the previous request.
    fn begin_discovery(&self, services: &[Uuid], allow_duplicates: bool);

    /// Stop discovery
    fn end_discovery(&self);

    /// Bumped by every `begin_discovery` and `end_discovery` call
    fn discovery_generation(&self) -> u64;
}
