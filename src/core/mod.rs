//! Core functionality for the dice scanner
//! This module contains advertisement decoding and the scanning machinery.

pub mod advertisement;
pub mod bluetooth;
pub mod codec;

// Re-export commonly used types
pub use advertisement::{Colorway, DieType, InterpretError, RollState};
pub use bluetooth::{BluetoothManager, DiscoveredDevice};
