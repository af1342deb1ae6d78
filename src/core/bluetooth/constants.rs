//! Constants used throughout the application
//! This module contains the UUIDs and tuning values used when scanning for dice.

use uuid::Uuid;

/// The UUID of the dice service, used both as the scan filter and as the
/// service-data key in advertisements
pub const UUID_DICE_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Scan duration in seconds the command line scanner uses when none is configured
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 30;

/// Capacity hint for the per-session device list
pub const EXPECTED_DICE_PER_SESSION: usize = 16;

/// How long to wait for the adapter to report itself available at startup
/// before treating the radio as off
pub const ADAPTER_AVAILABILITY_TIMEOUT_MS: u64 = 500;
