//! Defines shared data structures for the Bluetooth module.

use std::collections::HashMap;
use std::sync::LazyLock;

use bluest::{Device, Uuid};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

use crate::core::advertisement::{Colorway, DieType, RollState};

static MAC_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").expect("valid MAC address pattern")
});

/// Radio availability as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BluetoothState {
    #[default]
    Unknown,
    Unsupported,
    Unauthorized,
    Off,
    On,
}

/// The platform object needed to connect to a peripheral later on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralHandle {
    /// A peripheral found by the bluest adapter.
    Bluest(Device),
    /// An in-process peripheral identified by a platform-style id string.
    Simulated(String),
}

impl PeripheralHandle {
    /// Platform-specific unique identifier for the peripheral
    pub fn id(&self) -> String {
        match self {
            Self::Bluest(device) => device.id().to_string(),
            Self::Simulated(id) => id.clone(),
        }
    }

    /// The MAC address embedded in the platform id, if there is one (macOS hides it)
    pub fn address(&self) -> Option<String> {
        let id = self.id();
        MAC_ADDRESS
            .find_iter(&id)
            .last()
            .map(|m| m.as_str().to_uppercase())
    }
}

/// One advertisement as delivered by the transport
#[derive(Debug, Clone)]
pub struct RawAdvertisement {
    pub peripheral: PeripheralHandle,
    /// Manufacturer-specific data, starting with the little-endian company identifier
    pub manufacturer_data: Option<Vec<u8>>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

/// Snapshot of a die as last advertised
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredDevice {
    /// Unique die identifier, stable across advertisements
    pub device_id: u32,
    pub name: String,
    pub led_count: u8,
    pub colorway: Colorway,
    pub die_type: DieType,
    pub firmware_date: DateTime<Utc>,
    pub rssi: Option<i16>,
    /// Battery level in percent
    pub battery_level: u8,
    pub is_charging: bool,
    pub roll_state: RollState,
    /// Face currently up, starting at 1
    pub current_face: u8,
    #[serde(skip)]
    pub peripheral: PeripheralHandle,
}

impl DiscoveredDevice {
    /// Identifier formatted the way it is printed on the die's packaging
    pub fn hex_id(&self) -> String {
        format!("{:08X}", self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_mac_address() {
        let peripheral =
            PeripheralHandle::Simulated("BluetoothLE#BluetoothLE00:1a:7d:da:71:13-e4:5f:01:aa:bb:cc".to_string());
        assert_eq!(peripheral.address().as_deref(), Some("E4:5F:01:AA:BB:CC"));

        let opaque = PeripheralHandle::Simulated("6F3C2A10-0000-4000-8000-00805F9B34FB".to_string());
        assert_eq!(opaque.address(), None);
    }

    #[test]
    fn test_bluetooth_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&BluetoothState::Unauthorized).unwrap(), "\"unauthorized\"");
    }
}
