//! Die advertisement parsing
//! This module turns the manufacturer and service data a die broadcasts into a
//! [`DiscoveredDevice`] snapshot.

use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use thiserror::Error;

use crate::core::bluetooth::{DiscoveredDevice, PeripheralHandle, RawAdvertisement, UUID_DICE_SERVICE};
use crate::core::codec::{self, Field, FieldWidth, LayoutError, Schema};

/// Manufacturer data layout: company id, LED count, design/color, roll state, face, battery
pub const MANUFACTURER_SCHEMA: Schema = Schema::new(
    "manufacturer",
    &[
        Field::new("company_id", FieldWidth::U16),
        Field::new("led_count", FieldWidth::U8),
        Field::new("design_and_color", FieldWidth::U8),
        Field::new("roll_state", FieldWidth::U8),
        Field::new("current_face", FieldWidth::U8),
        Field::new("battery", FieldWidth::U8),
    ],
);

/// Service data layout: device id, firmware build time
pub const SERVICE_SCHEMA: Schema = Schema::new(
    "service",
    &[
        Field::new("device_id", FieldWidth::U32),
        Field::new("build_timestamp", FieldWidth::U32),
    ],
);

/// Size of the manufacturer frame dice broadcast; bytes past the schema are reserved
pub const MANUFACTURER_FRAME_LEN: usize = 10;

const BATTERY_LEVEL_MASK: u8 = 0x7F;
const BATTERY_CHARGING_BIT: u8 = 0x80;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpretError {
    #[error("advertisement is missing fields (manufacturer data: {manufacturer}, service data: {service})")]
    MissingAdvertisementFields { manufacturer: bool, service: bool },

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("advertised device id is zero")]
    InvalidDeviceId,
}

/// Generates a `u8`-backed enum whose unrecognized codes fall back to `Unknown`.
macro_rules! code_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub enum $name {
            Unknown,
            $($variant),+
        }

        impl $name {
            pub fn code(self) -> u8 {
                match self {
                    Self::Unknown => 0,
                    $(Self::$variant => $code),+
                }
            }
        }

        impl From<u8> for $name {
            fn from(code: u8) -> Self {
                match code {
                    $($code => Self::$variant,)+
                    0 => Self::Unknown,
                    other => {
                        debug!("Unrecognized {} code {}", stringify!($name), other);
                        Self::Unknown
                    }
                }
            }
        }
    };
}

code_enum!(
    /// Color scheme of the die body
    Colorway {
        OnyxBlack = 1,
        HematiteGrey = 2,
        MidnightGalaxy = 3,
        AuroraSky = 4,
        Clear = 5,
        WhiteAurora = 6,
        Custom = 7,
    }
);

code_enum!(
    /// Physical shape of the die
    DieType {
        D4 = 1,
        D6 = 2,
        D8 = 3,
        D10 = 4,
        D00 = 5,
        D12 = 6,
        D20 = 7,
        D6Pipped = 8,
        D6Fudge = 9,
    }
);

code_enum!(
    /// Motion state reported by the die's accelerometer logic
    RollState {
        Rolled = 1,
        Handling = 2,
        Rolling = 3,
        Crooked = 4,
        OnFace = 5,
    }
);

/// Decoded manufacturer data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManufacturerRecord {
    pub company_id: u16,
    pub led_count: u8,
    pub design_and_color: u8,
    pub roll_state: u8,
    /// Zero-based index of the face currently up
    pub current_face: u8,
    pub battery: u8,
}

impl ManufacturerRecord {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LayoutError> {
        let fields = codec::decode(&MANUFACTURER_SCHEMA, bytes)?;
        Ok(Self {
            company_id: fields.u16_at(0),
            led_count: fields.u8_at(1),
            design_and_color: fields.u8_at(2),
            roll_state: fields.u8_at(3),
            current_face: fields.u8_at(4),
            battery: fields.u8_at(5),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.company_id.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[
            self.led_count,
            self.design_and_color,
            self.roll_state,
            self.current_face,
            self.battery,
        ]);
        bytes.resize(MANUFACTURER_FRAME_LEN, 0);
        bytes
    }

    /// Low nibble of the design byte
    pub fn colorway(&self) -> Colorway {
        Colorway::from(self.design_and_color & 0x0F)
    }

    /// High nibble of the design byte
    pub fn die_type(&self) -> DieType {
        DieType::from(self.design_and_color >> 4)
    }

    pub fn battery_level(&self) -> u8 {
        self.battery & BATTERY_LEVEL_MASK
    }

    pub fn is_charging(&self) -> bool {
        self.battery & BATTERY_CHARGING_BIT != 0
    }
}

/// Decoded service data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceRecord {
    pub device_id: u32,
    /// Firmware build time in seconds since the Unix epoch
    pub build_timestamp: u32,
}

impl ServiceRecord {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LayoutError> {
        let fields = codec::decode(&SERVICE_SCHEMA, bytes)?;
        Ok(Self {
            device_id: fields.u32_at(0),
            build_timestamp: fields.u32_at(1),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        [self.device_id.to_le_bytes(), self.build_timestamp.to_le_bytes()].concat()
    }

    pub fn firmware_date(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(i64::from(self.build_timestamp), 0).unwrap_or_default()
    }
}

/// Builds a die snapshot from the advertised payloads.
///
/// Both payloads are required; anything lacking one of them is not a die.
pub fn interpret(
    manufacturer_data: Option<&[u8]>,
    service_data: Option<&[u8]>,
    local_name: Option<&str>,
    rssi: Option<i16>,
    peripheral: &PeripheralHandle,
) -> Result<DiscoveredDevice, InterpretError> {
    let (Some(manufacturer_data), Some(service_data)) = (manufacturer_data, service_data) else {
        return Err(InterpretError::MissingAdvertisementFields {
            manufacturer: manufacturer_data.is_some(),
            service: service_data.is_some(),
        });
    };

    let manufacturer = ManufacturerRecord::from_bytes(manufacturer_data)?;
    let service = ServiceRecord::from_bytes(service_data)?;
    if service.device_id == 0 {
        return Err(InterpretError::InvalidDeviceId);
    }

    Ok(DiscoveredDevice {
        device_id: service.device_id,
        name: local_name.unwrap_or("Unknown").to_string(),
        led_count: manufacturer.led_count,
        colorway: manufacturer.colorway(),
        die_type: manufacturer.die_type(),
        firmware_date: service.firmware_date(),
        rssi,
        battery_level: manufacturer.battery_level(),
        is_charging: manufacturer.is_charging(),
        roll_state: RollState::from(manufacturer.roll_state),
        current_face: manufacturer.current_face.saturating_add(1),
        peripheral: peripheral.clone(),
    })
}

impl RawAdvertisement {
    /// Interprets this advertisement, reading service data from the dice service
    pub fn interpret(&self) -> Result<DiscoveredDevice, InterpretError> {
        interpret(
            self.manufacturer_data.as_deref(),
            self.service_data.get(&UUID_DICE_SERVICE).map(Vec::as_slice),
            self.local_name.as_deref(),
            self.rssi,
            &self.peripheral,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};
    use std::collections::HashMap;

    fn manufacturer() -> ManufacturerRecord {
        ManufacturerRecord {
            company_id: 0xFFFF,
            led_count: 20,
            design_and_color: 0x73,
            roll_state: 5,
            current_face: 19,
            battery: 0x96,
        }
    }

    fn service() -> ServiceRecord {
        ServiceRecord {
            device_id: 0x1A2B_3C4D,
            build_timestamp: 1_700_000_000,
        }
    }

    fn peripheral() -> PeripheralHandle {
        PeripheralHandle::Simulated("die-1".to_string())
    }

    #[test]
    fn test_records_survive_encoding() {
        let m = manufacturer();
        let frame = m.to_bytes();
        assert_eq!(frame.len(), MANUFACTURER_FRAME_LEN);
        assert_eq!(&frame[MANUFACTURER_SCHEMA.width()..], &[0, 0, 0]);
        assert_eq!(ManufacturerRecord::from_bytes(&frame).unwrap(), m);
        // Older firmware sends only the named fields.
        assert_eq!(
            ManufacturerRecord::from_bytes(&frame[..MANUFACTURER_SCHEMA.width()]).unwrap(),
            m
        );

        let s = service();
        assert_eq!(s.to_bytes().len(), 8);
        assert_eq!(ServiceRecord::from_bytes(&s.to_bytes()).unwrap(), s);
    }

    #[test]
    fn test_battery_unpacking() {
        let mut m = manufacturer();
        m.battery = 0x96;
        assert_eq!(m.battery_level(), 22);
        assert!(m.is_charging());

        m.battery = 0x50;
        assert_eq!(m.battery_level(), 80);
        assert!(!m.is_charging());
    }

    #[test]
    fn test_design_and_color_unpacking() {
        let mut m = manufacturer();
        m.design_and_color = 0x21;
        assert_eq!(m.colorway(), Colorway::OnyxBlack);
        assert_eq!(m.colorway().code(), 1);
        assert_eq!(m.die_type(), DieType::D6);
        assert_eq!(m.die_type().code(), 2);

        m.design_and_color = 0xFF;
        assert_eq!(m.die_type(), DieType::Unknown);
        assert_eq!(m.colorway(), Colorway::Unknown);
    }

    #[test]
    fn test_unrecognized_codes_do_not_fail() {
        let mut m = manufacturer();
        m.design_and_color = 0xFF;
        m.roll_state = 0xEE;
        let device = interpret(
            Some(&m.to_bytes()),
            Some(&service().to_bytes()),
            None,
            None,
            &peripheral(),
        )
        .unwrap();
        assert_eq!(device.die_type, DieType::Unknown);
        assert_eq!(device.colorway, Colorway::Unknown);
        assert_eq!(device.roll_state, RollState::Unknown);
    }

    #[test]
    fn test_interpret_full_snapshot() {
        let device = interpret(
            Some(&manufacturer().to_bytes()),
            Some(&service().to_bytes()),
            Some("Pixel Blue"),
            Some(-61),
            &peripheral(),
        )
        .unwrap();

        assert_eq!(device.device_id, 0x1A2B_3C4D);
        assert_eq!(device.hex_id(), "1A2B3C4D");
        assert_eq!(device.name, "Pixel Blue");
        assert_eq!(device.led_count, 20);
        assert_eq!(device.colorway, Colorway::MidnightGalaxy);
        assert_eq!(device.die_type, DieType::D20);
        assert_eq!(device.firmware_date, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        assert_eq!(device.firmware_date.year(), 2023);
        assert_eq!(device.rssi, Some(-61));
        assert_eq!(device.battery_level, 22);
        assert!(device.is_charging);
        assert_eq!(device.roll_state, RollState::OnFace);
        assert_eq!(device.current_face, 20);
        assert_eq!(device.peripheral, peripheral());
    }

    #[test]
    fn test_missing_payloads() {
        let m = manufacturer().to_bytes();
        let s = service().to_bytes();

        assert_eq!(
            interpret(Some(&m), None, None, None, &peripheral()),
            Err(InterpretError::MissingAdvertisementFields {
                manufacturer: true,
                service: false
            })
        );
        assert_eq!(
            interpret(None, Some(&s), None, None, &peripheral()),
            Err(InterpretError::MissingAdvertisementFields {
                manufacturer: false,
                service: true
            })
        );
    }

    #[test]
    fn test_truncated_payload() {
        let m = manufacturer().to_bytes();
        let s = service().to_bytes();
        assert!(matches!(
            interpret(Some(&m[..6]), Some(&s), None, None, &peripheral()),
            Err(InterpretError::Layout(LayoutError::TruncatedBuffer { expected: 7, actual: 6, .. }))
        ));
        assert!(matches!(
            interpret(Some(&m), Some(&s[..4]), None, None, &peripheral()),
            Err(InterpretError::Layout(LayoutError::TruncatedBuffer { expected: 8, actual: 4, .. }))
        ));
    }

    #[test]
    fn test_longer_payloads_are_accepted() {
        let mut m = manufacturer().to_bytes();
        m.extend_from_slice(&[0, 0, 0]);
        let mut s = service().to_bytes();
        s.push(0xAA);
        let device = interpret(Some(&m), Some(&s), None, None, &peripheral()).unwrap();
        assert_eq!(device.device_id, 0x1A2B_3C4D);
        assert_eq!(device.name, "Unknown");
    }

    #[test]
    fn test_zero_device_id_is_rejected() {
        let s = ServiceRecord {
            device_id: 0,
            build_timestamp: 0,
        };
        assert_eq!(
            interpret(Some(&manufacturer().to_bytes()), Some(&s.to_bytes()), None, None, &peripheral()),
            Err(InterpretError::InvalidDeviceId)
        );
    }

    #[test]
    fn test_raw_advertisement_reads_dice_service_data() {
        let mut raw = RawAdvertisement {
            peripheral: peripheral(),
            manufacturer_data: Some(manufacturer().to_bytes()),
            service_data: HashMap::new(),
            local_name: None,
            rssi: None,
        };
        assert!(matches!(
            raw.interpret(),
            Err(InterpretError::MissingAdvertisementFields { service: false, .. })
        ));

        raw.service_data.insert(UUID_DICE_SERVICE, service().to_bytes());
        assert_eq!(raw.interpret().unwrap().device_id, 0x1A2B_3C4D);
    }
}
