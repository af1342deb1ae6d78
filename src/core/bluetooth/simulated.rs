//! In-process BLE transport
//!
//! Lets tests and demos drive a scan session without radio hardware: the
//! caller flips the radio state and injects advertisements, and every
//! discovery request is recorded for inspection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::advertisement::{ManufacturerRecord, ServiceRecord};
use crate::core::bluetooth::constants::UUID_DICE_SERVICE;
use crate::core::bluetooth::transport::{ScanTransport, TransportEvent};
use crate::core::bluetooth::types::{BluetoothState, PeripheralHandle, RawAdvertisement};
use crate::utils::lock_unpoisoned as lock;

/// A discovery request as the transport received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub services: Vec<Uuid>,
    pub allow_duplicates: bool,
}

pub struct SimulatedTransport {
    state: Mutex<BluetoothState>,
    scanning: AtomicBool,
    discovery_wanted: AtomicBool,
    generation: AtomicU64,
    requests: Mutex<Vec<DiscoveryRequest>>,
    end_requests: Mutex<usize>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl SimulatedTransport {
    pub fn new(state: BluetoothState) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let transport = Self {
            state: Mutex::new(state),
            scanning: AtomicBool::new(false),
            discovery_wanted: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            requests: Mutex::new(Vec::new()),
            end_requests: Mutex::new(0),
            events,
        };
        (Arc::new(transport), receiver)
    }

    /// Changes the radio state. Discovery pauses while the radio is not on and
    /// resumes when it comes back, as long as it has not been ended.
    pub fn set_state(&self, state: BluetoothState) {
        *lock(&self.state) = state;
        let scanning = state == BluetoothState::On && self.discovery_wanted.load(Ordering::SeqCst);
        self.scanning.store(scanning, Ordering::SeqCst);
        self.send(TransportEvent::StateChanged(state));
    }

    /// Delivers an advertisement as if it had been received over the air
    /// by the current discovery request
    pub fn advertise(&self, advertisement: RawAdvertisement) {
        self.send(TransportEvent::Advertisement {
            generation: self.discovery_generation(),
            advertisement,
        });
    }

    pub fn discovery_requests(&self) -> Vec<DiscoveryRequest> {
        lock(&self.requests).clone()
    }

    pub fn end_discovery_count(&self) -> usize {
        *lock(&self.end_requests)
    }

    fn send(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("Simulated transport has no receiver");
        }
    }
}

impl ScanTransport for SimulatedTransport {
    fn state(&self) -> BluetoothState {
        *lock(&self.state)
    }

    fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    fn begin_discovery(&self, services: &[Uuid], allow_duplicates: bool) {
        lock(&self.requests).push(DiscoveryRequest {
            services: services.to_vec(),
            allow_duplicates,
        });
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.discovery_wanted.store(true, Ordering::SeqCst);
        self.scanning
            .store(self.state() == BluetoothState::On, Ordering::SeqCst);
    }

    fn end_discovery(&self) {
        *lock(&self.end_requests) += 1;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.discovery_wanted.store(false, Ordering::SeqCst);
        self.scanning.store(false, Ordering::SeqCst);
    }

    fn discovery_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Builds the advertisement a die with these records would broadcast
pub fn die_advertisement(
    peripheral_id: &str,
    manufacturer: &ManufacturerRecord,
    service: &ServiceRecord,
    local_name: Option<&str>,
    rssi: Option<i16>,
) -> RawAdvertisement {
    RawAdvertisement {
        peripheral: PeripheralHandle::Simulated(peripheral_id.to_string()),
        manufacturer_data: Some(manufacturer.to_bytes()),
        service_data: HashMap::from([(UUID_DICE_SERVICE, service.to_bytes())]),
        local_name: local_name.map(str::to_string),
        rssi,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_only_runs_with_radio_on() {
        let (transport, _events) = SimulatedTransport::new(BluetoothState::Off);
        transport.begin_discovery(&[UUID_DICE_SERVICE], true);
        assert!(!transport.is_scanning());

        // The pending request starts once the radio comes on.
        transport.set_state(BluetoothState::On);
        assert!(transport.is_scanning());

        transport.begin_discovery(&[UUID_DICE_SERVICE], false);
        assert!(transport.is_scanning());
        assert_eq!(
            transport.discovery_requests()[1],
            DiscoveryRequest {
                services: vec![UUID_DICE_SERVICE],
                allow_duplicates: false
            }
        );

        transport.end_discovery();
        assert!(!transport.is_scanning());
        assert_eq!(transport.end_discovery_count(), 1);

        transport.set_state(BluetoothState::Off);
        transport.set_state(BluetoothState::On);
        assert!(!transport.is_scanning());
    }

    #[test]
    fn test_state_change_is_reported() {
        let (transport, mut events) = SimulatedTransport::new(BluetoothState::On);
        transport.begin_discovery(&[], false);
        transport.set_state(BluetoothState::Off);

        match events.try_recv().unwrap() {
            TransportEvent::StateChanged(state) => assert_eq!(state, BluetoothState::Off),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!transport.is_scanning());
    }

    #[test]
    fn test_advertisements_carry_the_discovery_generation() {
        let (transport, mut events) = SimulatedTransport::new(BluetoothState::On);
        assert_eq!(transport.discovery_generation(), 0);
        transport.begin_discovery(&[UUID_DICE_SERVICE], false);
        transport.end_discovery();
        transport.begin_discovery(&[UUID_DICE_SERVICE], false);
        assert_eq!(transport.discovery_generation(), 3);

        transport.advertise(RawAdvertisement {
            peripheral: PeripheralHandle::Simulated("die".to_string()),
            manufacturer_data: None,
            service_data: HashMap::new(),
            local_name: None,
            rssi: None,
        });
        match events.try_recv().unwrap() {
            TransportEvent::Advertisement { generation, .. } => assert_eq!(generation, 3),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
