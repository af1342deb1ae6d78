//! Scan transport backed by the bluest library
//! This module watches the default adapter's availability and runs a
//! cancellable scan task that forwards advertisements as transport events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bluest::error::ErrorKind;
use bluest::{Adapter, AdapterEvent, AdvertisementData, Device, Uuid};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::ADAPTER_AVAILABILITY_TIMEOUT_MS;
use crate::core::bluetooth::transport::{ScanTransport, TransportEvent};
use crate::core::bluetooth::types::{BluetoothState, PeripheralHandle, RawAdvertisement};
use crate::utils::lock_unpoisoned;

#[derive(Debug, Clone)]
struct DiscoveryRequest {
    services: Vec<Uuid>,
    allow_duplicates: bool,
}

/// State shared between the transport and its background tasks
struct Shared {
    state: Mutex<BluetoothState>,
    scanning: AtomicBool,
    generation: AtomicU64,
    request: Mutex<Option<DiscoveryRequest>>,
    cancel_token: Mutex<CancellationToken>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Shared {
    fn notify_state(&self) {
        let event = TransportEvent::StateChanged(*lock_unpoisoned(&self.state));
        if self.events.send(event).is_err() {
            debug!("No receiver for bluetooth state change");
        }
    }

    /// Cancels the running scan, if any, and hands out a token for the next one
    fn renew_token(&self) -> CancellationToken {
        let mut guard = lock_unpoisoned(&self.cancel_token);
        guard.cancel();
        *guard = CancellationToken::new();
        guard.clone()
    }

    fn cancel_scan(&self) {
        lock_unpoisoned(&self.cancel_token).cancel();
        self.scanning.store(false, Ordering::SeqCst);
    }
}

/// Talks to the platform's default Bluetooth adapter
pub struct BluestTransport {
    adapter: Option<Adapter>,
    shared: Arc<Shared>,
    runtime: Handle,
}

impl BluestTransport {
    /// Opens the default adapter and starts watching its availability.
    /// Must be called from within a tokio runtime.
    pub async fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let adapter = Adapter::default().await;
        let state = match &adapter {
            None => {
                warn!("No Bluetooth adapter found");
                BluetoothState::Unsupported
            }
            Some(adapter) => Self::initial_state(adapter).await,
        };
        info!("Bluetooth adapter state: {:?}", state);

        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            scanning: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            request: Mutex::new(None),
            cancel_token: Mutex::new(CancellationToken::new()),
            events,
        });
        let runtime = Handle::current();

        if let Some(adapter) = adapter.clone() {
            let shared = shared.clone();
            let runtime_for_task = runtime.clone();
            runtime.spawn(async move {
                Self::monitor_adapter(adapter, shared, runtime_for_task).await;
            });
        }

        (
            Arc::new(Self {
                adapter,
                shared,
                runtime,
            }),
            receiver,
        )
    }

    /// An adapter that does not become available shortly is reported as off;
    /// the event monitor picks up any later change.
    async fn initial_state(adapter: &Adapter) -> BluetoothState {
        let wait = Duration::from_millis(ADAPTER_AVAILABILITY_TIMEOUT_MS);
        state_after_wait(tokio::time::timeout(wait, adapter.wait_available()).await)
    }

    /// Follows adapter availability, pausing and resuming the requested scan
    async fn monitor_adapter(adapter: Adapter, shared: Arc<Shared>, runtime: Handle) {
        let events = match adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to watch Bluetooth adapter events: {}", e);
                return;
            }
        };
        let mut events = std::pin::pin!(events);

        while let Some(event) = events.next().await {
            match event {
                Ok(AdapterEvent::Available) => {
                    info!("Bluetooth adapter is available.");
                    *lock_unpoisoned(&shared.state) = BluetoothState::On;
                    let request = lock_unpoisoned(&shared.request).clone();
                    if let Some(request) = request {
                        Self::spawn_scan(&runtime, adapter.clone(), shared.clone(), request);
                    }
                    shared.notify_state();
                }
                Ok(AdapterEvent::Unavailable) => {
                    info!("Bluetooth adapter is unavailable.");
                    *lock_unpoisoned(&shared.state) = BluetoothState::Off;
                    shared.cancel_scan();
                    shared.notify_state();
                }
                Err(e) => error!("Error in adapter event stream: {}", e),
            }
        }
        info!("Adapter event stream has ended.");
    }

    fn spawn_scan(runtime: &Handle, adapter: Adapter, shared: Arc<Shared>, request: DiscoveryRequest) {
        let cancel_token = shared.renew_token();
        let generation = shared.generation.load(Ordering::SeqCst);
        shared.scanning.store(true, Ordering::SeqCst);

        runtime.spawn(async move {
            let scan = Self::internal_scan_task(&adapter, &shared, &request, generation, &cancel_token);
            if let Err(e) = scan.await {
                error!("Bluetooth scan failed: {}", e);
            }
            // A scan that ended on its own (rather than being replaced or
            // stopped) leaves the transport idle.
            if !cancel_token.is_cancelled() {
                shared.scanning.store(false, Ordering::SeqCst);
                shared.notify_state();
            }
        });
    }

    async fn internal_scan_task(
        adapter: &Adapter,
        shared: &Shared,
        request: &DiscoveryRequest,
        generation: u64,
        cancel_token: &CancellationToken,
    ) -> Result<(), bluest::Error> {
        info!("Starting bluetooth scan for {:?}", request.services);
        let scan_stream = adapter.scan(&request.services).await?;
        let mut scan_stream = std::pin::pin!(scan_stream);
        let mut last_payloads: HashMap<String, RawAdvertisement> = HashMap::new();

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered) => {
                            let advertisement =
                                to_raw_advertisement(discovered.device, discovered.adv_data, discovered.rssi);
                            if !request.allow_duplicates
                                && is_repeat(&mut last_payloads, &advertisement)
                            {
                                continue;
                            }
                            let event = TransportEvent::Advertisement { generation, advertisement };
                            if shared.events.send(event).is_err() {
                                debug!("No receiver for advertisements, ending scan");
                                break;
                            }
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
        Ok(())
    }
}

impl ScanTransport for BluestTransport {
    fn state(&self) -> BluetoothState {
        *lock_unpoisoned(&self.shared.state)
    }

    fn is_scanning(&self) -> bool {
        self.shared.scanning.load(Ordering::SeqCst)
    }

    fn begin_discovery(&self, services: &[Uuid], allow_duplicates: bool) {
        let request = DiscoveryRequest {
            services: services.to_vec(),
            allow_duplicates,
        };
        *lock_unpoisoned(&self.shared.request) = Some(request.clone());
        self.shared.generation.fetch_add(1, Ordering::SeqCst);

        match &self.adapter {
            Some(adapter) if self.state() == BluetoothState::On => {
                Self::spawn_scan(&self.runtime, adapter.clone(), self.shared.clone(), request);
            }
            _ => {
                info!("Bluetooth is not on, discovery will begin once it is available");
                self.shared.cancel_scan();
            }
        }
    }

    fn end_discovery(&self) {
        *lock_unpoisoned(&self.shared.request) = None;
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.cancel_scan();
    }

    fn discovery_generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }
}

impl Drop for BluestTransport {
    fn drop(&mut self) {
        self.shared.cancel_scan();
    }
}

fn state_after_wait(result: Result<Result<(), bluest::Error>, Elapsed>) -> BluetoothState {
    match result {
        Ok(Ok(())) => BluetoothState::On,
        Ok(Err(e)) if matches!(e.kind(), ErrorKind::NotAuthorized) => {
            warn!("Bluetooth access is not authorized: {}", e);
            BluetoothState::Unauthorized
        }
        Ok(Err(e)) => {
            error!("Failed to query Bluetooth availability: {}", e);
            BluetoothState::Unknown
        }
        Err(_) => BluetoothState::Off,
    }
}

/// Reassembles the raw manufacturer buffer (company id first) the way dice lay it out
fn to_raw_advertisement(device: Device, adv_data: AdvertisementData, rssi: Option<i16>) -> RawAdvertisement {
    let manufacturer_data = adv_data.manufacturer_data.map(|manufacturer| {
        let mut bytes = manufacturer.company_id.to_le_bytes().to_vec();
        bytes.extend_from_slice(&manufacturer.data);
        bytes
    });
    let service_data = adv_data
        .service_data
        .into_iter()
        .map(|(uuid, data)| (uuid, data.to_vec()))
        .collect();

    RawAdvertisement {
        peripheral: PeripheralHandle::Bluest(device),
        manufacturer_data,
        service_data,
        local_name: adv_data.local_name,
        rssi,
    }
}

/// True if the peripheral's last forwarded advertisement carried the same payload
fn is_repeat(last_payloads: &mut HashMap<String, RawAdvertisement>, advertisement: &RawAdvertisement) -> bool {
    let key = advertisement.peripheral.id();
    if let Some(previous) = last_payloads.get(&key) {
        if previous.manufacturer_data == advertisement.manufacturer_data
            && previous.service_data == advertisement.service_data
            && previous.local_name == advertisement.local_name
        {
            return true;
        }
    }
    last_payloads.insert(key, advertisement.clone());
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advertisement(peripheral: &str, battery: u8, rssi: i16) -> RawAdvertisement {
        RawAdvertisement {
            peripheral: PeripheralHandle::Simulated(peripheral.to_string()),
            manufacturer_data: Some(vec![0xFF, 0xFF, 20, 0x71, 5, 0, battery]),
            service_data: HashMap::new(),
            local_name: Some("Pixel".to_string()),
            rssi: Some(rssi),
        }
    }

    #[tokio::test]
    async fn test_adapter_that_never_becomes_available_is_off() {
        let wait = tokio::time::timeout(
            Duration::from_millis(1),
            std::future::pending::<Result<(), bluest::Error>>(),
        )
        .await;
        assert_eq!(state_after_wait(wait), BluetoothState::Off);
        assert_eq!(state_after_wait(Ok(Ok(()))), BluetoothState::On);
    }

    #[test]
    fn test_repeat_payloads_are_suppressed() {
        let mut last = HashMap::new();
        assert!(!is_repeat(&mut last, &advertisement("a", 80, -50)));
        // Only the signal strength moved.
        assert!(is_repeat(&mut last, &advertisement("a", 80, -70)));
        assert!(!is_repeat(&mut last, &advertisement("a", 79, -70)));
        assert!(!is_repeat(&mut last, &advertisement("b", 79, -70)));
    }
}
