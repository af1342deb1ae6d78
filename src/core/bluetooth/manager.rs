//! Bluetooth manager for the dice scanner
//! This module provides the main interface for scanning. It owns the scan
//! session and is the only code that mutates it: transport events are drained
//! by a single task, and API calls take the same lock.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::core::bluetooth::notification::ScanListener;
use crate::core::bluetooth::registry::{DeviceRegistry, DieHandle};
use crate::core::bluetooth::scanner::ScanSession;
use crate::core::bluetooth::transport::{ScanTransport, TransportEvent};
use crate::core::bluetooth::types::{BluetoothState, DiscoveredDevice};

/// Manages dice discovery
pub struct BluetoothManager {
    session: Arc<Mutex<ScanSession>>,
    registry: Mutex<DeviceRegistry>,
    event_task: JoinHandle<()>,
}

impl BluetoothManager {
    /// Creates a manager and starts draining `events`.
    ///
    /// Advertisements weaker than `min_rssi` are dropped before they are decoded.
    /// Must be called from within a tokio runtime.
    pub fn new(
        transport: Arc<dyn ScanTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        min_rssi: Option<i16>,
    ) -> Self {
        let session = Arc::new(Mutex::new(ScanSession::new(transport)));
        let event_task = tokio::spawn(Self::process_events(session.clone(), events, min_rssi));
        Self {
            session,
            registry: Mutex::new(DeviceRegistry::new()),
            event_task,
        }
    }

    async fn process_events(
        session: Arc<Mutex<ScanSession>>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        min_rssi: Option<i16>,
    ) {
        info!("Listening for transport events...");
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::StateChanged(state) => {
                    session.lock().await.handle_state_changed(state);
                }
                TransportEvent::Advertisement {
                    generation,
                    advertisement,
                } => {
                    if let (Some(min), Some(rssi)) = (min_rssi, advertisement.rssi) {
                        if rssi < min {
                            debug!("Skipping weak advertisement ({} dBm)", rssi);
                            continue;
                        }
                    }
                    // Decode before taking the lock so API calls are not held up.
                    let interpreted = advertisement.interpret();
                    session.lock().await.apply_from(generation, interpreted);
                }
            }
        }
        info!("Transport event stream ended");
    }

    /// Starts scanning for dice
    pub async fn start(&self, keep_previous: bool, allow_duplicates: bool) {
        self.session.lock().await.start(keep_previous, allow_duplicates);
    }

    pub async fn stop(&self) {
        self.session.lock().await.stop();
    }

    pub async fn clear(&self) {
        self.session.lock().await.clear();
    }

    pub async fn bluetooth_state(&self) -> BluetoothState {
        self.session.lock().await.bluetooth_state()
    }

    pub async fn is_scanning(&self) -> bool {
        self.session.lock().await.is_scanning()
    }

    /// Snapshot of the dice seen so far, in discovery order
    pub async fn devices(&self) -> Vec<DiscoveredDevice> {
        self.session.lock().await.devices().to_vec()
    }

    pub async fn device(&self, device_id: u32) -> Option<DiscoveredDevice> {
        self.session.lock().await.device(device_id).cloned()
    }

    /// Registers a listener. The manager only keeps a weak reference.
    pub async fn subscribe<L: ScanListener + 'static>(&self, listener: &Arc<L>) {
        self.session.lock().await.subscribe(listener);
    }

    /// Returns the cached handle for a die, creating it from the current scan
    /// list if needed. `None` if the die has neither a handle nor a listing.
    pub async fn get_or_create_handle(&self, device_id: u32) -> Option<Arc<DieHandle>> {
        let mut registry = self.registry.lock().await;
        if let Some(handle) = registry.get(device_id) {
            return Some(handle);
        }
        match self.device(device_id).await {
            Some(device) => Some(registry.get_or_create(&device)),
            None => {
                warn!("No die with id {:08X} has been discovered", device_id);
                None
            }
        }
    }

    /// Returns the cached handle for the die in `device`, creating it if needed.
    /// Works for snapshots that are no longer in the scan list.
    pub async fn handle_for(&self, device: &DiscoveredDevice) -> Arc<DieHandle> {
        self.registry.lock().await.get_or_create(device)
    }
}

impl Drop for BluetoothManager {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}
