//! Application state management
//! This module wires the configuration, transport and manager together.

use std::sync::Arc;

use log::info;
use tokio::sync::mpsc;

use crate::config::ScannerConfig;
use crate::core::BluetoothManager;
use crate::core::bluetooth::{BluestTransport, ScanTransport, TransportEvent};

/// Application state
pub struct AppState {
    /// The Bluetooth manager instance
    pub bluetooth_manager: Arc<BluetoothManager>,
    pub config: ScannerConfig,
}

impl AppState {
    /// Creates the application state on top of the platform's Bluetooth adapter
    pub async fn new(config: ScannerConfig) -> Self {
        info!("Initializing BluetoothManager...");
        let (transport, events) = BluestTransport::new().await;
        Self::with_transport(config, transport, events)
    }

    /// Creates the application state on top of any transport
    pub fn with_transport(
        config: ScannerConfig,
        transport: Arc<dyn ScanTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        let manager = BluetoothManager::new(transport, events, config.min_rssi);
        Self {
            bluetooth_manager: Arc::new(manager),
            config,
        }
    }

    /// Starts scanning with the configured options
    pub async fn start_scan(&self) {
        self.bluetooth_manager
            .start(self.config.keep_previous, self.config.allow_duplicates)
            .await;
    }

    /// Gets a reference to the Bluetooth manager
    pub fn get_bluetooth_manager_arc(&self) -> Arc<BluetoothManager> {
        self.bluetooth_manager.clone()
    }
}
