use std::sync::Arc;

use log::{debug, info};

use crate::core::advertisement::InterpretError;
use crate::core::bluetooth::constants::{EXPECTED_DICE_PER_SESSION, UUID_DICE_SERVICE};
use crate::core::bluetooth::notification::{NotificationFanout, ScanEvent, ScanListener};
use crate::core::bluetooth::transport::ScanTransport;
use crate::core::bluetooth::types::{BluetoothState, DiscoveredDevice, RawAdvertisement};

/// What applying an advertisement did to the device list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChange {
    Discovered,
    Updated,
    Ignored,
}

/// The scan state for one session: radio availability, the scanning flag and
/// the deduplicated list of dice seen so far.
///
/// This is plain synchronous state. Whoever owns it is expected to serialize
/// access; see [`crate::core::bluetooth::BluetoothManager`].
pub struct ScanSession {
    transport: Arc<dyn ScanTransport>,
    bluetooth_state: BluetoothState,
    is_scanning: bool,
    devices: Vec<DiscoveredDevice>,
    fanout: NotificationFanout,
}

impl ScanSession {
    pub fn new(transport: Arc<dyn ScanTransport>) -> Self {
        let bluetooth_state = transport.state();
        info!("Scan session created, bluetooth is {:?}", bluetooth_state);
        Self {
            transport,
            bluetooth_state,
            is_scanning: false,
            devices: Vec::with_capacity(EXPECTED_DICE_PER_SESSION),
            fanout: NotificationFanout::new(),
        }
    }

    pub fn bluetooth_state(&self) -> BluetoothState {
        self.bluetooth_state
    }

    pub fn is_scanning(&self) -> bool {
        self.is_scanning
    }

    /// Dice in the order they were first discovered
    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    pub fn device(&self, device_id: u32) -> Option<&DiscoveredDevice> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    pub fn subscribe<L: ScanListener + 'static>(&mut self, listener: &Arc<L>) {
        self.fanout.subscribe(listener);
    }

    /// Starts discovering dice. Without `keep_previous` the device list is emptied first.
    pub fn start(&mut self, keep_previous: bool, allow_duplicates: bool) {
        if !keep_previous {
            self.devices.clear();
        }
        if self.bluetooth_state != BluetoothState::On {
            info!(
                "Bluetooth is {:?}, dice will appear once it is on",
                self.bluetooth_state
            );
        }
        info!(
            "Starting scan (keep previous: {}, allow duplicates: {})",
            keep_previous, allow_duplicates
        );
        self.transport
            .begin_discovery(&[UUID_DICE_SERVICE], allow_duplicates);
        let scanning = self.transport.is_scanning();
        self.set_scanning(scanning);
    }

    pub fn stop(&mut self) {
        info!("Stopping scan.");
        self.transport.end_discovery();
        self.set_scanning(false);
    }

    /// Empties the device list. The scanning flag is left alone.
    pub fn clear(&mut self) {
        debug!("Clearing {} dice", self.devices.len());
        self.devices.clear();
    }

    /// Applies a radio state report from the transport.
    ///
    /// The scanning flag is taken from the transport as it is now, so a report
    /// queued before a `stop()` cannot turn scanning back on.
    pub fn handle_state_changed(&mut self, state: BluetoothState) {
        if state != self.bluetooth_state {
            info!("Bluetooth state changed: {:?} -> {:?}", self.bluetooth_state, state);
            self.bluetooth_state = state;
            self.fanout.emit(&ScanEvent::BluetoothStateChanged(state));
        }
        let scanning = self.transport.is_scanning();
        self.set_scanning(scanning);
    }

    /// Interprets and applies an advertisement in one step
    pub fn handle_advertisement(&mut self, advertisement: &RawAdvertisement) -> DeviceChange {
        self.apply(advertisement.interpret())
    }

    /// Applies an advertisement received under discovery request `generation`.
    /// Anything left over from an earlier `start` or `stop` is dropped.
    pub fn apply_from(
        &mut self,
        generation: u64,
        interpreted: Result<DiscoveredDevice, InterpretError>,
    ) -> DeviceChange {
        let current = self.transport.discovery_generation();
        if generation != current {
            debug!(
                "Ignoring advertisement from discovery request {} (current is {})",
                generation, current
            );
            return DeviceChange::Ignored;
        }
        self.apply(interpreted)
    }

    /// Applies an already interpreted advertisement.
    ///
    /// Failed interpretations are logged and leave the session untouched.
    pub fn apply(&mut self, interpreted: Result<DiscoveredDevice, InterpretError>) -> DeviceChange {
        if !self.is_scanning {
            debug!("Ignoring advertisement received while idle");
            return DeviceChange::Ignored;
        }
        match interpreted {
            Ok(device) => self.upsert(device),
            Err(e) => {
                debug!("Ignoring advertisement: {}", e);
                DeviceChange::Ignored
            }
        }
    }

    fn upsert(&mut self, device: DiscoveredDevice) -> DeviceChange {
        match self.devices.iter().position(|d| d.device_id == device.device_id) {
            Some(index) => {
                self.devices[index] = device;
                self.fanout
                    .emit(&ScanEvent::DeviceUpdated(self.devices[index].clone()));
                DeviceChange::Updated
            }
            None => {
                info!(
                    "Discovered die {} ({}), {:?} {:?}, battery {}%",
                    device.hex_id(),
                    device.name,
                    device.die_type,
                    device.colorway,
                    device.battery_level
                );
                self.fanout.emit(&ScanEvent::DeviceDiscovered(device.clone()));
                self.fanout.emit(&ScanEvent::DeviceUpdated(device.clone()));
                self.devices.push(device);
                DeviceChange::Discovered
            }
        }
    }

    fn set_scanning(&mut self, is_scanning: bool) {
        if is_scanning != self.is_scanning {
            info!("Scanning changed: {}", is_scanning);
            self.is_scanning = is_scanning;
            self.fanout.emit(&ScanEvent::ScanningChanged(is_scanning));
        }
    }
}
