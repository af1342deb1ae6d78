//! Notification fan-out for scan sessions
//! Listeners are held weakly; a listener that has been dropped is skipped and
//! forgotten on the next delivery.

use std::sync::{Arc, Weak};

use log::debug;
use tokio::sync::mpsc;

use crate::core::bluetooth::types::{BluetoothState, DiscoveredDevice};

/// Receives scan session notifications. Every method defaults to doing nothing.
pub trait ScanListener: Send + Sync {
    fn bluetooth_state_changed(&self, _state: BluetoothState) {}

    fn scanning_changed(&self, _is_scanning: bool) {}

    fn device_discovered(&self, _device: &DiscoveredDevice) {}

    fn device_updated(&self, _device: &DiscoveredDevice) {}
}

/// A scan session notification as a value
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    BluetoothStateChanged(BluetoothState),
    ScanningChanged(bool),
    DeviceDiscovered(DiscoveredDevice),
    DeviceUpdated(DiscoveredDevice),
}

/// Delivers notifications to every live listener in subscription order
#[derive(Default)]
pub struct NotificationFanout {
    listeners: Vec<Weak<dyn ScanListener>>,
}

impl NotificationFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener without extending its lifetime
    pub fn subscribe<L: ScanListener + 'static>(&mut self, listener: &Arc<L>) {
        let weak: Weak<L> = Arc::downgrade(listener);
        self.listeners.push(weak);
    }

    /// Number of listeners still alive
    pub fn listener_count(&self) -> usize {
        self.listeners.iter().filter(|l| l.strong_count() > 0).count()
    }

    pub fn emit(&mut self, event: &ScanEvent) {
        self.listeners.retain(|listener| {
            let Some(listener) = listener.upgrade() else {
                debug!("Dropping listener that no longer exists");
                return false;
            };
            match event {
                ScanEvent::BluetoothStateChanged(state) => listener.bluetooth_state_changed(*state),
                ScanEvent::ScanningChanged(is_scanning) => listener.scanning_changed(*is_scanning),
                ScanEvent::DeviceDiscovered(device) => listener.device_discovered(device),
                ScanEvent::DeviceUpdated(device) => listener.device_updated(device),
            }
            true
        });
    }
}

/// Forwards every notification into an unbounded channel
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<ScanEvent>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ScanEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }

    fn forward(&self, event: ScanEvent) {
        // Receiver gone means nobody is interested any more.
        let _ = self.sender.send(event);
    }
}

impl ScanListener for ChannelListener {
    fn bluetooth_state_changed(&self, state: BluetoothState) {
        self.forward(ScanEvent::BluetoothStateChanged(state));
    }

    fn scanning_changed(&self, is_scanning: bool) {
        self.forward(ScanEvent::ScanningChanged(is_scanning));
    }

    fn device_discovered(&self, device: &DiscoveredDevice) {
        self.forward(ScanEvent::DeviceDiscovered(device.clone()));
    }

    fn device_updated(&self, device: &DiscoveredDevice) {
        self.forward(ScanEvent::DeviceUpdated(device.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl ScanListener for Recorder {
        fn scanning_changed(&self, is_scanning: bool) {
            self.seen.lock().unwrap().push(format!("scanning:{is_scanning}"));
        }

        fn bluetooth_state_changed(&self, state: BluetoothState) {
            self.seen.lock().unwrap().push(format!("state:{state:?}"));
        }
    }

    #[test]
    fn test_delivers_in_order_to_all_listeners() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let mut fanout = NotificationFanout::new();
        fanout.subscribe(&first);
        fanout.subscribe(&second);

        fanout.emit(&ScanEvent::BluetoothStateChanged(BluetoothState::On));
        fanout.emit(&ScanEvent::ScanningChanged(true));

        for recorder in [&first, &second] {
            assert_eq!(*recorder.seen.lock().unwrap(), vec!["state:On", "scanning:true"]);
        }
    }

    #[test]
    fn test_listener_is_not_kept_alive() {
        let listener = Arc::new(Recorder::default());
        let mut fanout = NotificationFanout::new();
        fanout.subscribe(&listener);
        assert_eq!(fanout.listener_count(), 1);

        drop(listener);
        assert_eq!(fanout.listener_count(), 0);
        fanout.emit(&ScanEvent::ScanningChanged(false));
        assert!(fanout.listeners.is_empty());
    }

    #[test]
    fn test_channel_listener_forwards() {
        let (listener, mut events) = ChannelListener::new();
        let mut fanout = NotificationFanout::new();
        fanout.subscribe(&listener);

        fanout.emit(&ScanEvent::ScanningChanged(true));
        assert_eq!(events.try_recv().unwrap(), ScanEvent::ScanningChanged(true));
        assert!(events.try_recv().is_err());
    }
}
