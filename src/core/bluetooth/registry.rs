//! Cache of per-die session handles
//! Handles are created the first time a die is asked for and then reused, even
//! after the die has been cleared from the scan list.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;

use crate::core::bluetooth::types::{DiscoveredDevice, PeripheralHandle};

/// Entry point for talking to one die after discovery
#[derive(Debug)]
pub struct DieHandle {
    device_id: u32,
    peripheral: PeripheralHandle,
}

impl DieHandle {
    fn new(device: &DiscoveredDevice) -> Self {
        Self {
            device_id: device.device_id,
            peripheral: device.peripheral.clone(),
        }
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// The peripheral the die was advertising from when the handle was created
    pub fn peripheral(&self) -> &PeripheralHandle {
        &self.peripheral
    }
}

/// Map of device id to handle
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    handles: HashMap<u32, Arc<DieHandle>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for the die, creating it if this is the first request
    pub fn get_or_create(&mut self, device: &DiscoveredDevice) -> Arc<DieHandle> {
        self.handles
            .entry(device.device_id)
            .or_insert_with(|| {
                info!("Creating handle for die {}", device.hex_id());
                Arc::new(DieHandle::new(device))
            })
            .clone()
    }

    pub fn get(&self, device_id: u32) -> Option<Arc<DieHandle>> {
        self.handles.get(&device_id).cloned()
    }

    /// Forgets a handle. The registry never does this on its own.
    pub fn remove(&mut self, device_id: u32) -> Option<Arc<DieHandle>> {
        self.handles.remove(&device_id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
