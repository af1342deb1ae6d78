use std::env;
use std::future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use dice_scanner_lib::config::{CONFIG_FILE_NAME, ScannerConfig};
use dice_scanner_lib::core::bluetooth::{ChannelListener, DiscoveredDevice, ScanEvent};
use dice_scanner_lib::{logging, state::AppState};
use log::{info, warn};
use serde_json::json;

fn print_device(event: &str, device: &DiscoveredDevice) -> Result<()> {
    let line = json!({
        "event": event,
        "id": device.hex_id(),
        "address": device.peripheral.address(),
        "device": device,
    });
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let config = ScannerConfig::load_config(&config_path).await?;

    if let Err(e) = logging::init(config.level_filter()) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    info!("Using scanner config {:?}", config_path);

    let state = AppState::new(config).await;
    let manager = state.get_bluetooth_manager_arc();

    let (listener, mut events) = ChannelListener::new();
    manager.subscribe(&listener).await;
    state.start_scan().await;

    let deadline = async {
        match state.config.scan_duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ScanEvent::DeviceDiscovered(device)) => print_device("discovered", &device)?,
                Some(ScanEvent::DeviceUpdated(device)) => print_device("updated", &device)?,
                Some(ScanEvent::BluetoothStateChanged(state)) => info!("Bluetooth is now {:?}", state),
                Some(ScanEvent::ScanningChanged(scanning)) => info!("Scanning: {}", scanning),
                None => break,
            },
            result = &mut interrupted => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Interrupted, stopping scan.");
                break;
            }
            _ = &mut deadline => {
                info!("Scan duration elapsed.");
                break;
            }
        }
    }

    manager.stop().await;
    let devices = manager.devices().await;
    info!("Found {} dice", devices.len());
    for device in &devices {
        info!(
            "  {} {} {:?} face {} battery {}%{}",
            device.hex_id(),
            device.name,
            device.die_type,
            device.current_face,
            device.battery_level,
            if device.is_charging { " (charging)" } else { "" }
        );
    }
    Ok(())
}
