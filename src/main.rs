//! # Drone Link
//!
//! Telemetry and control link for ST BlueST (W2ST) quadcopters over BLE.
//!
//! This application discovers a drone, connects to it, streams its telemetry
//! to the log and keeps a neutral control state on the air.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::time::{interval, Duration};
use tracing::info;

use drone_link::config::LinkConfig;
use drone_link::radio::BleRadio;
use drone_link::session::DroneSession;

/// Configuration file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Seconds between telemetry status log lines while streaming
const STATUS_INTERVAL_SECS: u64 = 2;

/// Main entry point for the Drone Link application
///
/// Initializes the application, brings the link up and runs the status loop
/// until interrupted.
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Set up logging with tracing subscriber
///    - Load configuration (CLI argument, `config/default.toml`, or defaults)
///    - Open the Bluetooth adapter and spawn the session worker
///
/// 2. **Main Loop**
///    - Log connection flag changes as they happen
///    - Log a telemetry summary every 2 seconds while streaming
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Disconnect the link
///    - Wait for the session worker to finish
///    - Clean exit
///
/// # Errors
///
/// Returns error if:
/// - The configuration file cannot be read or is invalid
/// - No Bluetooth adapter is available
///
/// # Examples
///
/// Run the application:
/// ```bash
/// cargo run --release -- config/default.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO drone_link: Drone Link v0.1.0 starting...
/// INFO drone_link::radio::ble: opened bluetooth adapter
/// INFO drone_link::session: selected peripheral id=... name=DRN1110 rssi=Some(-42)
/// INFO drone_link::session: telemetry streaming
/// INFO drone_link: battery 87.4% | pressure 1000.3 hPa | temp 23.5 C | armed: false
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Drone Link v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = match std::env::args().nth(1) {
        Some(path) => LinkConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => LinkConfig::load(DEFAULT_CONFIG_PATH)?,
        None => LinkConfig::default(),
    };

    let radio = Arc::new(BleRadio::open(&config.radio).await?);
    let session = DroneSession::spawn(radio, config);

    session.set_enable_connect(true);
    info!("Press Ctrl+C to exit");

    let mut connected = session.watch_connected();
    let mut status_interval = interval(Duration::from_secs(STATUS_INTERVAL_SECS));

    // Main status loop
    loop {
        tokio::select! {
            changed = connected.changed() => {
                if changed.is_err() {
                    break;
                }
                if *connected.borrow_and_update() {
                    info!("drone connected");
                } else {
                    info!("drone disconnected");
                }
            }

            _ = status_interval.tick() => {
                if !*connected.borrow() {
                    continue;
                }
                let telemetry = session.telemetry();
                info!(
                    "battery {:.1}% | pressure {:.1} hPa | temp {:.1} C | armed: {}",
                    telemetry.environment.battery_percent(),
                    telemetry.environment.pressure_hpa(),
                    telemetry.environment.temperature_celsius(),
                    telemetry.arming.enabled,
                );
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    session.set_enable_connect(false);
    session.shutdown().await;
    info!("Link closed");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        assert_eq!(DEFAULT_CONFIG_PATH, "config/default.toml");
    }

    #[test]
    fn test_status_interval_is_reasonable() {
        // Frequent enough to be useful, slow enough not to spam the log
        assert!(STATUS_INTERVAL_SECS >= 1 && STATUS_INTERVAL_SECS <= 10);
    }
}
