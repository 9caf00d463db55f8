//! Drone scanner
//!
//! Runs one bounded BLE scan and collects every advertising peripheral whose
//! local name matches a target. Progress is broadcast as [`ScanEvent`]s.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Bluetooth error: {0}")]
    Btle(#[from] btleplug::Error),

    #[error("No Bluetooth adapter found")]
    NoAdapter,
}

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Advertised local names to accept
    pub target_names: Vec<String>,
    /// Scan duration in seconds
    pub timeout_secs: u64,
    /// Stop as soon as the first drone is found
    pub stop_on_first: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            target_names: vec!["DRN1110".to_string(), "DRN1120".to_string()],
            timeout_secs: 10,
            stop_on_first: false,
        }
    }
}

/// Scan progress for real-time updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    ScanStarted,
    DroneFound { name: String, id: String },
    ScanCompleted { found: usize },
}

/// A matching peripheral, ready to connect
#[derive(Debug, Clone)]
pub struct FoundDrone {
    pub name: String,
    pub id: PeripheralId,
    pub rssi: Option<i16>,
    pub adapter: Adapter,
    pub peripheral: Peripheral,
}

/// True if `name` is one of `targets`
pub fn matches_target(name: &str, targets: &[String]) -> bool {
    targets.iter().any(|target| target == name)
}

pub struct DroneScanner {
    config: ScannerConfig,
    event_tx: broadcast::Sender<ScanEvent>,
}

impl DroneScanner {
    pub fn new(config: ScannerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            config,
            event_tx,
        }
    }

    /// Subscribe to scan events
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.event_tx.subscribe()
    }

    /// Scan with the configured timeout
    pub async fn scan_default(&self) -> Result<Vec<FoundDrone>, ScanError> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        self.scan(timeout).await
    }

    /// Scan for up to `timeout` and return the matching peripherals in discovery order
    pub async fn scan(&self, timeout: Duration) -> Result<Vec<FoundDrone>, ScanError> {
        let config = &self.config;

        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(ScanError::NoAdapter)?;

        let mut events = adapter.events().await?;
        adapter.start_scan(ScanFilter::default()).await?;
        info!(timeout_secs = timeout.as_secs(), targets = ?config.target_names, "Scan started");
        let _ = self.event_tx.send(ScanEvent::ScanStarted);

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut found: Vec<FoundDrone> = Vec::new();
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.next() => {
                    let id = match event {
                        Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => id,
                        Some(_) => continue,
                        None => break,
                    };
                    if found.iter().any(|drone| drone.id == id) {
                        continue;
                    }
                    match inspect(&adapter, &id, &config.target_names).await {
                        Ok(Some(drone)) => {
                            info!(name = %drone.name, id = %drone.id, rssi = ?drone.rssi, "Drone found");
                            let _ = self.event_tx.send(ScanEvent::DroneFound {
                                name: drone.name.clone(),
                                id: drone.id.to_string(),
                            });
                            found.push(drone);
                            if config.stop_on_first {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => debug!(id = %id, error = %e, "Failed to inspect peripheral"),
                    }
                }
            }
        }

        if let Err(e) = adapter.stop_scan().await {
            warn!(error = %e, "Failed to stop scan");
        }
        info!(found = found.len(), "Scan completed");
        let _ = self.event_tx.send(ScanEvent::ScanCompleted { found: found.len() });
        Ok(found)
    }
}

/// Resolve a discovered id; anonymous and non-matching peripherals yield `None`
async fn inspect(
    adapter: &Adapter,
    id: &PeripheralId,
    targets: &[String],
) -> Result<Option<FoundDrone>, ScanError> {
    let peripheral = adapter.peripheral(id).await?;
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };
    let Some(name) = properties.local_name else {
        return Ok(None);
    };
    if !matches_target(&name, targets) {
        return Ok(None);
    }
    Ok(Some(FoundDrone {
        name,
        id: id.clone(),
        rssi: properties.rssi,
        adapter: adapter.clone(),
        peripheral,
    }))
}
