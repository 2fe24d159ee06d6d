//! btleplug-backed radio source.
//!
//! Scanning is started once with an empty filter and left running; every
//! `DeviceDiscovered` / `DeviceUpdated` central event is resolved to the
//! peripheral's current properties and emitted as a
//! [`RadioEvent::Advertisement`]. Peripherals that report no RSSI are skipped.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use beacon_types::DiscoveryRecord;

use crate::error::{Error, RadioUnavailableReason, Result};
use crate::radio::{RadioEvent, RadioEvents, RadioSource};

/// Get the Bluetooth adapter at `index`.
pub async fn get_adapter(index: usize) -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    if adapters.is_empty() {
        return Err(Error::radio_unavailable(RadioUnavailableReason::NoAdapter));
    }

    let available = adapters.len();
    adapters.into_iter().nth(index).ok_or_else(|| {
        Error::radio_unavailable(RadioUnavailableReason::AdapterIndex { index, available })
    })
}

/// Radio source backed by the host Bluetooth stack.
pub struct BtleRadio {
    adapter_index: usize,
    active: Mutex<Option<Adapter>>,
}

impl BtleRadio {
    /// Create a radio that will use the adapter at `adapter_index`.
    pub fn new(adapter_index: usize) -> Self {
        Self {
            adapter_index,
            active: Mutex::new(None),
        }
    }
}

impl Default for BtleRadio {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl RadioSource for BtleRadio {
    async fn subscribe(&self) -> Result<RadioEvents> {
        let mut active = self.active.lock().await;
        if let Some(adapter) = active.take() {
            debug!("Restarting scan on already active adapter");
            let _ = adapter.stop_scan().await;
        }

        let adapter = get_adapter(self.adapter_index).await?;
        if let Ok(info) = adapter.adapter_info().await {
            info!("Using Bluetooth adapter: {}", info);
        }

        let events = adapter.events().await?;
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| {
                Error::radio_unavailable(RadioUnavailableReason::ScanRejected(e.to_string()))
            })?;

        info!("Continuous BLE scan started");
        *active = Some(adapter.clone());

        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move { event_to_radio(&adapter, event).await }
        });

        Ok(stream.boxed())
    }

    async fn unsubscribe(&self) -> Result<()> {
        if let Some(adapter) = self.active.lock().await.take() {
            adapter.stop_scan().await?;
            info!("BLE scan stopped");
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("btleplug adapter #{}", self.adapter_index)
    }
}

async fn event_to_radio(adapter: &Adapter, event: CentralEvent) -> Option<RadioEvent> {
    match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
            match read_record(adapter, &id).await {
                Ok(record) => record.map(RadioEvent::Advertisement),
                Err(e) => {
                    warn!("Failed to read properties of {:?}: {}", id, e);
                    None
                }
            }
        }
        _ => None,
    }
}

async fn read_record(adapter: &Adapter, id: &PeripheralId) -> Result<Option<DiscoveryRecord>> {
    let peripheral = adapter.peripheral(id).await?;
    let Some(props) = peripheral.properties().await? else {
        return Ok(None);
    };
    let Some(rssi) = props.rssi else {
        return Ok(None);
    };

    Ok(Some(DiscoveryRecord::new(
        props.local_name,
        props.address.to_string(),
        rssi,
    )))
}
