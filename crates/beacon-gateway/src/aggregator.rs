//! The aggregation cycle.
//!
//! Every interval the pending set is drained, filtered by signal strength,
//! formatted into one report and published. The next tick is scheduled only
//! after the current one has finished, so ticks never overlap and a slow
//! publish simply pushes the schedule back.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use beacon_core::PendingSet;
use beacon_types::{filter_by_rssi, format_report, scan_topic};

use crate::publisher::{DeliveryStatus, Publisher};
use crate::store::{ConfigStore, GatewaySettings};

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was pending.
    Empty,
    /// Records were drained but none met the threshold.
    FilteredOut { drained: usize },
    /// A report was handed to the publisher.
    Published {
        devices: usize,
        status: DeliveryStatus,
    },
    /// The report could not be formatted and was discarded.
    FormatFailed,
}

/// Drains the pending set on a fixed interval and publishes reports.
pub struct Aggregator {
    pending: Arc<PendingSet>,
    publisher: Arc<Publisher>,
    store: Arc<ConfigStore>,
    gateway_id: String,
    interval: Duration,
    start_threshold: i32,
    ticks: AtomicU64,
}

impl Aggregator {
    /// Create a cycle using the settings captured at session start.
    pub fn new(
        pending: Arc<PendingSet>,
        publisher: Arc<Publisher>,
        store: Arc<ConfigStore>,
        settings: &GatewaySettings,
    ) -> Self {
        Self {
            pending,
            publisher,
            store,
            gateway_id: settings.gateway_id.clone(),
            interval: settings.interval,
            start_threshold: settings.rssi_threshold,
            ticks: AtomicU64::new(0),
        }
    }

    /// Interval between ticks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticks completed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Threshold for this tick: re-read from the store, or the session's
    /// starting value if the store cannot be read.
    async fn current_threshold(&self) -> i32 {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.reload_settings()).await {
            Ok(Ok(settings)) => settings.rssi_threshold,
            Ok(Err(e)) => {
                warn!(
                    "Could not re-read preferences, keeping threshold {}: {}",
                    self.start_threshold, e
                );
                self.start_threshold
            }
            Err(e) => {
                error!("Preference reload task failed: {}", e);
                self.start_threshold
            }
        }
    }

    /// Run one tick.
    pub async fn tick(&self) -> TickOutcome {
        let outcome = self.run_tick().await;
        self.ticks.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    async fn run_tick(&self) -> TickOutcome {
        let drained = self.pending.drain();
        if drained.is_empty() {
            debug!("Tick: nothing pending");
            return TickOutcome::Empty;
        }

        let total = drained.len();
        let threshold = self.current_threshold().await;
        let batch = filter_by_rssi(drained, threshold);
        if batch.is_empty() {
            debug!(
                "Tick: {} record(s) drained, none at or above {} dBm",
                total, threshold
            );
            return TickOutcome::FilteredOut { drained: total };
        }

        let payload = match format_report(&self.gateway_id, &batch, OffsetDateTime::now_utc()) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to format report: {}", e);
                return TickOutcome::FormatFailed;
            }
        };

        let topic = scan_topic(&self.gateway_id);
        let status = self.publisher.publish(&topic, payload.as_bytes()).await;
        debug!(
            "Tick: {} of {} record(s) reported to {} ({:?})",
            batch.len(),
            total,
            topic,
            status
        );

        TickOutcome::Published {
            devices: batch.len(),
            status,
        }
    }

    /// Start ticking until `cancel` fires.
    ///
    /// The first tick runs one full interval after the start, once the
    /// listener has had a window to collect advertisements.
    ///
    /// Cancellation only interrupts the wait between ticks; a tick that has
    /// started always runs to completion before the task ends.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        info!(
            "Aggregation cycle started (every {:?}, gateway {})",
            self.interval, self.gateway_id
        );
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
                self.tick().await;
            }
            info!("Aggregation cycle stopped after {} tick(s)", self.ticks());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, BrokerError};
    use crate::store::Preferences;
    use async_trait::async_trait;
    use beacon_types::{DiscoveryRecord, Report};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBroker {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Broker for RecordingBroker {
        async fn connect(&self) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
            self.sent.lock().unwrap().push((
                topic.to_string(),
                String::from_utf8_lossy(payload).into_owned(),
            ));
            Ok(())
        }

        async fn disconnect(&self) {}

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn setup(threshold: &str) -> (Arc<Aggregator>, Arc<PendingSet>, Arc<RecordingBroker>) {
        let store = Arc::new(ConfigStore::in_memory(Preferences {
            rssi_threshold: Some(threshold.into()),
            interval_secs: Some("10".into()),
            gateway_id: Some("gw-01".into()),
            service_running: false,
        }));
        let pending = Arc::new(PendingSet::new());
        let broker = Arc::new(RecordingBroker::default());
        let publisher = Arc::new(Publisher::fire_and_forget(broker.clone()));
        let aggregator = Arc::new(Aggregator::new(
            pending.clone(),
            publisher,
            store.clone(),
            &store.settings(),
        ));
        (aggregator, pending, broker)
    }

    #[tokio::test]
    async fn test_tick_filters_and_publishes() {
        let (aggregator, pending, broker) = setup("-80");
        pending.insert(DiscoveryRecord::named("A", "aa:aa", -70));
        pending.insert(DiscoveryRecord::named("B", "bb:bb", -90));

        let outcome = aggregator.tick().await;
        assert!(matches!(
            outcome,
            TickOutcome::Published {
                devices: 1,
                status: DeliveryStatus::Delivered
            }
        ));
        assert!(pending.is_empty());

        let sent = broker.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "/gw/scanpub/gw-01");
        let report = Report::from_json(&sent[0].1).unwrap();
        assert_eq!(report.header.gateway_mac, "gw-01");
        assert_eq!(report.devices.len(), 1);
        assert_eq!(report.devices[0].ble_mac, "aaaa");
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let (aggregator, pending, _) = setup("-80");
        pending.insert(DiscoveryRecord::named("A", "aa:aa", -80));
        assert!(matches!(
            aggregator.tick().await,
            TickOutcome::Published { devices: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_set_publishes_nothing() {
        let (aggregator, _, broker) = setup("-80");
        assert_eq!(aggregator.tick().await, TickOutcome::Empty);
        assert!(broker.sent.lock().unwrap().is_empty());
        assert_eq!(aggregator.ticks(), 1);
    }

    #[tokio::test]
    async fn test_all_filtered_publishes_nothing_but_clears() {
        let (aggregator, pending, broker) = setup("-50");
        pending.insert(DiscoveryRecord::named("A", "aa:aa", -70));

        assert_eq!(
            aggregator.tick().await,
            TickOutcome::FilteredOut { drained: 1 }
        );
        assert!(pending.is_empty());
        assert!(broker.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_cycle_ticks_and_stops() {
        let (aggregator, pending, broker) = setup("-100");
        let cancel = CancellationToken::new();
        let handle = aggregator.clone().spawn(cancel.clone());

        pending.insert(DiscoveryRecord::named("A", "aa:aa", -70));
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(aggregator.ticks(), 0);
        assert_eq!(pending.len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(aggregator.ticks(), 1);
        assert_eq!(broker.sent.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(aggregator.ticks(), 2);

        cancel.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(aggregator.ticks(), 2);
    }
}
