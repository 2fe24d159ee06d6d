//! Lifecycle controller.
//!
//! [`Gateway`] ties the pipeline together for one session: wake hold,
//! broker connection, discovery listener and aggregation cycle. Start and
//! stop are idempotent and serialized against each other. Failures of
//! individual components are logged and the session carries on without
//! them; only missing preferences prevent a start.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use beacon_core::{
    BtleRadio, DiscoveryListener, ListenerState, PendingSet, RadioSource, WakeLock,
    platform_wake_hold,
};

use crate::aggregator::Aggregator;
use crate::broker::{Broker, MqttBroker};
use crate::config::{Config, ConfigError};
use crate::publisher::{DeliveryStats, Publisher};
use crate::store::{ConfigStore, PrefKey};

/// Reason string registered with the platform sleep inhibitor.
const WAKE_REASON: &str = "Relaying BLE beacon reports";

/// Errors that prevent the gateway from starting.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Gateway is not configured; missing: {}", format_keys(.missing))]
    NotConfigured { missing: Vec<PrefKey> },
}

fn format_keys(keys: &[PrefKey]) -> String {
    keys.iter()
        .map(PrefKey::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a gateway.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub state: LifecycleState,
    pub scanning: bool,
    pub broker_connected: bool,
    pub wake_held: bool,
    pub pending: usize,
    pub ticks: u64,
    pub delivery: DeliveryStats,
}

struct Session {
    listener: DiscoveryListener,
    publisher: Arc<Publisher>,
    aggregator: Arc<Aggregator>,
    cancel: CancellationToken,
    cycle: JoinHandle<()>,
}

/// The long-running gateway unit.
pub struct Gateway {
    config: Config,
    store: Arc<ConfigStore>,
    radio: Arc<dyn RadioSource>,
    broker: Arc<dyn Broker>,
    wake: Arc<WakeLock>,
    state: Mutex<LifecycleState>,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl Gateway {
    /// Assemble a gateway from explicit collaborators.
    pub fn new(
        config: Config,
        store: Arc<ConfigStore>,
        radio: Arc<dyn RadioSource>,
        broker: Arc<dyn Broker>,
        wake: WakeLock,
    ) -> Self {
        Self {
            config,
            store,
            radio,
            broker,
            wake: Arc::new(wake),
            state: Mutex::new(LifecycleState::Stopped),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Assemble a gateway backed by the host's Bluetooth adapter, an MQTT
    /// broker and the platform sleep inhibitor.
    pub fn from_config(config: Config, store: Arc<ConfigStore>) -> Self {
        let radio = Arc::new(BtleRadio::new(config.scan.adapter_index));
        let broker = Arc::new(MqttBroker::new(config.broker.clone()));
        let wake = WakeLock::new(platform_wake_hold(), WAKE_REASON);
        Self::new(config, store, radio, broker, wake)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        debug!("Gateway state: {}", state);
    }

    /// The preference store this gateway reads.
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Start a session.
    ///
    /// Returns immediately if one is already running. Fails only when the
    /// required preferences are missing; radio, broker and wake-hold
    /// failures are logged and the session runs degraded.
    pub async fn start(&self) -> Result<(), GatewayError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            debug!("Gateway already running");
            return Ok(());
        }

        let missing = self.store.missing_keys();
        if !missing.is_empty() {
            return Err(GatewayError::NotConfigured { missing });
        }
        let settings = self.store.settings();

        self.set_state(LifecycleState::Starting);
        info!(
            "Starting gateway {} (threshold {} dBm, interval {:?})",
            settings.gateway_id, settings.rssi_threshold, settings.interval
        );

        let wake = Arc::clone(&self.wake);
        match tokio::task::spawn_blocking(move || wake.acquire()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Running without a wake hold: {}", e),
            Err(e) => error!("Wake hold task failed: {}", e),
        }

        if let Err(e) = self.broker.connect().await {
            error!(
                "Broker connection failed, reports will not be delivered this session: {}",
                e
            );
        }

        let pending = Arc::new(PendingSet::new());
        let listener = DiscoveryListener::new(Arc::clone(&self.radio), Arc::clone(&pending));
        if let Err(e) = listener.start().await {
            error!("Scanning disabled for this session: {}", e);
        }

        let publisher = Arc::new(Publisher::new(
            Arc::clone(&self.broker),
            self.config.delivery.retry_config(),
            self.config.delivery.buffer_capacity,
        ));
        let aggregator = Arc::new(Aggregator::new(
            pending,
            Arc::clone(&publisher),
            Arc::clone(&self.store),
            &settings,
        ));
        let cancel = CancellationToken::new();
        let cycle = Arc::clone(&aggregator).spawn(cancel.clone());

        if let Err(e) = self.store.set_running(true) {
            warn!("Failed to persist running flag: {}", e);
        }

        *session = Some(Session {
            listener,
            publisher,
            aggregator,
            cancel,
            cycle,
        });
        self.set_state(LifecycleState::Running);
        info!("Gateway running");
        Ok(())
    }

    /// Stop the session.
    ///
    /// Waits for an in-flight tick (including its publish) to finish, then
    /// disconnects the broker, stops scanning and releases the wake hold.
    /// Does nothing if not running.
    pub async fn stop(&self) {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.take() else {
            debug!("Gateway not running");
            return;
        };

        self.set_state(LifecycleState::Stopping);
        info!("Stopping gateway");

        session.cancel.cancel();
        if let Err(e) = session.cycle.await {
            error!("Aggregation task ended abnormally: {}", e);
        }

        self.broker.disconnect().await;
        session.listener.stop().await;

        let wake = Arc::clone(&self.wake);
        match tokio::task::spawn_blocking(move || wake.release()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to release wake hold: {}", e),
            Err(e) => error!("Wake hold task failed: {}", e),
        }
        if let Err(e) = self.store.set_running(false) {
            warn!("Failed to persist running flag: {}", e);
        }

        self.set_state(LifecycleState::Stopped);
        info!("Gateway stopped");
    }

    /// Start, wait for `shutdown`, then stop.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await;
        Ok(())
    }

    /// Snapshot of the gateway's state.
    pub async fn status(&self) -> GatewayStatus {
        let session = self.session.lock().await;
        let (scanning, pending, ticks, delivery) = match session.as_ref() {
            Some(s) => (
                s.listener.state() == ListenerState::Scanning,
                s.listener.pending().len(),
                s.aggregator.ticks(),
                s.publisher.stats().await,
            ),
            None => (false, 0, 0, DeliveryStats::default()),
        };

        GatewayStatus {
            state: self.state(),
            scanning,
            broker_connected: self.broker.is_connected(),
            wake_held: self.wake.is_held(),
            pending,
            ticks,
            delivery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerError;
    use crate::store::Preferences;
    use async_trait::async_trait;
    use beacon_core::{MockRadio, NoopWakeHold, WakeHold};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Default)]
    struct StubBroker {
        connected: AtomicBool,
    }

    #[async_trait]
    impl Broker for StubBroker {
        async fn connect(&self) -> Result<(), BrokerError> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    /// Acquire blocks until the test opens the gate.
    struct GatedWake {
        gate: std::sync::Mutex<mpsc::Receiver<()>>,
    }

    impl WakeHold for GatedWake {
        fn acquire(&self, _reason: &str) -> beacon_core::Result<()> {
            self.gate
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .map_err(|_| beacon_core::Error::WakeHold("gate never opened".into()))
        }

        fn release(&self) -> beacon_core::Result<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "gated"
        }
    }

    fn gateway_with_wake(prefs: Preferences, wake: WakeLock) -> (Gateway, Arc<MockRadio>) {
        let radio = Arc::new(MockRadio::new());
        let gateway = Gateway::new(
            Config::default(),
            Arc::new(ConfigStore::in_memory(prefs)),
            radio.clone(),
            Arc::new(StubBroker::default()),
            wake,
        );
        (gateway, radio)
    }

    fn gateway(prefs: Preferences) -> (Gateway, Arc<MockRadio>) {
        gateway_with_wake(prefs, WakeLock::new(Box::new(NoopWakeHold), "test"))
    }

    fn configured() -> Preferences {
        Preferences {
            rssi_threshold: Some("-100".into()),
            interval_secs: Some("10".into()),
            gateway_id: Some("gw-01".into()),
            service_running: false,
        }
    }

    #[tokio::test]
    async fn test_refuses_to_start_unconfigured() {
        let (gateway, radio) = gateway(Preferences {
            gateway_id: None,
            ..configured()
        });

        let err = gateway.start().await.unwrap_err();
        assert!(matches!(
            &err,
            GatewayError::NotConfigured { missing } if missing == &vec![PrefKey::GatewayId]
        ));
        assert!(err.to_string().contains("gateway_id"));
        assert_eq!(gateway.state(), LifecycleState::Stopped);
        assert_eq!(radio.subscribe_count(), 0);
    }

    #[tokio::test]
    async fn test_start_stop_transitions() {
        let (gateway, radio) = gateway(configured());

        gateway.start().await.unwrap();
        assert_eq!(gateway.state(), LifecycleState::Running);
        assert!(gateway.store().is_running());

        let status = gateway.status().await;
        assert!(status.scanning);
        assert!(status.broker_connected);
        assert!(status.wake_held);

        gateway.stop().await;
        assert_eq!(gateway.state(), LifecycleState::Stopped);
        assert!(!gateway.store().is_running());
        assert!(!radio.is_subscribed());

        let status = gateway.status().await;
        assert!(!status.broker_connected);
        assert!(!status.wake_held);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let (gateway, radio) = gateway(configured());

        gateway.stop().await;
        gateway.start().await.unwrap();
        gateway.start().await.unwrap();
        assert_eq!(radio.subscribe_count(), 1);

        gateway.stop().await;
        gateway.stop().await;
        assert_eq!(radio.unsubscribe_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_radio_still_runs() {
        let (gateway, radio) = gateway(configured());
        radio.set_available(false);

        gateway.start().await.unwrap();
        assert_eq!(gateway.state(), LifecycleState::Running);
        assert!(!gateway.status().await.scanning);
        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let (gateway, _) = gateway(configured());
        gateway.run_until(async {}).await.unwrap();
        assert_eq!(gateway.state(), LifecycleState::Stopped);
    }

    // Single-threaded runtime: the opener can only run if acquire is off it.
    #[tokio::test]
    async fn test_wake_acquire_does_not_block_runtime() {
        let (open, gate) = mpsc::channel();
        let (gateway, _) = gateway_with_wake(
            configured(),
            WakeLock::new(
                Box::new(GatedWake {
                    gate: std::sync::Mutex::new(gate),
                }),
                "test",
            ),
        );

        let opener = tokio::spawn(async move {
            tokio::task::yield_now().await;
            open.send(()).unwrap();
        });

        gateway.start().await.unwrap();
        opener.await.unwrap();
        assert!(gateway.status().await.wake_held);

        gateway.stop().await;
        assert!(!gateway.status().await.wake_held);
    }
}
