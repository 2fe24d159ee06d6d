//! Discovery listener.
//!
//! Subscribes to a [`RadioSource`] and feeds every advertisement and batch
//! into a shared [`PendingSet`]. A scan failure, or the event stream ending
//! on its own, stops the listener for the rest of the session; there is no
//! automatic restart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use beacon_types::DiscoveryRecord;

use crate::error::{Error, RadioUnavailableReason, Result};
use crate::pending::PendingSet;
use crate::radio::{RadioEvent, RadioEvents, RadioSource, STREAM_CLOSED};

/// Where the listener is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Never started.
    Idle,
    /// Receiving events.
    Scanning,
    /// The radio could not be used at start.
    Unavailable,
    /// The radio reported an error; no further events are accepted.
    Failed {
        /// Code reported by the radio.
        code: i32,
    },
    /// Stopped on request.
    Stopped,
}

struct Shared {
    pending: Arc<PendingSet>,
    state: Mutex<ListenerState>,
    events_received: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: ListenerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn state(&self) -> ListenerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn accepting(&self) -> bool {
        let state = self.state();
        if state != ListenerState::Scanning {
            debug!("Ignoring discovery event while {:?}", state);
            return false;
        }
        true
    }

    fn on_advertisement(&self, record: DiscoveryRecord) {
        if !self.accepting() {
            return;
        }
        self.events_received.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Advertisement from {} ({}) rssi={}",
            record.address, record.name, record.rssi
        );
        self.pending.insert(record);
    }

    fn on_batch(&self, records: Vec<DiscoveryRecord>) {
        if !self.accepting() {
            return;
        }
        self.events_received
            .fetch_add(records.len() as u64, Ordering::Relaxed);
        let total = records.len();
        let added = self.pending.extend(records);
        debug!("Batch of {} result(s), {} new", total, added);
    }

    fn on_failure(&self, code: i32) {
        error!(
            "Scan failed with code {}; scanning stays off until the gateway is restarted",
            code
        );
        self.set_state(ListenerState::Failed { code });
    }
}

/// Consumes radio events into the pending set.
pub struct DiscoveryListener {
    source: Arc<dyn RadioSource>,
    shared: Arc<Shared>,
    task: tokio::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl DiscoveryListener {
    /// Create a listener that fills `pending` from `source`.
    pub fn new(source: Arc<dyn RadioSource>, pending: Arc<PendingSet>) -> Self {
        Self {
            source,
            shared: Arc::new(Shared {
                pending,
                state: Mutex::new(ListenerState::Idle),
                events_received: AtomicU64::new(0),
            }),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Start continuous scanning.
    ///
    /// Does nothing if already scanning. Fails with
    /// [`Error::RadioUnavailable`] if the radio cannot be used; scanning is
    /// then not attempted again for this session.
    pub async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.is_some() && self.shared.state() == ListenerState::Scanning {
            debug!("Discovery listener already scanning");
            return Ok(());
        }

        let events = match self.source.subscribe().await {
            Ok(events) => events,
            Err(e) => {
                let err = match e {
                    Error::RadioUnavailable(_) => e,
                    other => Error::radio_unavailable(RadioUnavailableReason::ScanRejected(
                        other.to_string(),
                    )),
                };
                warn!("Cannot start scanning on {}: {}", self.source.describe(), err);
                self.shared.set_state(ListenerState::Unavailable);
                return Err(err);
            }
        };

        info!("Discovery listener started on {}", self.source.describe());
        self.shared.set_state(ListenerState::Scanning);

        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let child = cancel.clone();
        let handle = tokio::spawn(async move {
            run_listener(shared, events, child).await;
        });
        *task = Some((cancel, handle));

        Ok(())
    }

    /// Stop scanning and wait for the event task to finish.
    ///
    /// Safe to call repeatedly or on a listener that never started.
    pub async fn stop(&self) {
        let taken = self.task.lock().await.take();
        let Some((cancel, handle)) = taken else {
            return;
        };

        cancel.cancel();
        if let Err(e) = handle.await {
            warn!("Discovery listener task ended abnormally: {}", e);
        }
        if let Err(e) = self.source.unsubscribe().await {
            warn!("Failed to stop scanning: {}", e);
        }

        self.shared.set_state(ListenerState::Stopped);
        info!("Discovery listener stopped");
    }

    /// Record one advertisement. Ignored unless scanning.
    pub fn on_advertisement(&self, record: DiscoveryRecord) {
        self.shared.on_advertisement(record);
    }

    /// Record a batch of results under a single lock acquisition. Ignored
    /// unless scanning.
    pub fn on_batch(&self, records: Vec<DiscoveryRecord>) {
        self.shared.on_batch(records);
    }

    /// Mark the listener failed. No retry is attempted.
    pub fn on_failure(&self, code: i32) {
        self.shared.on_failure(code);
    }

    /// Current state.
    pub fn state(&self) -> ListenerState {
        self.shared.state()
    }

    /// Whether events are being accepted.
    pub fn is_scanning(&self) -> bool {
        self.state() == ListenerState::Scanning
    }

    /// Total records received since creation (before deduplication).
    pub fn events_received(&self) -> u64 {
        self.shared.events_received.load(Ordering::Relaxed)
    }

    /// The set this listener fills.
    pub fn pending(&self) -> &Arc<PendingSet> {
        &self.shared.pending
    }
}

async fn run_listener(shared: Arc<Shared>, mut events: RadioEvents, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.next() => match event {
                Some(RadioEvent::Advertisement(record)) => shared.on_advertisement(record),
                Some(RadioEvent::Batch(records)) => shared.on_batch(records),
                Some(RadioEvent::Failure { code }) => {
                    shared.on_failure(code);
                    break;
                }
                None => {
                    shared.on_failure(STREAM_CLOSED);
                    break;
                }
            },
        }
    }
}
