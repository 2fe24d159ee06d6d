//! Mock radio implementation for testing.
//!
//! [`MockRadio`] implements [`RadioSource`] without Bluetooth hardware.
//! Tests push events into the current subscription and can make the radio
//! unavailable to exercise the start-up failure path.
//!
//! # Example
//!
//! ```
//! use beacon_core::{MockRadio, RadioSource, RadioEvent};
//! use beacon_types::DiscoveryRecord;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() {
//!     let radio = MockRadio::new();
//!     let mut events = radio.subscribe().await.unwrap();
//!
//!     radio.advertise(DiscoveryRecord::named("A", "aa:aa", -70));
//!     assert!(matches!(events.next().await, Some(RadioEvent::Advertisement(_))));
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedSender, unbounded};

use beacon_types::DiscoveryRecord;

use crate::error::{Error, RadioUnavailableReason, Result};
use crate::radio::{RadioEvent, RadioEvents, RadioSource};

/// A scripted radio for tests.
pub struct MockRadio {
    available: AtomicBool,
    sender: Mutex<Option<UnboundedSender<RadioEvent>>>,
    subscribe_count: AtomicU32,
    unsubscribe_count: AtomicU32,
}

impl std::fmt::Debug for MockRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRadio")
            .field("available", &self.available.load(Ordering::Relaxed))
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

impl MockRadio {
    /// Create an available radio with no subscription.
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            sender: Mutex::new(None),
            subscribe_count: AtomicU32::new(0),
            unsubscribe_count: AtomicU32::new(0),
        }
    }

    /// Create a radio that refuses to subscribe.
    pub fn unavailable() -> Self {
        let radio = Self::new();
        radio.set_available(false);
        radio
    }

    /// Toggle whether [`RadioSource::subscribe`] succeeds.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether a subscription is currently open.
    pub fn is_subscribed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Push an event to the current subscriber. Returns `false` if none.
    pub fn emit(&self, event: RadioEvent) -> bool {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(tx) => tx.unbounded_send(event).is_ok(),
            None => false,
        }
    }

    /// Push a single advertisement.
    pub fn advertise(&self, record: DiscoveryRecord) -> bool {
        self.emit(RadioEvent::Advertisement(record))
    }

    /// Push a batch of results.
    pub fn batch(&self, records: Vec<DiscoveryRecord>) -> bool {
        self.emit(RadioEvent::Batch(records))
    }

    /// Report a scan failure.
    pub fn fail(&self, code: i32) -> bool {
        self.emit(RadioEvent::Failure { code })
    }

    /// End the current event stream without a failure event.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Number of successful subscriptions.
    pub fn subscribe_count(&self) -> u32 {
        self.subscribe_count.load(Ordering::SeqCst)
    }

    /// Number of unsubscribe calls.
    pub fn unsubscribe_count(&self) -> u32 {
        self.unsubscribe_count.load(Ordering::SeqCst)
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RadioSource for MockRadio {
    async fn subscribe(&self) -> Result<RadioEvents> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::radio_unavailable(RadioUnavailableReason::ScanRejected(
                "mock radio disabled".to_string(),
            )));
        }

        let (tx, rx) = unbounded();
        *self.sender.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        Ok(rx.boxed())
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.close();
        self.unsubscribe_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "mock radio".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_subscriber() {
        let radio = MockRadio::new();
        let mut events = radio.subscribe().await.unwrap();

        assert!(radio.batch(vec![DiscoveryRecord::named("A", "aa:aa", -70)]));
        assert!(radio.fail(3));

        assert!(matches!(events.next().await, Some(RadioEvent::Batch(b)) if b.len() == 1));
        assert_eq!(events.next().await, Some(RadioEvent::Failure { code: 3 }));
    }

    #[tokio::test]
    async fn test_emit_without_subscriber() {
        let radio = MockRadio::new();
        assert!(!radio.advertise(DiscoveryRecord::named("A", "aa:aa", -70)));
    }

    #[tokio::test]
    async fn test_unavailable_refuses_subscribe() {
        let radio = MockRadio::unavailable();
        let err = radio.subscribe().await.err().unwrap();
        assert!(matches!(err, Error::RadioUnavailable(_)));
        assert_eq!(radio.subscribe_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_ends_stream() {
        let radio = MockRadio::new();
        let mut events = radio.subscribe().await.unwrap();
        assert!(radio.is_subscribed());

        radio.unsubscribe().await.unwrap();
        assert!(events.next().await.is_none());
        assert!(!radio.is_subscribed());
        assert_eq!(radio.unsubscribe_count(), 1);
    }
}
