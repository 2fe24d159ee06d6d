//! Report delivery on top of a [`Broker`].
//!
//! Each report is attempted with the configured [`RetryConfig`]. A report
//! that still fails is either dropped or, when a buffer capacity is set,
//! kept in a ring buffer and sent ahead of the next report. With the
//! default configuration (no retries, no buffer) this is plain
//! fire-and-forget.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use beacon_core::{RetryConfig, with_retry};

use crate::broker::{Broker, BrokerError};

/// What happened to a report handed to [`Publisher::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The broker accepted it.
    Delivered,
    /// Not delivered yet; `pending` reports are waiting in the buffer.
    Buffered { pending: usize },
    /// Not delivered and discarded.
    Dropped,
}

/// Running delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub buffered: u64,
    pub dropped: u64,
    pub pending: usize,
}

#[derive(Debug)]
struct Outgoing {
    topic: String,
    payload: Vec<u8>,
}

/// Publishes reports with the configured retry and buffering policy.
pub struct Publisher {
    broker: Arc<dyn Broker>,
    retry: RetryConfig,
    capacity: usize,
    backlog: Mutex<VecDeque<Outgoing>>,
    delivered: AtomicU64,
    buffered: AtomicU64,
    dropped: AtomicU64,
}

impl Publisher {
    /// Create a publisher that keeps at most `capacity` undelivered reports.
    pub fn new(broker: Arc<dyn Broker>, retry: RetryConfig, capacity: usize) -> Self {
        Self {
            broker,
            retry,
            capacity,
            backlog: Mutex::new(VecDeque::with_capacity(capacity)),
            delivered: AtomicU64::new(0),
            buffered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// One attempt per report, nothing buffered.
    pub fn fire_and_forget(broker: Arc<dyn Broker>) -> Self {
        Self::new(broker, RetryConfig::none(), 0)
    }

    /// Deliver `payload` to `topic`.
    ///
    /// Buffered reports go first, oldest first. If any of them still fails
    /// the new report is queued behind it without being attempted.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> DeliveryStatus {
        let mut backlog = self.backlog.lock().await;

        while let Some(front) = backlog.front() {
            match self.send(&front.topic, &front.payload).await {
                Ok(()) => {
                    backlog.pop_front();
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!("Delivered buffered report ({} left)", backlog.len());
                }
                Err(e) => {
                    debug!("Buffered report still undeliverable: {}", e);
                    return self.enqueue(&mut backlog, topic, payload);
                }
            }
        }

        match self.send(topic, payload).await {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                DeliveryStatus::Delivered
            }
            Err(e @ BrokerError::PayloadTooLarge { .. }) => {
                // Would never fit, so buffering it would stall the backlog.
                warn!("Dropping report for {}: {}", topic, e);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                DeliveryStatus::Dropped
            }
            Err(e) => {
                warn!("Failed to publish report to {}: {}", topic, e);
                self.enqueue(&mut backlog, topic, payload)
            }
        }
    }

    async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        with_retry(&self.retry, "publish", || self.broker.publish(topic, payload)).await
    }

    fn enqueue(
        &self,
        backlog: &mut VecDeque<Outgoing>,
        topic: &str,
        payload: &[u8],
    ) -> DeliveryStatus {
        if self.capacity == 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return DeliveryStatus::Dropped;
        }

        if backlog.len() >= self.capacity {
            backlog.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Delivery buffer full, discarded oldest report");
        }
        backlog.push_back(Outgoing {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        self.buffered.fetch_add(1, Ordering::Relaxed);

        DeliveryStatus::Buffered {
            pending: backlog.len(),
        }
    }

    /// Reports waiting in the buffer.
    pub async fn pending(&self) -> usize {
        self.backlog.lock().await.len()
    }

    /// Snapshot of the delivery counters.
    pub async fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            buffered: self.buffered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            pending: self.pending().await,
        }
    }
}
