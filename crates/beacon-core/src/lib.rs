//! Radio-side core of the beacon gateway.
//!
//! This crate owns everything between the Bluetooth adapter and the
//! aggregation tick:
//!
//! - **Radio sources**: [`BtleRadio`] scans continuously through btleplug;
//!   [`MockRadio`] scripts events for tests
//! - **Discovery listener**: [`DiscoveryListener`] feeds advertisements and
//!   batches into a shared [`PendingSet`]
//! - **Pending set**: deduplicating, insertion-ordered, drained atomically
//! - **Wake hold**: [`WakeLock`] keeps the host awake while the gateway runs
//! - **Retry**: [`with_retry`] with exponential backoff and jitter
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use beacon_core::{BtleRadio, DiscoveryListener, PendingSet};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pending = Arc::new(PendingSet::new());
//!     let listener = DiscoveryListener::new(Arc::new(BtleRadio::default()), pending.clone());
//!     listener.start().await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!     for record in pending.drain() {
//!         println!("{} {} {}", record.address, record.name, record.rssi);
//!     }
//!
//!     listener.stop().await;
//!     Ok(())
//! }
//! ```

pub mod btle;
pub mod error;
pub mod listener;
pub mod mock;
pub mod pending;
pub mod radio;
pub mod retry;
pub mod wake;

pub use beacon_types as types;

pub use btle::{BtleRadio, get_adapter};
pub use error::{Error, RadioUnavailableReason, Result};
pub use listener::{DiscoveryListener, ListenerState};
pub use mock::MockRadio;
pub use pending::PendingSet;
pub use radio::{RadioEvent, RadioEvents, RadioSource, STREAM_CLOSED};
pub use retry::{RetryConfig, Retryable, with_retry};
#[cfg(target_os = "linux")]
pub use wake::LogindInhibitor;
pub use wake::{NoopWakeHold, WakeHold, WakeLock, platform_wake_hold};
