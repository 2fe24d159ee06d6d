//! Push-based radio abstraction.
//!
//! A [`RadioSource`] turns on continuous scanning when subscribed and
//! yields [`RadioEvent`]s until it is unsubscribed. The real implementation
//! is [`crate::BtleRadio`]; [`crate::MockRadio`] scripts events for tests.

use async_trait::async_trait;
use futures::stream::BoxStream;

use beacon_types::DiscoveryRecord;

use crate::error::Result;

/// Code reported when a radio's event stream ends without being asked to.
pub const STREAM_CLOSED: i32 = -1;

/// Something the radio layer observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// A single advertisement.
    Advertisement(DiscoveryRecord),
    /// Several results delivered together.
    Batch(Vec<DiscoveryRecord>),
    /// The scan stopped with an error code.
    Failure {
        /// Radio-specific error code.
        code: i32,
    },
}

/// Stream of radio events for one subscription.
pub type RadioEvents = BoxStream<'static, RadioEvent>;

/// A source of discovery events.
///
/// # Example
///
/// ```ignore
/// use beacon_core::{RadioSource, RadioEvent};
/// use futures::StreamExt;
///
/// async fn first_event<R: RadioSource>(radio: &R) -> Option<RadioEvent> {
///     let mut events = radio.subscribe().await.ok()?;
///     let event = events.next().await;
///     let _ = radio.unsubscribe().await;
///     event
/// }
/// ```
#[async_trait]
pub trait RadioSource: Send + Sync {
    /// Start active scanning and return the event stream.
    ///
    /// Fails with [`crate::Error::RadioUnavailable`] when no usable
    /// adapter is present or it is disabled.
    async fn subscribe(&self) -> Result<RadioEvents>;

    /// Stop scanning. Safe to call when not subscribed.
    async fn unsubscribe(&self) -> Result<()>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}
