//! Error types for beacon-core.
//!
//! # Recovery
//!
//! The gateway runs unattended, so none of these errors are fatal to the
//! process. Each one disables the affected component for the rest of the
//! session and is logged:
//!
//! | Error | Effect |
//! |-------|--------|
//! | [`Error::RadioUnavailable`] | Scanning never starts; aggregation keeps running on an empty set |
//! | [`Error::ScanFailure`] | Listener stops; recovery is a full restart |
//! | [`Error::WakeHold`] | Session continues without a sleep inhibitor |
//! | [`Error::Timeout`] | Retried where a [`crate::RetryConfig`] applies |

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur on the radio side of the gateway.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No usable radio at start time.
    #[error("Radio unavailable: {0}")]
    RadioUnavailable(RadioUnavailableReason),

    /// The radio reported an error after scanning had started.
    #[error("Scan failed with error code {code}")]
    ScanFailure {
        /// Code reported by the radio layer.
        code: i32,
    },

    /// The sleep inhibitor could not be taken or released.
    #[error("Wake hold error: {0}")]
    WakeHold(String),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why the radio could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RadioUnavailableReason {
    /// No Bluetooth adapter present.
    NoAdapter,
    /// The configured adapter index does not exist.
    AdapterIndex {
        /// Requested index.
        index: usize,
        /// Number of adapters present.
        available: usize,
    },
    /// The adapter refused to scan (typically powered off).
    ScanRejected(String),
}

impl std::fmt::Display for RadioUnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
            Self::AdapterIndex { index, available } => write!(
                f,
                "adapter {} requested but only {} present",
                index, available
            ),
            Self::ScanRejected(msg) => write!(f, "adapter refused to scan: {}", msg),
        }
    }
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a radio-unavailable error.
    pub fn radio_unavailable(reason: RadioUnavailableReason) -> Self {
        Self::RadioUnavailable(reason)
    }
}

/// Result type alias using beacon-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::radio_unavailable(RadioUnavailableReason::NoAdapter);
        assert!(err.to_string().contains("no Bluetooth adapter"));

        let err = Error::ScanFailure { code: 2 };
        assert_eq!(err.to_string(), "Scan failed with error code 2");

        let err = Error::timeout("connect", Duration::from_secs(10));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("10s"));
    }

    #[test]
    fn test_adapter_index_reason() {
        let reason = RadioUnavailableReason::AdapterIndex {
            index: 2,
            available: 1,
        };
        assert_eq!(reason.to_string(), "adapter 2 requested but only 1 present");
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
