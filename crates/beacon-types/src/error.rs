//! Error types for report formatting in beacon-types.

use thiserror::Error;

/// Errors that can occur while formatting or parsing a report.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FormatError {
    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The timestamp could not be rendered.
    #[error("Timestamp formatting failed: {0}")]
    Timestamp(#[from] time::error::Format),

    /// A report array did not start with a header entry.
    #[error("Report is missing its header entry")]
    MissingHeader,

    /// A header entry appeared after the first position.
    #[error("Unexpected header entry at index {0}")]
    UnexpectedHeader(usize),
}

/// Result type alias using beacon-types' FormatError type.
pub type FormatResult<T> = std::result::Result<T, FormatError>;
