//! Platform-agnostic types for the beacon gateway.
//!
//! This crate holds the data that flows between the radio layer
//! (beacon-core) and the broker side (beacon-gateway):
//!
//! - [`DiscoveryRecord`] observations and the RSSI filter
//! - The JSON [`Report`] wire format and its formatter
//! - The scan topic builder
//!
//! # Example
//!
//! ```
//! use beacon_types::{DiscoveryRecord, Report, filter_by_rssi, scan_topic};
//! use time::OffsetDateTime;
//!
//! let records = vec![
//!     DiscoveryRecord::named("A", "aa:aa", -70),
//!     DiscoveryRecord::named("B", "bb:bb", -90),
//! ];
//! let batch = filter_by_rssi(records, -80);
//! let report = Report::build("gw-01", &batch, OffsetDateTime::now_utc()).unwrap();
//! assert_eq!(report.len(), 2);
//! assert_eq!(scan_topic("gw-01"), "/gw/scanpub/gw-01");
//! ```

pub mod error;
pub mod record;
pub mod report;

pub use error::{FormatError, FormatResult};
pub use record::{DiscoveryRecord, UNKNOWN_NAME, filter_by_rssi};
pub use report::{
    ADV_TYPE, DEVICE_FORMAT, DeviceEntry, HEADER_FORMAT, HeaderEntry, RAW_DATA_PLACEHOLDER,
    Report, ReportEntry, TOPIC_PREFIX, format_report, format_timestamp, scan_topic,
};
