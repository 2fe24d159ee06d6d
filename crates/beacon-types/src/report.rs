//! Wire format for scan reports.
//!
//! A report is a JSON array. The first element is a header identifying the
//! gateway; every following element describes one discovery record:
//!
//! ```json
//! [
//!   {"TimeStamp":"2024-05-01T12:00:00.000Z","Format":"Movil","GatewayMAC":"gw-01"},
//!   {"TimeStamp":"2024-05-01T12:00:00.000Z","Format":"RawData","BLEMAC":"AABBCCDDEEFF",
//!    "RSSI":-70,"AdvType":"Legacy-res","BLEName":"Beacon","RawData":"1816..."}
//! ]
//! ```
//!
//! Advertisement payloads are not decoded; `RawData` always carries
//! [`RAW_DATA_PLACEHOLDER`].

use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::error::{FormatError, FormatResult};
use crate::record::DiscoveryRecord;

/// `Format` value of the header entry.
pub const HEADER_FORMAT: &str = "Movil";
/// `Format` value of device entries.
pub const DEVICE_FORMAT: &str = "RawData";
/// `AdvType` value of device entries.
pub const ADV_TYPE: &str = "Legacy-res";
/// Fixed `RawData` value of device entries.
pub const RAW_DATA_PLACEHOLDER: &str = "181600EA00000010003CFFE0015C0058000BEEECE20D4A2FB8020A00";

/// Prefix of the topic reports are published under.
pub const TOPIC_PREFIX: &str = "/gw/scanpub";

/// Topic for a gateway's reports. The identifier is used verbatim.
pub fn scan_topic(gateway_id: &str) -> String {
    format!("{TOPIC_PREFIX}/{gateway_id}")
}

/// Render a timestamp as `yyyy-MM-ddTHH:mm:ss.sssZ` in UTC.
pub fn format_timestamp(at: OffsetDateTime) -> FormatResult<String> {
    let utc = at.to_offset(UtcOffset::UTC);
    Ok(utc.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    ))?)
}

/// First element of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    #[serde(rename = "TimeStamp")]
    pub timestamp: String,
    #[serde(rename = "Format")]
    pub format: String,
    #[serde(rename = "GatewayMAC")]
    pub gateway_mac: String,
}

/// One discovered device within a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    #[serde(rename = "TimeStamp")]
    pub timestamp: String,
    #[serde(rename = "Format")]
    pub format: String,
    /// MAC address without colons.
    #[serde(rename = "BLEMAC")]
    pub ble_mac: String,
    #[serde(rename = "RSSI")]
    pub rssi: i16,
    #[serde(rename = "AdvType")]
    pub adv_type: String,
    #[serde(rename = "BLEName")]
    pub ble_name: String,
    #[serde(rename = "RawData")]
    pub raw_data: String,
}

impl DeviceEntry {
    fn from_record(record: &DiscoveryRecord, timestamp: &str) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            format: DEVICE_FORMAT.to_string(),
            ble_mac: record.mac_without_colons(),
            rssi: record.rssi,
            adv_type: ADV_TYPE.to_string(),
            ble_name: record.name.clone(),
            raw_data: RAW_DATA_PLACEHOLDER.to_string(),
        }
    }
}

/// Any element of the report array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportEntry {
    Device(DeviceEntry),
    Header(HeaderEntry),
}

/// A formatted batch, ready to be serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub header: HeaderEntry,
    pub devices: Vec<DeviceEntry>,
}

impl Report {
    /// Build a report for `records`, stamping every entry with `at`.
    ///
    /// Deterministic for identical inputs.
    pub fn build(
        gateway_id: &str,
        records: &[DiscoveryRecord],
        at: OffsetDateTime,
    ) -> FormatResult<Self> {
        let timestamp = format_timestamp(at)?;
        let devices = records
            .iter()
            .map(|r| DeviceEntry::from_record(r, &timestamp))
            .collect();

        Ok(Self {
            header: HeaderEntry {
                timestamp,
                format: HEADER_FORMAT.to_string(),
                gateway_mac: gateway_id.to_string(),
            },
            devices,
        })
    }

    /// Number of array elements (header included).
    pub fn len(&self) -> usize {
        self.devices.len() + 1
    }

    /// Whether the report carries no device entries.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Serialize to the JSON array wire format.
    pub fn to_json(&self) -> FormatResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON array produced by [`Report::to_json`].
    pub fn from_json(json: &str) -> FormatResult<Self> {
        let entries: Vec<ReportEntry> = serde_json::from_str(json)?;
        let mut entries = entries.into_iter();

        let header = match entries.next() {
            Some(ReportEntry::Header(header)) => header,
            _ => return Err(FormatError::MissingHeader),
        };

        let mut devices = Vec::with_capacity(entries.len());
        for (i, entry) in entries.enumerate() {
            match entry {
                ReportEntry::Device(device) => devices.push(device),
                ReportEntry::Header(_) => return Err(FormatError::UnexpectedHeader(i + 1)),
            }
        }

        Ok(Self { header, devices })
    }
}

impl Serialize for Report {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        seq.serialize_element(&self.header)?;
        for device in &self.devices {
            seq.serialize_element(device)?;
        }
        seq.end()
    }
}

/// Format `records` straight to the JSON wire format.
pub fn format_report(
    gateway_id: &str,
    records: &[DiscoveryRecord],
    at: OffsetDateTime,
) -> FormatResult<String> {
    Report::build(gateway_id, records, at)?.to_json()
}
