//! Discovery records produced by the radio layer.

use serde::{Deserialize, Serialize};

/// Name reported for devices that do not advertise one.
pub const UNKNOWN_NAME: &str = "Unknown";

/// A single observation of an advertising device.
///
/// Equality and hashing cover all three fields, so two sightings of the
/// same device with different signal strength are distinct records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    /// Advertised local name, or [`UNKNOWN_NAME`].
    pub name: String,
    /// Colon-separated hex MAC address (e.g. `AA:BB:CC:DD:EE:FF`).
    pub address: String,
    /// Received signal strength in dBm.
    pub rssi: i16,
}

impl DiscoveryRecord {
    /// Create a record, substituting [`UNKNOWN_NAME`] for a missing name.
    pub fn new(name: Option<String>, address: impl Into<String>, rssi: i16) -> Self {
        Self {
            name: name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            address: address.into(),
            rssi,
        }
    }

    /// Create a record with a known name.
    pub fn named(name: impl Into<String>, address: impl Into<String>, rssi: i16) -> Self {
        Self::new(Some(name.into()), address, rssi)
    }

    /// The address with all colon separators removed.
    pub fn mac_without_colons(&self) -> String {
        self.address.replace(':', "")
    }

    /// Whether this record is at or above the given RSSI threshold.
    #[inline]
    pub fn meets_threshold(&self, threshold: i32) -> bool {
        i32::from(self.rssi) >= threshold
    }
}

/// Keep only the records whose RSSI is at or above `threshold`.
///
/// Input order is preserved.
pub fn filter_by_rssi<I>(records: I, threshold: i32) -> Vec<DiscoveryRecord>
where
    I: IntoIterator<Item = DiscoveryRecord>,
{
    records
        .into_iter()
        .filter(|r| r.meets_threshold(threshold))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_name_becomes_unknown() {
        let record = DiscoveryRecord::new(None, "AA:BB:CC:DD:EE:FF", -60);
        assert_eq!(record.name, "Unknown");
    }

    #[test]
    fn test_empty_name_is_kept() {
        let record = DiscoveryRecord::new(Some(String::new()), "AA:BB:CC:DD:EE:FF", -60);
        assert_eq!(record.name, "");
    }

    #[test]
    fn test_mac_without_colons() {
        let record = DiscoveryRecord::named("Beacon", "aa:bb:cc:dd:ee:ff", -40);
        assert_eq!(record.mac_without_colons(), "aabbccddeeff");
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let record = DiscoveryRecord::named("Beacon", "aa:bb", -80);
        assert!(record.meets_threshold(-80));
        assert!(record.meets_threshold(-100));
        assert!(!record.meets_threshold(-79));
    }

    #[test]
    fn test_threshold_outside_i16_range() {
        let record = DiscoveryRecord::named("Beacon", "aa:bb", i16::MIN);
        assert!(record.meets_threshold(-100_000));
        assert!(!DiscoveryRecord::named("Beacon", "aa:bb", i16::MAX).meets_threshold(100_000));
    }

    #[test]
    fn test_filter_by_rssi_scenario() {
        let records = vec![
            DiscoveryRecord::named("A", "aa:aa", -70),
            DiscoveryRecord::named("B", "bb:bb", -90),
        ];
        let kept = filter_by_rssi(records, -80);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "A");
    }

    #[test]
    fn test_same_device_different_rssi_not_equal() {
        let a = DiscoveryRecord::named("A", "aa:aa", -70);
        let b = DiscoveryRecord::named("A", "aa:aa", -71);
        assert_ne!(a, b);
    }
}
