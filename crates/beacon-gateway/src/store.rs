//! Persisted key-value preferences.
//!
//! This is the interface an operator uses to configure the gateway between
//! sessions: signal threshold, flush interval, gateway identifier and the
//! running flag the lifecycle controller maintains. Numeric values are kept
//! as strings on disk and parsed on read; anything missing or unparsable
//! falls back to its default.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ConfigError, ValidationError, config_dir, write_file};

/// Default RSSI threshold in dBm.
pub const DEFAULT_RSSI_THRESHOLD: i32 = -100;
/// Default flush interval in seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 10;

/// A preference key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefKey {
    RssiThreshold,
    IntervalSecs,
    GatewayId,
    ServiceRunning,
}

impl PrefKey {
    /// Every key, in display order.
    pub const ALL: [PrefKey; 4] = [
        PrefKey::RssiThreshold,
        PrefKey::IntervalSecs,
        PrefKey::GatewayId,
        PrefKey::ServiceRunning,
    ];

    /// Keys that must be set before the gateway will start.
    pub const REQUIRED: [PrefKey; 3] = [
        PrefKey::RssiThreshold,
        PrefKey::IntervalSecs,
        PrefKey::GatewayId,
    ];

    /// Name used on disk and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrefKey::RssiThreshold => "rssi_threshold",
            PrefKey::IntervalSecs => "interval_secs",
            PrefKey::GatewayId => "gateway_id",
            PrefKey::ServiceRunning => "service_running",
        }
    }
}

impl fmt::Display for PrefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrefKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrefKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<_> = PrefKey::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown key '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}

/// On-disk form of the preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi_threshold: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_id: Option<String>,
    pub service_running: bool,
}

/// Typed view of the preferences a session runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Minimum RSSI (inclusive) for a record to be reported.
    pub rssi_threshold: i32,
    /// Time between aggregation ticks.
    pub interval: Duration,
    /// Identifier used in the topic and report header.
    pub gateway_id: String,
}

impl Preferences {
    fn settings(&self) -> GatewaySettings {
        let rssi_threshold = self
            .rssi_threshold
            .as_deref()
            .and_then(|v| v.trim().parse::<i32>().ok())
            .unwrap_or(DEFAULT_RSSI_THRESHOLD);

        let interval_secs = self
            .interval_secs
            .as_deref()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|secs| secs.max(1) as u64)
            .unwrap_or(DEFAULT_INTERVAL_SECS);

        GatewaySettings {
            rssi_threshold,
            interval: Duration::from_secs(interval_secs),
            gateway_id: self.gateway_id.clone().unwrap_or_default(),
        }
    }

    fn slot(&mut self, key: PrefKey) -> Option<&mut Option<String>> {
        match key {
            PrefKey::RssiThreshold => Some(&mut self.rssi_threshold),
            PrefKey::IntervalSecs => Some(&mut self.interval_secs),
            PrefKey::GatewayId => Some(&mut self.gateway_id),
            PrefKey::ServiceRunning => None,
        }
    }
}

/// File-backed preference store.
///
/// Writes go straight to disk. A store created with
/// [`ConfigStore::in_memory`] never touches the filesystem.
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    prefs: Mutex<Preferences>,
}

impl ConfigStore {
    /// Open the store at `path`. A missing file yields empty preferences.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let prefs = if path.exists() {
            read_preferences(&path)?
        } else {
            Preferences::default()
        };
        Ok(Self {
            path: Some(path),
            prefs: Mutex::new(prefs),
        })
    }

    /// Open the store at the default location.
    pub fn open_default() -> Result<Self, ConfigError> {
        Self::open(default_preferences_path())
    }

    /// A store that lives only in memory.
    pub fn in_memory(prefs: Preferences) -> Self {
        Self {
            path: None,
            prefs: Mutex::new(prefs),
        }
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Preferences> {
        self.prefs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current value of `key` as text.
    pub fn get(&self, key: PrefKey) -> Option<String> {
        let prefs = self.lock();
        match key {
            PrefKey::RssiThreshold => prefs.rssi_threshold.clone(),
            PrefKey::IntervalSecs => prefs.interval_secs.clone(),
            PrefKey::GatewayId => prefs.gateway_id.clone(),
            PrefKey::ServiceRunning => Some(prefs.service_running.to_string()),
        }
    }

    /// Set `key` to `value` and persist.
    ///
    /// Numeric keys must parse as integers and the running flag as a bool.
    pub fn set(&self, key: PrefKey, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        validate_value(key, value)?;

        let mut prefs = self.lock();
        if key == PrefKey::ServiceRunning {
            prefs.service_running = value == "true";
        } else if let Some(slot) = prefs.slot(key) {
            *slot = Some(value.to_string());
        }
        self.persist(&prefs)
    }

    /// Remove `key` and persist. The running flag is reset to `false`.
    pub fn unset(&self, key: PrefKey) -> Result<(), ConfigError> {
        let mut prefs = self.lock();
        if key == PrefKey::ServiceRunning {
            prefs.service_running = false;
        } else if let Some(slot) = prefs.slot(key) {
            *slot = None;
        }
        self.persist(&prefs)
    }

    /// Keys that are required but missing or empty.
    pub fn missing_keys(&self) -> Vec<PrefKey> {
        PrefKey::REQUIRED
            .into_iter()
            .filter(|k| self.get(*k).is_none_or(|v| v.trim().is_empty()))
            .collect()
    }

    /// Whether every required key has a non-empty value.
    pub fn is_configured(&self) -> bool {
        self.missing_keys().is_empty()
    }

    /// Typed settings from the cached preferences.
    pub fn settings(&self) -> GatewaySettings {
        self.lock().settings()
    }

    /// Re-read the backing file and return fresh settings.
    ///
    /// An in-memory store, or a file that has disappeared, returns the
    /// cached settings.
    pub fn reload_settings(&self) -> Result<GatewaySettings, ConfigError> {
        if let Some(path) = &self.path
            && path.exists()
        {
            let fresh = read_preferences(path)?;
            let mut prefs = self.lock();
            *prefs = fresh;
            return Ok(prefs.settings());
        }
        Ok(self.settings())
    }

    /// Persisted running flag.
    pub fn is_running(&self) -> bool {
        self.lock().service_running
    }

    /// Update and persist the running flag.
    pub fn set_running(&self, running: bool) -> Result<(), ConfigError> {
        let mut prefs = self.lock();
        prefs.service_running = running;
        self.persist(&prefs)
    }

    /// Snapshot of the raw preferences.
    pub fn snapshot(&self) -> Preferences {
        self.lock().clone()
    }

    fn persist(&self, prefs: &Preferences) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = toml::to_string_pretty(prefs).map_err(ConfigError::Serialize)?;
        write_file(path, &content)?;
        debug!("Preferences written to {}", path.display());
        Ok(())
    }
}

fn read_preferences(path: &Path) -> Result<Preferences, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn validate_value(key: PrefKey, value: &str) -> Result<(), ConfigError> {
    let message = match key {
        PrefKey::RssiThreshold => value
            .parse::<i32>()
            .err()
            .map(|_| format!("'{}' is not a whole number of dBm", value)),
        PrefKey::IntervalSecs => match value.parse::<i64>() {
            Ok(secs) if secs >= 1 => None,
            Ok(secs) => Some(format!("interval {} must be at least 1 second", secs)),
            Err(_) => Some(format!("'{}' is not a whole number of seconds", value)),
        },
        PrefKey::GatewayId => value
            .is_empty()
            .then(|| "gateway id cannot be empty".to_string()),
        PrefKey::ServiceRunning => value
            .parse::<bool>()
            .err()
            .map(|_| format!("'{}' is not true or false", value)),
    };

    match message {
        Some(message) => Err(ConfigError::Validation(vec![ValidationError {
            field: key.to_string(),
            message,
        }])),
        None => Ok(()),
    }
}

/// Default preferences file path.
pub fn default_preferences_path() -> PathBuf {
    config_dir().join("preferences.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Preferences {
        Preferences {
            rssi_threshold: Some("-80".into()),
            interval_secs: Some("5".into()),
            gateway_id: Some("gw-01".into()),
            service_running: false,
        }
    }

    #[test]
    fn test_defaults_when_empty() {
        let store = ConfigStore::in_memory(Preferences::default());
        let settings = store.settings();
        assert_eq!(settings.rssi_threshold, -100);
        assert_eq!(settings.interval, Duration::from_secs(10));
        assert_eq!(settings.gateway_id, "");
        assert!(!store.is_configured());
        assert_eq!(store.missing_keys(), PrefKey::REQUIRED.to_vec());
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let store = ConfigStore::in_memory(Preferences {
            rssi_threshold: Some("loud".into()),
            interval_secs: Some("soon".into()),
            ..Default::default()
        });
        let settings = store.settings();
        assert_eq!(settings.rssi_threshold, DEFAULT_RSSI_THRESHOLD);
        assert_eq!(settings.interval, Duration::from_secs(DEFAULT_INTERVAL_SECS));
    }

    #[test]
    fn test_interval_clamped_to_one_second() {
        let store = ConfigStore::in_memory(Preferences {
            interval_secs: Some("0".into()),
            ..Default::default()
        });
        assert_eq!(store.settings().interval, Duration::from_secs(1));
    }

    #[test]
    fn test_is_configured_requires_non_empty() {
        let store = ConfigStore::in_memory(configured());
        assert!(store.is_configured());

        let store = ConfigStore::in_memory(Preferences {
            gateway_id: Some("  ".into()),
            ..configured()
        });
        assert_eq!(store.missing_keys(), vec![PrefKey::GatewayId]);
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let store = ConfigStore::in_memory(Preferences::default());
        assert!(matches!(
            store.set(PrefKey::RssiThreshold, "-80dBm"),
            Err(ConfigError::Validation(_))
        ));
        assert!(store.set(PrefKey::IntervalSecs, "0").is_err());
        assert!(store.set(PrefKey::GatewayId, "").is_err());
        assert!(store.set(PrefKey::ServiceRunning, "yes").is_err());
        assert_eq!(store.snapshot(), Preferences::default());
    }

    #[test]
    fn test_set_get_unset() {
        let store = ConfigStore::in_memory(Preferences::default());
        store.set(PrefKey::RssiThreshold, " -75 ").unwrap();
        assert_eq!(store.get(PrefKey::RssiThreshold).as_deref(), Some("-75"));

        store.set(PrefKey::ServiceRunning, "true").unwrap();
        assert!(store.is_running());

        store.unset(PrefKey::RssiThreshold).unwrap();
        store.unset(PrefKey::ServiceRunning).unwrap();
        assert_eq!(store.get(PrefKey::RssiThreshold), None);
        assert_eq!(store.get(PrefKey::ServiceRunning).as_deref(), Some("false"));
    }

    #[test]
    fn test_key_round_trip_through_str() {
        for key in PrefKey::ALL {
            assert_eq!(key.as_str().parse::<PrefKey>().unwrap(), key);
        }
        let err = "volume".parse::<PrefKey>().unwrap_err();
        assert!(err.contains("rssi_threshold"));
    }

    #[test]
    fn test_persisted_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.toml");

        let store = ConfigStore::open(&path).unwrap();
        store.set(PrefKey::GatewayId, "gw-02").unwrap();
        store.set(PrefKey::IntervalSecs, "30").unwrap();
        store.set_running(true).unwrap();

        let reopened = ConfigStore::open(&path).unwrap();
        assert_eq!(reopened.get(PrefKey::GatewayId).as_deref(), Some("gw-02"));
        assert_eq!(reopened.settings().interval, Duration::from_secs(30));
        assert!(reopened.is_running());
    }

    #[test]
    fn test_reload_picks_up_external_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.toml");

        let store = ConfigStore::open(&path).unwrap();
        store.set(PrefKey::RssiThreshold, "-90").unwrap();

        std::fs::write(&path, "rssi_threshold = \"-60\"\n").unwrap();
        assert_eq!(store.settings().rssi_threshold, -90);
        assert_eq!(store.reload_settings().unwrap().rssi_threshold, -60);
        assert_eq!(store.settings().rssi_threshold, -60);
    }

    #[test]
    fn test_reload_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.toml");

        let store = ConfigStore::open(&path).unwrap();
        store.set(PrefKey::RssiThreshold, "-90").unwrap();
        std::fs::write(&path, "rssi_threshold = [").unwrap();

        assert!(matches!(
            store.reload_settings(),
            Err(ConfigError::Parse { .. })
        ));
        // Cache is untouched
        assert_eq!(store.settings().rssi_threshold, -90);
    }

    #[test]
    fn test_default_preferences_path() {
        assert!(default_preferences_path().ends_with("beacon-gateway/preferences.toml"));
    }
}
