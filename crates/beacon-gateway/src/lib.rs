//! BLE beacon to MQTT gateway.
//!
//! This crate runs the broker side of the pipeline and the lifecycle around
//! it:
//! - Drains the pending set on a fixed interval and filters by RSSI
//! - Formats each batch as a JSON report and publishes it to
//!   `/gw/scanpub/{gateway_id}` with QoS 0
//! - Holds a wake lock and a single broker session for the whole run
//! - Persists the operator's preferences and the running flag
//!
//! # Configuration
//!
//! Static settings live in `~/.config/beacon-gateway/gateway.toml`:
//!
//! ```toml
//! [broker]
//! url = "mqtt://broker.local:1883"
//! username = "gateway"
//! password = "secret"
//! keep_alive_secs = 30
//! connect_timeout_secs = 10
//! max_packet_kib = 256
//!
//! [scan]
//! adapter_index = 0
//!
//! [delivery]
//! max_retries = 0
//! buffer_capacity = 0
//! ```
//!
//! Per-install preferences live next to it in `preferences.toml` and are
//! edited with `beacon-gateway config set <key> <value>`:
//!
//! ```toml
//! rssi_threshold = "-80"
//! interval_secs = "10"
//! gateway_id = "gw-01"
//! service_running = false
//! ```

pub mod aggregator;
pub mod broker;
pub mod config;
pub mod gateway;
pub mod publisher;
pub mod store;

pub use aggregator::{Aggregator, TickOutcome};
pub use broker::{Broker, BrokerError, MqttBroker, parse_broker_url};
pub use config::{
    BrokerConfig, Config, ConfigError, DeliveryConfig, ScanConfig, ValidationError,
    default_config_path,
};
pub use gateway::{Gateway, GatewayError, GatewayStatus, LifecycleState};
pub use publisher::{DeliveryStats, DeliveryStatus, Publisher};
pub use store::{ConfigStore, GatewaySettings, PrefKey, Preferences, default_preferences_path};
