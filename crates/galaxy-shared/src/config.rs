//! Configuration surface (§6.3).
//!
//! These structs are plain, `serde`-deserializable data with `Default` impls
//! matching the documented defaults. Reading them from a YAML/JSON file or
//! environment variables is the external CLI's job — this crate only
//! defines the shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::DeviceId;

/// Runtime-wide tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalaxyConfig {
    /// Interval between heartbeat pings to a connected device, in seconds.
    pub heartbeat_interval_s: f64,
    /// Fixed delay between reconnect attempts, in seconds.
    pub reconnect_delay_s: f64,
    /// Maximum number of tasks a single device may execute concurrently.
    pub max_concurrent_tasks_per_device: u32,
    /// Reconnect attempt ceiling before a device is marked FAILED.
    pub device_max_retries: u32,
    /// Safety timeout for the modification synchronizer's barrier wait, in
    /// seconds.
    pub modification_timeout_s: f64,
}

impl Default for GalaxyConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_s: 30.0,
            reconnect_delay_s: 5.0,
            max_concurrent_tasks_per_device: 1,
            device_max_retries: 5,
            modification_timeout_s: 600.0,
        }
    }
}

/// Per-device configuration, typically supplied by a fleet manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: DeviceId,
    pub server_url: String,
    pub os: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default = "default_auto_connect")]
    pub auto_connect: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_auto_connect() -> bool {
    true
}

fn default_max_retries() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GalaxyConfig::default();
        assert_eq!(config.heartbeat_interval_s, 30.0);
        assert_eq!(config.reconnect_delay_s, 5.0);
        assert_eq!(config.max_concurrent_tasks_per_device, 1);
        assert_eq!(config.device_max_retries, 5);
        assert_eq!(config.modification_timeout_s, 600.0);
    }

    #[test]
    fn device_config_round_trips_through_json() {
        let config = DeviceConfig {
            device_id: DeviceId::new("d1"),
            server_url: "ws://localhost:9000".to_string(),
            os: "linux".to_string(),
            capabilities: vec!["browser".to_string()],
            metadata: HashMap::new(),
            auto_connect: true,
            max_retries: 5,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: DeviceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn device_config_deserializes_missing_optionals() {
        let json = r#"{"device_id":"d1","server_url":"ws://x","os":"linux"}"#;
        let config: DeviceConfig = serde_json::from_str(json).unwrap();
        assert!(config.auto_connect);
        assert_eq!(config.max_retries, 5);
        assert!(config.capabilities.is_empty());
    }
}
