//! # Configuration Management
//!
//! Settings for a fabric node, loaded from a TOML file with the `config`
//! crate:
//! - Broker connection (host/port)
//! - Replica TTL and re-announce cadence
//! - Admin HTTP surface
//!
//! ## Example Configuration File (config.toml)
//! ```toml
//! object_time_to_live = 60
//! object_publish_rate = 20
//! api_server_port = 8080
//!
//! [broker]
//! host = "localhost"
//! port = 1883
//! client_id = "node1"
//! ```

use anyhow::Result;
use config::{Config as ConfigLib, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

/// Settings for a single fabric node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Replica TTL in seconds, reset on every `publish`/re-announce
    /// received for an object.
    pub object_time_to_live: i64,

    /// How often, in seconds, the re-announcer republishes originated
    /// objects.
    pub object_publish_rate: u64,

    /// Port the admin HTTP surface listens on.
    pub api_server_port: u16,

    /// Optional static file root served alongside the admin API, matching
    /// `apiserver.py`'s bare static-file serving.
    #[serde(default)]
    pub api_server_static_root: Option<String>,

    pub broker: BrokerConfig,
}

impl Settings {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = ConfigLib::builder().add_source(File::from(path)).build()?;
        let settings: Settings = settings.try_deserialize()?;
        Ok(settings)
    }

    /// Sensible defaults for local development: connects to a broker on
    /// localhost, a one-minute replica TTL, and a twenty-second re-announce
    /// cadence (matching the original's `OBJECT_TIME_TO_LIVE` /
    /// `OBJECT_PUBLISH_RATE` defaults).
    pub fn default() -> Self {
        Self {
            object_time_to_live: 60,
            object_publish_rate: 20,
            api_server_port: 8080,
            api_server_static_root: None,
            broker: BrokerConfig {
                host: "localhost".to_string(),
                port: 1883,
                client_id: "sapphire-kv".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_settings_from_toml_file() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            temp_file.as_file_mut(),
            r#"
object_time_to_live = 90
object_publish_rate = 15
api_server_port = 9090

[broker]
host = "broker.local"
port = 1883
client_id = "node-a"
            "#
        )
        .unwrap();

        let settings = Settings::load(temp_file.path()).unwrap();
        assert_eq!(settings.object_time_to_live, 90);
        assert_eq!(settings.object_publish_rate, 15);
        assert_eq!(settings.api_server_port, 9090);
        assert_eq!(settings.broker.host, "broker.local");
        assert_eq!(settings.broker.client_id, "node-a");
    }

    #[test]
    fn defaults_are_usable_without_a_config_file() {
        let settings = Settings::default();
        assert_eq!(settings.object_time_to_live, 60);
        assert_eq!(settings.broker.port, 1883);
        assert!(settings.api_server_static_root.is_none());
    }
}
