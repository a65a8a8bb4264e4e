//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `relay.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ServerConfig: where the websocket/http listener binds.
//!     - PollingConfig: How often the broadcaster polls the store.
//!     - ConnectionConfig: per-client buffering and subscribe behaviour.
//!     - StoreConfig: which reading store to use (http or in-memory).
//!     - LoggingConfig: log level and whether readings are echoed.
//!
//! every section is optional; missing keys take the defaults below.
//!
//! ==============================================================================

use crate::broadcaster::BroadcasterSettings;
use crate::domain::{Reading, SensorId};
use crate::gateway::GatewaySettings;
use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub polling: PollingConfig,
    pub connection: ConnectionConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub max_concurrent_lookups: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    pub channel_capacity: usize,
    pub eager_lookup: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// base url of the reading service; None = in-memory store
    pub url: Option<String>,
    pub timeout_ms: u64,
    /// initial readings for the in-memory store
    pub seed: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3000,
            max_concurrent_lookups: 16,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            eager_lookup: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 2000,
            seed: BTreeMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_sensor_data: false,
        }
    }
}

impl RelayConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: RelayConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback.
    ///
    /// `explicit` (first cli argument) wins; otherwise the usual locations
    /// are tried in order.
    pub fn load_or_default(explicit: Option<PathBuf>) -> Self {
        let paths = match explicit {
            Some(path) => vec![path],
            None => vec![
                PathBuf::from("config").join("relay.toml"),
                PathBuf::from("..").join("config").join("relay.toml"),
            ],
        };

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        info!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("[CONFIG] Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        warn!("[CONFIG] No usable config file found - using defaults");
        Self::default()
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.polling.interval_ms > 0, "polling.interval_ms must be positive");
        anyhow::ensure!(
            self.connection.channel_capacity > 0,
            "connection.channel_capacity must be positive"
        );
        anyhow::ensure!(
            self.polling.max_concurrent_lookups > 0,
            "polling.max_concurrent_lookups must be positive"
        );
        if let Some(sensor) = self.store.seed.keys().find(|k| SensorId::parse(k).is_none()) {
            anyhow::bail!("store.seed contains an empty sensor id {:?}", sensor);
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.bind, self.server.port)
    }

    pub fn broadcaster_settings(&self) -> BroadcasterSettings {
        BroadcasterSettings {
            interval: Duration::from_millis(self.polling.interval_ms),
            max_concurrent_lookups: self.polling.max_concurrent_lookups,
            show_sensor_data: self.logging.show_sensor_data,
        }
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            channel_capacity: self.connection.channel_capacity,
            eager_lookup: self.connection.eager_lookup,
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.timeout_ms)
    }

    /// seed entries as typed readings
    pub fn seed_readings(&self) -> Vec<(SensorId, Reading)> {
        self.store
            .seed
            .iter()
            .filter_map(|(sensor, value)| SensorId::parse(sensor).map(|id| (id, Reading::new(*value))))
            .collect()
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        info!("┌─────────────────────────────────────────┐");
        info!("│          RELAY CONFIGURATION            │");
        info!("├─────────────────────────────────────────┤");
        info!("│ Listen: {}", self.listen_addr());
        info!("│ Poll Interval: {}ms", self.polling.interval_ms);
        info!("│ Max Lookups/Cycle: {}", self.polling.max_concurrent_lookups);
        match &self.store.url {
            Some(url) => info!("│ Store: http {} ({}ms timeout)", url, self.store.timeout_ms),
            None => info!("│ Store: memory ({} seeded)", self.store.seed.len()),
        }
        info!("│ Log Level: {}", self.logging.level);
        info!("└─────────────────────────────────────────┘");
    }
}
