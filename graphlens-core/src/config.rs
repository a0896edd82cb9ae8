use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LensConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/graphlens.sock".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Which capture path feeds the coordinator.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStrategy {
    /// Responses relayed from the page interceptor, body included.
    #[default]
    Relay,
    /// Native network hooks carrying a platform request id.
    Identifier,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CorrelationConfig {
    pub strategy: CorrelationStrategy,
    pub store_capacity: usize,
    pub in_flight_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            strategy: CorrelationStrategy::Relay,
            store_capacity: 1000,
            in_flight_ttl_seconds: 300,
            sweep_interval_seconds: 30,
        }
    }
}

impl CorrelationConfig {
    pub fn in_flight_ttl(&self) -> Duration {
        Duration::from_secs(self.in_flight_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window_ms: u64,
    pub max_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 1000,
            max_requests: 50,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BatchingConfig {
    pub enabled: bool,
    pub window_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 100,
        }
    }
}

impl BatchingConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub data_dir: String,
    pub capacity: usize,
    pub max_batch_size: usize,
    pub batch_delay_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.graphlens".to_string(),
            capacity: 1000,
            max_batch_size: 10,
            batch_delay_ms: 1000,
        }
    }
}

impl HistoryConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Data directory with a leading `~` expanded to the home directory.
    pub fn resolved_data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).into_owned())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PanelConfig {
    pub dedupe_window: usize,
    pub frame_interval_ms: u64,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            dedupe_window: 5,
            frame_interval_ms: 16,
        }
    }
}

impl PanelConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8767,
        }
    }
}

impl LensConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }

    /// Like [`LensConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .build()?;
        s.try_deserialize()
    }
}
