//! Agent configuration storage
//!
//! Handles persistent storage of the agent identity, endpoints and result
//! capture settings. Every section falls back to its defaults when absent.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::constants::{defaults, hosts, paths, ports, timeouts};

/// Identity reported with every result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentIdentity {
    pub id: String,
}

impl Default for AgentIdentity {
    fn default() -> Self {
        Self {
            id: defaults::AGENT_ID.to_string(),
        }
    }
}

/// Control surface binding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: hosts::LOCAL.to_string(),
            port: ports::CONTROL,
        }
    }
}

impl ControlConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Remote result service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// Base URL of the result service; results are only logged when unset
    pub endpoint: Option<String>,
    pub chunk_bytes: usize,
    /// 0 disables preview downscaling
    pub preview_max_pixels: u64,
    pub request_timeout_secs: u64,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            chunk_bytes: defaults::IMAGE_CHUNK_BYTES,
            preview_max_pixels: defaults::PREVIEW_MAX_PIXELS,
            request_timeout_secs: timeouts::REQUEST_SECS,
        }
    }
}

impl ResultsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Notification sink settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotificationsConfig {
    /// URL receiving state changes and result signals; logged when unset
    pub endpoint: Option<String>,
}

/// Snapshot cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::SNAPSHOT_CAPACITY,
        }
    }
}

/// Engine tuning
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Pause between continuous iterations
    pub iteration_interval_ms: Option<u64>,
}

/// Full agent configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentIdentity,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub results: ResultsConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Project definition activated at startup
    #[serde(default)]
    pub project: Option<PathBuf>,
}

impl AgentConfig {
    /// Configuration path from the first CLI argument, the environment,
    /// or the platform data directory
    pub fn resolve_path(arg: Option<String>) -> PathBuf {
        if let Some(path) = arg {
            return PathBuf::from(path);
        }
        if let Ok(path) = std::env::var(paths::CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(paths::APP_DIR)
            .join(paths::CONFIG_FILE)
    }

    /// Load configuration from disk; a missing file yields the defaults
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).await.map_err(ConfigError::Io)?;

        serde_json::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save configuration to disk
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await.map_err(ConfigError::Io)?;
        }

        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        fs::write(path, contents).await.map_err(ConfigError::Io)?;

        log::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn iteration_interval(&self) -> Option<Duration> {
        self.engine.iteration_interval_ms.map(Duration::from_millis)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(serde_json::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
}
