//! Configuration loading.
//!
//! Settings come from, in increasing priority: built-in defaults, the JSON
//! config file, `HUB_SSE_*` environment variables, and command-line flags
//! (applied by the binary).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::fs;

use crate::constants::{HTTP_REQUEST_TIMEOUT, PIPE_CAPACITY};

/// Configuration for a hub connection.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Hub endpoint URL (event stream and POST target).
    pub server_url: String,
    /// Fixed connection id. When unset, one is obtained via negotiate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Timeout in seconds for outbound HTTP requests.
    pub request_timeout_secs: u64,
    /// Bytes buffered between the event-stream pump and the reader.
    pub pipe_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:5000/hub".to_string(),
            connection_id: None,
            request_timeout_secs: HTTP_REQUEST_TIMEOUT.as_secs(),
            pipe_capacity: PIPE_CAPACITY,
        }
    }
}

impl Config {
    /// Returns the configuration directory path.
    ///
    /// `HUB_SSE_CONFIG_DIR` overrides the platform config dir
    /// (e.g. `~/.config/hub-sse`).
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("HUB_SSE_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("hub-sse"))
    }

    /// Loads configuration from the config file, with environment variable
    /// overrides. A missing file means defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a specific file, without env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Applies `HUB_SSE_*` environment variables on top of the current values.
    ///
    /// Numeric variables that fail to parse are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(server_url) = std::env::var("HUB_SSE_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Ok(connection_id) = std::env::var("HUB_SSE_CONNECTION_ID") {
            self.connection_id = Some(connection_id).filter(|id| !id.is_empty());
        }

        if let Ok(timeout) = std::env::var("HUB_SSE_REQUEST_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.request_timeout_secs = secs;
            }
        }

        if let Ok(capacity) = std::env::var("HUB_SSE_PIPE_CAPACITY") {
            if let Ok(bytes) = capacity.parse::<usize>() {
                self.pipe_capacity = bytes;
            }
        }
    }

    /// Outbound request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Persists the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
