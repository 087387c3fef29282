//! Persistent configuration for probewire.
//!
//! Stores transport limits and timeouts in `~/.probewire/config.json`. Every
//! field has a default, so a partial file only overrides what it names.
//!
//! # Example
//!
//! ```no_run
//! use probewire_rpc::config::RpcConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let config = RpcConfig::load();
//! println!("call timeout: {:?}", config.call_timeout());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const CONFIG_DIRNAME: &str = ".probewire";
const CONFIG_FILENAME: &str = "config.json";

/// Paths the HTTP binding accepts when nothing else is configured.
pub const DEFAULT_RPC_PATHS: [&str; 3] = ["/", "/json", "/json/"];

/// Transport and client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// How long a client waits for a response.
    pub call_timeout_ms: u64,
    /// How long a client waits to establish a connection.
    pub connect_timeout_ms: u64,
    /// Request paths served by the HTTP binding. Empty accepts every path.
    pub rpc_paths: Vec<String>,
    /// Largest slice an HTTP body is copied and grown by while it is read.
    pub max_chunk_size: usize,
    /// Upper bound on a whole HTTP body; larger requests get 413.
    pub max_body_size: usize,
    /// Upper bound on a stream frame, header included.
    pub max_frame_size: usize,
    pub max_datagram_size: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            rpc_paths: DEFAULT_RPC_PATHS.iter().map(|p| p.to_string()).collect(),
            max_chunk_size: 10 * 1024 * 1024,
            max_body_size: 64 * 1024 * 1024,
            max_frame_size: crate::framing::DEFAULT_MAX_FRAME_SIZE,
            max_datagram_size: 65_507,
        }
    }
}

impl RpcConfig {
    /// Load config from `~/.probewire/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            return Self::default();
        };
        Self::load_from(&path)
    }

    /// Load config from an explicit file, falling back to defaults.
    pub fn load_from(path: &std::path::Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save config to `~/.probewire/config.json`.
    pub fn save(&self) -> std::io::Result<()> {
        let path = config_path().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "could not determine home directory")
        })?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        self.save_to(&path)
    }

    /// Save config to an explicit file as pretty JSON.
    pub fn save_to(&self, path: &std::path::Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Whether the HTTP binding should serve `path`.
    pub fn accepts_path(&self, path: &str) -> bool {
        self.rpc_paths.is_empty() || self.rpc_paths.iter().any(|p| p == path)
    }
}

/// Location of the config file, if a home directory is known.
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIRNAME).join(CONFIG_FILENAME))
}
