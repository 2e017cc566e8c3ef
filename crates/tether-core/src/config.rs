//! Configuration system for Tether.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TETHER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tether/config.toml
//!   3. ~/.config/tether/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::wire::DEFAULT_MAX_CHUNK_SIZE;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub transport: TransportConfig,
    pub signaling: SignalingConfig,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum characters of serialized message per chunk frame.
    pub max_chunk_size: usize,
    /// How long a sender waits for a confirmation. 0 = wait forever.
    pub confirmation_timeout_ms: u64,
    /// Partial reassemblies idle longer than this are discarded.
    pub reassembly_ttl_secs: u64,
    /// Capacity of the inbound frame queue and the send event stream.
    pub event_buffer: usize,
}

/// Consumed by the connection negotiation layer only. The transport core
/// never reads these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub base_url: String,
    pub turn_servers: Vec<TurnServer>,
    pub stun_servers: Vec<StunServer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServer {
    pub urls: String,
    pub username: String,
    pub credential: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StunServer {
    pub urls: String,
}

/// Socket addresses used by `tetherd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_addr: String,
    pub peer_addr: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            confirmation_timeout_ms: 10_000,
            reassembly_ttl_secs: 60,
            event_buffer: 1024,
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            base_url: "wss://signaling-server.example.net".to_string(),
            turn_servers: Vec::new(),
            stun_servers: vec![StunServer {
                urls: "stun:stun.l.google.com:19302".to_string(),
            }],
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7700".to_string(),
            peer_addr: "127.0.0.1:7701".to_string(),
        }
    }
}

impl TransportConfig {
    /// `None` when confirmations are awaited without a bound.
    pub fn confirmation_timeout(&self) -> Option<Duration> {
        match self.confirmation_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn reassembly_ttl(&self) -> Duration {
        Duration::from_secs(self.reassembly_ttl_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("tether")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TetherConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, falling back to defaults if it does not
    /// exist. Env overrides still apply.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            TetherConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TETHER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&TetherConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.max_chunk_size == 0 {
            return Err(ConfigError::Invalid("transport.max_chunk_size must be at least 1"));
        }
        if self.transport.event_buffer == 0 {
            return Err(ConfigError::Invalid("transport.event_buffer must be at least 1"));
        }
        Ok(())
    }

    /// Apply TETHER_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TETHER_TRANSPORT__MAX_CHUNK_SIZE") {
            if let Ok(n) = v.parse() {
                self.transport.max_chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("TETHER_TRANSPORT__CONFIRMATION_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.transport.confirmation_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("TETHER_TRANSPORT__REASSEMBLY_TTL_SECS") {
            if let Ok(n) = v.parse() {
                self.transport.reassembly_ttl_secs = n;
            }
        }
        if let Ok(v) = std::env::var("TETHER_SIGNALING__BASE_URL") {
            self.signaling.base_url = v;
        }
        if let Ok(v) = std::env::var("TETHER_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Ok(v) = std::env::var("TETHER_NETWORK__PEER_ADDR") {
            self.network.peer_addr = v;
        }
    }
}
