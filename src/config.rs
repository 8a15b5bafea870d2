use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::session::{Capabilities, SessionRegistry, Timeouts};

/// Top-level server config, loaded from TOML.
///
/// Every section and key is optional; missing values take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub sessions: SessionsSection,
    pub routing: RoutingSection,
    pub logging: LoggingSection,
    /// Capabilities every new session starts from before the client's
    /// requested capabilities are applied.
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: SocketAddr,
    /// URL prefix the protocol is served under, e.g. `/wd/hub`.
    pub url_base: Option<String>,
    pub body_limit_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 4444)),
            url_base: None,
            body_limit_bytes: crate::api::DEFAULT_BODY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsSection {
    /// Maximum concurrent sessions; `0` means unlimited.
    pub max_sessions: usize,
    pub implicit_wait_ms: u64,
    pub script_timeout_ms: u64,
    pub page_load_timeout_ms: u64,
}

impl Default for SessionsSection {
    fn default() -> Self {
        let timeouts = Timeouts::default();
        Self {
            max_sessions: SessionRegistry::DEFAULT_MAX_SESSIONS,
            implicit_wait_ms: timeouts.implicit_wait_ms,
            script_timeout_ms: timeouts.script_timeout_ms,
            page_load_timeout_ms: timeouts.page_load_timeout_ms,
        }
    }
}

impl SessionsSection {
    pub fn max_sessions(&self) -> Option<usize> {
        (self.max_sessions > 0).then_some(self.max_sessions)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            implicit_wait_ms: self.implicit_wait_ms,
            script_timeout_ms: self.script_timeout_ms,
            page_load_timeout_ms: self.page_load_timeout_ms,
        }
    }
}

/// Which matcher resolves request paths to commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MatcherKind {
    /// Ordered route table, first match wins.
    #[default]
    Table,
    /// Resource tree walked one segment at a time.
    Tree,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    pub matcher: MatcherKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default `tracing` filter, used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

impl Config {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::load(path)?.unwrap_or_default())
    }

    /// `$XDG_CONFIG_HOME/jsonwire/config.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("jsonwire").join("config.toml"))
    }
}

/// Errors that can occur when loading config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
