//! Settings for gat.
//!
//! Settings are read from `{config_dir}/gat/config.json`, or from the file
//! named by `GAT_CONFIG`. Missing fields fall back to their defaults and a
//! few environment variables override the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::catalog::{Catalog, ToolDefinition, DEFAULT_BASE_URL};
use crate::paths;

/// Names an alternative settings file.
pub const ENV_CONFIG: &str = "GAT_CONFIG";

/// Overrides [`Settings::base_url`].
pub const ENV_BASE_URL: &str = "GAT_BASE_URL";

/// Overrides [`Settings::temp_dir`].
pub const ENV_TEMP_DIR: &str = "GAT_TEMP_DIR";

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings from {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid base URL {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Distribution host archives are downloaded from.
    pub base_url: String,

    /// Directory extraction workspaces are created in. OS temp folder when unset.
    pub temp_dir: Option<PathBuf>,

    /// TCP connect timeout for downloads.
    pub connect_timeout_secs: u64,

    /// User-Agent sent with every download.
    pub user_agent: String,

    /// Extra tools, or overrides of built-in ones.
    pub tools: Vec<ToolDefinition>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            temp_dir: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            user_agent: format!("gat/{}", env!("CARGO_PKG_VERSION")),
            tools: Vec::new(),
        }
    }
}

impl Settings {
    /// Loads settings from `GAT_CONFIG` or the default path, then applies
    /// environment overrides.
    ///
    /// A missing default settings file yields the defaults; a missing file
    /// named by `GAT_CONFIG` is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = match std::env::var_os(ENV_CONFIG) {
            Some(path) => Self::load_from(Path::new(&path))?,
            None => match paths::get_config_path() {
                Some(path) if path.is_file() => Self::load_from(&path)?,
                _ => {
                    debug!("No settings file, using defaults");
                    Self::default()
                }
            },
        };

        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Reads and parses one settings file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let settings = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Applies overrides from a variable lookup, normally the process environment.
    ///
    /// Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(base_url) = lookup(ENV_BASE_URL) {
            debug!("{} overrides base URL: {}", ENV_BASE_URL, base_url);
            self.base_url = base_url;
        }
        if let Some(temp_dir) = lookup(ENV_TEMP_DIR) {
            debug!("{} overrides temp dir: {}", ENV_TEMP_DIR, temp_dir);
            self.temp_dir = Some(PathBuf::from(temp_dir));
        }
    }

    /// Checks the base URL and clamps out-of-range values.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason,
        };

        let url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", url.scheme())));
        }

        if self.connect_timeout_secs == 0 {
            self.connect_timeout_secs = DEFAULT_CONNECT_TIMEOUT_SECS;
        }
        if self.user_agent.trim().is_empty() {
            self.user_agent = Self::default().user_agent;
        }

        Ok(())
    }

    /// Built-in tools on the configured host, plus the configured tools.
    pub fn catalog(&self) -> Catalog {
        self.tools
            .iter()
            .cloned()
            .fold(Catalog::builtin_at(&self.base_url), Catalog::with_tool)
    }

    /// Directory extraction workspaces are created in.
    pub fn temp_root(&self) -> PathBuf {
        paths::get_temp_root(self.temp_dir.as_deref())
    }
}
