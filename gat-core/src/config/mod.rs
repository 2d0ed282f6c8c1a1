//! Configuration module for gat.
//!
//! Manages settings stored as JSON in the OS config folder.

mod settings;

pub use settings::{
    ConfigError, Settings, DEFAULT_CONNECT_TIMEOUT_SECS, ENV_BASE_URL, ENV_CONFIG, ENV_TEMP_DIR,
};
