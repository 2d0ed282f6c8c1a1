//! Error types for getting a tool.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while resolving, downloading, extracting or placing a tool.
#[derive(Debug, Error)]
pub enum GetToolError {
    #[error("Unsupported tool: {0}")]
    UnsupportedTool(String),

    #[error("Unsupported platform: {platform}, arch: {arch}")]
    UnsupportedPlatform { platform: String, arch: String },

    #[error("Failed to download from {url}: {reason}")]
    DownloadFailed {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("Unsupported archive type: {0}")]
    UnsupportedArchiveType(String),

    #[error("Invalid archive entry: {0}")]
    InvalidArchiveEntry(String),

    #[error("Tool already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("{name} was not found in the downloaded archive")]
    MissingFromArchive { name: String },

    #[error("Failed to extract archive: {0}")]
    Extraction(String),

    #[error("{message}: {source}")]
    Io {
        message: String,
        #[source]
        source: io::Error,
    },
}

impl GetToolError {
    pub(crate) fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// True when the destination already existed and neither force nor ok-if-exists was set.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// HTTP status of a failed download, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::DownloadFailed { status, .. } => *status,
            _ => None,
        }
    }
}

pub type Result<T, E = GetToolError> = std::result::Result<T, E>;
