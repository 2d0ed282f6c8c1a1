//! Core types for getting tools.
//!
//! This module defines the foundational types shared by the resolver, the
//! downloader, the extractor and the placement pipeline: the request, the
//! archive formats, the resolved archive descriptor, and host detection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::GetToolError;

// ============================================================================
// Vendors
// ============================================================================

/// Who publishes a tool.
///
/// First-party tools live under their own name on the distribution host,
/// third-party tools share the `tools` bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Vendor {
    FirstParty,
    ThirdParty,
}

impl Vendor {
    /// Number of leading path segments discarded from tar entries.
    ///
    /// Third-party archives wrap their content in one top-level folder.
    pub fn tar_strip(&self) -> usize {
        match self {
            Self::FirstParty => 0,
            Self::ThirdParty => 1,
        }
    }
}

// ============================================================================
// Archive Formats
// ============================================================================

/// Archive format of a downloaded tool package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveFormat {
    /// ZIP archive (.zip)
    Zip,
    /// Gzip-compressed tar archive (.tar.gz)
    GzipTar,
    /// Bzip2-compressed tar archive (.tar.bz2)
    Bzip2Tar,
}

impl ArchiveFormat {
    /// File extension used in remote archive names.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Zip => ".zip",
            Self::GzipTar => ".tar.gz",
            Self::Bzip2Tar => ".tar.bz2",
        }
    }

    /// Returns true for the tar-based formats, the only ones that honour a strip count.
    pub fn is_tar(&self) -> bool {
        matches!(self, Self::GzipTar | Self::Bzip2Tar)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::GzipTar => "gzip",
            Self::Bzip2Tar => "bzip2",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ArchiveFormat {
    type Err = GetToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "zip" => Ok(Self::Zip),
            "gzip" | "gz" | "tar.gz" | "tgz" | "gzip-tar" => Ok(Self::GzipTar),
            "bzip2" | "bz2" | "tar.bz2" | "tbz2" | "bzip2-tar" => Ok(Self::Bzip2Tar),
            _ => Err(GetToolError::UnsupportedArchiveType(s.to_string())),
        }
    }
}

/// Where and how to fetch one tool archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveDescriptor {
    /// Fully-qualified download URL.
    pub url: String,
    /// Name of the archive on the distribution host.
    pub remote_filename: String,
    /// Archive format.
    pub format: ArchiveFormat,
    /// Leading path segments to discard from tar entries.
    pub strip: usize,
}

// ============================================================================
// Request / Result
// ============================================================================

/// Everything needed to get one tool onto disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    /// Tool identifier, e.g. `arduino-cli`.
    pub tool: String,
    /// Version, substituted verbatim into the remote filename.
    pub version: String,
    /// Folder the executable is placed in.
    pub destination_folder: PathBuf,
    /// Target platform (`darwin`, `linux`, `win32`).
    pub platform: String,
    /// Target architecture (`x64`, `arm64`, `arm`).
    pub arch: String,
    /// Overwrite an existing destination file.
    pub force: bool,
    /// Treat an existing destination file as success without downloading.
    pub ok_if_exists: bool,
}

impl ToolRequest {
    /// Creates a request for the host platform and architecture.
    pub fn new(
        tool: impl Into<String>,
        version: impl Into<String>,
        destination_folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tool: tool.into(),
            version: version.into(),
            destination_folder: destination_folder.into(),
            platform: host_platform().to_string(),
            arch: host_arch().to_string(),
            force: false,
            ok_if_exists: false,
        }
    }

    pub fn with_target(mut self, platform: impl Into<String>, arch: impl Into<String>) -> Self {
        self.platform = platform.into();
        self.arch = arch.into();
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_ok_if_exists(mut self, ok_if_exists: bool) -> Self {
        self.ok_if_exists = ok_if_exists;
        self
    }
}

/// Outcome of a successful request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetToolResult {
    /// Path of the placed executable.
    pub tool_path: PathBuf,
}

// ============================================================================
// Host Detection
// ============================================================================

/// The host operating system in the spelling the distribution host uses.
pub fn host_platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

/// The host CPU architecture in the spelling the distribution host uses.
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "ia32",
        other => other,
    }
}
