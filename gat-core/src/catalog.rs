//! Tool catalog and download URL resolution.
//!
//! The catalog knows which tools exist, who publishes them, and how their
//! archives are named on the distribution host. Resolution is pure: it never
//! touches the network or the filesystem, and the same inputs always produce
//! the same descriptor.

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{GetToolError, Result};
use crate::types::{ArchiveDescriptor, ArchiveFormat, Vendor};
use crate::versions;

/// Default distribution host.
pub const DEFAULT_BASE_URL: &str = "https://downloads.arduino.cc";

/// URL path segment shared by all third-party tools.
const SHARED_BUCKET: &str = "tools";

/// Tools published by the distribution host's own organization.
pub const FIRST_PARTY_TOOLS: &[&str] = &[
    "arduino-cli",
    "arduino-language-server",
    "arduino-fwuploader",
    "arduino-lint",
];

/// Tools republished under the shared bucket.
pub const THIRD_PARTY_TOOLS: &[&str] = &["clangd", "clang-format"];

// ============================================================================
// Tool Definition
// ============================================================================

/// Definition of a tool the catalog can resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool identifier, also the executable name.
    pub name: String,
    /// Publisher family; decides URL bucket, archive type and strip count.
    pub vendor: Vendor,
    /// Archive type tag overriding the vendor/platform default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    /// Version used when none is requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
}

impl ToolDefinition {
    pub fn first_party(name: impl Into<String>) -> Self {
        Self::new(name, Vendor::FirstParty)
    }

    pub fn third_party(name: impl Into<String>) -> Self {
        Self::new(name, Vendor::ThirdParty)
    }

    fn new(name: impl Into<String>, vendor: Vendor) -> Self {
        Self {
            name: name.into(),
            vendor,
            archive: None,
            latest_version: None,
        }
    }

    pub fn with_archive(mut self, archive: impl Into<String>) -> Self {
        self.archive = Some(archive.into());
        self
    }

    pub fn with_latest_version(mut self, version: impl Into<String>) -> Self {
        self.latest_version = Some(version.into());
        self
    }

    /// Archive format for the given platform.
    ///
    /// Windows gets zip for every tool. Elsewhere first-party tools ship
    /// gzip-compressed tarballs and third-party tools bzip2-compressed ones.
    pub fn archive_format(&self, platform: &str) -> Result<ArchiveFormat> {
        if let Some(tag) = &self.archive {
            return tag.parse();
        }
        Ok(match (platform, self.vendor) {
            ("win32", _) => ArchiveFormat::Zip,
            (_, Vendor::FirstParty) => ArchiveFormat::GzipTar,
            (_, Vendor::ThirdParty) => ArchiveFormat::Bzip2Tar,
        })
    }

    fn category(&self) -> &str {
        match self.vendor {
            Vendor::FirstParty => &self.name,
            Vendor::ThirdParty => SHARED_BUCKET,
        }
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// The set of known tools plus the host they are downloaded from.
#[derive(Debug, Clone)]
pub struct Catalog {
    base_url: String,
    tools: Vec<ToolDefinition>,
}

impl Catalog {
    /// Creates an empty catalog for the given distribution host.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            tools: Vec::new(),
        }
    }

    /// The built-in tools on the default distribution host.
    pub fn builtin() -> Self {
        Self::builtin_at(DEFAULT_BASE_URL)
    }

    /// The built-in tools on a custom distribution host (mirrors, tests).
    pub fn builtin_at(base_url: impl Into<String>) -> Self {
        let first_party = FIRST_PARTY_TOOLS
            .iter()
            .map(|name| ToolDefinition::first_party(*name));
        let third_party = THIRD_PARTY_TOOLS
            .iter()
            .map(|name| ToolDefinition::third_party(*name));

        first_party
            .chain(third_party)
            .fold(Self::new(base_url), Self::with_tool)
    }

    /// Adds a tool, replacing any existing definition with the same name.
    pub fn with_tool(mut self, definition: ToolDefinition) -> Self {
        self.tools.retain(|tool| tool.name != definition.name);
        self.tools.push(definition);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Names of all known tools, in insertion order.
    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|tool| tool.name.as_str())
    }

    pub fn get(&self, tool: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|definition| definition.name == tool)
    }

    fn definition(&self, tool: &str) -> Result<&ToolDefinition> {
        self.get(tool)
            .ok_or_else(|| GetToolError::UnsupportedTool(tool.to_string()))
    }

    /// Latest known version of a tool, if the catalog has one.
    pub fn latest_version(&self, tool: &str) -> Result<Option<String>> {
        let definition = self.definition(tool)?;
        Ok(definition
            .latest_version
            .clone()
            .or_else(|| versions::latest_version(tool).map(str::to_string)))
    }

    /// Resolves the archive URL and format for a (tool, version, platform, arch) tuple.
    pub fn resolve(
        &self,
        tool: &str,
        version: &str,
        platform: &str,
        arch: &str,
    ) -> Result<ArchiveDescriptor> {
        debug!("Resolving {} {} for {} {}", tool, version, platform, arch);
        let definition = self.definition(tool)?;

        let suffix = tool_suffix(platform, arch)?;
        let format = definition.archive_format(platform)?;
        let remote_filename = format!("{}_{}_{}{}", tool, version, suffix, format.extension());
        debug!("Remote filename {}", remote_filename);

        let url = self.join(definition.category(), &remote_filename)?;
        let strip = if format.is_tar() {
            definition.vendor.tar_strip()
        } else {
            0
        };
        debug!("Resolved {} as {} (strip {})", url, format, strip);

        Ok(ArchiveDescriptor {
            url,
            remote_filename,
            format,
            strip,
        })
    }

    fn join(&self, category: &str, remote_filename: &str) -> Result<String> {
        let invalid = |reason: String| GetToolError::DownloadFailed {
            url: self.base_url.clone(),
            status: None,
            reason,
        };

        let mut url = Url::parse(&self.base_url)
            .map_err(|e| invalid(format!("invalid base URL: {e}")))?;

        // Pushed segments are percent-encoded, so `?` or `#` in a version stay in the path.
        url.path_segments_mut()
            .map_err(|()| invalid("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .push(category)
            .push(remote_filename);

        Ok(url.into())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Maps a (platform, arch) pair to the suffix used in remote archive names.
fn tool_suffix(platform: &str, arch: &str) -> Result<&'static str> {
    match (platform, arch) {
        ("darwin", "x64") => Ok("macOS_64bit"),
        ("darwin", "arm64") => Ok("macOS_ARM64"),
        ("linux", "x64") => Ok("Linux_64bit"),
        ("linux", "arm64") => Ok("Linux_ARM64"),
        ("linux", "arm") => Ok("Linux_ARMv7"),
        ("win32", "x64") => Ok("Windows_64bit"),
        _ => Err(GetToolError::UnsupportedPlatform {
            platform: platform.to_string(),
            arch: arch.to_string(),
        }),
    }
}
