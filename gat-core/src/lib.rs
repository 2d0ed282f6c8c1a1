//! gat Core Library
//!
//! Gets prebuilt tool executables from a distribution host and places them
//! in a destination folder. It includes:
//!
//! - A catalog resolving (tool, version, platform, arch) to an archive URL
//! - Streaming downloads with cancellation
//! - Streaming zip, gzip-tar and bzip2-tar extraction that rejects escaping entries
//! - A progress counter spanning download and extraction
//! - The get-tool pipeline with guaranteed cleanup
//! - Settings loaded from the OS config folder

pub mod catalog;
pub mod config;
pub mod downloader;
pub mod error;
pub mod extractor;
pub mod getter;
pub mod paths;
pub mod progress;
pub mod types;
pub mod versions;

// Re-exports for convenience
pub use catalog::{Catalog, ToolDefinition, DEFAULT_BASE_URL};
pub use config::{ConfigError, Settings};
pub use error::{GetToolError, Result};
pub use getter::{get_tool, ToolGetter};
pub use progress::{ProgressCounter, ProgressEvent};
pub use types::{
    host_arch, host_platform, ArchiveDescriptor, ArchiveFormat, GetToolResult, ToolRequest,
    Vendor,
};

// Cancellation tokens are part of the public API.
pub use tokio_util::sync::CancellationToken;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
