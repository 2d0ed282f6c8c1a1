//! Command-line arguments.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gat_core::{host_arch, host_platform, Catalog, GetToolError, ToolRequest};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "gat", about = "Get Arduino Tools", version = gat_core::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Get an Arduino tool
    Get(GetArgs),
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Tool, e.g. arduino-cli, arduino-language-server, clangd
    pub tool: String,

    /// Version. Defaults to the latest known version of the tool
    pub version: Option<String>,

    /// Destination folder path. Defaults to the current directory
    #[arg(short = 'd', long = "destination-folder-path", value_name = "PATH")]
    pub destination_folder_path: Option<PathBuf>,

    /// Platform. Defaults to the host platform
    #[arg(short, long)]
    pub platform: Option<String>,

    /// Architecture. Defaults to the host architecture
    #[arg(short, long)]
    pub arch: Option<String>,

    /// Force download to overwrite existing files
    #[arg(short, long)]
    pub force: bool,

    /// Hides the progress bar
    #[arg(long)]
    pub silent: bool,

    /// Enables the verbose output
    #[arg(long)]
    pub verbose: bool,

    /// Succeed without downloading when the tool already exists
    #[arg(long)]
    pub ok_if_exists: bool,
}

impl GetArgs {
    /// Builds the request, filling in the latest version and host defaults.
    pub fn to_request(&self, catalog: &Catalog) -> Result<ToolRequest> {
        let version = match &self.version {
            Some(version) => version.clone(),
            None => catalog.latest_version(&self.tool)?.with_context(|| {
                format!(
                    "No latest version is known for {}, pass a version",
                    self.tool
                )
            })?,
        };

        let destination = match &self.destination_folder_path {
            Some(path) => path.clone(),
            None => std::env::current_dir().context("Failed to read the current directory")?,
        };

        let platform = self.platform.as_deref().unwrap_or(host_platform());
        let arch = self.arch.as_deref().unwrap_or(host_arch());

        Ok(ToolRequest::new(&self.tool, version, destination)
            .with_target(platform, arch)
            .with_force(self.force)
            .with_ok_if_exists(self.ok_if_exists))
    }
}

/// Formats a failure for the terminal.
pub fn render_error(err: &anyhow::Error) -> String {
    let mut message = err.to_string();
    if err
        .downcast_ref::<GetToolError>()
        .is_some_and(GetToolError::is_already_exists)
    {
        message.push_str("\nUse --force to overwrite existing files");
    }
    message
}
