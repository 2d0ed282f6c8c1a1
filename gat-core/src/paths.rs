//! Path resolution for configuration, extraction workspaces and tool executables.
//!
//! - Configuration: `{config_dir}/gat/config.json`
//!   (`~/.config/gat/` on Linux, `~/Library/Application Support/gat/` on macOS,
//!   `%APPDATA%\gat\` on Windows)
//! - Extraction workspaces: `gat-*` directories under the OS temp folder, or
//!   under the configured `temp_dir`.

use std::io;
use std::path::{Path, PathBuf};

/// Subdirectory name under the OS config folder.
const GAT_CONFIG_DIR: &str = "gat";

/// Name of the settings file.
const CONFIG_FILE_NAME: &str = "config.json";

/// Prefix of every extraction workspace directory.
pub const WORKSPACE_PREFIX: &str = "gat-";

/// Returns the gat directory inside the OS config folder, if the OS has one.
pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(GAT_CONFIG_DIR))
}

/// Returns the default settings file path.
///
/// Path: `{config_dir}/gat/config.json`
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Returns the directory extraction workspaces are created in.
pub fn get_temp_root(configured: Option<&Path>) -> PathBuf {
    configured
        .map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir)
}

/// Returns the file name of a tool's executable on the given platform.
///
/// - Windows: `{tool}.exe`
/// - Everything else: `{tool}`
pub fn tool_basename(tool: &str, platform: &str) -> String {
    if platform == "win32" {
        format!("{tool}.exe")
    } else {
        tool.to_string()
    }
}

/// Resolves a relative path against the current directory.
pub fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}
