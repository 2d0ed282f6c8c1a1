//! Latest known versions of the built-in tools.
//!
//! Used when a caller asks for a tool without naming a version.

/// `(tool, version)` pairs for every built-in tool.
pub const LATEST_VERSIONS: &[(&str, &str)] = &[
    ("arduino-cli", "1.4.0"),
    ("arduino-language-server", "0.7.7"),
    ("arduino-fwuploader", "2.4.1"),
    ("arduino-lint", "1.3.0"),
    ("clangd", "15.0.0"),
    ("clang-format", "15.0.0"),
];

/// Returns the latest known version of a built-in tool.
pub fn latest_version(tool: &str) -> Option<&'static str> {
    LATEST_VERSIONS
        .iter()
        .find(|(name, _)| *name == tool)
        .map(|(_, version)| *version)
}
