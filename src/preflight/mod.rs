//! Preflight checks for host tools.
//!
//! Each workflow names the external tools it shells out to. Checking them up
//! front turns a spawn failure halfway through a build into one message
//! listing everything that is missing.
//!
//! # Example
//!
//! ```rust
//! use toolchain_harness::preflight::{check_required_tools, command_exists};
//!
//! if !command_exists("abidiff") {
//!     println!("libabigail not installed");
//! }
//!
//! if let Err(e) = check_required_tools(&[("checksec", "checksec"), ("file", "file")]) {
//!     eprintln!("{}", e);
//! }
//! ```

use crate::process::ensure_exists;
use anyhow::{bail, Result};
use std::path::Path;

/// Tools for `abi gen` / `abi compare`.
pub const ABI_TOOLS: &[(&str, &str)] = &[("abidw", "abigail-tools"), ("abidiff", "abigail-tools")];

/// Tools for `checksec`.
pub const CHECKSEC_TOOLS: &[(&str, &str)] = &[("checksec", "checksec"), ("file", "file")];

/// Check if a command exists on PATH, or at an explicit path.
pub fn command_exists(cmd: &str) -> bool {
    ensure_exists(cmd).is_ok()
}

/// Check that every `(command, package)` tool is available.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .map(|(tool, package)| format!("  {} (install: {})", tool, package))
        .collect();

    if !missing.is_empty() {
        bail!("Missing required host tools:\n{}", missing.join("\n"));
    }
    Ok(())
}

/// Check the prebuilt cmake and ninja a cross build runs.
pub fn check_build_tools(cmake_bin_dir: &Path) -> Result<()> {
    let cmake = cmake_bin_dir.join("cmake");
    let ninja = cmake_bin_dir.join("ninja");
    let cmake = cmake.to_string_lossy();
    let ninja = ninja.to_string_lossy();
    check_required_tools(&[(&*cmake, "prebuilts/cmake"), (&*ninja, "prebuilts/cmake")])
}

/// Check the bridge program device commands go through.
pub fn check_bridge_tool(program: &str) -> Result<()> {
    let package = if program.ends_with("adb") {
        "android-platform-tools"
    } else {
        "hdc (OpenHarmony SDK toolchains)"
    };
    check_required_tools(&[(program, package)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
        assert!(!command_exists("/no/such/dir/hdc"));
    }

    #[test]
    fn test_check_required_tools() {
        assert!(check_required_tools(&[("sh", "dash")]).is_ok());

        let err = check_required_tools(&[("sh", "dash"), ("nonexistent_command_xyz", "fake-package")])
            .unwrap_err()
            .to_string();
        assert!(err.contains("nonexistent_command_xyz (install: fake-package)"));
        assert!(!err.contains("dash"));
    }

    #[test]
    fn test_check_build_tools() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("cmake"), "").unwrap();

        let err = check_build_tools(temp.path()).unwrap_err().to_string();
        assert!(err.contains("ninja"));
        assert!(!err.contains("/cmake "));

        fs::write(temp.path().join("ninja"), "").unwrap();
        assert!(check_build_tools(temp.path()).is_ok());
    }
}
