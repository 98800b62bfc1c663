//! Cross-toolchain build orchestration.
//!
//! This module provides:
//! - [`config`] - TOML build configuration
//! - [`profile`] - host profiles and their flag/define tables
//! - [`cmake`] - cmake and ninja invocation
//! - [`runtime`] - runtime copies from the main toolchain
//! - [`package`] - strip and `.tar.zst` packaging
//! - [`flags`] - OHOS cflags/ldflags extraction

pub mod cmake;
pub mod config;
pub mod flags;
pub mod package;
pub mod profile;
pub mod runtime;

pub use config::BuildConfig;
pub use profile::{BuildPlan, Profile};

use crate::process::Cmd;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Printable cmake invocation for `profile`, without running it.
pub fn cmake_command_line(plan: &BuildPlan, config: &BuildConfig) -> String {
    Cmd::new(config.cmake_bin_dir.join("cmake"))
        .args(cmake::cmake_args(&config.cmake_bin_dir, &plan.source_dir, &plan.defines))
        .command_line()
}

/// Configure, build, install and optionally package one profile.
///
/// Returns the package archive when one was written.
pub fn run_build(profile: Profile, config: &BuildConfig) -> Result<Option<PathBuf>> {
    let plan = BuildPlan::new(profile, config);
    let tag = format!("[build:{}]", profile.name());

    println!("{} configuring {}", tag, plan.build_dir.display());
    cmake::invoke_cmake(
        &config.cmake_bin_dir,
        &plan.source_dir,
        &plan.build_dir,
        &plan.defines,
        &plan.env,
    )?;

    println!("{} building and installing", tag);
    cmake::invoke_ninja(
        &config.cmake_bin_dir,
        &plan.build_dir,
        &plan.env,
        &plan.targets,
        config.ninja_load,
        true,
    )?;

    if let Some(python) = plan.prebuilt_python(config) {
        println!("{} installing prebuilt python from {}", tag, python.display());
        install_prebuilt_python(&python, &plan, config)?;
    }

    let copied = runtime::copy_runtimes(
        profile,
        &plan.llvm_root,
        &plan.install_dir,
        &config.clang_version,
    )?;
    println!("{} copied {} runtime trees", tag, copied);

    if !config.do_package {
        println!("{} packaging disabled", tag);
        return Ok(None);
    }

    let llvm_strip = plan.llvm_root.join("bin").join("llvm-strip");
    let host = format!("{}-{}", profile.system_name(), profile.platform());
    let output = package::package_install(
        &plan.install_dir,
        &config.out_path("install"),
        &config.packages_dir,
        &config.build_name,
        &host,
        config.strip.then_some(llvm_strip.as_path()),
        profile.dereference_package(),
    )?;
    println!(
        "{} packaged {} ({} bytes, sha256 {})",
        tag,
        output.archive.display(),
        output.size,
        output.sha256
    );
    Ok(Some(output.archive))
}

/// Copy the prebuilt Python tree and its shared library into the install.
fn install_prebuilt_python(python: &Path, plan: &BuildPlan, config: &BuildConfig) -> Result<()> {
    let libpython = format!("libpython{}.so.1.0", config.lldb.python_version);
    let src = python.join("lib").join(&libpython);
    let lib_dir = plan.install_dir.join("lib");
    fs::create_dir_all(&lib_dir).with_context(|| format!("creating '{}'", lib_dir.display()))?;
    fs::copy(&src, lib_dir.join(&libpython))
        .with_context(|| format!("copying '{}'", src.display()))?;

    let dst = plan.install_dir.join(&config.lldb.lldb_python);
    if dst.exists() {
        fs::remove_dir_all(&dst).with_context(|| format!("removing '{}'", dst.display()))?;
    }
    runtime::mirror_tree(python, &dst)?;
    Ok(())
}
