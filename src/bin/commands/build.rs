use anyhow::{Context, Result};
use std::path::Path;
use toolchain_harness::build::flags::{ohos_flags, FlagKind};
use toolchain_harness::build::{self, BuildConfig, BuildPlan, Profile};
use toolchain_harness::preflight::check_build_tools;

pub(crate) fn build(profile: &str, config_path: &str) -> Result<i32> {
    let profile = Profile::parse(profile)?;
    let config = BuildConfig::load(Path::new(config_path))?;
    check_build_tools(&config.cmake_bin_dir)?;

    let archive = build::run_build(profile, &config)
        .with_context(|| format!("building profile '{}'", profile.name()))?;
    if let Some(archive) = archive {
        println!("{}", archive.display());
    }
    Ok(0)
}

pub(crate) fn build_defines(profile: &str, config_path: &str) -> Result<i32> {
    let profile = Profile::parse(profile)?;
    let config = BuildConfig::load(Path::new(config_path))?;
    let plan = BuildPlan::new(profile, &config);

    for (key, value) in &plan.env {
        println!("export {}={}", key, toolchain_harness::process::shell_quote(value));
    }
    println!("{}", build::cmake_command_line(&plan, &config));
    Ok(0)
}

pub(crate) fn flags(kind: &str, out_dir: &str, extra: &[String]) -> Result<i32> {
    let kind = FlagKind::parse(kind)?;
    let flags = ohos_flags(Path::new(out_dir), kind, extra)?;
    println!("{}", flags.join(" "));
    Ok(0)
}
