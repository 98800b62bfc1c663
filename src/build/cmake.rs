use crate::process::Cmd;
use anyhow::{Context, Result};
use log::info;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Arguments for `cmake -G Ninja` with one `-D` per define.
pub fn cmake_args(cmake_bin_dir: &Path, source: &Path, defines: &BTreeMap<String, String>) -> Vec<String> {
    let mut args = vec![
        "-G".to_string(),
        "Ninja".to_string(),
        format!("-DCMAKE_PREFIX_PATH={}", cmake_bin_dir.display()),
    ];
    args.extend(defines.iter().map(|(key, value)| format!("-D{}={}", key, value)));
    args.push(source.to_string_lossy().into_owned());
    args
}

/// Configure `source` into `out` with the prebuilt cmake.
pub fn invoke_cmake(
    cmake_bin_dir: &Path,
    source: &Path,
    out: &Path,
    defines: &BTreeMap<String, String>,
    env: &BTreeMap<String, String>,
) -> Result<()> {
    fs::create_dir_all(out).with_context(|| format!("creating build dir '{}'", out.display()))?;
    let cmake = cmake_bin_dir.join("cmake");
    info!("configuring '{}' in '{}'", source.display(), out.display());

    Cmd::new(&cmake)
        .args(cmake_args(cmake_bin_dir, source, defines))
        .dir(out)
        .envs(env)
        .error_msg(format!("cmake failed for '{}'", out.display()))
        .status()?;
    Ok(())
}

/// Build `targets` (or the default target) in `out`, then optionally install.
pub fn invoke_ninja(
    cmake_bin_dir: &Path,
    out: &Path,
    env: &BTreeMap<String, String>,
    targets: &[String],
    load: Option<u32>,
    install: bool,
) -> Result<()> {
    let ninja = cmake_bin_dir.join("ninja");
    let mut args: Vec<String> = load.iter().map(|n| format!("-l{}", n)).collect();
    args.extend(targets.iter().cloned());

    info!("building '{}' {:?}", out.display(), targets);
    Cmd::new(&ninja)
        .args(&args)
        .dir(out)
        .envs(env)
        .error_msg(format!("ninja failed in '{}'", out.display()))
        .status()?;

    if install {
        Cmd::new(&ninja)
            .arg("install")
            .dir(out)
            .envs(env)
            .error_msg(format!("ninja install failed in '{}'", out.display()))
            .status()?;
    }
    Ok(())
}
