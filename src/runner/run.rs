//! Execution of wrapped tests on the device and on the host.

use super::env::{sanitizer_env, PathMapping};
use super::{raise_abort, real_path};
use crate::bridge::DeviceBridge;
use crate::process::{exit_code, shell_quote, Cmd};
use crate::settings::DeviceSettings;
use anyhow::{Context, Result};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

const HOST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shell line that runs `device_binary` and leaves its streams and status in side files.
///
/// OHOS sets `log_path` in `UBSAN_OPTIONS`, which hides reports from the
/// test's output, so the variable is unset first.
pub fn device_command(remote_root: &str, env: &str, device_binary: &str, args: &[String]) -> String {
    let mut line = format!("unset UBSAN_OPTIONS && cd {} &&", shell_quote(remote_root));
    if !env.is_empty() {
        line.push(' ');
        line.push_str(env);
    }
    line.push(' ');
    line.push_str(&shell_quote(device_binary));
    for arg in args {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }
    let side_file = |ext: &str| shell_quote(&format!("{}.{}", device_binary, ext));
    line.push_str(&format!(
        " >{} 2>{} ; echo $? >{}",
        side_file("stdout"),
        side_file("stderr"),
        side_file("exitcode")
    ));
    line
}

/// Shell line for running the real host binary behind `argv0`.
pub fn host_command(env: &str, real_binary: &str, args: &[String]) -> String {
    let mut line = String::from("unset UBSAN_OPTIONS &&");
    for part in [env, real_binary] {
        if !part.is_empty() {
            line.push(' ');
            line.push_str(part);
        }
    }
    for arg in args {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }
    line
}

/// Run the test behind `argv0` on the device and return its exit code.
///
/// Does not return when the device process died abnormally: SIGABRT is
/// raised locally instead.
pub fn run_on_device(
    argv0: &Path,
    args: &[String],
    env: &BTreeMap<String, String>,
    settings: &DeviceSettings,
    bridge: &dyn DeviceBridge,
) -> Result<i32> {
    let device_binary = bridge.device_path(argv0)?;
    let device_env = sanitizer_env(env, settings, &PathMapping::Device(bridge))?;
    let line = device_command(bridge.remote_root(), &device_env, &device_binary, args);
    debug!("device command: {}", line);

    let outcome = bridge.shell(&line, "")?;
    if !outcome.success() {
        warn!("running '{}' on the device failed", device_binary);
    }

    let stdout = bridge.pull(&format!("{}.stdout", device_binary))?;
    let stderr = bridge.pull(&format!("{}.stderr", device_binary))?;
    forward_output(&stdout, &stderr)?;

    let exitcode_path = format!("{}.exitcode", device_binary);
    let raw = bridge.pull(&exitcode_path)?;
    let code: i32 = raw
        .trim()
        .parse()
        .with_context(|| format!("parsing exit code '{}' from '{}'", raw.trim(), exitcode_path))?;

    if should_abort(code) {
        raise_abort();
    }
    Ok(code)
}

/// A device exit status above 128 means the test died from a signal.
/// Not a real signal here, but aborting is enough to satisfy `not --crash`.
pub fn should_abort(code: i32) -> bool {
    code > 128
}

/// Run `<argv0>.real` on the host under the sanitizer environment.
pub fn run_on_host(
    argv0: &Path,
    args: &[String],
    env: &BTreeMap<String, String>,
    settings: &DeviceSettings,
) -> Result<i32> {
    let real = real_path(argv0);
    let host_env = sanitizer_env(env, settings, &PathMapping::Host)?;
    let line = host_command(&host_env, &shell_quote(&real.to_string_lossy()), args);
    debug!("host command: {}", line);

    let result = Cmd::new("sh")
        .args(["-c", &line])
        .timeout(HOST_TIMEOUT)
        .allow_fail()
        .run()?;
    forward_output(&result.stdout, &result.stderr)?;

    if killed_by_signal(&result.status) {
        raise_abort();
    }
    Ok(exit_code(&result.status))
}

fn killed_by_signal(status: &std::process::ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal().is_some()
}

fn forward_output(stdout: &str, stderr: &str) -> Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(stdout.as_bytes())
        .context("writing test stdout")?;
    out.flush().context("flushing test stdout")?;

    let mut err = std::io::stderr().lock();
    err.write_all(stderr.as_bytes())
        .context("writing test stderr")?;
    err.flush().context("flushing test stderr")?;
    Ok(())
}
