//! OHOS device backend driving the `hdc` CLI.

use super::{remote_dirname, DeviceBridge, RetryPolicy};
use crate::process::Cmd;
use crate::settings::DeviceSettings;
use anyhow::{bail, Context, Result};
use log::{debug, warn};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Marker hdc prints after a completed `file send`/`file recv`.
pub const TRANSFER_FINISHED: &str = "FileTransfer finish";

const TRANSFER_ATTEMPTS: u32 = 5;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct Hdc {
    program: String,
    server: Option<String>,
    utid: Option<String>,
    remote_root: String,
}

impl Hdc {
    pub fn new(program: impl Into<String>, remote_root: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            server: None,
            utid: None,
            remote_root: remote_root.into(),
        }
    }

    pub fn from_settings(settings: &DeviceSettings) -> Self {
        Self {
            program: settings.hdc.clone(),
            server: settings.hdc_server.clone(),
            utid: settings.hdc_utid.clone(),
            remote_root: settings.remote_root.clone(),
        }
    }

    /// Connect through `-s <ip:port>`.
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Select a device with `-t <utid>`.
    pub fn with_utid(mut self, utid: impl Into<String>) -> Self {
        self.utid = Some(utid.into());
        self
    }

    fn transfer_policy() -> RetryPolicy {
        RetryPolicy::new(TRANSFER_ATTEMPTS, COMMAND_TIMEOUT).expect(TRANSFER_FINISHED)
    }

    /// Run once without retries and return combined output; nonzero exit is an error.
    fn output(&self, args: &[&str]) -> Result<String> {
        let result = Cmd::new(&self.program)
            .args(self.connection_args())
            .args(args)
            .timeout(COMMAND_TIMEOUT)
            .run()?;
        Ok(result.combined())
    }
}

impl DeviceBridge for Hdc {
    fn tool_name(&self) -> &'static str {
        "hdc"
    }

    fn program(&self) -> &str {
        &self.program
    }

    fn connection_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(server) = &self.server {
            args.push("-s".to_string());
            args.push(server.clone());
        }
        if let Some(utid) = &self.utid {
            args.push("-t".to_string());
            args.push(utid.clone());
        }
        args
    }

    fn remote_root(&self) -> &str {
        &self.remote_root
    }

    fn command_timeout(&self) -> Duration {
        COMMAND_TIMEOUT
    }

    fn push_verb(&self) -> &'static str {
        "file send"
    }

    fn push(&self, local: &Path) -> Result<String> {
        let dst = self.device_path(local)?;
        let src = local.to_string_lossy();
        let once = RetryPolicy::once(COMMAND_TIMEOUT);

        self.remote(&["shell", "mkdir", "-p", remote_dirname(&dst)], &once)?;

        let sent = self.remote(&["file", "send", &src, &dst], &Self::transfer_policy())?;
        if !sent.success() {
            bail!("pushing '{}' to device '{}' failed", src, dst);
        }

        self.remote(&["shell", "chmod", "+x", &dst], &once)?;
        debug!("pushed '{}' -> '{}'", src, dst);
        Ok(dst)
    }

    fn pull(&self, remote_path: &str) -> Result<String> {
        // hdc cannot receive empty files; `du` reports their size as 0.
        let usage = self
            .output(&["shell", "du", remote_path])
            .with_context(|| format!("sizing device file '{}'", remote_path))?;
        if usage.split_whitespace().next() == Some("0") {
            return Ok(String::new());
        }

        let scratch = TempDir::new().context("creating pull directory")?;
        let local = scratch.path().join("pulled");
        let local_str = local.to_string_lossy();

        let received = self.remote(
            &["file", "recv", remote_path, &local_str],
            &Self::transfer_policy(),
        )?;
        if !received.success() {
            bail!("pulling device file '{}' failed", remote_path);
        }

        let bytes = fs::read(&local).with_context(|| format!("reading pulled '{}'", remote_path))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn connect(&self) -> Result<()> {
        let outcome = self.remote(&["tconn"], &RetryPolicy::once(COMMAND_TIMEOUT))?;
        if !outcome.success() {
            warn!("hdc tconn failed: {}", outcome.output.trim());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::{calls, fake_bridge};
    use tempfile::TempDir;

    const SCRIPT: &str = r#"
case "$1 $2" in
  "file send") echo "FileTransfer finish Size:10" ;;
  "file recv") printf 'device text\n' > "$4"; echo "FileTransfer finish Size:12" ;;
  "shell du") echo "SIZE	$3" ;;
esac
"#;

    fn hdc_with_size(dir: &Path, size: &str) -> Hdc {
        let program = fake_bridge(dir, "hdc", &SCRIPT.replace("SIZE", size));
        Hdc::new(program.to_string_lossy(), "/data/local/tmp/Output")
    }

    #[test]
    fn test_push_creates_dir_sends_and_marks_executable() {
        let temp = TempDir::new().unwrap();
        let hdc = hdc_with_size(temp.path(), "8");

        let dst = hdc.push(Path::new("/work/build/test.out")).unwrap();

        assert_eq!(dst, "/data/local/tmp/Output/work/build/test.out");
        assert_eq!(
            calls(temp.path()),
            vec![
                "shell mkdir -p /data/local/tmp/Output/work/build",
                "file send /work/build/test.out /data/local/tmp/Output/work/build/test.out",
                "shell chmod +x /data/local/tmp/Output/work/build/test.out",
            ]
        );
    }

    #[test]
    fn test_pull_skips_empty_files() {
        let temp = TempDir::new().unwrap();
        let hdc = hdc_with_size(temp.path(), "0");

        let text = hdc.pull("/data/local/tmp/Output/t.stderr").unwrap();

        assert_eq!(text, "");
        let log = calls(temp.path());
        assert_eq!(log.len(), 1);
        assert!(log[0].starts_with("shell du"));
    }

    #[test]
    fn test_pull_reads_received_file() {
        let temp = TempDir::new().unwrap();
        let hdc = hdc_with_size(temp.path(), "4");

        let text = hdc.pull("/data/local/tmp/Output/t.stdout").unwrap();

        assert_eq!(text, "device text\n");
        let log = calls(temp.path());
        assert_eq!(log.len(), 2);
        assert!(log[1].starts_with("file recv /data/local/tmp/Output/t.stdout "));
    }

    #[test]
    fn test_failed_push_is_an_error() {
        let temp = TempDir::new().unwrap();
        let program = fake_bridge(temp.path(), "hdc", "echo '[Fail]Not match target founded'");
        let hdc = Hdc::new(program.to_string_lossy(), "/r");

        assert!(hdc.push(Path::new("/x/y")).is_err());
        let sends = calls(temp.path())
            .iter()
            .filter(|line| line.starts_with("file send"))
            .count();
        assert_eq!(sends, TRANSFER_ATTEMPTS as usize);
    }

    #[test]
    fn test_connection_args_prefix_every_call() {
        let temp = TempDir::new().unwrap();
        let program = fake_bridge(temp.path(), "hdc", "echo Connect OK");
        let hdc = Hdc::new(program.to_string_lossy(), "/r")
            .with_server("10.0.0.2:8710")
            .with_utid("ABC");

        hdc.connect().unwrap();
        let outcome = hdc.shell("echo hi", "Connect OK").unwrap();

        assert!(outcome.success());
        assert_eq!(
            calls(temp.path()),
            vec!["-s 10.0.0.2:8710 -t ABC tconn", "-s 10.0.0.2:8710 -t ABC shell echo hi"]
        );
    }
}
