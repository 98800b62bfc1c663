//! Android device backend driving the `adb` CLI.

use super::{DeviceBridge, RetryPolicy};
use crate::settings::DeviceSettings;
use anyhow::{bail, Context, Result};
use log::debug;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const TRANSFER_ATTEMPTS: u32 = 5;
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct Adb {
    program: String,
    serial: Option<String>,
    remote_root: String,
}

impl Adb {
    pub fn new(program: impl Into<String>, remote_root: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            serial: None,
            remote_root: remote_root.into(),
        }
    }

    pub fn from_settings(settings: &DeviceSettings) -> Self {
        Self {
            program: settings.adb.clone(),
            serial: settings.android_serial.clone(),
            remote_root: settings.remote_root.clone(),
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }
}

impl DeviceBridge for Adb {
    fn tool_name(&self) -> &'static str {
        "adb"
    }

    fn program(&self) -> &str {
        &self.program
    }

    fn connection_args(&self) -> Vec<String> {
        match &self.serial {
            Some(serial) => vec!["-s".to_string(), serial.clone()],
            None => Vec::new(),
        }
    }

    fn remote_root(&self) -> &str {
        &self.remote_root
    }

    fn command_timeout(&self) -> Duration {
        COMMAND_TIMEOUT
    }

    fn push_verb(&self) -> &'static str {
        "push"
    }

    fn push(&self, local: &Path) -> Result<String> {
        let dst = self.device_path(local)?;
        let src = local.to_string_lossy();

        let pushed = self.remote(
            &["push", &src, &dst],
            &RetryPolicy::new(TRANSFER_ATTEMPTS, TRANSFER_TIMEOUT),
        )?;
        if !pushed.success() {
            bail!("pushing '{}' to device '{}' failed", src, dst);
        }
        debug!("pushed '{}' -> '{}'", src, dst);
        Ok(dst)
    }

    fn pull(&self, remote_path: &str) -> Result<String> {
        let scratch = TempDir::new().context("creating pull directory")?;
        let local = scratch.path().join("pulled");
        let local_str = local.to_string_lossy();

        let pulled = self.remote(
            &["pull", remote_path, &local_str],
            &RetryPolicy::new(TRANSFER_ATTEMPTS, TRANSFER_TIMEOUT),
        )?;
        if !pulled.success() {
            bail!("pulling device file '{}' failed", remote_path);
        }

        let bytes = fs::read(&local).with_context(|| format!("reading pulled '{}'", remote_path))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn connect(&self) -> Result<()> {
        Ok(())
    }
}
