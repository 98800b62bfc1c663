//! Device settings read from the environment.
//!
//! lit runs the wrappers with everything they need in the environment, so
//! the runner binaries never take device options on the command line.

use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_REMOTE_ROOT: &str = "/data/local/tmp/Output";

/// Symbolizer name used on the device when `LLVM_SYMBOLIZER_PATH` is unset.
pub const DEVICE_SYMBOLIZER: &str = "llvm-symbolizer-aarch64";

const VERBOSE_VARS: &[&str] = &["HOS_RUN_VERBOSE", "RUN_VERBOSE", "ANDROID_RUN_VERBOSE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeKind {
    Hdc,
    Adb,
}

impl BridgeKind {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "hdc" => Ok(Self::Hdc),
            "adb" => Ok(Self::Adb),
            other => bail!("unknown REMOTE_BRIDGE '{}' (expected hdc or adb)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub bridge: BridgeKind,
    pub hdc: String,
    pub hdc_server: Option<String>,
    pub hdc_utid: Option<String>,
    pub adb: String,
    pub android_serial: Option<String>,
    pub remote_root: String,
    pub dyn_linker: Option<String>,
    pub symbolizer: Option<String>,
    pub compiler_rt_include: Option<PathBuf>,
    pub verbose: bool,
}

impl DeviceSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let bridge = match get("REMOTE_BRIDGE") {
            Some(raw) => BridgeKind::parse(&raw)?,
            None => BridgeKind::Hdc,
        };

        Ok(Self {
            bridge,
            hdc: get("HDC").unwrap_or_else(|| "hdc".to_string()),
            hdc_server: get("HDC_SERVER_IP_PORT"),
            hdc_utid: get("HDC_UTID"),
            adb: get("ADB").unwrap_or_else(|| "adb".to_string()),
            android_serial: get("ANDROID_SERIAL"),
            remote_root: get("OHOS_REMOTE_TMP_DIR")
                .unwrap_or_else(|| DEFAULT_REMOTE_ROOT.to_string()),
            dyn_linker: get("OHOS_REMOTE_DYN_LINKER"),
            symbolizer: get("LLVM_SYMBOLIZER_PATH"),
            compiler_rt_include: get("COMPILER_RT_INCLUDE_DIR").map(PathBuf::from),
            verbose: VERBOSE_VARS
                .iter()
                .any(|key| lookup(key).as_deref() == Some("1")),
        })
    }

    /// Symbolizer path as seen from the device.
    pub fn device_symbolizer(&self) -> String {
        match &self.symbolizer {
            Some(path) => path.clone(),
            None => format!(
                "{}/{}",
                self.remote_root.trim_end_matches('/'),
                DEVICE_SYMBOLIZER
            ),
        }
    }
}

/// Snapshot of the process environment, skipping non-UTF-8 entries.
pub fn env_snapshot() -> BTreeMap<String, String> {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}
