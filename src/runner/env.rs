//! Sanitizer environment for wrapped test runs.
//!
//! Every sanitizer runtime gets `abort_on_error=0` so crashes surface as exit
//! codes the runner can report, and a symbolizer so reports carry source
//! locations. On the device, host paths inside the options are replaced by
//! their device twins.

use crate::bridge::DeviceBridge;
use crate::settings::DeviceSettings;
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

pub const SANITIZERS: &[&str] = &[
    "HWASAN", "ASAN", "LSAN", "MEMPROF", "MSAN", "TSAN", "UBSAN", "SCUDO",
];

const SUPPRESSIONS_KEY: &str = "suppressions=";

/// How host paths inside sanitizer options are treated.
pub enum PathMapping<'a> {
    /// Rewrite existing host paths to device paths, pushing suppression files.
    Device(&'a dyn DeviceBridge),
    /// Leave paths alone.
    Host,
}

impl PathMapping<'_> {
    fn map(&self, path: &str, push: bool) -> Result<String> {
        let PathMapping::Device(bridge) = self else {
            return Ok(path.to_string());
        };
        let host = Path::new(path);
        if !host.exists() {
            return Ok(path.to_string());
        }
        if push {
            bridge.push(host)?;
        }
        bridge.device_path(host)
    }

    fn is_device(&self) -> bool {
        matches!(self, PathMapping::Device(_))
    }
}

/// Build the `KEY=value` prefix placed in front of the test binary.
pub fn sanitizer_env(
    env: &BTreeMap<String, String>,
    settings: &DeviceSettings,
    mapping: &PathMapping<'_>,
) -> Result<String> {
    let mut env = env.clone();
    let mut assignments = Vec::new();

    let symbolizer = if mapping.is_device() {
        Some(settings.device_symbolizer())
    } else {
        settings.symbolizer.clone()
    };

    for sanitizer in SANITIZERS {
        env.entry(format!("{}_OPTIONS", sanitizer)).or_default();
        if let Some(symbolizer) = &symbolizer {
            assignments.push(format!("{}_SYMBOLIZER_PATH={}", sanitizer, symbolizer));
        }
    }

    // The OHOS loader ignores RPATH.
    if mapping.is_device() {
        assignments.push(format!("LD_LIBRARY_PATH={}", settings.remote_root));
    }

    for (key, value) in &env {
        let san_opt = key.ends_with("SAN_OPTIONS");
        let forwarded = san_opt
            || key == "ASAN_ACTIVATION_OPTIONS"
            || key == "SCUDO_OPTIONS"
            || key == "LD_LIBRARY_PATH";
        if !forwarded {
            continue;
        }

        let mut value = value.clone();
        if san_opt {
            value.push_str(":abort_on_error=0");
        }

        let value = match key.as_str() {
            "TSAN_OPTIONS" | "UBSAN_OPTIONS" => map_suppressions(&value, mapping)?,
            "LD_LIBRARY_PATH" => map_search_path(&value, mapping)?,
            _ => value,
        };
        assignments.push(format!("{}=\"{}\"", key, value));
    }

    Ok(assignments.join(" "))
}

fn map_suppressions(value: &str, mapping: &PathMapping<'_>) -> Result<String> {
    let options = value
        .split(':')
        .map(|option| -> Result<String> {
            match option.find(SUPPRESSIONS_KEY) {
                Some(idx) if idx + SUPPRESSIONS_KEY.len() < option.len() => {
                    let (head, path) = option.split_at(idx + SUPPRESSIONS_KEY.len());
                    Ok(format!("{}{}", head, mapping.map(path, true)?))
                }
                _ => Ok(option.to_string()),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(options.join(":"))
}

fn map_search_path(value: &str, mapping: &PathMapping<'_>) -> Result<String> {
    let entries = value
        .split(':')
        .map(|entry| {
            if entry.is_empty() {
                Ok(String::new())
            } else {
                mapping.map(entry, false)
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(entries.join(":"))
}
