//! Device bridge abstraction over `hdc` (OHOS) and `adb` (Android).
//!
//! Every host path has a fixed twin on the device: the absolute host path,
//! normalized, re-rooted under the remote temp directory. Tests built on the
//! host therefore find their inputs at a predictable location after a push.

pub mod adb;
pub mod hdc;
mod retry;

pub use adb::Adb;
pub use hdc::Hdc;
pub use retry::{run_with_retry, RemoteOutcome, RetryPolicy, FAILURE_SENTINEL};

use crate::settings::{BridgeKind, DeviceSettings};
use anyhow::{Context, Result};
use std::path::{Component, Path};
use std::time::Duration;

/// Command strings lit substitutes into test RUN lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LitCommands {
    pub push: String,
    pub remove: String,
    pub shell: String,
}

/// A host-to-device command channel.
pub trait DeviceBridge {
    /// Short tool name used in diagnostics.
    fn tool_name(&self) -> &'static str;

    fn program(&self) -> &str;

    /// Connection selection flags that follow the program.
    fn connection_args(&self) -> Vec<String>;

    fn remote_root(&self) -> &str;

    /// Timeout for generic commands.
    fn command_timeout(&self) -> Duration;

    /// Verb that uploads a file, as it appears after the prefix.
    fn push_verb(&self) -> &'static str;

    fn push(&self, local: &Path) -> Result<String>;

    fn pull(&self, remote_path: &str) -> Result<String>;

    fn connect(&self) -> Result<()>;

    fn command_prefix(&self) -> Vec<String> {
        let mut prefix = vec![self.program().to_string()];
        prefix.extend(self.connection_args());
        prefix
    }

    fn remote(&self, args: &[&str], policy: &RetryPolicy) -> Result<RemoteOutcome> {
        run_with_retry(self.tool_name(), &self.command_prefix(), args, policy)
    }

    /// Single-attempt shell command, successful only if `expect` shows up in the output.
    fn shell(&self, command: &str, expect: &str) -> Result<RemoteOutcome> {
        self.remote(
            &["shell", command],
            &RetryPolicy::once(self.command_timeout()).expect(expect),
        )
    }

    fn device_path(&self, host: &Path) -> Result<String> {
        host_to_device_path(self.remote_root(), host)
    }

    fn lit_commands(&self) -> LitCommands {
        let prefix = self.command_prefix().join(" ");
        LitCommands {
            push: format!("{} {} ", prefix, self.push_verb()),
            remove: format!("{} shell rm ", prefix),
            shell: format!("{} shell ", prefix),
        }
    }
}

/// Pick the backend named by `REMOTE_BRIDGE`.
pub fn from_settings(settings: &DeviceSettings) -> Box<dyn DeviceBridge> {
    match settings.bridge {
        BridgeKind::Hdc => Box::new(Hdc::from_settings(settings)),
        BridgeKind::Adb => Box::new(Adb::from_settings(settings)),
    }
}

/// Device path for `host`, made absolute against the current directory.
pub fn host_to_device_path(remote_root: &str, host: &Path) -> Result<String> {
    if host.is_absolute() {
        return Ok(device_path_for_absolute(remote_root, host));
    }
    let cwd = std::env::current_dir().context("resolving current directory")?;
    Ok(device_path_for_absolute(remote_root, &cwd.join(host)))
}

/// Lexical mapping of an absolute host path; symlinks are not resolved.
pub fn device_path_for_absolute(remote_root: &str, absolute: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    for component in absolute.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }

    let root = remote_root.trim_end_matches('/');
    if parts.is_empty() {
        return if root.is_empty() { "/".to_string() } else { root.to_string() };
    }
    format!("{}/{}", root, parts.join("/"))
}

/// Parent directory of a device path.
pub(crate) fn remote_dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{DeviceBridge, RemoteOutcome, RetryPolicy};
    use anyhow::Result;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    /// In-memory bridge that records traffic instead of talking to a device.
    #[derive(Default)]
    pub struct RecordingBridge {
        pub pushed: RefCell<Vec<PathBuf>>,
        pub commands: RefCell<Vec<Vec<String>>>,
        /// Canned `pull` results keyed by device path.
        pub files: HashMap<String, String>,
    }

    impl DeviceBridge for RecordingBridge {
        fn tool_name(&self) -> &'static str {
            "hdc"
        }

        fn program(&self) -> &str {
            "hdc"
        }

        fn connection_args(&self) -> Vec<String> {
            Vec::new()
        }

        fn remote_root(&self) -> &str {
            "/data/local/tmp/Output"
        }

        fn command_timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        fn push_verb(&self) -> &'static str {
            "file send"
        }

        fn push(&self, local: &Path) -> Result<String> {
            self.pushed.borrow_mut().push(local.to_path_buf());
            self.device_path(local)
        }

        fn pull(&self, remote_path: &str) -> Result<String> {
            Ok(self.files.get(remote_path).cloned().unwrap_or_default())
        }

        fn connect(&self) -> Result<()> {
            Ok(())
        }

        fn remote(&self, args: &[&str], _policy: &RetryPolicy) -> Result<RemoteOutcome> {
            self.commands
                .borrow_mut()
                .push(args.iter().map(|a| a.to_string()).collect());
            Ok(RemoteOutcome {
                code: 0,
                output: String::new(),
            })
        }
    }

    /// Write an executable shell script standing in for a bridge tool.
    /// Every invocation appends its arguments to `<dir>/calls`.
    pub fn fake_bridge(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let calls = dir.join("calls");
        fs::write(
            &path,
            format!("#!/bin/sh\necho \"$*\" >> '{}'\n{}\n", calls.display(), body),
        )
        .unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    pub fn calls(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join("calls"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_device_path_mapping() {
        let root = "/data/local/tmp/Output";
        assert_eq!(
            device_path_for_absolute(root, Path::new("/home/u/build/t/a.out")),
            "/data/local/tmp/Output/home/u/build/t/a.out"
        );
        assert_eq!(
            device_path_for_absolute(root, Path::new("/home/u/./build/../t//x")),
            "/data/local/tmp/Output/home/u/t/x"
        );
        assert_eq!(
            device_path_for_absolute("/data/tmp/", Path::new("/a")),
            "/data/tmp/a"
        );
        assert_eq!(device_path_for_absolute(root, Path::new("/")), root);
    }

    #[test]
    fn test_relative_paths_use_cwd() {
        let cwd = std::env::current_dir().unwrap();
        let expected = device_path_for_absolute("/r", &cwd.join("x/y"));
        assert_eq!(host_to_device_path("/r", &PathBuf::from("x/y")).unwrap(), expected);
    }

    #[test]
    fn test_remote_dirname() {
        assert_eq!(remote_dirname("/data/local/tmp/a.out"), "/data/local/tmp");
        assert_eq!(remote_dirname("/a.out"), "/");
        assert_eq!(remote_dirname("a.out"), ".");
    }

    #[test]
    fn test_lit_commands() {
        let hdc = Hdc::new("hdc", "/data/local/tmp/Output")
            .with_server("127.0.0.1:8710")
            .with_utid("FMR0223");
        let lit = hdc.lit_commands();
        assert_eq!(lit.push, "hdc -s 127.0.0.1:8710 -t FMR0223 file send ");
        assert_eq!(lit.remove, "hdc -s 127.0.0.1:8710 -t FMR0223 shell rm ");
        assert_eq!(lit.shell, "hdc -s 127.0.0.1:8710 -t FMR0223 shell ");

        let adb = Adb::new("adb", "/data/local/tmp/Output").with_serial("emulator-5554");
        let lit = adb.lit_commands();
        assert_eq!(lit.push, "adb -s emulator-5554 push ");
        assert_eq!(lit.shell, "adb -s emulator-5554 shell ");
    }

    #[test]
    fn test_from_settings_selects_backend() {
        let settings =
            DeviceSettings::from_lookup(|key| (key == "REMOTE_BRIDGE").then(|| "adb".to_string()))
                .unwrap();
        assert_eq!(from_settings(&settings).tool_name(), "adb");

        let settings = DeviceSettings::from_lookup(|_| None).unwrap();
        assert_eq!(from_settings(&settings).tool_name(), "hdc");
    }
}
