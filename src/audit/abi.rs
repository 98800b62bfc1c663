//! ABI dumps and comparisons through libabigail's `abidw` and `abidiff`.

use crate::process::Cmd;
use anyhow::Result;
use log::{error, info, warn};
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const COMPARE_FLAGS: &[&str] = &[
    "--no-corpus-path",
    "--deleted-fns",
    "--drop-private-types",
    "--changed-fns",
    "--added-fns",
    "--deleted-vars",
    "--changed-vars",
    "--added-vars",
    "--harmless",
    "--no-redundant",
];

/// `abidw` invocation writing the ABI of `elf` to `abi_file`.
#[derive(Debug, Clone, Default)]
pub struct AbiDump {
    pub elf: String,
    pub abi_file: String,
    pub suppressions: Option<String>,
    pub debug_info_dir: Option<String>,
    pub headers_dir: Option<String>,
    pub no_show_locs: bool,
    pub load_all_types: bool,
    pub annotate: bool,
}

impl AbiDump {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["--no-corpus-path".to_string()];
        push_valued(&mut args, "--suppressions", &self.suppressions);
        push_valued(&mut args, "--debug-info-dir", &self.debug_info_dir);
        push_valued(&mut args, "--headers-dir", &self.headers_dir);
        for (enabled, flag) in [
            (self.no_show_locs, "--no-show-locs"),
            (self.load_all_types, "--load-all-types"),
            (self.annotate, "--annotate"),
        ] {
            if enabled {
                args.push(flag.to_string());
            }
        }
        args.extend(["--out-file".to_string(), self.abi_file.clone(), self.elf.clone()]);
        args
    }

    /// Run `abidw` and return its exit code; its output goes to the log.
    pub fn run(&self, program: &str, timeout: Duration) -> Result<i32> {
        let result = Cmd::new(program)
            .args(self.args())
            .timeout(timeout)
            .allow_fail()
            .run()?;
        if !result.stdout.is_empty() {
            info!("{}", result.stdout.trim_end());
        }
        if !result.stderr.is_empty() {
            error!("{}", result.stderr.trim_end());
        }
        Ok(result.code())
    }
}

/// How `abidiff` prints sizes and offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeOffset {
    #[default]
    Bytes,
    Bits,
    Hex,
    Dec,
}

impl SizeOffset {
    /// Unrecognised spellings fall back to bytes.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "bits" => Self::Bits,
            "hex" | "hexadecimal" => Self::Hex,
            "dec" | "decimal" => Self::Dec,
            _ => Self::Bytes,
        }
    }

    fn flag(self) -> &'static str {
        match self {
            Self::Bytes => "--show-bytes",
            Self::Bits => "--show-bits",
            Self::Hex => "--show-hex",
            Self::Dec => "--show-dec",
        }
    }
}

/// `abidiff` invocation comparing two ABI files or binaries.
#[derive(Debug, Clone, Default)]
pub struct AbiCompare {
    pub first: String,
    pub second: String,
    pub suppressions: Option<String>,
    pub debug_info_dir1: Option<String>,
    pub debug_info_dir2: Option<String>,
    pub headers_dir1: Option<String>,
    pub headers_dir2: Option<String>,
    pub size_offset: Option<SizeOffset>,
}

impl AbiCompare {
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = COMPARE_FLAGS.iter().map(|s| s.to_string()).collect();
        push_valued(&mut args, "--suppressions", &self.suppressions);
        push_valued(&mut args, "--debug-info-dir1", &self.debug_info_dir1);
        push_valued(&mut args, "--debug-info-dir2", &self.debug_info_dir2);
        push_valued(&mut args, "--headers-dir1", &self.headers_dir1);
        push_valued(&mut args, "--headers-dir2", &self.headers_dir2);
        if let Some(size_offset) = self.size_offset {
            args.push(size_offset.flag().to_string());
        }
        args.extend([self.first.clone(), self.second.clone()]);
        args
    }

    /// Run `abidiff`; `true` when it reported differences.
    ///
    /// abidiff's exit status encodes the kind of change, so only its report
    /// is consulted.
    pub fn run(&self, program: &str, timeout: Duration) -> Result<bool> {
        let cmd = Cmd::new(program).args(self.args()).timeout(timeout).allow_fail();
        let line = cmd.command_line();
        let result = cmd.run()?;
        if result.stdout.is_empty() {
            return Ok(false);
        }
        warn!("abidiff reported differences: {}", line);
        warn!("{}", result.stdout.trim_end());
        Ok(true)
    }
}

fn push_valued(args: &mut Vec<String>, flag: &str, value: &Option<String>) {
    if let Some(value) = value {
        args.push(flag.to_string());
        args.push(value.clone());
    }
}
