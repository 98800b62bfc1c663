//! Fixed-budget retry loop for device bridge commands.
//!
//! Bridge tools report transfer problems in their output rather than their
//! exit status, so an attempt only counts as successful when the process
//! exits 0 *and* its combined output contains an expected marker.

use crate::process::Cmd;
use anyhow::{bail, Context, Result};
use log::debug;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Code returned once every attempt has failed.
pub const FAILURE_SENTINEL: i32 = 255;

/// Retry configuration for a single bridge command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Per-attempt timeout. Expiry is an error, not a failed attempt.
    pub timeout: Duration,
    /// Substring the combined output must contain.
    pub expect: String,
}

impl RetryPolicy {
    pub fn new(attempts: u32, timeout: Duration) -> Self {
        Self {
            attempts,
            timeout,
            expect: String::new(),
        }
    }

    pub fn once(timeout: Duration) -> Self {
        Self::new(1, timeout)
    }

    pub fn expect(mut self, marker: impl Into<String>) -> Self {
        self.expect = marker.into();
        self
    }
}

/// Result of a bridge command after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOutcome {
    /// 0 on success, [`FAILURE_SENTINEL`] when attempts ran out.
    pub code: i32,
    /// Combined output of the last attempt.
    pub output: String,
}

impl RemoteOutcome {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Run `prefix + args` until it succeeds or the attempt budget is spent.
pub fn run_with_retry(
    tool: &str,
    prefix: &[String],
    args: &[&str],
    policy: &RetryPolicy,
) -> Result<RemoteOutcome> {
    let Some((program, connection)) = prefix.split_first() else {
        bail!("{} command prefix is empty", tool);
    };

    let capture = NamedTempFile::new().context("creating bridge output capture")?;
    let attempts = policy.attempts.max(1);
    let mut last_output = String::new();

    for attempt in 1..=attempts {
        let start = capture
            .as_file()
            .metadata()
            .context("reading bridge output capture")?
            .len();
        let sink = capture
            .as_file()
            .try_clone()
            .context("duplicating bridge output capture")?;

        let result = Cmd::new(program)
            .args(connection)
            .args(args)
            .timeout(policy.timeout)
            .output_to(sink)
            .allow_fail()
            .run()?;

        let output = read_from(capture.path(), start)?;
        if result.success() && output.contains(&policy.expect) {
            debug!("{} {:?} succeeded on attempt {}", tool, args, attempt);
            return Ok(RemoteOutcome { code: 0, output });
        }

        debug!(
            "{} {:?} failed on attempt {}/{} ({})",
            tool, args, attempt, attempts, result.status
        );
        last_output = output;
    }

    println!("{} command failed {:?}", tool, args);
    println!("{}", capture.path().display());
    println!("{}", read_from(capture.path(), 0)?);

    Ok(RemoteOutcome {
        code: FAILURE_SENTINEL,
        output: last_output,
    })
}

fn read_from(path: &Path, offset: u64) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
    file.seek(SeekFrom::Start(offset))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .with_context(|| format!("reading '{}'", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
