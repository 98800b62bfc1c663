//! Command execution for the external tools this crate drives.
//!
//! Compilers, `hdc`/`adb`, `cmake`, `ninja`, `abidw`, `checksec` and `file`
//! all go through [`Cmd`], so logging, timeouts and exit-status mapping
//! behave the same everywhere.
//!
//! # Example
//!
//! ```rust,ignore
//! use toolchain_harness::process::Cmd;
//! use std::time::Duration;
//!
//! let result = Cmd::new("hdc")
//!     .args(["shell", "ls", "/data/local/tmp"])
//!     .timeout(Duration::from_secs(300))
//!     .allow_fail()
//!     .run()?;
//! println!("{}", result.combined());
//! ```

use anyhow::{bail, Context, Result};
use log::debug;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Output of a finished command.
#[derive(Debug, Clone)]
pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CmdResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, with death by signal reported as `128 + signal`.
    pub fn code(&self) -> i32 {
        exit_code(&self.status)
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Map an exit status to a shell-style exit code.
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Builder for an external command.
#[derive(Debug)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    dir: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
    env_removes: Vec<OsString>,
    timeout: Option<Duration>,
    allow_fail: bool,
    error_msg: Option<String>,
    sink: Option<File>,
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            dir: None,
            envs: Vec::new(),
            env_removes: Vec::new(),
            timeout: None,
            allow_fail: false,
            error_msg: None,
            sink: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn dir(mut self, dir: &Path) -> Self {
        self.dir = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (key, value) in vars {
            self = self.env(key, value);
        }
        self
    }

    pub fn env_remove(mut self, key: impl AsRef<OsStr>) -> Self {
        self.env_removes.push(key.as_ref().to_os_string());
        self
    }

    /// Kill the child and fail once `timeout` has elapsed.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Return the result even when the command exits nonzero.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Send stdout and stderr to `file` instead of capturing them.
    ///
    /// Both streams share the file offset, so output is interleaved in the
    /// order the child wrote it.
    pub fn output_to(mut self, file: File) -> Self {
        self.sink = Some(file);
        self
    }

    /// Printable form of the command line.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| shell_quote(&part.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.dir {
            command.current_dir(dir);
        }
        for key in &self.env_removes {
            command.env_remove(key);
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        command
    }

    /// Run the command and capture its output.
    pub fn run(self) -> Result<CmdResult> {
        let line = self.command_line();
        debug!("[CMD]: {}", line);

        let mut command = self.command();
        command.stdin(Stdio::null());
        match &self.sink {
            Some(file) => {
                let out = file
                    .try_clone()
                    .context("duplicating command output capture")?;
                let err = file
                    .try_clone()
                    .context("duplicating command output capture")?;
                command.stdout(Stdio::from(out)).stderr(Stdio::from(err));
            }
            None => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("spawning `{}`", line))?;
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let status = wait_with_timeout(&mut child, self.timeout, &line)?;
        let result = CmdResult {
            status,
            stdout: join_reader(stdout_reader),
            stderr: join_reader(stderr_reader),
        };

        if !self.allow_fail && !result.success() {
            let msg = self
                .error_msg
                .unwrap_or_else(|| format!("`{}` failed", line));
            bail!("{} ({}): {}", msg, result.status, result.combined().trim());
        }

        Ok(result)
    }

    /// Run the command with inherited stdio and return its exit status.
    pub fn status(self) -> Result<ExitStatus> {
        let line = self.command_line();
        debug!("[CMD]: {}", line);

        let mut child = self
            .command()
            .spawn()
            .with_context(|| format!("spawning `{}`", line))?;
        let status = wait_with_timeout(&mut child, self.timeout, &line)?;

        if !self.allow_fail && !status.success() {
            let msg = self
                .error_msg
                .unwrap_or_else(|| format!("`{}` failed", line));
            bail!("{} ({})", msg, status);
        }

        Ok(status)
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn wait_with_timeout(
    child: &mut Child,
    timeout: Option<Duration>,
    line: &str,
) -> Result<ExitStatus> {
    let Some(timeout) = timeout else {
        return child
            .wait()
            .with_context(|| format!("waiting for `{}`", line));
    };

    let start = Instant::now();
    loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("waiting for `{}`", line))?
        {
            return Ok(status);
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            bail!("`{}` timed out after {:?}", line, timeout);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Quote `arg` for a POSIX shell, leaving plain words untouched.
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Resolve a program on PATH, or check an explicit path.
pub fn ensure_exists(program: &str) -> Result<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        if path.is_file() {
            return Ok(path);
        }
        bail!("required tool not found at '{}'", program);
    }
    which::which(program).with_context(|| format!("required tool '{}' not found in PATH", program))
}
