//! Test runner plumbing for lit.
//!
//! The compile wrappers build a test, ship it to the device and replace the
//! local executable with a symlink to `remote-run` (or `host-run`). When lit
//! later executes the "test binary" it actually starts the runner, which
//! finds the real program from its own `argv[0]`.

pub mod env;
pub mod run;

pub use env::{sanitizer_env, PathMapping};
pub use run::{device_command, host_command, run_on_device, run_on_host};

use crate::bridge::DeviceBridge;
use crate::process::{exit_code, Cmd};
use crate::settings::DeviceSettings;
use anyhow::{bail, Context, Result};
use log::debug;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEVICE_RUNNER: &str = "remote-run";
pub const HOST_RUNNER: &str = "host-run";

/// What a compiler invocation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Executable,
    Shared,
    Object,
}

/// Output path and kind of a compiler command line.
pub fn output_from_args(args: &[String]) -> (Option<PathBuf>, OutputKind) {
    let mut output = None;
    let mut kind = OutputKind::Executable;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-o" => output = iter.next().map(PathBuf::from),
            "-shared" => kind = OutputKind::Shared,
            "-c" | "-S" | "-E" => kind = OutputKind::Object,
            other => {
                if let Some(path) = other.strip_prefix("-o").filter(|p| !p.is_empty()) {
                    output = Some(PathBuf::from(path));
                }
            }
        }
    }

    (output, kind)
}

/// `<path>.real`, where the wrapped executable lives after linking.
pub fn real_path(path: &Path) -> PathBuf {
    let mut real = OsString::from(path.as_os_str());
    real.push(".real");
    PathBuf::from(real)
}

/// Path of a binary installed next to the running one.
pub fn sibling_binary(name: &str) -> Result<PathBuf> {
    let exe = std::env::current_exe().context("locating current executable")?;
    let dir = exe
        .parent()
        .with_context(|| format!("resolving directory of '{}'", exe.display()))?;
    Ok(dir.join(name))
}

/// Compile a test for the device: build, push, and swap in the runner.
pub fn compile_for_device(
    compiler_args: &[String],
    settings: &DeviceSettings,
    bridge: &dyn DeviceBridge,
    runner: &Path,
) -> Result<i32> {
    let (output, kind) = output_from_args(compiler_args);
    let Some(output) = output else {
        return Ok(no_output());
    };

    let code = run_compiler(compiler_args, &linker_args(settings))?;
    if code != 0 {
        return Ok(code);
    }

    if matches!(kind, OutputKind::Executable | OutputKind::Shared) {
        bridge.push(&output)?;
    }
    if kind == OutputKind::Executable {
        install_runner_link(&output, runner)?;
    }
    Ok(0)
}

/// Compile a test for the host; nothing is pushed.
pub fn compile_for_host(
    compiler_args: &[String],
    settings: &DeviceSettings,
    runner: &Path,
) -> Result<i32> {
    let (output, kind) = output_from_args(compiler_args);
    let Some(output) = output else {
        return Ok(no_output());
    };

    let mut extra = linker_args(settings);
    if let Some(include) = &settings.compiler_rt_include {
        extra.push(format!("-I{}", include.display()));
    }

    let code = run_compiler(compiler_args, &extra)?;
    if code != 0 {
        return Ok(code);
    }

    if kind == OutputKind::Executable {
        install_runner_link(&output, runner)?;
    }
    Ok(0)
}

/// Run a host tool on a wrapped test, substituting `<arg>.real` for wrapped executables.
pub fn run_tool(program: &str, args: &[String]) -> Result<i32> {
    let mapped: Vec<String> = args.iter().map(|arg| map_tool_arg(arg)).collect();
    let status = Cmd::new(program).args(&mapped).allow_fail().status()?;
    Ok(exit_code(&status))
}

pub fn map_tool_arg(arg: &str) -> String {
    if arg.starts_with('-') {
        return arg.to_string();
    }
    let path = Path::new(arg);
    if path.exists() && real_path(path).exists() {
        return format!("{}.real", arg);
    }
    arg.to_string()
}

/// Replace a linked executable with a symlink to `runner`.
pub fn install_runner_link(output: &Path, runner: &Path) -> Result<()> {
    let real = real_path(output);
    fs::rename(output, &real).with_context(|| {
        format!("renaming '{}' to '{}'", output.display(), real.display())
    })?;
    std::os::unix::fs::symlink(runner, output).with_context(|| {
        format!(
            "linking '{}' to runner '{}'",
            output.display(),
            runner.display()
        )
    })?;
    debug!("{} -> {}", output.display(), runner.display());
    Ok(())
}

/// Die with SIGABRT so `not --crash` sees a crash.
pub fn raise_abort() -> ! {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    std::process::abort()
}

fn linker_args(settings: &DeviceSettings) -> Vec<String> {
    settings
        .dyn_linker
        .iter()
        .map(|linker| format!("-Wl,--dynamic-linker={}", linker))
        .collect()
}

fn run_compiler(args: &[String], extra: &[String]) -> Result<i32> {
    let Some((compiler, rest)) = args.split_first() else {
        bail!("no compiler given");
    };
    let status = Cmd::new(compiler)
        .args(rest)
        .args(extra)
        .allow_fail()
        .status()?;
    Ok(exit_code(&status))
}

fn no_output() -> i32 {
    println!("No output file name!");
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::RecordingBridge;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn settings(vars: &[(&str, &str)]) -> DeviceSettings {
        DeviceSettings::from_lookup(|key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    #[test]
    fn test_output_from_args() {
        assert_eq!(
            output_from_args(&args(&["clang", "a.c", "-o", "a.out"])),
            (Some(PathBuf::from("a.out")), OutputKind::Executable)
        );
        assert_eq!(
            output_from_args(&args(&["clang", "-oa.o", "-c", "a.c"])),
            (Some(PathBuf::from("a.o")), OutputKind::Object)
        );
        assert_eq!(
            output_from_args(&args(&["clang", "-shared", "-o", "libx.so", "x.c"])),
            (Some(PathBuf::from("libx.so")), OutputKind::Shared)
        );
        assert_eq!(
            output_from_args(&args(&["clang", "-E", "a.c"])),
            (None, OutputKind::Object)
        );
        assert_eq!(output_from_args(&args(&["clang", "-o"])).0, None);
    }

    #[test]
    fn test_compile_without_output() {
        let bridge = RecordingBridge::default();
        let code = compile_for_device(
            &args(&["true", "a.c"]),
            &settings(&[]),
            &bridge,
            Path::new("/bin/remote-run"),
        )
        .unwrap();
        assert_eq!(code, 1);
        assert!(bridge.pushed.borrow().is_empty());
    }

    /// Compiler stand-in: `sh <script> -o <out> ...` so that `$2` is the output.
    fn fake_compiler(dir: &Path, body: &str, out: &Path, extra: &[&str]) -> Vec<String> {
        let script = dir.join("cc.sh");
        fs::write(&script, body).unwrap();
        let mut list = vec![
            "sh".to_string(),
            script.to_string_lossy().into_owned(),
            "-o".to_string(),
            out.to_string_lossy().into_owned(),
        ];
        list.extend(extra.iter().map(|s| s.to_string()));
        list
    }

    #[test]
    fn test_compiler_failure_propagates() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("t.out");
        let bridge = RecordingBridge::default();
        let compiler_args = fake_compiler(temp.path(), "exit 7", &out, &[]);

        let code =
            compile_for_device(&compiler_args, &settings(&[]), &bridge, Path::new("/x")).unwrap();

        assert_eq!(code, 7);
        assert!(bridge.pushed.borrow().is_empty());
    }

    #[test]
    fn test_executable_is_pushed_and_linked() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("t.out");
        let runner = temp.path().join(DEVICE_RUNNER);
        fs::write(&runner, "").unwrap();
        let bridge = RecordingBridge::default();
        let compiler_args = fake_compiler(temp.path(), "echo binary > \"$2\"", &out, &["t.c"]);

        let code = compile_for_device(&compiler_args, &settings(&[]), &bridge, &runner).unwrap();

        assert_eq!(code, 0);
        assert_eq!(bridge.pushed.borrow().as_slice(), &[out.clone()]);
        assert_eq!(fs::read_link(&out).unwrap(), runner);
        assert_eq!(fs::read_to_string(real_path(&out)).unwrap(), "binary\n");
    }

    #[test]
    fn test_shared_library_is_pushed_not_linked() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("libt.so");
        let bridge = RecordingBridge::default();
        let compiler_args = fake_compiler(temp.path(), ": > \"$2\"", &out, &["-shared"]);

        let code = compile_for_device(&compiler_args, &settings(&[]), &bridge, Path::new("/x")).unwrap();

        assert_eq!(code, 0);
        assert_eq!(bridge.pushed.borrow().len(), 1);
        assert!(!out.is_symlink());
    }

    #[test]
    fn test_host_compile_appends_flags() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("t.out");
        let seen = temp.path().join("args");
        let body = format!("echo \"$@\" > '{}'\n: > \"$2\"", seen.display());
        let compiler_args = fake_compiler(temp.path(), &body, &out, &[]);
        let settings = settings(&[
            ("OHOS_REMOTE_DYN_LINKER", "/lib/ld-musl-aarch64.so.1"),
            ("COMPILER_RT_INCLUDE_DIR", "/src/compiler-rt/include"),
        ]);

        let code = compile_for_host(&compiler_args, &settings, Path::new("/x/host-run")).unwrap();

        assert_eq!(code, 0);
        let recorded = fs::read_to_string(&seen).unwrap();
        assert!(recorded.contains("-Wl,--dynamic-linker=/lib/ld-musl-aarch64.so.1"));
        assert!(recorded.contains("-I/src/compiler-rt/include"));
        assert_eq!(fs::read_link(&out).unwrap(), PathBuf::from("/x/host-run"));
    }

    #[test]
    fn test_object_output_is_left_alone() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("t.o");
        let bridge = RecordingBridge::default();
        let compiler_args = fake_compiler(temp.path(), ": > \"$2\"", &out, &["-c", "t.c"]);

        let code = compile_for_device(&compiler_args, &settings(&[]), &bridge, Path::new("/x")).unwrap();

        assert_eq!(code, 0);
        assert!(bridge.pushed.borrow().is_empty());
        assert!(!out.is_symlink());
    }

    #[test]
    fn test_map_tool_arg() {
        let temp = TempDir::new().unwrap();
        let wrapped = temp.path().join("t.out");
        let plain = temp.path().join("input.txt");
        fs::write(&wrapped, "").unwrap();
        fs::write(real_path(&wrapped), "").unwrap();
        fs::write(&plain, "").unwrap();

        let wrapped_str = wrapped.to_string_lossy().into_owned();
        let plain_str = plain.to_string_lossy().into_owned();

        assert_eq!(map_tool_arg(&wrapped_str), format!("{}.real", wrapped_str));
        assert_eq!(map_tool_arg(&plain_str), plain_str);
        assert_eq!(map_tool_arg("-v"), "-v");
        assert_eq!(map_tool_arg("missing"), "missing");
    }

    #[test]
    fn test_run_tool_exit_code() {
        assert_eq!(run_tool("sh", &args(&["-c", "exit 4"])).unwrap(), 4);
    }
}
