use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::Path;
use toolchain_harness::bridge::{self, DeviceBridge};
use toolchain_harness::preflight::check_bridge_tool;
use toolchain_harness::runner::{self, DEVICE_RUNNER, HOST_RUNNER};
use toolchain_harness::settings::DeviceSettings;

/// `compile` / `host-compile`: build a test and put the runner in its place.
pub(crate) fn compile(compiler: &str, rest: &[String], host: bool) -> Result<i32> {
    let settings = DeviceSettings::from_env()?;
    let mut compiler_args = vec![compiler.to_string()];
    compiler_args.extend(rest.iter().cloned());

    if host {
        let runner = runner::sibling_binary(HOST_RUNNER)?;
        return runner::compile_for_host(&compiler_args, &settings, &runner);
    }

    let bridge = bridge::from_settings(&settings);
    let runner = runner::sibling_binary(DEVICE_RUNNER)?;
    runner::compile_for_device(&compiler_args, &settings, bridge.as_ref(), &runner)
}

pub(crate) fn device(args: &[String]) -> Result<i32> {
    let settings = DeviceSettings::from_env()?;
    let bridge = bridge::from_settings(&settings);

    match args {
        [cmd] if cmd == "lit-config" => {
            let lit = bridge.lit_commands();
            println!("push={}", lit.push);
            println!("remove={}", lit.remove);
            println!("shell={}", lit.shell);
            println!("remote_root={}", bridge.remote_root());
            Ok(0)
        }
        [cmd] if cmd == "connect" => {
            check_bridge_tool(bridge.program())?;
            bridge.connect()?;
            Ok(0)
        }
        [cmd, file] if cmd == "push" => {
            check_bridge_tool(bridge.program())?;
            let dst = bridge
                .push(Path::new(file))
                .with_context(|| format!("pushing '{}'", file))?;
            println!("{}", dst);
            Ok(0)
        }
        [cmd, remote_path] if cmd == "pull" => {
            check_bridge_tool(bridge.program())?;
            let text = bridge.pull(remote_path)?;
            let mut out = std::io::stdout().lock();
            out.write_all(text.as_bytes()).context("writing pulled file")?;
            out.flush().context("writing pulled file")?;
            Ok(0)
        }
        [cmd, rest @ ..] if cmd == "shell" => {
            let Some((expect, command)) = shell_request(rest) else {
                bail!("{}", SHELL_USAGE);
            };
            check_bridge_tool(bridge.program())?;
            let outcome = bridge.shell(&command, expect)?;
            print!("{}", outcome.output);
            Ok(outcome.code)
        }
        _ => bail!(
            "usage: toolchain-harness device <push <file>|pull <remote-path>|connect|lit-config>\n       {}",
            SHELL_USAGE
        ),
    }
}

const SHELL_USAGE: &str = "usage: toolchain-harness device shell [--expect <text>] <command...>";

/// Split `shell` arguments into the expected output and the command line.
fn shell_request(args: &[String]) -> Option<(&str, String)> {
    let (expect, command) = match args {
        [flag, expect, command @ ..] if flag == "--expect" => (expect.as_str(), command),
        [flag, ..] if flag == "--expect" => return None,
        command => ("", command),
    };
    if command.is_empty() {
        return None;
    }
    Some((expect, command.join(" ")))
}
