use anyhow::{bail, Result};

mod commands;

fn usage() -> &'static str {
    "Usage:\n  \
     toolchain-harness compile <compiler> [args...]\n  \
     toolchain-harness host-compile <compiler> [args...]\n  \
     toolchain-harness tool <program> [args...]\n  \
     toolchain-harness device <push <file>|pull <remote-path>|shell [--expect <text>] <command...>|connect|lit-config>\n  \
     toolchain-harness build <ohos-aarch64|ohos-arm|linux-aarch64> <config.toml>\n  \
     toolchain-harness build-defines <profile> <config.toml>\n  \
     toolchain-harness flags <cflags|ldflags> <out-dir> [extra-flags...]\n  \
     toolchain-harness abi gen <elf> <abi-file> [--suppressions=<f>] [--debug-info-dir=<d>] [--headers-dir=<d>] [--no-show-locs] [--load-all-types] [--annotate] [--timeout=<secs>]\n  \
     toolchain-harness abi compare <file1> <file2> [--suppressions=<f>] [--debug-info-dir1=<d>] [--debug-info-dir2=<d>] [--headers-dir1=<d>] [--headers-dir2=<d>] [--show-size-offset=<bytes|bits|hex|dec>] [--timeout=<secs>]\n  \
     toolchain-harness checksec <dir> <output-dir> [--<item>=<expected>...] [--checksec=<program>]\n  \
     toolchain-harness perm <generate|so-generate|check|so-check> <dir> <checklist>\n  \
     toolchain-harness perm compare <reference-dir> <dir>\n  \
     toolchain-harness perm check-defaults <clang-dir> <ndk-dir>"
}

fn main() -> Result<()> {
    toolchain_harness::init_logging("info");
    let args: Vec<String> = std::env::args().skip(1).collect();

    let code = match args.as_slice() {
        [cmd, compiler, rest @ ..] if cmd == "compile" => commands::compile(compiler, rest, false)?,
        [cmd, compiler, rest @ ..] if cmd == "host-compile" => commands::compile(compiler, rest, true)?,
        [cmd, program, rest @ ..] if cmd == "tool" => toolchain_harness::runner::run_tool(program, rest)?,
        [cmd, rest @ ..] if cmd == "device" => commands::device(rest)?,
        [cmd, profile, config] if cmd == "build" => commands::build(profile, config)?,
        [cmd, profile, config] if cmd == "build-defines" => commands::build_defines(profile, config)?,
        [cmd, kind, out_dir, extra @ ..] if cmd == "flags" => commands::flags(kind, out_dir, extra)?,
        [cmd, action, rest @ ..] if cmd == "abi" => commands::abi(action, rest)?,
        [cmd, rest @ ..] if cmd == "checksec" => commands::checksec(rest)?,
        [cmd, action, rest @ ..] if cmd == "perm" => commands::perm(action, rest)?,
        _ => bail!(usage()),
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
