//! Host counterpart of `remote-run`: executes `<argv0>.real` locally.

use anyhow::{Context, Result};
use std::path::PathBuf;
use toolchain_harness::runner::run_on_host;
use toolchain_harness::settings::{env_snapshot, DeviceSettings};

fn main() -> Result<()> {
    let settings = DeviceSettings::from_env()?;
    toolchain_harness::init_logging(if settings.verbose { "debug" } else { "off" });

    let mut args = std::env::args();
    let argv0 = args.next().map(PathBuf::from).context("missing argv[0]")?;
    let rest: Vec<String> = args.collect();

    let code = run_on_host(&argv0, &rest, &env_snapshot(), &settings)?;
    std::process::exit(code);
}
