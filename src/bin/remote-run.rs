//! Stands in for a test executable: lit invokes this through the link the
//! compile wrapper left at the test's output path.

use anyhow::{Context, Result};
use std::path::PathBuf;
use toolchain_harness::bridge;
use toolchain_harness::runner::run_on_device;
use toolchain_harness::settings::{env_snapshot, DeviceSettings};

fn main() -> Result<()> {
    let settings = DeviceSettings::from_env()?;
    toolchain_harness::init_logging(if settings.verbose { "debug" } else { "off" });

    let mut args = std::env::args();
    let argv0 = args.next().map(PathBuf::from).context("missing argv[0]")?;
    let rest: Vec<String> = args.collect();

    let bridge = bridge::from_settings(&settings);
    let code = run_on_device(&argv0, &rest, &env_snapshot(), &settings, bridge.as_ref())?;
    std::process::exit(code);
}
