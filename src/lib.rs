//! Auxiliary tooling for an OHOS build of the LLVM toolchain.
//!
//! - **Device bridge** - `hdc`/`adb` wrappers with push/pull/shell and retry
//! - **Test runners** - compile wrappers plus the `remote-run`/`host-run` binaries lit executes
//! - **Build orchestration** - cross-toolchain CMake/Ninja driving and packaging
//! - **Audits** - ABI dumps and diffs, checksec reports, permission checklists
//!
//! # Architecture
//!
//! ```text
//! toolchain-harness (this crate)
//!     │
//!     ├── process   Cmd builder every external tool goes through
//!     ├── settings  environment-derived device settings
//!     ├── bridge    DeviceBridge trait, hdc and adb backends
//!     ├── runner    compile wrappers, sanitizer env, device/host runners
//!     ├── build     profiles, cmake/ninja, runtime copy, packaging, flags
//!     ├── audit     abidw/abidiff, checksec, permission checklists
//!     ├── options   --key=value parsing for audit subcommands
//!     └── preflight host tool checks
//! ```

pub mod audit;
pub mod bridge;
pub mod build;
pub mod options;
pub mod preflight;
pub mod process;
pub mod runner;
pub mod settings;

pub use bridge::{DeviceBridge, RemoteOutcome, RetryPolicy};
pub use process::{Cmd, CmdResult};
pub use settings::DeviceSettings;

/// Install the `env_logger` backend with `default_filter` unless `RUST_LOG` says otherwise.
pub fn init_logging(default_filter: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .try_init();
}
