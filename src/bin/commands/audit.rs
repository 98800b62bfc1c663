use anyhow::{bail, Context, Result};
use log::{error, info};
use std::path::Path;
use std::time::Duration;
use toolchain_harness::audit::abi::{self, AbiCompare, AbiDump, SizeOffset};
use toolchain_harness::audit::checksec::{self, CHECK_ITEMS};
use toolchain_harness::audit::permissions::{self, ChecklistKind};
use toolchain_harness::options::Options;
use toolchain_harness::preflight::{check_required_tools, ABI_TOOLS, CHECKSEC_TOOLS};

const GEN_USAGE: &str = "usage: toolchain-harness abi gen <elf> <abi-file> [options]";
const COMPARE_USAGE: &str = "usage: toolchain-harness abi compare <file1> <file2> [options]";
const CHECKSEC_USAGE: &str = "usage: toolchain-harness checksec <dir> <output-dir> [--<item>=<expected>...]";

pub(crate) fn abi(action: &str, rest: &[String]) -> Result<i32> {
    check_required_tools(ABI_TOOLS)?;
    match action {
        "gen" => {
            let options = Options::parse(
                rest,
                &["suppressions", "debug-info-dir", "headers-dir", "timeout"],
                &["no-show-locs", "load-all-types", "annotate"],
            )?;
            let [elf, abi_file] = options.positionals::<2>(GEN_USAGE)?;
            let dump = AbiDump {
                elf: elf.to_string(),
                abi_file: abi_file.to_string(),
                suppressions: owned(options.value("suppressions")),
                debug_info_dir: owned(options.value("debug-info-dir")),
                headers_dir: owned(options.value("headers-dir")),
                no_show_locs: options.switch("no-show-locs"),
                load_all_types: options.switch("load-all-types"),
                annotate: options.switch("annotate"),
            };
            dump.run("abidw", timeout(&options)?)
        }
        "compare" => {
            let options = Options::parse(
                rest,
                &[
                    "suppressions",
                    "debug-info-dir1",
                    "debug-info-dir2",
                    "headers-dir1",
                    "headers-dir2",
                    "show-size-offset",
                    "timeout",
                ],
                &[],
            )?;
            let [first, second] = options.positionals::<2>(COMPARE_USAGE)?;
            let compare = AbiCompare {
                first: first.to_string(),
                second: second.to_string(),
                suppressions: owned(options.value("suppressions")),
                debug_info_dir1: owned(options.value("debug-info-dir1")),
                debug_info_dir2: owned(options.value("debug-info-dir2")),
                headers_dir1: owned(options.value("headers-dir1")),
                headers_dir2: owned(options.value("headers-dir2")),
                size_offset: options.value("show-size-offset").map(SizeOffset::parse),
            };
            let differs = compare.run("abidiff", timeout(&options)?)?;
            Ok(i32::from(differs))
        }
        other => bail!("unknown abi action '{}' (expected gen or compare)", other),
    }
}

pub(crate) fn checksec(rest: &[String]) -> Result<i32> {
    let mut valued: Vec<&str> = CHECK_ITEMS.iter().map(|(name, _)| *name).collect();
    valued.push("checksec");
    let options = Options::parse(rest, &valued, &[])?;
    let [dir, output] = options.positionals::<2>(CHECKSEC_USAGE)?;

    let program = options.value("checksec").unwrap_or("checksec");
    check_required_tools(&[(program, CHECKSEC_TOOLS[0].1), CHECKSEC_TOOLS[1]])?;

    let expectations: Vec<(String, String)> = CHECK_ITEMS
        .iter()
        .filter_map(|(name, _)| options.value(name).map(|v| (name.to_string(), v.to_string())))
        .collect();

    let dir = Path::new(dir.trim_end_matches('/'));
    let report = checksec::run_checksec(program, dir, Path::new(output), &expectations)?;
    info!(
        "checked {} files ({}), {} failed; reports in '{}'",
        report.summary.total_file_num, report.summary.file_size_sum, report.summary.check_file_list_num, output
    );
    Ok(i32::from(!report.failed.is_empty()))
}

pub(crate) fn perm(action: &str, rest: &[String]) -> Result<i32> {
    let cwd = std::env::current_dir().context("resolving current directory")?;
    let passed = match (action, rest) {
        ("generate", [dir, list]) => {
            permissions::write_checklist(Path::new(dir), Path::new(list), ChecklistKind::File)?;
            true
        }
        ("so-generate", [dir, list]) => {
            permissions::write_checklist(Path::new(dir), Path::new(list), ChecklistKind::So)?;
            true
        }
        ("check", [dir, list]) => {
            permissions::check(Path::new(dir), Path::new(list), ChecklistKind::File, &cwd)?.passed()
        }
        ("so-check", [dir, list]) => {
            permissions::check(Path::new(dir), Path::new(list), ChecklistKind::So, &cwd)?.passed()
        }
        ("compare", [reference, dir]) => {
            permissions::compare(Path::new(reference), Path::new(dir), &cwd)?.passed()
        }
        ("check-defaults", [clang, ndk]) => {
            permissions::check_defaults(Path::new(clang), Path::new(ndk), &cwd, &cwd)?
        }
        _ => bail!(
            "usage: toolchain-harness perm <generate|so-generate|check|so-check> <dir> <checklist>\n       \
             toolchain-harness perm compare <reference-dir> <dir>\n       \
             toolchain-harness perm check-defaults <clang-dir> <ndk-dir>"
        ),
    };
    if !passed {
        error!("permission check failed");
    }
    Ok(i32::from(!passed))
}

fn owned(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}

fn timeout(options: &Options) -> Result<Duration> {
    match options.value("timeout") {
        None => Ok(abi::DEFAULT_TIMEOUT),
        Some(raw) => {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("parsing --timeout value '{}'", raw))?;
            Ok(Duration::from_secs(secs))
        }
    }
}
