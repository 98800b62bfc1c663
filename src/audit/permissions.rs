//! Permission checklists for installed toolchain trees.
//!
//! A checklist has one line per file: `lib/<relpath>,<filemode>` for shared
//! objects, plus `,<size in MB>` when every file is listed. Checking a tree
//! against a checklist sorts each line into success, failure (mode differs)
//! or lack (file missing), and writes a timestamped log.

use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use std::fmt::Write as _;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const DEFAULT_CLANG_FILE_CHECKLIST: &str = "default_clang_file_permission.checklist";
pub const DEFAULT_NDK_FILE_CHECKLIST: &str = "default_ndk_file_permission.checklist";
pub const DEFAULT_CLANG_LIB_SO_CHECKLIST: &str = "default_clang_lib_so_permission.checklist";
pub const DEFAULT_NDK_LIB_SO_CHECKLIST: &str = "default_ndk_lib_so_permission.checklist";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecklistKind {
    /// `.so` files only, mode column only.
    So,
    /// Every file, with a size column.
    File,
}

impl ChecklistKind {
    fn log_prefix(self) -> &'static str {
        match self {
            Self::So => "so",
            Self::File => "file",
        }
    }

    fn includes(self, path: &Path) -> bool {
        match self {
            Self::So => path.extension().map_or(false, |ext| ext == "so"),
            Self::File => true,
        }
    }
}

/// `ls -l` style mode string, e.g. `-rwxr-xr-x`.
pub fn filemode(mode: u32) -> String {
    let kind = match mode & libc::S_IFMT as u32 {
        m if m == libc::S_IFDIR as u32 => 'd',
        m if m == libc::S_IFLNK as u32 => 'l',
        m if m == libc::S_IFCHR as u32 => 'c',
        m if m == libc::S_IFBLK as u32 => 'b',
        m if m == libc::S_IFIFO as u32 => 'p',
        m if m == libc::S_IFSOCK as u32 => 's',
        m if m == libc::S_IFREG as u32 => '-',
        _ => '?',
    };

    let mut out = String::with_capacity(10);
    out.push(kind);
    // (read, write, exec bit, special bit, special char when exec, without exec)
    let triads = [
        (0o400, 0o200, 0o100, 0o4000, 's', 'S'),
        (0o040, 0o020, 0o010, 0o2000, 's', 'S'),
        (0o004, 0o002, 0o001, 0o1000, 't', 'T'),
    ];
    for (r, w, x, special, with_x, without_x) in triads {
        out.push(if mode & r != 0 { 'r' } else { '-' });
        out.push(if mode & w != 0 { 'w' } else { '-' });
        out.push(match (mode & x != 0, mode & special != 0) {
            (true, true) => with_x,
            (false, true) => without_x,
            (true, false) => 'x',
            (false, false) => '-',
        });
    }
    out
}

/// Checklist lines for every matching file under `dir`, in path order.
pub fn generate(dir: &Path, kind: ChecklistKind) -> Result<Vec<String>> {
    if !dir.is_dir() {
        bail!("directory '{}' does not exist", dir.display());
    }
    let mut lines = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking '{}'", dir.display()))?;
        if entry.file_type().is_dir() || !kind.includes(entry.path()) {
            continue;
        }
        // Modes are those of the link target.
        let md = match fs::metadata(entry.path()) {
            Ok(md) => md,
            Err(err) => {
                warn!("skipping '{}': {}", entry.path().display(), err);
                continue;
            }
        };
        if md.is_dir() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        let mut line = format!("lib/{},{}", rel, filemode(md.mode()));
        if kind == ChecklistKind::File {
            let _ = write!(line, ",{:.1}", md.len() as f64 / (1024.0 * 1024.0));
        }
        lines.push(line);
    }
    Ok(lines)
}

/// Write the checklist for `dir` to `list`; returns the number of entries.
pub fn write_checklist(dir: &Path, list: &Path, kind: ChecklistKind) -> Result<usize> {
    let lines = generate(dir, kind)?;
    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    fs::write(list, text).with_context(|| format!("writing checklist '{}'", list.display()))?;
    info!("Total {} files in {}", lines.len(), dir.display());
    Ok(lines.len())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ChecklistEntry {
    rel: String,
    mode: String,
    size_mb: Option<String>,
}

fn parse_line(line: &str) -> Result<ChecklistEntry> {
    let mut fields = line.split(',');
    let (Some(path), Some(mode)) = (fields.next(), fields.next()) else {
        bail!("malformed checklist line '{}'", line);
    };
    let Some((_, rel)) = path.split_once("lib/") else {
        bail!("checklist path '{}' is not under lib/", path);
    };
    Ok(ChecklistEntry {
        rel: rel.to_string(),
        mode: mode.trim().to_string(),
        size_mb: fields.next().map(|s| s.trim().to_string()),
    })
}

/// Result of checking one tree against a checklist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckOutcome {
    pub success: usize,
    pub failure: usize,
    pub lack: usize,
    pub log_path: PathBuf,
}

impl CheckOutcome {
    pub fn total(&self) -> usize {
        self.success + self.failure + self.lack
    }

    pub fn passed(&self) -> bool {
        self.success == self.total()
    }
}

/// Check `dir` against the checklist at `list`, writing the log into `log_dir`.
pub fn check(dir: &Path, list: &Path, kind: ChecklistKind, log_dir: &Path) -> Result<CheckOutcome> {
    let text = fs::read_to_string(list).with_context(|| format!("reading checklist '{}'", list.display()))?;

    let mut outcome = CheckOutcome::default();
    let mut success_log = String::new();
    let mut error_log = String::new();
    let mut lack_log = String::new();

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let entry = parse_line(line).with_context(|| format!("parsing checklist '{}'", list.display()))?;
        let path = dir.join(&entry.rel);
        let shown = path.display();
        match fs::metadata(&path) {
            Err(err) => {
                error!("cannot stat '{}': {}", shown, err);
                outcome.lack += 1;
                match &entry.size_mb {
                    Some(size) => writeln!(
                        lack_log,
                        "{} check failed, the file is missed, missing file size is {} MB.",
                        shown, size
                    ),
                    None => writeln!(lack_log, "{} check failed, the file is missed.", shown),
                }?;
            }
            Ok(md) => {
                let real = filemode(md.mode());
                if real == entry.mode {
                    outcome.success += 1;
                    writeln!(success_log, "{} check succeeded.", shown)?;
                } else {
                    outcome.failure += 1;
                    writeln!(error_log, "{} check failed, expected: {}, real: {}", shown, entry.mode, real)?;
                }
            }
        }
    }

    let total = outcome.total();
    let name = format!(
        "{}_permissions_check_log{}.txt",
        kind.log_prefix(),
        super::log_timestamp()
    );
    outcome.log_path = log_dir.join(name);
    let mut log = format!(
        "llvm {} permissions check complete, Success: {}/{}, Failed: {}/{}, Lack: {}/{}\n",
        kind.log_prefix(),
        outcome.success,
        total,
        outcome.failure,
        total,
        outcome.lack,
        total
    );
    write!(
        log,
        "\n{}/{} checks failed.\n{}\n{}/{} file missed.\n{}\n{}/{} checks succeed.\n{}",
        outcome.failure, total, error_log, outcome.lack, total, lack_log, outcome.success, total, success_log
    )?;
    fs::write(&outcome.log_path, log).with_context(|| format!("writing '{}'", outcome.log_path.display()))?;

    if outcome.passed() {
        info!("{} {} permissions check passed.", dir.display(), kind.log_prefix());
    } else {
        error!("{} {} permissions check failed.", dir.display(), kind.log_prefix());
        error!("{}/{} checks failed.\n{}", outcome.failure, total, error_log);
        error!("{}/{} file missed.\n{}", outcome.lack, total, lack_log);
        error!(
            "{}/{} checks failed, check logs are in {}",
            outcome.failure + outcome.lack,
            total,
            outcome.log_path.display()
        );
    }
    Ok(outcome)
}

/// Check `other` against a checklist generated from `reference`.
pub fn compare(reference: &Path, other: &Path, log_dir: &Path) -> Result<CheckOutcome> {
    let list = tempfile::NamedTempFile::new().context("creating temporary checklist")?;
    write_checklist(reference, list.path(), ChecklistKind::File)?;
    check(other, list.path(), ChecklistKind::File, log_dir)
}

/// Check a clang and an NDK tree against the default file and `.so`
/// checklists in `lists_dir`. Every list is checked even after a failure.
pub fn check_defaults(clang: &Path, ndk: &Path, lists_dir: &Path, log_dir: &Path) -> Result<bool> {
    let checks = [
        (clang, DEFAULT_CLANG_FILE_CHECKLIST, ChecklistKind::File),
        (clang, DEFAULT_CLANG_LIB_SO_CHECKLIST, ChecklistKind::So),
        (ndk, DEFAULT_NDK_FILE_CHECKLIST, ChecklistKind::File),
        (ndk, DEFAULT_NDK_LIB_SO_CHECKLIST, ChecklistKind::So),
    ];
    let mut passed = true;
    for (dir, list, kind) in checks {
        passed &= check(dir, &lists_dir.join(list), kind, log_dir)?.passed();
    }
    Ok(passed)
}
