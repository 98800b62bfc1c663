//! Hardening audit over a directory of binaries using `checksec`.
//!
//! `checksec --dir=<dir> --extended --output=json` reports one object per
//! file. Each enabled check item compares one field against an expected
//! value; disabled items pass every file. Results are written as HTML and
//! JSON reports plus a plain `failed_list.txt`.

use crate::process::Cmd;
use anyhow::{bail, Context, Result};
use askama::Template;
use log::{debug, info};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const PASSED: &str = "passed";
pub const FAILED: &str = "failed";

/// Check item names in report order, with the checksec field each reads.
pub const CHECK_ITEMS: &[(&str, &str)] = &[
    ("relro", "relro"),
    ("canary", "canary"),
    ("nx", "nx"),
    ("pie", "pie"),
    ("clangcfi", "clangcfi"),
    ("safestack", "safestack"),
    ("rpath", "rpath"),
    ("symbols", "symbols"),
    ("fortify", "fortify_source"),
    ("fortified", "fortified"),
    ("fortifiable", "fortify-able"),
];

const DEFAULT_EXPECTATIONS: &[(&str, &str)] = &[("relro", "full"), ("nx", "yes"), ("rpath", "no")];

/// MIME fragments that mark a file as worth auditing.
const BINARY_MIME: &[&str] = &["executable", "sharedlib", "shared object", "library"];

/// One checksec file record, with every field kept as text.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FileEntry {
    pub filename: String,
    #[serde(default, deserialize_with = "text")]
    pub relro: String,
    #[serde(default, deserialize_with = "text")]
    pub canary: String,
    #[serde(default, deserialize_with = "text")]
    pub nx: String,
    #[serde(default, deserialize_with = "text")]
    pub pie: String,
    #[serde(default, deserialize_with = "text")]
    pub clangcfi: String,
    #[serde(default, deserialize_with = "text")]
    pub safestack: String,
    #[serde(default, deserialize_with = "text")]
    pub rpath: String,
    #[serde(default, deserialize_with = "text")]
    pub runpath: String,
    #[serde(default, deserialize_with = "text")]
    pub symbols: String,
    #[serde(default, deserialize_with = "text")]
    pub fortify_source: String,
    #[serde(default, deserialize_with = "text")]
    pub fortified: String,
    #[serde(default, rename = "fortify-able", deserialize_with = "text")]
    pub fortify_able: String,
    #[serde(default)]
    pub file_single_size: String,
}

impl FileEntry {
    fn field(&self, key: &str) -> &str {
        match key {
            "relro" => &self.relro,
            "canary" => &self.canary,
            "nx" => &self.nx,
            "pie" => &self.pie,
            "clangcfi" => &self.clangcfi,
            "safestack" => &self.safestack,
            "rpath" => &self.rpath,
            "symbols" => &self.symbols,
            "fortify_source" => &self.fortify_source,
            "fortified" => &self.fortified,
            "fortify-able" => &self.fortify_able,
            _ => "",
        }
    }
}

fn text<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckItem {
    pub name: String,
    #[serde(skip)]
    key: &'static str,
    pub do_check: bool,
    pub check_flag: Option<String>,
    pub passed_list: Vec<String>,
    pub failed_list: Vec<String>,
    pub passed_num: usize,
    pub failed_num: usize,
}

impl CheckItem {
    /// Expected value for display; `-` when the item is not checked.
    pub fn expected(&self) -> &str {
        match (&self.check_flag, self.do_check) {
            (Some(flag), true) => flag,
            _ => "-",
        }
    }

    fn record(&mut self, entry: &FileEntry) {
        let passed = match (&self.check_flag, self.do_check) {
            (Some(expected), true) => entry.field(self.key) == expected,
            _ => true,
        };
        if passed {
            self.passed_list.push(entry.filename.clone());
        } else {
            self.failed_list.push(entry.filename.clone());
        }
        self.passed_num = self.passed_list.len();
        self.failed_num = self.failed_list.len();
    }
}

/// The default item table with `expectations` (name, expected value) applied.
pub fn check_items(expectations: &[(String, String)]) -> Result<Vec<CheckItem>> {
    let mut items: Vec<CheckItem> = CHECK_ITEMS
        .iter()
        .map(|&(name, key)| {
            let expected = DEFAULT_EXPECTATIONS
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.to_string());
            CheckItem {
                name: name.to_string(),
                key,
                do_check: expected.is_some(),
                check_flag: expected,
                passed_list: Vec::new(),
                failed_list: Vec::new(),
                passed_num: 0,
                failed_num: 0,
            }
        })
        .collect();

    for (name, value) in expectations {
        let Some(item) = items.iter_mut().find(|item| &item.name == name) else {
            bail!("unknown checksec item '{}'", name);
        };
        item.do_check = true;
        item.check_flag = Some(value.clone());
    }
    Ok(items)
}

/// Per-item verdicts for one file.
#[derive(Debug, Clone)]
pub struct FileVerdict {
    pub file_name: String,
    pub results: Vec<(String, &'static str)>,
}

impl FileVerdict {
    pub fn failed(&self) -> bool {
        self.results.iter().any(|(_, status)| *status == FAILED)
    }
}

impl Serialize for FileVerdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.results.len() + 1))?;
        map.serialize_entry("file_name", &self.file_name)?;
        for (name, status) in &self.results {
            map.serialize_entry(name, status)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub start_time: String,
    pub end_time: String,
    pub execution_time: String,
    pub total_file_num: usize,
    pub file_size_sum: String,
    pub check_file_list_num: usize,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub summary: Summary,
    pub items: Vec<CheckItem>,
    pub files: Vec<FileEntry>,
    pub failed: Vec<FileVerdict>,
}

/// Run checksec over `dir` and return its parsed JSON.
pub fn scan(program: &str, dir: &Path) -> Result<Map<String, Value>> {
    if !dir.is_dir() {
        bail!("check dir '{}' does not exist", dir.display());
    }
    let result = Cmd::new(program)
        .arg(format!("--dir={}", dir.display()))
        .arg("--extended")
        .arg("--output=json")
        .error_msg(format!("checksec failed for '{}'", dir.display()))
        .run()?;
    serde_json::from_str(&result.stdout).context("parsing checksec output")
}

/// `file --mime-type` says the path is an executable or a library.
pub fn is_binary(path: &Path) -> Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    let result = Cmd::new("file")
        .args(["--mime-type", "-b"])
        .arg_path(path)
        .allow_fail()
        .run()?;
    if !result.success() {
        return Ok(false);
    }
    let mime = result.stdout.trim();
    Ok(BINARY_MIME.iter().any(|m| mime.contains(m)))
}

/// Evaluate checksec records against `items`.
///
/// Records carrying a `name` key describe the scan rather than a file and
/// are skipped, as are files `is_binary` rejects.
pub fn evaluate<F>(raw: &Map<String, Value>, mut items: Vec<CheckItem>, is_binary: F) -> Result<Report>
where
    F: Fn(&Path) -> Result<bool>,
{
    let mut files = Vec::new();
    let mut size_sum = 0u64;

    for value in raw.values() {
        if value.get("name").is_some() {
            continue;
        }
        let mut entry: FileEntry = serde_json::from_value(value.clone()).context("parsing checksec record")?;
        let path = PathBuf::from(&entry.filename);
        if !is_binary(&path)? {
            debug!("skipping non-binary '{}'", entry.filename);
            continue;
        }
        let size = fs::metadata(&path)
            .with_context(|| format!("reading size of '{}'", path.display()))?
            .len();
        size_sum += size;
        entry.file_single_size = format_size(size);
        for item in items.iter_mut() {
            item.record(&entry);
        }
        files.push(entry);
    }

    let failed: Vec<FileVerdict> = files
        .iter()
        .map(|entry| FileVerdict {
            file_name: entry.filename.clone(),
            results: items
                .iter()
                .map(|item| {
                    let status = if item.failed_list.contains(&entry.filename) {
                        FAILED
                    } else {
                        PASSED
                    };
                    (item.name.clone(), status)
                })
                .collect(),
        })
        .filter(FileVerdict::failed)
        .collect();

    Ok(Report {
        summary: Summary {
            total_file_num: files.len(),
            file_size_sum: format_size(size_sum),
            check_file_list_num: failed.len(),
            ..Default::default()
        },
        items,
        files,
        failed,
    })
}

/// Human-readable size with up to two decimals: `512B`, `2.0K`, `1.33M`.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{}B", bytes);
    }
    let mut size = bytes as f64 / 1024.0;
    for unit in ["K", "M"] {
        if size < 1024.0 {
            return format!("{}{}", two_decimals(size), unit);
        }
        size /= 1024.0;
    }
    format!("{}G", two_decimals(size))
}

fn two_decimals(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{:.1}", rounded)
    } else {
        format!("{}", rounded)
    }
}

#[derive(Template)]
#[template(path = "checksec_index.html")]
struct IndexPage<'a> {
    summary: &'a Summary,
    items: &'a [CheckItem],
    files: &'a [FileEntry],
}

#[derive(Template)]
#[template(path = "checksec_total.html")]
struct TotalPage<'a> {
    files: &'a [FileEntry],
}

#[derive(Template)]
#[template(path = "checksec_failed.html")]
struct FailedPage<'a> {
    items: &'a [CheckItem],
    failed: &'a [FileVerdict],
}

#[derive(Serialize)]
struct IndexJson<'a> {
    summary_data: &'a Summary,
    total_file_info: &'a [FileEntry],
    check_items: Map<String, Value>,
}

/// Write every report for `report` into `output`.
pub fn write_reports(report: &Report, output: &Path) -> Result<()> {
    fs::create_dir_all(output).with_context(|| format!("creating report dir '{}'", output.display()))?;

    let index = IndexPage {
        summary: &report.summary,
        items: &report.items,
        files: &report.files,
    };
    write(output, "Index.html", &index.render()?)?;
    write(output, "total file list.html", &TotalPage { files: &report.files }.render()?)?;
    let failed_page = FailedPage {
        items: &report.items,
        failed: &report.failed,
    };
    write(output, "failed files list.html", &failed_page.render()?)?;

    let mut check_items = Map::new();
    for item in &report.items {
        check_items.insert(item.name.clone(), serde_json::to_value(item)?);
    }
    let index_json = IndexJson {
        summary_data: &report.summary,
        total_file_info: &report.files,
        check_items,
    };
    write(output, "Index.json", &serde_json::to_string_pretty(&index_json)?)?;
    write(
        output,
        "total_file_list.json",
        &serde_json::to_string_pretty(&serde_json::json!({ "total_file_info": report.files }))?,
    )?;
    write(
        output,
        "check_file_list.json",
        &serde_json::to_string_pretty(&serde_json::json!({ "check_file_list": report.failed }))?,
    )?;

    let failed_list = output.join("failed_list.txt");
    if failed_list.exists() {
        fs::remove_file(&failed_list).with_context(|| format!("removing '{}'", failed_list.display()))?;
    }
    if !report.failed.is_empty() {
        let mut text = String::new();
        for verdict in &report.failed {
            text.push_str(&serde_json::to_string(verdict)?);
            text.push('\n');
        }
        write(output, "failed_list.txt", &text)?;
    }
    Ok(())
}

fn write(dir: &Path, name: &str, contents: &str) -> Result<()> {
    let path = dir.join(name);
    fs::write(&path, contents).with_context(|| format!("writing '{}'", path.display()))
}

/// Scan `dir`, write reports into `output`, and return the report.
pub fn run_checksec(program: &str, dir: &Path, output: &Path, expectations: &[(String, String)]) -> Result<Report> {
    let start = Instant::now();
    let start_time = super::report_timestamp();
    let items = check_items(expectations)?;

    info!("checksec --dir={} --extended --output=json", dir.display());
    let raw = scan(program, dir)?;
    let mut report = evaluate(&raw, items, is_binary)?;

    report.summary.start_time = start_time;
    report.summary.end_time = super::report_timestamp();
    report.summary.execution_time = format!("{:.2}s", start.elapsed().as_secs_f64());
    write_reports(&report, output)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(filename: &Path, relro: &str, nx: &str) -> Value {
        serde_json::json!({
            "relro": relro,
            "canary": "yes",
            "nx": nx,
            "pie": "yes",
            "clangcfi": "no",
            "safestack": "no",
            "rpath": "no",
            "runpath": "no",
            "symbols": "no",
            "fortify_source": "no",
            "fortified": 0,
            "fortify-able": "2",
            "filename": filename.to_string_lossy(),
        })
    }

    fn fixture(temp: &TempDir) -> Map<String, Value> {
        let good = temp.path().join("clang");
        let bad = temp.path().join("libfoo.so");
        let text = temp.path().join("README");
        fs::write(&good, vec![0u8; 2048]).unwrap();
        fs::write(&bad, vec![0u8; 100]).unwrap();
        fs::write(&text, "hello").unwrap();

        let mut raw = Map::new();
        raw.insert("dir".to_string(), serde_json::json!({ "name": temp.path().to_string_lossy() }));
        raw.insert(good.to_string_lossy().into_owned(), record(&good, "full", "yes"));
        raw.insert(bad.to_string_lossy().into_owned(), record(&bad, "partial", "yes"));
        raw.insert(text.to_string_lossy().into_owned(), record(&text, "no", "no"));
        raw
    }

    fn not_readme(path: &Path) -> Result<bool> {
        Ok(path.file_name().map_or(false, |n| n != "README"))
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(100), "100B");
        assert_eq!(format_size(2048), "2.0K");
        assert_eq!(format_size(1536), "1.5K");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0M");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.0G");
    }

    #[test]
    fn test_default_items() {
        let items = check_items(&[]).unwrap();
        let enabled: Vec<&str> = items.iter().filter(|i| i.do_check).map(|i| i.name.as_str()).collect();
        assert_eq!(enabled, vec!["relro", "nx", "rpath"]);

        let items = check_items(&[("canary".to_string(), "yes".to_string())]).unwrap();
        assert!(items[1].do_check);
        assert!(check_items(&[("aslr".to_string(), "yes".to_string())]).is_err());
    }

    #[test]
    fn test_evaluate() {
        let temp = TempDir::new().unwrap();
        let raw = fixture(&temp);
        let items = check_items(&[("fortified".to_string(), "0".to_string())]).unwrap();

        let report = evaluate(&raw, items, not_readme).unwrap();

        assert_eq!(report.summary.total_file_num, 2);
        assert_eq!(report.summary.file_size_sum, "2.1K");
        assert_eq!(report.files.iter().find(|f| f.filename.ends_with("clang")).unwrap().file_single_size, "2.0K");
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].file_name.ends_with("libfoo.so"));
        assert!(report.failed[0].results.contains(&("relro".to_string(), FAILED)));
        assert!(report.failed[0].results.contains(&("fortified".to_string(), PASSED)));
        let relro = &report.items[0];
        assert_eq!((relro.passed_num, relro.failed_num), (1, 1));
        let canary = &report.items[1];
        assert_eq!(canary.passed_num, 2);
    }

    #[test]
    fn test_write_reports() {
        let temp = TempDir::new().unwrap();
        let raw = fixture(&temp);
        let report = evaluate(&raw, check_items(&[]).unwrap(), not_readme).unwrap();
        let out = temp.path().join("report");

        write_reports(&report, &out).unwrap();

        for name in [
            "Index.html",
            "total file list.html",
            "failed files list.html",
            "Index.json",
            "total_file_list.json",
            "check_file_list.json",
            "failed_list.txt",
        ] {
            assert!(out.join(name).is_file(), "missing {}", name);
        }
        let index: Value = serde_json::from_str(&fs::read_to_string(out.join("Index.json")).unwrap()).unwrap();
        assert_eq!(index["summary_data"]["total_file_num"], 2);
        assert_eq!(index["check_items"]["relro"]["failed_num"], 1);
        let failed = fs::read_to_string(out.join("failed_list.txt")).unwrap();
        assert!(failed.starts_with("{\"file_name\":"));
        assert!(fs::read_to_string(out.join("failed files list.html")).unwrap().contains("libfoo.so"));

        // A clean rerun removes the stale list.
        let clean = Report {
            failed: Vec::new(),
            ..report
        };
        write_reports(&clean, &out).unwrap();
        assert!(!out.join("failed_list.txt").exists());
    }

    #[test]
    fn test_scan_missing_dir() {
        let temp = TempDir::new().unwrap();
        assert!(scan("checksec", &temp.path().join("missing")).is_err());
    }
}
