use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TARGETS: &str = "AArch64;ARM;BPF;Mips;RISCV;X86";
pub const DEFAULT_CLANG_VERSION: &str = "15.0.4";
const DEFAULT_PYTHON_VERSION: &str = "3.10";
const DEFAULT_LLDB_PYTHON: &str = "python3";
const DEFAULT_NCURSES_VERSION: &str = "6.4";
const DEFAULT_LIBXML2_VERSION: &str = "2.9.14";
const DEFAULT_LIBEDIT_SO: &str = "libedit.so.0.0.75";
const DEFAULT_NCURSES_LIBS: &[&str] = &["libncurses", "libpanel", "libform"];
const DEFAULT_HOST_PROJECTS: &[&str] = &["clang", "lldb", "lld"];

/// Resolved cross-toolchain build configuration.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub repo_root: PathBuf,
    pub llvm_project_dir: PathBuf,
    pub out_dir: PathBuf,
    pub cmake_bin_dir: PathBuf,
    pub python_dir: PathBuf,
    pub packages_dir: PathBuf,
    pub build_name: String,
    pub debug: bool,
    pub strip: bool,
    pub enable_assertions: bool,
    pub lldb_timeout: bool,
    pub enable_monitoring: bool,
    pub do_package: bool,
    pub targets: String,
    pub host_projects: Vec<String>,
    pub clang_version: String,
    pub ninja_load: Option<u32>,
    pub lldb: LldbOptions,
}

/// Optional LLDB dependencies and the versions of their prebuilt installs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LldbOptions {
    pub build_ncurses: bool,
    pub build_libxml2: bool,
    pub build_libedit: bool,
    pub enable_lzma_7zip: bool,
    pub build_python: bool,
    pub python_version: String,
    pub lldb_python: String,
    pub ncurses_version: String,
    pub ncurses_libs: Vec<String>,
    pub libxml2_version: String,
    pub libedit_so: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildToml {
    paths: PathsToml,
    build: Option<BuildOptionsToml>,
    lldb: Option<LldbToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PathsToml {
    repo_root: String,
    llvm_project_dir: Option<String>,
    out_dir: Option<String>,
    cmake_bin_dir: Option<String>,
    python_dir: Option<String>,
    packages_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildOptionsToml {
    build_name: Option<String>,
    debug: Option<bool>,
    strip: Option<bool>,
    enable_assertions: Option<bool>,
    lldb_timeout: Option<bool>,
    enable_monitoring: Option<bool>,
    do_package: Option<bool>,
    targets: Option<String>,
    host_projects: Option<Vec<String>>,
    clang_version: Option<String>,
    ninja_load: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LldbToml {
    build_ncurses: Option<bool>,
    build_libxml2: Option<bool>,
    build_libedit: Option<bool>,
    enable_lzma_7zip: Option<bool>,
    build_python: Option<bool>,
    python_version: Option<String>,
    lldb_python: Option<String>,
    ncurses_version: Option<String>,
    ncurses_libs: Option<Vec<String>>,
    libxml2_version: Option<String>,
    libedit_so: Option<String>,
}

impl BuildConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        let text = fs::read_to_string(config_path)
            .with_context(|| format!("reading build config '{}'", config_path.display()))?;
        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&text, base)
            .with_context(|| format!("parsing build config '{}'", config_path.display()))
    }

    /// Parse TOML text; relative paths resolve against `base`.
    pub fn parse(text: &str, base: &Path) -> Result<Self> {
        let parsed: BuildToml = toml::from_str(text)?;
        let paths = parsed.paths;
        let build = parsed.build.unwrap_or_default();
        let lldb = parsed.lldb.unwrap_or_default();

        if paths.repo_root.trim().is_empty() {
            bail!("paths.repo_root must not be empty");
        }
        let repo_root = resolve(base, &paths.repo_root);
        let out_dir = paths
            .out_dir
            .map(|p| resolve(base, &p))
            .unwrap_or_else(|| repo_root.join("out"));

        let targets = build.targets.unwrap_or_else(|| DEFAULT_TARGETS.to_string());
        if targets.trim().is_empty() {
            bail!("build.targets must name at least one LLVM target");
        }
        if build.ninja_load == Some(0) {
            bail!("build.ninja_load must be positive");
        }

        let lldb = LldbOptions {
            build_ncurses: lldb.build_ncurses.unwrap_or(false),
            build_libxml2: lldb.build_libxml2.unwrap_or(false),
            build_libedit: lldb.build_libedit.unwrap_or(false),
            enable_lzma_7zip: lldb.enable_lzma_7zip.unwrap_or(false),
            build_python: lldb.build_python.unwrap_or(false),
            python_version: lldb
                .python_version
                .unwrap_or_else(|| DEFAULT_PYTHON_VERSION.to_string()),
            lldb_python: lldb
                .lldb_python
                .unwrap_or_else(|| DEFAULT_LLDB_PYTHON.to_string()),
            ncurses_version: lldb
                .ncurses_version
                .unwrap_or_else(|| DEFAULT_NCURSES_VERSION.to_string()),
            ncurses_libs: lldb
                .ncurses_libs
                .unwrap_or_else(|| DEFAULT_NCURSES_LIBS.iter().map(|s| s.to_string()).collect()),
            libxml2_version: lldb
                .libxml2_version
                .unwrap_or_else(|| DEFAULT_LIBXML2_VERSION.to_string()),
            libedit_so: lldb
                .libedit_so
                .unwrap_or_else(|| DEFAULT_LIBEDIT_SO.to_string()),
        };

        Ok(Self {
            llvm_project_dir: paths
                .llvm_project_dir
                .map(|p| resolve(base, &p))
                .unwrap_or_else(|| repo_root.join("toolchain").join("llvm-project")),
            cmake_bin_dir: paths
                .cmake_bin_dir
                .map(|p| resolve(base, &p))
                .unwrap_or_else(|| {
                    repo_root
                        .join("prebuilts")
                        .join("cmake")
                        .join(platform_prefix())
                        .join("bin")
                }),
            python_dir: paths
                .python_dir
                .map(|p| resolve(base, &p))
                .unwrap_or_else(|| {
                    repo_root
                        .join("prebuilts")
                        .join(&lldb.lldb_python)
                        .join(platform_prefix())
                        .join(&lldb.python_version)
                }),
            packages_dir: paths
                .packages_dir
                .map(|p| resolve(base, &p))
                .unwrap_or_else(|| out_dir.join("packages")),
            out_dir,
            repo_root,
            build_name: build.build_name.unwrap_or_else(|| "dev".to_string()),
            debug: build.debug.unwrap_or(false),
            strip: build.strip.unwrap_or(false),
            enable_assertions: build.enable_assertions.unwrap_or(false),
            lldb_timeout: build.lldb_timeout.unwrap_or(false),
            enable_monitoring: build.enable_monitoring.unwrap_or(false),
            do_package: build.do_package.unwrap_or(true),
            targets,
            host_projects: build
                .host_projects
                .unwrap_or_else(|| DEFAULT_HOST_PROJECTS.iter().map(|s| s.to_string()).collect()),
            clang_version: build
                .clang_version
                .unwrap_or_else(|| DEFAULT_CLANG_VERSION.to_string()),
            ninja_load: build.ninja_load,
            lldb,
        })
    }

    pub fn out_path(&self, name: &str) -> PathBuf {
        self.out_dir.join(name)
    }

    /// `<out>/<library>-install/<triple>/<rest...>`
    pub fn third_party_install(&self, library: &str, triple: &str, rest: &[&str]) -> PathBuf {
        rest.iter().fold(
            self.out_dir.join(format!("{}-install", library)).join(triple),
            |path, part| path.join(part),
        )
    }
}

fn resolve(base: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw.trim());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Prebuilts directory name for the build host, e.g. `linux-x86`.
pub fn platform_prefix() -> String {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "x86",
        other => other,
    };
    format!("{}-{}", std::env::consts::OS, arch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = BuildConfig::parse("[paths]\nrepo_root = \"/src/ohos\"\n", Path::new("/etc")).unwrap();

        assert_eq!(config.repo_root, PathBuf::from("/src/ohos"));
        assert_eq!(config.llvm_project_dir, PathBuf::from("/src/ohos/toolchain/llvm-project"));
        assert_eq!(config.out_dir, PathBuf::from("/src/ohos/out"));
        assert_eq!(config.packages_dir, PathBuf::from("/src/ohos/out/packages"));
        assert_eq!(config.targets, DEFAULT_TARGETS);
        assert_eq!(config.clang_version, "15.0.4");
        assert_eq!(config.build_name, "dev");
        assert!(config.do_package);
        assert!(!config.debug);
        assert_eq!(config.lldb.python_version, "3.10");
        assert_eq!(config.lldb.lldb_python, "python3");
        assert!(config
            .cmake_bin_dir
            .starts_with("/src/ohos/prebuilts/cmake"));
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let text = r#"
[paths]
repo_root = "../ohos"
out_dir = "/scratch/out"

[build]
build_name = "nightly"
debug = true
ninja_load = 16

[lldb]
build_ncurses = true
ncurses_libs = ["libncursesw"]
"#;
        let config = BuildConfig::parse(text, Path::new("/cfg")).unwrap();

        assert_eq!(config.repo_root, PathBuf::from("/cfg/../ohos"));
        assert_eq!(config.out_dir, PathBuf::from("/scratch/out"));
        assert_eq!(config.build_name, "nightly");
        assert!(config.debug);
        assert_eq!(config.ninja_load, Some(16));
        assert!(config.lldb.build_ncurses);
        assert_eq!(config.lldb.ncurses_libs, vec!["libncursesw".to_string()]);
        assert_eq!(
            config.third_party_install("ncurses", "aarch64-linux-ohos", &["lib", "libncursesw.so.6.4"]),
            PathBuf::from("/scratch/out/ncurses-install/aarch64-linux-ohos/lib/libncursesw.so.6.4")
        );
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = BuildConfig::parse("[paths]\nrepo_root = \"/r\"\nbogus = 1\n", Path::new("/")).unwrap_err();
        assert!(format!("{:#}", err).contains("bogus"));

        assert!(BuildConfig::parse("[paths]\nrepo_root = \"/r\"\n[build]\nninja_load = 0\n", Path::new("/")).is_err());
        assert!(BuildConfig::parse("[build]\ndebug = true\n", Path::new("/")).is_err());
    }

    #[test]
    fn test_load_reads_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("build.toml");
        fs::write(&path, "[paths]\nrepo_root = \"repo\"\n").unwrap();

        let config = BuildConfig::load(&path).unwrap();
        assert_eq!(config.repo_root, temp.path().join("repo"));
        assert!(BuildConfig::load(&temp.path().join("missing.toml")).is_err());
    }
}
