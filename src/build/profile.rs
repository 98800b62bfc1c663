//! Cross-toolchain host profiles.
//!
//! A profile is the host the toolchain is built *for*: its triple, the
//! compile and link flags, and the CMake define table that points the
//! cross-compile at the main toolchain in `<out>/llvm-install`.

use super::config::BuildConfig;
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const PROFILES: &[&str] = &["ohos-aarch64", "ohos-arm", "linux-aarch64"];

/// LLDB for the OHOS AArch64 host is built without any optional dependency.
const OHOS_AARCH64_LLDB_DEFINES: &[(&str, &str)] = &[
    ("LLDB_INCLUDE_TESTS", "OFF"),
    ("LLDB_ENABLE_TIMEOUT", "False"),
    ("LLDB_ENABLE_LIBEDIT", "OFF"),
    ("LLDB_ENABLE_CURSE", "OFF"),
    ("LLDB_ENABLE_LIBXML2", "OFF"),
    ("LLDB_ENABLE_LZMA", "OFF"),
    ("LLDB_ENABLE_PYTHON", "OFF"),
    ("LLDB_ENABLE_PERFORMANCE", "OFF"),
];

const CFLAGS_DEBUG: &str = "-O0 -g -fno-limit-debug-info";
const CFLAGS_RELEASE: &str = "-O2 -DNDEBUG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    OhosAarch64,
    OhosArm,
    LinuxAarch64,
}

impl Profile {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "ohos-aarch64" => Ok(Self::OhosAarch64),
            "ohos-arm" => Ok(Self::OhosArm),
            "linux-aarch64" => Ok(Self::LinuxAarch64),
            other => bail!(
                "unknown build profile '{}' (expected one of: {})",
                other,
                PROFILES.join(", ")
            ),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::OhosAarch64 => "ohos-aarch64",
            Self::OhosArm => "ohos-arm",
            Self::LinuxAarch64 => "linux-aarch64",
        }
    }

    pub fn triple(self) -> &'static str {
        match self {
            Self::OhosAarch64 => "aarch64-linux-ohos",
            Self::OhosArm => "arm-linux-ohos",
            Self::LinuxAarch64 => "aarch64-linux-gnu",
        }
    }

    /// Architecture component of the triple.
    pub fn platform(self) -> &'static str {
        self.triple().split('-').next().unwrap_or_default()
    }

    pub fn system_name(self) -> &'static str {
        if self.triple().contains("ohos") {
            "ohos"
        } else {
            "linux"
        }
    }

    /// Python comes from the prebuilts tree instead of being built.
    pub fn python_from_prebuilts(self) -> bool {
        self == Self::LinuxAarch64
    }

    /// Package links as the files they point to.
    pub fn dereference_package(self) -> bool {
        self == Self::OhosAarch64
    }

    /// Ninja targets; empty means the default target.
    pub fn ninja_targets(self) -> Vec<String> {
        match self {
            Self::OhosArm => vec!["lldb".to_string(), "lldb-server".to_string()],
            _ => Vec::new(),
        }
    }
}

/// Everything needed to configure and build one profile.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub profile: Profile,
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub install_dir: PathBuf,
    /// Main toolchain install used as compiler and runtime source.
    pub llvm_root: PathBuf,
    pub cflags: Vec<String>,
    pub ldflags: Vec<String>,
    pub defines: BTreeMap<String, String>,
    /// Variables added to the inherited environment for cmake and ninja.
    pub env: BTreeMap<String, String>,
    pub targets: Vec<String>,
}

impl BuildPlan {
    pub fn new(profile: Profile, config: &BuildConfig) -> Self {
        let host = format!("{}-{}", profile.system_name(), profile.platform());
        let llvm_root = config.out_path("llvm-install");
        let mut plan = Self {
            profile,
            source_dir: config.llvm_project_dir.join("llvm"),
            build_dir: config.out_path(&host),
            install_dir: config.out_path(&format!("{}-install", host)),
            cflags: base_cflags(profile),
            ldflags: base_ldflags(profile),
            defines: BTreeMap::new(),
            env: BTreeMap::new(),
            targets: profile.ninja_targets(),
            llvm_root,
        };
        plan.defines = plan.base_defines(config);
        let lldb = match profile {
            Profile::OhosAarch64 => OHOS_AARCH64_LLDB_DEFINES
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            Profile::OhosArm | Profile::LinuxAarch64 => plan.lldb_defines(config),
        };
        plan.defines.extend(lldb);

        match profile {
            Profile::OhosAarch64 => plan.update_ohos_aarch64(config),
            Profile::OhosArm => plan.update_ohos_arm(config),
            Profile::LinuxAarch64 => plan.update_linux_aarch64(config),
        }
        plan
    }

    fn tool(&self, name: &str) -> String {
        path_string(&self.llvm_root.join("bin").join(name))
    }

    fn python_install_dir(&self, config: &BuildConfig) -> PathBuf {
        if self.profile.python_from_prebuilts() {
            config
                .repo_root
                .join("prebuilts")
                .join(&config.lldb.lldb_python)
                .join("linux-arm64")
                .join(&config.lldb.python_version)
        } else {
            config.third_party_install("python", self.profile.triple(), &[])
        }
    }

    fn base_defines(&self, config: &BuildConfig) -> BTreeMap<String, String> {
        let triple = self.profile.triple();
        let mut d = BTreeMap::new();
        let mut set = |k: &str, v: String| {
            d.insert(k.to_string(), v);
        };

        set("LLVM_TARGET_ARCH", self.profile.platform().to_string());
        set("OHOS", "1".to_string());
        set("CMAKE_SYSTEM_NAME", "OHOS".to_string());
        set("CMAKE_CROSSCOMPILING", "True".to_string());
        set("CMAKE_INSTALL_PREFIX", path_string(&self.install_dir));
        set("CMAKE_SYSROOT", path_string(&config.out_path("sysroot")));
        set("LLVM_HOST_TRIPLE", triple.to_string());
        set("LLVM_TARGETS_TO_BUILD", config.targets.clone());
        set("LLVM_DEFAULT_TARGET_TRIPLE", triple.to_string());
        set("LLVM_ENABLE_TERMINFO", "OFF".to_string());
        set("LLVM_CONFIG_PATH", self.tool("llvm-config"));
        set("LLVM_TABLEGEN", self.tool("llvm-tblgen"));
        set("CMAKE_C_COMPILER", self.tool("clang"));
        set("CMAKE_CXX_COMPILER", self.tool("clang++"));
        set("CMAKE_AR", self.tool("llvm-ar"));
        set("CMAKE_FIND_ROOT_PATH_MODE_INCLUDE", "ONLY".to_string());
        set("CMAKE_FIND_ROOT_PATH_MODE_LIBRARY", "ONLY".to_string());
        set("CMAKE_FIND_ROOT_PATH_MODE_PACKAGE", "ONLY".to_string());
        set("CMAKE_FIND_ROOT_PATH_MODE_PROGRAM", "NEVER".to_string());
        set(
            "Python3_EXECUTABLE",
            path_string(&config.python_dir.join("bin").join(&config.lldb.lldb_python)),
        );
        set(
            "CMAKE_BUILD_TYPE",
            if config.debug { "Debug" } else { "Release" }.to_string(),
        );
        d
    }

    fn lldb_defines(&self, config: &BuildConfig) -> BTreeMap<String, String> {
        let triple = self.profile.triple();
        let lldb = &config.lldb;
        let install = |library: &str, rest: &[&str]| {
            path_string(&config.third_party_install(library, triple, rest))
        };
        let mut d = BTreeMap::new();

        d.insert("LLDB_INCLUDE_TESTS".to_string(), "OFF".to_string());
        if config.lldb_timeout {
            d.insert("LLDB_ENABLE_TIMEOUT".to_string(), "True".to_string());
        }

        if lldb.build_libxml2 {
            let so = format!("libxml2.so.{}", lldb.libxml2_version);
            d.insert("LLDB_ENABLE_LIBXML2".to_string(), "ON".to_string());
            d.insert(
                "LIBXML2_INCLUDE_DIR".to_string(),
                install("libxml2", &["include", "libxml2"]),
            );
            d.insert("LIBXML2_LIBRARY".to_string(), install("libxml2", &["lib", so.as_str()]));
        }

        if lldb.build_ncurses {
            d.insert("LLDB_ENABLE_CURSES".to_string(), "ON".to_string());
            d.insert(
                "CURSES_INCLUDE_DIRS".to_string(),
                [
                    install("ncurses", &["include"]),
                    install("ncurses", &["include", "ncurses"]),
                ]
                .join(";"),
            );
            let libs = lldb
                .ncurses_libs
                .iter()
                .map(|lib| {
                    let so = format!("{}.so.{}", lib, lldb.ncurses_version);
                    install("ncurses", &["lib", so.as_str()])
                })
                .collect::<Vec<_>>()
                .join(";");
            d.insert("CURSES_LIBRARIES".to_string(), libs.clone());
            d.insert("PANEL_LIBRARIES".to_string(), libs);
        }

        if lldb.build_libedit {
            d.insert("LLDB_ENABLE_LIBEDIT".to_string(), "ON".to_string());
            d.insert("LibEdit_INCLUDE_DIRS".to_string(), install("libedit", &["include"]));
            d.insert(
                "LibEdit_LIBRARIES".to_string(),
                install("libedit", &["lib", lldb.libedit_so.as_str()]),
            );
        }

        if lldb.enable_lzma_7zip {
            d.insert("LLDB_ENABLE_LZMA".to_string(), "ON".to_string());
            d.insert("LLDB_ENABLE_LZMA_7ZIP".to_string(), "ON".to_string());
            d.insert("LIBLZMA_INCLUDE_DIRS".to_string(), install("lzma", &["include"]));
            d.insert("LIBLZMA_LIBRARIES".to_string(), install("lzma", &["lib", "liblzma.so"]));
        }

        if lldb.build_python || self.profile.python_from_prebuilts() {
            let python_home = self.python_install_dir(config);
            let version = &lldb.python_version;
            d.insert("LLDB_ENABLE_PYTHON".to_string(), "ON".to_string());
            d.insert("LLDB_EMBED_PYTHON_HOME".to_string(), "ON".to_string());
            d.insert("LLDB_PYTHON_HOME".to_string(), format!("../{}", lldb.lldb_python));
            d.insert(
                "LLDB_PYTHON_RELATIVE_PATH".to_string(),
                format!("bin/python/lib/python{}", version),
            );
            d.insert("LLDB_PYTHON_EXE_RELATIVE_PATH".to_string(), "bin/python3".to_string());
            d.insert("LLDB_PYTHON_EXT_SUFFIX".to_string(), ".so".to_string());
            d.insert(
                "Python3_INCLUDE_DIRS".to_string(),
                path_string(&python_home.join("include").join(format!("python{}", version))),
            );
            d.insert(
                "Python3_LIBRARIES".to_string(),
                path_string(&python_home.join("lib").join(format!("libpython{}.so", version))),
            );
            d.insert("Python3_RPATH".to_string(), "$ORIGIN/../python3/lib".to_string());
        }

        if config.enable_monitoring {
            d.insert("LLDB_ENABLE_PERFORMANCE".to_string(), "ON".to_string());
        }
        d
    }

    /// Defines shared by the full-toolchain profiles.
    fn full_toolchain_defines(&self, config: &BuildConfig) -> Vec<(&'static str, String)> {
        let cflags = self.cflags.join(" ");
        let ldflags = self.ldflags.join(" ");
        vec![
            ("CMAKE_C_FLAGS_DEBUG", CFLAGS_DEBUG.to_string()),
            ("CMAKE_CXX_FLAGS_DEBUG", CFLAGS_DEBUG.to_string()),
            ("CMAKE_ASM_FLAGS_DEBUG", CFLAGS_DEBUG.to_string()),
            ("CMAKE_C_FLAGS_RELEASE", CFLAGS_RELEASE.to_string()),
            ("CMAKE_CXX_FLAGS_RELEASE", CFLAGS_RELEASE.to_string()),
            ("CMAKE_ASM_FLAGS_RELEASE", CFLAGS_RELEASE.to_string()),
            ("OPENMP_STANDALONE_BUILD", "ON".to_string()),
            (
                "LLVM_DIR",
                path_string(&self.llvm_root.join("lib").join("cmake").join("llvm")),
            ),
            ("LLVM_ENABLE_FFI", "OFF".to_string()),
            ("LLVM_BUILD_LLVM_DYLIB", "ON".to_string()),
            ("CMAKE_LIBRARY_ARCHITECTURE", self.profile.triple().to_string()),
            ("LLVM_INCLUDE_BENCHMARKS", "OFF".to_string()),
            ("LLVM_INCLUDE_EXAMPLES", "OFF".to_string()),
            ("LLVM_INCLUDE_TESTS", "OFF".to_string()),
            ("LLVM_BUILD_TOOLS", "ON".to_string()),
            ("LLVM_INSTALL_UTILS", "ON".to_string()),
            ("LLVM_ENABLE_ZLIB", "OFF".to_string()),
            ("LLVM_ENABLE_PROJECTS", config.host_projects.join(";")),
            ("CMAKE_NM", self.tool("llvm-nm")),
            ("CMAKE_RANLIB", self.tool("llvm-ranlib")),
            ("CMAKE_OBJCOPY", self.tool("llvm-objcopy")),
            ("CMAKE_OBJDUMP", self.tool("llvm-objdump")),
            ("CMAKE_READELF", self.tool("llvm-readelf")),
            ("CMAKE_STRIP", self.tool("llvm-strip")),
            ("CMAKE_LINKER", self.tool("ld.lld")),
            ("CMAKE_POSITION_INDEPENDENT_CODE", "True".to_string()),
            ("CMAKE_C_FLAGS", cflags.clone()),
            ("CMAKE_ASM_FLAGS", cflags),
            ("CMAKE_SHARED_LINKER_FLAGS", ldflags.clone()),
            ("CMAKE_MODULE_LINKER_FLAGS", ldflags.clone()),
            ("CMAKE_EXE_LINKER_FLAGS", format!("{} -Wl,--gc-sections", ldflags)),
        ]
    }

    fn apply(&mut self, updates: Vec<(&'static str, String)>) {
        for (key, value) in updates {
            self.defines.insert(key.to_string(), value);
        }
    }

    fn update_ohos_aarch64(&mut self, config: &BuildConfig) {
        self.cflags.extend(
            ["-v", "-funwind-tables", "-no-canonical-prefixes", "-D__MUSL__"]
                .iter()
                .map(|s| s.to_string()),
        );
        self.ldflags.extend(
            ["-stdlib=libc++", "-static-libstdc++"]
                .iter()
                .map(|s| s.to_string()),
        );
        if config.strip {
            self.ldflags.push("-s".to_string());
        }

        let updates = self.full_toolchain_defines(config);
        self.apply(updates);
        let cxx_flags = format!("{} -stdlib=libc++", self.cflags.join(" "));
        let llvm_root = path_string(&self.llvm_root);
        self.apply(vec![
            ("LLVM_TARGET_ARCH", "AArch64".to_string()),
            ("CMAKE_CXX_FLAGS", cxx_flags),
            ("CMAKE_C_COMPILER_EXTERNAL_TOOLCHAIN", llvm_root.clone()),
            ("CMAKE_CXX_COMPILER_EXTERNAL_TOOLCHAIN", llvm_root.clone()),
            ("CMAKE_ASM_COMPILER_EXTERNAL_TOOLCHAIN", llvm_root),
        ]);
        if config.enable_assertions {
            self.apply(vec![("LLVM_ENABLE_ASSERTIONS", "ON".to_string())]);
        }
        self.env.insert(
            "LD_LIBRARY_PATH".to_string(),
            path_string(&self.llvm_root.join("lib")),
        );
    }

    fn update_ohos_arm(&mut self, config: &BuildConfig) {
        self.cflags.push("-march=armv7-a -mfloat-abi=soft".to_string());
        let cflags = self.cflags.join(" ");
        let ldflags = self.ldflags.join(" ");
        let prebuilt_bin = config.out_path("llvm_make").join("bin");

        self.apply(vec![
            ("CMAKE_CXX_FLAGS", cflags.clone()),
            ("CMAKE_ASM_FLAGS", cflags.clone()),
            ("CMAKE_C_FLAGS", cflags),
            ("CMAKE_SHARED_LINKER_FLAGS", ldflags.clone()),
            ("CMAKE_MODULE_LINKER_FLAGS", ldflags.clone()),
            ("CMAKE_EXE_LINKER_FLAGS", ldflags),
            ("LLVM_ENABLE_ASSERTIONS", "OFF".to_string()),
            ("LLVM_USE_NEWPM", "ON".to_string()),
            ("LLVM_ENABLE_BINDINGS", "OFF".to_string()),
            ("CLANG_REPOSITORY_STRING", "llvm-project".to_string()),
            ("COMPILER_RT_BUILD_XRAY", "OFF".to_string()),
            ("CMAKE_POSITION_INDEPENDENT_CODE", "ON".to_string()),
            ("LLVM_ENABLE_PER_TARGET_RUNTIME_DIR", "ON".to_string()),
            ("COMPILER_RT_USE_BUILTINS_LIBRARY", "ON".to_string()),
            ("LLVM_ENABLE_LIBCXX", "ON".to_string()),
            ("LLVM_ENABLE_PROJECTS", "clang;lldb".to_string()),
            ("CLANG_TABLEGEN", path_string(&prebuilt_bin.join("clang-tblgen"))),
            ("LLDB_TABLEGEN", path_string(&prebuilt_bin.join("lldb-tblgen"))),
        ]);
    }

    fn update_linux_aarch64(&mut self, config: &BuildConfig) {
        self.cflags
            .extend(["-v", "-funwind-tables"].iter().map(|s| s.to_string()));
        self.ldflags.push("-static-libstdc++".to_string());

        let updates = self.full_toolchain_defines(config);
        self.apply(updates);
        let cflags = self.cflags.join(" ");
        self.apply(vec![
            ("CMAKE_SYSTEM_NAME", "Linux".to_string()),
            ("CMAKE_SYSROOT", String::new()),
            ("OHOS", "0".to_string()),
            ("CMAKE_CXX_FLAGS", cflags),
        ]);
        if config.enable_assertions {
            self.apply(vec![("LLVM_ENABLE_ASSERTIONS", "ON".to_string())]);
        }
        if !config.lldb.build_libxml2 {
            self.apply(vec![("LLDB_ENABLE_LIBXML2", "OFF".to_string())]);
        }
        self.env.insert(
            "LD_LIBRARY_PATH".to_string(),
            path_string(&self.llvm_root.join("lib")),
        );
    }

    /// Prebuilt Python tree copied into the install for the prebuilts profile.
    pub fn prebuilt_python(&self, config: &BuildConfig) -> Option<PathBuf> {
        self.profile
            .python_from_prebuilts()
            .then(|| self.python_install_dir(config))
    }
}

fn base_cflags(profile: Profile) -> Vec<String> {
    vec![
        "-fstack-protector-strong".to_string(),
        format!("--target={}", profile.triple()),
        "-ffunction-sections".to_string(),
        "-fdata-sections".to_string(),
    ]
}

fn base_ldflags(profile: Profile) -> Vec<String> {
    let mut ldflags: Vec<String> = [
        "-fuse-ld=lld",
        "-Wl,--gc-sections",
        "-Wl,--build-id=sha1",
        "-Wl,-z,relro,-z,now",
        "-pie",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    if profile.system_name() == "ohos" {
        ldflags.push("--rtlib=compiler-rt".to_string());
        ldflags.push("-lunwind".to_string());
    }
    ldflags
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
