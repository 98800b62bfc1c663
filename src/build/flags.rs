//! cflags/ldflags used by the OHOS GN build, read back from its ninja files.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

const CFLAGS_EXCLUDED: &[&str] = &[
    "-Xclang",
    "-mllvm",
    "-instcombine-lower-dbg-declare=0",
    "-ffunction-sections",
    "-Werror",
    "-g2",
];

const CFLAGS_EXCLUDED_PREFIXES: &[&str] = &["--target=", "-march=", "-mfloat-abi=", "-mtune="];

const LDFLAGS_EXCLUDED: &[&str] = &[
    "-Wl,--exclude-libs=libunwind_llvm.a",
    "-Wl,--exclude-libs=libc++_static.a",
    "-Wl,--exclude-libs=libvpx_assembly_arm.a",
    "--target=arm-linux-ohos",
    "-Werror",
    "--sysroot=obj/third_party/musl",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    Cflags,
    Ldflags,
}

impl FlagKind {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "cflags" => Ok(Self::Cflags),
            "ldflags" => Ok(Self::Ldflags),
            other => bail!("unknown flag kind '{}' (expected cflags or ldflags)", other),
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::Cflags => "cflags = ",
            Self::Ldflags => "ldflags = ",
        }
    }

    fn excluded(self, flag: &str) -> bool {
        match self {
            Self::Cflags => {
                CFLAGS_EXCLUDED.contains(&flag)
                    || CFLAGS_EXCLUDED_PREFIXES.iter().any(|p| flag.starts_with(p))
            }
            Self::Ldflags => LDFLAGS_EXCLUDED.contains(&flag),
        }
    }
}

/// The GN test target ninja file under an OHOS `out` directory.
pub fn ninja_file(out_dir: &Path) -> PathBuf {
    out_dir
        .join("obj")
        .join("toolchain")
        .join("llvm-project")
        .join("llvm-build")
        .join("llvm_test.ninja")
}

/// First `<kind> = ...` line of `text`, split and de-duplicated.
pub fn parse_flags(text: &str, kind: FlagKind) -> Option<Vec<String>> {
    text.lines()
        .map(str::trim_start)
        .find_map(|line| line.strip_prefix(kind.prefix()))
        .map(|flags| dedup(flags.split_whitespace().map(str::to_string)))
}

/// OHOS flags with the build-specific ones removed and `extra` appended.
pub fn ohos_flags(out_dir: &Path, kind: FlagKind, extra: &[String]) -> Result<Vec<String>> {
    let path = ninja_file(out_dir);
    let text =
        fs::read_to_string(&path).with_context(|| format!("reading '{}'", path.display()))?;
    let Some(flags) = parse_flags(&text, kind) else {
        bail!("no '{}' line in '{}'", kind.prefix().trim_end(), path.display());
    };

    Ok(dedup(
        flags
            .into_iter()
            .filter(|flag| !kind.excluded(flag))
            .chain(extra.iter().cloned()),
    ))
}

fn dedup(flags: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    flags.filter(|flag| seen.insert(flag.clone())).collect()
}
