//! Runtime libraries and headers borrowed from the main toolchain install.

use super::profile::Profile;
use anyhow::{Context, Result};
use log::warn;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Runtime triples shipped with toolchains from the shared cross builder.
const CROSS_RUNTIME_TRIPLES: &[&str] = &[
    "arm-liteos-ohos",
    "arm-linux-ohos",
    "aarch64-linux-ohos",
    "riscv64-linux-ohos",
    "loongarch64-linux-ohos",
    "mipsel-linux-ohos",
    "x86_64-linux-ohos",
];

/// The OHOS AArch64 host toolchain carries no loongarch64 runtimes.
const OHOS_AARCH64_RUNTIME_TRIPLES: &[&str] = &[
    "arm-liteos-ohos",
    "arm-linux-ohos",
    "aarch64-linux-ohos",
    "riscv64-linux-ohos",
    "mipsel-linux-ohos",
    "x86_64-linux-ohos",
];

const HEADER_DIRS: &[&str] = &["c++", "libcxx-ohos"];

/// Triples whose runtimes are copied into a `profile` install.
pub fn runtime_triples(profile: Profile) -> &'static [&'static str] {
    match profile {
        Profile::OhosAarch64 => OHOS_AARCH64_RUNTIME_TRIPLES,
        Profile::OhosArm | Profile::LinuxAarch64 => CROSS_RUNTIME_TRIPLES,
    }
}

/// Copy per-triple runtimes and libc++ headers from `llvm_root` into `install`.
///
/// Returns the number of trees copied.
pub fn copy_runtimes(
    profile: Profile,
    llvm_root: &Path,
    install: &Path,
    clang_version: &str,
) -> Result<usize> {
    let clang_lib = Path::new("lib").join("clang").join(clang_version).join("lib");
    let mut trees: Vec<_> = runtime_triples(profile)
        .iter()
        .flat_map(|triple| [Path::new("lib").join(triple), clang_lib.join(triple)])
        .collect();
    trees.extend(HEADER_DIRS.iter().map(|dir| Path::new("include").join(dir)));

    let mut copied = 0;
    for rel in trees {
        if replace_tree(&llvm_root.join(&rel), &install.join(&rel))? {
            copied += 1;
        }
    }
    Ok(copied)
}

/// Replace `dst` with a copy of `src`. A missing `src` is skipped.
fn replace_tree(src: &Path, dst: &Path) -> Result<bool> {
    if !src.is_dir() {
        warn!("main toolchain has no '{}', skipping", src.display());
        return Ok(false);
    }
    if dst.exists() || dst.is_symlink() {
        fs::remove_dir_all(dst)
            .with_context(|| format!("removing stale runtime tree '{}'", dst.display()))?;
    }
    mirror_tree(src, dst)?;
    Ok(true)
}

/// Mirror the toolchain tree at `src` into `dst`, recreating symlinks
/// (versioned `.so` links, `clang++ -> clang`) instead of following them.
///
/// Returns the number of files and links written.
pub fn mirror_tree(src: &Path, dst: &Path) -> Result<usize> {
    let mut written = 0;
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking toolchain tree '{}'", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("relativizing '{}'", entry.path().display()))?;
        let target = dst.join(rel);
        let kind = entry.file_type();

        if kind.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("creating toolchain dir '{}'", target.display()))?;
            continue;
        }

        if kind.is_symlink() {
            let link = fs::read_link(entry.path())
                .with_context(|| format!("reading link '{}'", entry.path().display()))?;
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target)
                    .with_context(|| format!("replacing '{}'", target.display()))?;
            }
            std::os::unix::fs::symlink(&link, &target).with_context(|| {
                format!("linking '{}' -> '{}'", target.display(), link.display())
            })?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("copying toolchain file '{}'", entry.path().display())
            })?;
        }
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn main_toolchain(root: &Path) {
        let arm_lib = root.join("lib/arm-linux-ohos");
        fs::create_dir_all(arm_lib.join("nanlegacy")).unwrap();
        fs::write(arm_lib.join("libc++.so"), "so").unwrap();
        std::os::unix::fs::symlink("libc++.so", arm_lib.join("libc++.so.1")).unwrap();
        let rt = root.join("lib/clang/15.0.4/lib/aarch64-linux-ohos");
        fs::create_dir_all(&rt).unwrap();
        fs::write(rt.join("libclang_rt.builtins.a"), "a").unwrap();
        fs::create_dir_all(root.join("include/c++/v1")).unwrap();
        fs::write(root.join("include/c++/v1/vector"), "hdr").unwrap();
        let loong = root.join("lib/loongarch64-linux-ohos");
        fs::create_dir_all(&loong).unwrap();
        fs::write(loong.join("libc++.so"), "so").unwrap();
    }

    #[test]
    fn test_copy_runtimes_replaces_destination() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("llvm-install");
        let install = temp.path().join("ohos-arm-install");
        main_toolchain(&root);

        let stale = install.join("lib/arm-linux-ohos");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("stale.so"), "old").unwrap();

        let copied = copy_runtimes(Profile::OhosArm, &root, &install, "15.0.4").unwrap();

        assert_eq!(copied, 4);
        assert!(install.join("lib/arm-linux-ohos/libc++.so").is_file());
        assert!(install.join("lib/arm-linux-ohos/nanlegacy").is_dir());
        assert!(!install.join("lib/arm-linux-ohos/stale.so").exists());
        assert_eq!(
            fs::read_link(install.join("lib/arm-linux-ohos/libc++.so.1")).unwrap(),
            Path::new("libc++.so")
        );
        assert!(install
            .join("lib/clang/15.0.4/lib/aarch64-linux-ohos/libclang_rt.builtins.a")
            .is_file());
        assert!(install.join("include/c++/v1/vector").is_file());
        assert!(install.join("lib/loongarch64-linux-ohos/libc++.so").is_file());
        assert!(!install.join("include/libcxx-ohos").exists());
    }

    #[test]
    fn test_ohos_aarch64_skips_loongarch64() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("llvm-install");
        let install = temp.path().join("ohos-aarch64-install");
        main_toolchain(&root);

        let copied = copy_runtimes(Profile::OhosAarch64, &root, &install, "15.0.4").unwrap();

        assert_eq!(copied, 3);
        assert!(install.join("lib/arm-linux-ohos/libc++.so").is_file());
        assert!(!install.join("lib/loongarch64-linux-ohos").exists());
    }

    #[test]
    fn test_runtime_triples_per_profile() {
        let aarch64 = runtime_triples(Profile::OhosAarch64);
        assert_eq!(aarch64.len(), 6);
        assert!(!aarch64.contains(&"loongarch64-linux-ohos"));
        assert!(aarch64.contains(&"mipsel-linux-ohos"));

        for profile in [Profile::OhosArm, Profile::LinuxAarch64] {
            let triples = runtime_triples(profile);
            assert_eq!(triples.len(), 7);
            assert!(triples.contains(&"loongarch64-linux-ohos"));
            assert!(triples.contains(&"arm-liteos-ohos"));
        }
    }

    #[test]
    fn test_mirror_tree_keeps_dangling_links() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("bin")).unwrap();
        fs::write(src.join("bin/clang-15"), "elf").unwrap();
        std::os::unix::fs::symlink("clang-15", src.join("bin/clang")).unwrap();
        std::os::unix::fs::symlink("gone.so", src.join("libgone.so")).unwrap();

        let written = mirror_tree(&src, &temp.path().join("dst")).unwrap();

        assert_eq!(written, 3);
        let dst = temp.path().join("dst");
        assert_eq!(fs::read_link(dst.join("bin/clang")).unwrap(), Path::new("clang-15"));
        assert_eq!(fs::read_link(dst.join("libgone.so")).unwrap(), Path::new("gone.so"));
        assert_eq!(fs::read_to_string(dst.join("bin/clang-15")).unwrap(), "elf");
    }

    #[test]
    fn test_missing_root_copies_nothing() {
        let temp = TempDir::new().unwrap();
        let copied =
            copy_runtimes(Profile::LinuxAarch64, &temp.path().join("none"), temp.path(), "15.0.4")
                .unwrap();
        assert_eq!(copied, 0);
    }
}
