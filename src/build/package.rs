//! Release packaging: stage the install tree, strip it and write a `.tar.zst`.

use super::runtime::mirror_tree;
use crate::process::Cmd;
use anyhow::{bail, Context, Result};
use log::{info, warn};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tar::Builder as TarBuilder;
use walkdir::WalkDir;

/// `bin/` entries that are scripts even without a shebang check.
const SCRIPT_BINS: &[&str] = &["git-clang-format", "scan-build", "scan-view"];

/// What a finished package looks like on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageOutput {
    pub archive: PathBuf,
    pub sha256: String,
    pub size: u64,
}

/// Package `install_dir` as `clang-<build_name>-<host>.tar.zst` in `packages_dir`.
///
/// The tree is staged under `<stage_root>/<host>/clang-<build_name>` first so
/// stripping and trimming never touch the install itself. Symlinks are
/// archived as links unless `dereference` is set.
pub fn package_install(
    install_dir: &Path,
    stage_root: &Path,
    packages_dir: &Path,
    build_name: &str,
    host: &str,
    llvm_strip: Option<&Path>,
    dereference: bool,
) -> Result<PackageOutput> {
    if !install_dir.is_dir() {
        bail!("install dir '{}' does not exist", install_dir.display());
    }
    let package_name = format!("clang-{}", build_name);
    let host_stage = stage_root.join(host);
    if host_stage.exists() {
        fs::remove_dir_all(&host_stage)
            .with_context(|| format!("removing stale stage '{}'", host_stage.display()))?;
    }
    let staged = host_stage.join(&package_name);
    mirror_tree(install_dir, &staged)?;

    let cmake_dir = staged.join("lib").join("cmake");
    if cmake_dir.exists() {
        fs::remove_dir_all(&cmake_dir)
            .with_context(|| format!("removing '{}'", cmake_dir.display()))?;
    }

    if let Some(llvm_strip) = llvm_strip {
        let stripped = strip_binaries(&staged.join("bin"), llvm_strip)?;
        info!("stripped {} binaries", stripped);
    }

    fs::create_dir_all(packages_dir)
        .with_context(|| format!("creating packages dir '{}'", packages_dir.display()))?;
    let archive = packages_dir.join(format!("{}-{}.tar.zst", package_name, host));
    create_tar_zst(&host_stage, &archive, dereference)?;

    let (sha256, size) = write_checksum(&archive)?;
    Ok(PackageOutput {
        archive,
        sha256,
        size,
    })
}

/// Strip every regular, non-script file directly under `bin_dir`.
pub fn strip_binaries(bin_dir: &Path, llvm_strip: &Path) -> Result<usize> {
    if !bin_dir.is_dir() {
        return Ok(0);
    }
    let mut entries: Vec<PathBuf> = fs::read_dir(bin_dir)
        .with_context(|| format!("reading '{}'", bin_dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    let mut stripped = 0;
    for path in entries {
        let md = fs::symlink_metadata(&path)?;
        if !md.is_file() || is_script(&path)? {
            continue;
        }
        Cmd::new(llvm_strip)
            .arg_path(&path)
            .error_msg(format!("stripping '{}'", path.display()))
            .run()?;
        stripped += 1;
    }
    Ok(stripped)
}

fn is_script(path: &Path) -> Result<bool> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if SCRIPT_BINS.contains(&name.as_str()) {
        return Ok(true);
    }
    let mut head = [0u8; 2];
    let mut file = File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
    let n = file.read(&mut head)?;
    Ok(n == 2 && &head == b"#!")
}

/// Deterministic `.tar.zst` of `src_dir`.
///
/// With `dereference`, links are archived as the files they point to and
/// dangling links are left out; otherwise they become symlink entries.
pub fn create_tar_zst(src_dir: &Path, out_path: &Path, dereference: bool) -> Result<()> {
    let out = File::create(out_path).with_context(|| format!("creating '{}'", out_path.display()))?;
    let encoder = zstd::stream::Encoder::new(out, 3)?;
    let mut builder = TarBuilder::new(encoder);

    let mut entries: Vec<PathBuf> = vec![];
    for ent in WalkDir::new(src_dir).follow_links(dereference) {
        let ent = match ent {
            Ok(ent) => ent,
            Err(err) if is_dangling_link(&err) => {
                warn!("leaving dangling link '{}' out of the package", err.path().unwrap_or(src_dir).display());
                continue;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("walking package tree '{}'", src_dir.display()));
            }
        };
        if ent.path() != src_dir {
            entries.push(ent.path().to_path_buf());
        }
    }
    entries.sort_by(|a, b| {
        let ra = a.strip_prefix(src_dir).unwrap_or(a);
        let rb = b.strip_prefix(src_dir).unwrap_or(b);
        ra.cmp(rb)
    });

    for p in entries {
        let rel = p.strip_prefix(src_dir).unwrap_or(&p).to_string_lossy().into_owned();
        let md = if dereference {
            fs::metadata(&p)
        } else {
            fs::symlink_metadata(&p)
        }
        .with_context(|| format!("reading metadata of '{}'", p.display()))?;

        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        {
            use std::os::unix::fs::PermissionsExt;
            header.set_mode(md.permissions().mode());
        }

        if md.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_cksum();
            builder.append_data(&mut header, &rel, std::io::empty())?;
        } else if md.file_type().is_symlink() {
            let target = fs::read_link(&p).with_context(|| format!("reading link '{}'", p.display()))?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_link_name(&target)?;
            header.set_cksum();
            builder.append_data(&mut header, &rel, std::io::empty())?;
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(md.len());
            header.set_cksum();
            let file = File::open(&p).with_context(|| format!("opening '{}'", p.display()))?;
            builder.append_data(&mut header, &rel, BufReader::new(file))?;
        }
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;
    Ok(())
}

fn is_dangling_link(err: &walkdir::Error) -> bool {
    let not_found = err
        .io_error()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound);
    not_found && err.path().is_some_and(|p| p.is_symlink())
}

/// Hash `archive` and write the `sha256sum`-style `<archive>.sha256` next to it.
///
/// Returns the hex digest and the archive size.
pub fn write_checksum(archive: &Path) -> Result<(String, u64)> {
    let mut file =
        File::open(archive).with_context(|| format!("opening package '{}'", archive.display()))?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)
        .with_context(|| format!("hashing package '{}'", archive.display()))?;
    let sha256 = format!("{:x}", hasher.finalize());

    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sidecar = PathBuf::from(format!("{}.sha256", archive.display()));
    fs::write(&sidecar, format!("{}  {}\n", sha256, file_name))
        .with_context(|| format!("writing '{}'", sidecar.display()))?;
    Ok((sha256, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn install_tree(root: &Path) -> PathBuf {
        let install = root.join("ohos-aarch64-install");
        fs::create_dir_all(install.join("bin")).unwrap();
        fs::create_dir_all(install.join("lib/cmake/llvm")).unwrap();
        fs::write(install.join("bin/clang-15"), "ELF").unwrap();
        std::os::unix::fs::symlink("clang-15", install.join("bin/clang")).unwrap();
        fs::write(install.join("bin/run-clang-tidy"), "#!/usr/bin/env python3\n").unwrap();
        fs::write(install.join("bin/scan-build"), "perl").unwrap();
        fs::write(install.join("lib/cmake/llvm/LLVMConfig.cmake"), "").unwrap();
        fs::write(install.join("lib/libLLVM.so"), "so").unwrap();
        install
    }

    fn fake_strip(dir: &Path) -> (PathBuf, PathBuf) {
        let log = dir.join("strip.log");
        let strip = dir.join("llvm-strip");
        fs::write(&strip, format!("#!/bin/sh\nbasename \"$1\" >> '{}'\n", log.display())).unwrap();
        fs::set_permissions(&strip, fs::Permissions::from_mode(0o755)).unwrap();
        (strip, log)
    }

    /// `(path, entry type, link target)` for every archive member.
    fn archive_entries(archive: &Path) -> Vec<(String, tar::EntryType, Option<PathBuf>)> {
        let file = File::open(archive).unwrap();
        let decoder = zstd::stream::Decoder::new(file).unwrap();
        let mut tar = tar::Archive::new(decoder);
        tar.entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                let path = e.path().unwrap().to_string_lossy().into_owned();
                let link = e.link_name().unwrap().map(|l| l.into_owned());
                (path, e.header().entry_type(), link)
            })
            .collect()
    }

    fn entry<'a>(
        entries: &'a [(String, tar::EntryType, Option<PathBuf>)],
        name: &str,
    ) -> &'a (String, tar::EntryType, Option<PathBuf>) {
        entries.iter().find(|(path, _, _)| path == name).unwrap()
    }

    #[test]
    fn test_strip_skips_scripts_and_links() {
        let temp = TempDir::new().unwrap();
        let install = install_tree(temp.path());
        let (strip, log) = fake_strip(temp.path());

        let stripped = strip_binaries(&install.join("bin"), &strip).unwrap();

        assert_eq!(stripped, 1);
        assert_eq!(fs::read_to_string(log).unwrap(), "clang-15\n");
    }

    #[test]
    fn test_package_install_keeps_symlinks() {
        let temp = TempDir::new().unwrap();
        let install = install_tree(temp.path());
        let (strip, _) = fake_strip(temp.path());
        let packages = temp.path().join("packages");

        let output = package_install(
            &install,
            &temp.path().join("install"),
            &packages,
            "dev",
            "ohos-arm",
            Some(&strip),
            false,
        )
        .unwrap();

        assert_eq!(output.archive, packages.join("clang-dev-ohos-arm.tar.zst"));
        assert_eq!(output.sha256.len(), 64);
        let sidecar = fs::read_to_string(packages.join("clang-dev-ohos-arm.tar.zst.sha256")).unwrap();
        assert_eq!(sidecar, format!("{}  clang-dev-ohos-arm.tar.zst\n", output.sha256));

        let entries = archive_entries(&output.archive);
        assert_eq!(entries[0].0.trim_end_matches('/'), "clang-dev");
        let clang = entry(&entries, "clang-dev/bin/clang");
        assert_eq!(clang.1, tar::EntryType::Symlink);
        assert_eq!(clang.2.as_deref(), Some(Path::new("clang-15")));
        assert_eq!(entry(&entries, "clang-dev/bin/clang-15").1, tar::EntryType::Regular);
        assert_eq!(entry(&entries, "clang-dev/lib/libLLVM.so").1, tar::EntryType::Regular);
        assert!(!entries.iter().any(|(n, _, _)| n.contains("cmake")));

        // The install itself is untouched.
        assert!(install.join("lib/cmake").is_dir());
    }

    #[test]
    fn test_package_install_dereferences_links() {
        let temp = TempDir::new().unwrap();
        let install = install_tree(temp.path());
        let packages = temp.path().join("packages");

        let output = package_install(
            &install,
            &temp.path().join("install"),
            &packages,
            "dev",
            "ohos-aarch64",
            None,
            true,
        )
        .unwrap();

        let entries = archive_entries(&output.archive);
        let clang = entry(&entries, "clang-dev/bin/clang");
        assert_eq!(clang.1, tar::EntryType::Regular);
        assert!(clang.2.is_none());
    }

    #[test]
    fn test_dangling_links_do_not_abort_packaging() {
        let temp = TempDir::new().unwrap();
        let install = install_tree(temp.path());
        std::os::unix::fs::symlink("libgone.so.1", install.join("lib/libgone.so")).unwrap();

        let kept = temp.path().join("kept.tar.zst");
        create_tar_zst(&install, &kept, false).unwrap();
        let entries = archive_entries(&kept);
        assert_eq!(entry(&entries, "lib/libgone.so").1, tar::EntryType::Symlink);

        let dereferenced = temp.path().join("deref.tar.zst");
        create_tar_zst(&install, &dereferenced, true).unwrap();
        let entries = archive_entries(&dereferenced);
        assert!(!entries.iter().any(|(n, _, _)| n == "lib/libgone.so"));
        assert!(entries.iter().any(|(n, _, _)| n == "lib/libLLVM.so"));
    }

    #[test]
    fn test_archives_are_reproducible() {
        let temp = TempDir::new().unwrap();
        let install = install_tree(temp.path());
        let a = temp.path().join("a.tar.zst");
        let b = temp.path().join("b.tar.zst");

        create_tar_zst(&install, &a, false).unwrap();
        create_tar_zst(&install, &b, false).unwrap();

        assert_eq!(write_checksum(&a).unwrap(), write_checksum(&b).unwrap());
        assert!(temp.path().join("a.tar.zst.sha256").is_file());
    }

    #[test]
    fn test_missing_install_is_an_error() {
        let temp = TempDir::new().unwrap();
        let err = package_install(
            &temp.path().join("none"),
            temp.path(),
            temp.path(),
            "dev",
            "ohos-arm",
            None,
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
