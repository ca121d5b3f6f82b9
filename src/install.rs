// src/install.rs

//! Extraction of package archives to the filesystem.
//!
//! Entries are extracted in archive order with permissions and
//! timestamps preserved (ownership too when running as root). The
//! skip list drops entries entirely; the keep list redirects entries
//! that would overwrite an existing file into the rejected-files area,
//! where redundant copies are pruned again after comparison.

use crate::archive;
use crate::config::Config;
use crate::fsutil;
use crate::{Error, Result};
use nix::sys::stat::{Mode, SFlag, makedev, mknod};
use nix::unistd::{Uid, mkfifo};
use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Entry, EntryType};
use tracing::debug;

/// Install a package archive under the configured root.
///
/// `keep_list` paths that already exist on disk are extracted into the
/// rejected-files area instead of being overwritten; `non_install_list`
/// paths are not extracted at all. A failed entry aborts a fresh
/// install; an upgrade logs the failure and keeps going.
pub fn pkg_install(
    config: &Config,
    filename: &Path,
    keep_list: &BTreeSet<String>,
    non_install_list: &BTreeSet<String>,
    upgrade: bool,
) -> Result<()> {
    let mut tar = archive::open_archive(filename)?;
    tar.set_preserve_permissions(true);
    tar.set_preserve_mtime(true);
    tar.set_unpack_xattrs(true);
    // chown only works as root; hermetic test roots run unprivileged.
    let as_root = Uid::effective().is_root();
    tar.set_preserve_ownerships(as_root);

    let reject_dir = config.rejected_dir();
    let mut count = 0usize;

    for entry in tar.entries().map_err(|e| Error::io("read", filename, e))? {
        let mut entry = entry.map_err(|e| Error::io("read", filename, e))?;
        let archive_path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        count += 1;

        if non_install_list.contains(&archive_path) {
            println!("tarpkg: ignoring {archive_path}");
            continue;
        }

        let original_target = config.resolve(&archive_path);
        let rejected = fsutil::exists(&original_target) && keep_list.contains(&archive_path);
        let target = if rejected {
            reject_dir.join(archive_path.trim_end_matches('/'))
        } else {
            original_target.clone()
        };

        if let Err(e) = extract_entry(config, &mut entry, &target, as_root) {
            eprintln!("tarpkg: could not install {archive_path}: {e}");
            if !upgrade {
                return Err(Error::Extract {
                    path: archive_path,
                    message: e.to_string(),
                });
            }
            continue;
        }

        if rejected {
            resolve_rejected(&entry, &reject_dir, &target, &original_target, &archive_path);
        }
    }

    if count == 0 {
        return Err(Error::EmptyPackage);
    }

    debug!("{count} entries extracted from {}", filename.display());

    Ok(())
}

/// Extract one archive entry to `target`, unlinking whatever sits there
/// unless both sides are directories (directories merge).
fn extract_entry(
    config: &Config,
    entry: &mut Entry<'_, Box<dyn Read>>,
    target: &PathBuf,
    as_root: bool,
) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let kind = entry.header().entry_type();

    if fsutil::exists(target) {
        let merging_dirs =
            kind.is_dir() && fs::symlink_metadata(target).map(|m| m.is_dir()).unwrap_or(false);
        if !merging_dirs {
            fsutil::remove_entry(target)?;
        }
    }

    match kind {
        EntryType::Char | EntryType::Block => {
            let sflag = if kind.is_character_special() {
                SFlag::S_IFCHR
            } else {
                SFlag::S_IFBLK
            };
            let mode = Mode::from_bits_truncate(entry.header().mode()?);
            let major = entry.header().device_major()?.unwrap_or(0);
            let minor = entry.header().device_minor()?.unwrap_or(0);
            mknod(target, sflag, mode, makedev(major as u64, minor as u64))
                .map_err(std::io::Error::from)?;
            restore_owner(entry, target, as_root)?;
        }
        EntryType::Fifo => {
            let mode = Mode::from_bits_truncate(entry.header().mode()?);
            mkfifo(target, mode).map_err(std::io::Error::from)?;
            restore_owner(entry, target, as_root)?;
        }
        EntryType::Link => {
            // Hard-link targets in the archive are root-relative; resolve
            // them against the installation root, not the process cwd.
            let link = entry.link_name_bytes().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, "hard link without target")
            })?;
            let link = String::from_utf8_lossy(&link).into_owned();
            fs::hard_link(config.resolve(&link), target)?;
        }
        _ => {
            // Regular files, directories and symlinks are the tar crate's
            // business; it honors the preserve flags set on the archive.
            entry.unpack(target)?;
        }
    }

    Ok(())
}

fn restore_owner(
    entry: &Entry<'_, Box<dyn Read>>,
    target: &Path,
    as_root: bool,
) -> std::io::Result<()> {
    if !as_root {
        return Ok(());
    }
    let uid = entry.header().uid()? as u32;
    let gid = entry.header().gid()? as u32;
    std::os::unix::fs::lchown(target, Some(uid), Some(gid))
}

/// Decide what to do with a freshly written rejected copy: drop it if it
/// adds nothing over the kept original, otherwise leave it for manual
/// reconciliation.
fn resolve_rejected(
    entry: &Entry<'_, Box<dyn Read>>,
    reject_dir: &Path,
    rejected: &Path,
    original: &Path,
    archive_path: &str,
) {
    let redundant = if entry.header().entry_type().is_dir() {
        // Directories merge rather than replace, so metadata equality is
        // enough; contents are reconciled entry by entry.
        fsutil::metadata_equal(rejected, original)
    } else {
        fsutil::metadata_equal(rejected, original)
            && (fsutil::is_empty_regular(rejected) || fsutil::content_equal(rejected, original))
    };

    if redundant {
        fsutil::remove_with_empty_parents(reject_dir, rejected);
    } else {
        println!("tarpkg: rejecting {archive_path}, keeping existing version");
    }
}
