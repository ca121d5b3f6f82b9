// src/check.rs

//! Integrity audits over installed packages.
//!
//! Two checks driven from the database records: symlinks whose targets
//! no longer resolve (or resolve into files no package owns), and
//! recorded files that have disappeared from the filesystem. Both are
//! pure queries; nothing here mutates the root or the database.

use crate::config::Config;
use crate::db::PackageDb;
use crate::fsutil;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// A recorded symlink whose target needs attention.
#[derive(Debug, PartialEq, Eq)]
pub struct SymlinkIssue {
    /// Database-relative path of the symlink.
    pub file: String,
    /// Link target exactly as stored on disk.
    pub target: String,
    /// The target does not exist at all.
    pub broken: bool,
    /// Packages owning the target; empty when broken or unowned.
    pub owners: BTreeSet<String>,
}

/// A recorded file that no longer exists on the filesystem.
#[derive(Debug, PartialEq, Eq)]
pub struct MissingFile {
    /// Database-relative path of the vanished file.
    pub file: String,
    /// Every package still claiming the path.
    pub owners: BTreeSet<String>,
}

/// Audit the symlinks of one installed package.
///
/// A link whose target is absent is broken. A link whose target exists
/// but is owned by other packages only (or by none) is reported with
/// those owners; links resolving into the audited package itself are
/// fine.
pub fn check_links(config: &Config, db: &PackageDb, name: &str) -> Result<Vec<SymlinkIssue>> {
    let record = db
        .get(name)
        .ok_or_else(|| Error::NotInstalled(name.to_string()))?;

    let mut issues = Vec::new();

    for file in &record.files {
        let full = config.resolve(file);
        let Ok(meta) = fs::symlink_metadata(&full) else {
            continue;
        };
        if !meta.file_type().is_symlink() {
            continue;
        }
        let Ok(target) = fs::read_link(&full) else {
            continue;
        };
        let target_str = target.to_string_lossy().into_owned();

        // Relative targets resolve from the link's directory, absolute
        // ones from the installation root.
        let immediate = if target.is_absolute() {
            config.resolve(&target_str)
        } else {
            full.parent().unwrap_or(Path::new("/")).join(&target)
        };

        if !fsutil::exists(&immediate) {
            issues.push(SymlinkIssue {
                file: file.clone(),
                target: target_str,
                broken: true,
                owners: BTreeSet::new(),
            });
            continue;
        }

        let mut owners = owners_of(config, db, &immediate);
        if let Ok(resolved) = fs::canonicalize(&immediate) {
            owners.extend(owners_of(config, db, &resolved));
        }

        if owners.contains(name) {
            continue;
        }

        issues.push(SymlinkIssue {
            file: file.clone(),
            target: target_str,
            broken: false,
            owners,
        });
    }

    Ok(issues)
}

/// Audit one installed package for recorded files that no longer exist.
pub fn check_disappeared(config: &Config, db: &PackageDb, name: &str) -> Result<Vec<MissingFile>> {
    let record = db
        .get(name)
        .ok_or_else(|| Error::NotInstalled(name.to_string()))?;

    let mut missing = Vec::new();

    for file in &record.files {
        if fsutil::exists(&config.resolve(file)) {
            continue;
        }
        let owners = db
            .packages()
            .iter()
            .filter(|(_, r)| r.files.contains(file))
            .map(|(n, _)| n.clone())
            .collect();
        missing.push(MissingFile {
            file: file.clone(),
            owners,
        });
    }

    Ok(missing)
}

/// Which packages own a filesystem path, looked up database-relatively.
fn owners_of(config: &Config, db: &PackageDb, path: &Path) -> BTreeSet<String> {
    let Ok(rel) = path.strip_prefix(config.root()) else {
        return BTreeSet::new();
    };
    let rel = rel.to_string_lossy();
    // Directory entries are recorded with a trailing slash.
    let as_dir = format!("{rel}/");

    db.packages()
        .iter()
        .filter(|(_, r)| r.files.contains(rel.as_ref()) || r.files.contains(&as_dir))
        .map(|(n, _)| n.clone())
        .collect()
}
