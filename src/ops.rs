// src/ops.rs

//! High-level install and remove operations.
//!
//! These drive the whole pipeline: lock, database load, manifest read,
//! rule filtering, conflict resolution, extraction, commit, and the
//! shared-library cache refresh after a successful mutation. The
//! exclusive lock is held for the full scope of either operation.

use crate::archive;
use crate::config::Config;
use crate::db::PackageDb;
use crate::install;
use crate::lock::DbLock;
use crate::rules;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

/// Options for [`install_package`].
#[derive(Debug, Default)]
pub struct InstallOptions {
    /// Replace an already-installed package of the same name.
    pub upgrade: bool,
    /// Clear conflicting files instead of aborting.
    pub force: bool,
    /// Alternate rule configuration file.
    pub rules_file: Option<PathBuf>,
}

/// Install or upgrade a package archive.
///
/// On a failed fresh install the tentative record is rolled back and
/// re-committed before the error is surfaced, so a failed install never
/// leaves an orphaned database entry. A failed upgrade keeps whatever
/// extracted and stays recorded.
pub fn install_package(config: &Config, package: &Path, opts: &InstallOptions) -> Result<()> {
    let _lock = DbLock::acquire(config, true)?;
    let mut db = PackageDb::open(config.clone())?;

    let (name, mut record) = archive::pkg_open(package)?;

    let rules_file = opts
        .rules_file
        .clone()
        .unwrap_or_else(|| config.rules_file());
    let rules = rules::read_rules(&rules_file)?;

    let installed = db.find(&name);
    if installed && !opts.upgrade {
        return Err(Error::AlreadyInstalled(name));
    }
    if !installed && opts.upgrade {
        return Err(Error::NotInstalled(name));
    }

    let non_install_files = rules::apply_install_rules(&mut record, &rules);

    let conflicts = db.find_conflicts(&name, &record);
    if !conflicts.is_empty() {
        if opts.force {
            let keep_list = if opts.upgrade {
                rules::make_keep_list(&conflicts, &rules)
            } else {
                BTreeSet::new()
            };
            db.remove_files(&conflicts, &keep_list);
        } else {
            for file in &conflicts {
                eprintln!("{file}");
            }
            return Err(Error::Conflicts(conflicts.into_iter().collect()));
        }
    }

    let mut keep_list = BTreeSet::new();
    if opts.upgrade {
        keep_list = rules::make_keep_list(&record.files, &rules);
        db.remove_with_keep(&name, &keep_list);
    }

    db.add(&name, record);
    db.commit()?;

    info!(
        "{} {name}",
        if opts.upgrade { "upgrading" } else { "installing" }
    );

    if let Err(e) = install::pkg_install(config, package, &keep_list, &non_install_files, installed)
    {
        if !installed {
            // Never leave an orphaned record behind a failed fresh install.
            db.remove(&name);
            db.commit()?;
            return Err(e);
        }
        // An upgrade degrades gracefully; the failed entries were already
        // reported as they happened.
        warn!("errors during upgrade of {name}: {e}");
    }

    ldconfig(config);

    Ok(())
}

/// Remove an installed package, its unshared files, and its record.
pub fn remove_package(config: &Config, name: &str) -> Result<()> {
    let _lock = DbLock::acquire(config, true)?;
    let mut db = PackageDb::open(config.clone())?;

    if !db.find(name) {
        return Err(Error::NotInstalled(name.to_string()));
    }

    info!("removing {name}");

    db.remove(name);
    db.commit()?;

    ldconfig(config);

    Ok(())
}

/// Refresh the shared-library cache after a successful mutation.
///
/// Runs `/sbin/ldconfig -r <root>` when `<root>/etc/ld.so.conf` exists.
/// Failure is reported but never rolls back the committed change.
pub fn ldconfig(config: &Config) {
    if !config.root().join(Config::LDCONFIG_CONF).exists() {
        return;
    }

    match Command::new(Config::LDCONFIG)
        .arg("-r")
        .arg(config.root())
        .status()
    {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("{} exited with {status}", Config::LDCONFIG),
        Err(e) => eprintln!("tarpkg: could not execute {}: {e}", Config::LDCONFIG),
    }
}
