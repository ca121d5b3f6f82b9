// src/db/mod.rs

//! Flat-file package database.
//!
//! The database is a UTF-8 text file of stanzas, one per package:
//! name line, version line, one line per owned file, blank line as the
//! stanza terminator. The whole file is loaded into memory on open;
//! between open and commit the in-memory map is the sole source of
//! truth. Commit rewrites the file through a temp-file/fsync/rename
//! sequence so a crash at any point leaves the previous database intact,
//! with the pre-commit state preserved as `db.backup`.

use crate::config::Config;
use crate::fsutil;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use tracing::debug;

/// Suffix of the temporary file a commit writes before the atomic rename.
pub const INCOMPLETE_SUFFIX: &str = ".incomplete_transaction";

/// Suffix of the hard-linked pre-commit recovery copy.
pub const BACKUP_SUFFIX: &str = ".backup";

/// One installed package: its version and the set of files it owns.
///
/// File paths are stored relative to the installation root; directory
/// entries keep their trailing slash. `BTreeSet` gives the deterministic
/// iteration order the record file and removal logic rely on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageRecord {
    pub version: String,
    pub files: BTreeSet<String>,
}

/// In-memory package database bound to one installation root.
pub struct PackageDb {
    config: Config,
    packages: BTreeMap<String, PackageRecord>,
}

impl PackageDb {
    /// Load the database file under the configured root.
    ///
    /// A stanza with zero files is discarded; malformed trailing data
    /// silently ends the scan at end-of-stream.
    pub fn open(config: Config) -> Result<Self> {
        let path = config.db_file();
        let file = File::open(&path).map_err(|e| Error::io("open", &path, e))?;
        let mut lines = BufReader::new(file).lines();

        let mut packages = BTreeMap::new();

        loop {
            let Some(name) = next_line(&mut lines, &config)? else {
                break;
            };
            let Some(version) = next_line(&mut lines, &config)? else {
                break;
            };

            let mut files = BTreeSet::new();
            loop {
                match next_line(&mut lines, &config)? {
                    None => break,
                    Some(line) if line.is_empty() => break,
                    Some(line) => {
                        files.insert(line);
                    }
                }
            }

            if !files.is_empty() {
                packages.insert(name, PackageRecord { version, files });
            }
        }

        debug!("{} packages found in database", packages.len());

        Ok(PackageDb { config, packages })
    }

    /// Persist the in-memory map via a three-file atomic swap.
    ///
    /// Nothing touches the live file until the final rename; a failure at
    /// any earlier step leaves the previous database in place. The
    /// pre-commit live file survives as a `.backup` hard link.
    pub fn commit(&self) -> Result<()> {
        let db_file = self.config.db_file();
        let db_new = db_file.with_file_name(format!(
            "{}{INCOMPLETE_SUFFIX}",
            db_file.file_name().unwrap_or_default().to_string_lossy()
        ));
        let db_bak = db_file.with_file_name(format!(
            "{}{BACKUP_SUFFIX}",
            db_file.file_name().unwrap_or_default().to_string_lossy()
        ));

        // Leftover from a previously failed commit.
        if let Err(e) = fs::remove_file(&db_new) {
            if e.kind() != ErrorKind::NotFound {
                return Err(Error::io("remove", &db_new, e));
            }
        }

        let file = File::create(&db_new).map_err(|e| Error::io("create", &db_new, e))?;
        let mut out = BufWriter::new(file);

        for (name, record) in &self.packages {
            if record.files.is_empty() {
                continue;
            }
            writeln!(out, "{name}").map_err(|e| Error::io("write", &db_new, e))?;
            writeln!(out, "{}", record.version).map_err(|e| Error::io("write", &db_new, e))?;
            for file in &record.files {
                writeln!(out, "{file}").map_err(|e| Error::io("write", &db_new, e))?;
            }
            writeln!(out).map_err(|e| Error::io("write", &db_new, e))?;
        }

        out.flush().map_err(|e| Error::io("write", &db_new, e))?;
        out.get_ref()
            .sync_all()
            .map_err(|e| Error::io("synchronize", &db_new, e))?;

        // Preserve the pre-commit database as a recovery copy. On the very
        // first commit into a fresh root there is nothing to preserve.
        if db_file.exists() {
            if let Err(e) = fs::remove_file(&db_bak) {
                if e.kind() != ErrorKind::NotFound {
                    return Err(Error::io("remove", &db_bak, e));
                }
            }
            fs::hard_link(&db_file, &db_bak).map_err(|e| Error::io("create", &db_bak, e))?;
        }

        // The only step that makes the new database visible.
        fs::rename(&db_new, &db_file).map_err(|e| Error::io("rename", &db_new, e))?;

        debug!("{} packages written to database", self.packages.len());

        Ok(())
    }

    /// Insert or replace a package record.
    pub fn add(&mut self, name: &str, record: PackageRecord) {
        self.packages.insert(name.to_string(), record);
    }

    /// Is a package with this name installed?
    pub fn find(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// Look up an installed package's record.
    pub fn get(&self, name: &str) -> Option<&PackageRecord> {
        self.packages.get(name)
    }

    /// All installed packages, in name order.
    pub fn packages(&self) -> &BTreeMap<String, PackageRecord> {
        &self.packages
    }

    /// Remove a package and physically delete its files, except those
    /// still owned by another installed package.
    pub fn remove(&mut self, name: &str) {
        self.remove_with_keep(name, &BTreeSet::new());
    }

    /// Remove a package, protecting `keep_list` paths from deletion in
    /// addition to shared-file protection.
    pub fn remove_with_keep(&mut self, name: &str, keep_list: &BTreeSet<String>) {
        let mut files = match self.packages.remove(name) {
            Some(record) => record.files,
            None => return,
        };

        for kept in keep_list {
            files.remove(kept);
        }

        // Shared-file protection: anything another package still owns stays.
        for record in self.packages.values() {
            for file in &record.files {
                files.remove(file);
            }
        }

        self.delete_files(&files);
    }

    /// Strip `files` from every package's record, then physically delete
    /// them except for `keep_list` entries. Used to clear conflicting
    /// files ahead of a forced install.
    pub fn remove_files(&mut self, files: &BTreeSet<String>, keep_list: &BTreeSet<String>) {
        for record in self.packages.values_mut() {
            for file in files {
                record.files.remove(file);
            }
        }

        let mut doomed = files.clone();
        for kept in keep_list {
            doomed.remove(kept);
        }

        self.delete_files(&doomed);
    }

    /// Best-effort physical deletion in reverse lexicographic order, so
    /// directory entries are attempted after their contents. `ENOTEMPTY`
    /// means a shared or externally populated directory and is tolerated
    /// silently; every other failure is reported per file.
    fn delete_files(&self, files: &BTreeSet<String>) {
        for file in files.iter().rev() {
            let path = self.config.resolve(file);
            if !fsutil::exists(&path) {
                continue;
            }
            if let Err(e) = fsutil::remove_entry(&path) {
                if e.kind() == ErrorKind::DirectoryNotEmpty {
                    continue;
                }
                eprintln!("tarpkg: could not remove {}: {}", path.display(), e);
            }
        }
    }

    /// Minimal set of paths that must be cleared before `name` with
    /// manifest `record` can be installed safely.
    pub fn find_conflicts(&self, name: &str, record: &PackageRecord) -> BTreeSet<String> {
        let mut conflicts = BTreeSet::new();

        // Phase 1: collisions with every other installed package.
        for (other, other_record) in &self.packages {
            if other != name {
                for file in record.files.intersection(&other_record.files) {
                    conflicts.insert(file.clone());
                }
            }
        }

        // Phase 2: pre-existing filesystem entries under the root.
        for file in &record.files {
            if !conflicts.contains(file) && fsutil::exists(&self.config.resolve(file)) {
                conflicts.insert(file.clone());
            }
        }

        // Phase 3: directories are merged by the extractor, never conflicts.
        conflicts.retain(|file| !file.ends_with('/'));

        // Phase 4: on upgrade, files the package already owns are not
        // conflicts with itself.
        if let Some(existing) = self.packages.get(name) {
            for file in &existing.files {
                conflicts.remove(file);
            }
        }

        conflicts
    }
}

fn next_line(
    lines: &mut std::io::Lines<BufReader<File>>,
    config: &Config,
) -> Result<Option<String>> {
    match lines.next() {
        None => Ok(None),
        Some(Ok(line)) => Ok(Some(line)),
        Some(Err(e)) => Err(Error::io("read", config.db_file(), e)),
    }
}
