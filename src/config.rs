// src/config.rs

//! Installation-root configuration.
//!
//! Every component takes a [`Config`] at construction instead of reading
//! process-wide statics, so tests can run against throwaway roots.

use std::path::{Path, PathBuf};

/// Delimiter between package name and version in archive filenames.
pub const VERSION_DELIM: char = '#';

/// Package extension prefix; the compression suffix follows it.
pub const PKG_EXT: &str = ".pkg.tar.";

/// Paths derived from one installation root.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
}

impl Config {
    /// Relative path of the database directory under the root.
    pub const PKG_DIR: &'static str = "var/lib/pkg";

    /// Relative path of the database file under the root.
    pub const PKG_DB: &'static str = "var/lib/pkg/db";

    /// Relative path of the rejected-files area under the root.
    pub const PKG_REJECTED: &'static str = "var/lib/pkg/rejected";

    /// Relative path of the default rule configuration file.
    pub const RULES_CONF: &'static str = "etc/pkgadd.conf";

    /// ldconfig binary and the config file gating its invocation.
    pub const LDCONFIG: &'static str = "/sbin/ldconfig";
    pub const LDCONFIG_CONF: &'static str = "etc/ld.so.conf";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = if root.as_os_str().is_empty() {
            PathBuf::from("/")
        } else {
            root
        };
        Config { root }
    }

    /// The installation root all relative paths are resolved against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Database directory, the advisory-lock target.
    pub fn db_dir(&self) -> PathBuf {
        self.root.join(Self::PKG_DIR)
    }

    /// The live database record file.
    pub fn db_file(&self) -> PathBuf {
        self.root.join(Self::PKG_DB)
    }

    /// Staging area for rejected files.
    pub fn rejected_dir(&self) -> PathBuf {
        self.root.join(Self::PKG_REJECTED)
    }

    /// Default rule configuration file location.
    pub fn rules_file(&self) -> PathBuf {
        self.root.join(Self::RULES_CONF)
    }

    /// Resolve a database-relative file path against the root.
    ///
    /// Leading slashes are stripped so an absolute-looking entry still
    /// lands inside the root; `Path::join` would otherwise replace the
    /// root wholesale.
    pub fn resolve(&self, file: &str) -> PathBuf {
        self.root.join(file.trim_matches('/'))
    }
}
