// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Core error types for tarpkg
#[derive(Error, Debug)]
pub enum Error {
    /// I/O failure with the operation and path that failed
    #[error("could not {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another process holds the database lock
    #[error("package database is currently locked by another process")]
    DatabaseLocked,

    /// Malformed rule configuration file
    #[error("{}:{line}: {message}, aborting", file.display())]
    Rules {
        file: PathBuf,
        line: usize,
        message: String,
    },

    /// Package filename does not follow the name#version convention
    #[error("could not determine name and/or version of {0}: invalid package name")]
    PackageName(String),

    /// Archive yielded zero entries
    #[error("empty package")]
    EmptyPackage,

    /// A single archive entry failed to extract
    #[error("could not install {path}: {message}")]
    Extract { path: String, message: String },

    /// Unresolved file conflicts on an unforced install
    #[error("listed file(s) already installed (use -f to ignore and overwrite)")]
    Conflicts(Vec<String>),

    /// Install without upgrade mode over an existing package
    #[error("package {0} already installed (use -u to upgrade)")]
    AlreadyInstalled(String),

    /// Upgrade of a package that was never installed
    #[error("package {0} not previously installed (skip -u to install)")]
    NotInstalled(String),
}

impl Error {
    /// Wrap an I/O error with the failing operation and path.
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Result type alias using tarpkg's Error type
pub type Result<T> = std::result::Result<T, Error>;
