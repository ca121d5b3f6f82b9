// src/lib.rs

//! tarpkg Package Manager
//!
//! Lightweight package manager for tar-based packages with atomic
//! database commits and file-level conflict detection.
//!
//! # Architecture
//!
//! - Flat-file database: one stanza per package, committed atomically
//!   via a temp-file/fsync/rename sequence with an on-disk backup
//! - File-level ownership: every installed path belongs to the packages
//!   whose records list it; shared files survive single-package removal
//! - Rule-driven filtering: a small INSTALL/UPGRADE rule language decides
//!   which archive entries are installed and which existing files are
//!   kept across upgrades
//! - Advisory locking: mutating operations take an exclusive lock on the
//!   database directory, queries a shared one

pub mod archive;
pub mod check;
pub mod config;
pub mod db;
mod error;
pub mod fsutil;
pub mod install;
pub mod lock;
pub mod ops;
pub mod rules;

pub use error::{Error, Result};
