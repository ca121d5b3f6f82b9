// src/lock.rs

//! Advisory locking of the package database directory.
//!
//! Mutating operations (install, remove) take an exclusive lock, queries
//! a shared one. Both are non-blocking: contention surfaces as
//! [`Error::DatabaseLocked`] and the caller is expected to retry by
//! re-invoking the tool. The lock is held by an RAII guard and released
//! on drop, on every exit path.

use crate::config::Config;
use crate::{Error, Result};
use fs2::FileExt;
use std::fs::File;
use std::io::ErrorKind;
use tracing::debug;

/// RAII guard over an `flock` on the database directory.
///
/// The directory handle stays open for the lifetime of the guard; closing
/// it on drop releases the lock.
pub struct DbLock {
    file: File,
}

impl DbLock {
    /// Acquire a non-blocking lock on the database directory.
    ///
    /// `exclusive` selects `LOCK_EX` over `LOCK_SH`. Contention maps to
    /// [`Error::DatabaseLocked`]; any other failure to open or lock the
    /// directory is an I/O error.
    pub fn acquire(config: &Config, exclusive: bool) -> Result<Self> {
        let dir = config.db_dir();

        let file = File::open(&dir).map_err(|e| Error::io("read directory", &dir, e))?;

        let locked = if exclusive {
            FileExt::try_lock_exclusive(&file)
        } else {
            FileExt::try_lock_shared(&file)
        };

        match locked {
            Ok(()) => {
                debug!(
                    "acquired {} lock on {}",
                    if exclusive { "exclusive" } else { "shared" },
                    dir.display()
                );
                Ok(DbLock { file })
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(Error::DatabaseLocked),
            Err(e) => Err(Error::io("lock directory", &dir, e)),
        }
    }
}

impl Drop for DbLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
