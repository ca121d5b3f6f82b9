// src/fsutil.rs

//! Stateless filesystem probes used by the conflict resolver, the
//! installer's rejection check, and package removal.
//!
//! All comparisons go through `symlink_metadata` so symlinks are probed
//! without being followed. Probe failures read as "not equal" / "absent"
//! rather than errors, matching how removal and rejection treat a path
//! that vanished underneath them.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Does a filesystem entry (including a dangling symlink) exist at `path`?
pub fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Is `path` a zero-length regular file?
pub fn is_empty_regular(path: &Path) -> bool {
    match fs::symlink_metadata(path) {
        Ok(meta) => meta.is_file() && meta.len() == 0,
        Err(_) => false,
    }
}

/// Do two paths carry identical mode, owner and group?
pub fn metadata_equal(a: &Path, b: &Path) -> bool {
    let (Ok(ma), Ok(mb)) = (fs::symlink_metadata(a), fs::symlink_metadata(b)) else {
        return false;
    };
    ma.mode() == mb.mode() && ma.uid() == mb.uid() && ma.gid() == mb.gid()
}

/// Are two paths byte-equal?
///
/// Regular files compare content, symlinks compare targets, device nodes
/// compare the device number they denote. Any other combination of file
/// types is unequal.
pub fn content_equal(a: &Path, b: &Path) -> bool {
    let (Ok(ma), Ok(mb)) = (fs::symlink_metadata(a), fs::symlink_metadata(b)) else {
        return false;
    };

    let (ta, tb) = (ma.file_type(), mb.file_type());

    if ta.is_file() && tb.is_file() {
        return regular_files_equal(a, b).unwrap_or(false);
    }
    if ta.is_symlink() && tb.is_symlink() {
        return match (fs::read_link(a), fs::read_link(b)) {
            (Ok(la), Ok(lb)) => la == lb,
            _ => false,
        };
    }

    use std::os::unix::fs::FileTypeExt;
    if (ta.is_char_device() && tb.is_char_device())
        || (ta.is_block_device() && tb.is_block_device())
    {
        return ma.rdev() == mb.rdev();
    }

    false
}

fn regular_files_equal(a: &Path, b: &Path) -> std::io::Result<bool> {
    let fa = File::open(a)?;
    let fb = File::open(b)?;

    if fa.metadata()?.len() != fb.metadata()?.len() {
        return Ok(false);
    }

    let mut ra = BufReader::new(fa);
    let mut rb = BufReader::new(fb);
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];

    loop {
        let n = ra.read(&mut buf_a)?;
        if n == 0 {
            return Ok(true);
        }
        rb.read_exact(&mut buf_b[..n])?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}

/// Remove one filesystem entry, file or directory alike.
pub fn remove_entry(path: &Path) -> std::io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    }
}

/// Remove `leaf` and then walk upward toward (but excluding) `base`,
/// removing each now-empty ancestor directory. Stops at the first removal
/// failure, which normally means the directory still has other entries.
///
/// Implemented as a loop rather than recursion so deeply nested paths do
/// not grow the stack.
pub fn remove_with_empty_parents(base: &Path, leaf: &Path) {
    let mut current: PathBuf = leaf.to_path_buf();

    while current != base {
        if remove_entry(&current).is_err() {
            break;
        }
        match current.parent() {
            Some(parent) if parent != Path::new("") => current = parent.to_path_buf(),
            _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn test_exists_sees_dangling_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("dangling");
        symlink("/nonexistent/target", &link).unwrap();

        assert!(exists(&link));
        assert!(!exists(&dir.path().join("missing")));
    }

    #[test]
    fn test_is_empty_regular() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty");
        let full = dir.path().join("full");
        fs::write(&empty, b"").unwrap();
        fs::write(&full, b"data").unwrap();

        assert!(is_empty_regular(&empty));
        assert!(!is_empty_regular(&full));
        assert!(!is_empty_regular(dir.path()));
    }

    #[test]
    fn test_content_equal_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let c = dir.path().join("c");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();
        fs::write(&c, b"other bytes").unwrap();

        assert!(content_equal(&a, &b));
        assert!(!content_equal(&a, &c));
    }

    #[test]
    fn test_content_equal_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let c = dir.path().join("c");
        symlink("target", &a).unwrap();
        symlink("target", &b).unwrap();
        symlink("elsewhere", &c).unwrap();

        assert!(content_equal(&a, &b));
        assert!(!content_equal(&a, &c));
    }

    #[test]
    fn test_content_equal_mixed_types() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        let link = dir.path().join("link");
        fs::write(&file, b"target").unwrap();
        symlink("target", &link).unwrap();

        assert!(!content_equal(&file, &link));
    }

    #[test]
    fn test_metadata_equal() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"x").unwrap();
        fs::write(&b, b"y").unwrap();

        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&a, fs::Permissions::from_mode(0o644)).unwrap();
        fs::set_permissions(&b, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(metadata_equal(&a, &b));

        fs::set_permissions(&b, fs::Permissions::from_mode(0o600)).unwrap();
        assert!(!metadata_equal(&a, &b));
    }

    #[test]
    fn test_remove_with_empty_parents_prunes_until_base() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_path_buf();
        let nested = base.join("a/b/c");
        fs::create_dir_all(&nested).unwrap();
        let leaf = nested.join("file");
        fs::write(&leaf, b"x").unwrap();
        // A sibling keeps "a" populated.
        fs::write(base.join("a/keep"), b"x").unwrap();

        remove_with_empty_parents(&base, &leaf);

        assert!(!exists(&leaf));
        assert!(!exists(&base.join("a/b")));
        assert!(exists(&base.join("a")));
        assert!(exists(&base));
    }
}
