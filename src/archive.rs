// src/archive.rs

//! Package archive reading.
//!
//! Packages are tar archives compressed with gzip, bzip2, xz or zstd,
//! named `<name>#<version>.pkg.tar.<ext>`. The reader exposes a forward
//! cursor over entries; regular-file content is never buffered unless an
//! operation needs it. Name and version come from the filename alone,
//! never from archive contents.

use crate::config::{PKG_EXT, VERSION_DELIM};
use crate::db::PackageRecord;
use crate::{Error, Result};
use flate2::read::GzDecoder;
use nix::unistd::{Gid, Group, Uid, User};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tar::EntryType;
use tracing::debug;
use xz2::read::XzDecoder;

/// Compression filters recognized on package archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

fn detect_compression(path: &Path) -> Result<Compression> {
    let name = path.to_string_lossy();
    if name.ends_with(".gz") {
        return Ok(Compression::Gzip);
    }
    if name.ends_with(".bz2") {
        return Ok(Compression::Bzip2);
    }
    if name.ends_with(".xz") {
        return Ok(Compression::Xz);
    }
    if name.ends_with(".zst") {
        return Ok(Compression::Zstd);
    }

    // Unknown suffix: fall back to magic bytes.
    let mut file = File::open(path).map_err(|e| Error::io("open", path, e))?;
    let mut magic = [0u8; 6];
    let n = file.read(&mut magic).map_err(|e| Error::io("read", path, e))?;

    if n >= 2 && magic[0..2] == [0x1F, 0x8B] {
        Ok(Compression::Gzip)
    } else if n >= 3 && &magic[0..3] == b"BZh" {
        Ok(Compression::Bzip2)
    } else if n >= 6 && magic == [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00] {
        Ok(Compression::Xz)
    } else if n >= 4 && magic[0..4] == [0x28, 0xB5, 0x2F, 0xFD] {
        Ok(Compression::Zstd)
    } else {
        Err(Error::io(
            "open",
            path,
            std::io::Error::new(ErrorKind::InvalidData, "unrecognized compression format"),
        ))
    }
}

/// Open a package archive with the right decompression filter.
pub fn open_archive(path: &Path) -> Result<tar::Archive<Box<dyn Read>>> {
    let compression = detect_compression(path)?;
    let file = File::open(path).map_err(|e| Error::io("open", path, e))?;

    let reader: Box<dyn Read> = match compression {
        Compression::Gzip => Box::new(GzDecoder::new(file)),
        Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(file)),
        Compression::Xz => Box::new(XzDecoder::new(file)),
        Compression::Zstd => {
            let decoder = zstd::Decoder::new(file).map_err(|e| Error::io("open", path, e))?;
            Box::new(decoder)
        }
    };

    Ok(tar::Archive::new(reader))
}

/// Derive `(name, version)` from a `<name>#<version>.pkg.tar.<ext>`
/// filename.
pub fn parse_package_filename(path: &Path) -> Result<(String, String)> {
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let name = match basename.find(VERSION_DELIM) {
        Some(pos) => basename[..pos].to_string(),
        None => basename.clone(),
    };

    let stem = match basename.rfind(PKG_EXT) {
        Some(pos) => &basename[..pos],
        None => basename.as_str(),
    };
    let version = match stem.find(VERSION_DELIM) {
        Some(pos) => stem[pos + VERSION_DELIM.len_utf8()..].to_string(),
        None => String::new(),
    };

    if name.is_empty() || version.is_empty() {
        return Err(Error::PackageName(basename));
    }

    Ok((name, version))
}

/// Read a package's manifest: name and version from the filename, the
/// file set from the archive entry paths. Content is skipped, not read.
pub fn pkg_open(path: &Path) -> Result<(String, PackageRecord)> {
    let (name, version) = parse_package_filename(path)?;

    let mut archive = open_archive(path)?;
    let mut record = PackageRecord {
        version,
        ..Default::default()
    };

    let mut count = 0usize;
    for entry in archive.entries().map_err(|e| Error::io("read", path, e))? {
        let entry = entry.map_err(|e| Error::io("read", path, e))?;
        record
            .files
            .insert(String::from_utf8_lossy(&entry.path_bytes()).into_owned());
        count += 1;
    }

    if count == 0 {
        return Err(Error::EmptyPackage);
    }

    debug!("{name}: {count} entries in manifest");

    Ok((name, record))
}

struct FootprintEntry {
    path: String,
    soft: Option<String>,
    hard: Option<String>,
    size: u64,
    dev_major: u32,
    dev_minor: u32,
    uid: u64,
    gid: u64,
    kind: EntryType,
    mode: u32,
}

/// Render the deterministic footprint of a package archive: one line per
/// entry, sorted by path, with a symbolic mode string, owner/group, path
/// and a type-specific suffix.
pub fn pkg_footprint(path: &Path) -> Result<String> {
    let mut archive = open_archive(path)?;
    let mut files: Vec<FootprintEntry> = Vec::new();

    // Pass 1: collect metadata without touching file content.
    for entry in archive.entries().map_err(|e| Error::io("read", path, e))? {
        let entry = entry.map_err(|e| Error::io("read", path, e))?;
        let header = entry.header();
        let kind = header.entry_type();
        let link = entry
            .link_name_bytes()
            .map(|b| String::from_utf8_lossy(&b).into_owned());

        files.push(FootprintEntry {
            path: String::from_utf8_lossy(&entry.path_bytes()).into_owned(),
            soft: if kind.is_symlink() { link.clone() } else { None },
            hard: if kind.is_hard_link() { link } else { None },
            size: header.size().map_err(|e| Error::io("read", path, e))?,
            dev_major: header
                .device_major()
                .ok()
                .flatten()
                .unwrap_or_default(),
            dev_minor: header
                .device_minor()
                .ok()
                .flatten()
                .unwrap_or_default(),
            uid: header.uid().map_err(|e| Error::io("read", path, e))?,
            gid: header.gid().map_err(|e| Error::io("read", path, e))?,
            kind,
            mode: header.mode().map_err(|e| Error::io("read", path, e))?,
        });
    }

    if files.is_empty() {
        return Err(Error::EmptyPackage);
    }

    // Pass 2: sort by path and render. Hard links borrow the mode of
    // their target entry so the listing is self-consistent.
    files.sort_by(|a, b| a.path.cmp(&b.path));
    let modes: BTreeMap<&str, (EntryType, u32)> = files
        .iter()
        .map(|f| (f.path.as_str(), (f.kind, f.mode)))
        .collect();

    let mut out = String::new();
    for file in &files {
        // Symlink permission bits differ among filesystems; pin them so
        // footprints are filesystem independent.
        if file.kind.is_symlink() {
            out.push_str("lrwxrwxrwx");
        } else if let Some(target) = &file.hard {
            let (kind, mode) = modes
                .get(target.as_str())
                .copied()
                .unwrap_or((file.kind, file.mode));
            out.push_str(&mode_string(kind, mode));
        } else {
            out.push_str(&mode_string(file.kind, file.mode));
        }

        out.push('\t');
        out.push_str(&user_name(file.uid));
        out.push('/');
        out.push_str(&group_name(file.gid));
        out.push('\t');
        out.push_str(&file.path);

        if let Some(target) = &file.soft {
            let _ = write!(out, " -> {target}");
        } else if file.kind.is_character_special() || file.kind.is_block_special() {
            let _ = write!(out, " ({}, {})", file.dev_major, file.dev_minor);
        } else if file.kind.is_file() && file.size == 0 {
            out.push_str(" (EMPTY)");
        }

        out.push('\n');
    }

    Ok(out)
}

/// Symbolic `ls -l` style mode string for a tar entry.
fn mode_string(kind: EntryType, mode: u32) -> String {
    let mut s = String::with_capacity(10);

    s.push(match kind {
        EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => '-',
        EntryType::Directory => 'd',
        EntryType::Symlink => 'l',
        EntryType::Char => 'c',
        EntryType::Block => 'b',
        EntryType::Fifo => 'p',
        // Hard links are rendered with their target's type.
        EntryType::Link => '-',
        _ => '?',
    });

    s.push(if mode & 0o400 != 0 { 'r' } else { '-' });
    s.push(if mode & 0o200 != 0 { 'w' } else { '-' });
    s.push(match (mode & 0o100 != 0, mode & 0o4000 != 0) {
        (true, true) => 's',
        (false, true) => 'S',
        (true, false) => 'x',
        (false, false) => '-',
    });

    s.push(if mode & 0o040 != 0 { 'r' } else { '-' });
    s.push(if mode & 0o020 != 0 { 'w' } else { '-' });
    s.push(match (mode & 0o010 != 0, mode & 0o2000 != 0) {
        (true, true) => 's',
        (false, true) => 'S',
        (true, false) => 'x',
        (false, false) => '-',
    });

    s.push(if mode & 0o004 != 0 { 'r' } else { '-' });
    s.push(if mode & 0o002 != 0 { 'w' } else { '-' });
    s.push(match (mode & 0o001 != 0, mode & 0o1000 != 0) {
        (true, true) => 't',
        (false, true) => 'T',
        (true, false) => 'x',
        (false, false) => '-',
    });

    s
}

fn user_name(uid: u64) -> String {
    match User::from_uid(Uid::from_raw(uid as u32)) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}

fn group_name(gid: u64) -> String {
    match Group::from_gid(Gid::from_raw(gid as u32)) {
        Ok(Some(group)) => group.name,
        _ => gid.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression as GzLevel;
    use flate2::write::GzEncoder;
    use std::path::PathBuf;

    /// Build a small gzipped package archive in `dir`.
    fn build_package(dir: &Path, filename: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join(filename);
        let encoder = GzEncoder::new(File::create(&path).unwrap(), GzLevel::default());
        let mut builder = tar::Builder::new(encoder);

        let mut dirs_done = std::collections::BTreeSet::new();
        for (name, content) in files {
            for (idx, _) in name.match_indices('/') {
                let dir_name = &name[..=idx];
                if dirs_done.insert(dir_name.to_string()) {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(EntryType::Directory);
                    header.set_path(dir_name).unwrap();
                    header.set_mode(0o755);
                    header.set_size(0);
                    header.set_uid(0);
                    header.set_gid(0);
                    header.set_mtime(0);
                    header.set_cksum();
                    builder.append(&header, std::io::empty()).unwrap();
                }
            }
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_mode(0o644);
            header.set_size(content.len() as u64);
            header.set_uid(0);
            header.set_gid(0);
            header.set_mtime(0);
            header.set_cksum();
            builder.append(&header, *content).unwrap();
        }

        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    fn empty_package(dir: &Path, filename: &str) -> PathBuf {
        let path = dir.join(filename);
        let encoder = GzEncoder::new(File::create(&path).unwrap(), GzLevel::default());
        let builder = tar::Builder::new(encoder);
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    #[test]
    fn test_parse_package_filename() {
        let (name, version) =
            parse_package_filename(Path::new("/tmp/hello#1.2-3.pkg.tar.gz")).unwrap();
        assert_eq!(name, "hello");
        assert_eq!(version, "1.2-3");
    }

    #[test]
    fn test_parse_filename_without_delimiter_fails() {
        assert!(matches!(
            parse_package_filename(Path::new("hello-1.2.pkg.tar.gz")),
            Err(Error::PackageName(_))
        ));
    }

    #[test]
    fn test_parse_filename_without_name_fails() {
        assert!(matches!(
            parse_package_filename(Path::new("#1.2.pkg.tar.gz")),
            Err(Error::PackageName(_))
        ));
    }

    #[test]
    fn test_pkg_open_collects_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = build_package(
            dir.path(),
            "tool#1.0.pkg.tar.gz",
            &[("usr/bin/tool", b"#!/bin/sh\n"), ("etc/tool.conf", b"x=1\n")],
        );

        let (name, record) = pkg_open(&pkg).unwrap();
        assert_eq!(name, "tool");
        assert_eq!(record.version, "1.0");
        assert!(record.files.contains("usr/"));
        assert!(record.files.contains("usr/bin/"));
        assert!(record.files.contains("usr/bin/tool"));
        assert!(record.files.contains("etc/tool.conf"));
    }

    #[test]
    fn test_pkg_open_empty_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = empty_package(dir.path(), "void#1.0.pkg.tar.gz");
        assert!(matches!(pkg_open(&pkg), Err(Error::EmptyPackage)));
    }

    #[test]
    fn test_footprint_is_sorted_and_marks_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = build_package(
            dir.path(),
            "tool#1.0.pkg.tar.gz",
            &[("usr/bin/tool", b""), ("etc/tool.conf", b"x=1\n")],
        );

        let footprint = pkg_footprint(&pkg).unwrap();
        let lines: Vec<&str> = footprint.lines().collect();

        // Sorted by path: etc/ before usr/.
        assert!(lines[0].ends_with("etc/"));
        let tool_line = lines.iter().find(|l| l.contains("usr/bin/tool")).unwrap();
        assert!(tool_line.starts_with("-rw-r--r--"));
        assert!(tool_line.ends_with("(EMPTY)"));
        let dir_line = lines.iter().find(|l| l.ends_with("usr/bin/")).unwrap();
        assert!(dir_line.starts_with("drwxr-xr-x"));
    }

    #[test]
    fn test_footprint_renders_symlinks_with_fixed_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links#1.0.pkg.tar.gz");
        let encoder = GzEncoder::new(File::create(&path).unwrap(), GzLevel::default());
        let mut builder = tar::Builder::new(encoder);

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_path("usr/bin/vi").unwrap();
        header.set_link_name("vim").unwrap();
        header.set_mode(0o777);
        header.set_size(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_cksum();
        builder.append(&header, std::io::empty()).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let footprint = pkg_footprint(&path).unwrap();
        assert!(footprint.starts_with("lrwxrwxrwx"));
        assert!(footprint.trim_end().ends_with("usr/bin/vi -> vim"));
    }

    #[test]
    fn test_footprint_hard_link_borrows_target_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links#1.0.pkg.tar.gz");
        let encoder = GzEncoder::new(File::create(&path).unwrap(), GzLevel::default());
        let mut builder = tar::Builder::new(encoder);

        let mut header = tar::Header::new_gnu();
        header.set_path("bin/tool").unwrap();
        header.set_mode(0o755);
        header.set_size(4);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_cksum();
        builder.append(&header, &b"data"[..]).unwrap();

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(EntryType::Link);
        link.set_path("bin/tool-alias").unwrap();
        link.set_link_name("bin/tool").unwrap();
        link.set_mode(0o000);
        link.set_size(0);
        link.set_uid(0);
        link.set_gid(0);
        link.set_mtime(0);
        link.set_cksum();
        builder.append(&link, std::io::empty()).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let footprint = pkg_footprint(&path).unwrap();
        let alias_line = footprint
            .lines()
            .find(|l| l.ends_with("bin/tool-alias"))
            .unwrap();
        assert!(alias_line.starts_with("-rwxr-xr-x"));
    }

    #[test]
    fn test_footprint_empty_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = empty_package(dir.path(), "void#1.0.pkg.tar.gz");
        assert!(matches!(pkg_footprint(&pkg), Err(Error::EmptyPackage)));
    }

    #[test]
    fn test_mode_string_special_bits() {
        assert_eq!(mode_string(EntryType::Regular, 0o4755), "-rwsr-xr-x");
        assert_eq!(mode_string(EntryType::Regular, 0o4644), "-rwSr--r--");
        assert_eq!(mode_string(EntryType::Directory, 0o1777), "drwxrwxrwt");
        assert_eq!(mode_string(EntryType::Char, 0o620), "crw--w----");
    }

    #[test]
    fn test_detect_compression_by_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg.unknown");
        std::fs::write(&path, [0x1F, 0x8B, 0x08, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(detect_compression(&path).unwrap(), Compression::Gzip);

        let bad = dir.path().join("bad.unknown");
        std::fs::write(&bad, b"not an archive").unwrap();
        assert!(detect_compression(&bad).is_err());
    }
}
