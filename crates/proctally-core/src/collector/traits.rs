//! Filesystem access used by the procfs platform.
//!
//! `FileSystem` lets the `/proc` backend run against the real filesystem on
//! Linux or an in-memory tree in tests.

use std::io;
use std::path::{Path, PathBuf};

/// Read-only view of a filesystem.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    fn exists(&self, path: &Path) -> bool;

    /// Lists entries in a directory. Order is unspecified.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Reads the target of a symbolic link.
    ///
    /// `/proc/[pid]/fd/*` and `/proc/[pid]/exe` targets are often not real
    /// paths (`socket:[1234]`, `anon_inode:[eventfd]`), so the target is
    /// returned verbatim.
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::read_link(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_real_fs_read_to_string() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stat");
        fs::write(&file, "btime 1700000000\n").unwrap();

        let content = RealFs::new().read_to_string(&file).unwrap();
        assert_eq!(content, "btime 1700000000\n");
    }

    #[test]
    fn test_real_fs_exists() {
        let dir = tempfile::tempdir().unwrap();
        let rfs = RealFs::new();
        assert!(rfs.exists(dir.path()));
        assert!(!rfs.exists(&dir.path().join("missing")));
    }

    #[test]
    fn test_real_fs_read_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("1")).unwrap();
        fs::create_dir(dir.path().join("42")).unwrap();

        let mut entries = RealFs::new().read_dir(dir.path()).unwrap();
        entries.sort();
        assert_eq!(entries, vec![dir.path().join("1"), dir.path().join("42")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_real_fs_read_link() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("exe");
        std::os::unix::fs::symlink("/usr/bin/bash", &link).unwrap();

        let target = RealFs::new().read_link(&link).unwrap();
        assert_eq!(target, PathBuf::from("/usr/bin/bash"));
    }
}
