//! In-memory filesystem for exercising the procfs platform without `/proc`.

use crate::collector::traits::FileSystem;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

/// In-memory filesystem for testing.
///
/// Holds files, directories and symbolic links so a `/proc` tree with
/// `fd/` and `exe` links can be described in a few lines.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    files: HashMap<PathBuf, String>,
    links: HashMap<PathBuf, PathBuf>,
    directories: HashSet<PathBuf>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }

    /// Adds a file. Parent directories are created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, content.into());
    }

    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    /// Adds a symbolic link pointing at `target`. The target need not exist.
    pub fn add_link(&mut self, path: impl AsRef<Path>, target: impl Into<PathBuf>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.links.insert(path, target.into());
    }

    /// Adds `/proc/[pid]/stat` and, when given, the `exe` link.
    pub fn add_process(&mut self, pid: u32, stat: &str, exe: Option<&str>) {
        let base = PathBuf::from(format!("/proc/{}", pid));
        self.add_dir(&base);
        self.add_file(base.join("stat"), stat);
        if let Some(exe) = exe {
            self.add_link(base.join("exe"), exe);
        }
    }

    /// Adds an open descriptor: the `fd/N` link and its `fdinfo/N` entry.
    pub fn add_fd(&mut self, pid: u32, fd: u32, target: &str, flags: u32, ino: u64) {
        let base = PathBuf::from(format!("/proc/{}", pid));
        self.add_link(base.join("fd").join(fd.to_string()), target);
        self.add_file(
            base.join("fdinfo").join(fd.to_string()),
            format!("pos:\t0\nflags:\t{:07o}\nmnt_id:\t15\nino:\t{}\n", flags, ino),
        );
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
            || self.directories.contains(path)
            || self.links.contains_key(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let is_child = |p: &&PathBuf| p.parent().is_some_and(|parent| parent == path);
        let entries: HashSet<PathBuf> = self
            .files
            .keys()
            .chain(self.links.keys())
            .chain(self.directories.iter().filter(|d| d.as_path() != path))
            .filter(is_child)
            .cloned()
            .collect();

        Ok(entries.into_iter().collect())
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        self.links.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a link: {:?}", path),
            )
        })
    }
}
