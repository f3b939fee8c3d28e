//! Rooted storage containers.
//!
//! Every container supports the read-side [`Storage`] operations. Writing is a
//! separate capability, [`WritableStorage`], implemented only by containers
//! that allow it: a [`TitleStorage`] simply has no `write_file` to call.
//!
//! Paths handed to a container are relative, `/`-separated and confined to
//! its root. Absolute paths and `..` components are rejected with
//! [`Error::PathOutsideRoot`].

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use super::enumerate::{self, DirectoryListing, EnumerationResult, GlobFlags};
use super::error::{record, Error, Result};
use super::status::PathType;
use super::stream::Stream;
use crate::logging::debug;

/// Metadata for one path inside a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathInfo {
    pub kind: PathType,
    pub size: u64,
    pub created: Option<SystemTime>,
    pub modified: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
}

impl PathInfo {
    fn from_metadata(meta: &fs::Metadata) -> Self {
        let kind = if meta.is_file() {
            PathType::File
        } else if meta.is_dir() {
            PathType::Directory
        } else {
            PathType::Other
        };
        Self {
            kind,
            size: meta.len(),
            created: meta.created().ok(),
            modified: meta.modified().ok(),
            accessed: meta.accessed().ok(),
        }
    }
}

/// Map `relative` onto `root`, refusing anything that would leave it.
pub(crate) fn resolve(root: &Path, relative: &str) -> Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(record(Error::PathOutsideRoot(PathBuf::from(relative))));
            }
        }
    }
    Ok(resolved)
}

fn not_found(path: &Path, err: io::Error) -> Error {
    record(if err.kind() == io::ErrorKind::NotFound {
        Error::NotFound(path.to_path_buf())
    } else {
        Error::Io(err)
    })
}

fn stream_error(path: &Path, err: Error) -> Error {
    match err {
        Error::Io(io) => not_found(path, io),
        other => other,
    }
}

/// Operations every storage container supports.
pub trait Storage {
    /// Directory all relative paths are resolved against.
    fn root(&self) -> &Path;

    /// Whether the container can be used right now.
    fn ready(&self) -> bool {
        self.root().is_dir()
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        let full = resolve(self.root(), path)?;
        let meta = fs::metadata(&full).map_err(|e| not_found(&full, e))?;
        Ok(meta.len())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let full = resolve(self.root(), path)?;
        Stream::load_file(&full).map_err(|e| stream_error(&full, e))
    }

    fn enumerate_directory(
        &self,
        path: &str,
        callback: &mut dyn FnMut(&Path, &str) -> EnumerationResult,
    ) -> Result<()> {
        let full = resolve(self.root(), path)?;
        enumerate::enumerate_directory(&full, callback)
    }

    fn read_directory(&self, path: &str) -> Result<DirectoryListing> {
        enumerate::read_directory(resolve(self.root(), path)?)
    }

    fn path_info(&self, path: &str) -> Result<PathInfo> {
        let full = resolve(self.root(), path)?;
        let meta = fs::metadata(&full).map_err(|e| not_found(&full, e))?;
        Ok(PathInfo::from_metadata(&meta))
    }

    fn exists(&self, path: &str) -> bool {
        self.path_info(path).is_ok()
    }

    fn glob(
        &self,
        path: &str,
        pattern: Option<&str>,
        flags: GlobFlags,
    ) -> Result<DirectoryListing> {
        enumerate::glob_directory(resolve(self.root(), path)?, pattern, flags)
    }
}

/// Operations only writable containers support.
pub trait WritableStorage: Storage {
    fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;

    fn create_directory(&self, path: &str) -> Result<()> {
        let full = resolve(self.root(), path)?;
        fs::create_dir_all(&full).map_err(|e| record(Error::Io(e)))
    }

    /// Remove a file or an empty directory.
    fn remove_path(&self, path: &str) -> Result<()> {
        let full = resolve(self.root(), path)?;
        let meta = fs::symlink_metadata(&full).map_err(|e| not_found(&full, e))?;
        let removed = if meta.is_dir() {
            fs::remove_dir(&full)
        } else {
            fs::remove_file(&full)
        };
        removed.map_err(|e| record(Error::Io(e)))
    }

    fn rename_path(&self, from: &str, to: &str) -> Result<()> {
        let source = resolve(self.root(), from)?;
        let target = resolve(self.root(), to)?;
        fs::rename(&source, &target).map_err(|e| not_found(&source, e))
    }

    fn copy_file(&self, from: &str, to: &str) -> Result<()> {
        let data = self.read_file(from)?;
        self.write_file(to, &data)
    }

    /// Bytes that may still be written, or `None` when unlimited.
    fn space_remaining(&self) -> Option<u64>;
}

/// Read-only container, typically over installed application data.
#[derive(Clone, Debug)]
pub struct TitleStorage {
    root: PathBuf,
}

impl TitleStorage {
    /// Open an existing directory.
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(record(Error::NotFound(root)));
        }
        debug!(root = %root.display(), "opened title storage");
        Ok(Self { root })
    }
}

impl Storage for TitleStorage {
    fn root(&self) -> &Path {
        &self.root
    }
}

/// Read-write container, optionally limited to a byte quota.
#[derive(Clone, Debug)]
pub struct UserStorage {
    root: PathBuf,
    quota: Option<u64>,
}

impl UserStorage {
    /// Open `root`, creating it if needed.
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        Self::with_quota(root, None)
    }

    pub fn with_quota<P: Into<PathBuf>>(root: P, quota: Option<u64>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| record(Error::Io(e)))?;
        debug!(root = %root.display(), quota = ?quota, "opened user storage");
        Ok(Self { root, quota })
    }

    pub fn quota(&self) -> Option<u64> {
        self.quota
    }

    /// Total size of every file under the root.
    pub fn space_used(&self) -> u64 {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.metadata().ok())
            .map(|meta| meta.len())
            .sum()
    }
}

impl Storage for UserStorage {
    fn root(&self) -> &Path {
        &self.root
    }
}

impl WritableStorage for UserStorage {
    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full = resolve(&self.root, path)?;
        if let Some(quota) = self.quota {
            let replaced = fs::metadata(&full).map(|m| m.len()).unwrap_or(0);
            let remaining = quota.saturating_sub(self.space_used().saturating_sub(replaced));
            let needed = data.len() as u64;
            if needed > remaining {
                return Err(record(Error::QuotaExceeded { needed, remaining }));
            }
        }
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| record(Error::Io(e)))?;
        }
        Stream::save_file(&full, data)
    }

    fn space_remaining(&self) -> Option<u64> {
        self.quota
            .map(|quota| quota.saturating_sub(self.space_used()))
    }
}
