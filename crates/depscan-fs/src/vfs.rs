//! Underlying filesystems the scanning caches read through.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

use dashmap::DashMap;

use crate::path::remove_dots;

/// Kind of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

/// Device and inode pair identifying a file independently of its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniqueId {
    /// Device ID.
    pub device: u64,
    /// Inode number.
    pub inode: u64,
}

/// Result of a stat call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Kind of entry.
    pub kind: FileKind,
    /// Size in bytes (zero for directories).
    pub size: u64,
    /// Identity on disk, when the filesystem has one.
    pub unique_id: Option<UniqueId>,
}

impl Status {
    /// Status of a regular file.
    pub fn file(size: u64) -> Self {
        Self {
            kind: FileKind::File,
            size,
            unique_id: None,
        }
    }

    /// Status of a directory.
    pub fn directory() -> Self {
        Self {
            kind: FileKind::Directory,
            size: 0,
            unique_id: None,
        }
    }

    /// Check if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    /// Check if this is a directory.
    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// A source of file metadata and contents.
///
/// Paths passed in are absolute.
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Stat a path.
    fn status(&self, path: &Path) -> io::Result<Status>;

    /// Read the whole file.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct PhysicalFileSystem;

impl PhysicalFileSystem {
    /// Create a handle to the real filesystem.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for PhysicalFileSystem {
    fn status(&self, path: &Path) -> io::Result<Status> {
        let metadata = std::fs::metadata(path)?;
        let kind = if metadata.is_dir() {
            FileKind::Directory
        } else {
            FileKind::File
        };
        Ok(Status {
            kind,
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            unique_id: unique_id(&metadata),
        })
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

#[cfg(unix)]
fn unique_id(metadata: &std::fs::Metadata) -> Option<UniqueId> {
    Some(UniqueId {
        device: metadata.dev(),
        inode: metadata.ino(),
    })
}

#[cfg(not(unix))]
fn unique_id(_metadata: &std::fs::Metadata) -> Option<UniqueId> {
    None
}

/// A filesystem held entirely in memory.
///
/// Directories exist implicitly as ancestors of stored files.
#[derive(Debug, Default)]
pub struct InMemoryFileSystem {
    files: DashMap<PathBuf, Arc<[u8]>>,
}

impl InMemoryFileSystem {
    /// Create an empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file. Returns `true` if the path was new.
    pub fn add_file(&self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) -> bool {
        let bytes: Arc<[u8]> = contents.into().into();
        self.files
            .insert(remove_dots(path.as_ref()), bytes)
            .is_none()
    }

    /// Remove a file. Returns `true` if it existed.
    pub fn remove_file(&self, path: impl AsRef<Path>) -> bool {
        self.files.remove(&remove_dots(path.as_ref())).is_some()
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if no files are stored.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FileSystem for InMemoryFileSystem {
    fn status(&self, path: &Path) -> io::Result<Status> {
        let path = remove_dots(path);
        if let Some(contents) = self.files.get(&path) {
            return Ok(Status::file(contents.len() as u64));
        }
        let is_dir = self
            .files
            .iter()
            .any(|entry| entry.key() != &path && entry.key().starts_with(&path));
        if is_dir {
            Ok(Status::directory())
        } else {
            Err(not_found(&path))
        }
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let path = remove_dots(path);
        match self.files.get(&path) {
            Some(contents) => Ok(contents.value().to_vec()),
            None => Err(not_found(&path)),
        }
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such file or directory: '{}'", path.display()),
    )
}

/// Layers filesystems on top of each other; the most recently pushed layer
/// answers first.
#[derive(Debug)]
pub struct OverlayFileSystem {
    layers: Vec<Arc<dyn FileSystem>>,
}

impl OverlayFileSystem {
    /// Create an overlay with a single base layer.
    pub fn new(base: Arc<dyn FileSystem>) -> Self {
        Self { layers: vec![base] }
    }

    /// Push a layer above every existing one.
    pub fn push_overlay(&mut self, layer: Arc<dyn FileSystem>) {
        self.layers.push(layer);
    }

    fn first_success<T>(&self, op: impl Fn(&dyn FileSystem) -> io::Result<T>) -> io::Result<T> {
        let mut last_err = None;
        for layer in self.layers.iter().rev() {
            match op(layer.as_ref()) {
                Ok(value) => return Ok(value),
                Err(err) if err.kind() == io::ErrorKind::NotFound => last_err = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotFound)))
    }
}

impl FileSystem for OverlayFileSystem {
    fn status(&self, path: &Path) -> io::Result<Status> {
        self.first_success(|fs| fs.status(path))
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.first_success(|fs| fs.read(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_files_and_dirs() {
        let fs = InMemoryFileSystem::new();
        assert!(fs.add_file("/src/a.c", "int a;"));
        assert!(!fs.add_file("/src/./a.c", "int b;"));

        assert!(fs.status(Path::new("/src/a.c")).unwrap().is_file());
        assert!(fs.status(Path::new("/src")).unwrap().is_directory());
        assert_eq!(fs.read(Path::new("/src/a.c")).unwrap(), b"int b;");
        assert_eq!(
            fs.status(Path::new("/src/b.c")).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_overlay_prefers_top_layer() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.h");
        fs::write(&path, "disk").unwrap();

        let memory = Arc::new(InMemoryFileSystem::new());
        let mut overlay = OverlayFileSystem::new(Arc::new(PhysicalFileSystem::new()));
        overlay.push_overlay(memory.clone());

        assert_eq!(overlay.read(&path).unwrap(), b"disk");
        memory.add_file(&path, "memory");
        assert_eq!(overlay.read(&path).unwrap(), b"memory");
        assert!(overlay.status(&temp.path().join("missing.h")).is_err());
    }

    #[test]
    fn test_physical_status() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("f"), "12345").unwrap();
        let status = PhysicalFileSystem::new().status(&temp.path().join("f")).unwrap();
        assert!(status.is_file());
        assert_eq!(status.size, 5);
        assert!(
            PhysicalFileSystem::new()
                .status(temp.path())
                .unwrap()
                .is_directory()
        );
    }
}
