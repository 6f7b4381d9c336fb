//! Per-worker view of the shared file cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use depscan_core::ScanError;
use tracing::trace;

use crate::cache::{CachedFileSystemEntry, SharedFileSystemCache};
use crate::directives::Directive;
use crate::path::canonicalize;
use crate::scan_fs::{ScanFilesystem, is_a_directory};
use crate::vfs::{FileSystem, Status};

/// Reads through a [`SharedFileSystemCache`], remembering every entry it
/// touched so repeated lookups skip the shared map.
#[derive(Debug)]
pub struct WorkerFilesystem {
    shared: Arc<SharedFileSystemCache>,
    underlying: Arc<dyn FileSystem>,
    local: HashMap<PathBuf, Arc<CachedFileSystemEntry>>,
    working_dir: PathBuf,
}

impl WorkerFilesystem {
    /// Create a view over `shared` that fills misses from `underlying`.
    pub fn new(shared: Arc<SharedFileSystemCache>, underlying: Arc<dyn FileSystem>) -> Self {
        Self {
            shared,
            underlying,
            local: HashMap::new(),
            working_dir: PathBuf::from("/"),
        }
    }

    fn entry(&mut self, path: &Path) -> Result<Arc<CachedFileSystemEntry>, ScanError> {
        let path = canonicalize(&self.working_dir, path);
        if let Some(entry) = self.local.get(&path) {
            return Ok(entry.clone());
        }

        let entry = match self.shared.get(&path) {
            Some(entry) => entry,
            None => {
                trace!(path = %path.display(), "Reading into shared cache");
                let fresh = read_entry(self.underlying.as_ref(), &path)?;
                self.shared.get_or_insert(path.clone(), Arc::new(fresh))
            }
        };
        self.local.insert(path, entry.clone());
        Ok(entry)
    }
}

/// Stat and, for files, read `path`.
fn read_entry(fs: &dyn FileSystem, path: &Path) -> Result<CachedFileSystemEntry, ScanError> {
    let status = fs.status(path).map_err(|e| ScanError::io(path, e))?;
    if status.is_directory() {
        return Ok(CachedFileSystemEntry::directory(status));
    }
    let contents = fs.read(path).map_err(|e| ScanError::io(path, e))?;
    Ok(CachedFileSystemEntry::file(status, contents.into()))
}

impl ScanFilesystem for WorkerFilesystem {
    fn working_directory(&self) -> &Path {
        &self.working_dir
    }

    fn set_working_directory(&mut self, cwd: &Path) {
        self.working_dir = cwd.to_path_buf();
    }

    fn status(&mut self, path: &Path) -> Result<Status, ScanError> {
        Ok(self.entry(path)?.status())
    }

    fn read(&mut self, path: &Path) -> Result<Arc<[u8]>, ScanError> {
        let entry = self.entry(path)?;
        entry.contents().cloned().ok_or_else(|| is_a_directory(path))
    }

    fn directives(&mut self, path: &Path) -> Result<Arc<[Directive]>, ScanError> {
        let entry = self.entry(path)?;
        entry.directives().ok_or_else(|| is_a_directory(path))
    }

    fn caches_directives(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::InMemoryFileSystem;

    #[test]
    fn test_workers_share_entries() {
        let memory = Arc::new(InMemoryFileSystem::new());
        memory.add_file("/src/a.h", "#define A\n");
        let shared = Arc::new(SharedFileSystemCache::new());

        let mut first = WorkerFilesystem::new(shared.clone(), memory.clone());
        let mut second = WorkerFilesystem::new(shared.clone(), memory.clone());
        first.set_working_directory(Path::new("/src"));

        let a = first.directives(Path::new("a.h")).unwrap();
        let b = second.directives(Path::new("/src/./a.h")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(shared.len(), 1);
    }

    #[test]
    fn test_errors_not_cached() {
        let memory = Arc::new(InMemoryFileSystem::new());
        let shared = Arc::new(SharedFileSystemCache::new());
        let mut worker = WorkerFilesystem::new(shared.clone(), memory.clone());

        assert!(worker.status(Path::new("/late.h")).unwrap_err().is_not_found());
        assert!(shared.is_empty());

        memory.add_file("/late.h", "");
        assert!(worker.is_file(Path::new("/late.h")));
    }

    #[test]
    fn test_directory_read_is_error() {
        let memory = Arc::new(InMemoryFileSystem::new());
        memory.add_file("/dir/f.h", "");
        let mut worker = WorkerFilesystem::new(Arc::new(SharedFileSystemCache::new()), memory);
        assert!(worker.is_directory(Path::new("/dir")));
        assert!(worker.read(Path::new("/dir")).is_err());
    }
}
