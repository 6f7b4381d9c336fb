//! Uncached reads for canonical preprocessing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use depscan_core::ScanError;

use crate::directives::{Directive, scan_directives};
use crate::path::canonicalize;
use crate::scan_fs::ScanFilesystem;
use crate::vfs::{FileSystem, Status};

/// Reads files straight from a [`FileSystem`], caching only stat results.
///
/// Directives are extracted anew on every request. A worker may keep one
/// file manager across scans; its stat cache is cleared after each.
#[derive(Debug)]
pub struct FileManager {
    fs: Arc<dyn FileSystem>,
    working_dir: PathBuf,
    stat_cache: HashMap<PathBuf, Status>,
}

impl FileManager {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            working_dir: PathBuf::from("/"),
            stat_cache: HashMap::new(),
        }
    }

    /// Swap the underlying filesystem, dropping cached stats.
    pub fn set_file_system(&mut self, fs: Arc<dyn FileSystem>) {
        self.fs = fs;
        self.stat_cache.clear();
    }

    /// Number of cached stat results.
    pub fn stat_cache_len(&self) -> usize {
        self.stat_cache.len()
    }
}

impl ScanFilesystem for FileManager {
    fn working_directory(&self) -> &Path {
        &self.working_dir
    }

    fn set_working_directory(&mut self, cwd: &Path) {
        self.working_dir = cwd.to_path_buf();
    }

    fn status(&mut self, path: &Path) -> Result<Status, ScanError> {
        let path = canonicalize(&self.working_dir, path);
        if let Some(status) = self.stat_cache.get(&path) {
            return Ok(*status);
        }
        let status = self.fs.status(&path).map_err(|e| ScanError::io(&path, e))?;
        self.stat_cache.insert(path, status);
        Ok(status)
    }

    fn read(&mut self, path: &Path) -> Result<Arc<[u8]>, ScanError> {
        let path = canonicalize(&self.working_dir, path);
        let bytes = self.fs.read(&path).map_err(|e| ScanError::io(&path, e))?;
        Ok(bytes.into())
    }

    fn directives(&mut self, path: &Path) -> Result<Arc<[Directive]>, ScanError> {
        let contents = self.read(path)?;
        Ok(scan_directives(&contents).into())
    }

    fn clear_stat_cache(&mut self) {
        self.stat_cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::InMemoryFileSystem;

    #[test]
    fn test_stat_cache_and_fresh_reads() {
        let memory = Arc::new(InMemoryFileSystem::new());
        memory.add_file("/a.h", "#define A\n");
        let mut fm = FileManager::new(memory.clone());

        assert!(fm.is_file(Path::new("/a.h")));
        assert_eq!(fm.stat_cache_len(), 1);

        memory.add_file("/a.h", "#define B\n#define C\n");
        assert_eq!(fm.directives(Path::new("/a.h")).unwrap().len(), 2);

        fm.clear_stat_cache();
        assert_eq!(fm.stat_cache_len(), 0);
        assert!(!fm.caches_directives());
    }
}
