//! Filesystem that ingests every file it reads into an object store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use depscan_core::{CasError, CasId, ScanError};
use tracing::{debug, trace};

use crate::cas::ObjectStore;
use crate::cas_tree::{CasTree, TreeEntry};
use crate::directives::{Directive, scan_directives};
use crate::path::canonicalize;
use crate::scan_fs::{RemapPath, ScanFilesystem, is_a_directory};
use crate::vfs::{FileSystem, Status};

#[derive(Debug)]
struct CasEntry {
    status: Status,
    blob: Option<CasId>,
    contents: Option<Arc<[u8]>>,
}

impl CasEntry {
    fn tree_entry(&self) -> TreeEntry {
        match self.blob {
            Some(id) => TreeEntry::File(id),
            None => TreeEntry::Directory,
        }
    }
}

/// Build-wide cache of ingested files and of directives keyed by content.
#[derive(Debug)]
pub struct SharedCasCache {
    store: Arc<dyn ObjectStore>,
    files: DashMap<PathBuf, Arc<CasEntry>>,
    directives: DashMap<CasId, Arc<[Directive]>>,
}

impl SharedCasCache {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            files: DashMap::new(),
            directives: DashMap::new(),
        }
    }

    /// The store files are ingested into.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Number of ingested paths.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Create a per-worker view reading misses from `underlying`.
    ///
    /// With `cache_directives`, directives are shared between every file
    /// with identical contents; otherwise they are extracted on each read.
    pub fn create_proxy_fs(
        self: &Arc<Self>,
        underlying: Arc<dyn FileSystem>,
        cache_directives: bool,
    ) -> CachingCasFilesystem {
        CachingCasFilesystem {
            shared: self.clone(),
            underlying,
            working_dir: PathBuf::from("/"),
            cache_directives,
            tracked: None,
        }
    }
}

/// Per-worker content-addressed view that can record every path it serves.
#[derive(Debug)]
pub struct CachingCasFilesystem {
    shared: Arc<SharedCasCache>,
    underlying: Arc<dyn FileSystem>,
    working_dir: PathBuf,
    cache_directives: bool,
    tracked: Option<BTreeMap<PathBuf, TreeEntry>>,
}

impl CachingCasFilesystem {
    fn entry(&mut self, path: &Path) -> Result<Arc<CasEntry>, ScanError> {
        let path = canonicalize(&self.working_dir, path);
        let cached = self.shared.files.get(&path).map(|e| e.value().clone());
        let entry = match cached {
            Some(entry) => entry,
            None => {
                let fresh = Arc::new(self.ingest(&path)?);
                self.shared
                    .files
                    .entry(path.clone())
                    .or_insert(fresh)
                    .value()
                    .clone()
            }
        };
        if let Some(tracked) = &mut self.tracked {
            tracked.insert(path, entry.tree_entry());
        }
        Ok(entry)
    }

    fn ingest(&self, path: &Path) -> Result<CasEntry, ScanError> {
        let status = self
            .underlying
            .status(path)
            .map_err(|e| ScanError::io(path, e))?;
        if status.is_directory() {
            return Ok(CasEntry {
                status,
                blob: None,
                contents: None,
            });
        }
        let bytes = self
            .underlying
            .read(path)
            .map_err(|e| ScanError::io(path, e))?;
        let blob = self.shared.store.store_blob(&bytes)?;
        trace!(path = %path.display(), %blob, "Ingested file");
        Ok(CasEntry {
            status,
            blob: Some(blob),
            contents: Some(bytes.into()),
        })
    }
}

impl ScanFilesystem for CachingCasFilesystem {
    fn working_directory(&self) -> &Path {
        &self.working_dir
    }

    fn set_working_directory(&mut self, cwd: &Path) {
        self.working_dir = cwd.to_path_buf();
    }

    fn status(&mut self, path: &Path) -> Result<Status, ScanError> {
        Ok(self.entry(path)?.status)
    }

    fn read(&mut self, path: &Path) -> Result<Arc<[u8]>, ScanError> {
        let entry = self.entry(path)?;
        entry.contents.clone().ok_or_else(|| is_a_directory(path))
    }

    fn directives(&mut self, path: &Path) -> Result<Arc<[Directive]>, ScanError> {
        let entry = self.entry(path)?;
        let (Some(blob), Some(contents)) = (entry.blob, entry.contents.as_ref()) else {
            return Err(is_a_directory(path));
        };
        if !self.cache_directives {
            return Ok(scan_directives(contents).into());
        }
        if let Some(directives) = self.shared.directives.get(&blob) {
            return Ok(directives.value().clone());
        }
        let directives: Arc<[Directive]> = scan_directives(contents).into();
        Ok(self
            .shared
            .directives
            .entry(blob)
            .or_insert(directives)
            .value()
            .clone())
    }

    fn caches_directives(&self) -> bool {
        self.cache_directives
    }

    fn track_new_accesses(&mut self) -> bool {
        self.tracked = Some(BTreeMap::new());
        true
    }

    fn create_tree_from_new_accesses(
        &mut self,
        remap: Option<&RemapPath>,
    ) -> Option<Result<CasId, CasError>> {
        let tracked = self.tracked.take()?;
        let mut tree = CasTree::new();
        for (path, entry) in tracked {
            let path = match remap {
                Some(remap) => remap(&path),
                None => path,
            };
            tree.insert(path, entry);
        }
        let result = self.shared.store.commit_tree(&tree);
        if let Ok(root) = &result {
            debug!(%root, entries = tree.len(), "Committed accessed files");
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::InMemoryObjectStore;
    use crate::vfs::InMemoryFileSystem;

    fn setup() -> (Arc<InMemoryFileSystem>, Arc<SharedCasCache>, Arc<InMemoryObjectStore>) {
        let memory = Arc::new(InMemoryFileSystem::new());
        memory.add_file("/src/a.c", "#include \"a.h\"\n");
        memory.add_file("/src/a.h", "#define A\n");
        memory.add_file("/src/copy.h", "#define A\n");
        let store = Arc::new(InMemoryObjectStore::new());
        let shared = Arc::new(SharedCasCache::new(store.clone()));
        (memory, shared, store)
    }

    #[test]
    fn test_tracks_only_after_start() {
        let (memory, shared, store) = setup();
        let mut fs = shared.create_proxy_fs(memory, true);

        assert!(fs.create_tree_from_new_accesses(None).is_none());
        fs.read(Path::new("/src/copy.h")).unwrap();

        assert!(fs.track_new_accesses());
        fs.read(Path::new("/src/a.c")).unwrap();
        fs.directives(Path::new("/src/a.h")).unwrap();
        fs.status(Path::new("/src")).unwrap();
        assert!(fs.status(Path::new("/src/missing.h")).is_err());

        let root = fs.create_tree_from_new_accesses(None).unwrap().unwrap();
        let tree = store.resolve_tree(&root).unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.get(Path::new("/src")), Some(TreeEntry::Directory));
        assert!(tree.get(Path::new("/src/copy.h")).is_none());
    }

    #[test]
    fn test_remap_and_content_keyed_directives() {
        let (memory, shared, store) = setup();
        let mut fs = shared.create_proxy_fs(memory, true);
        fs.track_new_accesses();

        let a = fs.directives(Path::new("/src/a.h")).unwrap();
        let copy = fs.directives(Path::new("/src/copy.h")).unwrap();
        assert!(Arc::ptr_eq(&a, &copy));

        let remap = |p: &Path| Path::new("/^src").join(p.strip_prefix("/src").unwrap_or(p));
        let root = fs.create_tree_from_new_accesses(Some(&remap)).unwrap().unwrap();
        let tree = store.resolve_tree(&root).unwrap();
        assert!(tree.get(Path::new("/^src/a.h")).is_some());
        assert!(tree.get(Path::new("/src/a.h")).is_none());
    }
}
