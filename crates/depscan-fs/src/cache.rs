//! Build-wide cache of stat results, file contents and directives.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::directives::{Directive, scan_directives};
use crate::vfs::Status;

/// Cached result of reading one path.
#[derive(Debug)]
pub struct CachedFileSystemEntry {
    status: Status,
    contents: Option<Arc<[u8]>>,
    directives: OnceLock<Arc<[Directive]>>,
}

impl CachedFileSystemEntry {
    /// Entry for a regular file.
    pub fn file(status: Status, contents: Arc<[u8]>) -> Self {
        Self {
            status,
            contents: Some(contents),
            directives: OnceLock::new(),
        }
    }

    /// Entry for a directory.
    pub fn directory(status: Status) -> Self {
        Self {
            status,
            contents: None,
            directives: OnceLock::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_directory(&self) -> bool {
        self.status.is_directory()
    }

    /// File contents, `None` for directories.
    pub fn contents(&self) -> Option<&Arc<[u8]>> {
        self.contents.as_ref()
    }

    /// Directives of the file, extracted on first request and reused after.
    pub fn directives(&self) -> Option<Arc<[Directive]>> {
        let contents = self.contents.as_ref()?;
        Some(
            self.directives
                .get_or_init(|| scan_directives(contents).into())
                .clone(),
        )
    }

    /// Whether directives have been extracted already.
    pub fn has_directives(&self) -> bool {
        self.directives.get().is_some()
    }
}

/// Entries shared by every worker of one scanning service.
///
/// Keys are absolute, dot-free paths. Once a path is inserted its entry
/// never changes; a concurrent second insert yields the first entry. Failed
/// reads are never stored.
#[derive(Debug, Default)]
pub struct SharedFileSystemCache {
    entries: DashMap<PathBuf, Arc<CachedFileSystemEntry>>,
}

impl SharedFileSystemCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry.
    pub fn get(&self, path: &Path) -> Option<Arc<CachedFileSystemEntry>> {
        self.entries.get(path).map(|entry| entry.value().clone())
    }

    /// Insert `entry` unless the path is already cached; returns the entry
    /// that ends up stored.
    pub fn get_or_insert(
        &self,
        path: PathBuf,
        entry: Arc<CachedFileSystemEntry>,
    ) -> Arc<CachedFileSystemEntry> {
        self.entries.entry(path).or_insert(entry).value().clone()
    }

    /// Number of cached paths.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::DirectiveKind;

    #[test]
    fn test_first_insert_wins() {
        let cache = SharedFileSystemCache::new();
        let first = Arc::new(CachedFileSystemEntry::file(Status::file(1), Arc::from(&b"a"[..])));
        let second = Arc::new(CachedFileSystemEntry::file(Status::file(1), Arc::from(&b"b"[..])));

        let stored = cache.get_or_insert(PathBuf::from("/x"), first.clone());
        assert!(Arc::ptr_eq(&stored, &first));
        let stored = cache.get_or_insert(PathBuf::from("/x"), second);
        assert!(Arc::ptr_eq(&stored, &first));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_directives_computed_once() {
        let entry = CachedFileSystemEntry::file(Status::file(0), Arc::from(&b"#pragma once\n"[..]));
        assert!(!entry.has_directives());
        let a = entry.directives().unwrap();
        let b = entry.directives().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a[0].kind, DirectiveKind::Pragma);

        assert!(CachedFileSystemEntry::directory(Status::directory()).directives().is_none());
    }
}
