//! Filesystem trees stored as content-addressed objects.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use depscan_core::{CasError, CasId};

use crate::cas::Object;

const TREE_MAGIC: &[u8] = b"depscan-tree-v2\n";

/// One entry of a [`CasTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeEntry {
    /// A file and the blob holding its bytes.
    File(CasId),
    /// A directory that was looked up.
    Directory,
}

/// Set of paths with the contents they had when scanned, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CasTree {
    entries: BTreeMap<PathBuf, TreeEntry>,
}

impl CasTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, entry: TreeEntry) {
        self.entries.insert(path.into(), entry);
    }

    pub fn get(&self, path: &Path) -> Option<TreeEntry> {
        self.entries.get(path).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, TreeEntry)> {
        self.entries.iter().map(|(path, entry)| (path.as_path(), *entry))
    }

    /// Paths of file entries.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.iter()
            .filter(|(_, entry)| matches!(entry, TreeEntry::File(_)))
            .map(|(path, _)| path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode as object references and data.
    ///
    /// The data is a header followed by one record per entry: a kind byte
    /// (`f` or `d`), the path length as a little-endian `u64`, and the raw
    /// path bytes. File records consume the next reference in order.
    pub fn encode(&self) -> (Vec<CasId>, Vec<u8>) {
        let mut refs = Vec::new();
        let mut data = TREE_MAGIC.to_vec();
        for (path, entry) in &self.entries {
            match entry {
                TreeEntry::File(id) => {
                    refs.push(*id);
                    data.push(b'f');
                }
                TreeEntry::Directory => data.push(b'd'),
            }
            let bytes = path_bytes(path);
            data.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
            data.extend_from_slice(&bytes);
        }
        (refs, data)
    }

    /// Decode an object produced by [`CasTree::encode`].
    pub fn decode(id: &CasId, object: &Object) -> Result<Self, CasError> {
        let corrupt = |message: String| CasError::Corrupt { id: *id, message };
        let mut body = object
            .data
            .strip_prefix(TREE_MAGIC)
            .ok_or_else(|| corrupt("not a tree object".to_string()))?;

        let mut refs = object.refs.iter();
        let mut tree = Self::new();
        while let Some((&kind, rest)) = body.split_first() {
            let (len, rest) = rest
                .split_first_chunk::<8>()
                .ok_or_else(|| corrupt("truncated tree record".to_string()))?;
            let len = usize::try_from(u64::from_le_bytes(*len))
                .map_err(|_| corrupt("tree path too long".to_string()))?;
            let (raw, rest) = rest
                .split_at_checked(len)
                .ok_or_else(|| corrupt("truncated tree path".to_string()))?;
            let path = path_from_bytes(raw).ok_or_else(|| corrupt("tree path is not valid".to_string()))?;
            let entry = match kind {
                b'f' => {
                    let id = refs
                        .next()
                        .ok_or_else(|| corrupt(format!("missing reference for '{}'", path.display())))?;
                    TreeEntry::File(*id)
                }
                b'd' => TreeEntry::Directory,
                other => return Err(corrupt(format!("bad tree record kind {other:#04x}"))),
            };
            tree.insert(path, entry);
            body = rest;
        }
        if refs.next().is_some() {
            return Err(corrupt("unused references".to_string()));
        }
        Ok(tree)
    }
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    Cow::Owned(path.to_string_lossy().into_owned().into_bytes())
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> Option<PathBuf> {
    use std::os::unix::ffi::OsStrExt;
    Some(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> Option<PathBuf> {
    std::str::from_utf8(bytes).ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::{InMemoryObjectStore, ObjectStore};

    #[test]
    fn test_commit_and_resolve() {
        let store = InMemoryObjectStore::new();
        let a = store.store_blob(b"a").unwrap();
        let b = store.store_blob(b"b").unwrap();

        let mut tree = CasTree::new();
        tree.insert("/src/b.h", TreeEntry::File(b));
        tree.insert("/src", TreeEntry::Directory);
        tree.insert("/src/a.c", TreeEntry::File(a));

        let root = store.commit_tree(&tree).unwrap();
        let resolved = store.resolve_tree(&root).unwrap();
        assert_eq!(resolved, tree);
        assert_eq!(
            resolved.files().collect::<Vec<_>>(),
            vec![Path::new("/src/a.c"), Path::new("/src/b.h")]
        );
        // Insertion order does not affect the id.
        let mut reordered = CasTree::new();
        reordered.insert("/src/a.c", TreeEntry::File(a));
        reordered.insert("/src/b.h", TreeEntry::File(b));
        reordered.insert("/src", TreeEntry::Directory);
        assert_eq!(store.commit_tree(&reordered).unwrap(), root);
    }

    #[test]
    fn test_newline_in_path_round_trips() {
        let store = InMemoryObjectStore::new();
        let a = store.store_blob(b"a").unwrap();
        let b = store.store_blob(b"b").unwrap();

        let mut tree = CasTree::new();
        tree.insert("/src/a\nf /evil.h", TreeEntry::Directory);
        tree.insert("/src/a.h", TreeEntry::File(a));
        tree.insert("/src/b.h", TreeEntry::File(b));

        let root = store.commit_tree(&tree).unwrap();
        assert_eq!(store.resolve_tree(&root).unwrap(), tree);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_paths_stay_distinct() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let store = InMemoryObjectStore::new();
        let x = store.store_blob(b"x").unwrap();
        let y = store.store_blob(b"y").unwrap();

        let mut tree = CasTree::new();
        tree.insert(PathBuf::from(OsStr::from_bytes(b"/src/\xff.h")), TreeEntry::File(x));
        tree.insert(PathBuf::from(OsStr::from_bytes(b"/src/\xfe.h")), TreeEntry::File(y));

        let root = store.commit_tree(&tree).unwrap();
        let resolved = store.resolve_tree(&root).unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved, tree);
    }

    #[test]
    fn test_truncated_tree_is_corrupt() {
        let store = InMemoryObjectStore::new();
        let mut data = TREE_MAGIC.to_vec();
        data.push(b'd');
        data.extend_from_slice(&100u64.to_le_bytes());
        data.extend_from_slice(b"/short");
        let id = store.store(&[], &data).unwrap();
        assert!(matches!(store.resolve_tree(&id), Err(CasError::Corrupt { .. })));
    }

    #[test]
    fn test_blob_is_not_a_tree() {
        let store = InMemoryObjectStore::new();
        let blob = store.store_blob(b"plain").unwrap();
        assert!(matches!(
            store.resolve_tree(&blob),
            Err(CasError::Corrupt { .. })
        ));
    }
}
