//! Content-addressed object stores.
//!
//! An object is a list of references to other objects plus a data blob. Its
//! id is the BLAKE3 hash of the reference count, the referenced ids, the
//! data length and the data, so identical objects always share an id.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use depscan_core::{CasError, CasId};
use tracing::debug;

use crate::cas_tree::CasTree;

/// A stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub refs: Vec<CasId>,
    pub data: Arc<[u8]>,
}

/// Compute the id an object would be stored under.
pub fn hash_object(refs: &[CasId], data: &[u8]) -> CasId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(refs.len() as u64).to_le_bytes());
    for id in refs {
        hasher.update(id.as_bytes());
    }
    hasher.update(&(data.len() as u64).to_le_bytes());
    hasher.update(data);
    CasId::new(*hasher.finalize().as_bytes())
}

/// Storage for content-addressed objects, shared by every worker.
pub trait ObjectStore: Send + Sync + fmt::Debug {
    /// Store an object and return its id. Storing an existing object is a
    /// no-op.
    fn store(&self, refs: &[CasId], data: &[u8]) -> Result<CasId, CasError>;

    /// Load an object.
    fn load(&self, id: &CasId) -> Result<Object, CasError>;

    /// Whether an object is stored.
    fn contains(&self, id: &CasId) -> bool;

    /// Store a leaf object holding file bytes.
    fn store_blob(&self, data: &[u8]) -> Result<CasId, CasError> {
        self.store(&[], data)
    }

    /// Store a filesystem tree.
    fn commit_tree(&self, tree: &CasTree) -> Result<CasId, CasError> {
        let (refs, data) = tree.encode();
        self.store(&refs, &data)
    }

    /// Load a filesystem tree stored with [`commit_tree`].
    ///
    /// [`commit_tree`]: ObjectStore::commit_tree
    fn resolve_tree(&self, id: &CasId) -> Result<CasTree, CasError> {
        let object = self.load(id)?;
        CasTree::decode(id, &object)
    }
}

/// Object store held in memory for the lifetime of a service.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<CasId, Object>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Check if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn store(&self, refs: &[CasId], data: &[u8]) -> Result<CasId, CasError> {
        let id = hash_object(refs, data);
        self.objects.entry(id).or_insert_with(|| Object {
            refs: refs.to_vec(),
            data: data.into(),
        });
        Ok(id)
    }

    fn load(&self, id: &CasId) -> Result<Object, CasError> {
        self.objects
            .get(id)
            .map(|object| object.value().clone())
            .ok_or(CasError::ObjectNotFound { id: *id })
    }

    fn contains(&self, id: &CasId) -> bool {
        self.objects.contains_key(id)
    }
}

/// Object store persisted under a directory as `objects/<2 hex>/<62 hex>`.
///
/// Each file holds the reference count as a little-endian `u64`, the raw
/// reference ids and then the data. Files are written to a temporary name
/// and renamed into place so readers never see partial objects.
#[derive(Debug, Clone)]
pub struct OnDiskObjectStore {
    root: PathBuf,
}

impl OnDiskObjectStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CasError> {
        let root = root.into();
        let objects = root.join("objects");
        fs::create_dir_all(&objects).map_err(|source| CasError::Io {
            path: objects.clone(),
            source,
        })?;
        debug!(root = %root.display(), "Opened on-disk object store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, id: &CasId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join("objects").join(&hex[..2]).join(&hex[2..])
    }

    fn write_object(&self, path: &Path, refs: &[CasId], data: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut bytes = Vec::with_capacity(8 + refs.len() * 32 + data.len());
        bytes.extend_from_slice(&(refs.len() as u64).to_le_bytes());
        for id in refs {
            bytes.extend_from_slice(id.as_bytes());
        }
        bytes.extend_from_slice(data);

        let tmp = path.with_extension(format!("tmp{}", std::process::id()));
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, path)
    }
}

impl ObjectStore for OnDiskObjectStore {
    fn store(&self, refs: &[CasId], data: &[u8]) -> Result<CasId, CasError> {
        let id = hash_object(refs, data);
        let path = self.object_path(&id);
        if !path.exists() {
            self.write_object(&path, refs, data)
                .map_err(|source| CasError::Io { path, source })?;
        }
        Ok(id)
    }

    fn load(&self, id: &CasId) -> Result<Object, CasError> {
        let path = self.object_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CasError::ObjectNotFound { id: *id });
            }
            Err(source) => return Err(CasError::Io { path, source }),
        };
        let object = decode_object(id, &bytes)?;
        if hash_object(&object.refs, &object.data) != *id {
            return Err(CasError::Corrupt {
                id: *id,
                message: "content does not match id".to_string(),
            });
        }
        Ok(object)
    }

    fn contains(&self, id: &CasId) -> bool {
        self.object_path(id).exists()
    }
}

fn decode_object(id: &CasId, bytes: &[u8]) -> Result<Object, CasError> {
    let corrupt = |message: &str| CasError::Corrupt {
        id: *id,
        message: message.to_string(),
    };
    let (count, rest) = bytes
        .split_first_chunk::<8>()
        .ok_or_else(|| corrupt("truncated header"))?;
    let count = usize::try_from(u64::from_le_bytes(*count)).map_err(|_| corrupt("bad ref count"))?;
    let refs_len = count
        .checked_mul(32)
        .filter(|&len| len <= rest.len())
        .ok_or_else(|| corrupt("truncated references"))?;
    let (ref_bytes, data) = rest.split_at(refs_len);
    let refs = ref_bytes
        .chunks_exact(32)
        .map(|chunk| {
            let mut raw = [0u8; 32];
            raw.copy_from_slice(chunk);
            CasId::new(raw)
        })
        .collect();
    Ok(Object {
        refs,
        data: data.into(),
    })
}
