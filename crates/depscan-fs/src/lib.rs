//! Filesystem layer for dependency scanning.
//!
//! Scanning reads the same headers thousands of times across a build. This
//! crate provides the views a scan reads through:
//!
//! - [`WorkerFilesystem`] - per-worker view over a [`SharedFileSystemCache`]
//!   that stats, reads and extracts directives once per file per build
//! - [`FileManager`] - uncached reads for canonical preprocessing
//! - [`CachingCasFilesystem`] - ingests every file into an [`ObjectStore`]
//!   and can commit the accessed paths as a [`CasTree`]
//!
//! All of them implement [`ScanFilesystem`] and read misses from a
//! [`FileSystem`], usually an [`OverlayFileSystem`] over the real disk.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use depscan_fs::{PhysicalFileSystem, ScanFilesystem, SharedFileSystemCache, WorkerFilesystem};
//!
//! let shared = Arc::new(SharedFileSystemCache::new());
//! let mut fs = WorkerFilesystem::new(shared, Arc::new(PhysicalFileSystem::new()));
//! for directive in fs.directives("/usr/include/stdio.h".as_ref())?.iter() {
//!     println!("{:?} {}", directive.kind, directive.body);
//! }
//! ```

mod cache;
mod cas;
mod cas_fs;
mod cas_tree;
mod directives;
mod file_manager;
mod path;
mod scan_fs;
mod vfs;
mod worker_fs;

pub use cache::{CachedFileSystemEntry, SharedFileSystemCache};
pub use cas::{InMemoryObjectStore, Object, ObjectStore, OnDiskObjectStore, hash_object};
pub use cas_fs::{CachingCasFilesystem, SharedCasCache};
pub use cas_tree::{CasTree, TreeEntry};
pub use directives::{Directive, DirectiveKind, scan_directives};
pub use file_manager::FileManager;
pub use path::{canonicalize, make_absolute, remove_dots};
pub use scan_fs::{RemapPath, ScanFilesystem};
pub use vfs::{
    FileKind, FileSystem, InMemoryFileSystem, OverlayFileSystem, PhysicalFileSystem, Status,
    UniqueId,
};
pub use worker_fs::WorkerFilesystem;
