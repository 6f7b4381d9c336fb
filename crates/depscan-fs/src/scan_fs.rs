//! The filesystem interface a scan reads through.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use depscan_core::{CasError, CasId, ScanError};

use crate::directives::Directive;
use crate::path::canonicalize;
use crate::vfs::Status;

/// Maps an accessed path to the path recorded in a committed tree.
pub type RemapPath = dyn Fn(&Path) -> PathBuf + Send + Sync;

/// Filesystem view of a single scan.
///
/// Implementations are owned by one worker and never shared between
/// threads; any sharing happens in the caches they wrap.
pub trait ScanFilesystem: std::fmt::Debug {
    /// Directory relative paths resolve against.
    fn working_directory(&self) -> &Path;

    /// Change the directory relative paths resolve against.
    fn set_working_directory(&mut self, cwd: &Path);

    /// Stat a path.
    fn status(&mut self, path: &Path) -> Result<Status, ScanError>;

    /// Read a file.
    fn read(&mut self, path: &Path) -> Result<Arc<[u8]>, ScanError>;

    /// Directives of a file.
    fn directives(&mut self, path: &Path) -> Result<Arc<[Directive]>, ScanError>;

    /// Absolute, dot-free form of `path`.
    fn absolute(&self, path: &Path) -> PathBuf {
        canonicalize(self.working_directory(), path)
    }

    fn is_file(&mut self, path: &Path) -> bool {
        matches!(self.status(path), Ok(status) if status.is_file())
    }

    fn is_directory(&mut self, path: &Path) -> bool {
        matches!(self.status(path), Ok(status) if status.is_directory())
    }

    /// Whether directives are served from a cache shared across scans.
    fn caches_directives(&self) -> bool {
        false
    }

    /// Drop cached stat results.
    fn clear_stat_cache(&mut self) {}

    /// Start recording accessed paths. Returns `false` if this filesystem
    /// cannot track accesses.
    fn track_new_accesses(&mut self) -> bool {
        false
    }

    /// Commit every path accessed since [`track_new_accesses`] as a tree.
    ///
    /// Returns `None` when tracking was never started.
    ///
    /// [`track_new_accesses`]: ScanFilesystem::track_new_accesses
    fn create_tree_from_new_accesses(
        &mut self,
        _remap: Option<&RemapPath>,
    ) -> Option<Result<CasId, CasError>> {
        None
    }
}

pub(crate) fn is_a_directory(path: &Path) -> ScanError {
    ScanError::Other {
        message: format!("'{}' is a directory", path.display()),
    }
}
