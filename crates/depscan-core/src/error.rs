//! Error types for scanning operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::cas_id::CasId;

/// Errors that can occur while scanning a translation unit.
///
/// A scan either fully succeeds or fails with exactly one of these; partial
/// dependency lists are never returned.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The command line did not decompose into any compiler job.
    #[error("no compiler job found in '{command_line}'")]
    NoCompilerJob { command_line: String },

    /// The front end reported errors; `output` holds the rendered diagnostics.
    #[error("{output}")]
    Diagnostics { output: String },

    /// A prebuilt module file could not be decoded.
    #[error("malformed module file {path}: {message}")]
    ModuleFile { path: PathBuf, message: String },

    /// The content-addressed store rejected an operation.
    #[error("CAS error: {0}")]
    Cas(#[from] CasError),

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl ScanError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Wrap rendered diagnostic text.
    pub fn diagnostics(output: impl Into<String>) -> Self {
        Self::Diagnostics {
            output: output.into(),
        }
    }

    /// Whether this error means the path simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors raised by a content-addressed object store.
#[derive(Debug, Error)]
pub enum CasError {
    /// No object with this id is stored.
    #[error("object {id} not found")]
    ObjectNotFound { id: CasId },

    /// A textual id could not be parsed.
    #[error("invalid object id '{text}'")]
    InvalidId { text: String },

    /// The stored object does not decode as the expected kind.
    #[error("object {id} is corrupt: {message}")]
    Corrupt { id: CasId, message: String },

    /// Backing storage failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_io() {
        let err = ScanError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, ScanError::PermissionDenied { .. }));

        let err = ScanError::io(
            "/test/missing",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_no_compiler_job_message() {
        let err = ScanError::NoCompilerJob {
            command_line: "clang a.o -o app".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "no compiler job found in 'clang a.o -o app'"
        );
    }

    #[test]
    fn test_cas_error_converts() {
        let err: ScanError = CasError::ObjectNotFound {
            id: CasId::new([0u8; 32]),
        }
        .into();
        assert!(matches!(err, ScanError::Cas(_)));
    }
}
