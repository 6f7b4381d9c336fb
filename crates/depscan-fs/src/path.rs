//! Lexical path normalisation.

use std::path::{Component, Path, PathBuf};

/// Remove `.` and `..` components without touching the filesystem.
///
/// `..` directly under the root is dropped; leading `..` of a relative path
/// is kept.
pub fn remove_dots(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() && !path.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Resolve `path` against `cwd` when it is relative.
pub fn make_absolute(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Absolute, dot-free form of `path`.
///
/// Applying it twice gives the same result as applying it once.
pub fn canonicalize(cwd: &Path, path: &Path) -> PathBuf {
    remove_dots(&make_absolute(cwd, path))
}
