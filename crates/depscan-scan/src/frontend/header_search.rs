//! Resolving `#include` spellings to files.

use std::path::{Path, PathBuf};

use depscan_fs::ScanFilesystem;

use crate::invocation::HeaderSearchOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirKind {
    Quote,
    Angled,
    System,
}

/// One configured search directory, stored absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchDir {
    pub path: PathBuf,
    pub kind: DirKind,
}

/// A resolved include.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundHeader {
    /// Absolute, canonical path.
    pub path: PathBuf,
    /// Index of the search directory it was found in; `None` when found
    /// next to the includer or by absolute spelling.
    pub dir_index: Option<usize>,
    pub is_system: bool,
}

/// Header search in `-iquote`, `-I`, `-isystem` order.
#[derive(Debug, Clone, Default)]
pub struct HeaderSearch {
    dirs: Vec<SearchDir>,
    angled_start: usize,
}

impl HeaderSearch {
    pub fn new(opts: &HeaderSearchOptions, fs: &dyn ScanFilesystem) -> Self {
        let resolve = |dir: &PathBuf| {
            let dir = match (dir.strip_prefix("="), &opts.sysroot) {
                (Ok(rest), Some(sysroot)) => sysroot.join(rest),
                _ => dir.clone(),
            };
            fs.absolute(&dir)
        };
        let mut dirs: Vec<SearchDir> = opts
            .quote_dirs
            .iter()
            .map(|d| SearchDir {
                path: resolve(d),
                kind: DirKind::Quote,
            })
            .collect();
        let angled_start = dirs.len();
        dirs.extend(opts.angled_dirs.iter().map(|d| SearchDir {
            path: resolve(d),
            kind: DirKind::Angled,
        }));
        dirs.extend(opts.system_dirs.iter().map(|d| SearchDir {
            path: resolve(d),
            kind: DirKind::System,
        }));
        Self { dirs, angled_start }
    }

    pub fn dirs(&self) -> &[SearchDir] {
        &self.dirs
    }

    /// Directories searched for `<...>` includes and module maps.
    pub fn angled_dirs(&self) -> impl Iterator<Item = &Path> {
        self.dirs[self.angled_start..].iter().map(|d| d.path.as_path())
    }

    /// Look up `spelling`.
    ///
    /// Quoted includes first try `includer_dir`. `after` restricts the
    /// search to directories following that index, for `#include_next`.
    pub fn lookup(
        &self,
        fs: &mut dyn ScanFilesystem,
        spelling: &str,
        angled: bool,
        includer: Option<(&Path, bool)>,
        after: Option<usize>,
    ) -> Option<FoundHeader> {
        let relative = Path::new(spelling);
        if relative.is_absolute() {
            return fs.is_file(relative).then(|| FoundHeader {
                path: fs.absolute(relative),
                dir_index: None,
                is_system: false,
            });
        }

        if !angled && after.is_none() {
            if let Some((dir, is_system)) = includer {
                let candidate = dir.join(relative);
                if fs.is_file(&candidate) {
                    return Some(FoundHeader {
                        path: fs.absolute(&candidate),
                        dir_index: None,
                        is_system,
                    });
                }
            }
        }

        let start = match after {
            Some(index) => index + 1,
            None if angled => self.angled_start,
            None => 0,
        };
        for (index, dir) in self.dirs.iter().enumerate().skip(start) {
            let candidate = dir.path.join(relative);
            if fs.is_file(&candidate) {
                return Some(FoundHeader {
                    path: fs.absolute(&candidate),
                    dir_index: Some(index),
                    is_system: dir.kind == DirKind::System,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depscan_fs::{InMemoryFileSystem, SharedFileSystemCache, WorkerFilesystem};
    use std::sync::Arc;

    fn fs() -> WorkerFilesystem {
        let memory = Arc::new(InMemoryFileSystem::new());
        memory.add_file("/src/local.h", "");
        memory.add_file("/quote/q.h", "");
        memory.add_file("/inc/a.h", "");
        memory.add_file("/inc/local.h", "");
        memory.add_file("/sys/a.h", "");
        memory.add_file("/sys/std.h", "");
        let mut fs = WorkerFilesystem::new(Arc::new(SharedFileSystemCache::new()), memory);
        fs.set_working_directory(Path::new("/src"));
        fs
    }

    fn search(fs: &WorkerFilesystem) -> HeaderSearch {
        HeaderSearch::new(
            &HeaderSearchOptions {
                quote_dirs: vec!["/quote".into()],
                angled_dirs: vec!["../inc".into()],
                system_dirs: vec!["/sys".into()],
                sysroot: None,
            },
            fs,
        )
    }

    #[test]
    fn test_search_order() {
        let mut fs = fs();
        let hs = search(&fs);
        assert_eq!(hs.dirs()[1].path, PathBuf::from("/inc"));

        let src = Some((Path::new("/src"), false));
        let found = hs.lookup(&mut fs, "local.h", false, src, None).unwrap();
        assert_eq!(found.path, PathBuf::from("/src/local.h"));
        assert_eq!(found.dir_index, None);

        let found = hs.lookup(&mut fs, "local.h", true, src, None).unwrap();
        assert_eq!(found.path, PathBuf::from("/inc/local.h"));

        assert!(hs.lookup(&mut fs, "q.h", true, src, None).is_none());
        assert_eq!(hs.lookup(&mut fs, "q.h", false, src, None).unwrap().dir_index, Some(0));

        let std = hs.lookup(&mut fs, "std.h", true, src, None).unwrap();
        assert!(std.is_system);
    }

    #[test]
    fn test_include_next() {
        let mut fs = fs();
        let hs = search(&fs);
        let first = hs.lookup(&mut fs, "a.h", true, None, None).unwrap();
        assert_eq!(first.dir_index, Some(1));
        let next = hs.lookup(&mut fs, "a.h", true, None, first.dir_index).unwrap();
        assert_eq!(next.path, PathBuf::from("/sys/a.h"));
        assert!(hs.lookup(&mut fs, "a.h", true, None, next.dir_index).is_none());
    }
}
