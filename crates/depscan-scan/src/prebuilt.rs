//! Discovering what a prebuilt module file transitively pulls in.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use depscan_core::ScanError;
use depscan_fs::ScanFilesystem;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Module name to module file for every known prebuilt module.
pub type PrebuiltModuleFiles = BTreeMap<String, PathBuf>;

/// An import recorded in a module file's control block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedModule {
    pub name: String,
    pub path: PathBuf,
}

/// A file that contributed to a module file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    pub path: PathBuf,
    #[serde(default)]
    pub is_system: bool,
}

/// The metadata at the head of a module file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlBlock {
    #[serde(default)]
    pub module_name: Option<String>,
    #[serde(default)]
    pub imports: Vec<ImportedModule>,
    #[serde(default)]
    pub input_files: Vec<InputFile>,
}

/// Reads the control block of a module file without loading the rest.
pub trait ModuleFileReader: Send + Sync + std::fmt::Debug {
    fn read_control_block(
        &self,
        fs: &mut dyn ScanFilesystem,
        path: &Path,
    ) -> Result<ControlBlock, ScanError>;
}

/// Module files whose control block is a JSON document.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonModuleFileReader;

impl ModuleFileReader for JsonModuleFileReader {
    fn read_control_block(
        &self,
        fs: &mut dyn ScanFilesystem,
        path: &Path,
    ) -> Result<ControlBlock, ScanError> {
        let bytes = fs.read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| ScanError::ModuleFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Walk the imports of `root`, recording each module once.
///
/// Newly seen imports are added to `modules` and queued; input files of
/// every visited module file are added to `input_files` when
/// `visit_input_files` is set.
pub fn visit_prebuilt_module(
    root: &Path,
    fs: &mut dyn ScanFilesystem,
    reader: &dyn ModuleFileReader,
    modules: &mut PrebuiltModuleFiles,
    input_files: &mut IndexSet<PathBuf>,
    visit_input_files: bool,
) -> Result<(), ScanError> {
    let mut worklist = vec![root.to_path_buf()];
    while let Some(path) = worklist.pop() {
        trace!(path = %path.display(), "Reading module file control block");
        let block = reader.read_control_block(fs, &path)?;
        for import in block.imports {
            if modules.contains_key(&import.name) {
                continue;
            }
            worklist.push(import.path.clone());
            modules.insert(import.name, import.path);
        }
        if visit_input_files {
            for input in block.input_files {
                input_files.insert(fs.absolute(&input.path));
            }
        }
    }
    debug!(root = %root.display(), modules = modules.len(), "Visited prebuilt module");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use depscan_fs::{InMemoryFileSystem, SharedFileSystemCache, WorkerFilesystem};
    use std::sync::Arc;

    fn block(name: &str, imports: &[(&str, &str)], inputs: &[&str]) -> String {
        serde_json::to_string(&ControlBlock {
            module_name: Some(name.to_string()),
            imports: imports
                .iter()
                .map(|(n, p)| ImportedModule {
                    name: n.to_string(),
                    path: PathBuf::from(p),
                })
                .collect(),
            input_files: inputs
                .iter()
                .map(|p| InputFile {
                    path: PathBuf::from(p),
                    is_system: false,
                })
                .collect(),
        })
        .unwrap()
    }

    #[test]
    fn test_visit_collects_transitive_imports() {
        let memory = Arc::new(InMemoryFileSystem::new());
        memory.add_file("/pch/p.pch", block("", &[("A", "/m/A.pcm")], &["/src/p.h"]));
        memory.add_file("/m/A.pcm", block("A", &[("B", "/m/B.pcm")], &["/src/a.h"]));
        memory.add_file("/m/B.pcm", block("B", &[("A", "/m/A.pcm")], &["/src/b.h"]));
        let mut fs = WorkerFilesystem::new(Arc::new(SharedFileSystemCache::new()), memory);

        let mut modules = PrebuiltModuleFiles::new();
        let mut inputs = IndexSet::new();
        visit_prebuilt_module(
            Path::new("/pch/p.pch"),
            &mut fs,
            &JsonModuleFileReader,
            &mut modules,
            &mut inputs,
            true,
        )
        .unwrap();

        assert_eq!(modules.len(), 2);
        assert_eq!(modules["B"], PathBuf::from("/m/B.pcm"));
        assert_eq!(inputs.len(), 3);
        assert!(inputs.contains(Path::new("/src/b.h")));
    }

    #[test]
    fn test_unreadable_module_file() {
        let memory = Arc::new(InMemoryFileSystem::new());
        memory.add_file("/m/bad.pcm", "not json");
        let mut fs = WorkerFilesystem::new(Arc::new(SharedFileSystemCache::new()), memory);
        let err = visit_prebuilt_module(
            Path::new("/m/bad.pcm"),
            &mut fs,
            &JsonModuleFileReader,
            &mut PrebuiltModuleFiles::new(),
            &mut IndexSet::new(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::ModuleFile { .. }));

        let err = visit_prebuilt_module(
            Path::new("/m/missing.pcm"),
            &mut fs,
            &JsonModuleFileReader,
            &mut PrebuiltModuleFiles::new(),
            &mut IndexSet::new(),
            false,
        )
        .unwrap_err();
        assert!(err.is_not_found());
    }
}
