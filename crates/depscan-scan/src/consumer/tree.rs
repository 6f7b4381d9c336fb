use std::path::{Path, PathBuf};
use std::sync::Arc;

use depscan_core::{
    CasError, CasId, Command, IncludeTree, IncludeTreeRoot, ModuleDeps, ModuleId, ModuleOutputKind,
    PrebuiltModuleDep, ScanError,
};
use depscan_fs::ObjectStore;
use tracing::debug;

use super::DependencyConsumer;

/// Keeps only the content-addressed root of every file a scan accessed.
#[derive(Debug, Default)]
pub struct TreeConsumer {
    root_id: Option<CasId>,
}

impl TreeConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_root_id(&mut self) -> Result<CasId, ScanError> {
        self.root_id.take().ok_or_else(|| ScanError::Other {
            message: "scan did not produce a filesystem tree".to_string(),
        })
    }
}

impl DependencyConsumer for TreeConsumer {
    fn handle_build_command(&mut self, _command: Command) {}

    fn handle_file_dependency(&mut self, _path: &Path) {}

    fn handle_prebuilt_module_dependency(&mut self, _dep: PrebuiltModuleDep) {}

    fn handle_module_dependency(&mut self, _deps: ModuleDeps) {}

    fn handle_context_hash(&mut self, _hash: String) {}

    fn handle_cas_file_system_root_id(&mut self, id: CasId) {
        self.root_id = Some(id);
    }

    fn lookup_module_output(&self, _id: &ModuleId, _kind: ModuleOutputKind) -> String {
        String::new()
    }
}

/// Builds the include tree of a translation unit and commits it to an
/// object store when the scan finishes.
#[derive(Debug)]
pub struct IncludeTreeConsumer {
    store: Arc<dyn ObjectStore>,
    pch: Option<PathBuf>,
    stack: Vec<IncludeTree>,
    main_file: Option<IncludeTree>,
    root: Option<IncludeTreeRoot>,
}

impl IncludeTreeConsumer {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            pch: None,
            stack: Vec::new(),
            main_file: None,
            root: None,
        }
    }

    pub fn take_include_tree(&mut self) -> Result<IncludeTreeRoot, ScanError> {
        self.root.take().ok_or_else(|| ScanError::Other {
            message: "scan did not produce an include tree".to_string(),
        })
    }
}

/// Store one node: refs are the contents followed by every child node,
/// data is the path then one byte per `__has_include` result.
fn commit_node(store: &dyn ObjectStore, node: &IncludeTree) -> Result<CasId, CasError> {
    let mut refs = Vec::with_capacity(node.includes.len() + 1);
    refs.push(node.contents);
    for child in &node.includes {
        refs.push(commit_node(store, child)?);
    }
    let mut data = node.path.to_string_lossy().into_owned().into_bytes();
    data.push(0);
    data.extend(node.has_include_checks.iter().map(|&found| if found { b'1' } else { b'0' }));
    store.store(&refs, &data)
}

impl DependencyConsumer for IncludeTreeConsumer {
    fn handle_build_command(&mut self, _command: Command) {}

    fn handle_file_dependency(&mut self, _path: &Path) {}

    fn handle_prebuilt_module_dependency(&mut self, _dep: PrebuiltModuleDep) {}

    fn handle_module_dependency(&mut self, _deps: ModuleDeps) {}

    fn handle_context_hash(&mut self, _hash: String) {}

    fn lookup_module_output(&self, _id: &ModuleId, _kind: ModuleOutputKind) -> String {
        String::new()
    }

    fn handle_include_tree_pch(&mut self, pch: &Path) {
        self.pch = Some(pch.to_path_buf());
    }

    fn entered_include(&mut self, path: &Path, contents: CasId) {
        self.stack.push(IncludeTree::new(path, contents));
    }

    fn exited_include(&mut self, _path: &Path) {
        let Some(node) = self.stack.pop() else {
            return;
        };
        match self.stack.last_mut() {
            Some(parent) => parent.includes.push(node),
            None => self.main_file = Some(node),
        }
    }

    fn handle_has_include_check(&mut self, found: bool) {
        if let Some(node) = self.stack.last_mut() {
            node.has_include_checks.push(found);
        }
    }

    fn finalize(&mut self) -> Result<(), ScanError> {
        let main_file = self.main_file.take().ok_or_else(|| ScanError::Other {
            message: "no main file was preprocessed".to_string(),
        })?;
        let main_id = commit_node(self.store.as_ref(), &main_file)?;
        let pch = self
            .pch
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = self.store.store(&[main_id], pch.as_bytes())?;
        debug!(root = %id, files = main_file.file_count(), "Committed include tree");
        self.root = Some(IncludeTreeRoot {
            id,
            pch: self.pch.take(),
            main_file,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depscan_fs::InMemoryObjectStore;

    #[test]
    fn test_tree_consumer_requires_root() {
        let mut consumer = TreeConsumer::new();
        assert!(consumer.take_root_id().is_err());
        consumer.handle_cas_file_system_root_id(CasId::new([7; 32]));
        assert_eq!(consumer.take_root_id().unwrap(), CasId::new([7; 32]));
    }

    #[test]
    fn test_include_tree_nesting_and_commit() {
        let store = Arc::new(InMemoryObjectStore::new());
        let mut consumer = IncludeTreeConsumer::new(store.clone());
        let blob = store.store_blob(b"int x;").unwrap();

        consumer.entered_include(Path::new("/a.c"), blob);
        consumer.handle_has_include_check(true);
        consumer.entered_include(Path::new("/b.h"), blob);
        consumer.handle_has_include_check(false);
        consumer.exited_include(Path::new("/b.h"));
        consumer.entered_include(Path::new("/c.h"), blob);
        consumer.exited_include(Path::new("/c.h"));
        consumer.exited_include(Path::new("/a.c"));
        consumer.finalize().unwrap();

        let root = consumer.take_include_tree().unwrap();
        assert_eq!(root.main_file.file_count(), 3);
        assert_eq!(root.main_file.has_include_checks, vec![true]);
        assert_eq!(root.main_file.includes[0].has_include_checks, vec![false]);
        assert!(store.contains(&root.id));

        let object = store.load(&root.id).unwrap();
        assert_eq!(object.refs.len(), 1);
        assert!(consumer.take_include_tree().is_err());
    }

    #[test]
    fn test_finalize_without_main_file_fails() {
        let mut consumer = IncludeTreeConsumer::new(Arc::new(InMemoryObjectStore::new()));
        assert!(consumer.finalize().is_err());
    }
}
