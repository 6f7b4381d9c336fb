use std::path::{Path, PathBuf};
use std::sync::Arc;

use depscan_core::{CasError, ScanError};
use depscan_fs::ObjectStore;

use super::DependencyFileGenerator;
use crate::consumer::DependencyConsumer;
use crate::frontend::{ModuleInfo, PreprocessorCallbacks};

/// Stores every entered file and reports the include structure.
pub struct IncludeTreeCollector<'c> {
    generator: DependencyFileGenerator,
    consumer: &'c mut dyn DependencyConsumer,
    store: Arc<dyn ObjectStore>,
    emit_dependency_file: bool,
    pch: Option<PathBuf>,
    error: Option<CasError>,
}

impl<'c> IncludeTreeCollector<'c> {
    pub fn new(
        generator: DependencyFileGenerator,
        consumer: &'c mut dyn DependencyConsumer,
        store: Arc<dyn ObjectStore>,
        emit_dependency_file: bool,
    ) -> Self {
        Self {
            generator,
            consumer,
            store,
            emit_dependency_file,
            pch: None,
            error: None,
        }
    }

    pub(crate) fn generator_mut(&mut self) -> &mut DependencyFileGenerator {
        &mut self.generator
    }

    pub(crate) fn set_pch(&mut self, pch: &Path) {
        self.pch = Some(pch.to_path_buf());
    }

    pub fn finish(self) -> Result<(), ScanError> {
        if let Some(err) = self.error {
            return Err(err.into());
        }
        if let Some(pch) = &self.pch {
            self.consumer.handle_include_tree_pch(pch);
        }
        if self.emit_dependency_file {
            self.generator.write()?;
        }
        Ok(())
    }
}

impl PreprocessorCallbacks for IncludeTreeCollector<'_> {
    fn file_entered(&mut self, path: &Path, is_system: bool, contents: &Arc<[u8]>) {
        self.generator.file_entered(path, is_system, contents);
        match self.store.store_blob(contents) {
            Ok(id) => self.consumer.entered_include(path, id),
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
    }

    fn file_exited(&mut self, path: &Path) {
        self.consumer.exited_include(path);
    }

    fn file_skipped(&mut self, path: &Path, is_system: bool) {
        self.generator.file_skipped(path, is_system);
    }

    fn has_include(&mut self, path: Option<&Path>, found: bool) {
        self.generator.has_include(path, found);
        self.consumer.handle_has_include_check(found);
    }

    fn module_imported(&mut self, module: &Arc<ModuleInfo>) {
        self.generator.module_imported(module);
    }
}
