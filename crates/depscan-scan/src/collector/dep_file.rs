use std::path::{Path, PathBuf};
use std::sync::Arc;

use depscan_core::ScanError;
use depscan_fs::canonicalize;
use indexmap::IndexSet;
use tracing::debug;

use crate::consumer::{DependencyConsumer, render_make_rule};
use crate::frontend::{ModuleInfo, PreprocessorCallbacks};
use crate::invocation::DependencyOutputOptions;

/// Records the files a translation unit depends on, in first-seen order.
#[derive(Debug)]
pub struct DependencyFileGenerator {
    opts: DependencyOutputOptions,
    working_directory: PathBuf,
    dependencies: IndexSet<PathBuf>,
    after_main_file: Vec<PathBuf>,
    seen_main_file: bool,
}

impl DependencyFileGenerator {
    pub fn new(opts: DependencyOutputOptions, working_directory: PathBuf) -> Self {
        Self {
            opts,
            working_directory,
            dependencies: IndexSet::new(),
            after_main_file: Vec::new(),
            seen_main_file: false,
        }
    }

    pub fn opts(&self) -> &DependencyOutputOptions {
        &self.opts
    }

    /// Record a dependency, canonicalised against the working directory.
    pub fn add(&mut self, path: &Path) {
        self.dependencies.insert(canonicalize(&self.working_directory, path));
        if !self.seen_main_file {
            self.seen_main_file = true;
            for path in std::mem::take(&mut self.after_main_file) {
                self.dependencies.insert(canonicalize(&self.working_directory, &path));
            }
        }
    }

    /// Record a dependency that must follow the main file.
    pub fn add_after_main_file(&mut self, path: PathBuf) {
        if self.seen_main_file {
            self.add(&path);
        } else {
            self.after_main_file.push(path);
        }
    }

    /// Record the map file and headers of an imported module.
    pub fn add_module(&mut self, module: &ModuleInfo) {
        self.add(&module.map_file);
        for header in module.modular_headers() {
            self.add(header);
        }
    }

    /// Every recorded dependency, including any still waiting for the main
    /// file.
    pub fn dependencies(&self) -> Vec<PathBuf> {
        let mut deps: Vec<PathBuf> = self.dependencies.iter().cloned().collect();
        for path in &self.after_main_file {
            let path = canonicalize(&self.working_directory, path);
            if !deps.contains(&path) {
                deps.push(path);
            }
        }
        deps
    }

    /// Write the dependency file named by the options, if any.
    pub fn write(&self) -> Result<(), ScanError> {
        let Some(file) = &self.opts.output_file else {
            return Ok(());
        };
        let path = canonicalize(&self.working_directory, file);
        let rule = render_make_rule(&self.opts.targets, &self.dependencies(), self.opts.phony_targets);
        std::fs::write(&path, rule).map_err(|e| ScanError::io(&path, e))?;
        debug!(path = %path.display(), "Wrote dependency file");
        Ok(())
    }
}

/// Hands every file dependency straight to the consumer.
pub struct DependencyConsumerForwarder<'c> {
    generator: DependencyFileGenerator,
    consumer: &'c mut dyn DependencyConsumer,
    emit_dependency_file: bool,
}

impl<'c> DependencyConsumerForwarder<'c> {
    pub fn new(
        generator: DependencyFileGenerator,
        consumer: &'c mut dyn DependencyConsumer,
        emit_dependency_file: bool,
    ) -> Self {
        Self {
            generator,
            consumer,
            emit_dependency_file,
        }
    }

    pub(crate) fn generator_mut(&mut self) -> &mut DependencyFileGenerator {
        &mut self.generator
    }

    pub fn finish(self) -> Result<(), ScanError> {
        self.consumer.handle_dependency_output_opts(self.generator.opts());
        for dep in self.generator.dependencies() {
            self.consumer.handle_file_dependency(&dep);
        }
        if self.emit_dependency_file {
            self.generator.write()?;
        }
        Ok(())
    }
}

impl PreprocessorCallbacks for DependencyFileGenerator {
    fn file_entered(&mut self, path: &Path, _is_system: bool, _contents: &Arc<[u8]>) {
        self.add(path);
    }

    fn file_skipped(&mut self, path: &Path, _is_system: bool) {
        self.add(path);
    }

    fn has_include(&mut self, path: Option<&Path>, found: bool) {
        if let (Some(path), true) = (path, found) {
            self.add(path);
        }
    }

    fn module_imported(&mut self, module: &Arc<ModuleInfo>) {
        self.add_module(module);
    }
}

impl PreprocessorCallbacks for DependencyConsumerForwarder<'_> {
    fn file_entered(&mut self, path: &Path, is_system: bool, contents: &Arc<[u8]>) {
        self.generator.file_entered(path, is_system, contents);
    }

    fn file_skipped(&mut self, path: &Path, is_system: bool) {
        self.generator.file_skipped(path, is_system);
    }

    fn has_include(&mut self, path: Option<&Path>, found: bool) {
        self.generator.has_include(path, found);
    }

    fn module_imported(&mut self, module: &Arc<ModuleInfo>) {
        self.generator.module_imported(module);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::MakeDependencyPrinterConsumer;

    #[test]
    fn test_generator_orders_pch_after_main_file() {
        let mut generator = DependencyFileGenerator::new(DependencyOutputOptions::default(), PathBuf::from("/src"));
        generator.add_after_main_file(PathBuf::from("pre.pch"));
        generator.add_after_main_file(PathBuf::from("/inc/pre.h"));
        assert_eq!(generator.dependencies().len(), 2);

        generator.add(Path::new("a.c"));
        generator.add(Path::new("./sub/../b.h"));
        generator.add(Path::new("/src/a.c"));
        assert_eq!(
            generator.dependencies(),
            vec![
                PathBuf::from("/src/a.c"),
                PathBuf::from("/src/pre.pch"),
                PathBuf::from("/inc/pre.h"),
                PathBuf::from("/src/b.h"),
            ]
        );
    }

    #[test]
    fn test_forwarder_writes_dependency_file() {
        let dir = tempfile::tempdir().unwrap();
        let opts = DependencyOutputOptions {
            output_file: Some(PathBuf::from("a.d")),
            targets: vec!["a.o".to_string()],
            ..DependencyOutputOptions::default()
        };
        let generator = DependencyFileGenerator::new(opts, dir.path().to_path_buf());
        let mut consumer = MakeDependencyPrinterConsumer::new();
        let mut forwarder = DependencyConsumerForwarder::new(generator, &mut consumer, true);
        let contents: Arc<[u8]> = Arc::from(&b""[..]);
        forwarder.file_entered(Path::new("a.c"), false, &contents);
        forwarder.has_include(None, false);
        forwarder.finish().unwrap();

        let expected = format!("a.o: {}\n", dir.path().join("a.c").display());
        assert_eq!(consumer.print_dependencies().unwrap(), expected);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.d")).unwrap(), expected);
    }
}
