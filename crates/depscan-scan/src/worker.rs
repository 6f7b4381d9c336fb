//! Per-thread scanning worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use depscan_core::{Command, ScanError, ScanningMode, ScanningOutputFormat};
use depscan_fs::{
    FileManager, FileSystem, InMemoryFileSystem, ObjectStore, OverlayFileSystem, RemapPath,
    ScanFilesystem, WorkerFilesystem, canonicalize,
};
use tracing::debug;

use crate::action::{ScanningAction, ScanningActionBuilder};
use crate::consumer::DependencyConsumer;
use crate::diagnostics::DiagnosticsEngine;
use crate::driver::Driver;
use crate::invocation::CompilerInvocation;
use crate::prebuilt::ModuleFileReader;
use crate::service::DependencyScanningService;

/// Scans translation units one at a time.
///
/// Workers are not shared between threads; create one per thread from a
/// [`DependencyScanningService`]. Caches owned by the service are shared
/// by every worker it creates.
#[derive(Debug)]
pub struct DependencyScanningWorker {
    format: ScanningOutputFormat,
    mode: ScanningMode,
    optimize_args: bool,
    eager_load_modules: bool,
    reuse_file_manager: bool,
    /// Base filesystem with the in-memory layer on top.
    overlay: Arc<dyn FileSystem>,
    in_memory: Arc<InMemoryFileSystem>,
    scan_fs: Box<dyn ScanFilesystem + Send>,
    driver: Arc<dyn Driver>,
    module_file_reader: Arc<dyn ModuleFileReader>,
    store: Option<Arc<dyn ObjectStore>>,
}

impl DependencyScanningWorker {
    pub(crate) fn new(service: &DependencyScanningService, base: Arc<dyn FileSystem>) -> Self {
        let config = service.config();
        let in_memory = Arc::new(InMemoryFileSystem::new());
        let mut overlay = OverlayFileSystem::new(base);
        overlay.push_overlay(in_memory.clone());
        let overlay: Arc<dyn FileSystem> = Arc::new(overlay);

        let scan_fs: Box<dyn ScanFilesystem + Send> = match (service.cas_cache(), config.mode) {
            (Some(cas), mode) => Box::new(
                cas.create_proxy_fs(overlay.clone(), mode == ScanningMode::DependencyDirectivesScan),
            ),
            (None, ScanningMode::DependencyDirectivesScan) => {
                Box::new(WorkerFilesystem::new(service.shared_cache().clone(), overlay.clone()))
            }
            (None, ScanningMode::CanonicalPreprocessing) => Box::new(FileManager::new(overlay.clone())),
        };

        Self {
            format: config.format,
            mode: config.mode,
            optimize_args: config.optimize_args,
            eager_load_modules: config.eager_load_modules,
            reuse_file_manager: config.reuse_file_manager,
            overlay,
            in_memory,
            scan_fs,
            driver: service.driver().clone(),
            module_file_reader: service.module_file_reader().clone(),
            store: service.cas_cache().map(|cas| cas.store().clone()),
        }
    }

    pub fn format(&self) -> ScanningOutputFormat {
        self.format
    }

    pub fn eager_load_modules(&self) -> bool {
        self.eager_load_modules
    }

    /// The object store include trees and accessed-file trees go to.
    pub fn store(&self) -> Option<&Arc<dyn ObjectStore>> {
        self.store.as_ref()
    }

    /// Scan `command_line` as run from `working_directory`.
    ///
    /// Every job of the command line is reported to `consumer` as a build
    /// command, in execution order. Only the first compiler job is scanned;
    /// later ones get their arguments rewritten with what it discovered.
    ///
    /// With `module_name`, an empty input file with that name is appended
    /// to the command line and the module is imported from it.
    pub fn compute_dependencies(
        &mut self,
        working_directory: &Path,
        command_line: &[String],
        consumer: &mut dyn DependencyConsumer,
        module_name: Option<&str>,
    ) -> Result<(), ScanError> {
        let mut args = command_line.to_vec();
        let fake_input = module_name.map(|name| {
            let path = canonicalize(working_directory, Path::new(name));
            self.in_memory.add_file(&path, Vec::new());
            args.push(name.to_string());
            path
        });

        let result = self.scan_command_line(working_directory, &args, consumer, module_name);

        if let Some(path) = fake_input {
            self.in_memory.remove_file(&path);
        }
        result
    }

    fn scan_command_line(
        &mut self,
        working_directory: &Path,
        args: &[String],
        consumer: &mut dyn DependencyConsumer,
        module_name: Option<&str>,
    ) -> Result<(), ScanError> {
        self.prepare_file_manager();

        let mut diags = DiagnosticsEngine::new();
        let jobs = self.driver.build_jobs(args, &mut diags)?;
        diags.check()?;
        debug!(cwd = %working_directory.display(), jobs = jobs.len(), "Scanning command line");

        let mut action = self.action(working_directory, self.optimize_args);
        if let Some(name) = module_name {
            action = action.module_name(name);
        }
        let mut action = build_action(action)?;

        for job in jobs {
            if !job.is_compiler_job() {
                consumer.handle_build_command(Command::new(job.executable, job.arguments));
                continue;
            }
            let invocation = CompilerInvocation::parse(job.executable.clone(), &job.arguments)?;
            action.run_invocation(invocation, &mut *self.scan_fs, consumer, &mut diags)?;
            consumer.handle_build_command(Command::new(job.executable, action.take_last_cc1_arguments()));
        }

        if !action.has_scanned() {
            return Err(ScanError::NoCompilerJob {
                command_line: args.join(" "),
            });
        }
        Ok(())
    }

    /// Scan an already parsed front-end invocation.
    ///
    /// A relative `-dependency-file` is made absolute against
    /// `working_directory`, and the file is written when named. `remap`
    /// rewrites the paths recorded in the accessed-file tree.
    pub fn compute_dependencies_from_invocation(
        &mut self,
        mut invocation: CompilerInvocation,
        working_directory: &Path,
        consumer: &mut dyn DependencyConsumer,
        remap: Option<Arc<RemapPath>>,
    ) -> Result<(), ScanError> {
        self.prepare_file_manager();

        let dep_file = &mut invocation.dependency_output.output_file;
        if let Some(file) = dep_file.as_mut() {
            *file = canonicalize(working_directory, file);
        }
        let emit = dep_file.is_some();

        let mut action = self
            .action(working_directory, false)
            .emit_dependency_file(emit);
        if let Some(remap) = remap {
            action = action.remap_path(remap);
        }
        let mut action = build_action(action)?;
        let mut diags = DiagnosticsEngine::new();
        action.run_invocation(invocation, &mut *self.scan_fs, consumer, &mut diags)
    }

    fn action(&self, working_directory: &Path, optimize_args: bool) -> ScanningActionBuilder {
        let builder = ScanningAction::builder()
            .working_directory(PathBuf::from(working_directory))
            .format(self.format)
            .optimize_args(optimize_args)
            .eager_load_modules(self.eager_load_modules)
            .module_file_reader(self.module_file_reader.clone());
        match &self.store {
            Some(store) => builder.store(store.clone()),
            None => builder,
        }
    }

    /// A file manager that is not reused starts every scan empty.
    fn prepare_file_manager(&mut self) {
        if self.mode == ScanningMode::CanonicalPreprocessing && !self.reuse_file_manager && self.store.is_none() {
            self.scan_fs = Box::new(FileManager::new(self.overlay.clone()));
        }
    }
}

fn build_action(builder: ScanningActionBuilder) -> Result<ScanningAction, ScanError> {
    builder.build().map_err(|e| ScanError::InvalidConfig {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::MakeDependencyPrinterConsumer;
    use depscan_core::{ModuleDeps, ModuleId, ModuleOutputKind, PrebuiltModuleDep, ServiceConfig};

    #[derive(Default)]
    struct Recorder {
        commands: Vec<Command>,
        files: Vec<PathBuf>,
    }

    impl DependencyConsumer for Recorder {
        fn handle_build_command(&mut self, command: Command) {
            self.commands.push(command);
        }

        fn handle_file_dependency(&mut self, path: &Path) {
            self.files.push(path.to_path_buf());
        }

        fn handle_prebuilt_module_dependency(&mut self, _dep: PrebuiltModuleDep) {}

        fn handle_module_dependency(&mut self, _deps: ModuleDeps) {}

        fn handle_context_hash(&mut self, _hash: String) {}

        fn lookup_module_output(&self, _id: &ModuleId, _kind: ModuleOutputKind) -> String {
            String::new()
        }
    }

    fn worker(config: ServiceConfig, files: &[(&str, &str)]) -> DependencyScanningWorker {
        let base = Arc::new(InMemoryFileSystem::new());
        for (path, contents) in files {
            base.add_file(path, *contents);
        }
        DependencyScanningService::new(config)
            .unwrap()
            .create_worker_with_file_system(base)
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_jobs_are_reported_in_order() {
        let mut worker = worker(
            ServiceConfig::default(),
            &[("/src/a.c", "#include \"x.h\"\n"), ("/src/b.c", ""), ("/src/x.h", "")],
        );
        let mut consumer = Recorder::default();
        worker
            .compute_dependencies(Path::new("/src"), &args(&["clang", "a.c", "b.c", "-o", "app"]), &mut consumer, None)
            .unwrap();

        assert_eq!(consumer.commands.len(), 3);
        assert_eq!(consumer.commands[0].arguments.last().map(String::as_str), Some("a.c"));
        assert_eq!(consumer.commands[1].arguments.last().map(String::as_str), Some("b.c"));
        assert_eq!(consumer.commands[2].executable, "ld");
        assert_eq!(consumer.files, vec![PathBuf::from("/src/a.c"), PathBuf::from("/src/x.h")]);
    }

    #[test]
    fn test_link_only_command_line_fails() {
        let mut worker = worker(ServiceConfig::default(), &[]);
        let mut consumer = Recorder::default();
        let err = worker
            .compute_dependencies(Path::new("/src"), &args(&["clang", "main.o", "-o", "app"]), &mut consumer, None)
            .unwrap_err();
        assert!(matches!(err, ScanError::NoCompilerJob { .. }));
        assert_eq!(consumer.commands.len(), 1);
    }

    #[test]
    fn test_module_name_input_is_temporary() {
        let mut worker = worker(
            ServiceConfig::default(),
            &[("/inc/module.modulemap", "module Foo { header \"foo.h\" }"), ("/inc/foo.h", "")],
        );
        let mut consumer = MakeDependencyPrinterConsumer::new();
        let cmd = args(&["clang", "-fsyntax-only", "-fmodules", "-I", "/inc", "-x", "objective-c"]);
        worker
            .compute_dependencies(Path::new("/src"), &cmd, &mut consumer, Some("Foo"))
            .unwrap();
        let rule = consumer.print_dependencies().unwrap();
        assert!(rule.starts_with("Foo.o: /src/Foo"));
        assert!(rule.contains("/inc/foo.h"));
        assert!(worker.in_memory.is_empty());
    }

    #[test]
    fn test_invocation_dependency_file_is_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = worker(ServiceConfig::default(), &[("/src/a.c", "")]);
        let inv = CompilerInvocation::parse(
            "clang",
            &args(&["-cc1", "-E", "-dependency-file", "a.d", "-MT", "a.o", "/src/a.c"]),
        )
        .unwrap();
        let mut consumer = MakeDependencyPrinterConsumer::new();
        worker
            .compute_dependencies_from_invocation(inv, dir.path(), &mut consumer, None)
            .unwrap();

        let written = std::fs::read_to_string(dir.path().join("a.d")).unwrap();
        assert_eq!(written, "a.o: /src/a.c\n");
    }
}
