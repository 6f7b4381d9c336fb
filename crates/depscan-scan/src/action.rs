//! Running the front end over one compiler invocation.

use std::path::PathBuf;
use std::sync::Arc;

use depscan_core::{ScanError, ScanningOutputFormat};
use depscan_fs::{ObjectStore, RemapPath, ScanFilesystem};
use derive_builder::Builder;
use indexmap::IndexSet;
use tracing::{debug, trace};

use crate::collector::{
    CollectorOptions, DependencyCollector, DiscoveredDependencies, ScanContext, deduce_dep_target,
};
use crate::consumer::DependencyConsumer;
use crate::diagnostics::DiagnosticsEngine;
use crate::frontend::{ModuleMapRegistry, Preprocessor, PreprocessorCallbacks};
use crate::invocation::CompilerInvocation;
use crate::prebuilt::{JsonModuleFileReader, ModuleFileReader, PrebuiltModuleFiles, visit_prebuilt_module};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ActionState {
    #[default]
    Unscanned,
    /// The first compiler invocation was scanned; later ones only have
    /// their arguments rewritten.
    Scanned,
}

/// Scans the first compiler invocation of a command line.
///
/// ```rust,ignore
/// let mut action = ScanningAction::builder()
///     .working_directory("/src")
///     .format(ScanningOutputFormat::Full)
///     .build()?;
/// action.run_invocation(invocation, &mut fs, &mut consumer, &mut diags)?;
/// let cc1 = action.take_last_cc1_arguments();
/// ```
#[derive(Builder)]
#[builder(pattern = "owned", setter(into))]
pub struct ScanningAction {
    working_directory: PathBuf,

    #[builder(default)]
    format: ScanningOutputFormat,

    #[builder(default = "false")]
    optimize_args: bool,

    #[builder(default = "false")]
    eager_load_modules: bool,

    /// Write the invocation's `-dependency-file` to disk.
    #[builder(default = "false")]
    emit_dependency_file: bool,

    /// Import this module instead of preprocessing the main file's contents.
    #[builder(default, setter(strip_option))]
    module_name: Option<String>,

    #[builder(default = "Arc::new(JsonModuleFileReader) as Arc<dyn ModuleFileReader>")]
    module_file_reader: Arc<dyn ModuleFileReader>,

    #[builder(default, setter(strip_option))]
    remap_path: Option<Arc<RemapPath>>,

    /// Store include trees are committed to.
    #[builder(default, setter(strip_option))]
    store: Option<Arc<dyn ObjectStore>>,

    #[builder(setter(skip))]
    state: ActionState,

    #[builder(setter(skip))]
    discovered: Option<DiscoveredDependencies>,

    #[builder(setter(skip))]
    last_cc1_arguments: Vec<String>,
}

impl ScanningAction {
    pub fn builder() -> ScanningActionBuilder {
        ScanningActionBuilder::default()
    }

    pub fn has_scanned(&self) -> bool {
        self.state == ActionState::Scanned
    }

    /// The `-cc1` arguments of the most recent invocation, with discovered
    /// module dependencies applied. Leaves the stored list empty.
    pub fn take_last_cc1_arguments(&mut self) -> Vec<String> {
        std::mem::take(&mut self.last_cc1_arguments)
    }

    fn set_last_cc1_arguments(&mut self, mut invocation: CompilerInvocation) {
        if let Some(discovered) = &self.discovered {
            discovered.apply(&mut invocation);
        }
        self.last_cc1_arguments = invocation.to_args();
    }

    /// Scan `invocation`, or, once a scan happened, only record its
    /// arguments.
    ///
    /// The consumer is finalised whether or not preprocessing succeeded.
    /// When `fs` tracks accesses, the accessed files are committed as a tree
    /// and its id reported; a failed commit fails the scan.
    pub fn run_invocation(
        &mut self,
        invocation: CompilerInvocation,
        fs: &mut dyn ScanFilesystem,
        consumer: &mut dyn DependencyConsumer,
        diags: &mut DiagnosticsEngine,
    ) -> Result<(), ScanError> {
        if self.has_scanned() {
            trace!(executable = %invocation.executable, "Reusing scan for dependent invocation");
            self.set_last_cc1_arguments(invocation);
            return Ok(());
        }

        let tracking = fs.track_new_accesses();
        fs.set_working_directory(&self.working_directory);
        self.state = ActionState::Scanned;
        diags.set_ignore_warnings(invocation.diagnostics.ignore_warnings);

        let original = invocation.clone();
        let mut invocation = invocation;
        debug!(
            input = ?invocation.main_input(),
            format = ?self.format,
            module = ?self.module_name,
            "Scanning translation unit"
        );

        let mut prebuilt = PrebuiltModuleFiles::new();
        for file in &invocation.modules.module_files {
            if let Some(name) = &file.name {
                prebuilt.insert(name.clone(), fs.absolute(&file.path));
            }
        }
        let pch = invocation.preprocessor.implicit_pch.as_ref().map(|p| fs.absolute(p));
        let mut pch_inputs = IndexSet::new();
        if let Some(pch) = &pch {
            visit_prebuilt_module(pch, fs, self.module_file_reader.as_ref(), &mut prebuilt, &mut pch_inputs, true)?;
        }

        let mut dependency_output = std::mem::take(&mut invocation.dependency_output);
        if dependency_output.targets.is_empty() {
            dependency_output.targets = vec![deduce_dep_target(invocation.output_file.as_deref(), &invocation.inputs)];
        }
        dependency_output.include_system_headers = true;

        let options = CollectorOptions {
            working_directory: self.working_directory.clone(),
            emit_dependency_file: self.emit_dependency_file,
            optimize_args: self.optimize_args,
            eager_load_modules: self.eager_load_modules,
        };
        let mut collector = DependencyCollector::new(self.format, dependency_output, options, consumer, self.store.clone())?;
        if let Some(pch) = &pch {
            collector.add_pch_dependencies(pch, pch_inputs);
        }

        let mut module_maps = ModuleMapRegistry::new();
        let preprocessed = {
            let mut pp = Preprocessor::new(&invocation, fs, diags, &mut module_maps, &prebuilt);
            self.execute(&mut pp, &invocation, collector.callbacks())
        };

        let finished = if preprocessed.is_ok() && !diags.has_errors() {
            collector.finish(ScanContext {
                invocation: &invocation,
                fs: &mut *fs,
                diags: &mut *diags,
                module_maps: &mut module_maps,
                prebuilt: &prebuilt,
            })
        } else {
            drop(collector);
            preprocessed.map(|()| None)
        };

        let finalized = consumer.finalize();
        if !fs.caches_directives() {
            fs.clear_stat_cache();
        }
        if tracking {
            if let Some(tree) = fs.create_tree_from_new_accesses(self.remap_path.as_deref()) {
                consumer.handle_cas_file_system_root_id(tree?);
            }
        }

        self.discovered = finished?;
        diags.check()?;
        finalized?;
        self.set_last_cc1_arguments(original);
        Ok(())
    }

    fn execute(
        &self,
        pp: &mut Preprocessor<'_>,
        invocation: &CompilerInvocation,
        callbacks: &mut dyn PreprocessorCallbacks,
    ) -> Result<(), ScanError> {
        let main = invocation
            .main_input()
            .ok_or_else(|| ScanError::diagnostics("error: no input files\n"))?
            .to_path_buf();
        pp.run_main_file(&main, callbacks)?;
        if let Some(name) = &self.module_name {
            pp.import_module_by_name(name, callbacks)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{FullDependencyConsumer, LookupModuleOutput, MakeDependencyPrinterConsumer, default_module_output};
    use depscan_core::{AlreadySeen, ModuleId, ModuleOutputKind};
    use depscan_fs::{InMemoryFileSystem, SharedFileSystemCache, WorkerFilesystem};
    use std::path::Path;

    fn fs(files: &[(&str, &str)]) -> WorkerFilesystem {
        let memory = Arc::new(InMemoryFileSystem::new());
        for (path, contents) in files {
            memory.add_file(path, *contents);
        }
        WorkerFilesystem::new(Arc::new(SharedFileSystemCache::new()), memory)
    }

    fn cc1(list: &[&str]) -> CompilerInvocation {
        let args: Vec<String> = list.iter().map(|s| s.to_string()).collect();
        CompilerInvocation::parse("clang", &args).unwrap()
    }

    #[test]
    fn test_make_scan_then_reuse() {
        let mut fs = fs(&[("/src/a.c", "#include \"a.h\"\n"), ("/src/a.h", "")]);
        let mut action = ScanningAction::builder().working_directory("/src").build().unwrap();
        let mut consumer = MakeDependencyPrinterConsumer::new();
        let mut diags = DiagnosticsEngine::new();

        assert!(!action.has_scanned());
        action
            .run_invocation(cc1(&["-cc1", "-emit-obj", "-o", "a.o", "a.c"]), &mut fs, &mut consumer, &mut diags)
            .unwrap();
        assert!(action.has_scanned());
        assert_eq!(consumer.print_dependencies().unwrap(), "a.o: /src/a.c \\\n  /src/a.h\n");
        assert_eq!(action.take_last_cc1_arguments().last().map(String::as_str), Some("a.c"));
        assert!(action.take_last_cc1_arguments().is_empty());

        action
            .run_invocation(cc1(&["-cc1", "-emit-obj", "-o", "b.o", "missing.c"]), &mut fs, &mut consumer, &mut diags)
            .unwrap();
        assert_eq!(action.take_last_cc1_arguments().last().map(String::as_str), Some("missing.c"));
    }

    #[test]
    fn test_missing_include_fails_scan() {
        let mut fs = fs(&[("/src/a.c", "#include \"gone.h\"\n")]);
        let mut action = ScanningAction::builder().working_directory("/src").build().unwrap();
        let mut consumer = MakeDependencyPrinterConsumer::new();
        let mut diags = DiagnosticsEngine::new();
        let err = action
            .run_invocation(cc1(&["-cc1", "a.c"]), &mut fs, &mut consumer, &mut diags)
            .unwrap_err();
        assert!(err.to_string().contains("'gone.h' file not found"));
        assert!(action.take_last_cc1_arguments().is_empty());
    }

    #[test]
    fn test_full_scan_rewrites_arguments() {
        let mut fs = fs(&[
            ("/src/a.m", "@import Foo;\n"),
            ("/inc/module.modulemap", "module Foo { header \"foo.h\" }"),
            ("/inc/foo.h", ""),
        ]);
        let lookup: Box<LookupModuleOutput> =
            Box::new(|id: &ModuleId, kind: ModuleOutputKind| default_module_output(Path::new("/out"), id, kind));
        let mut consumer = FullDependencyConsumer::new(&*lookup, false);
        let mut action = ScanningAction::builder()
            .working_directory("/src")
            .format(ScanningOutputFormat::Full)
            .build()
            .unwrap();
        let mut diags = DiagnosticsEngine::new();
        action
            .run_invocation(
                cc1(&["-cc1", "-fsyntax-only", "-fmodules", "-fimplicit-module-maps", "-I", "/inc", "a.m"]),
                &mut fs,
                &mut consumer,
                &mut diags,
            )
            .unwrap();

        let args = action.take_last_cc1_arguments();
        assert!(args.contains(&"-fno-implicit-modules".to_string()));
        assert!(args.contains(&"-fmodule-map-file=/inc/module.modulemap".to_string()));
        assert!(args.iter().any(|a| a.starts_with("-fmodule-file=Foo=/out/")));

        let result = consumer.take_full_dependencies(&mut AlreadySeen::new());
        assert_eq!(result.discovered_modules.len(), 1);
        assert_eq!(result.full_deps.file_deps, vec![PathBuf::from("/src/a.m")]);
    }
}
