//! Collectors turn preprocessor events into consumer calls.
//!
//! The output format picks the collector:
//!
//! - [`DependencyConsumerForwarder`] - file dependencies for `Make` and `Tree`
//! - [`IncludeTreeCollector`] - include structure for `IncludeTree`
//! - [`ModuleDepCollector`] - the module graph for `Full` and `FullTree`

mod dep_file;
mod include_tree;
mod module_deps;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use depscan_core::{ScanError, ScanningOutputFormat};
use depscan_fs::{ObjectStore, ScanFilesystem};

use crate::consumer::DependencyConsumer;
use crate::diagnostics::DiagnosticsEngine;
use crate::frontend::{ModuleMapRegistry, PreprocessorCallbacks};
use crate::invocation::{CompilerInvocation, DependencyOutputOptions, ModuleFileArg};
use crate::prebuilt::PrebuiltModuleFiles;

pub use dep_file::{DependencyConsumerForwarder, DependencyFileGenerator};
pub use include_tree::IncludeTreeCollector;
pub use module_deps::ModuleDepCollector;

/// Make target used when neither `-MT` nor an output file names one.
pub const PLACEHOLDER_TARGET: &str = "depscan dependency";

/// The target a dependency file describes when none was given.
pub fn deduce_dep_target(output_file: Option<&str>, inputs: &[PathBuf]) -> String {
    match output_file {
        Some(out) if out != "-" => out.to_string(),
        _ => inputs
            .first()
            .and_then(|input| input.file_name())
            .map(|name| Path::new(name).with_extension("o").to_string_lossy().into_owned())
            .unwrap_or_else(|| PLACEHOLDER_TARGET.to_string()),
    }
}

/// Options every collector shares.
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub working_directory: PathBuf,
    /// Write the dependency file named by the invocation to disk.
    pub emit_dependency_file: bool,
    pub optimize_args: bool,
    pub eager_load_modules: bool,
}

/// What the scan left behind once the main file was preprocessed.
pub struct ScanContext<'a> {
    pub invocation: &'a CompilerInvocation,
    pub fs: &'a mut dyn ScanFilesystem,
    pub diags: &'a mut DiagnosticsEngine,
    pub module_maps: &'a mut ModuleMapRegistry,
    pub prebuilt: &'a PrebuiltModuleFiles,
}

/// Module flags that replace implicit module builds in later compiler
/// invocations of the same command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredDependencies {
    pub module_files: Vec<ModuleFileArg>,
    pub module_map_files: Vec<PathBuf>,
}

impl DiscoveredDependencies {
    pub fn apply(&self, invocation: &mut CompilerInvocation) {
        let modules = &mut invocation.modules;
        modules.implicit_modules = false;
        modules.implicit_module_maps = false;
        modules.cache_path = None;
        for map in &self.module_map_files {
            if !modules.module_map_files.contains(map) {
                modules.module_map_files.push(map.clone());
            }
        }
        for file in &self.module_files {
            if !modules.module_files.contains(file) {
                modules.module_files.push(file.clone());
            }
        }
    }
}

/// The collector attached to one scan.
pub enum DependencyCollector<'c> {
    Forwarder(DependencyConsumerForwarder<'c>),
    IncludeTree(IncludeTreeCollector<'c>),
    ModuleDeps(ModuleDepCollector<'c>),
}

impl<'c> DependencyCollector<'c> {
    pub fn new(
        format: ScanningOutputFormat,
        dependency_output: DependencyOutputOptions,
        options: CollectorOptions,
        consumer: &'c mut dyn DependencyConsumer,
        store: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self, ScanError> {
        let generator = DependencyFileGenerator::new(dependency_output, options.working_directory.clone());
        Ok(match format {
            ScanningOutputFormat::Make | ScanningOutputFormat::Tree => Self::Forwarder(
                DependencyConsumerForwarder::new(generator, consumer, options.emit_dependency_file),
            ),
            ScanningOutputFormat::IncludeTree => {
                let store = store.ok_or_else(|| ScanError::InvalidConfig {
                    message: "include trees require an object store".to_string(),
                })?;
                Self::IncludeTree(IncludeTreeCollector::new(
                    generator,
                    consumer,
                    store,
                    options.emit_dependency_file,
                ))
            }
            ScanningOutputFormat::Full | ScanningOutputFormat::FullTree => {
                Self::ModuleDeps(ModuleDepCollector::new(generator, consumer, options))
            }
        })
    }

    /// Callbacks to hand to the preprocessor.
    pub fn callbacks(&mut self) -> &mut dyn PreprocessorCallbacks {
        match self {
            Self::Forwarder(c) => c,
            Self::IncludeTree(c) => c,
            Self::ModuleDeps(c) => c,
        }
    }

    /// Record the precompiled header and its inputs as dependencies.
    pub fn add_pch_dependencies(&mut self, pch: &Path, inputs: impl IntoIterator<Item = PathBuf>) {
        let generator = match self {
            Self::Forwarder(c) => c.generator_mut(),
            Self::IncludeTree(c) => {
                c.set_pch(pch);
                c.generator_mut()
            }
            Self::ModuleDeps(c) => c.generator_mut(),
        };
        generator.add_after_main_file(pch.to_path_buf());
        for input in inputs {
            generator.add_after_main_file(input);
        }
    }

    /// Hand everything collected to the consumer.
    pub fn finish(self, ctx: ScanContext<'_>) -> Result<Option<DiscoveredDependencies>, ScanError> {
        match self {
            Self::Forwarder(c) => c.finish().map(|()| None),
            Self::IncludeTree(c) => c.finish().map(|()| None),
            Self::ModuleDeps(c) => c.finish(ctx).map(Some),
        }
    }
}
