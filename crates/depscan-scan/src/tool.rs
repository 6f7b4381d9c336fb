//! Entry points returning one result per scan.

use std::path::Path;
use std::sync::Arc;

use depscan_core::{
    AlreadySeen, CasId, FullDependenciesResult, IncludeTreeRoot, ScanError, ScanningOutputFormat,
};
use depscan_fs::{FileSystem, RemapPath};

use crate::consumer::{
    FullDependencyConsumer, IncludeTreeConsumer, LookupModuleOutput, MakeDependencyPrinterConsumer,
    TreeConsumer,
};
use crate::invocation::CompilerInvocation;
use crate::service::DependencyScanningService;
use crate::worker::DependencyScanningWorker;

/// Wraps a worker and collects each scan into a single value.
///
/// Every method requires the service to have been configured with the
/// matching output format.
#[derive(Debug)]
pub struct DependencyScanningTool {
    worker: DependencyScanningWorker,
}

impl DependencyScanningTool {
    pub fn new(service: &DependencyScanningService) -> Self {
        Self {
            worker: service.create_worker(),
        }
    }

    /// A tool reading `base` instead of the real filesystem.
    pub fn with_file_system(service: &DependencyScanningService, base: Arc<dyn FileSystem>) -> Self {
        Self {
            worker: service.create_worker_with_file_system(base),
        }
    }

    pub fn worker_mut(&mut self) -> &mut DependencyScanningWorker {
        &mut self.worker
    }

    fn require(&self, operation: &str, formats: &[ScanningOutputFormat]) -> Result<(), ScanError> {
        let format = self.worker.format();
        if formats.contains(&format) {
            return Ok(());
        }
        Err(ScanError::InvalidConfig {
            message: format!("{operation} needs output format {formats:?}, service uses {format:?}"),
        })
    }

    /// Make-style dependency rule for `command_line`.
    pub fn get_dependency_file(&mut self, command_line: &[String], cwd: &Path) -> Result<String, ScanError> {
        self.require("get_dependency_file", &[ScanningOutputFormat::Make])?;
        let mut consumer = MakeDependencyPrinterConsumer::new();
        self.worker.compute_dependencies(cwd, command_line, &mut consumer, None)?;
        consumer.print_dependencies()
    }

    /// Root of the tree of every file `command_line` read.
    pub fn get_dependency_tree(&mut self, command_line: &[String], cwd: &Path) -> Result<CasId, ScanError> {
        self.require("get_dependency_tree", &[ScanningOutputFormat::Tree])?;
        let mut consumer = TreeConsumer::new();
        self.worker.compute_dependencies(cwd, command_line, &mut consumer, None)?;
        consumer.take_root_id()
    }

    /// Like [`get_dependency_tree`] for a parsed front-end invocation.
    /// `remap` rewrites the paths recorded in the tree.
    ///
    /// [`get_dependency_tree`]: DependencyScanningTool::get_dependency_tree
    pub fn get_dependency_tree_from_compiler_invocation(
        &mut self,
        invocation: CompilerInvocation,
        cwd: &Path,
        remap: Option<Arc<RemapPath>>,
    ) -> Result<CasId, ScanError> {
        self.require("get_dependency_tree_from_compiler_invocation", &[ScanningOutputFormat::Tree])?;
        let mut consumer = TreeConsumer::new();
        self.worker
            .compute_dependencies_from_invocation(invocation, cwd, &mut consumer, remap)?;
        consumer.take_root_id()
    }

    /// Include structure of `command_line`, committed to the object store.
    pub fn get_include_tree(&mut self, command_line: &[String], cwd: &Path) -> Result<IncludeTreeRoot, ScanError> {
        self.require("get_include_tree", &[ScanningOutputFormat::IncludeTree])?;
        let mut consumer = self.include_tree_consumer()?;
        self.worker.compute_dependencies(cwd, command_line, &mut consumer, None)?;
        consumer.take_include_tree()
    }

    pub fn get_include_tree_from_compiler_invocation(
        &mut self,
        invocation: CompilerInvocation,
        cwd: &Path,
        remap: Option<Arc<RemapPath>>,
    ) -> Result<IncludeTreeRoot, ScanError> {
        self.require("get_include_tree_from_compiler_invocation", &[ScanningOutputFormat::IncludeTree])?;
        let mut consumer = self.include_tree_consumer()?;
        self.worker
            .compute_dependencies_from_invocation(invocation, cwd, &mut consumer, remap)?;
        consumer.take_include_tree()
    }

    fn include_tree_consumer(&self) -> Result<IncludeTreeConsumer, ScanError> {
        let store = self.worker.store().ok_or_else(|| ScanError::InvalidConfig {
            message: "include trees require an object store".to_string(),
        })?;
        Ok(IncludeTreeConsumer::new(store.clone()))
    }

    /// Full dependencies of `command_line`.
    ///
    /// Modules already in `already_seen` are left out of the discovered
    /// modules; newly discovered ones are added to it. Nothing is added
    /// when the scan fails.
    pub fn get_full_dependencies(
        &mut self,
        command_line: &[String],
        cwd: &Path,
        already_seen: &mut AlreadySeen,
        lookup_module_output: &LookupModuleOutput,
        module_name: Option<&str>,
    ) -> Result<FullDependenciesResult, ScanError> {
        self.require_full("get_full_dependencies")?;
        let mut consumer = FullDependencyConsumer::new(lookup_module_output, self.worker.eager_load_modules());
        self.worker
            .compute_dependencies(cwd, command_line, &mut consumer, module_name)?;
        Ok(consumer.take_full_dependencies(already_seen))
    }

    /// Full dependencies with the original driver command line rewritten
    /// to load modules explicitly, instead of per-job commands.
    pub fn get_full_dependencies_legacy_driver_command(
        &mut self,
        command_line: &[String],
        cwd: &Path,
        already_seen: &mut AlreadySeen,
        lookup_module_output: &LookupModuleOutput,
        module_name: Option<&str>,
    ) -> Result<FullDependenciesResult, ScanError> {
        self.require_full("get_full_dependencies_legacy_driver_command")?;
        let mut consumer = FullDependencyConsumer::new(lookup_module_output, self.worker.eager_load_modules());
        self.worker
            .compute_dependencies(cwd, command_line, &mut consumer, module_name)?;
        Ok(consumer.take_full_dependencies_legacy_driver_command(command_line, already_seen))
    }

    fn require_full(&self, operation: &str) -> Result<(), ScanError> {
        self.require(operation, &[ScanningOutputFormat::Full, ScanningOutputFormat::FullTree])
    }
}
