//! Dependency scanning for C-family translation units.
//!
//! This crate answers, for a single compile command, which files, prebuilt
//! modules and module builds the translation unit needs, without compiling
//! it.
//!
//! # Overview
//!
//! - A [`DependencyScanningService`] holds the build-wide configuration and
//!   caches.
//! - Each thread creates a [`DependencyScanningWorker`] from it. The worker
//!   splits a command line into driver jobs, scans the first compiler job
//!   with a [`ScanningAction`] and reports everything to a
//!   [`DependencyConsumer`].
//! - [`DependencyScanningTool`] wraps a worker and returns one value per
//!   scan: a Make rule, a content-addressed tree id, an include tree or
//!   [`FullDependenciesResult`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use depscan_scan::{
//!     AlreadySeen, DependencyScanningService, DependencyScanningTool, ModuleId, ModuleOutputKind,
//!     ScanningOutputFormat, ServiceConfig, default_module_output,
//! };
//!
//! let service = DependencyScanningService::new(ServiceConfig::new(ScanningOutputFormat::Full))?;
//! let mut tool = DependencyScanningTool::new(&service);
//! let lookup = |id: &ModuleId, kind: ModuleOutputKind| default_module_output(Path::new("/tmp/modules"), id, kind);
//! let mut seen = AlreadySeen::new();
//!
//! let args: Vec<String> = ["clang", "-c", "main.c", "-o", "main.o"].iter().map(|s| s.to_string()).collect();
//! let result = tool.get_full_dependencies(&args, Path::new("/src"), &mut seen, &lookup, None)?;
//! println!("{} files, {} new modules", result.full_deps.file_deps.len(), result.discovered_modules.len());
//! # Ok::<(), depscan_scan::ScanError>(())
//! ```

mod action;
mod collector;
mod consumer;
mod diagnostics;
mod driver;
pub mod frontend;
mod invocation;
mod prebuilt;
mod service;
mod tool;
mod worker;

pub use action::{ScanningAction, ScanningActionBuilder};
pub use collector::{
    CollectorOptions, DependencyCollector, DependencyConsumerForwarder, DependencyFileGenerator,
    DiscoveredDependencies, IncludeTreeCollector, ModuleDepCollector, PLACEHOLDER_TARGET, ScanContext,
    deduce_dep_target,
};
pub use consumer::{
    DependencyConsumer, FullDependencyConsumer, IncludeTreeConsumer, LookupModuleOutput,
    MakeDependencyPrinterConsumer, TreeConsumer, default_module_output,
};
pub use diagnostics::{Diagnostic, DiagnosticsEngine, Location, Severity};
pub use driver::{COMPILER_CREATOR, Driver, DriverJob, GenericDriver, JobKind};
pub use invocation::{
    CompilerInvocation, DependencyOutputOptions, DiagnosticOptions, FrontendAction, HeaderSearchOptions,
    MacroOp, ModuleFileArg, ModuleOptions, PreprocessorOptions,
};
pub use prebuilt::{
    ControlBlock, ImportedModule, InputFile, JsonModuleFileReader, ModuleFileReader, PrebuiltModuleFiles,
    visit_prebuilt_module,
};
pub use service::DependencyScanningService;
pub use tool::DependencyScanningTool;
pub use worker::DependencyScanningWorker;

// Re-export core types for convenience
pub use depscan_core::{
    AlreadySeen, CasError, CasId, Command, FullDependencies, FullDependenciesResult, IncludeTree,
    IncludeTreeRoot, ModuleDeps, ModuleId, ModuleOutputKind, PrebuiltModuleDep, ScanError, ScanningMode,
    ScanningOutputFormat, ServiceConfig,
};
