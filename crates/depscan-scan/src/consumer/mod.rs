//! Receivers of the dependency events a scan produces.
//!
//! One implementation exists per output shape: a Make rule, the full module
//! graph, a content-addressed tree id, or an include tree.

mod full;
mod make;
mod tree;

use std::path::{Path, PathBuf};

use depscan_core::{CasId, Command, ModuleDeps, ModuleId, ModuleOutputKind, PrebuiltModuleDep, ScanError};

use crate::invocation::DependencyOutputOptions;

pub use full::FullDependencyConsumer;
pub use make::MakeDependencyPrinterConsumer;
pub(crate) use make::render_make_rule;
pub use tree::{IncludeTreeConsumer, TreeConsumer};

/// Maps a module and output kind to the path the build system wants.
pub type LookupModuleOutput = dyn Fn(&ModuleId, ModuleOutputKind) -> String + Send + Sync;

/// Receives the results of one scan request.
pub trait DependencyConsumer {
    /// A command the translation unit needs, in execution order.
    fn handle_build_command(&mut self, command: Command);

    /// The dependency-file options of the scanned invocation.
    fn handle_dependency_output_opts(&mut self, _opts: &DependencyOutputOptions) {}

    /// An absolute, canonical file the translation unit depends on.
    fn handle_file_dependency(&mut self, path: &Path);

    fn handle_prebuilt_module_dependency(&mut self, dep: PrebuiltModuleDep);

    /// A module reached from the translation unit. Dependencies are reported
    /// before their dependents.
    fn handle_module_dependency(&mut self, deps: ModuleDeps);

    /// The translation unit declares a C++ named module.
    fn handle_named_module(&mut self, _name: &str) {}

    fn handle_context_hash(&mut self, hash: String);

    /// Root of the tree of every file the scan read.
    fn handle_cas_file_system_root_id(&mut self, _id: CasId) {}

    /// Path for an output of a module build.
    fn lookup_module_output(&self, id: &ModuleId, kind: ModuleOutputKind) -> String;

    /// Called once preprocessing completed successfully.
    fn finalize(&mut self) -> Result<(), ScanError> {
        Ok(())
    }

    /// Precompiled header the include tree builds on.
    fn handle_include_tree_pch(&mut self, _pch: &Path) {}

    /// A file was entered while building an include tree.
    fn entered_include(&mut self, _path: &Path, _contents: CasId) {}

    fn exited_include(&mut self, _path: &Path) {}

    /// Result of a `__has_include` probe in the current file.
    fn handle_has_include_check(&mut self, _found: bool) {}
}

/// Default layout for module outputs: `<dir>/<hash>/<name>-<hash>.pcm`.
pub fn default_module_output(dir: &Path, id: &ModuleId, kind: ModuleOutputKind) -> String {
    let pcm: PathBuf = dir
        .join(id.context_hash.as_str())
        .join(format!("{}-{}.pcm", id.module_name, id.context_hash));
    let pcm = pcm.to_string_lossy().into_owned();
    match kind {
        ModuleOutputKind::ModuleFile | ModuleOutputKind::DependencyTargets => pcm,
        ModuleOutputKind::DependencyFile => format!("{pcm}.d"),
        ModuleOutputKind::DiagnosticSerializationFile => format!("{pcm}.diag"),
    }
}
