//! Module identity and per-module dependency records.

use std::fmt;
use std::path::PathBuf;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Identity of one module-build node.
///
/// The same module name built under two different contexts yields two
/// distinct ids; modules are never deduplicated by name alone.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ModuleId {
    /// Name of the module. Empty when a translation unit is not a module.
    pub module_name: CompactString,
    /// Digest of the compiler configuration the module is built under.
    pub context_hash: CompactString,
}

impl ModuleId {
    /// Create a new module id.
    pub fn new(module_name: impl Into<CompactString>, context_hash: impl Into<CompactString>) -> Self {
        Self {
            module_name: module_name.into(),
            context_hash: context_hash.into(),
        }
    }

    /// Whether the id names an actual module.
    pub fn is_named(&self) -> bool {
        !self.module_name.is_empty()
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module_name, self.context_hash)
    }
}

/// Kind of output a module build produces, used to ask the caller for paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleOutputKind {
    /// The module file itself (`-o`).
    ModuleFile,
    /// The dependency file written while building the module.
    DependencyFile,
    /// Make targets for that dependency file.
    DependencyTargets,
    /// Serialized diagnostics file.
    DiagnosticSerializationFile,
}

/// An already-built module that is trusted as-is and never scanned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrebuiltModuleDep {
    /// Name of the module.
    pub module_name: String,
    /// Path to its module file.
    pub pcm_file: PathBuf,
}

impl PrebuiltModuleDep {
    /// Create a prebuilt module dependency.
    pub fn new(module_name: impl Into<String>, pcm_file: impl Into<PathBuf>) -> Self {
        Self {
            module_name: module_name.into(),
            pcm_file: pcm_file.into(),
        }
    }
}

/// One sub-invocation: an executable and its arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Executable to run.
    pub executable: String,
    /// Arguments, not including the executable.
    pub arguments: Vec<String>,
}

impl Command {
    /// Create a new command.
    pub fn new(executable: impl Into<String>, arguments: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            arguments,
        }
    }

    /// Executable followed by its arguments.
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.arguments.len() + 1);
        argv.push(self.executable.clone());
        argv.extend(self.arguments.iter().cloned());
        argv
    }
}

/// A discovered module-build node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDeps {
    /// Identity of the module.
    pub id: ModuleId,

    /// Module map file that defines the module.
    pub clang_module_map_file: PathBuf,

    /// Absolute, canonical paths of every file the module directly depends on.
    pub file_deps: Vec<PathBuf>,

    /// Modules this module directly imports.
    pub clang_module_deps: Vec<ModuleId>,

    /// Prebuilt modules this module directly imports.
    pub prebuilt_module_deps: Vec<PrebuiltModuleDep>,

    /// Command that builds the module.
    pub build_command: Command,

    /// Whether the scanned translation unit imports this module directly.
    pub imported_by_main_file: bool,
}
