use std::path::{Path, PathBuf};

use depscan_core::{
    AlreadySeen, CasId, Command, FullDependencies, FullDependenciesResult, ModuleDeps, ModuleId,
    ModuleOutputKind, PrebuiltModuleDep,
};
use indexmap::IndexMap;

use super::{DependencyConsumer, LookupModuleOutput};

/// Driver options that only manage an implicit module cache.
const IMPLICIT_MODULE_CACHE_PREFIXES: &[&str] = &[
    "-fmodules-cache-path=",
    "-fmodules-prune-interval=",
    "-fmodules-prune-after=",
    "-fbuild-session-file=",
];

/// Aggregates the module graph of one translation unit.
///
/// Module reports are keyed by [`ModuleId`]; a module reported
/// twice keeps its first position and its last contents.
pub struct FullDependencyConsumer<'a> {
    dependencies: Vec<PathBuf>,
    prebuilt_module_deps: Vec<PrebuiltModuleDep>,
    clang_module_deps: IndexMap<ModuleId, ModuleDeps>,
    commands: Vec<Command>,
    context_hash: String,
    module_name: String,
    cas_file_system_root_id: Option<CasId>,
    lookup_module_output: &'a LookupModuleOutput,
    eager_load_modules: bool,
}

impl std::fmt::Debug for FullDependencyConsumer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FullDependencyConsumer")
            .field("dependencies", &self.dependencies.len())
            .field("modules", &self.clang_module_deps.len())
            .field("commands", &self.commands.len())
            .finish_non_exhaustive()
    }
}

impl<'a> FullDependencyConsumer<'a> {
    pub fn new(lookup_module_output: &'a LookupModuleOutput, eager_load_modules: bool) -> Self {
        Self {
            dependencies: Vec::new(),
            prebuilt_module_deps: Vec::new(),
            clang_module_deps: IndexMap::new(),
            commands: Vec::new(),
            context_hash: String::new(),
            module_name: String::new(),
            cas_file_system_root_id: None,
            lookup_module_output,
            eager_load_modules,
        }
    }

    /// Consume the collected events.
    ///
    /// Modules already in `already_seen` are left out of
    /// `discovered_modules` but still referenced from the translation
    /// unit's `clang_module_deps`; the rest are added to `already_seen`.
    pub fn take_full_dependencies(self, already_seen: &mut AlreadySeen) -> FullDependenciesResult {
        let mut full_deps = FullDependencies {
            id: ModuleId::new(self.module_name, self.context_hash),
            file_deps: self.dependencies,
            prebuilt_module_deps: self.prebuilt_module_deps,
            clang_module_deps: Vec::new(),
            cas_file_system_root_id: self.cas_file_system_root_id,
            commands: self.commands,
            driver_command_line: Vec::new(),
        };

        let mut discovered_modules = Vec::new();
        for deps in self.clang_module_deps.into_values() {
            if deps.imported_by_main_file {
                full_deps.clang_module_deps.push(deps.id.clone());
            }
            if already_seen.insert(deps.id.clone()) {
                discovered_modules.push(deps);
            }
        }

        FullDependenciesResult {
            full_deps,
            discovered_modules,
        }
    }

    /// Like [`take_full_dependencies`], and also rewrite `original` (a
    /// driver command line) to load every discovered module explicitly.
    /// No per-job commands are reported in this form.
    ///
    /// [`take_full_dependencies`]: FullDependencyConsumer::take_full_dependencies
    pub fn take_full_dependencies_legacy_driver_command(
        self,
        original: &[String],
        already_seen: &mut AlreadySeen,
    ) -> FullDependenciesResult {
        let lookup = self.lookup_module_output;
        let eager = self.eager_load_modules;
        let imported: Vec<ModuleDeps> = self
            .clang_module_deps
            .values()
            .filter(|deps| deps.imported_by_main_file)
            .cloned()
            .collect();
        let prebuilt = self.prebuilt_module_deps.clone();

        let mut result = self.take_full_dependencies(already_seen);
        let full = &mut result.full_deps;
        full.commands.clear();

        let mut cmd: Vec<String> = original.iter().skip(1).cloned().collect();
        cmd.retain(|arg| {
            arg != "-fmodules-validate-once-per-build-session"
                && !IMPLICIT_MODULE_CACHE_PREFIXES.iter().any(|p| arg.starts_with(p))
        });
        cmd.push("-fno-implicit-modules".to_string());
        cmd.push("-fno-implicit-module-maps".to_string());
        for dep in &prebuilt {
            cmd.push(format!("-fmodule-file={}", dep.pcm_file.display()));
        }
        for deps in &imported {
            let pcm = lookup(&deps.id, ModuleOutputKind::ModuleFile);
            if eager {
                cmd.push(format!("-fmodule-file={pcm}"));
            } else {
                cmd.push(format!("-fmodule-map-file={}", deps.clang_module_map_file.display()));
                cmd.push(format!("-fmodule-file={}={pcm}", deps.id.module_name));
            }
        }
        full.driver_command_line = cmd;
        result
    }
}

impl DependencyConsumer for FullDependencyConsumer<'_> {
    fn handle_build_command(&mut self, command: Command) {
        self.commands.push(command);
    }

    fn handle_file_dependency(&mut self, path: &Path) {
        self.dependencies.push(path.to_path_buf());
    }

    fn handle_prebuilt_module_dependency(&mut self, dep: PrebuiltModuleDep) {
        self.prebuilt_module_deps.push(dep);
    }

    fn handle_module_dependency(&mut self, deps: ModuleDeps) {
        self.clang_module_deps.insert(deps.id.clone(), deps);
    }

    fn handle_named_module(&mut self, name: &str) {
        self.module_name = name.to_string();
    }

    fn handle_context_hash(&mut self, hash: String) {
        self.context_hash = hash;
    }

    fn handle_cas_file_system_root_id(&mut self, id: CasId) {
        self.cas_file_system_root_id = Some(id);
    }

    fn lookup_module_output(&self, id: &ModuleId, kind: ModuleOutputKind) -> String {
        (self.lookup_module_output)(id, kind)
    }
}
