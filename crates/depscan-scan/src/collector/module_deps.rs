//! Module graph discovery for the full dependency formats.
//!
//! While the translation unit is preprocessed, imports are only recorded.
//! When it finishes, every imported module is scanned in turn by running
//! the preprocessor over its headers, dependencies first, and reported
//! with the command that builds it explicitly.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use depscan_core::{Command, ModuleDeps, ModuleId, ModuleOutputKind, PrebuiltModuleDep, ScanError};
use depscan_fs::canonicalize;
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use super::{CollectorOptions, DependencyFileGenerator, DiscoveredDependencies, ScanContext};
use crate::consumer::DependencyConsumer;
use crate::frontend::{ModuleInfo, Preprocessor, PreprocessorCallbacks};
use crate::invocation::{
    CompilerInvocation, DependencyOutputOptions, FrontendAction, HeaderSearchOptions, ModuleFileArg,
};

/// Collects what the translation unit imports.
pub struct ModuleDepCollector<'c> {
    generator: DependencyFileGenerator,
    consumer: &'c mut dyn DependencyConsumer,
    options: CollectorOptions,
    direct_modules: IndexMap<String, Arc<ModuleInfo>>,
    direct_prebuilt: IndexMap<String, PathBuf>,
    named_module: Option<String>,
}

/// Events recorded while scanning the headers of one module.
#[derive(Debug, Default)]
struct ModuleScan {
    file_deps: IndexSet<PathBuf>,
    imports: IndexMap<String, Arc<ModuleInfo>>,
    prebuilt: IndexMap<String, PathBuf>,
    used_search_dirs: BTreeSet<usize>,
}

impl PreprocessorCallbacks for ModuleScan {
    fn file_entered(&mut self, path: &Path, _is_system: bool, _contents: &Arc<[u8]>) {
        self.file_deps.insert(path.to_path_buf());
    }

    fn file_skipped(&mut self, path: &Path, _is_system: bool) {
        self.file_deps.insert(path.to_path_buf());
    }

    fn has_include(&mut self, path: Option<&Path>, found: bool) {
        if let (Some(path), true) = (path, found) {
            self.file_deps.insert(path.to_path_buf());
        }
    }

    fn module_imported(&mut self, module: &Arc<ModuleInfo>) {
        self.imports.insert(module.name.clone(), module.clone());
    }

    fn prebuilt_module_imported(&mut self, name: &str, pcm_file: &Path) {
        self.prebuilt.insert(name.to_string(), pcm_file.to_path_buf());
    }

    fn search_dir_used(&mut self, index: usize) {
        self.used_search_dirs.insert(index);
    }
}

/// Modules built so far, in dependency order.
struct GraphBuilder<'c, 'a> {
    consumer: &'c dyn DependencyConsumer,
    options: &'a CollectorOptions,
    /// The translation unit writes a dependency file, so module builds do too.
    dependency_files: bool,
    built: IndexMap<String, ModuleDeps>,
    stack: Vec<String>,
}

impl<'c> ModuleDepCollector<'c> {
    pub fn new(
        generator: DependencyFileGenerator,
        consumer: &'c mut dyn DependencyConsumer,
        options: CollectorOptions,
    ) -> Self {
        Self {
            generator,
            consumer,
            options,
            direct_modules: IndexMap::new(),
            direct_prebuilt: IndexMap::new(),
            named_module: None,
        }
    }

    pub(crate) fn generator_mut(&mut self) -> &mut DependencyFileGenerator {
        &mut self.generator
    }

    /// Build the module graph and report it, then the translation unit.
    pub fn finish(self, mut ctx: ScanContext<'_>) -> Result<DiscoveredDependencies, ScanError> {
        let Self {
            generator,
            consumer,
            options,
            direct_modules,
            direct_prebuilt,
            named_module,
        } = self;

        let mut graph = GraphBuilder {
            consumer: &*consumer,
            options: &options,
            dependency_files: generator.opts().output_file.is_some(),
            built: IndexMap::new(),
            stack: Vec::new(),
        };
        let mut direct_ids = Vec::new();
        for module in direct_modules.values() {
            if let Some(id) = graph.build(&mut ctx, module)? {
                direct_ids.push((id, module.map_file.clone()));
            }
        }
        let built = graph.built;

        let mut discovered = DiscoveredDependencies::default();
        for (id, map_file) in &direct_ids {
            discovered
                .module_files
                .push(module_file_arg(&*consumer, id, options.eager_load_modules));
            if !options.eager_load_modules {
                discovered.module_map_files.push(map_file.clone());
            }
        }

        debug!(
            modules = built.len(),
            direct = direct_ids.len(),
            prebuilt = direct_prebuilt.len(),
            "Collected module dependencies"
        );
        for (name, mut deps) in built {
            deps.imported_by_main_file = direct_modules.contains_key(&name);
            consumer.handle_module_dependency(deps);
        }
        for (name, pcm) in direct_prebuilt {
            consumer.handle_prebuilt_module_dependency(PrebuiltModuleDep::new(name, pcm));
        }
        for dep in generator.dependencies() {
            consumer.handle_file_dependency(&dep);
        }
        if let Some(name) = &named_module {
            consumer.handle_named_module(name);
        }
        consumer.handle_context_hash(ctx.invocation.module_context_hash(true));
        Ok(discovered)
    }
}

impl PreprocessorCallbacks for ModuleDepCollector<'_> {
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
        self.direct_modules.insert(module.name.clone(), module.clone());
    }

    fn prebuilt_module_imported(&mut self, name: &str, pcm_file: &Path) {
        self.direct_prebuilt.insert(name.to_string(), pcm_file.to_path_buf());
    }

    fn named_module_declared(&mut self, name: &str) {
        self.named_module = Some(name.to_string());
    }
}

fn module_file_arg(consumer: &dyn DependencyConsumer, id: &ModuleId, eager: bool) -> ModuleFileArg {
    let pcm = consumer.lookup_module_output(id, ModuleOutputKind::ModuleFile);
    ModuleFileArg {
        name: (!eager).then(|| id.module_name.to_string()),
        path: PathBuf::from(pcm),
    }
}

impl GraphBuilder<'_, '_> {
    /// Scan `module` and everything it imports, returning its id, or
    /// `None` when the module takes part in an import cycle.
    fn build(&mut self, ctx: &mut ScanContext<'_>, module: &Arc<ModuleInfo>) -> Result<Option<ModuleId>, ScanError> {
        if let Some(deps) = self.built.get(&module.name) {
            return Ok(Some(deps.id.clone()));
        }
        if self.stack.contains(&module.name) {
            let mut chain = self.stack.join(" -> ");
            chain.push_str(" -> ");
            chain.push_str(&module.name);
            ctx.diags.error(format!("cyclic dependency in module '{}': {chain}", module.name));
            return Ok(None);
        }
        self.stack.push(module.name.clone());

        let mut scan_invocation = ctx.invocation.clone();
        scan_invocation.modules.module_name = Some(module.name.clone());
        scan_invocation.preprocessor.includes.clear();
        scan_invocation.preprocessor.implicit_pch = None;

        let mut scan = ModuleScan::default();
        {
            let mut pp = Preprocessor::new(
                &scan_invocation,
                &mut *ctx.fs,
                &mut *ctx.diags,
                &mut *ctx.module_maps,
                ctx.prebuilt,
            );
            pp.run_module_headers(module, &mut scan)?;
        }

        let mut deps = Vec::new();
        for import in scan.imports.values() {
            if let Some(id) = self.build(ctx, import)? {
                deps.push((id, import.map_file.clone()));
            }
        }
        self.stack.pop();

        let dep_ids: Vec<ModuleId> = deps.iter().map(|(id, _)| id.clone()).collect();
        let mut invocation = module_invocation(ctx.invocation, module);
        if self.options.optimize_args {
            prune_search_dirs(&mut invocation.header_search, &scan.used_search_dirs);
        }
        let id = ModuleId::new(
            module.name.as_str(),
            invocation.module_context_hash_with_deps(true, &dep_ids),
        );

        let lookup = |kind| self.consumer.lookup_module_output(&id, kind);
        invocation.output_file = Some(lookup(ModuleOutputKind::ModuleFile));
        if self.dependency_files {
            invocation.dependency_output = DependencyOutputOptions {
                output_file: Some(PathBuf::from(lookup(ModuleOutputKind::DependencyFile))),
                targets: vec![lookup(ModuleOutputKind::DependencyTargets)],
                include_system_headers: true,
                phony_targets: false,
            };
        }
        if ctx.invocation.diagnostics.serialize_file.is_some() {
            invocation.diagnostics.serialize_file =
                Some(PathBuf::from(lookup(ModuleOutputKind::DiagnosticSerializationFile)));
        }
        let eager = self.options.eager_load_modules;
        for (dep, map_file) in &deps {
            invocation.modules.module_files.push(module_file_arg(self.consumer, dep, eager));
            if !eager {
                invocation.modules.module_map_files.push(map_file.clone());
            }
        }
        for (name, pcm) in &scan.prebuilt {
            invocation.modules.module_files.push(ModuleFileArg {
                name: Some(name.clone()),
                path: pcm.clone(),
            });
        }

        let cwd = &self.options.working_directory;
        let mut file_deps = vec![canonicalize(cwd, &module.map_file)];
        for path in scan.file_deps {
            let path = canonicalize(cwd, &path);
            if !file_deps.contains(&path) {
                file_deps.push(path);
            }
        }

        debug!(module = %id, files = file_deps.len(), deps = dep_ids.len(), "Discovered module");
        self.built.insert(
            module.name.clone(),
            ModuleDeps {
                id: id.clone(),
                clang_module_map_file: module.map_file.clone(),
                file_deps,
                clang_module_deps: dep_ids,
                prebuilt_module_deps: scan
                    .prebuilt
                    .into_iter()
                    .map(|(name, pcm)| PrebuiltModuleDep::new(name, pcm))
                    .collect(),
                build_command: Command::new(invocation.executable.clone(), invocation.to_args()),
                imported_by_main_file: false,
            },
        );
        Ok(Some(id))
    }
}

/// The invocation that builds `module` explicitly, before outputs and
/// module dependencies are filled in.
fn module_invocation(tu: &CompilerInvocation, module: &ModuleInfo) -> CompilerInvocation {
    let mut inv = tu.clone();
    inv.action = FrontendAction::EmitModule;
    inv.inputs = vec![module.map_file.clone()];
    inv.output_file = None;
    inv.file_args.clear();
    inv.preprocessor.includes.clear();
    inv.preprocessor.implicit_pch = None;
    inv.dependency_output = DependencyOutputOptions::default();
    inv.diagnostics.serialize_file = None;

    let modules = &mut inv.modules;
    modules.enabled = true;
    modules.module_name = Some(module.name.clone());
    modules.implicit_modules = false;
    modules.implicit_module_maps = false;
    modules.cache_path = None;
    modules.module_files.clear();
    modules.module_map_files.clear();
    inv
}

/// Keep only the search directories a module build looked headers up in.
/// Indices follow header search order: quote, angled, then system.
fn prune_search_dirs(opts: &mut HeaderSearchOptions, used: &BTreeSet<usize>) {
    let mut index = 0;
    for dirs in [&mut opts.quote_dirs, &mut opts.angled_dirs, &mut opts.system_dirs] {
        dirs.retain(|_| {
            let keep = used.contains(&index);
            index += 1;
            keep
        });
    }
}
