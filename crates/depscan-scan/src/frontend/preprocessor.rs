//! Directive-driven preprocessing.
//!
//! Files are never tokenized; the preprocessor walks the directives the
//! scan filesystem extracted for each file, keeping just enough state
//! (macros, conditional stack, include stack) to decide which files and
//! modules are reached.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use depscan_core::ScanError;
use depscan_fs::{Directive, DirectiveKind, ScanFilesystem};
use tracing::trace;

use super::condition::evaluate;
use super::header_search::{FoundHeader, HeaderSearch};
use super::macros::{MacroDef, MacroTable, leading_identifier, parse_command_line_define, parse_define};
use super::module_map::{ModuleInfo, ModuleMapRegistry};
use crate::diagnostics::{DiagnosticsEngine, Location, Severity};
use crate::invocation::{CompilerInvocation, MacroOp};
use crate::prebuilt::PrebuiltModuleFiles;

/// Maximum `#include` nesting.
pub const MAX_INCLUDE_DEPTH: usize = 200;

/// Events reported while preprocessing. Every path is absolute and
/// canonical.
pub trait PreprocessorCallbacks {
    /// A file was entered; `contents` is its full text.
    fn file_entered(&mut self, _path: &Path, _is_system: bool, _contents: &Arc<[u8]>) {}

    fn file_exited(&mut self, _path: &Path) {}

    /// An include resolved to a file skipped by `#pragma once` or
    /// `#import`.
    fn file_skipped(&mut self, _path: &Path, _is_system: bool) {}

    /// A `__has_include` probe was evaluated.
    fn has_include(&mut self, _path: Option<&Path>, _found: bool) {}

    /// A Clang module was imported, directly or through a modular header.
    fn module_imported(&mut self, _module: &Arc<ModuleInfo>) {}

    /// A module was satisfied by a prebuilt module file.
    fn prebuilt_module_imported(&mut self, _name: &str, _pcm_file: &Path) {}

    /// The main file declares a C++ named module.
    fn named_module_declared(&mut self, _name: &str) {}

    /// A header was found in the search directory with this index.
    fn search_dir_used(&mut self, _index: usize) {}
}

/// Why preprocessing stopped early.
enum Stop {
    /// A fatal diagnostic was reported.
    Fatal,
    Io(ScanError),
}

impl From<ScanError> for Stop {
    fn from(err: ScanError) -> Self {
        Self::Io(err)
    }
}

#[derive(Debug)]
struct Frame {
    path: PathBuf,
    dir_index: Option<usize>,
    is_system: bool,
}

#[derive(Debug)]
struct Conditional {
    parent_active: bool,
    active: bool,
    taken: bool,
    seen_else: bool,
}

/// Preprocessor state for one translation unit or module build.
pub struct Preprocessor<'a> {
    fs: &'a mut dyn ScanFilesystem,
    diags: &'a mut DiagnosticsEngine,
    module_maps: &'a mut ModuleMapRegistry,
    prebuilt: &'a PrebuiltModuleFiles,
    header_search: HeaderSearch,
    macros: MacroTable,
    once: HashSet<PathBuf>,
    imported: HashSet<String>,
    stack: Vec<Frame>,
    forced_includes: Vec<PathBuf>,
    modules_enabled: bool,
    implicit_module_maps: bool,
    current_module: Option<String>,
    named_module: Option<String>,
}

impl<'a> Preprocessor<'a> {
    pub fn new(
        invocation: &CompilerInvocation,
        fs: &'a mut dyn ScanFilesystem,
        diags: &'a mut DiagnosticsEngine,
        module_maps: &'a mut ModuleMapRegistry,
        prebuilt: &'a PrebuiltModuleFiles,
    ) -> Self {
        let header_search = HeaderSearch::new(&invocation.header_search, &*fs);
        for map in &invocation.modules.module_map_files {
            module_maps.load_map_file(fs, map, diags);
        }
        let mut pp = Self {
            fs,
            diags,
            module_maps,
            prebuilt,
            header_search,
            macros: predefined_macros(invocation),
            once: HashSet::new(),
            imported: HashSet::new(),
            stack: Vec::new(),
            forced_includes: invocation.preprocessor.includes.clone(),
            modules_enabled: invocation.modules.enabled,
            implicit_module_maps: invocation.modules.implicit_module_maps,
            current_module: invocation.modules.module_name.clone(),
            named_module: None,
        };
        for op in &invocation.preprocessor.macros {
            match op {
                MacroOp::Define(def) => match parse_command_line_define(def) {
                    Some((name, def)) => pp.define(name, def),
                    None => pp.diags.error(format!("macro name must be an identifier: '{def}'")),
                },
                MacroOp::Undef(name) => {
                    pp.macros.remove(name);
                }
            }
        }
        pp
    }

    pub fn define(&mut self, name: impl Into<String>, def: MacroDef) {
        self.macros.insert(name.into(), def);
    }

    /// Preprocess `path` as the main file. Fatal diagnostics end the run
    /// with `Ok`; they are left in the diagnostics engine.
    pub fn run_main_file(&mut self, path: &Path, cb: &mut dyn PreprocessorCallbacks) -> Result<(), ScanError> {
        let abs = self.fs.absolute(path);
        if !self.fs.is_file(&abs) {
            self.diags.report(
                Severity::Fatal,
                None,
                format!("no such file or directory: '{}'", path.display()),
            );
            return Ok(());
        }
        let result = self.enter_file(abs, None, false, true, cb);
        finish(result)
    }

    /// Import module `name` as an `@import` in the main file would.
    pub fn import_module_by_name(&mut self, name: &str, cb: &mut dyn PreprocessorCallbacks) -> Result<(), ScanError> {
        let result = self.import_module(name, None, cb);
        finish(result)
    }

    /// Preprocess every header of `module` the way its own build would.
    pub fn run_module_headers(&mut self, module: &ModuleInfo, cb: &mut dyn PreprocessorCallbacks) -> Result<(), ScanError> {
        for header in module.modular_headers() {
            if !self.fs.is_file(header) {
                self.diags.error(format!(
                    "header '{}' not found in module '{}'",
                    header.display(),
                    module.name
                ));
                continue;
            }
            let result = self.enter_file(header.to_path_buf(), None, module.is_system, false, cb);
            finish(result)?;
            if self.diags.has_errors() {
                break;
            }
        }
        Ok(())
    }

    fn location(&self, line: u32) -> Option<Location> {
        self.stack.last().map(|f| Location {
            file: f.path.clone(),
            line,
        })
    }

    fn fatal(&mut self, line: u32, message: impl Into<String>) -> Stop {
        let loc = self.location(line);
        self.diags.report(Severity::Fatal, loc, message);
        Stop::Fatal
    }

    fn enter_file(
        &mut self,
        path: PathBuf,
        dir_index: Option<usize>,
        is_system: bool,
        is_main: bool,
        cb: &mut dyn PreprocessorCallbacks,
    ) -> Result<(), Stop> {
        if self.stack.len() >= MAX_INCLUDE_DEPTH {
            return Err(self.fatal(0, format!("#include nested too deeply (limit is {MAX_INCLUDE_DEPTH})")));
        }
        if self.once.contains(&path) {
            cb.file_skipped(&path, is_system);
            return Ok(());
        }

        let contents = self.fs.read(&path)?;
        let directives = self.fs.directives(&path)?;
        trace!(path = %path.display(), directives = directives.len(), "Entering file");
        cb.file_entered(&path, is_system, &contents);
        self.stack.push(Frame {
            path: path.clone(),
            dir_index,
            is_system,
        });

        let mut result = Ok(());
        if is_main {
            for include in std::mem::take(&mut self.forced_includes) {
                result = self.forced_include(&include, cb);
                if result.is_err() {
                    break;
                }
            }
        }
        if result.is_ok() {
            result = self.run_directives(&directives, cb);
        }

        self.stack.pop();
        cb.file_exited(&path);
        result
    }

    fn forced_include(&mut self, include: &Path, cb: &mut dyn PreprocessorCallbacks) -> Result<(), Stop> {
        let cwd = self.fs.working_directory().to_path_buf();
        let spelling = include.to_string_lossy();
        let found = self.header_search.lookup(&mut *self.fs, &spelling, false, Some((cwd.as_path(), false)), None);
        match found {
            Some(found) => self.include_found(found, false, cb),
            None => Err(self.fatal(0, format!("'{spelling}' file not found"))),
        }
    }

    fn is_active(conds: &[Conditional]) -> bool {
        conds.last().is_none_or(|c| c.active)
    }

    fn run_directives(&mut self, directives: &[Directive], cb: &mut dyn PreprocessorCallbacks) -> Result<(), Stop> {
        let mut conds: Vec<Conditional> = Vec::new();
        for d in directives {
            match d.kind {
                DirectiveKind::If | DirectiveKind::Ifdef | DirectiveKind::Ifndef => {
                    let parent_active = Self::is_active(&conds);
                    let value = parent_active && self.condition(d, cb);
                    conds.push(Conditional {
                        parent_active,
                        active: value,
                        taken: value,
                        seen_else: false,
                    });
                }
                DirectiveKind::Elif | DirectiveKind::Elifdef | DirectiveKind::Elifndef => {
                    let Some(cond) = conds.last() else {
                        let loc = self.location(d.line);
                        self.diags.report(Severity::Error, loc, "#elif without #if");
                        continue;
                    };
                    if cond.seen_else {
                        let loc = self.location(d.line);
                        self.diags.report(Severity::Error, loc, "#elif after #else");
                    }
                    let evaluate_branch = cond.parent_active && !cond.taken;
                    let value = evaluate_branch && self.condition(d, cb);
                    if let Some(cond) = conds.last_mut() {
                        cond.active = value;
                        cond.taken |= value;
                    }
                }
                DirectiveKind::Else => match conds.last_mut() {
                    Some(cond) => {
                        cond.active = cond.parent_active && !cond.taken;
                        cond.taken = true;
                        cond.seen_else = true;
                    }
                    None => {
                        let loc = self.location(d.line);
                        self.diags.report(Severity::Error, loc, "#else without #if");
                    }
                },
                DirectiveKind::Endif => {
                    if conds.pop().is_none() {
                        let loc = self.location(d.line);
                        self.diags.report(Severity::Error, loc, "#endif without #if");
                    }
                }
                _ if !Self::is_active(&conds) => {}
                DirectiveKind::Include => self.include(d, false, false, cb)?,
                DirectiveKind::Import => self.include(d, true, false, cb)?,
                DirectiveKind::IncludeNext => self.include(d, false, true, cb)?,
                DirectiveKind::Define => match parse_define(&d.body) {
                    Some((name, def)) => self.define(name, def),
                    None => {
                        let loc = self.location(d.line);
                        self.diags.report(Severity::Error, loc, "macro name must be an identifier");
                    }
                },
                DirectiveKind::Undef => {
                    if let Some(name) = leading_identifier(&d.body) {
                        self.macros.remove(name);
                    }
                }
                DirectiveKind::Pragma => {
                    if d.body.trim() == "once" {
                        if let Some(frame) = self.stack.last() {
                            self.once.insert(frame.path.clone());
                        }
                    }
                }
                DirectiveKind::Error => {
                    let loc = self.location(d.line);
                    self.diags.report(Severity::Error, loc, format!("#error {}", d.body));
                }
                DirectiveKind::Warning => {
                    let loc = self.location(d.line);
                    self.diags.report(Severity::Warning, loc, format!("#warning {}", d.body));
                }
                DirectiveKind::AtImport => {
                    if self.modules_enabled {
                        self.import_module(&d.body, Some(d.line), cb)?;
                    } else {
                        let loc = self.location(d.line);
                        self.diags.report(
                            Severity::Error,
                            loc,
                            "use of '@import' when modules are disabled",
                        );
                    }
                }
                DirectiveKind::CxxImport => self.cxx_import(d, cb)?,
                DirectiveKind::CxxModule => {
                    if self.stack.len() == 1 {
                        let name = d.body.trim().to_string();
                        cb.named_module_declared(&name);
                        self.named_module = Some(name.split(':').next().unwrap_or(&name).to_string());
                    }
                }
            }
        }
        if !conds.is_empty() {
            let loc = self.location(directives.last().map_or(0, |d| d.line));
            self.diags.report(Severity::Error, loc, "unterminated conditional directive");
        }
        Ok(())
    }

    fn condition(&mut self, d: &Directive, cb: &mut dyn PreprocessorCallbacks) -> bool {
        match d.kind {
            DirectiveKind::Ifdef | DirectiveKind::Elifdef => {
                leading_identifier(&d.body).is_some_and(|n| self.macros.contains_key(n))
            }
            DirectiveKind::Ifndef | DirectiveKind::Elifndef => {
                leading_identifier(&d.body).is_some_and(|n| !self.macros.contains_key(n))
            }
            _ => {
                let includer = self.includer();
                let after = self.stack.last().and_then(|f| f.dir_index);
                let fs = &mut *self.fs;
                let header_search = &self.header_search;
                let macros = &self.macros;
                let mut has_include = |spelling: &str, next: bool| {
                    let Some((name, angled)) = header_name(spelling, macros) else {
                        return false;
                    };
                    let includer = includer.as_ref().map(|(p, s)| (p.as_path(), *s));
                    let found = header_search.lookup(fs, &name, angled, includer, if next { after } else { None });
                    cb.has_include(found.as_ref().map(|f| f.path.as_path()), found.is_some());
                    found.is_some()
                };
                match evaluate(&d.body, macros, &mut has_include) {
                    Ok(value) => value,
                    Err(message) => {
                        let loc = self.location(d.line);
                        self.diags.report(Severity::Error, loc, message);
                        false
                    }
                }
            }
        }
    }

    fn includer(&self) -> Option<(PathBuf, bool)> {
        self.stack.last().and_then(|f| {
            f.path
                .parent()
                .map(|dir| (dir.to_path_buf(), f.is_system))
        })
    }

    fn include(
        &mut self,
        d: &Directive,
        is_import: bool,
        is_next: bool,
        cb: &mut dyn PreprocessorCallbacks,
    ) -> Result<(), Stop> {
        let Some((name, angled)) = header_name(&d.body, &self.macros) else {
            let loc = self.location(d.line);
            self.diags.report(Severity::Error, loc, "expected \"FILENAME\" or <FILENAME>");
            return Ok(());
        };

        let mut after = None;
        if is_next {
            match self.stack.last().map(|f| f.dir_index) {
                Some(Some(index)) => after = Some(index),
                _ if self.stack.len() == 1 => {
                    let loc = self.location(d.line);
                    self.diags.report(Severity::Warning, loc, "#include_next in primary source file");
                }
                _ => {}
            }
        }

        let includer = self.includer();
        let found = self.header_search.lookup(
            &mut *self.fs,
            &name,
            angled,
            includer.as_ref().map(|(p, s)| (p.as_path(), *s)),
            after,
        );
        let Some(found) = found else {
            return Err(self.fatal(d.line, format!("'{name}' file not found")));
        };
        if !is_import {
            return self.include_found(found, true, cb);
        }
        if self.once.contains(&found.path) {
            cb.file_skipped(&found.path, found.is_system);
            return Ok(());
        }
        let path = found.path.clone();
        let result = self.include_found(found, true, cb);
        self.once.insert(path);
        result
    }

    fn include_found(
        &mut self,
        found: FoundHeader,
        translate: bool,
        cb: &mut dyn PreprocessorCallbacks,
    ) -> Result<(), Stop> {
        if let Some(index) = found.dir_index {
            cb.search_dir_used(index);
        }
        if translate && self.modules_enabled {
            let root = match found.dir_index {
                Some(index) => self.header_search.dirs().get(index).map(|d| d.path.clone()),
                None => found.path.parent().map(Path::to_path_buf),
            };
            let owner = if self.implicit_module_maps {
                self.module_maps
                    .module_for_header(&mut *self.fs, &found.path, root.as_deref(), self.diags)
            } else {
                self.module_maps.owner_of(&found.path)
            };
            if let Some((module, kind)) = owner {
                if kind.is_modular() && self.current_module.as_deref() != Some(module.name.as_str()) {
                    trace!(header = %found.path.display(), module = %module.name, "Translating include to import");
                    return self.import_resolved(module, cb);
                }
            }
        }
        self.enter_file(found.path, found.dir_index, found.is_system, false, cb)
    }

    fn import_module(&mut self, name: &str, line: Option<u32>, cb: &mut dyn PreprocessorCallbacks) -> Result<(), Stop> {
        let top = name.split('.').next().unwrap_or(name).trim();
        if let Some(pcm) = self.prebuilt.get(top) {
            if self.imported.insert(top.to_string()) {
                cb.prebuilt_module_imported(top, pcm);
            }
            return Ok(());
        }
        let search_dirs: Vec<PathBuf> = self.header_search.dirs().iter().map(|d| d.path.clone()).collect();
        let module = self.module_maps.find_module(
            &mut *self.fs,
            top,
            search_dirs.iter().map(PathBuf::as_path),
            self.diags,
        );
        match module {
            Some(module) => self.import_resolved(module, cb),
            None => Err(self.fatal(line.unwrap_or(0), format!("module '{name}' not found"))),
        }
    }

    fn import_resolved(&mut self, module: Arc<ModuleInfo>, cb: &mut dyn PreprocessorCallbacks) -> Result<(), Stop> {
        if self.current_module.as_deref() == Some(module.name.as_str()) {
            return Ok(());
        }
        if let Some(pcm) = self.prebuilt.get(&module.name) {
            if self.imported.insert(module.name.clone()) {
                cb.prebuilt_module_imported(&module.name, pcm);
            }
            return Ok(());
        }
        if self.imported.insert(module.name.clone()) {
            cb.module_imported(&module);
        }
        Ok(())
    }

    fn cxx_import(&mut self, d: &Directive, cb: &mut dyn PreprocessorCallbacks) -> Result<(), Stop> {
        let body = d.body.trim();
        if body.starts_with('<') || body.starts_with('"') {
            // Header units are entered like includes.
            return self.include(d, true, false, cb);
        }
        let name = match (body.strip_prefix(':'), &self.named_module) {
            (Some(partition), Some(module)) => format!("{module}:{partition}"),
            _ => body.to_string(),
        };
        match self.prebuilt.get(&name) {
            Some(pcm) => {
                if self.imported.insert(name.clone()) {
                    cb.prebuilt_module_imported(&name, pcm);
                }
                Ok(())
            }
            None => Err(self.fatal(d.line, format!("module '{name}' not found"))),
        }
    }
}

fn finish(result: Result<(), Stop>) -> Result<(), ScanError> {
    match result {
        Ok(()) | Err(Stop::Fatal) => Ok(()),
        Err(Stop::Io(err)) => Err(err),
    }
}

/// Resolve an include operand, expanding object-like macros.
fn header_name(body: &str, macros: &MacroTable) -> Option<(String, bool)> {
    let mut text = body.trim().to_string();
    for _ in 0..8 {
        if let Some(rest) = text.strip_prefix('<') {
            return rest.find('>').map(|end| (rest[..end].to_string(), true));
        }
        if let Some(rest) = text.strip_prefix('"') {
            return rest.find('"').map(|end| (rest[..end].to_string(), false));
        }
        let def = macros.get(leading_identifier(&text)?)?;
        if def.is_function_like() {
            return None;
        }
        text = def.body.trim().to_string();
    }
    None
}

fn predefined_macros(invocation: &CompilerInvocation) -> MacroTable {
    let mut macros = MacroTable::new();
    let mut define = |name: &str, value: &str| {
        macros.insert(name.to_string(), MacroDef::object(value));
    };
    define("__STDC__", "1");
    define("__STDC_HOSTED__", "1");
    define("__clang__", "1");
    let std = invocation.lang_std.as_deref().unwrap_or("");
    if invocation.is_cplusplus() {
        let version = match std.trim_start_matches("gnu").trim_start_matches("c") {
            "++98" | "++03" => "199711L",
            "++11" => "201103L",
            "++14" => "201402L",
            "++20" | "++2a" => "202002L",
            "++23" | "++2b" => "202302L",
            _ => "201703L",
        };
        define("__cplusplus", version);
    } else {
        let version = match std {
            "c99" | "gnu99" => "199901L",
            "c11" | "gnu11" => "201112L",
            "c2x" | "gnu2x" | "c23" | "gnu23" => "202311L",
            _ => "201710L",
        };
        define("__STDC_VERSION__", version);
    }
    let lang = invocation.language.as_deref().unwrap_or("");
    let objc = lang.starts_with("objective-c")
        || invocation
            .main_input()
            .and_then(|p| p.extension())
            .is_some_and(|e| e == "m" || e == "mm");
    if objc {
        define("__OBJC__", "1");
    }
    macros
}

#[cfg(test)]
mod tests {
    use super::*;
    use depscan_fs::{InMemoryFileSystem, SharedFileSystemCache, WorkerFilesystem};

    #[derive(Default)]
    struct Recorder {
        entered: Vec<PathBuf>,
        skipped: Vec<PathBuf>,
        modules: Vec<String>,
        prebuilt: Vec<String>,
        has_include: Vec<bool>,
        named: Option<String>,
    }

    impl PreprocessorCallbacks for Recorder {
        fn file_entered(&mut self, path: &Path, _: bool, _: &Arc<[u8]>) {
            self.entered.push(path.to_path_buf());
        }
        fn file_skipped(&mut self, path: &Path, _: bool) {
            self.skipped.push(path.to_path_buf());
        }
        fn has_include(&mut self, _: Option<&Path>, found: bool) {
            self.has_include.push(found);
        }
        fn module_imported(&mut self, module: &Arc<ModuleInfo>) {
            self.modules.push(module.name.clone());
        }
        fn prebuilt_module_imported(&mut self, name: &str, _: &Path) {
            self.prebuilt.push(name.to_string());
        }
        fn named_module_declared(&mut self, name: &str) {
            self.named = Some(name.to_string());
        }
    }

    fn run(files: &[(&str, &str)], args: &[&str], prebuilt: PrebuiltModuleFiles) -> (Recorder, DiagnosticsEngine) {
        let memory = Arc::new(InMemoryFileSystem::new());
        for (path, contents) in files {
            memory.add_file(path, *contents);
        }
        let mut fs = WorkerFilesystem::new(Arc::new(SharedFileSystemCache::new()), memory);
        fs.set_working_directory(Path::new("/src"));
        let mut argv = vec!["-cc1".to_string()];
        argv.extend(args.iter().map(|s| s.to_string()));
        let inv = CompilerInvocation::parse("clang", &argv).unwrap();

        let mut diags = DiagnosticsEngine::new();
        let mut maps = ModuleMapRegistry::new();
        let mut rec = Recorder::default();
        let main = inv.main_input().unwrap().to_path_buf();
        Preprocessor::new(&inv, &mut fs, &mut diags, &mut maps, &prebuilt)
            .run_main_file(&main, &mut rec)
            .unwrap();
        (rec, diags)
    }

    #[test]
    fn test_conditionals_select_includes() {
        let (rec, diags) = run(
            &[
                ("/src/a.c", "#define USE_B 1\n#if USE_B && !defined(NO_B)\n#include \"b.h\"\n#elif 1\n#include \"c.h\"\n#else\n#include \"missing.h\"\n#endif\n#ifdef LEVEL\n#include \"level.h\"\n#endif\n"),
                ("/src/b.h", "#pragma once\n#include \"b.h\"\n"),
                ("/src/c.h", ""),
                ("/src/level.h", ""),
            ],
            &["-DLEVEL=2", "a.c"],
            PrebuiltModuleFiles::new(),
        );
        assert!(!diags.has_errors(), "{}", diags.render());
        assert_eq!(
            rec.entered,
            vec![
                PathBuf::from("/src/a.c"),
                PathBuf::from("/src/b.h"),
                PathBuf::from("/src/level.h")
            ]
        );
        assert_eq!(rec.skipped, vec![PathBuf::from("/src/b.h")]);
    }

    #[test]
    fn test_missing_header_is_fatal() {
        let (rec, diags) = run(
            &[("/src/a.c", "#include <nope.h>\n#include \"after.h\"\n"), ("/src/after.h", "")],
            &["a.c"],
            PrebuiltModuleFiles::new(),
        );
        assert_eq!(rec.entered.len(), 1);
        assert!(diags.render().contains("/src/a.c:1: error: 'nope.h' file not found"));
    }

    #[test]
    fn test_has_include_and_include_next() {
        let (rec, diags) = run(
            &[
                ("/src/a.c", "#if __has_include(<w.h>) && !__has_include(\"none.h\")\n#include <w.h>\n#endif\n"),
                ("/one/w.h", "#include_next <w.h>\n"),
                ("/two/w.h", "#define W2\n"),
            ],
            &["-I", "/one", "-I", "/two", "a.c"],
            PrebuiltModuleFiles::new(),
        );
        assert!(!diags.has_errors(), "{}", diags.render());
        assert_eq!(rec.has_include, vec![true, false]);
        assert_eq!(rec.entered.last(), Some(&PathBuf::from("/two/w.h")));
    }

    #[test]
    fn test_modular_include_becomes_import() {
        let (rec, diags) = run(
            &[
                ("/src/a.m", "#import <Foo/foo.h>\n@import Bar;\n#include \"local.h\"\n"),
                ("/src/local.h", ""),
                ("/inc/Foo/module.modulemap", "module Foo { header \"foo.h\" }"),
                ("/inc/Foo/foo.h", ""),
                ("/inc/module.modulemap", "module Bar { header \"bar.h\" }"),
                ("/inc/bar.h", ""),
            ],
            &["-fmodules", "-fimplicit-module-maps", "-I", "/inc", "a.m"],
            PrebuiltModuleFiles::new(),
        );
        assert!(!diags.has_errors(), "{}", diags.render());
        assert_eq!(rec.modules, vec!["Foo".to_string(), "Bar".to_string()]);
        assert_eq!(
            rec.entered,
            vec![PathBuf::from("/src/a.m"), PathBuf::from("/src/local.h")]
        );
    }

    #[test]
    fn test_named_modules() {
        let mut prebuilt = PrebuiltModuleFiles::new();
        prebuilt.insert("std".to_string(), PathBuf::from("/pcm/std.pcm"));
        let (rec, diags) = run(
            &[("/src/m.cppm", "export module app;\nimport std;\nimport missing;\n")],
            &["-std=c++20", "m.cppm"],
            prebuilt,
        );
        assert_eq!(rec.named.as_deref(), Some("app"));
        assert_eq!(rec.prebuilt, vec!["std".to_string()]);
        assert!(diags.render().contains("module 'missing' not found"));
    }

    #[test]
    fn test_forced_include_and_error_directive() {
        let (rec, diags) = run(
            &[
                ("/src/a.c", "#ifndef CONFIG\n#error config missing\n#endif\n#warning careful\n"),
                ("/src/config.h", "#define CONFIG\n"),
            ],
            &["-include", "config.h", "a.c"],
            PrebuiltModuleFiles::new(),
        );
        assert_eq!(rec.entered, vec![PathBuf::from("/src/a.c"), PathBuf::from("/src/config.h")]);
        assert!(!diags.has_errors());
        assert_eq!(diags.diagnostics().len(), 1);

        let (_, diags) = run(&[("/src/a.c", "#error stop\n#if\n#endif\n")], &["a.c"], PrebuiltModuleFiles::new());
        assert_eq!(diags.error_count(), 2);
    }

    #[test]
    fn test_include_depth_limit() {
        let (rec, diags) = run(
            &[("/src/a.c", "#include \"loop.h\"\n"), ("/src/loop.h", "#include \"loop.h\"\n")],
            &["a.c"],
            PrebuiltModuleFiles::new(),
        );
        assert_eq!(rec.entered.len(), MAX_INCLUDE_DEPTH);
        assert!(diags.render().contains("nested too deeply"));
    }
}
