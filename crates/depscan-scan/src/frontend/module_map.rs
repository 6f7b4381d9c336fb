//! `module.modulemap` parsing and lookup.
//!
//! Only top-level modules are built; submodule headers are folded into
//! their top-level module and `import A.B` resolves to `A`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use depscan_fs::ScanFilesystem;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::diagnostics::DiagnosticsEngine;

/// File names probed for implicit module maps.
const MODULE_MAP_NAMES: &[&str] = &["module.modulemap", "module.map"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    Normal,
    Private,
    Textual,
    Umbrella,
    Excluded,
}

impl HeaderKind {
    /// Whether including a header of this kind imports its module.
    pub fn is_modular(self) -> bool {
        matches!(self, Self::Normal | Self::Private | Self::Umbrella)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleHeader {
    /// Absolute, canonical path.
    pub path: PathBuf,
    pub kind: HeaderKind,
}

/// A top-level module declared in a module map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    /// Map file that declared the module.
    pub map_file: PathBuf,
    pub headers: Vec<ModuleHeader>,
    pub umbrella_dirs: Vec<PathBuf>,
    pub is_system: bool,
    /// Dotted names of every submodule.
    pub submodules: Vec<String>,
    pub requires: Vec<String>,
}

impl ModuleInfo {
    /// Headers whose contents make up the module.
    pub fn modular_headers(&self) -> impl Iterator<Item = &Path> {
        self.headers
            .iter()
            .filter(|h| h.kind.is_modular())
            .map(|h| h.path.as_path())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Punct(char),
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();
    while let Some((pos, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '/' if source[pos..].starts_with("//") => {
                while chars.next_if(|&(_, c)| c != '\n').is_some() {}
            }
            '/' if source[pos..].starts_with("/*") => {
                let end = source[pos + 2..]
                    .find("*/")
                    .ok_or_else(|| "unterminated comment".to_string())?;
                let stop = pos + 2 + end + 2;
                while chars.next_if(|&(p, _)| p < stop).is_some() {}
            }
            '"' => {
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, '\\')) => {
                            if let Some((_, escaped)) = chars.next() {
                                text.push(escaped);
                            }
                        }
                        Some((_, c)) => text.push(c),
                        None => return Err("unterminated string".to_string()),
                    }
                }
                tokens.push(Token::Str(text));
            }
            '{' | '}' | '[' | ']' | ',' | '.' | '!' | '*' => tokens.push(Token::Punct(c)),
            c if c.is_alphanumeric() || c == '_' => {
                let mut ident = c.to_string();
                while let Some((_, c)) = chars.next_if(|&(_, c)| c.is_alphanumeric() || c == '_') {
                    ident.push(c);
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

/// A module declaration as written, before flattening.
#[derive(Debug, Default)]
struct Decl {
    name: String,
    is_system: bool,
    headers: Vec<(String, HeaderKind)>,
    umbrella_dirs: Vec<String>,
    requires: Vec<String>,
    submodules: Vec<Decl>,
}

#[derive(Debug, Default)]
struct Parsed {
    modules: Vec<Decl>,
    externs: Vec<(String, String)>,
    warnings: Vec<String>,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    warnings: Vec<String>,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn at_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == word)
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.peek() == Some(&Token::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<(), String> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(format!("expected '{c}'"))
        }
    }

    fn expect_ident(&mut self, word: &str) -> Result<(), String> {
        if self.at_ident(word) {
            self.pos += 1;
            Ok(())
        } else {
            Err(format!("expected '{word}'"))
        }
    }

    fn string(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Str(s)) => Ok(s),
            _ => Err("expected a string literal".to_string()),
        }
    }

    /// `A.B.C` or `*`.
    fn module_id(&mut self) -> Result<String, String> {
        let mut name = String::new();
        loop {
            match self.next() {
                Some(Token::Ident(part)) => name.push_str(&part),
                Some(Token::Punct('*')) => name.push('*'),
                _ => return Err("expected a module name".to_string()),
            }
            if !self.eat_punct('.') {
                return Ok(name);
            }
            name.push('.');
        }
    }

    fn file(&mut self) -> Result<Parsed, String> {
        let mut parsed = Parsed::default();
        while let Some(tok) = self.peek() {
            match tok {
                Token::Ident(w) if w == "extern" => {
                    self.pos += 1;
                    self.expect_ident("module")?;
                    let name = self.module_id()?;
                    let path = self.string()?;
                    parsed.externs.push((name, path));
                }
                Token::Ident(w) if matches!(w.as_str(), "explicit" | "framework" | "module") => {
                    parsed.modules.push(self.module_decl()?);
                }
                _ => return Err("expected module declaration".to_string()),
            }
        }
        parsed.warnings = std::mem::take(&mut self.warnings);
        Ok(parsed)
    }

    fn module_decl(&mut self) -> Result<Decl, String> {
        while self.at_ident("explicit") || self.at_ident("framework") {
            self.pos += 1;
        }
        self.expect_ident("module")?;
        let mut decl = Decl {
            name: self.module_id()?,
            ..Decl::default()
        };
        while self.eat_punct('[') {
            if let Some(Token::Ident(attr)) = self.next() {
                decl.is_system |= attr == "system";
            }
            self.expect_punct(']')?;
        }
        self.expect_punct('{')?;
        loop {
            let Some(tok) = self.next() else {
                return Err(format!("expected '}}' to close module '{}'", decl.name));
            };
            let word = match tok {
                Token::Punct('}') => return Ok(decl),
                Token::Ident(word) => word,
                other => return Err(format!("unexpected {other:?} in module '{}'", decl.name)),
            };
            match word.as_str() {
                "header" => self.header(&mut decl, HeaderKind::Normal)?,
                "private" | "textual" => {
                    let mut kind = if word == "private" {
                        HeaderKind::Private
                    } else {
                        HeaderKind::Textual
                    };
                    if self.at_ident("textual") {
                        self.pos += 1;
                        kind = HeaderKind::Textual;
                    }
                    self.expect_ident("header")?;
                    self.header(&mut decl, kind)?;
                }
                "umbrella" => {
                    if self.at_ident("header") {
                        self.pos += 1;
                        self.header(&mut decl, HeaderKind::Umbrella)?;
                    } else {
                        let dir = self.string()?;
                        decl.umbrella_dirs.push(dir);
                    }
                }
                "exclude" => {
                    self.expect_ident("header")?;
                    self.header(&mut decl, HeaderKind::Excluded)?;
                }
                "explicit" | "framework" | "module" => {
                    self.pos -= 1;
                    let sub = self.module_decl()?;
                    decl.submodules.push(sub);
                }
                "export" | "use" | "export_as" => {
                    self.module_id()?;
                }
                "link" => {
                    if self.at_ident("framework") {
                        self.pos += 1;
                    }
                    self.string()?;
                }
                "requires" => loop {
                    self.eat_punct('!');
                    match self.next() {
                        Some(Token::Ident(feature)) => decl.requires.push(feature),
                        _ => return Err("expected a feature name".to_string()),
                    }
                    if !self.eat_punct(',') {
                        break;
                    }
                },
                "config_macros" => {
                    while self.eat_punct('[') {
                        self.next();
                        self.expect_punct(']')?;
                    }
                    while matches!(self.peek(), Some(Token::Ident(_))) {
                        self.pos += 1;
                        if !self.eat_punct(',') {
                            break;
                        }
                    }
                }
                "conflict" => {
                    self.module_id()?;
                    self.expect_punct(',')?;
                    self.string()?;
                }
                other => {
                    self.warnings
                        .push(format!("unknown module map keyword '{other}'"));
                    if matches!(self.peek(), Some(Token::Str(_))) {
                        self.pos += 1;
                    }
                }
            }
        }
    }

    fn header(&mut self, decl: &mut Decl, kind: HeaderKind) -> Result<(), String> {
        let path = self.string()?;
        // Optional `{ size 12 mtime 34 }` attributes.
        if self.eat_punct('{') {
            while !self.eat_punct('}') {
                if self.next().is_none() {
                    return Err("expected '}' after header attributes".to_string());
                }
            }
        }
        decl.headers.push((path, kind));
        Ok(())
    }
}

fn parse(source: &str) -> Result<Parsed, String> {
    let tokens = tokenize(source)?;
    Parser {
        tokens,
        pos: 0,
        warnings: Vec::new(),
    }
    .file()
}

/// Every module map loaded during a scan.
#[derive(Debug, Default)]
pub struct ModuleMapRegistry {
    modules: IndexMap<String, Arc<ModuleInfo>>,
    header_owner: HashMap<PathBuf, (String, HeaderKind)>,
    loaded: HashSet<PathBuf>,
    probed_dirs: HashSet<PathBuf>,
}

impl ModuleMapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn modules(&self) -> impl Iterator<Item = &Arc<ModuleInfo>> {
        self.modules.values()
    }

    /// Load one module map file. Malformed maps are reported as warnings
    /// and ignored.
    pub fn load_map_file(
        &mut self,
        fs: &mut dyn ScanFilesystem,
        path: &Path,
        diags: &mut DiagnosticsEngine,
    ) -> bool {
        let path = fs.absolute(path);
        if !self.loaded.insert(path.clone()) {
            return true;
        }
        let contents = match fs.read(&path) {
            Ok(contents) => contents,
            Err(err) => {
                diags.error(format!("module map file '{}' not found: {err}", path.display()));
                return false;
            }
        };
        let parsed = match parse(&String::from_utf8_lossy(&contents)) {
            Ok(parsed) => parsed,
            Err(message) => {
                warn!(path = %path.display(), %message, "Ignoring malformed module map");
                diags.warning(format!("{}: malformed module map: {message}", path.display()));
                return false;
            }
        };
        for message in &parsed.warnings {
            diags.warning(format!("{}: {message}", path.display()));
        }

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        for (name, extern_path) in parsed.externs {
            debug!(module = %name, path = %extern_path, "Loading extern module map");
            self.load_map_file(fs, &dir.join(extern_path), diags);
        }
        for decl in parsed.modules {
            self.register(fs, &path, &dir, decl, diags);
        }
        true
    }

    fn register(
        &mut self,
        fs: &dyn ScanFilesystem,
        map_file: &Path,
        dir: &Path,
        decl: Decl,
        diags: &mut DiagnosticsEngine,
    ) {
        if self.modules.contains_key(&decl.name) {
            diags.warning(format!(
                "{}: redefinition of module '{}' ignored",
                map_file.display(),
                decl.name
            ));
            return;
        }
        let mut info = ModuleInfo {
            name: decl.name.clone(),
            map_file: map_file.to_path_buf(),
            headers: Vec::new(),
            umbrella_dirs: Vec::new(),
            is_system: decl.is_system,
            submodules: Vec::new(),
            requires: Vec::new(),
        };
        flatten(fs, dir, decl, &mut info, "");
        for header in &info.headers {
            self.header_owner
                .entry(header.path.clone())
                .or_insert_with(|| (info.name.clone(), header.kind));
        }
        debug!(module = %info.name, headers = info.headers.len(), "Registered module");
        self.modules.insert(info.name.clone(), Arc::new(info));
    }

    fn probe_dir(&mut self, fs: &mut dyn ScanFilesystem, dir: &Path, diags: &mut DiagnosticsEngine) {
        if !self.probed_dirs.insert(dir.to_path_buf()) {
            return;
        }
        for name in MODULE_MAP_NAMES {
            let candidate = dir.join(name);
            if fs.is_file(&candidate) {
                self.load_map_file(fs, &candidate, diags);
                break;
            }
        }
    }

    /// Find the top-level module for `name` (`A.B` resolves to `A`),
    /// probing `search_dirs` and `search_dirs/<A>` for module maps.
    pub fn find_module<'d>(
        &mut self,
        fs: &mut dyn ScanFilesystem,
        name: &str,
        search_dirs: impl IntoIterator<Item = &'d Path>,
        diags: &mut DiagnosticsEngine,
    ) -> Option<Arc<ModuleInfo>> {
        let top = name.split('.').next().unwrap_or(name);
        if let Some(module) = self.modules.get(top) {
            return Some(module.clone());
        }
        for dir in search_dirs {
            self.probe_dir(fs, dir, diags);
            self.probe_dir(fs, &dir.join(top), diags);
            if let Some(module) = self.modules.get(top) {
                return Some(module.clone());
            }
        }
        None
    }

    /// The module owning `header`, probing each directory from the
    /// header's own up to `root` for module maps.
    pub fn module_for_header(
        &mut self,
        fs: &mut dyn ScanFilesystem,
        header: &Path,
        root: Option<&Path>,
        diags: &mut DiagnosticsEngine,
    ) -> Option<(Arc<ModuleInfo>, HeaderKind)> {
        let mut dir = header.parent();
        while let Some(current) = dir {
            self.probe_dir(fs, current, diags);
            if root.is_none_or(|r| current == r) || !root.is_some_and(|r| current.starts_with(r)) {
                break;
            }
            dir = current.parent();
        }
        self.owner_of(header)
    }

    /// The owner of `header` among already loaded maps.
    pub fn owner_of(&self, header: &Path) -> Option<(Arc<ModuleInfo>, HeaderKind)> {
        if let Some((name, kind)) = self.header_owner.get(header) {
            return self.modules.get(name).map(|m| (m.clone(), *kind));
        }
        self.modules
            .values()
            .find(|m| m.umbrella_dirs.iter().any(|d| header.starts_with(d)))
            .map(|m| (m.clone(), HeaderKind::Normal))
    }
}

fn flatten(fs: &dyn ScanFilesystem, dir: &Path, decl: Decl, info: &mut ModuleInfo, prefix: &str) {
    let full_name = if prefix.is_empty() {
        decl.name
    } else {
        let full = format!("{prefix}.{}", decl.name);
        info.submodules.push(full.clone());
        full
    };
    info.headers.extend(decl.headers.into_iter().map(|(path, kind)| ModuleHeader {
        path: fs.absolute(&dir.join(path)),
        kind,
    }));
    info.umbrella_dirs
        .extend(decl.umbrella_dirs.iter().map(|d| fs.absolute(&dir.join(d))));
    info.requires.extend(decl.requires);
    for sub in decl.submodules {
        flatten(fs, dir, sub, info, &full_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depscan_fs::{InMemoryFileSystem, SharedFileSystemCache, WorkerFilesystem};

    const MAP: &str = r#"
// Comment
module Foo [system] {
  header "foo.h"
  textual header "foo_inc.def"
  private header "foo_impl.h" { size 12 }
  exclude header "foo_old.h"
  export *
  requires cplusplus, !objc
  explicit module Bar {
    umbrella header "bar/bar.h"
    link "bar"
  }
  module * { export * }
}
extern module Ext "ext/module.modulemap"
"#;

    fn fs() -> WorkerFilesystem {
        let memory = Arc::new(InMemoryFileSystem::new());
        memory.add_file("/inc/module.modulemap", MAP);
        memory.add_file("/inc/foo.h", "");
        memory.add_file("/inc/ext/module.modulemap", "module Ext { header \"ext.h\" }");
        memory.add_file("/inc/ext/ext.h", "");
        memory.add_file("/bad/module.modulemap", "module Broken { header ");
        memory.add_file("/bad/b.h", "");
        WorkerFilesystem::new(Arc::new(SharedFileSystemCache::new()), memory)
    }

    #[test]
    fn test_parse_full_map() {
        let mut fs = fs();
        let mut diags = DiagnosticsEngine::new();
        let mut registry = ModuleMapRegistry::new();
        let foo = registry
            .find_module(&mut fs, "Foo.Bar", [Path::new("/inc")], &mut diags)
            .unwrap();

        assert_eq!(foo.name, "Foo");
        assert!(foo.is_system);
        assert_eq!(foo.submodules, vec!["Foo.Bar".to_string(), "Foo.*".to_string()]);
        assert_eq!(foo.requires, vec!["cplusplus".to_string(), "objc".to_string()]);
        let modular: Vec<_> = foo.modular_headers().collect();
        assert_eq!(
            modular,
            vec![
                Path::new("/inc/foo.h"),
                Path::new("/inc/foo_impl.h"),
                Path::new("/inc/bar/bar.h")
            ]
        );
        assert!(registry.modules.contains_key("Ext"));
        assert!(!diags.has_errors());
    }

    #[test]
    fn test_module_for_header() {
        let mut fs = fs();
        let mut diags = DiagnosticsEngine::new();
        let mut registry = ModuleMapRegistry::new();
        let (module, kind) = registry
            .module_for_header(&mut fs, Path::new("/inc/ext/ext.h"), Some(Path::new("/inc")), &mut diags)
            .unwrap();
        assert_eq!(module.name, "Ext");
        assert_eq!(kind, HeaderKind::Normal);

        let (_, kind) = registry.owner_of(Path::new("/inc/foo_inc.def")).unwrap();
        assert!(!kind.is_modular());
    }

    #[test]
    fn test_malformed_map_is_a_warning() {
        let mut fs = fs();
        let mut diags = DiagnosticsEngine::new();
        let mut registry = ModuleMapRegistry::new();
        assert!(
            registry
                .module_for_header(&mut fs, Path::new("/bad/b.h"), Some(Path::new("/bad")), &mut diags)
                .is_none()
        );
        assert!(!diags.has_errors());
        assert_eq!(diags.diagnostics().len(), 1);
    }
}
