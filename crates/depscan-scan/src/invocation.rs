//! Parsed `-cc1` compiler invocations.
//!
//! Only the options that influence preprocessing, module builds and
//! dependency output are modelled. Everything else is preserved verbatim so
//! that [`CompilerInvocation::to_args`] reproduces a usable command line.

use std::path::{Path, PathBuf};

use depscan_core::{ModuleId, ScanError};

/// What the front end is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontendAction {
    Preprocess,
    #[default]
    SyntaxOnly,
    EmitObj,
    EmitAssembly,
    EmitPch,
    EmitModule,
    EmitModuleInterface,
}

impl FrontendAction {
    pub fn flag(self) -> &'static str {
        match self {
            Self::Preprocess => "-E",
            Self::SyntaxOnly => "-fsyntax-only",
            Self::EmitObj => "-emit-obj",
            Self::EmitAssembly => "-S",
            Self::EmitPch => "-emit-pch",
            Self::EmitModule => "-emit-module",
            Self::EmitModuleInterface => "-emit-module-interface",
        }
    }

    fn from_flag(flag: &str) -> Option<Self> {
        Some(match flag {
            "-E" => Self::Preprocess,
            "-fsyntax-only" => Self::SyntaxOnly,
            "-emit-obj" => Self::EmitObj,
            "-S" => Self::EmitAssembly,
            "-emit-pch" => Self::EmitPch,
            "-emit-module" => Self::EmitModule,
            "-emit-module-interface" => Self::EmitModuleInterface,
            _ => return None,
        })
    }
}

/// A `-D` or `-U` option, in command-line order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroOp {
    Define(String),
    Undef(String),
}

/// Header search configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSearchOptions {
    /// `-iquote` directories, searched for quoted includes only.
    pub quote_dirs: Vec<PathBuf>,
    /// `-I` directories.
    pub angled_dirs: Vec<PathBuf>,
    /// `-isystem` directories.
    pub system_dirs: Vec<PathBuf>,
    pub sysroot: Option<PathBuf>,
}

/// A `-fmodule-file=[<name>=]<path>` option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFileArg {
    pub name: Option<String>,
    pub path: PathBuf,
}

impl ModuleFileArg {
    fn parse(value: &str) -> Self {
        match value.split_once('=') {
            Some((name, path)) if !name.is_empty() => Self {
                name: Some(name.to_string()),
                path: PathBuf::from(path),
            },
            _ => Self {
                name: None,
                path: PathBuf::from(value),
            },
        }
    }

    pub fn to_arg(&self) -> String {
        match &self.name {
            Some(name) => format!("-fmodule-file={}={}", name, self.path.display()),
            None => format!("-fmodule-file={}", self.path.display()),
        }
    }
}

/// Clang module options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOptions {
    /// `-fmodules`
    pub enabled: bool,
    /// Cleared by `-fno-implicit-modules`.
    pub implicit_modules: bool,
    /// `-fimplicit-module-maps`
    pub implicit_module_maps: bool,
    pub module_map_files: Vec<PathBuf>,
    pub module_files: Vec<ModuleFileArg>,
    /// `-fmodule-name=`: the module the invocation builds or belongs to.
    pub module_name: Option<String>,
    pub cache_path: Option<PathBuf>,
}

impl Default for ModuleOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            implicit_modules: true,
            implicit_module_maps: false,
            module_map_files: Vec::new(),
            module_files: Vec::new(),
            module_name: None,
            cache_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreprocessorOptions {
    pub macros: Vec<MacroOp>,
    /// `-include` files, in order.
    pub includes: Vec<PathBuf>,
    /// `-include-pch`
    pub implicit_pch: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticOptions {
    /// `-W` options without the prefix.
    pub warnings: Vec<String>,
    /// `-w`
    pub ignore_warnings: bool,
    /// `--serialize-diagnostics`
    pub serialize_file: Option<PathBuf>,
}

/// Make-style dependency file options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyOutputOptions {
    /// `-dependency-file`
    pub output_file: Option<PathBuf>,
    /// `-MT` targets.
    pub targets: Vec<String>,
    /// `-sys-header-deps`
    pub include_system_headers: bool,
    /// `-MP`
    pub phony_targets: bool,
}

/// Options that take a separate value and are kept verbatim.
const PASSTHROUGH_WITH_VALUE: &[&str] = &[
    "-triple",
    "-aux-triple",
    "-target-cpu",
    "-target-feature",
    "-target-abi",
    "-resource-dir",
    "-mllvm",
    "-mrelocation-model",
    "-pic-level",
];

/// Options that only describe the file being compiled; kept out of the
/// module context hash.
const PER_FILE_WITH_VALUE: &[&str] = &[
    "-main-file-name",
    "-fdebug-compilation-dir",
    "-coverage-notes-file",
    "-coverage-data-file",
];

/// A compiler front-end invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerInvocation {
    pub executable: String,
    pub action: FrontendAction,
    /// `-x`
    pub language: Option<String>,
    /// `-std=`
    pub lang_std: Option<String>,
    pub inputs: Vec<PathBuf>,
    /// `-o`
    pub output_file: Option<String>,
    pub header_search: HeaderSearchOptions,
    pub preprocessor: PreprocessorOptions,
    pub modules: ModuleOptions,
    pub diagnostics: DiagnosticOptions,
    pub dependency_output: DependencyOutputOptions,
    /// Unmodelled options that affect code generation.
    pub extra_args: Vec<String>,
    /// Unmodelled options that only name the current file.
    pub file_args: Vec<String>,
}

fn missing_value(flag: &str) -> ScanError {
    ScanError::diagnostics(format!(
        "error: argument to '{flag}' is missing (expected 1 value)\n"
    ))
}

impl CompilerInvocation {
    /// Parse a `-cc1` argument list (without the executable).
    pub fn parse(executable: impl Into<String>, args: &[String]) -> Result<Self, ScanError> {
        let mut iter = args.iter();
        if iter.next().map(String::as_str) != Some("-cc1") {
            return Err(ScanError::Other {
                message: format!("not a compiler front-end invocation: '{}'", args.join(" ")),
            });
        }

        let mut inv = Self {
            executable: executable.into(),
            ..Self::default()
        };
        while let Some(arg) = iter.next() {
            let arg = arg.as_str();
            let mut value = |flag: &str| iter.next().cloned().ok_or_else(|| missing_value(flag));

            if let Some(action) = FrontendAction::from_flag(arg) {
                inv.action = action;
                continue;
            }
            match arg {
                "-o" => inv.output_file = Some(value(arg)?),
                "-x" => inv.language = Some(value(arg)?),
                "-I" => inv.header_search.angled_dirs.push(value(arg)?.into()),
                "-iquote" => inv.header_search.quote_dirs.push(value(arg)?.into()),
                "-isystem" => inv.header_search.system_dirs.push(value(arg)?.into()),
                "-isysroot" => inv.header_search.sysroot = Some(value(arg)?.into()),
                "-D" => inv.preprocessor.macros.push(MacroOp::Define(value(arg)?)),
                "-U" => inv.preprocessor.macros.push(MacroOp::Undef(value(arg)?)),
                "-include" => inv.preprocessor.includes.push(value(arg)?.into()),
                "-include-pch" => inv.preprocessor.implicit_pch = Some(value(arg)?.into()),
                "-fmodules" => inv.modules.enabled = true,
                "-fimplicit-module-maps" => inv.modules.implicit_module_maps = true,
                "-fno-implicit-module-maps" => inv.modules.implicit_module_maps = false,
                "-fno-implicit-modules" => inv.modules.implicit_modules = false,
                "-w" => inv.diagnostics.ignore_warnings = true,
                "--serialize-diagnostics" => {
                    inv.diagnostics.serialize_file = Some(value(arg)?.into())
                }
                "-dependency-file" => inv.dependency_output.output_file = Some(value(arg)?.into()),
                "-MT" => inv.dependency_output.targets.push(value(arg)?),
                "-sys-header-deps" => inv.dependency_output.include_system_headers = true,
                "-MP" => inv.dependency_output.phony_targets = true,
                _ if PASSTHROUGH_WITH_VALUE.contains(&arg) => {
                    let v = value(arg)?;
                    inv.extra_args.extend([arg.to_string(), v]);
                }
                _ if PER_FILE_WITH_VALUE.contains(&arg) => {
                    let v = value(arg)?;
                    inv.file_args.extend([arg.to_string(), v]);
                }
                _ => inv.parse_joined(arg),
            }
        }
        Ok(inv)
    }

    fn parse_joined(&mut self, arg: &str) {
        if let Some(v) = arg.strip_prefix("-std=") {
            self.lang_std = Some(v.to_string());
        } else if let Some(v) = arg.strip_prefix("-fmodule-map-file=") {
            self.modules.module_map_files.push(v.into());
        } else if let Some(v) = arg.strip_prefix("-fmodule-file=") {
            self.modules.module_files.push(ModuleFileArg::parse(v));
        } else if let Some(v) = arg.strip_prefix("-fmodule-name=") {
            self.modules.module_name = Some(v.to_string());
        } else if let Some(v) = arg.strip_prefix("-fmodules-cache-path=") {
            self.modules.cache_path = Some(v.into());
        } else if let Some(v) = arg.strip_prefix("-I") {
            self.header_search.angled_dirs.push(v.into());
        } else if let Some(v) = arg.strip_prefix("-D") {
            self.preprocessor.macros.push(MacroOp::Define(v.to_string()));
        } else if let Some(v) = arg.strip_prefix("-U") {
            self.preprocessor.macros.push(MacroOp::Undef(v.to_string()));
        } else if let Some(v) = arg.strip_prefix("-W") {
            self.diagnostics.warnings.push(v.to_string());
        } else if arg.starts_with('-') && arg != "-" {
            self.extra_args.push(arg.to_string());
        } else {
            self.inputs.push(arg.into());
        }
    }

    /// The `-cc1` argument list, without the executable.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["-cc1".to_string()];
        args.extend(self.extra_args.iter().cloned());
        args.extend(self.file_args.iter().cloned());
        args.push(self.action.flag().to_string());
        if let Some(lang) = &self.language {
            args.extend(["-x".to_string(), lang.clone()]);
        }
        if let Some(std) = &self.lang_std {
            args.push(format!("-std={std}"));
        }

        let hs = &self.header_search;
        if let Some(sysroot) = &hs.sysroot {
            args.extend(["-isysroot".to_string(), path_arg(sysroot)]);
        }
        for dir in &hs.quote_dirs {
            args.extend(["-iquote".to_string(), path_arg(dir)]);
        }
        for dir in &hs.angled_dirs {
            args.extend(["-I".to_string(), path_arg(dir)]);
        }
        for dir in &hs.system_dirs {
            args.extend(["-isystem".to_string(), path_arg(dir)]);
        }

        for op in &self.preprocessor.macros {
            match op {
                MacroOp::Define(def) => args.extend(["-D".to_string(), def.clone()]),
                MacroOp::Undef(name) => args.extend(["-U".to_string(), name.clone()]),
            }
        }
        for include in &self.preprocessor.includes {
            args.extend(["-include".to_string(), path_arg(include)]);
        }
        if let Some(pch) = &self.preprocessor.implicit_pch {
            args.extend(["-include-pch".to_string(), path_arg(pch)]);
        }

        let m = &self.modules;
        if m.enabled {
            args.push("-fmodules".to_string());
        }
        if m.implicit_module_maps {
            args.push("-fimplicit-module-maps".to_string());
        }
        if !m.implicit_modules {
            args.push("-fno-implicit-modules".to_string());
        }
        if let Some(name) = &m.module_name {
            args.push(format!("-fmodule-name={name}"));
        }
        if let Some(path) = &m.cache_path {
            args.push(format!("-fmodules-cache-path={}", path.display()));
        }
        for map in &m.module_map_files {
            args.push(format!("-fmodule-map-file={}", map.display()));
        }
        for file in &m.module_files {
            args.push(file.to_arg());
        }

        let d = &self.diagnostics;
        if d.ignore_warnings {
            args.push("-w".to_string());
        }
        for warning in &d.warnings {
            args.push(format!("-W{warning}"));
        }
        if let Some(file) = &d.serialize_file {
            args.extend(["--serialize-diagnostics".to_string(), path_arg(file)]);
        }

        let dep = &self.dependency_output;
        if let Some(file) = &dep.output_file {
            args.extend(["-dependency-file".to_string(), path_arg(file)]);
        }
        for target in &dep.targets {
            args.extend(["-MT".to_string(), target.clone()]);
        }
        if dep.include_system_headers {
            args.push("-sys-header-deps".to_string());
        }
        if dep.phony_targets {
            args.push("-MP".to_string());
        }

        if let Some(out) = &self.output_file {
            args.extend(["-o".to_string(), out.clone()]);
        }
        args.extend(self.inputs.iter().map(|p| path_arg(p)));
        args
    }

    /// The first input file.
    pub fn main_input(&self) -> Option<&Path> {
        self.inputs.first().map(PathBuf::as_path)
    }

    /// Whether the input language is C++ or Objective-C++.
    pub fn is_cplusplus(&self) -> bool {
        match self.language.as_deref() {
            Some(lang) => lang.contains("c++"),
            None => self
                .main_input()
                .and_then(|p| p.extension())
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, "cc" | "cpp" | "cxx" | "C" | "c++" | "cppm" | "ixx" | "mm" | "hpp" | "hh" | "hxx")),
        }
    }

    /// Hash identifying the configuration modules are built under.
    ///
    /// With `strict`, header search and diagnostic options are included, so
    /// builds differing only in those never share a module.
    pub fn module_context_hash(&self, strict: bool) -> String {
        self.module_context_hash_with_deps(strict, &[])
    }

    /// [`module_context_hash`] that also covers the modules a module build
    /// loads, so rebuilding a dependency under another context yields a
    /// distinct id.
    ///
    /// [`module_context_hash`]: CompilerInvocation::module_context_hash
    pub fn module_context_hash_with_deps(&self, strict: bool, deps: &[ModuleId]) -> String {
        let mut hasher = blake3::Hasher::new();
        field(&mut hasher, self.language.as_deref().unwrap_or(""));
        field(&mut hasher, self.lang_std.as_deref().unwrap_or(""));
        for op in &self.preprocessor.macros {
            match op {
                MacroOp::Define(def) => field(&mut hasher, &format!("D{def}")),
                MacroOp::Undef(name) => field(&mut hasher, &format!("U{name}")),
            }
        }
        field(&mut hasher, if self.modules.enabled { "modules" } else { "" });
        for arg in &self.extra_args {
            field(&mut hasher, arg);
        }

        if strict {
            let hs = &self.header_search;
            if let Some(sysroot) = &hs.sysroot {
                field(&mut hasher, &format!("sysroot:{}", sysroot.display()));
            }
            for (prefix, dirs) in [("q", &hs.quote_dirs), ("a", &hs.angled_dirs), ("s", &hs.system_dirs)] {
                for dir in dirs {
                    field(&mut hasher, &format!("{prefix}:{}", dir.display()));
                }
            }
            for warning in &self.diagnostics.warnings {
                field(&mut hasher, &format!("W{warning}"));
            }
            field(&mut hasher, if self.diagnostics.ignore_warnings { "w" } else { "" });
        }

        for dep in deps {
            field(&mut hasher, &dep.module_name);
            field(&mut hasher, &dep.context_hash);
        }

        let digest = hasher.finalize();
        let mut low = [0u8; 8];
        low.copy_from_slice(&digest.as_bytes()[..8]);
        to_base36(u64::from_le_bytes(low))
    }
}

fn field(hasher: &mut blake3::Hasher, value: &str) {
    hasher.update(value.as_bytes());
    hasher.update(&[0]);
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.iter().rev().map(|&b| b as char).collect()
}
