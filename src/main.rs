//! depscan - Scan the dependencies of every entry of a compilation database.
//!
//! Usage:
//!   depscan -c compile_commands.json                  Make rules per translation unit
//!   depscan -c compile_commands.json --format full    Module graph as JSON
//!   depscan -c compile_commands.json --format tree    Content-addressed tree ids
//!   depscan --help                                    Show help

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use color_eyre::eyre::{Context, Result, bail, eyre};
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use depscan_core::{
    AlreadySeen, CasId, FullDependencies, IncludeTreeRoot, ModuleDeps, ModuleId, ModuleOutputKind,
    ScanError, ScanningMode, ScanningOutputFormat, ServiceConfig,
};
use depscan_scan::{DependencyScanningService, DependencyScanningTool, default_module_output};

#[derive(Parser)]
#[command(
    name = "depscan",
    version,
    about = "Fast dependency scanner for C-family translation units",
    long_about = "depscan reports, for every entry of a compilation database, the files, \
                  prebuilt modules and module builds the translation unit needs, \
                  without compiling it."
)]
struct Cli {
    /// Compilation database to scan
    #[arg(short = 'c', long, default_value = "compile_commands.json")]
    compilation_database: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "make")]
    format: Format,

    /// How source files are read
    #[arg(short, long, value_enum, default_value = "directives")]
    mode: Mode,

    /// Number of scanning threads (0 uses every core)
    #[arg(short = 'j', long, default_value = "0")]
    jobs: usize,

    /// Drop header search paths module builds never used
    #[arg(long)]
    optimize_args: bool,

    /// Load module dependencies by file instead of by name
    #[arg(long = "eager-load-pcm")]
    eager_load_pcm: bool,

    /// Directory module outputs are placed in
    #[arg(long, default_value = "module-cache")]
    module_files_dir: PathBuf,

    /// On-disk object store for tree and include-tree formats
    #[arg(long)]
    cas_path: Option<PathBuf>,

    /// Scan the named module instead of each entry's input file
    #[arg(long)]
    module_name: Option<String>,

    /// Start every scan with a fresh file manager
    #[arg(long)]
    no_reuse_filemanager: bool,

    /// Write output to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Make,
    Full,
    FullTree,
    Tree,
    IncludeTree,
}

impl From<Format> for ScanningOutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Make => ScanningOutputFormat::Make,
            Format::Full => ScanningOutputFormat::Full,
            Format::FullTree => ScanningOutputFormat::FullTree,
            Format::Tree => ScanningOutputFormat::Tree,
            Format::IncludeTree => ScanningOutputFormat::IncludeTree,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Preprocess,
    Directives,
}

impl From<Mode> for ScanningMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Preprocess => ScanningMode::CanonicalPreprocessing,
            Mode::Directives => ScanningMode::DependencyDirectivesScan,
        }
    }
}

/// One entry of a JSON compilation database.
#[derive(Debug, Clone, Deserialize)]
struct CompileCommand {
    directory: PathBuf,
    file: PathBuf,
    #[serde(default)]
    arguments: Option<Vec<String>>,
    #[serde(default)]
    command: Option<String>,
}

impl CompileCommand {
    fn command_line(&self) -> Result<Vec<String>> {
        match (&self.arguments, &self.command) {
            (Some(arguments), _) => Ok(arguments.clone()),
            (None, Some(command)) => Ok(split_command(command)),
            (None, None) => bail!("entry for {} has neither arguments nor command", self.file.display()),
        }
    }
}

/// Result of scanning one entry.
enum ScanOutput {
    Make(String),
    Full(FullDependencies, Vec<ModuleDeps>),
    Tree(CasId),
    IncludeTree(IncludeTreeRoot),
}

#[derive(Serialize)]
struct TranslationUnit<'a> {
    file: &'a Path,
    #[serde(flatten)]
    deps: FullDependencies,
}

#[derive(Serialize)]
struct FullOutput<'a> {
    modules: Vec<ModuleDeps>,
    #[serde(rename = "translation-units")]
    translation_units: Vec<TranslationUnit<'a>>,
}

#[derive(Serialize)]
struct TreeOutput<'a> {
    file: &'a Path,
    #[serde(rename = "casfs-root-id")]
    root: CasId,
}

#[derive(Serialize)]
struct IncludeTreeOutput<'a> {
    file: &'a Path,
    #[serde(flatten)]
    tree: IncludeTreeRoot,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let database = load_database(&cli.compilation_database)?;
    eprintln!("Scanning {} translation units...", database.len());

    let format: ScanningOutputFormat = cli.format.into();
    let config = ServiceConfig::builder()
        .format(format)
        .mode(ScanningMode::from(cli.mode))
        .optimize_args(cli.optimize_args)
        .eager_load_modules(cli.eager_load_pcm)
        .reuse_file_manager(!cli.no_reuse_filemanager)
        .cas_path(cli.cas_path.clone())
        .build()
        .map_err(|e| eyre!("Invalid configuration: {e}"))?;
    let service = DependencyScanningService::new(config).context("Failed to create scanning service")?;

    let module_dir = std::env::current_dir()
        .context("Failed to read current directory")?
        .join(&cli.module_files_dir);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cli.jobs)
        .build()
        .context("Failed to build thread pool")?;

    let results: Vec<Result<ScanOutput, ScanError>> = pool.install(|| {
        database
            .par_iter()
            .map_init(
                || (DependencyScanningTool::new(&service), AlreadySeen::new()),
                |(tool, seen), entry| {
                    scan_entry(tool, seen, entry, format, &module_dir, cli.module_name.as_deref())
                },
            )
            .collect()
    });

    let mut failures = 0;
    let mut outputs = Vec::with_capacity(results.len());
    for (entry, result) in database.iter().zip(results) {
        match result {
            Ok(output) => outputs.push((entry.file.as_path(), output)),
            Err(e) => {
                failures += 1;
                warn!(file = %entry.file.display(), "Scan failed");
                eprintln!("error: {}: {e}", entry.file.display());
            }
        }
    }

    let rendered = render(outputs)?;
    match &cli.output {
        Some(path) => {
            std::fs::write(path, rendered).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => print!("{rendered}"),
    }

    if failures > 0 {
        bail!("{failures} of {} scans failed", database.len());
    }
    Ok(())
}

/// Read a JSON compilation database.
fn load_database(path: &Path) -> Result<Vec<CompileCommand>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read compilation database {}", path.display()))?;
    let database: Vec<CompileCommand> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid compilation database {}", path.display()))?;
    debug!(entries = database.len(), "Loaded compilation database");
    Ok(database)
}

/// Scan one database entry with the calling thread's tool.
fn scan_entry(
    tool: &mut DependencyScanningTool,
    seen: &mut AlreadySeen,
    entry: &CompileCommand,
    format: ScanningOutputFormat,
    module_dir: &Path,
    module_name: Option<&str>,
) -> Result<ScanOutput, ScanError> {
    let command_line = entry.command_line().map_err(|e| ScanError::InvalidConfig {
        message: e.to_string(),
    })?;
    let cwd = entry.directory.as_path();

    match format {
        ScanningOutputFormat::Make => tool.get_dependency_file(&command_line, cwd).map(ScanOutput::Make),
        ScanningOutputFormat::Tree => tool.get_dependency_tree(&command_line, cwd).map(ScanOutput::Tree),
        ScanningOutputFormat::IncludeTree => {
            tool.get_include_tree(&command_line, cwd).map(ScanOutput::IncludeTree)
        }
        ScanningOutputFormat::Full | ScanningOutputFormat::FullTree => {
            let module_dir = module_dir.to_path_buf();
            let lookup = move |id: &ModuleId, kind: ModuleOutputKind| default_module_output(&module_dir, id, kind);
            let result = tool.get_full_dependencies(&command_line, cwd, seen, &lookup, module_name)?;
            Ok(ScanOutput::Full(result.full_deps, result.discovered_modules))
        }
    }
}

/// Render scan outputs in database order.
fn render(outputs: Vec<(&Path, ScanOutput)>) -> Result<String> {
    let mut make = String::new();
    let mut modules: IndexMap<ModuleId, ModuleDeps> = IndexMap::new();
    let mut translation_units = Vec::new();
    let mut trees = Vec::new();
    let mut include_trees = Vec::new();

    for (file, output) in outputs {
        match output {
            ScanOutput::Make(rule) => make.push_str(&rule),
            ScanOutput::Full(deps, discovered) => {
                // Threads keep separate seen sets, so a module may be reported twice.
                for module in discovered {
                    modules.entry(module.id.clone()).or_insert(module);
                }
                translation_units.push(TranslationUnit { file, deps });
            }
            ScanOutput::Tree(root) => trees.push(TreeOutput { file, root }),
            ScanOutput::IncludeTree(tree) => include_trees.push(IncludeTreeOutput { file, tree }),
        }
    }

    if !translation_units.is_empty() {
        modules.sort_keys();
        let full = FullOutput {
            modules: modules.into_values().collect(),
            translation_units,
        };
        return Ok(serde_json::to_string_pretty(&full)? + "\n");
    }
    if !trees.is_empty() {
        return Ok(serde_json::to_string_pretty(&trees)? + "\n");
    }
    if !include_trees.is_empty() {
        return Ok(serde_json::to_string_pretty(&include_trees)? + "\n");
    }
    Ok(make)
}

/// Split a shell command string into arguments.
///
/// Handles single and double quotes and backslash escapes, which covers
/// what build systems write into compilation databases.
fn split_command(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_arg = true;
                for c in chars.by_ref() {
                    if c == '\'' {
                        break;
                    }
                    current.push(c);
                }
            }
            '"' => {
                in_arg = true;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => {
                            if let Some(next) = chars.next() {
                                current.push(next);
                            }
                        }
                        _ => current.push(c),
                    }
                }
            }
            '\\' => {
                in_arg = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            c => {
                in_arg = true;
                current.push(c);
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}
