//! Splitting a driver command line into the jobs it would run.

use std::path::Path;

use depscan_core::ScanError;
use tracing::debug;

use crate::diagnostics::DiagnosticsEngine;

/// Name of the tool that creates front-end jobs.
pub const COMPILER_CREATOR: &str = "clang";

/// Kind of work a driver job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Compile,
    Assemble,
    Link,
}

/// A single tool invocation produced by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverJob {
    pub kind: JobKind,
    /// Name of the tool that created the job.
    pub creator: String,
    pub executable: String,
    pub arguments: Vec<String>,
}

impl DriverJob {
    /// Whether the job runs the compiler front end and can be scanned.
    pub fn is_compiler_job(&self) -> bool {
        self.creator == COMPILER_CREATOR
    }
}

/// Turns a driver command line into jobs.
pub trait Driver: Send + Sync + std::fmt::Debug {
    /// Build every job for `args`, where `args[0]` is the executable.
    fn build_jobs(
        &self,
        args: &[String],
        diags: &mut DiagnosticsEngine,
    ) -> Result<Vec<DriverJob>, ScanError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Preprocess,
    SyntaxOnly,
    Assemble,
    Compile,
    Precompile,
    Link,
}

/// Classified input file.
#[derive(Debug, Clone)]
struct Input {
    path: String,
    lang: String,
}

impl Input {
    fn is_source(&self) -> bool {
        !matches!(self.lang.as_str(), "assembler" | "object")
    }

    fn is_header(&self) -> bool {
        self.lang.ends_with("-header")
    }
}

fn language_for(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    match ext {
        "c" | "i" => "c",
        "cc" | "cpp" | "cxx" | "C" | "c++" | "ii" => "c++",
        "m" => "objective-c",
        "mm" => "objective-c++",
        "h" => "c-header",
        "hh" | "hpp" | "hxx" | "H" => "c++-header",
        "cppm" | "ixx" => "c++-module",
        "s" => "assembler",
        "S" => "assembler-with-cpp",
        _ => "object",
    }
}

fn stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "a".to_string())
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Dependency file options given to the driver.
#[derive(Debug, Default)]
struct DepFileArgs {
    enabled: bool,
    system_headers: bool,
    file: Option<String>,
    targets: Vec<String>,
    phony: bool,
}

/// A GCC-compatible driver covering C-family compiles, assembly and links.
#[derive(Debug, Default, Clone)]
pub struct GenericDriver;

impl GenericDriver {
    pub fn new() -> Self {
        Self
    }
}

/// Options consumed only by the driver's cache management; they never
/// reach a front-end job.
const DRIVER_ONLY_PREFIXES: &[&str] = &[
    "-fmodules-prune-interval=",
    "-fmodules-prune-after=",
    "-fbuild-session-file=",
    "-fbuild-session-timestamp=",
];

/// Options taking a value that may also be written joined (`-isystem/usr`).
/// Longer spellings come first so `-include-pch` is not read as `-include`.
const JOINED_VALUE_FLAGS: &[&str] = &[
    "-include-pch",
    "-include",
    "-isysroot",
    "-isystem",
    "-iquote",
    "-MF",
    "-MT",
    "-MQ",
];

impl Driver for GenericDriver {
    fn build_jobs(
        &self,
        args: &[String],
        diags: &mut DiagnosticsEngine,
    ) -> Result<Vec<DriverJob>, ScanError> {
        let Some((executable, rest)) = args.split_first() else {
            return Err(ScanError::diagnostics("error: empty command line\n"));
        };

        if rest.first().is_some_and(|a| a == "-cc1") {
            return Ok(vec![DriverJob {
                kind: JobKind::Compile,
                creator: COMPILER_CREATOR.to_string(),
                executable: executable.clone(),
                arguments: rest.to_vec(),
            }]);
        }

        let mut phase = Phase::Link;
        let mut output: Option<String> = None;
        let mut triple: Option<String> = None;
        let mut forced_lang: Option<String> = None;
        let mut modules = false;
        let mut implicit_maps: Option<bool> = None;
        let mut deps = DepFileArgs::default();
        let mut common: Vec<String> = Vec::new();
        let mut link_args: Vec<String> = Vec::new();
        let mut inputs: Vec<Input> = Vec::new();

        let mut iter = rest.iter();
        while let Some(arg) = iter.next() {
            let arg = arg.as_str();
            let mut value = |flag: &str| {
                iter.next().cloned().ok_or_else(|| {
                    ScanError::diagnostics(format!(
                        "error: argument to '{flag}' is missing (expected 1 value)\n"
                    ))
                })
            };
            match arg {
                "-c" => phase = Phase::Compile,
                "-S" => phase = Phase::Assemble,
                "-E" => phase = Phase::Preprocess,
                "-fsyntax-only" => phase = Phase::SyntaxOnly,
                "--precompile" => phase = Phase::Precompile,
                "-o" => output = Some(value(arg)?),
                "-x" => {
                    let lang = value(arg)?;
                    forced_lang = (lang != "none").then_some(lang);
                }
                "-target" => triple = Some(value(arg)?),
                "-I" | "-iquote" | "-isystem" | "-isysroot" | "-D" | "-U" | "-include"
                | "-include-pch" | "--serialize-diagnostics" => {
                    let v = value(arg)?;
                    common.extend([arg.to_string(), v]);
                }
                "-fmodules" => modules = true,
                "-fimplicit-module-maps" => implicit_maps = Some(true),
                "-fno-implicit-module-maps" => implicit_maps = Some(false),
                "-MD" => {
                    deps.enabled = true;
                    deps.system_headers = true;
                }
                "-MMD" => deps.enabled = true,
                "-MF" => deps.file = Some(value(arg)?),
                "-MT" | "-MQ" => deps.targets.push(value(arg)?),
                "-MP" => deps.phony = true,
                "-shared" | "-static" | "-rdynamic" => link_args.push(arg.to_string()),
                "-pthread" => {
                    common.push(arg.to_string());
                    link_args.push(arg.to_string());
                }
                "-" => inputs.push(Input {
                    path: arg.to_string(),
                    lang: forced_lang.clone().unwrap_or_else(|| "c".to_string()),
                }),
                _ => {
                    if let Some(t) = arg.strip_prefix("--target=") {
                        triple = Some(t.to_string());
                    } else if let Some((flag, v)) = split_joined(arg) {
                        match flag {
                            "-MF" => deps.file = Some(v.to_string()),
                            "-MT" | "-MQ" => deps.targets.push(v.to_string()),
                            _ => common.extend([flag.to_string(), v.to_string()]),
                        }
                    } else if arg.starts_with("-l") || arg.starts_with("-L") || arg.starts_with("-Wl,") {
                        link_args.push(arg.to_string());
                    } else if DRIVER_ONLY_PREFIXES.iter().any(|p| arg.starts_with(p))
                        || arg == "-fmodules-validate-once-per-build-session"
                    {
                        debug!(arg, "Dropping driver-only option");
                    } else if arg.starts_with('-') {
                        if is_front_end_flag(arg) {
                            common.push(arg.to_string());
                        } else {
                            diags.warning(format!(
                                "argument unused during compilation: '{arg}'"
                            ));
                        }
                    } else {
                        let lang = match &forced_lang {
                            Some(lang) => lang.clone(),
                            None => language_for(arg).to_string(),
                        };
                        inputs.push(Input {
                            path: arg.to_string(),
                            lang,
                        });
                    }
                }
            }
        }

        if inputs.is_empty() {
            return Err(ScanError::diagnostics("error: no input files\n"));
        }
        if output.is_some() && phase != Phase::Link && inputs.iter().filter(|i| i.is_source()).count() > 1 {
            return Err(ScanError::diagnostics(
                "error: cannot specify -o when generating multiple output files\n",
            ));
        }

        if modules {
            common.push("-fmodules".to_string());
        }
        if implicit_maps.unwrap_or(modules) {
            common.push("-fimplicit-module-maps".to_string());
        }

        let mut jobs = Vec::new();
        let mut objects = Vec::new();
        for input in &inputs {
            if input.lang == "object" {
                if phase == Phase::Link {
                    objects.push(input.path.clone());
                } else {
                    diags.warning(format!(
                        "{}: 'linker' input unused",
                        input.path
                    ));
                }
                continue;
            }

            if input.lang == "assembler" {
                if matches!(phase, Phase::Compile | Phase::Link) {
                    let object = object_output(&input.path, phase, output.as_deref());
                    jobs.push(assemble_job(executable, triple.as_deref(), &input.path, &object));
                    objects.push(object);
                } else {
                    diags.warning(format!("{}: 'assembler' input unused", input.path));
                }
                continue;
            }

            let (action, out) = compile_output(input, phase, output.as_deref());
            let mut arguments = vec!["-cc1".to_string()];
            if let Some(triple) = &triple {
                arguments.extend(["-triple".to_string(), triple.clone()]);
            }
            arguments.push(action.to_string());
            arguments.extend(["-main-file-name".to_string(), file_name(&input.path)]);
            arguments.extend(common.iter().cloned());
            if deps.enabled {
                let dep_file = deps.file.clone().unwrap_or_else(|| {
                    let base = out.as_deref().filter(|o| *o != "-").unwrap_or(&input.path);
                    Path::new(base).with_extension("d").to_string_lossy().into_owned()
                });
                arguments.extend(["-dependency-file".to_string(), dep_file]);
                for target in &deps.targets {
                    arguments.extend(["-MT".to_string(), target.clone()]);
                }
                if deps.system_headers {
                    arguments.push("-sys-header-deps".to_string());
                }
                if deps.phony {
                    arguments.push("-MP".to_string());
                }
            }
            if let Some(out) = &out {
                arguments.extend(["-o".to_string(), out.clone()]);
            }
            arguments.extend(["-x".to_string(), input.lang.clone(), input.path.clone()]);
            jobs.push(DriverJob {
                kind: JobKind::Compile,
                creator: COMPILER_CREATOR.to_string(),
                executable: executable.clone(),
                arguments,
            });
            // Only object files reach the linker; a header stops at its PCH.
            if let Some(out) = out.filter(|_| action == "-emit-obj") {
                objects.push(out);
            }
        }

        if phase == Phase::Link {
            let mut arguments = vec![
                "-o".to_string(),
                output.unwrap_or_else(|| "a.out".to_string()),
            ];
            arguments.extend(objects);
            arguments.extend(link_args);
            jobs.push(DriverJob {
                kind: JobKind::Link,
                creator: "gnu::Linker".to_string(),
                executable: "ld".to_string(),
                arguments,
            });
        }

        debug!(jobs = jobs.len(), "Built driver jobs");
        Ok(jobs)
    }
}

fn split_joined(arg: &str) -> Option<(&'static str, &str)> {
    JOINED_VALUE_FLAGS.iter().find_map(|flag| {
        arg.strip_prefix(flag)
            .filter(|value| !value.is_empty())
            .map(|value| (*flag, value))
    })
}

fn is_front_end_flag(arg: &str) -> bool {
    ["-f", "-m", "-O", "-g", "-W", "-w", "-std=", "-pedantic", "-nostd", "-I", "-D", "-U"]
        .iter()
        .any(|p| arg.starts_with(p))
}

fn temp_object(input: &str) -> String {
    std::env::temp_dir()
        .join(format!("{}-depscan.o", stem(input)))
        .to_string_lossy()
        .into_owned()
}

fn object_output(input: &str, phase: Phase, output: Option<&str>) -> String {
    match (phase, output) {
        (Phase::Compile, Some(out)) => out.to_string(),
        (Phase::Compile, None) => format!("{}.o", stem(input)),
        _ => temp_object(input),
    }
}

fn compile_output(input: &Input, phase: Phase, output: Option<&str>) -> (&'static str, Option<String>) {
    if input.is_header() && matches!(phase, Phase::Compile | Phase::Link) {
        let out = output
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.gch", input.path));
        return ("-emit-pch", Some(out));
    }
    match phase {
        Phase::Preprocess => ("-E", Some(output.unwrap_or("-").to_string())),
        Phase::SyntaxOnly => ("-fsyntax-only", None),
        Phase::Assemble => (
            "-S",
            Some(output.map(str::to_string).unwrap_or_else(|| format!("{}.s", stem(&input.path)))),
        ),
        Phase::Precompile => (
            "-emit-module-interface",
            Some(output.map(str::to_string).unwrap_or_else(|| format!("{}.pcm", stem(&input.path)))),
        ),
        Phase::Compile | Phase::Link => ("-emit-obj", Some(object_output(&input.path, phase, output))),
    }
}

fn assemble_job(executable: &str, triple: Option<&str>, input: &str, object: &str) -> DriverJob {
    let mut arguments = vec!["-cc1as".to_string()];
    if let Some(triple) = triple {
        arguments.extend(["-triple".to_string(), triple.to_string()]);
    }
    arguments.extend([
        "-filetype".to_string(),
        "obj".to_string(),
        "-o".to_string(),
        object.to_string(),
        input.to_string(),
    ]);
    DriverJob {
        kind: JobKind::Assemble,
        creator: "clang::as".to_string(),
        executable: executable.to_string(),
        arguments,
    }
}
