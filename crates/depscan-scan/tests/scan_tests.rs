use depscan_fs::{
    CasTree, InMemoryFileSystem, InMemoryObjectStore, Object, ObjectStore, RemapPath, ScanFilesystem,
    SharedCasCache,
};
use depscan_scan::{
    AlreadySeen, CasError, CasId, CompilerInvocation, DependencyScanningService, DependencyScanningTool,
    DiagnosticsEngine, FullDependenciesResult, LookupModuleOutput, MakeDependencyPrinterConsumer,
    ModuleId, ModuleOutputKind, ScanError, ScanningAction, ScanningOutputFormat, ServiceConfig,
    TreeConsumer, default_module_output,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MODULE_MAP: &str = "module Foo { header \"foo.h\" }\nmodule Bar { header \"bar.h\" }\n";

fn files(list: &[(&str, &str)]) -> Arc<InMemoryFileSystem> {
    let memory = Arc::new(InMemoryFileSystem::new());
    for (path, contents) in list {
        memory.add_file(path, *contents);
    }
    memory
}

fn module_files() -> Arc<InMemoryFileSystem> {
    files(&[
        ("/src/a.m", "@import Foo;\nint a;\n"),
        ("/src/b.m", "#include <foo.h>\nint b;\n"),
        ("/inc/module.modulemap", MODULE_MAP),
        ("/inc/foo.h", "#include \"bar.h\"\n"),
        ("/inc/bar.h", "int bar;\n"),
        ("/other/unused.h", ""),
    ])
}

fn tool(format: ScanningOutputFormat, base: Arc<InMemoryFileSystem>) -> DependencyScanningTool {
    let service = DependencyScanningService::new(ServiceConfig::new(format)).unwrap();
    DependencyScanningTool::with_file_system(&service, base)
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn lookup() -> Box<LookupModuleOutput> {
    Box::new(|id: &ModuleId, kind: ModuleOutputKind| default_module_output(Path::new("/out"), id, kind))
}

fn full(
    tool: &mut DependencyScanningTool,
    cmd: &[&str],
    seen: &mut AlreadySeen,
) -> Result<FullDependenciesResult, ScanError> {
    let lookup = lookup();
    tool.get_full_dependencies(&args(cmd), Path::new("/src"), seen, &*lookup, None)
}

#[test]
fn test_plain_include_make_rule() {
    let base = files(&[
        ("/src/main.c", "#include \"a.h\"\n#include <sys.h>\n"),
        ("/src/a.h", "#pragma once\n"),
        ("/sys/sys.h", "#include \"a.h\"\n"),
        ("/sys/a.h", ""),
    ]);
    let mut tool = tool(ScanningOutputFormat::Make, base);
    let rule = tool
        .get_dependency_file(&args(&["clang", "-c", "main.c", "-isystem", "/sys", "-o", "main.o"]), Path::new("/src"))
        .unwrap();
    assert_eq!(rule, "main.o: /src/main.c \\\n  /src/a.h \\\n  /sys/sys.h \\\n  /sys/a.h\n");
}

#[test]
fn test_paths_are_canonical() {
    let base = files(&[
        ("/src/main.c", "#include \"./sub/../a.h\"\n#include \"a.h\"\n"),
        ("/src/a.h", ""),
        ("/src/sub/keep.h", ""),
    ]);
    let mut tool = tool(ScanningOutputFormat::Make, base);
    let rule = tool
        .get_dependency_file(&args(&["clang", "-c", "./main.c"]), Path::new("/src/sub/.."))
        .unwrap();
    assert_eq!(rule, "main.o: /src/main.c \\\n  /src/a.h\n");
}

#[test]
fn test_joined_system_include_dir() {
    let base = files(&[("/src/a.c", "#include <s.h>\n"), ("/sys/s.h", "")]);
    let mut tool = tool(ScanningOutputFormat::Make, base);
    let rule = tool
        .get_dependency_file(&args(&["clang", "-c", "a.c", "-isystem/sys"]), Path::new("/src"))
        .unwrap();
    assert_eq!(rule, "a.o: /src/a.c \\\n  /sys/s.h\n");
}

#[test]
fn test_plain_include_full_dependencies() {
    let base = files(&[("/src/a.cpp", "#include \"b.h\"\n"), ("/src/b.h", "int b;\n")]);
    let mut tool = tool(ScanningOutputFormat::Full, base);
    let mut seen = AlreadySeen::new();
    let result = full(&mut tool, &["clang", "-c", "a.cpp", "-o", "a.o"], &mut seen).unwrap();

    assert_eq!(
        result.full_deps.file_deps,
        vec![PathBuf::from("/src/a.cpp"), PathBuf::from("/src/b.h")]
    );
    assert!(result.full_deps.clang_module_deps.is_empty());
    assert!(result.full_deps.prebuilt_module_deps.is_empty());
    assert!(result.discovered_modules.is_empty());
    assert_eq!(result.full_deps.commands.len(), 1);
    assert!(seen.is_empty());
}

#[test]
fn test_new_module_is_discovered() {
    let mut tool = tool(ScanningOutputFormat::Full, module_files());
    let mut seen = AlreadySeen::new();
    let result = full(&mut tool, &["clang", "-fsyntax-only", "-fmodules", "-I", "/inc", "a.m"], &mut seen).unwrap();

    let names: Vec<&str> = result.discovered_modules.iter().map(|m| m.id.module_name.as_str()).collect();
    assert_eq!(names, vec!["Bar", "Foo"]);
    let foo = &result.discovered_modules[1];
    let bar = &result.discovered_modules[0];
    assert!(foo.imported_by_main_file);
    assert!(!bar.imported_by_main_file);
    assert_eq!(foo.clang_module_deps, vec![bar.id.clone()]);
    assert_eq!(
        foo.file_deps,
        vec![PathBuf::from("/inc/module.modulemap"), PathBuf::from("/inc/foo.h")]
    );
    assert!(foo.build_command.arguments.contains(&"-emit-module".to_string()));

    let tu = &result.full_deps;
    assert_eq!(tu.file_deps, vec![PathBuf::from("/src/a.m")]);
    assert_eq!(tu.clang_module_deps, vec![foo.id.clone()]);
    assert_eq!(tu.commands.len(), 1);
    let pcm = default_module_output(Path::new("/out"), &foo.id, ModuleOutputKind::ModuleFile);
    assert!(tu.commands[0].arguments.contains(&format!("-fmodule-file=Foo={pcm}")));
    assert_eq!(seen.len(), 2);
}

#[test]
fn test_already_seen_modules_are_not_rediscovered() {
    let mut tool = tool(ScanningOutputFormat::Full, module_files());
    let mut seen = AlreadySeen::new();
    let first = full(&mut tool, &["clang", "-fsyntax-only", "-fmodules", "-I", "/inc", "a.m"], &mut seen).unwrap();
    let second = full(&mut tool, &["clang", "-fsyntax-only", "-fmodules", "-I", "/inc", "b.m"], &mut seen).unwrap();

    assert!(second.discovered_modules.is_empty());
    assert_eq!(second.full_deps.clang_module_deps, first.full_deps.clang_module_deps);
    assert_eq!(seen.len(), 2);
}

#[test]
fn test_search_paths_change_module_identity() {
    let mut tool = tool(ScanningOutputFormat::Full, module_files());
    let mut seen = AlreadySeen::new();
    let plain = full(&mut tool, &["clang", "-fsyntax-only", "-fmodules", "-I", "/inc", "a.m"], &mut seen).unwrap();
    let extra = full(
        &mut tool,
        &["clang", "-fsyntax-only", "-fmodules", "-I", "/inc", "-I", "/other", "a.m"],
        &mut seen,
    )
    .unwrap();

    assert_ne!(plain.full_deps.clang_module_deps, extra.full_deps.clang_module_deps);
    assert_eq!(extra.discovered_modules.len(), 2);
    assert_eq!(seen.len(), 4);
}

#[test]
fn test_link_only_command_line() {
    let mut tool = tool(ScanningOutputFormat::Full, module_files());
    let mut seen = AlreadySeen::new();
    let err = full(&mut tool, &["clang", "main.o", "-o", "app"], &mut seen).unwrap_err();
    assert!(matches!(err, ScanError::NoCompilerJob { .. }));
    assert!(err.to_string().contains("clang main.o -o app"));
    assert!(seen.is_empty());
}

#[test]
fn test_commands_follow_job_order() {
    let base = files(&[("/src/a.c", ""), ("/src/b.c", "")]);
    let mut tool = tool(ScanningOutputFormat::Full, base);
    let mut seen = AlreadySeen::new();
    let result = full(&mut tool, &["clang", "a.c", "b.c", "-o", "app"], &mut seen).unwrap();

    let commands = &result.full_deps.commands;
    assert_eq!(commands.len(), 3);
    assert_eq!(commands[0].arguments.last().map(String::as_str), Some("a.c"));
    assert_eq!(commands[1].arguments.last().map(String::as_str), Some("b.c"));
    assert_eq!(commands[2].executable, "ld");
    assert_eq!(result.full_deps.file_deps, vec![PathBuf::from("/src/a.c")]);
}

#[test]
fn test_module_name_scan() {
    let mut tool = tool(ScanningOutputFormat::Full, module_files());
    let mut seen = AlreadySeen::new();
    let lookup = lookup();
    let result = tool
        .get_full_dependencies(
            &args(&["clang", "-fsyntax-only", "-fmodules", "-I", "/inc", "-x", "objective-c"]),
            Path::new("/src"),
            &mut seen,
            &*lookup,
            Some("Foo"),
        )
        .unwrap();

    assert_eq!(result.discovered_modules.len(), 2);
    assert_eq!(result.full_deps.file_deps, vec![PathBuf::from("/src/Foo")]);
    assert_eq!(result.full_deps.clang_module_deps.len(), 1);
}

#[test]
fn test_legacy_driver_command() {
    let mut tool = tool(ScanningOutputFormat::Full, module_files());
    let mut seen = AlreadySeen::new();
    let lookup = lookup();
    let cmd = args(&["clang", "-fsyntax-only", "-fmodules", "-I", "/inc", "a.m"]);
    let result = tool
        .get_full_dependencies_legacy_driver_command(&cmd, Path::new("/src"), &mut seen, &*lookup, None)
        .unwrap();

    let line = &result.full_deps.driver_command_line;
    assert!(result.full_deps.commands.is_empty());
    assert_eq!(&line[..5], &cmd[1..]);
    assert!(line.contains(&"-fno-implicit-modules".to_string()));
    assert!(line.contains(&"-fmodule-map-file=/inc/module.modulemap".to_string()));
}

#[test]
fn test_missing_header_reports_diagnostics() {
    let base = files(&[("/src/main.c", "#include \"gone.h\"\n")]);
    let mut tool = tool(ScanningOutputFormat::Make, base);
    let err = tool
        .get_dependency_file(&args(&["clang", "-c", "main.c"]), Path::new("/src"))
        .unwrap_err();
    assert!(matches!(err, ScanError::Diagnostics { .. }));
    assert!(err.to_string().contains("'gone.h' file not found"));
}

#[test]
fn test_dependency_tree_records_accessed_files() {
    let base = files(&[("/src/main.c", "#include \"a.h\"\n"), ("/src/a.h", "")]);
    let service = DependencyScanningService::new(ServiceConfig::new(ScanningOutputFormat::Tree)).unwrap();
    let mut tool = DependencyScanningTool::with_file_system(&service, base);
    let root = tool
        .get_dependency_tree(&args(&["clang", "-c", "main.c"]), Path::new("/src"))
        .unwrap();

    let tree = service.store().unwrap().resolve_tree(&root).unwrap();
    assert!(tree.get(Path::new("/src/main.c")).is_some());
    assert!(tree.get(Path::new("/src/a.h")).is_some());
}

#[test]
fn test_dependency_tree_from_invocation_is_remapped() {
    let base = files(&[("/src/main.c", "")]);
    let service = DependencyScanningService::new(ServiceConfig::new(ScanningOutputFormat::Tree)).unwrap();
    let mut tool = DependencyScanningTool::with_file_system(&service, base);
    let inv = CompilerInvocation::parse("clang", &args(&["-cc1", "-E", "main.c"])).unwrap();
    let remap: Arc<RemapPath> =
        Arc::new(|path: &Path| Path::new("/^src").join(path.strip_prefix("/src").unwrap_or(path)));
    let root = tool
        .get_dependency_tree_from_compiler_invocation(inv, Path::new("/src"), Some(remap))
        .unwrap();

    let tree = service.store().unwrap().resolve_tree(&root).unwrap();
    assert!(tree.get(Path::new("/^src/main.c")).is_some());
    assert!(tree.get(Path::new("/src/main.c")).is_none());
}

#[test]
fn test_include_tree() {
    let base = files(&[
        ("/src/main.c", "#include \"a.h\"\n#if __has_include(<missing.h>)\n#endif\n"),
        ("/src/a.h", "int a;\n"),
    ]);
    let mut tool = tool(ScanningOutputFormat::IncludeTree, base);
    let root = tool
        .get_include_tree(&args(&["clang", "-c", "main.c"]), Path::new("/src"))
        .unwrap();

    assert_eq!(root.main_file.path, PathBuf::from("/src/main.c"));
    assert_eq!(root.main_file.includes.len(), 1);
    assert_eq!(root.main_file.includes[0].path, PathBuf::from("/src/a.h"));
    assert_eq!(root.main_file.has_include_checks, vec![false]);
    assert_eq!(root.pch, None);
}

/// Stores blobs but refuses tree commits.
#[derive(Debug, Default)]
struct NoTreeStore {
    inner: InMemoryObjectStore,
}

impl ObjectStore for NoTreeStore {
    fn store(&self, refs: &[CasId], data: &[u8]) -> Result<CasId, CasError> {
        self.inner.store(refs, data)
    }

    fn load(&self, id: &CasId) -> Result<Object, CasError> {
        self.inner.load(id)
    }

    fn contains(&self, id: &CasId) -> bool {
        self.inner.contains(id)
    }

    fn commit_tree(&self, _tree: &CasTree) -> Result<CasId, CasError> {
        Err(CasError::InvalidId {
            text: "read-only store".to_string(),
        })
    }
}

#[test]
fn test_tree_commit_failure_fails_scan() {
    let base = files(&[("/src/main.c", "")]);
    let cas = Arc::new(SharedCasCache::new(Arc::new(NoTreeStore::default())));
    let mut fs = cas.create_proxy_fs(base, true);
    let mut action = ScanningAction::builder()
        .working_directory("/src")
        .format(ScanningOutputFormat::Tree)
        .build()
        .unwrap();
    let mut consumer = TreeConsumer::new();
    let inv = CompilerInvocation::parse("clang", &args(&["-cc1", "-E", "main.c"])).unwrap();

    let err = action
        .run_invocation(inv, &mut fs, &mut consumer, &mut DiagnosticsEngine::new())
        .unwrap_err();
    assert!(matches!(err, ScanError::Cas(_)));
    assert!(consumer.take_root_id().is_err());
    assert!(fs.is_file(Path::new("/src/main.c")));
}

#[test]
fn test_dependency_file_written_once_per_scan() {
    let dir = tempfile::tempdir().unwrap();
    let base = files(&[("/src/main.c", "#include \"a.h\"\n"), ("/src/a.h", "")]);
    let service = DependencyScanningService::new(ServiceConfig::default()).unwrap();
    let mut worker = service.create_worker_with_file_system(base);
    let dep_file = dir.path().join("main.d");
    let inv = CompilerInvocation::parse(
        "clang",
        &args(&["-cc1", "-emit-obj", "-dependency-file", dep_file.to_str().unwrap(), "-o", "main.o", "main.c"]),
    )
    .unwrap();
    let mut consumer = MakeDependencyPrinterConsumer::new();
    worker
        .compute_dependencies_from_invocation(inv, Path::new("/src"), &mut consumer, None)
        .unwrap();

    let expected = "main.o: /src/main.c \\\n  /src/a.h\n";
    assert_eq!(std::fs::read_to_string(&dep_file).unwrap(), expected);
    assert_eq!(consumer.print_dependencies().unwrap(), expected);
}
