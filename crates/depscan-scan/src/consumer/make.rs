use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use depscan_core::{Command, ModuleDeps, ModuleId, ModuleOutputKind, PrebuiltModuleDep, ScanError};

use super::DependencyConsumer;
use crate::invocation::DependencyOutputOptions;

/// Collects file dependencies and prints them as a Make rule.
#[derive(Debug, Default)]
pub struct MakeDependencyPrinterConsumer {
    opts: Option<DependencyOutputOptions>,
    dependencies: Vec<PathBuf>,
}

impl MakeDependencyPrinterConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render `targets: dep1 \` followed by one indented dependency per
    /// line, plus phony rules when `-MP` was given.
    pub fn print_dependencies(&self) -> Result<String, ScanError> {
        let opts = self.opts.as_ref().ok_or_else(|| ScanError::Other {
            message: "no dependency output options were reported".to_string(),
        })?;
        Ok(render_make_rule(&opts.targets, &self.dependencies, opts.phony_targets))
    }
}

/// Format a Make rule for `targets` depending on `dependencies`.
pub(crate) fn render_make_rule(targets: &[String], dependencies: &[PathBuf], phony: bool) -> String {
    let targets: Vec<String> = targets.iter().map(|t| escape(t)).collect();
    let mut out = format!("{}:", targets.join(" "));
    for (n, dep) in dependencies.iter().enumerate() {
        let dep = escape(&dep.to_string_lossy());
        if n == 0 {
            let _ = write!(out, " {dep}");
        } else {
            let _ = write!(out, " \\\n  {dep}");
        }
    }
    out.push('\n');

    if phony {
        for dep in dependencies.iter().skip(1) {
            let _ = write!(out, "\n{}:\n", escape(&dep.to_string_lossy()));
        }
    }
    out
}

/// Escape a filename for Make.
fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            ' ' => out.push_str("\\ "),
            '#' => out.push_str("\\#"),
            '$' => out.push_str("$$"),
            c => out.push(c),
        }
    }
    out
}

impl DependencyConsumer for MakeDependencyPrinterConsumer {
    fn handle_build_command(&mut self, _command: Command) {}

    fn handle_dependency_output_opts(&mut self, opts: &DependencyOutputOptions) {
        self.opts = Some(opts.clone());
    }

    fn handle_file_dependency(&mut self, path: &Path) {
        self.dependencies.push(path.to_path_buf());
    }

    fn handle_prebuilt_module_dependency(&mut self, _dep: PrebuiltModuleDep) {}

    fn handle_module_dependency(&mut self, _deps: ModuleDeps) {}

    fn handle_context_hash(&mut self, _hash: String) {}

    fn lookup_module_output(&self, _id: &ModuleId, _kind: ModuleOutputKind) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_rule() {
        let mut consumer = MakeDependencyPrinterConsumer::new();
        assert!(consumer.print_dependencies().is_err());

        consumer.handle_dependency_output_opts(&DependencyOutputOptions {
            targets: vec!["out dir/a.o".to_string()],
            phony_targets: true,
            ..DependencyOutputOptions::default()
        });
        consumer.handle_file_dependency(Path::new("/src/a.c"));
        consumer.handle_file_dependency(Path::new("/src/my header#1.h"));
        consumer.handle_file_dependency(Path::new("/src/$x.h"));

        assert_eq!(
            consumer.print_dependencies().unwrap(),
            "out\\ dir/a.o: /src/a.c \\\n  /src/my\\ header\\#1.h \\\n  /src/$$x.h\n\
             \n/src/my\\ header\\#1.h:\n\n/src/$$x.h:\n"
        );
    }
}
