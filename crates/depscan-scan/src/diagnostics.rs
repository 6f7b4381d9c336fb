//! Diagnostics collected while scanning.

use std::fmt;
use std::path::PathBuf;

use depscan_core::ScanError;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    /// An error that stops the front end.
    Fatal,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error | Self::Fatal => "error",
        }
    }
}

/// Source position of a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: PathBuf,
    pub line: u32,
}

/// One reported diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: Option<Location>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(loc) = &self.location {
            write!(f, "{}:{}: ", loc.file.display(), loc.line)?;
        }
        write!(f, "{}: {}", self.severity.label(), self.message)
    }
}

/// Collects diagnostics for one scan request.
///
/// Warnings are kept for display but never turn into errors, whatever the
/// command line asks for.
#[derive(Debug, Default)]
pub struct DiagnosticsEngine {
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
    ignore_warnings: bool,
}

impl DiagnosticsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop warnings instead of recording them (`-w`).
    pub fn set_ignore_warnings(&mut self, ignore: bool) {
        self.ignore_warnings = ignore;
    }

    /// Record a diagnostic.
    pub fn report(&mut self, severity: Severity, location: Option<Location>, message: impl Into<String>) {
        if severity == Severity::Warning && self.ignore_warnings {
            return;
        }
        if severity >= Severity::Error {
            self.error_count += 1;
        }
        self.diagnostics.push(Diagnostic {
            severity,
            location,
            message: message.into(),
        });
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.report(Severity::Warning, None, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.report(Severity::Error, None, message);
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Render every diagnostic, one per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for diag in &self.diagnostics {
            out.push_str(&diag.to_string());
            out.push('\n');
        }
        out
    }

    /// Convert the collected diagnostics into a scan error.
    pub fn to_error(&self) -> ScanError {
        ScanError::diagnostics(self.render())
    }

    /// `Err` with the rendered diagnostics if any error was reported.
    pub fn check(&self) -> Result<(), ScanError> {
        if self.has_errors() {
            Err(self.to_error())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_and_check() {
        let mut diags = DiagnosticsEngine::new();
        diags.warning("unused");
        assert!(diags.check().is_ok());

        diags.report(
            Severity::Fatal,
            Some(Location {
                file: PathBuf::from("/src/a.c"),
                line: 3,
            }),
            "'b.h' file not found",
        );
        assert_eq!(diags.error_count(), 1);
        assert_eq!(
            diags.render(),
            "warning: unused\n/src/a.c:3: error: 'b.h' file not found\n"
        );
        assert!(matches!(diags.check(), Err(ScanError::Diagnostics { .. })));
    }

    #[test]
    fn test_ignore_warnings() {
        let mut diags = DiagnosticsEngine::new();
        diags.set_ignore_warnings(true);
        diags.warning("quiet");
        assert!(diags.diagnostics().is_empty());
    }
}
