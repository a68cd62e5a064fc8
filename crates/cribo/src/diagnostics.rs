//! Structured diagnostics for the bundling pipeline.
//!
//! Errors are collected per module as the pipeline runs and surfaced together
//! at stage boundaries: the first fatal diagnostic aborts emission, non-fatal
//! ones are only logged.

use std::fmt;

use anyhow::anyhow;
use log::warn;

/// What went wrong, following the bundler's error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A source file could not be read.
    Io,
    /// A source file does not parse; carries the 1-based position.
    Parse { line: usize, column: usize },
    /// An import could not be mapped to a source unit.
    Resolution,
    /// A cycle whose members need each other's values at import time.
    UnresolvableCycle,
    /// `importlib.import_module` / `__import__` with a non-literal argument.
    DynamicImport,
    /// `__all__` mentions a name that is not bound at module level.
    InvalidAll,
}

impl DiagnosticKind {
    fn label(&self) -> &'static str {
        match self {
            DiagnosticKind::Io => "io error",
            DiagnosticKind::Parse { .. } => "parse error",
            DiagnosticKind::Resolution => "unresolved import",
            DiagnosticKind::UnresolvableCycle => "unresolvable cycle",
            DiagnosticKind::DynamicImport => "dynamic import",
            DiagnosticKind::InvalidAll => "invalid __all__",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Aborts the bundle at the next stage boundary.
    Fatal,
    /// Reported but does not abort.
    Warning,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    /// Dotted module name, or the file path when no name is known yet.
    pub module: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DiagnosticKind::Parse { line, column } => write!(
                f,
                "{} in {} at {line}:{column}: {}",
                self.kind.label(),
                self.module,
                self.message
            ),
            _ => write!(f, "{} in {}: {}", self.kind.label(), self.module, self.message),
        }
    }
}

/// Accumulates diagnostics across a pipeline stage.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn fatal(
        &mut self,
        kind: DiagnosticKind,
        module: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.push(Diagnostic {
            kind,
            severity: Severity::Fatal,
            module: module.into(),
            message: message.into(),
        });
    }

    pub fn warning(
        &mut self,
        kind: DiagnosticKind,
        module: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.push(Diagnostic {
            kind,
            severity: Severity::Warning,
            module: module.into(),
            message: message.into(),
        });
    }

    pub fn has_fatal(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Fatal)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Log warnings and, if any fatal diagnostic was recorded, render the
    /// whole batch into a single error.
    pub fn check_stage(&mut self, stage: &str) -> anyhow::Result<()> {
        for diagnostic in &self.diagnostics {
            if diagnostic.severity == Severity::Warning {
                warn!("{diagnostic}");
            }
        }
        if !self.has_fatal() {
            self.diagnostics.clear();
            return Ok(());
        }

        let mut report = format!("bundling failed during {stage}:\n");
        for diagnostic in self
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Fatal)
        {
            report.push_str("  - ");
            report.push_str(&diagnostic.to_string());
            report.push('\n');
        }
        Err(anyhow!(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_aborts_stage() {
        let mut sink = DiagnosticSink::new();
        sink.fatal(
            DiagnosticKind::Resolution,
            "pkg.mod",
            "cannot resolve 'missing'",
        );
        let err = sink.check_stage("discovery").unwrap_err();
        let rendered = format!("{err}");
        assert!(rendered.contains("discovery"));
        assert!(rendered.contains("unresolved import in pkg.mod"));
    }

    #[test]
    fn warnings_alone_pass() {
        let mut sink = DiagnosticSink::new();
        sink.warning(DiagnosticKind::Resolution, "pkg.mod", "left untouched");
        assert!(sink.check_stage("discovery").is_ok());
        assert!(sink.diagnostics().is_empty());
    }

    #[test]
    fn parse_diagnostic_renders_position() {
        let diagnostic = Diagnostic {
            kind: DiagnosticKind::Parse { line: 3, column: 7 },
            severity: Severity::Fatal,
            module: "broken".to_owned(),
            message: "unexpected indent".to_owned(),
        };
        assert_eq!(
            diagnostic.to_string(),
            "parse error in broken at 3:7: unexpected indent"
        );
    }
}
