//! Diagnostic reporting for the silica compiler
//!
//! Provides the diagnostic sink the type-export layer reports into:
//! - severity levels (Error, Warning, Note)
//! - diagnostics carrying a message, an optional error code, the name of the
//!   subject declaration, and an optional source span
//! - a [`Diagnostics`] collection that accumulates reports for one
//!   compilation unit
//! - a plain-text formatter that resolves spans through a
//!   [`SourceMap`](source_map::SourceMap)

use std::fmt;

pub use source_map::{FileId, SourceFile, SourceMap, SourcePosition, SourceSpan};

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// A single diagnostic report.
///
/// `subject` names the declaration the report is about (a struct or variable
/// name); the message already embeds it, but keeping it separate lets callers
/// group reports by declaration.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<String>,
    pub message: String,
    pub subject: Option<String>,
    pub span: Option<SourceSpan>,
    pub notes: Vec<String>,
}

/// Accumulated diagnostics for one compilation unit.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    diagnostics: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.diagnostics.extend(other.diagnostics);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }
}

/// Builder for diagnostics.
pub struct DiagnosticBuilder {
    severity: Severity,
    code: Option<String>,
    message: String,
    subject: Option<String>,
    span: Option<SourceSpan>,
    notes: Vec<String>,
}

impl DiagnosticBuilder {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: None,
            message: message.into(),
            subject: None,
            span: None,
            notes: vec![],
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn note(message: impl Into<String>) -> Self {
        Self::new(Severity::Note, message)
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn maybe_span(mut self, span: Option<SourceSpan>) -> Self {
        self.span = span;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn build(self) -> Diagnostic {
        Diagnostic {
            severity: self.severity,
            code: self.code,
            message: self.message,
            subject: self.subject,
            span: self.span,
            notes: self.notes,
        }
    }
}

/// Plain-text diagnostic formatter.
pub struct ErrorFormatter {
    use_colors: bool,
}

impl ErrorFormatter {
    pub fn new() -> Self {
        Self { use_colors: false }
    }

    pub fn with_colors() -> Self {
        Self { use_colors: true }
    }

    pub fn format_diagnostics(&self, diagnostics: &Diagnostics, source_map: &SourceMap) -> String {
        let mut output = String::new();
        for (i, diagnostic) in diagnostics.iter().enumerate() {
            if i > 0 {
                output.push('\n');
            }
            output.push_str(&self.format_diagnostic(diagnostic, source_map));
        }
        output
    }

    pub fn format_diagnostic(&self, diagnostic: &Diagnostic, source_map: &SourceMap) -> String {
        let mut output = String::new();

        if self.use_colors {
            let color = match diagnostic.severity {
                Severity::Error => "\x1b[31m",
                Severity::Warning => "\x1b[33m",
                Severity::Note => "\x1b[36m",
            };
            output.push_str(color);
        }
        output.push_str(&diagnostic.severity.to_string());
        if let Some(code) = &diagnostic.code {
            output.push_str(&format!("[{code}]"));
        }
        if self.use_colors {
            output.push_str("\x1b[0m");
        }
        output.push_str(&format!(": {}\n", diagnostic.message));

        if let Some(span) = &diagnostic.span {
            if let Some(file) = source_map.get_file(span.file_id) {
                output.push_str(&format!(
                    "  --> {}:{}:{}\n",
                    file.name, span.start.line, span.start.column
                ));
                if let Some(line) = file.get_line(span.start.line) {
                    output.push_str(&format!("{} | {}\n", span.start.line, line));
                }
            }
        }

        for note in &diagnostic.notes {
            output.push_str(&format!("note: {note}\n"));
        }

        output
    }
}

impl Default for ErrorFormatter {
    fn default() -> Self {
        Self::new()
    }
}

/// Result type that carries accumulated diagnostics on failure.
pub type DiagnosticResult<T> = Result<T, Diagnostics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let diagnostic = DiagnosticBuilder::error("unions cannot be exported: 'U'")
            .code("E0802")
            .subject("U")
            .with_note("only plain structs may cross the runtime boundary")
            .build();

        assert_eq!(diagnostic.severity, Severity::Error);
        assert_eq!(diagnostic.code.as_deref(), Some("E0802"));
        assert_eq!(diagnostic.subject.as_deref(), Some("U"));
        assert_eq!(diagnostic.notes.len(), 1);
        assert!(diagnostic.span.is_none());
    }

    #[test]
    fn test_collection() {
        let mut diagnostics = Diagnostics::new();
        assert!(diagnostics.is_empty());
        assert!(!diagnostics.has_errors());

        diagnostics.push(DiagnosticBuilder::warning("unused export").build());
        assert!(!diagnostics.has_errors());

        diagnostics.push(DiagnosticBuilder::error("anonymous structures cannot be exported").build());
        assert!(diagnostics.has_errors());
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics.errors().count(), 1);
        assert_eq!(diagnostics.warnings().count(), 1);
    }

    #[test]
    fn test_format_with_span() {
        let mut source_map = SourceMap::new();
        let file = source_map.add_file(
            "kernel.sk".to_string(),
            "union U { int a; float b; };".to_string(),
        );
        let span = source_map.span_from_offsets(file, 0, 5).unwrap();

        let diagnostic = DiagnosticBuilder::error("unions cannot be exported: 'U'")
            .span(span)
            .build();

        let formatted = ErrorFormatter::new().format_diagnostic(&diagnostic, &source_map);
        assert!(formatted.contains("error: unions cannot be exported: 'U'"));
        assert!(formatted.contains("kernel.sk:1:1"));
    }
}
