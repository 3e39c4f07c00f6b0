use thiserror::Error;

use crate::common::types::IrType;

/// Recoverable conditions the pipeline can hit. None of these abort the
/// compilation: a malformed region skips the whole function, the rest leave
/// the offending instruction untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransactifyError {
    #[error("malformed atomic region: {reason}")]
    MalformedRegion { reason: String },

    #[error("no transactional barrier for type '{ty}'")]
    UnsupportedType { ty: IrType },

    #[error("transactional clone '{name}' already exists with a different signature")]
    CloneCollision { name: String },

    #[error("call target '{name}' requires a transactional clone that does not exist")]
    UnresolvableCall { name: String },
}

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// A diagnostic message attributed to the function being transformed.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub function: String,
    pub message: String,
}

impl Diagnostic {
    pub fn error(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self { severity: Severity::Error, function: function.into(), message: message.into() }
    }

    pub fn warning(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self { severity: Severity::Warning, function: function.into(), message: message.into() }
    }
}

/// Collects diagnostics across pass invocations.
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    diagnostics: Vec<Diagnostic>,
    error_count: u32,
}

impl DiagnosticEngine {
    pub fn new() -> Self {
        Self { diagnostics: Vec::new(), error_count: 0 }
    }

    pub fn emit(&mut self, diag: Diagnostic) {
        match diag.severity {
            Severity::Error => {
                self.error_count += 1;
                tracing::error!(function = %diag.function, "{}", diag.message);
            }
            Severity::Warning => tracing::warn!(function = %diag.function, "{}", diag.message),
            Severity::Note => tracing::debug!(function = %diag.function, "{}", diag.message),
        }
        self.diagnostics.push(diag);
    }

    /// Report a pass error against `function`. Signature clashes are real
    /// program errors; everything else downgrades to a warning since the
    /// affected instruction keeps its original (unmediated) behaviour.
    pub fn report(&mut self, function: &str, err: &TransactifyError) {
        let diag = match err {
            TransactifyError::CloneCollision { .. } => Diagnostic::error(function, err.to_string()),
            _ => Diagnostic::warning(function, err.to_string()),
        };
        self.emit(diag);
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }
}
