//! Diagnostics for patch authoring errors
//!
//! Patch passes never raise routine authoring mistakes to the caller.
//! Each problem becomes a [`Diagnostic`] tagged with its document position
//! and is handed to a [`DiagnosticSink`].

#![warn(missing_docs)]

use crate::document::Position;
use crate::error::{ErrorKind, PatchError};
use parking_lot::Mutex;
use std::fmt;

/// Diagnostic severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Severity {
    /// Applied instruction or other progress note
    #[default]
    Info,
    /// Skipped instruction
    Warning,
    /// Aborted pass
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// A diagnostic message
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// Severity of the diagnostic
    pub severity: Severity,
    /// Error classification, if this reports an error
    pub kind: Option<ErrorKind>,
    /// Human-readable message
    pub message: String,
    /// Document position
    pub position: Position,
    /// Definition type the pass was patching
    pub type_name: String,
}

impl Diagnostic {
    /// Informational diagnostic
    pub fn info(type_name: impl Into<String>, message: impl Into<String>, position: Position) -> Self {
        Self {
            severity: Severity::Info,
            kind: None,
            message: message.into(),
            position,
            type_name: type_name.into(),
        }
    }

    /// Diagnostic describing an error with the given severity
    pub fn from_error(type_name: impl Into<String>, severity: Severity, error: &PatchError) -> Self {
        Self {
            severity,
            kind: Some(error.kind()),
            message: error.to_string(),
            position: error.position().unwrap_or_default(),
            type_name: type_name.into(),
        }
    }

    /// Check for an error or warning
    pub fn is_problem(&self) -> bool {
        self.severity >= Severity::Warning
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] {}", self.severity, self.type_name, self.message)?;
        if self.position.is_known() {
            write!(f, " (line {})", self.position)?;
        }
        Ok(())
    }
}

/// Receiver for diagnostics produced by patch passes
///
/// Implementations must not panic.
pub trait DiagnosticSink: Send + Sync {
    /// Record a diagnostic
    fn report(&self, diagnostic: Diagnostic);

    /// Record a contract violation that aborted a whole type pass
    fn unhandled(&self, type_name: &str, error: &PatchError);
}

/// Sink that forwards everything to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Info => log::info!("{diagnostic}"),
            Severity::Warning => log::warn!("{diagnostic}"),
            Severity::Error => log::error!("{diagnostic}"),
        }
    }

    fn unhandled(&self, type_name: &str, error: &PatchError) {
        log::error!("Patch pass for {type_name} aborted: {error}");
    }
}

/// Sink that keeps every diagnostic in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
    unhandled: Mutex<Vec<(String, PatchError)>>,
}

impl CollectingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the reported diagnostics
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().clone()
    }

    /// Diagnostics with warning or error severity
    pub fn problems(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .iter()
            .filter(|d| d.is_problem())
            .cloned()
            .collect()
    }

    /// Copy of the contract violations
    pub fn unhandled_errors(&self) -> Vec<(String, PatchError)> {
        self.unhandled.lock().clone()
    }

    /// Forget everything collected so far
    pub fn clear(&self) {
        self.diagnostics.lock().clear();
        self.unhandled.lock().clear();
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().push(diagnostic);
    }

    fn unhandled(&self, type_name: &str, error: &PatchError) {
        self.unhandled
            .lock()
            .push((type_name.to_string(), error.clone()));
    }
}
