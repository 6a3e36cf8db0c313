//! Per-operation diagnostics sink.

use serde::Serialize;
use std::fmt;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The operation failed.
    Error,
    /// Something worth surfacing that did not fail the operation.
    Warning,
}

/// Classification of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A value needed for the call could not be resolved (default organization).
    ConfigResolution,
    /// A control-plane request failed at the transport level.
    QueryFailed,
    /// A Machines API call returned a non-success status.
    RequestFailed,
    /// One entry of a structured backend error list.
    StructuredBackend,
    /// A planned change to a field that cannot change after creation.
    ImmutableField,
    /// The operation has no implementation for this resource kind.
    UnsupportedOperation,
    /// The Machines API tunnel is not open.
    TunnelUnavailable,
    /// The machine could not be observed during teardown.
    GetInstanceFailed,
    /// Teardown ran out of attempts.
    DeleteTimeout,
    /// An in-place update was rejected by the backend.
    UpdateFailed,
    /// A success reply could not be decoded.
    DecodeFailed,
    /// An import ID did not have the expected shape.
    InvalidImportId,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ConfigResolution => "config_resolution",
            Self::QueryFailed => "query_failed",
            Self::RequestFailed => "request_failed",
            Self::StructuredBackend => "structured_backend",
            Self::ImmutableField => "immutable_field",
            Self::UnsupportedOperation => "unsupported_operation",
            Self::TunnelUnavailable => "tunnel_unavailable",
            Self::GetInstanceFailed => "get_instance_failed",
            Self::DeleteTimeout => "delete_timeout",
            Self::UpdateFailed => "update_failed",
            Self::DecodeFailed => "decode_failed",
            Self::InvalidImportId => "invalid_import_id",
        };
        write!(f, "{s}")
    }
}

/// One diagnostic record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Severity.
    pub severity: Severity,
    /// Classification.
    pub kind: DiagnosticKind,
    /// Short title.
    pub summary: String,
    /// Detail string.
    pub detail: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        if self.detail.is_empty() {
            write!(f, "{level}: {}", self.summary)
        } else {
            write!(f, "{level}: {}: {}", self.summary, self.detail)
        }
    }
}

/// Ordered, append-only diagnostics for a single operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Creates an empty sink.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Records an error.
    pub fn add_error(
        &mut self,
        kind: DiagnosticKind,
        summary: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.push(Severity::Error, kind, summary.into(), detail.into());
    }

    /// Records a warning.
    pub fn add_warning(
        &mut self,
        kind: DiagnosticKind,
        summary: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.push(Severity::Warning, kind, summary.into(), detail.into());
    }

    fn push(&mut self, severity: Severity, kind: DiagnosticKind, summary: String, detail: String) {
        self.entries.push(Diagnostic {
            severity,
            kind,
            summary,
            detail,
        });
    }

    /// Returns true if any error has been recorded.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }

    /// Number of recorded diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the diagnostics in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// Counts entries of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: DiagnosticKind) -> usize {
        self.entries.iter().filter(|d| d.kind == kind).count()
    }

    /// Moves all entries of `other` to the end of this sink.
    pub fn extend(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_do_not_count_as_errors() {
        let mut diags = Diagnostics::new();
        diags.add_warning(DiagnosticKind::TunnelUnavailable, "tunnel down", "refused");
        assert!(!diags.has_error());

        diags.add_error(DiagnosticKind::QueryFailed, "Read: query failed", "timeout");
        assert!(diags.has_error());
        assert_eq!(diags.len(), 2);
        assert_eq!(
            diags.iter().map(|d| d.kind).collect::<Vec<_>>(),
            vec![DiagnosticKind::TunnelUnavailable, DiagnosticKind::QueryFailed]
        );
    }

    #[test]
    fn test_display() {
        let mut diags = Diagnostics::new();
        diags.add_error(DiagnosticKind::UnsupportedOperation, "Machine update not available", "");
        let rendered: Vec<String> = diags.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["error: Machine update not available"]);
    }
}
