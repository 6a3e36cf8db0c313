//! Immutability checks for in-place updates.
//!
//! Every field is checked before anything is reported, so one update reports
//! all violations at once.

use super::diagnostics::{DiagnosticKind, Diagnostics};

/// A planned change to a field that cannot change after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Field name.
    pub field: &'static str,
    /// Stored value.
    pub stored: String,
    /// Planned value.
    pub planned: String,
}

/// Collects immutability violations for one resource.
#[derive(Debug)]
pub struct DriftCheck {
    resource: &'static str,
    violations: Vec<Violation>,
}

impl DriftCheck {
    /// Starts a check for the given resource kind label.
    #[must_use]
    pub const fn new(resource: &'static str) -> Self {
        Self {
            resource,
            violations: Vec::new(),
        }
    }

    /// Compares one field. An unknown planned value never violates.
    #[must_use]
    pub fn field(mut self, field: &'static str, planned: Option<&str>, stored: Option<&str>) -> Self {
        if let Some(planned) = planned {
            let stored = stored.unwrap_or_default();
            if planned != stored {
                self.violations.push(Violation {
                    field,
                    stored: stored.to_string(),
                    planned: planned.to_string(),
                });
            }
        }
        self
    }

    /// Violations found so far.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Records one error per violation and returns how many were recorded.
    pub fn report(self, diags: &mut Diagnostics) -> usize {
        let count = self.violations.len();
        for v in self.violations {
            diags.add_error(
                DiagnosticKind::ImmutableField,
                format!("Can't mutate {} of existing {}", v.field, self.resource),
                format!("Can't switch {} {:?} to {:?}", v.field, v.stored, v.planned),
            );
        }
        count
    }
}
