//! Resource reconcilers.
//!
//! Each resource kind implements [`Reconciler`]: create, read, update, delete
//! and import against the Fly APIs. Operations never return `Result`; they
//! report problems into a [`Diagnostics`] sink and return what should be
//! tracked afterwards.

mod app;
mod diagnostics;
mod drift;
mod ip;
mod lifecycle;
mod machine;
mod registry;
mod types;

use async_trait::async_trait;

use crate::fly::{BackendError, ControlApiError};

pub use app::AppReconciler;
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use drift::{DriftCheck, Violation};
pub use ip::IpReconciler;
pub use lifecycle::{
    transition, Action, Teardown, TeardownError, TeardownReport, Transition, Wait,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL,
};
pub use machine::MachineReconciler;
pub use registry::Reconcilers;
pub use types::{AppConfig, IpAddressConfig, MachineConfig, ResourceKind};

/// Outcome of a reconciler operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tracked<T> {
    /// Keep tracking the resource with this value.
    Present(T),
    /// Drop the resource from tracked state.
    Absent,
}

impl<T> Tracked<T> {
    /// Returns true if the resource stays tracked.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Converts into an `Option`.
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Present(value) => Some(value),
            Self::Absent => None,
        }
    }

    /// Borrows the tracked value.
    #[must_use]
    pub const fn as_ref(&self) -> Option<&T> {
        match self {
            Self::Present(value) => Some(value),
            Self::Absent => None,
        }
    }

    /// Maps the tracked value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Tracked<U> {
        match self {
            Self::Present(value) => Tracked::Present(f(value)),
            Self::Absent => Tracked::Absent,
        }
    }
}

/// Lifecycle operations of one resource kind.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Record type tracked for this kind.
    type Config: Clone + Send + Sync;

    /// Kind handled by this reconciler.
    fn kind(&self) -> ResourceKind;

    /// Creates the resource and returns the backend's view of it.
    async fn create(&self, desired: &Self::Config, diags: &mut Diagnostics)
    -> Tracked<Self::Config>;

    /// Refreshes the resource from the backend.
    async fn read(&self, state: &Self::Config, diags: &mut Diagnostics) -> Tracked<Self::Config>;

    /// Applies a planned change in place.
    async fn update(
        &self,
        plan: &Self::Config,
        prior: &Self::Config,
        diags: &mut Diagnostics,
    ) -> Tracked<Self::Config>;

    /// Deletes the resource.
    async fn delete(&self, state: &Self::Config, diags: &mut Diagnostics)
    -> Tracked<Self::Config>;

    /// Builds a skeleton record from an import ID, to be completed by `read`.
    fn import_state(&self, id: &str, diags: &mut Diagnostics) -> Tracked<Self::Config>;
}

/// Returns true if the error is the backend's "could not resolve" answer and
/// nothing else. A list mixing it with other entries is a real failure.
pub(crate) fn is_not_found(err: &ControlApiError) -> bool {
    matches!(
        err,
        ControlApiError::Backend(entries)
            if !entries.is_empty() && entries.iter().all(BackendError::is_not_found)
    )
}

/// Unpacks a control API error into diagnostics.
///
/// Each structured entry becomes its own diagnostic; a transport failure
/// becomes one diagnostic titled `summary`.
pub(crate) fn record_control_error(err: &ControlApiError, summary: &str, diags: &mut Diagnostics) {
    match err {
        ControlApiError::Backend(entries) => {
            for entry in entries {
                diags.add_error(
                    DiagnosticKind::StructuredBackend,
                    entry.message.clone(),
                    entry.path_string(),
                );
            }
        }
        ControlApiError::Transport(message) => {
            diags.add_error(DiagnosticKind::QueryFailed, summary, message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_entries_are_not_collapsed() {
        let err = ControlApiError::Backend(vec![
            BackendError::new("name has already been taken", "createApp"),
            BackendError::new("organization not found", "organizationId"),
        ]);
        let mut diags = Diagnostics::new();

        record_control_error(&err, "Create app failed", &mut diags);

        assert_eq!(diags.count_kind(DiagnosticKind::StructuredBackend), 2);
        assert!(!is_not_found(&err));
    }

    #[test]
    fn test_not_found_requires_every_entry_to_be_the_marker() {
        assert!(is_not_found(&ControlApiError::Backend(vec![BackendError::not_found(
            "app"
        )])));
        assert!(!is_not_found(&ControlApiError::Backend(vec![
            BackendError::new("internal error", "app"),
            BackendError::not_found("app"),
        ])));
        assert!(!is_not_found(&ControlApiError::Backend(Vec::new())));
    }

    #[test]
    fn test_transport_error_is_one_diagnostic() {
        let err = ControlApiError::Transport(String::from("timed out"));
        let mut diags = Diagnostics::new();

        record_control_error(&err, "Read: query failed", &mut diags);

        let only: Vec<_> = diags.iter().collect();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].kind, DiagnosticKind::QueryFailed);
        assert_eq!(only[0].summary, "Read: query failed");
    }

    #[test]
    fn test_tracked_helpers() {
        let tracked = Tracked::Present(3);
        assert!(tracked.is_present());
        assert_eq!(tracked.clone().map(|v| v * 2), Tracked::Present(6));
        assert_eq!(Tracked::<u8>::Absent.into_option(), None);
    }
}
