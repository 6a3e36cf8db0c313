//! Application reconciler.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::fly::{AutoscaleRegionInput, ControlApi, CreateAppInput};

use super::diagnostics::{DiagnosticKind, Diagnostics};
use super::drift::DriftCheck;
use super::types::{AppConfig, ResourceKind};
use super::{is_not_found, record_control_error, Reconciler, Tracked};

/// Reconciles Fly applications through the control API.
pub struct AppReconciler {
    api: Arc<dyn ControlApi>,
}

impl AppReconciler {
    /// Creates a reconciler over the given control API.
    #[must_use]
    pub fn new(api: Arc<dyn ControlApi>) -> Self {
        Self { api }
    }

    async fn resolve_org(&self, desired: &AppConfig, diags: &mut Diagnostics) -> Option<String> {
        if let Some(org) = desired.org.as_ref().filter(|o| !o.is_empty()) {
            return Some(org.clone());
        }

        match self.api.default_organization().await {
            Ok(org) => {
                debug!(org = %org.slug, "Using default organization");
                Some(org.id)
            }
            Err(e) => {
                diags.add_error(
                    DiagnosticKind::ConfigResolution,
                    "Could not detect default organization",
                    e.to_string(),
                );
                None
            }
        }
    }
}

#[async_trait]
impl Reconciler for AppReconciler {
    type Config = AppConfig;

    fn kind(&self) -> ResourceKind {
        ResourceKind::App
    }

    async fn create(&self, desired: &AppConfig, diags: &mut Diagnostics) -> Tracked<AppConfig> {
        let Some(organization_id) = self.resolve_org(desired, diags).await else {
            return Tracked::Absent;
        };

        let input = CreateAppInput {
            name: desired.name.clone(),
            organization_id,
            preferred_region: desired.preferred_region.clone(),
            network: desired.network.clone(),
        };

        let (result, summary) = if desired.regions.is_empty() {
            (self.api.create_app(&input).await, "Create app failed")
        } else {
            let regions = AutoscaleRegionInput::from_codes(&desired.regions);
            (
                self.api.create_app_with_autoscale(&input, regions).await,
                "Create app failed (creating with autoscale config)",
            )
        };

        match result {
            Ok(record) => {
                info!(app = %record.name, "Created app");
                Tracked::Present(record.into())
            }
            Err(e) => {
                record_control_error(&e, summary, diags);
                Tracked::Absent
            }
        }
    }

    async fn read(&self, state: &AppConfig, diags: &mut Diagnostics) -> Tracked<AppConfig> {
        let key = state
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(&state.name);

        match self.api.get_app(key).await {
            Ok(record) => Tracked::Present(record.into()),
            Err(e) if is_not_found(&e) => {
                info!(app = key, "App no longer exists");
                Tracked::Absent
            }
            Err(e) => {
                record_control_error(&e, "Read: query failed", diags);
                Tracked::Present(state.clone())
            }
        }
    }

    async fn update(
        &self,
        plan: &AppConfig,
        prior: &AppConfig,
        diags: &mut Diagnostics,
    ) -> Tracked<AppConfig> {
        let violations = DriftCheck::new("app")
            .field("org", plan.org.as_deref(), prior.org.as_deref())
            .field(
                "preferred_region",
                plan.preferred_region.as_deref(),
                prior.preferred_region.as_deref(),
            )
            .field("name", Some(plan.name.as_str()), Some(prior.name.as_str()))
            .field("network", plan.network.as_deref(), prior.network.as_deref())
            .report(diags);

        if violations > 0 {
            warn!(app = %prior.name, violations, "Rejected update of immutable fields");
            return Tracked::Present(prior.clone());
        }

        let mut next = prior.clone();
        if plan.regions.is_empty() {
            return Tracked::Present(next);
        }

        let regions = AutoscaleRegionInput::from_codes(&plan.regions);
        match self
            .api
            .update_autoscale_regions(&prior.name, regions, true)
            .await
        {
            Ok(record) => {
                info!(app = %prior.name, regions = ?record.regions, "Updated autoscale regions");
                next.regions = record.regions;
            }
            Err(e) => {
                diags.add_error(DiagnosticKind::UpdateFailed, "Update regions failed", e.to_string());
            }
        }

        Tracked::Present(next)
    }

    async fn delete(&self, state: &AppConfig, diags: &mut Diagnostics) -> Tracked<AppConfig> {
        if let Err(e) = self.api.delete_app(&state.name).await {
            record_control_error(&e, "Delete app failed", diags);
            warn!(
                app = %state.name,
                "Delete failed; the app is no longer tracked and may be orphaned"
            );
        } else {
            info!(app = %state.name, "Deleted app");
        }

        Tracked::Absent
    }

    fn import_state(&self, id: &str, diags: &mut Diagnostics) -> Tracked<AppConfig> {
        if id.is_empty() {
            diags.add_error(
                DiagnosticKind::InvalidImportId,
                "Invalid import ID",
                "expected an app name",
            );
            return Tracked::Absent;
        }

        Tracked::Present(AppConfig {
            name: id.to_string(),
            id: Some(id.to_string()),
            ..AppConfig::default()
        })
    }
}
