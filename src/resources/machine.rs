//! Machine reconciler.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::fly::{
    verify_tunnel, CreateMachineRequest, GuestRequest, Machine, MachineApi, MachineConfigRequest,
};

use super::diagnostics::{DiagnosticKind, Diagnostics};
use super::lifecycle::{Teardown, TeardownError};
use super::types::{MachineConfig, ResourceKind};
use super::{Reconciler, Tracked};

const TUNNEL_SUMMARY: &str = "fly wireguard tunnel must be open";

/// Reconciles Fly machines through the Machines API.
pub struct MachineReconciler {
    api: Arc<dyn MachineApi>,
    teardown: Teardown,
}

impl MachineReconciler {
    /// Creates a reconciler with the default teardown bounds.
    #[must_use]
    pub fn new(api: Arc<dyn MachineApi>) -> Self {
        Self {
            api,
            teardown: Teardown::default(),
        }
    }

    /// Overrides the teardown bounds.
    #[must_use]
    pub const fn with_teardown(mut self, teardown: Teardown) -> Self {
        self.teardown = teardown;
        self
    }

    /// Records a tunnel failure and returns false if the tunnel is down.
    async fn tunnel_open(&self, diags: &mut Diagnostics, fatal: bool) -> bool {
        match verify_tunnel(self.api.as_ref()).await {
            Ok(()) => true,
            Err(e) if fatal => {
                diags.add_error(DiagnosticKind::TunnelUnavailable, TUNNEL_SUMMARY, e.to_string());
                false
            }
            Err(e) => {
                diags.add_warning(DiagnosticKind::TunnelUnavailable, TUNNEL_SUMMARY, e.to_string());
                false
            }
        }
    }
}

fn create_request(desired: &MachineConfig) -> CreateMachineRequest {
    let guest = GuestRequest {
        cpus: desired.cpus,
        memory_mb: desired.memory_mb,
        cpu_type: desired.cpu_kind.clone(),
    };

    CreateMachineRequest {
        name: desired.name.clone(),
        region: desired.region.clone(),
        config: MachineConfigRequest {
            image: desired.image.clone(),
        },
        guest: (!guest.is_empty()).then_some(guest),
    }
}

#[async_trait]
impl Reconciler for MachineReconciler {
    type Config = MachineConfig;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Machine
    }

    async fn create(
        &self,
        desired: &MachineConfig,
        diags: &mut Diagnostics,
    ) -> Tracked<MachineConfig> {
        if !self.tunnel_open(diags, true).await {
            return Tracked::Absent;
        }

        let request = create_request(desired);
        debug!(app = %desired.app, machine = %desired.name, "Creating machine");

        let reply = match self.api.create_machine(&desired.app, &request).await {
            Ok(reply) => reply,
            Err(e) => {
                diags.add_error(DiagnosticKind::RequestFailed, "Failed to create machine", e.message);
                return Tracked::Absent;
            }
        };

        if !reply.is_success() {
            diags.add_error(DiagnosticKind::RequestFailed, "Request failed", reply.failure_detail());
            return Tracked::Absent;
        }

        match reply.json::<Machine>() {
            Ok(machine) => {
                info!(app = %desired.app, id = %machine.id, state = %machine.state, "Created machine");
                Tracked::Present(desired.clone().with_machine(machine))
            }
            Err(e) => {
                diags.add_error(
                    DiagnosticKind::DecodeFailed,
                    "Failed to decode response machine",
                    e.to_string(),
                );
                Tracked::Absent
            }
        }
    }

    async fn read(&self, state: &MachineConfig, diags: &mut Diagnostics) -> Tracked<MachineConfig> {
        if !self.tunnel_open(diags, true).await {
            return Tracked::Present(state.clone());
        }

        let Some(id) = state.id.as_deref() else {
            diags.add_error(
                DiagnosticKind::RequestFailed,
                "Machine read request failed",
                format!("machine {} has no id", state.name),
            );
            return Tracked::Present(state.clone());
        };

        let reply = match self.api.get_machine(&state.app, id).await {
            Ok(reply) => reply,
            Err(e) => {
                diags.add_error(DiagnosticKind::RequestFailed, "Failed to read machine", e.message);
                return Tracked::Present(state.clone());
            }
        };

        if reply.status != 200 {
            diags.add_error(
                DiagnosticKind::RequestFailed,
                "Machine read request failed",
                reply.failure_detail(),
            );
            return Tracked::Present(state.clone());
        }

        match reply.json::<Machine>() {
            Ok(machine) => Tracked::Present(state.clone().with_machine(machine)),
            Err(e) => {
                diags.add_error(
                    DiagnosticKind::DecodeFailed,
                    "Failed to read machine response",
                    e.to_string(),
                );
                Tracked::Present(state.clone())
            }
        }
    }

    async fn update(
        &self,
        _plan: &MachineConfig,
        prior: &MachineConfig,
        diags: &mut Diagnostics,
    ) -> Tracked<MachineConfig> {
        diags.add_error(
            DiagnosticKind::UnsupportedOperation,
            "Machine update not available",
            "Machines cannot be updated in place; delete and recreate",
        );
        Tracked::Present(prior.clone())
    }

    async fn delete(
        &self,
        state: &MachineConfig,
        diags: &mut Diagnostics,
    ) -> Tracked<MachineConfig> {
        self.tunnel_open(diags, false).await;

        let Some(id) = state.id.as_deref().filter(|id| !id.is_empty()) else {
            warn!(machine = %state.name, "Machine has no id; nothing to delete");
            return Tracked::Absent;
        };

        match self.teardown.run(self.api.as_ref(), &state.app, id).await {
            Ok(report) => {
                info!(
                    app = %state.app,
                    id,
                    attempts = report.attempts,
                    stops = report.stops,
                    destroys = report.destroys,
                    "Deleted machine"
                );
                Tracked::Absent
            }
            Err(TeardownError::GetInstanceFailed(detail)) => {
                diags.add_error(DiagnosticKind::GetInstanceFailed, "Failed to get machine", detail);
                Tracked::Present(state.clone())
            }
            Err(e @ TeardownError::Timeout { .. }) => {
                diags.add_error(DiagnosticKind::DeleteTimeout, "Delete machine failed", e.to_string());
                Tracked::Present(state.clone())
            }
        }
    }

    fn import_state(&self, id: &str, diags: &mut Diagnostics) -> Tracked<MachineConfig> {
        match id.split_once('/') {
            Some((app, machine_id)) if !app.is_empty() && !machine_id.is_empty() => {
                Tracked::Present(MachineConfig {
                    name: machine_id.to_string(),
                    app: app.to_string(),
                    id: Some(machine_id.to_string()),
                    ..MachineConfig::default()
                })
            }
            _ => {
                diags.add_error(
                    DiagnosticKind::InvalidImportId,
                    "Invalid import ID",
                    format!("expected <app>/<machine_id>, got {id:?}"),
                );
                Tracked::Absent
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fly::testing::{machine_body, ScriptedMachines};
    use crate::fly::{InstanceState, MockMachineApi};
    use std::time::Duration;

    fn desired() -> MachineConfig {
        MachineConfig {
            name: String::from("web"),
            app: String::from("hello"),
            image: String::from("nginx:latest"),
            region: Some(String::from("ord")),
            cpus: Some(1),
            ..MachineConfig::default()
        }
    }

    fn tracked() -> MachineConfig {
        MachineConfig {
            id: Some(String::from("148e")),
            ..desired()
        }
    }

    fn reconciler(api: Arc<ScriptedMachines>) -> MachineReconciler {
        MachineReconciler::new(api).with_teardown(Teardown::new(10, Duration::ZERO))
    }

    #[tokio::test]
    async fn test_create_then_read_round_trip() {
        let api = Arc::new(
            ScriptedMachines::new()
                .with_create_reply(200, machine_body("148e", InstanceState::Created))
                .with_states("148e", &[InstanceState::Created]),
        );
        let reconciler = reconciler(api.clone());
        let mut diags = Diagnostics::new();

        let created = reconciler
            .create(&desired(), &mut diags)
            .await
            .into_option()
            .expect("created");
        let read = reconciler
            .read(&created, &mut diags)
            .await
            .into_option()
            .expect("read");

        assert!(diags.is_empty());
        assert_eq!(created.id.as_deref(), Some("148e"));
        assert_eq!(read.id, created.id);
        assert_eq!(read.name, created.name);
        assert_eq!(read.cpus, created.cpus);
        assert_eq!(read.memory_mb, Some(256));
        assert_eq!(read.cpu_kind.as_deref(), Some("shared"));
        assert_eq!(read.app, "hello");

        let sent = api.created_requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].region.as_deref(), Some("ord"));
        assert_eq!(
            sent[0].guest,
            Some(GuestRequest {
                cpus: Some(1),
                ..GuestRequest::default()
            })
        );
    }

    #[tokio::test]
    async fn test_create_omits_guest_without_sizing() {
        let api = Arc::new(ScriptedMachines::new());
        let mut plain = desired();
        plain.cpus = None;
        let mut diags = Diagnostics::new();

        reconciler(api.clone()).create(&plain, &mut diags).await;

        assert_eq!(api.created_requests()[0].guest, None);
    }

    #[tokio::test]
    async fn test_create_error_reply_is_request_failed() {
        let api = Arc::new(
            ScriptedMachines::new()
                .with_create_reply(422, serde_json::json!({ "error": "invalid image" })),
        );
        let mut diags = Diagnostics::new();

        let created = reconciler(api).create(&desired(), &mut diags).await;

        assert_eq!(created, Tracked::Absent);
        let diag = diags.iter().next().expect("one diagnostic");
        assert_eq!(diag.kind, DiagnosticKind::RequestFailed);
        assert!(diag.detail.starts_with("422 Unprocessable Entity, /v1/apps/hello/machines, "));
        assert!(diag.detail.contains("invalid image"));
    }

    #[tokio::test]
    async fn test_create_requires_tunnel() {
        let mut mock = MockMachineApi::new();
        mock.expect_probe()
            .returning(|| Err(crate::fly::MachineApiError::new("connection refused")));
        mock.expect_create_machine().times(0);
        let reconciler = MachineReconciler::new(Arc::new(mock));
        let mut diags = Diagnostics::new();

        let created = reconciler.create(&desired(), &mut diags).await;

        assert_eq!(created, Tracked::Absent);
        assert_eq!(diags.count_kind(DiagnosticKind::TunnelUnavailable), 1);
        assert!(diags.has_error());
    }

    #[tokio::test]
    async fn test_read_is_idempotent() {
        let api = Arc::new(ScriptedMachines::new().with_states("148e", &[InstanceState::Started]));
        let reconciler = reconciler(api);
        let mut diags = Diagnostics::new();

        let first = reconciler.read(&tracked(), &mut diags).await;
        let second = reconciler.read(&tracked(), &mut diags).await;

        assert!(diags.is_empty());
        assert_eq!(
            serde_json::to_vec(&first.into_option()).expect("serializable"),
            serde_json::to_vec(&second.into_option()).expect("serializable")
        );
    }

    #[tokio::test]
    async fn test_update_is_unsupported() {
        let reconciler = reconciler(Arc::new(ScriptedMachines::new()));
        let mut diags = Diagnostics::new();

        let result = reconciler.update(&desired(), &tracked(), &mut diags).await;

        assert_eq!(result, Tracked::Present(tracked()));
        assert_eq!(diags.count_kind(DiagnosticKind::UnsupportedOperation), 1);
    }

    #[tokio::test]
    async fn test_delete_runs_teardown() {
        let api = Arc::new(ScriptedMachines::new().with_states(
            "148e",
            &[
                InstanceState::Started,
                InstanceState::Stopping,
                InstanceState::Stopped,
                InstanceState::Destroying,
                InstanceState::Destroyed,
            ],
        ));
        let mut diags = Diagnostics::new();

        let deleted = reconciler(api.clone()).delete(&tracked(), &mut diags).await;

        assert_eq!(deleted, Tracked::Absent);
        assert!(diags.is_empty());
        assert_eq!(api.calls_to("stop"), 1);
        assert_eq!(api.calls_to("delete"), 1);
    }

    #[tokio::test]
    async fn test_delete_timeout_keeps_record() {
        let api = Arc::new(ScriptedMachines::new().with_states("148e", &[InstanceState::Stopping]));
        let mut diags = Diagnostics::new();

        let deleted = reconciler(api).delete(&tracked(), &mut diags).await;

        assert_eq!(deleted, Tracked::Present(tracked()));
        let diag = diags.iter().next().expect("one diagnostic");
        assert_eq!(diag.kind, DiagnosticKind::DeleteTimeout);
        assert!(diag.detail.contains("max retries exceeded"));
    }

    #[tokio::test]
    async fn test_delete_continues_when_tunnel_probe_fails() {
        let api = Arc::new(
            ScriptedMachines::new()
                .with_probe_status(502)
                .with_states("148e", &[InstanceState::Destroyed]),
        );
        let mut diags = Diagnostics::new();

        let deleted = reconciler(api).delete(&tracked(), &mut diags).await;

        assert_eq!(deleted, Tracked::Absent);
        assert!(!diags.has_error());
        assert_eq!(diags.count_kind(DiagnosticKind::TunnelUnavailable), 1);
    }

    #[tokio::test]
    async fn test_delete_get_failure_keeps_record() {
        let api = Arc::new(ScriptedMachines::new().with_get_error("connection reset"));
        let mut diags = Diagnostics::new();

        let deleted = reconciler(api).delete(&tracked(), &mut diags).await;

        assert!(deleted.is_present());
        assert_eq!(diags.count_kind(DiagnosticKind::GetInstanceFailed), 1);
    }

    #[test]
    fn test_import_id_format() {
        let reconciler = reconciler(Arc::new(ScriptedMachines::new()));
        let mut diags = Diagnostics::new();

        let imported = reconciler
            .import_state("hello/148e", &mut diags)
            .into_option()
            .expect("imported");
        assert_eq!(imported.app, "hello");
        assert_eq!(imported.id.as_deref(), Some("148e"));

        assert_eq!(reconciler.import_state("148e", &mut diags), Tracked::Absent);
        assert_eq!(diags.count_kind(DiagnosticKind::InvalidImportId), 1);
    }
}
