//! Kind-dispatching front for the three reconcilers.

use std::sync::Arc;

use crate::fly::{ControlApi, MachineApi};
use crate::state::ResourceRecord;

use super::app::AppReconciler;
use super::diagnostics::{DiagnosticKind, Diagnostics};
use super::ip::IpReconciler;
use super::lifecycle::Teardown;
use super::machine::MachineReconciler;
use super::types::ResourceKind;
use super::{Reconciler, Tracked};

/// All reconcilers, addressed by record kind.
pub struct Reconcilers {
    apps: AppReconciler,
    machines: MachineReconciler,
    ips: IpReconciler,
}

impl Reconcilers {
    /// Builds the reconcilers over shared API clients.
    #[must_use]
    pub fn new(control: Arc<dyn ControlApi>, machines: Arc<dyn MachineApi>, teardown: Teardown) -> Self {
        Self {
            apps: AppReconciler::new(Arc::clone(&control)),
            machines: MachineReconciler::new(machines).with_teardown(teardown),
            ips: IpReconciler::new(control),
        }
    }

    /// Creates the resource described by `desired`.
    pub async fn create(&self, desired: &ResourceRecord, diags: &mut Diagnostics) -> Tracked<ResourceRecord> {
        match desired {
            ResourceRecord::App(c) => self.apps.create(c, diags).await.map(ResourceRecord::App),
            ResourceRecord::Machine(c) => self.machines.create(c, diags).await.map(ResourceRecord::Machine),
            ResourceRecord::Ip(c) => self.ips.create(c, diags).await.map(ResourceRecord::Ip),
        }
    }

    /// Refreshes a tracked record.
    pub async fn read(&self, state: &ResourceRecord, diags: &mut Diagnostics) -> Tracked<ResourceRecord> {
        match state {
            ResourceRecord::App(c) => self.apps.read(c, diags).await.map(ResourceRecord::App),
            ResourceRecord::Machine(c) => self.machines.read(c, diags).await.map(ResourceRecord::Machine),
            ResourceRecord::Ip(c) => self.ips.read(c, diags).await.map(ResourceRecord::Ip),
        }
    }

    /// Applies `plan` over `prior` in place.
    ///
    /// A kind change cannot be applied; the prior record stays tracked.
    pub async fn update(
        &self,
        plan: &ResourceRecord,
        prior: &ResourceRecord,
        diags: &mut Diagnostics,
    ) -> Tracked<ResourceRecord> {
        match (plan, prior) {
            (ResourceRecord::App(p), ResourceRecord::App(s)) => {
                self.apps.update(p, s, diags).await.map(ResourceRecord::App)
            }
            (ResourceRecord::Machine(p), ResourceRecord::Machine(s)) => {
                self.machines.update(p, s, diags).await.map(ResourceRecord::Machine)
            }
            (ResourceRecord::Ip(p), ResourceRecord::Ip(s)) => {
                self.ips.update(p, s, diags).await.map(ResourceRecord::Ip)
            }
            _ => {
                diags.add_error(
                    DiagnosticKind::UnsupportedOperation,
                    "Resource kind cannot change",
                    format!("tracked as {}, declared as {}", prior.kind(), plan.kind()),
                );
                Tracked::Present(prior.clone())
            }
        }
    }

    /// Deletes a tracked record.
    pub async fn delete(&self, state: &ResourceRecord, diags: &mut Diagnostics) -> Tracked<ResourceRecord> {
        match state {
            ResourceRecord::App(c) => self.apps.delete(c, diags).await.map(ResourceRecord::App),
            ResourceRecord::Machine(c) => self.machines.delete(c, diags).await.map(ResourceRecord::Machine),
            ResourceRecord::Ip(c) => self.ips.delete(c, diags).await.map(ResourceRecord::Ip),
        }
    }

    /// Builds an import skeleton for a kind.
    pub fn import_state(&self, kind: ResourceKind, id: &str, diags: &mut Diagnostics) -> Tracked<ResourceRecord> {
        match kind {
            ResourceKind::App => self.apps.import_state(id, diags).map(ResourceRecord::App),
            ResourceKind::Machine => self.machines.import_state(id, diags).map(ResourceRecord::Machine),
            ResourceKind::Ip => self.ips.import_state(id, diags).map(ResourceRecord::Ip),
        }
    }
}
