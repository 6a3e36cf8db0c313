//! Workspace: tracked state plus the reconcilers that act on it.
//!
//! Every mutating operation holds the state lock for its duration and saves
//! state once at the end, whatever the outcome of individual resources.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ConfigHasher, Manifest};
use crate::error::{FlyrecError, PlanError, Result};
use crate::fly::{FlyGraphqlClient, MachinesClient};
use crate::planner::{ApplyPlan, DiffEngine, DiffResult, ExecutionResult, PlanExecutor};
use crate::resources::{Diagnostics, Reconcilers, ResourceKind, Teardown, Tracked};
use crate::state::{
    generate_holder_id, HistoryEntry, Operation, ResourceRecord, ResourceState, StateStore,
};

/// Tracked state bound to a set of reconcilers.
pub struct Workspace<S: StateStore> {
    store: S,
    reconcilers: Reconcilers,
    hasher: ConfigHasher,
    diff_engine: DiffEngine,
    holder: String,
}

/// Result of planning.
#[derive(Debug)]
pub struct PlanOutcome {
    /// Tracked state the plan was computed against.
    pub state: ResourceState,
    /// Per-address differences.
    pub diff: DiffResult,
    /// Ordered actions.
    pub plan: ApplyPlan,
}

/// Result of a refresh.
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Addresses read successfully.
    pub refreshed: Vec<String>,
    /// Addresses dropped because the backend no longer has them.
    pub dropped: Vec<String>,
    /// Diagnostics by address, for reads that reported any.
    pub diagnostics: Vec<(String, Diagnostics)>,
}

/// Result of an import.
#[derive(Debug)]
pub struct ImportReport {
    /// Address the resource was imported at.
    pub address: String,
    /// Tracked record, if the import succeeded.
    pub record: Option<ResourceRecord>,
    /// Diagnostics from the import and the following read.
    pub diagnostics: Diagnostics,
}

impl<S: StateStore> Workspace<S> {
    /// Builds a workspace over `store` with live Fly API clients configured
    /// from the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn connect(manifest: &Manifest, token: &str, store: S) -> Result<Self> {
        let provider = &manifest.provider;
        let control = FlyGraphqlClient::with_endpoint(
            provider.graphql_endpoint(),
            token,
            provider.request_timeout_secs,
        )?;
        let machines = MachinesClient::with_base_url(
            provider.machines_endpoint(),
            token,
            provider.request_timeout_secs,
        )?;

        let reconcilers = Reconcilers::new(
            Arc::new(control),
            Arc::new(machines),
            Teardown::from(provider.teardown),
        );
        Ok(Self::new(store, reconcilers))
    }

    /// Creates a workspace.
    #[must_use]
    pub fn new(store: S, reconcilers: Reconcilers) -> Self {
        Self {
            store,
            reconcilers,
            hasher: ConfigHasher::new(),
            diff_engine: DiffEngine::new(),
            holder: generate_holder_id(),
        }
    }

    /// The underlying state store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Computes the plan for a manifest without touching anything.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be loaded or the manifest references
    /// an unknown application.
    pub async fn plan(&self, manifest: &Manifest) -> Result<PlanOutcome> {
        let state = self.store.load_or_default().await?;
        self.plan_against(manifest, state)
    }

    fn plan_against(&self, manifest: &Manifest, state: ResourceState) -> Result<PlanOutcome> {
        let config_hash = self.hasher.hash_manifest(manifest);
        let diff = self.diff_engine.compute_diff(manifest, &state);
        let plan = ApplyPlan::from_diff(&diff, manifest, &state, &config_hash)?;
        debug!(
            creates = diff.creates,
            updates = diff.updates,
            replaces = diff.replaces,
            deletes = diff.deletes,
            "Computed plan"
        );
        Ok(PlanOutcome { state, diff, plan })
    }

    /// Applies a manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken, state cannot be loaded
    /// or saved, or planning fails. Failed actions are reported in the
    /// returned [`ExecutionResult`].
    pub async fn apply(&self, manifest: &Manifest, continue_on_error: bool) -> Result<ExecutionResult> {
        let lock = self.store.acquire_lock(&self.holder, "apply").await?;
        let result = self.apply_locked(manifest, continue_on_error).await;
        self.store.release_lock(&lock.lock_id).await?;
        result
    }

    async fn apply_locked(&self, manifest: &Manifest, continue_on_error: bool) -> Result<ExecutionResult> {
        let PlanOutcome { mut state, plan, .. } = self.plan(manifest).await?;

        if plan.is_empty() && plan.adopted.is_empty() {
            info!("No changes required");
            return Ok(ExecutionResult::default());
        }

        let result = PlanExecutor::new(&self.reconcilers)
            .with_continue_on_error(continue_on_error)
            .execute(&plan, &mut state)
            .await;

        self.store.save(&mut state).await?;
        info!("{result}");
        Ok(result)
    }

    /// Reads every tracked resource and drops the ones the backend no
    /// longer knows.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken or state cannot be
    /// loaded or saved.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let lock = self.store.acquire_lock(&self.holder, "refresh").await?;
        let result = self.refresh_locked().await;
        self.store.release_lock(&lock.lock_id).await?;
        result
    }

    async fn refresh_locked(&self) -> Result<RefreshReport> {
        let mut state = self.store.load_or_default().await?;
        let mut report = RefreshReport::default();

        let tracked: Vec<(String, ResourceRecord)> = state
            .resources
            .values()
            .map(|t| (t.address.clone(), t.resource.clone()))
            .collect();

        for (address, record) in tracked {
            let mut diags = Diagnostics::new();
            match self.reconcilers.read(&record, &mut diags).await {
                Tracked::Present(fresh) => {
                    state.refresh(&address, fresh);
                    report.refreshed.push(address.clone());
                }
                Tracked::Absent => {
                    warn!("{address} no longer exists remotely, dropping it");
                    state.untrack(&address);
                    report.dropped.push(address.clone());
                }
            }
            if !diags.is_empty() {
                report.diagnostics.push((address, diags));
            }
        }

        let addresses = report
            .refreshed
            .iter()
            .chain(&report.dropped)
            .cloned()
            .collect();
        let entry = if report.has_errors() {
            HistoryEntry::failed(Operation::Refresh, "", addresses, "some reads failed")
        } else {
            HistoryEntry::new(Operation::Refresh, "", addresses)
        };
        state.add_history(entry);

        self.store.save(&mut state).await?;
        Ok(report)
    }

    /// Deletes every tracked resource, children before applications.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken or state cannot be
    /// loaded or saved.
    pub async fn destroy(&self) -> Result<ExecutionResult> {
        let lock = self.store.acquire_lock(&self.holder, "destroy").await?;
        let result = self.destroy_locked().await;
        self.store.release_lock(&lock.lock_id).await?;
        result
    }

    async fn destroy_locked(&self) -> Result<ExecutionResult> {
        let empty = Manifest::default();
        let PlanOutcome { mut state, plan, .. } = self.plan(&empty).await?;

        if plan.is_empty() {
            info!("Nothing to destroy");
            return Ok(ExecutionResult::default());
        }

        let result = PlanExecutor::new(&self.reconcilers)
            .with_continue_on_error(true)
            .with_operation(Operation::Destroy)
            .execute(&plan, &mut state)
            .await;

        self.store.save(&mut state).await?;
        Ok(result)
    }

    /// Tracks an existing remote object at `kind.name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is already tracked, the lock cannot
    /// be taken or state cannot be loaded or saved.
    pub async fn import(&self, kind: ResourceKind, name: &str, id: &str) -> Result<ImportReport> {
        let lock = self.store.acquire_lock(&self.holder, "import").await?;
        let result = self.import_locked(kind, name, id).await;
        self.store.release_lock(&lock.lock_id).await?;
        result
    }

    async fn import_locked(&self, kind: ResourceKind, name: &str, id: &str) -> Result<ImportReport> {
        let address = kind.address(name);
        let mut state = self.store.load_or_default().await?;

        if state.get(&address).is_some() {
            return Err(FlyrecError::Plan(PlanError::Aborted {
                reason: format!("{address} is already tracked"),
            }));
        }

        let mut diagnostics = Diagnostics::new();
        let record = match self.reconcilers.import_state(kind, id, &mut diagnostics) {
            Tracked::Present(skeleton) => {
                self.reconcilers.read(&skeleton, &mut diagnostics).await.into_option()
            }
            Tracked::Absent => None,
        };

        // A read that failed hands back the bare skeleton; do not track that.
        let record = record.filter(|_| !diagnostics.has_error());

        let success = record.is_some();
        if let Some(record) = &record {
            state.track(&address, "", record.clone());
            info!("Imported {address} from {id}");
        } else {
            warn!("Could not import {address} from {id}");
        }

        let entry = if success {
            HistoryEntry::new(Operation::Import, "", vec![address.clone()])
        } else {
            HistoryEntry::failed(Operation::Import, "", vec![address.clone()], "import failed")
        };
        state.add_history(entry);
        self.store.save(&mut state).await?;

        Ok(ImportReport {
            address,
            record,
            diagnostics,
        })
    }
}

impl RefreshReport {
    /// Returns true if any read reported an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|(_, d)| d.has_error())
    }
}
