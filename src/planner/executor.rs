//! Plan executor.
//!
//! Runs each planned action through the reconcilers, folds the returned
//! [`Tracked`] value into state and keeps the diagnostics of every action.
//! A failed action skips every action that depends on it.

use std::collections::HashSet;
use tracing::{error, info, warn};

use crate::resources::{DiagnosticKind, Diagnostics, Reconcilers, Tracked};
use crate::state::{HistoryEntry, Operation, ResourceState};

use super::plan::{ActionType, ApplyPlan, PlannedAction};

/// Executor for apply plans.
pub struct PlanExecutor<'a> {
    reconcilers: &'a Reconcilers,
    continue_on_error: bool,
    operation: Operation,
}

/// How an action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// No error diagnostics.
    Succeeded,
    /// At least one error diagnostic.
    Failed,
    /// Not run because a dependency failed.
    Skipped,
}

/// Result of executing a single action.
#[derive(Debug)]
pub struct ActionResult {
    /// Action index.
    pub index: usize,
    /// Action that was executed.
    pub action: PlannedAction,
    /// How it ended.
    pub outcome: ActionOutcome,
    /// Diagnostics reported by the reconciler.
    pub diagnostics: Diagnostics,
}

/// Result of executing the entire plan.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// Individual action results.
    pub results: Vec<ActionResult>,
    /// Number of successful actions.
    pub successful: usize,
    /// Number of failed actions.
    pub failed: usize,
    /// Number of skipped actions.
    pub skipped: usize,
    /// Actions never reached because execution stopped early.
    pub not_run: usize,
}

impl<'a> PlanExecutor<'a> {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(reconcilers: &'a Reconcilers) -> Self {
        Self {
            reconcilers,
            continue_on_error: false,
            operation: Operation::Apply,
        }
    }

    /// Sets the operation recorded in history.
    #[must_use]
    pub const fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    /// Keeps running independent actions after a failure.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Executes a plan against `state`.
    ///
    /// State is updated after every action, so a partial run leaves it
    /// consistent with what actually happened remotely.
    pub async fn execute(&self, plan: &ApplyPlan, state: &mut ResourceState) -> ExecutionResult {
        info!("Executing plan with {} actions", plan.actions.len());

        for (address, hash) in &plan.adopted {
            if state.set_hash(address, hash) {
                info!("Adopted {address}");
            }
        }

        let mut results = Vec::new();
        let mut failed_indices: HashSet<usize> = HashSet::new();

        for (idx, action) in plan.actions.iter().enumerate() {
            if action.dependencies.iter().any(|dep| failed_indices.contains(dep)) {
                warn!("Skipping {} due to failed dependencies", action.address);
                failed_indices.insert(idx);
                results.push(ActionResult {
                    index: idx,
                    action: action.clone(),
                    outcome: ActionOutcome::Skipped,
                    diagnostics: Diagnostics::new(),
                });
                continue;
            }

            let result = self.execute_action(idx, action, state).await;
            let failed = result.outcome == ActionOutcome::Failed;
            results.push(result);

            if failed {
                failed_indices.insert(idx);
                if !self.continue_on_error {
                    break;
                }
            }
        }

        let count = |o: ActionOutcome| results.iter().filter(|r| r.outcome == o).count();
        let execution_result = ExecutionResult {
            successful: count(ActionOutcome::Succeeded),
            failed: count(ActionOutcome::Failed),
            skipped: count(ActionOutcome::Skipped),
            not_run: plan.actions.len() - results.len(),
            results,
        };

        let addresses = plan.actions.iter().map(|a| a.address.clone()).collect();
        let entry = if execution_result.all_successful() {
            HistoryEntry::new(self.operation, &plan.config_hash, addresses)
        } else {
            HistoryEntry::failed(
                self.operation,
                &plan.config_hash,
                addresses,
                &format!("{} actions failed", execution_result.failed),
            )
        };
        state.add_history(entry);

        execution_result
    }

    async fn execute_action(
        &self,
        index: usize,
        action: &PlannedAction,
        state: &mut ResourceState,
    ) -> ActionResult {
        info!("Executing action {index}: {}", action.description());
        let mut diags = Diagnostics::new();

        match action.action_type {
            ActionType::Create => self.execute_create(action, state, &mut diags).await,
            ActionType::Update => self.execute_update(action, state, &mut diags).await,
            ActionType::Delete => self.execute_delete(action, state, &mut diags).await,
        }

        let outcome = if diags.has_error() {
            for diagnostic in &diags {
                error!("{}: {diagnostic}", action.address);
            }
            ActionOutcome::Failed
        } else {
            ActionOutcome::Succeeded
        };

        ActionResult {
            index,
            action: action.clone(),
            outcome,
            diagnostics: diags,
        }
    }

    async fn execute_create(
        &self,
        action: &PlannedAction,
        state: &mut ResourceState,
        diags: &mut Diagnostics,
    ) {
        let Some(desired) = &action.desired else {
            missing_declaration(action, diags);
            return;
        };

        if let Tracked::Present(record) = self.reconcilers.create(desired, diags).await {
            let hash = action.new_hash.as_deref().unwrap_or_default();
            state.track(&action.address, hash, record);
            info!("Created {}", action.address);
        }
    }

    async fn execute_update(
        &self,
        action: &PlannedAction,
        state: &mut ResourceState,
        diags: &mut Diagnostics,
    ) {
        let Some(desired) = &action.desired else {
            missing_declaration(action, diags);
            return;
        };
        let Some(prior) = state.get(&action.address).map(|t| t.resource.clone()) else {
            warn!("{} is no longer tracked, creating it", action.address);
            return self.execute_create(action, state, diags).await;
        };

        match self.reconcilers.update(desired, &prior, diags).await {
            Tracked::Present(record) if !diags.has_error() => {
                let hash = action.new_hash.as_deref().unwrap_or_default();
                state.track(&action.address, hash, record);
                info!("Updated {}", action.address);
            }
            // Old hash stays so the change is planned again next run.
            Tracked::Present(record) => state.refresh(&action.address, record),
            Tracked::Absent => {
                state.untrack(&action.address);
            }
        }
    }

    async fn execute_delete(
        &self,
        action: &PlannedAction,
        state: &mut ResourceState,
        diags: &mut Diagnostics,
    ) {
        let Some(prior) = state.get(&action.address).map(|t| t.resource.clone()) else {
            info!("{} is not tracked, nothing to delete", action.address);
            return;
        };

        match self.reconcilers.delete(&prior, diags).await {
            Tracked::Absent => {
                state.untrack(&action.address);
                info!("Deleted {}", action.address);
            }
            Tracked::Present(record) => state.refresh(&action.address, record),
        }
    }
}

fn missing_declaration(action: &PlannedAction, diags: &mut Diagnostics) {
    diags.add_error(
        DiagnosticKind::UnsupportedOperation,
        "Planned action has no declaration",
        action.address.clone(),
    );
}

impl ExecutionResult {
    /// Returns true if every planned action ran and succeeded.
    #[must_use]
    pub const fn all_successful(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.not_run == 0
    }

    /// Number of actions attempted or skipped.
    #[must_use]
    pub fn total_executed(&self) -> usize {
        self.results.len()
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} actions: {} successful, {} failed, {} skipped",
            self.total_executed(),
            self.successful,
            self.failed,
            self.skipped
        )?;
        if self.not_run > 0 {
            write!(f, ", {} not run", self.not_run)?;
        }
        Ok(())
    }
}
