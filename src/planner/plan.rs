//! Apply plan types and construction.
//!
//! A plan is an ordered list of actions. Machines and IP addresses are torn
//! down before the applications they belong to, and applications exist
//! before anything is created inside them.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::config::Manifest;
use crate::error::PlanError;
use crate::resources::ResourceKind;
use crate::state::{ResourceRecord, ResourceState};

use super::diff::{DiffResult, DiffType, ResourceDiff};

/// A complete apply plan.
#[derive(Debug, Clone)]
pub struct ApplyPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Manifest hash this plan is based on.
    pub config_hash: String,
    /// Planned actions in execution order.
    pub actions: Vec<PlannedAction>,
    /// Unchanged imported resources whose declaration hash gets recorded.
    pub adopted: Vec<(String, String)>,
}

/// A single planned action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    /// Action type.
    pub action_type: ActionType,
    /// Tracked-state address.
    pub address: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Declared record for creates and updates.
    pub desired: Option<ResourceRecord>,
    /// Reason for this action.
    pub reason: String,
    /// Declaration hash recorded on success.
    pub new_hash: Option<String>,
    /// Indices of actions that must succeed first.
    pub dependencies: Vec<usize>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// Create a resource.
    Create,
    /// Update a resource in place.
    Update,
    /// Delete a resource.
    Delete,
}

impl ApplyPlan {
    /// Builds a plan from a diff.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::UnknownApp`] if a machine or IP address belongs
    /// to an application that is neither declared nor tracked.
    pub fn from_diff(
        diff: &DiffResult,
        manifest: &Manifest,
        state: &ResourceState,
        config_hash: &str,
    ) -> Result<Self, PlanError> {
        check_app_references(manifest, state)?;

        let mut actions: Vec<PlannedAction> = Vec::new();
        let mut replaced: HashMap<&str, usize> = HashMap::new();
        let mut child_deletes: HashMap<String, Vec<usize>> = HashMap::new();

        // Machines and IPs that go away, including the first half of a replacement.
        for d in diff.diffs.iter().filter(|d| d.kind != ResourceKind::App) {
            let reason = match d.diff_type {
                DiffType::Delete => String::from("removed from manifest"),
                DiffType::Replace => replace_reason(d),
                _ => continue,
            };
            let idx = actions.len();
            actions.push(PlannedAction::delete(d, reason));
            if d.diff_type == DiffType::Replace {
                replaced.insert(d.address.as_str(), idx);
            }
            if let Some(tracked) = state.get(&d.address) {
                child_deletes
                    .entry(tracked.resource.app_name().to_string())
                    .or_default()
                    .push(idx);
            }
        }

        for d in diff
            .diffs
            .iter()
            .filter(|d| d.kind == ResourceKind::App && d.diff_type == DiffType::Delete)
        {
            let name = state
                .get(&d.address)
                .map_or("", |tracked| tracked.resource.app_name());
            let mut action = PlannedAction::delete(d, String::from("removed from manifest"));
            action.dependencies = child_deletes.get(name).cloned().unwrap_or_default();
            actions.push(action);
        }

        let mut app_creates: HashMap<&str, usize> = HashMap::new();
        for d in diff.diffs.iter().filter(|d| d.kind == ResourceKind::App) {
            let (action_type, reason) = match d.diff_type {
                DiffType::Create => (ActionType::Create, String::from("declared in manifest")),
                DiffType::Update => (ActionType::Update, replace_reason(d)),
                _ => continue,
            };
            if action_type == ActionType::Create
                && let Some(ResourceRecord::App(app)) = &d.desired
            {
                app_creates.insert(app.name.as_str(), actions.len());
            }
            actions.push(PlannedAction::upsert(d, action_type, reason, Vec::new()));
        }

        for kind in [ResourceKind::Ip, ResourceKind::Machine] {
            for d in diff.diffs.iter().filter(|d| d.kind == kind) {
                let reason = match d.diff_type {
                    DiffType::Create => String::from("declared in manifest"),
                    DiffType::Replace => replace_reason(d),
                    _ => continue,
                };
                let mut dependencies = Vec::new();
                if let Some(&idx) = replaced.get(d.address.as_str()) {
                    dependencies.push(idx);
                }
                if let Some(record) = &d.desired
                    && let Some(&idx) = app_creates.get(record.app_name())
                {
                    dependencies.push(idx);
                }
                actions.push(PlannedAction::upsert(d, ActionType::Create, reason, dependencies));
            }
        }

        let adopted = diff
            .diffs
            .iter()
            .filter(|d| d.diff_type == DiffType::NoChange && d.old_hash != d.new_hash)
            .filter_map(|d| d.new_hash.clone().map(|h| (d.address.clone(), h)))
            .collect();

        Ok(Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions,
            adopted,
        })
    }

    /// Creates an empty plan.
    #[must_use]
    pub fn empty(config_hash: &str) -> Self {
        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions: Vec::new(),
            adopted: Vec::new(),
        }
    }

    /// Returns true if the plan has no actions.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Counts actions of one type.
    #[must_use]
    pub fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }

    /// Actions that depend on a specific action index.
    #[must_use]
    pub fn dependent_actions(&self, action_idx: usize) -> Vec<(usize, &PlannedAction)> {
        self.actions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.dependencies.contains(&action_idx))
            .collect()
    }
}

/// Fails if a machine or IP references an application nobody manages.
fn check_app_references(manifest: &Manifest, state: &ResourceState) -> Result<(), PlanError> {
    let references = manifest
        .machines
        .iter()
        .map(|m| (m.address(), m.app.as_str()))
        .chain(manifest.ips.iter().map(|i| (i.address(), i.app.as_str())));

    for (address, app) in references {
        if !manifest.declares_app(app) && !state.tracks_app(app) {
            return Err(PlanError::UnknownApp {
                address,
                app: app.to_string(),
            });
        }
    }
    Ok(())
}

fn replace_reason(diff: &ResourceDiff) -> String {
    if diff.details.is_empty() {
        return String::from("declaration changed");
    }
    let fields: Vec<&str> = diff.details.iter().map(|d| d.field.as_str()).collect();
    format!("{} changed", fields.join(", "))
}

impl PlannedAction {
    fn delete(diff: &ResourceDiff, reason: String) -> Self {
        Self {
            action_type: ActionType::Delete,
            address: diff.address.clone(),
            kind: diff.kind,
            desired: None,
            reason,
            new_hash: None,
            dependencies: Vec::new(),
        }
    }

    fn upsert(
        diff: &ResourceDiff,
        action_type: ActionType,
        reason: String,
        dependencies: Vec<usize>,
    ) -> Self {
        Self {
            action_type,
            address: diff.address.clone(),
            kind: diff.kind,
            desired: diff.desired.clone(),
            reason,
            new_hash: diff.new_hash.clone(),
            dependencies,
        }
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action_type {
            ActionType::Create => format!("Create {}", self.address),
            ActionType::Update => format!("Update {}", self.address),
            ActionType::Delete => format!("Delete {}", self.address),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action_type, self.address)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ApplyPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.actions.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} actions):", self.actions.len())?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppSpec, ConfigHasher, IpSpec, MachineSpec};
    use crate::fly::IpAddressType;
    use crate::planner::DiffEngine;

    fn app(name: &str) -> AppSpec {
        AppSpec {
            name: name.to_string(),
            org: None,
            network: None,
            preferred_region: None,
            regions: Vec::new(),
        }
    }

    fn machine(name: &str, app: &str, image: &str) -> MachineSpec {
        MachineSpec {
            name: name.to_string(),
            app: app.to_string(),
            image: image.to_string(),
            region: None,
            cpus: None,
            memory_mb: None,
            cpu_kind: None,
        }
    }

    fn ip(name: &str, app: &str) -> IpSpec {
        IpSpec {
            name: name.to_string(),
            app: app.to_string(),
            address_type: IpAddressType::V6,
            region: None,
        }
    }

    fn plan(manifest: &Manifest, state: &ResourceState) -> ApplyPlan {
        let diff = DiffEngine::new().compute_diff(manifest, state);
        ApplyPlan::from_diff(&diff, manifest, state, "hash").expect("valid plan")
    }

    fn index_of(plan: &ApplyPlan, action_type: ActionType, address: &str) -> usize {
        plan.actions
            .iter()
            .position(|a| a.action_type == action_type && a.address == address)
            .expect("action present")
    }

    #[test]
    fn test_fresh_plan_orders_app_before_children() {
        let manifest = Manifest {
            apps: vec![app("hello")],
            machines: vec![machine("web", "hello", "nginx:1.27")],
            ips: vec![ip("public", "hello")],
            ..Manifest::default()
        };
        let plan = plan(&manifest, &ResourceState::new());

        assert_eq!(plan.action_count(), 3);
        let app_idx = index_of(&plan, ActionType::Create, "app.hello");
        let ip_idx = index_of(&plan, ActionType::Create, "ip.public");
        let machine_idx = index_of(&plan, ActionType::Create, "machine.web");

        assert_eq!(app_idx, 0);
        assert!(ip_idx < machine_idx);
        assert_eq!(plan.actions[machine_idx].dependencies, vec![app_idx]);
        assert_eq!(plan.dependent_actions(app_idx).len(), 2);
    }

    #[test]
    fn test_replacement_is_delete_then_create() {
        let hasher = ConfigHasher::new();
        let old = machine("web", "hello", "nginx:1.27");
        let mut state = ResourceState::new();
        state.track("app.hello", &hasher.hash_app(&app("hello")), ResourceRecord::App(app("hello").to_config()));
        state.track(&old.address(), &hasher.hash_machine(&old), ResourceRecord::Machine(old.to_config()));

        let manifest = Manifest {
            apps: vec![app("hello")],
            machines: vec![machine("web", "hello", "nginx:1.28")],
            ..Manifest::default()
        };
        let plan = plan(&manifest, &state);

        assert_eq!(plan.action_count(), 2);
        let delete_idx = index_of(&plan, ActionType::Delete, "machine.web");
        let create_idx = index_of(&plan, ActionType::Create, "machine.web");
        assert!(delete_idx < create_idx);
        assert_eq!(plan.actions[create_idx].dependencies, vec![delete_idx]);
        assert_eq!(plan.actions[create_idx].reason, "image changed");
    }

    #[test]
    fn test_app_delete_waits_for_children() {
        let mut state = ResourceState::new();
        state.track("app.old", "h1", ResourceRecord::App(app("old").to_config()));
        let m = machine("worker", "old", "busybox");
        state.track(&m.address(), "h2", ResourceRecord::Machine(m.to_config()));

        let plan = plan(&Manifest::default(), &state);

        let machine_idx = index_of(&plan, ActionType::Delete, "machine.worker");
        let app_idx = index_of(&plan, ActionType::Delete, "app.old");
        assert!(machine_idx < app_idx);
        assert_eq!(plan.actions[app_idx].dependencies, vec![machine_idx]);
    }

    #[test]
    fn test_unknown_app_is_rejected() {
        let manifest = Manifest {
            machines: vec![machine("web", "ghost", "nginx:1.27")],
            ..Manifest::default()
        };
        let diff = DiffEngine::new().compute_diff(&manifest, &ResourceState::new());
        let err = ApplyPlan::from_diff(&diff, &manifest, &ResourceState::new(), "hash")
            .expect_err("unknown app");

        assert!(matches!(err, PlanError::UnknownApp { ref app, .. } if app == "ghost"));
    }

    #[test]
    fn test_tracked_app_satisfies_reference() {
        let mut state = ResourceState::new();
        state.track("app.hello", "", ResourceRecord::App(app("hello").to_config()));
        let manifest = Manifest {
            machines: vec![machine("web", "hello", "nginx:1.27")],
            ..Manifest::default()
        };
        let diff = DiffEngine::new().compute_diff(&manifest, &state);

        assert!(ApplyPlan::from_diff(&diff, &manifest, &state, "hash").is_ok());
    }

    #[test]
    fn test_unchanged_import_is_adopted() {
        let mut state = ResourceState::new();
        state.track("app.hello", "", ResourceRecord::App(app("hello").to_config()));
        let manifest = Manifest {
            apps: vec![app("hello")],
            ..Manifest::default()
        };
        let plan = plan(&manifest, &state);

        assert!(plan.is_empty());
        assert_eq!(plan.adopted.len(), 1);
        assert_eq!(plan.adopted[0].0, "app.hello");
    }
}
