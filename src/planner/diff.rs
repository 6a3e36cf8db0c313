//! Diff engine for comparing declared resources with tracked state.
//!
//! The declaration hash stored with each tracked resource decides whether
//! anything changed. Field-level details are computed only for display, and
//! to adopt imported resources that carry no hash yet.

use tracing::debug;

use crate::config::{ConfigHasher, Manifest};
use crate::resources::ResourceKind;
use crate::state::{ResourceRecord, ResourceState, TrackedResource};

/// Engine for computing diffs between declared and tracked resources.
#[derive(Debug, Default)]
pub struct DiffEngine {
    hasher: ConfigHasher,
}

/// Difference for a single address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDiff {
    /// Tracked-state address.
    pub address: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Field-level differences, when known.
    pub details: Vec<DiffDetail>,
    /// Hash stored in tracked state.
    pub old_hash: Option<String>,
    /// Hash of the current declaration.
    pub new_hash: Option<String>,
    /// Declared record, absent for deletions.
    pub desired: Option<ResourceRecord>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Declared but not tracked.
    Create,
    /// Declaration changed; the kind supports in-place updates.
    Update,
    /// Declaration changed; the kind must be deleted and recreated.
    Replace,
    /// Tracked but no longer declared.
    Delete,
    /// Unchanged.
    NoChange,
}

/// A single field difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffDetail {
    /// Field name.
    pub field: String,
    /// Tracked value.
    pub old_value: Option<String>,
    /// Declared value.
    pub new_value: Option<String>,
}

/// Complete diff result.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// Diffs for every declared or tracked address.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update in place.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Computes the diff between the manifest and tracked state.
    #[must_use]
    pub fn compute_diff(&self, manifest: &Manifest, state: &ResourceState) -> DiffResult {
        let mut diffs = Vec::new();

        let declared = manifest
            .apps
            .iter()
            .map(|a| (a.address(), ResourceRecord::App(a.to_config()), self.hasher.hash_app(a)))
            .chain(manifest.machines.iter().map(|m| {
                (
                    m.address(),
                    ResourceRecord::Machine(m.to_config()),
                    self.hasher.hash_machine(m),
                )
            }))
            .chain(manifest.ips.iter().map(|i| {
                (i.address(), ResourceRecord::Ip(i.to_config()), self.hasher.hash_ip(i))
            }));

        for (address, desired, new_hash) in declared {
            let tracked = state.get(&address);
            diffs.push(Self::compute_resource_diff(address, desired, new_hash, tracked));
        }

        let declared_addresses = manifest.addresses();
        for tracked in state.resources.values() {
            if !declared_addresses.contains(&tracked.address) {
                debug!("{} is tracked but no longer declared", tracked.address);
                diffs.push(ResourceDiff {
                    address: tracked.address.clone(),
                    kind: tracked.resource.kind(),
                    diff_type: DiffType::Delete,
                    details: Vec::new(),
                    old_hash: Some(tracked.config_hash.clone()),
                    new_hash: None,
                    desired: None,
                });
            }
        }

        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();
        DiffResult {
            creates: count(DiffType::Create),
            updates: count(DiffType::Update),
            replaces: count(DiffType::Replace),
            deletes: count(DiffType::Delete),
            unchanged: count(DiffType::NoChange),
            diffs,
        }
    }

    fn compute_resource_diff(
        address: String,
        desired: ResourceRecord,
        new_hash: String,
        tracked: Option<&TrackedResource>,
    ) -> ResourceDiff {
        let kind = desired.kind();
        let Some(tracked) = tracked else {
            debug!("{address} needs to be created");
            return ResourceDiff {
                address,
                kind,
                diff_type: DiffType::Create,
                details: Vec::new(),
                old_hash: None,
                new_hash: Some(new_hash),
                desired: Some(desired),
            };
        };

        let details = field_changes(&desired, &tracked.resource);
        let changed = if tracked.config_hash.is_empty() {
            // Imported: no declaration hash yet, so compare fields.
            !details.is_empty()
        } else {
            !ConfigHasher::hashes_match(&tracked.config_hash, &new_hash)
        };

        let diff_type = match (changed, kind) {
            (false, _) => DiffType::NoChange,
            (true, ResourceKind::App) => DiffType::Update,
            (true, ResourceKind::Machine | ResourceKind::Ip) => DiffType::Replace,
        };
        debug!("{address}: {diff_type}");

        ResourceDiff {
            address,
            kind,
            diff_type,
            details,
            old_hash: Some(tracked.config_hash.clone()),
            new_hash: Some(new_hash),
            desired: Some(desired),
        }
    }
}

/// Compares the declared fields of `desired` with a tracked record.
///
/// Fields the declaration leaves unset are not compared.
fn field_changes(desired: &ResourceRecord, tracked: &ResourceRecord) -> Vec<DiffDetail> {
    let mut details = Vec::new();
    let mut compare = |field: &str, new: Option<String>, old: Option<String>| {
        if new.is_some() && new != old {
            details.push(DiffDetail {
                field: field.to_string(),
                old_value: old,
                new_value: new,
            });
        }
    };

    match (desired, tracked) {
        (ResourceRecord::App(new), ResourceRecord::App(old)) => {
            compare("org", new.org.clone(), old.org.clone());
            compare("network", new.network.clone(), old.network.clone());
            compare(
                "preferred_region",
                new.preferred_region.clone(),
                old.preferred_region.clone(),
            );
            if !new.regions.is_empty() {
                compare("regions", Some(region_set(&new.regions)), Some(region_set(&old.regions)));
            }
        }
        (ResourceRecord::Machine(new), ResourceRecord::Machine(old)) => {
            compare("app", Some(new.app.clone()), Some(old.app.clone()));
            compare("image", Some(new.image.clone()), Some(old.image.clone()));
            compare("region", new.region.clone(), old.region.clone());
            compare("cpus", new.cpus.map(|c| c.to_string()), old.cpus.map(|c| c.to_string()));
            compare(
                "memory_mb",
                new.memory_mb.map(|m| m.to_string()),
                old.memory_mb.map(|m| m.to_string()),
            );
            compare("cpu_kind", new.cpu_kind.clone(), old.cpu_kind.clone());
        }
        (ResourceRecord::Ip(new), ResourceRecord::Ip(old)) => {
            compare("app", Some(new.app.clone()), Some(old.app.clone()));
            compare(
                "type",
                Some(new.address_type.to_string()),
                Some(old.address_type.to_string()),
            );
            compare("region", new.region.clone(), old.region.clone());
        }
        _ => compare(
            "kind",
            Some(desired.kind().to_string()),
            Some(tracked.kind().to_string()),
        ),
    }

    details
}

fn region_set(regions: &[String]) -> String {
    let mut sorted: Vec<&str> = regions.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join(",")
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    /// Diffs that require action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::NoChange)
            .collect()
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.address, self.diff_type)?;
        if !self.details.is_empty() {
            let fields: Vec<&str> = self.details.iter().map(|d| d.field.as_str()).collect();
            write!(f, " ({})", fields.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppSpec, IpSpec, MachineSpec};
    use crate::fly::IpAddressType;
    use crate::resources::{AppConfig, IpAddressConfig};

    fn manifest() -> Manifest {
        Manifest {
            apps: vec![AppSpec {
                name: String::from("hello"),
                org: None,
                network: None,
                preferred_region: None,
                regions: vec![String::from("ord")],
            }],
            machines: vec![MachineSpec {
                name: String::from("web"),
                app: String::from("hello"),
                image: String::from("nginx:1.27"),
                region: Some(String::from("ord")),
                cpus: None,
                memory_mb: None,
                cpu_kind: None,
            }],
            ips: vec![IpSpec {
                name: String::from("public"),
                app: String::from("hello"),
                address_type: IpAddressType::V6,
                region: None,
            }],
            ..Manifest::default()
        }
    }

    fn applied_state(manifest: &Manifest) -> ResourceState {
        let hasher = ConfigHasher::new();
        let mut state = ResourceState::new();
        for app in &manifest.apps {
            state.track(&app.address(), &hasher.hash_app(app), ResourceRecord::App(app.to_config()));
        }
        for machine in &manifest.machines {
            state.track(
                &machine.address(),
                &hasher.hash_machine(machine),
                ResourceRecord::Machine(machine.to_config()),
            );
        }
        for ip in &manifest.ips {
            state.track(&ip.address(), &hasher.hash_ip(ip), ResourceRecord::Ip(ip.to_config()));
        }
        state
    }

    fn diff_for<'a>(result: &'a DiffResult, address: &str) -> &'a ResourceDiff {
        result
            .diffs
            .iter()
            .find(|d| d.address == address)
            .expect("diff for address")
    }

    #[test]
    fn test_empty_state_creates_everything() {
        let result = DiffEngine::new().compute_diff(&manifest(), &ResourceState::new());

        assert_eq!(result.creates, 3);
        assert_eq!(result.total_changes(), 3);
        assert!(result.diffs.iter().all(|d| d.desired.is_some()));
    }

    #[test]
    fn test_applied_state_has_no_changes() {
        let manifest = manifest();
        let result = DiffEngine::new().compute_diff(&manifest, &applied_state(&manifest));

        assert!(!result.has_changes());
        assert_eq!(result.unchanged, 3);
    }

    #[test]
    fn test_changed_app_updates_in_place() {
        let original = manifest();
        let state = applied_state(&original);

        let mut changed = original;
        changed.apps[0].regions.push(String::from("ams"));
        let result = DiffEngine::new().compute_diff(&changed, &state);

        let diff = diff_for(&result, "app.hello");
        assert_eq!(diff.diff_type, DiffType::Update);
        assert_eq!(diff.details[0].field, "regions");
        assert_eq!(diff.details[0].new_value.as_deref(), Some("ams,ord"));
    }

    #[test]
    fn test_changed_machine_and_ip_are_replaced() {
        let original = manifest();
        let state = applied_state(&original);

        let mut changed = original;
        changed.machines[0].image = String::from("nginx:1.28");
        changed.ips[0].address_type = IpAddressType::V4;
        let result = DiffEngine::new().compute_diff(&changed, &state);

        assert_eq!(diff_for(&result, "machine.web").diff_type, DiffType::Replace);
        assert_eq!(diff_for(&result, "ip.public").diff_type, DiffType::Replace);
        assert_eq!(result.replaces, 2);
    }

    #[test]
    fn test_undeclared_resource_is_deleted() {
        let original = manifest();
        let state = applied_state(&original);

        let mut changed = original;
        changed.ips.clear();
        let result = DiffEngine::new().compute_diff(&changed, &state);

        let diff = diff_for(&result, "ip.public");
        assert_eq!(diff.diff_type, DiffType::Delete);
        assert!(diff.desired.is_none());
        assert_eq!(result.deletes, 1);
    }

    #[test]
    fn test_imported_resource_is_adopted_when_fields_match() {
        let manifest = manifest();
        let mut state = ResourceState::new();
        state.track(
            "app.hello",
            "",
            ResourceRecord::App(AppConfig {
                name: String::from("hello"),
                id: Some(String::from("hello")),
                org: Some(String::from("org-1")),
                regions: vec![String::from("ord")],
                ..AppConfig::default()
            }),
        );
        state.track(
            "ip.public",
            "",
            ResourceRecord::Ip(IpAddressConfig {
                app: String::from("hello"),
                address_type: IpAddressType::V4,
                region: Some(String::from("global")),
                id: Some(String::from("ip_1")),
                address: Some(String::from("1.2.3.4")),
            }),
        );

        let result = DiffEngine::new().compute_diff(&manifest, &state);

        assert_eq!(diff_for(&result, "app.hello").diff_type, DiffType::NoChange);
        let ip = diff_for(&result, "ip.public");
        assert_eq!(ip.diff_type, DiffType::Replace);
        assert_eq!(ip.details[0].field, "type");
    }
}
