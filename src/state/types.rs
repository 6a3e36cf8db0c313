//! Tracked state types.
//!
//! Tracked state is the last known backend view of every managed resource,
//! keyed by address (`app.<name>`, `machine.<name>`, `ip.<name>`), along with
//! the hash of the declaration that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::resources::{AppConfig, IpAddressConfig, MachineConfig, ResourceKind};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept.
const MAX_HISTORY: usize = 100;

/// The complete tracked state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceState {
    /// State format version.
    pub version: String,
    /// Incremented on every save.
    #[serde(default)]
    pub serial: u64,
    /// Tracked resources by address.
    #[serde(default)]
    pub resources: BTreeMap<String, TrackedResource>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent operations.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// A single tracked resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedResource {
    /// Tracked-state address.
    pub address: String,
    /// Hash of the declaration last applied (empty for imports).
    #[serde(default)]
    pub config_hash: String,
    /// Backend view of the resource.
    pub resource: ResourceRecord,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

/// Backend view of a resource, by kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "attributes", rename_all = "lowercase")]
pub enum ResourceRecord {
    /// An application.
    App(AppConfig),
    /// A machine.
    Machine(MachineConfig),
    /// An IP address.
    Ip(IpAddressConfig),
}

impl ResourceRecord {
    /// Kind of the record.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::App(_) => ResourceKind::App,
            Self::Machine(_) => ResourceKind::Machine,
            Self::Ip(_) => ResourceKind::Ip,
        }
    }

    /// Backend identifier, if assigned.
    #[must_use]
    pub fn remote_id(&self) -> Option<&str> {
        match self {
            Self::App(app) => app.id.as_deref(),
            Self::Machine(machine) => machine.id.as_deref(),
            Self::Ip(ip) => ip.address.as_deref(),
        }
    }

    /// Application the resource belongs to.
    #[must_use]
    pub fn app_name(&self) -> &str {
        match self {
            Self::App(app) => &app.name,
            Self::Machine(machine) => &machine.app,
            Self::Ip(ip) => &ip.app,
        }
    }
}

/// A single entry in the operation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// When the operation finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: Operation,
    /// Manifest hash at the time, if a manifest was involved.
    #[serde(default)]
    pub config_hash: String,
    /// Addresses affected.
    pub resources: Vec<String>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of recorded operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Plan applied.
    Apply,
    /// State refreshed from the backend.
    Refresh,
    /// Everything destroyed.
    Destroy,
    /// Existing resource imported.
    Import,
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceState {
    /// Creates a new empty state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            serial: 0,
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a tracked resource by address.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<&TrackedResource> {
        self.resources.get(address)
    }

    /// Tracks a resource, replacing any previous record at the address.
    pub fn track(&mut self, address: &str, config_hash: &str, resource: ResourceRecord) {
        self.resources.insert(
            address.to_string(),
            TrackedResource {
                address: address.to_string(),
                config_hash: config_hash.to_string(),
                resource,
                updated_at: Utc::now(),
            },
        );
        self.last_updated = Utc::now();
    }

    /// Replaces the record at an address, keeping its hash.
    pub fn refresh(&mut self, address: &str, resource: ResourceRecord) {
        if let Some(tracked) = self.resources.get_mut(address) {
            if tracked.resource != resource {
                tracked.resource = resource;
                tracked.updated_at = Utc::now();
                self.last_updated = Utc::now();
            }
        }
    }

    /// Records a declaration hash for a tracked address.
    ///
    /// Returns false if the address is not tracked or already carries it.
    pub fn set_hash(&mut self, address: &str, config_hash: &str) -> bool {
        match self.resources.get_mut(address) {
            Some(tracked) if tracked.config_hash != config_hash => {
                tracked.config_hash = config_hash.to_string();
                tracked.updated_at = Utc::now();
                self.last_updated = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Stops tracking an address.
    pub fn untrack(&mut self, address: &str) -> Option<TrackedResource> {
        let result = self.resources.remove(address);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Tracked resources of one kind.
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &TrackedResource> {
        self.resources
            .values()
            .filter(move |r| r.resource.kind() == kind)
    }

    /// Returns true if an application with this name is tracked.
    #[must_use]
    pub fn tracks_app(&self, name: &str) -> bool {
        self.resources.contains_key(&ResourceKind::App.address(name))
    }

    /// Adds a history entry, dropping the oldest beyond the limit.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// All tracked addresses.
    #[must_use]
    pub fn addresses(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }
}

impl HistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(operation: Operation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: Operation,
        config_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::new(operation, config_hash, resources)
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Refresh => "refresh",
            Self::Destroy => "destroy",
            Self::Import => "import",
        };
        write!(f, "{op}")
    }
}
