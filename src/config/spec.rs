//! Manifest specification types.
//!
//! This module defines the structs that map to the `flyrec.yaml` file: the
//! provider settings and the declared apps, machines and IP addresses.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::fly::{IpAddressType, DEFAULT_MACHINES_URL, FLY_GRAPHQL_URL};
use crate::resources::{AppConfig, IpAddressConfig, MachineConfig, ResourceKind, Teardown};

/// Default local state file.
pub const DEFAULT_STATE_PATH: &str = ".flyrec/state.json";

/// The root of a `flyrec.yaml` manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    /// API endpoints and client behaviour.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Tracked state location.
    #[serde(default)]
    pub state: StateConfig,
    /// Declared applications.
    #[serde(default)]
    pub apps: Vec<AppSpec>,
    /// Declared machines.
    #[serde(default)]
    pub machines: Vec<MachineSpec>,
    /// Declared IP addresses.
    #[serde(default)]
    pub ips: Vec<IpSpec>,
}

/// Provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// GraphQL control API endpoint.
    #[serde(default)]
    pub graphql_endpoint: Option<String>,
    /// Machines API base URL (the local tunnel).
    #[serde(default)]
    pub machines_endpoint: Option<String>,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Machine teardown bounds.
    #[serde(default)]
    pub teardown: TeardownConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            graphql_endpoint: None,
            machines_endpoint: None,
            request_timeout_secs: default_request_timeout(),
            teardown: TeardownConfig::default(),
        }
    }
}

impl ProviderConfig {
    /// GraphQL endpoint, falling back to the public API.
    #[must_use]
    pub fn graphql_endpoint(&self) -> &str {
        self.graphql_endpoint.as_deref().unwrap_or(FLY_GRAPHQL_URL)
    }

    /// Machines base URL, falling back to the default tunnel address.
    #[must_use]
    pub fn machines_endpoint(&self) -> &str {
        self.machines_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_MACHINES_URL)
    }
}

/// Machine teardown bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeardownConfig {
    /// Maximum observe/act iterations.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Seconds to wait during transient states.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl From<TeardownConfig> for Teardown {
    fn from(config: TeardownConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_secs(config.poll_interval_secs),
        )
    }
}

/// Tracked state location.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Local state file path.
    #[serde(default)]
    pub path: Option<String>,
}

impl StateConfig {
    /// State file path, falling back to [`DEFAULT_STATE_PATH`].
    #[must_use]
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or(DEFAULT_STATE_PATH)
    }
}

/// A declared application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppSpec {
    /// Application name, globally unique on Fly.
    pub name: String,
    /// Organization ID; the personal organization is used when unset.
    #[serde(default)]
    pub org: Option<String>,
    /// Custom network.
    #[serde(default)]
    pub network: Option<String>,
    /// Preferred region.
    #[serde(default)]
    pub preferred_region: Option<String>,
    /// Autoscale regions.
    #[serde(default)]
    pub regions: Vec<String>,
}

/// A declared machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineSpec {
    /// Machine name.
    pub name: String,
    /// Owning application.
    pub app: String,
    /// Container image.
    pub image: String,
    /// Region.
    #[serde(default)]
    pub region: Option<String>,
    /// CPU count.
    #[serde(default)]
    pub cpus: Option<i64>,
    /// Memory in MB.
    #[serde(default)]
    pub memory_mb: Option<i64>,
    /// CPU kind (`shared` or `performance`).
    #[serde(default)]
    pub cpu_kind: Option<String>,
}

/// A declared IP address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpSpec {
    /// Local name, used in the tracked-state address.
    pub name: String,
    /// Owning application.
    pub app: String,
    /// Address type.
    #[serde(rename = "type")]
    pub address_type: IpAddressType,
    /// Region, for region-scoped addresses.
    #[serde(default)]
    pub region: Option<String>,
}

impl AppSpec {
    /// Tracked-state address.
    #[must_use]
    pub fn address(&self) -> String {
        ResourceKind::App.address(&self.name)
    }

    /// Desired record handed to the reconciler.
    #[must_use]
    pub fn to_config(&self) -> AppConfig {
        AppConfig {
            name: self.name.clone(),
            id: None,
            network: self.network.clone(),
            org: self.org.clone(),
            preferred_region: self.preferred_region.clone(),
            regions: self.regions.clone(),
        }
    }
}

impl MachineSpec {
    /// Tracked-state address.
    #[must_use]
    pub fn address(&self) -> String {
        ResourceKind::Machine.address(&self.name)
    }

    /// Desired record handed to the reconciler.
    #[must_use]
    pub fn to_config(&self) -> MachineConfig {
        MachineConfig {
            name: self.name.clone(),
            app: self.app.clone(),
            image: self.image.clone(),
            region: self.region.clone(),
            cpus: self.cpus,
            memory_mb: self.memory_mb,
            cpu_kind: self.cpu_kind.clone(),
            ..MachineConfig::default()
        }
    }
}

impl IpSpec {
    /// Tracked-state address.
    #[must_use]
    pub fn address(&self) -> String {
        ResourceKind::Ip.address(&self.name)
    }

    /// Desired record handed to the reconciler.
    #[must_use]
    pub fn to_config(&self) -> IpAddressConfig {
        IpAddressConfig {
            app: self.app.clone(),
            address_type: self.address_type,
            region: self.region.clone(),
            id: None,
            address: None,
        }
    }
}

impl Manifest {
    /// Returns true if the manifest declares an application with this name.
    #[must_use]
    pub fn declares_app(&self, name: &str) -> bool {
        self.apps.iter().any(|a| a.name == name)
    }

    /// Total number of declared resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.apps.len() + self.machines.len() + self.ips.len()
    }

    /// Every declared address, apps first.
    #[must_use]
    pub fn addresses(&self) -> Vec<String> {
        self.apps
            .iter()
            .map(AppSpec::address)
            .chain(self.machines.iter().map(MachineSpec::address))
            .chain(self.ips.iter().map(IpSpec::address))
            .collect()
    }
}

const fn default_request_timeout() -> u64 {
    60
}

const fn default_max_attempts() -> u32 {
    10
}

const fn default_poll_interval() -> u64 {
    5
}
