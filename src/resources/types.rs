//! Tracked resource records.
//!
//! The same record type serves as desired configuration, plan and stored
//! state. `None` on an optional field means the value is unknown (not yet
//! assigned by the backend, or not declared).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::fly::{AppRecord, IpAddressRecord, IpAddressType, Machine};

/// Kind of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Fly application.
    App,
    /// Fly machine.
    Machine,
    /// IP address attached to an application.
    Ip,
}

impl ResourceKind {
    /// Address prefix used in tracked state.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Machine => "machine",
            Self::Ip => "ip",
        }
    }

    /// Builds the tracked-state address of a named resource.
    #[must_use]
    pub fn address(self, name: &str) -> String {
        format!("{}.{name}", self.prefix())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(Self::App),
            "machine" => Ok(Self::Machine),
            "ip" => Ok(Self::Ip),
            other => Err(format!("unknown resource kind '{other}' (expected app, machine or ip)")),
        }
    }
}

/// An application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name.
    pub name: String,
    /// Backend identifier, equal to the name once created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Custom network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Organization ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    /// Preferred region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_region: Option<String>,
    /// Autoscale region codes.
    #[serde(default)]
    pub regions: Vec<String>,
}

impl From<AppRecord> for AppConfig {
    fn from(record: AppRecord) -> Self {
        Self {
            id: Some(record.name.clone()),
            name: record.name,
            network: Some(record.network),
            org: Some(record.organization_id),
            preferred_region: Some(record.preferred_region),
            regions: record.regions,
        }
    }
}

/// A machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Machine name.
    pub name: String,
    /// Owning application. Not echoed by the backend.
    pub app: String,
    /// Container image.
    pub image: String,
    /// Region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Backend-assigned machine ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// CPU count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<i64>,
    /// Memory in MB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<i64>,
    /// CPU kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_kind: Option<String>,
    /// Instance (version) ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Private 6PN address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
}

impl MachineConfig {
    /// Overwrites every backend-reported field, keeping `app`.
    #[must_use]
    pub fn with_machine(self, machine: Machine) -> Self {
        Self {
            name: machine.name,
            app: self.app,
            image: machine.config.image,
            region: Some(machine.region),
            id: Some(machine.id),
            cpus: Some(machine.config.guest.cpus),
            memory_mb: Some(machine.config.guest.memory_mb),
            cpu_kind: Some(machine.config.guest.cpu_kind),
            instance_id: Some(machine.instance_id),
            private_ip: Some(machine.private_ip),
        }
    }
}

/// An IP address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddressConfig {
    /// Owning application.
    pub app: String,
    /// Address type.
    #[serde(rename = "type")]
    pub address_type: IpAddressType,
    /// Region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Backend-assigned ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The allocated address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl IpAddressConfig {
    /// Replaces every backend-reported field, keeping `app`.
    #[must_use]
    pub fn with_record(self, record: IpAddressRecord) -> Self {
        Self {
            app: self.app,
            address_type: record.address_type,
            region: Some(record.region),
            id: Some(record.id),
            address: Some(record.address),
        }
    }
}
