//! Fly API types and data structures.
//!
//! Control-plane records returned by the GraphQL API, and the request and
//! response bodies of the Machines REST API.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message the control API uses for objects it cannot resolve.
pub const NOT_FOUND_MARKER: &str = "Could not resolve ";

/// An application as reported by the control API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRecord {
    /// Application name, also its canonical identifier.
    pub name: String,
    /// Custom network ID (empty when the default network is used).
    pub network: String,
    /// Owning organization ID.
    pub organization_id: String,
    /// Preferred region from the autoscaling config.
    pub preferred_region: String,
    /// Autoscaling region codes, in backend order.
    pub regions: Vec<String>,
}

/// Input for the create-application mutations.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppInput {
    /// Application name.
    pub name: String,
    /// Organization ID to create the app in.
    pub organization_id: String,
    /// Preferred region.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_region: Option<String>,
    /// Custom network.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

/// One region entry of an autoscale config update.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AutoscaleRegionInput {
    /// Region code, e.g. `ord`.
    pub code: String,
}

impl AutoscaleRegionInput {
    /// Builds one entry per region code, preserving order.
    #[must_use]
    pub fn from_codes(codes: &[String]) -> Vec<Self> {
        codes.iter().map(|code| Self { code: code.clone() }).collect()
    }
}

/// An organization visible to the API token.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Organization {
    /// Organization ID.
    pub id: String,
    /// Organization slug.
    #[serde(default)]
    pub slug: String,
    /// Organization type (`PERSONAL`, `SHARED`, ...).
    #[serde(rename = "type", default)]
    pub org_type: String,
}

impl Organization {
    /// Returns true for the personal organization of the token owner.
    #[must_use]
    pub fn is_personal(&self) -> bool {
        self.org_type.eq_ignore_ascii_case("PERSONAL")
    }
}

/// Kind of IP address.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum IpAddressType {
    /// Dedicated public IPv4.
    #[serde(rename = "v4")]
    V4,
    /// Public IPv6.
    #[serde(rename = "v6")]
    V6,
    /// Private IPv6 (flycast).
    #[serde(rename = "private_v6")]
    PrivateV6,
    /// Shared public IPv4.
    #[serde(rename = "shared_v4")]
    SharedV4,
}

impl fmt::Display for IpAddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::V4 => "v4",
            Self::V6 => "v6",
            Self::PrivateV6 => "private_v6",
            Self::SharedV4 => "shared_v4",
        };
        write!(f, "{s}")
    }
}

/// Input for allocating an IP address.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllocateIpInput {
    /// Application to attach the address to.
    pub app_id: String,
    /// Address type.
    #[serde(rename = "type")]
    pub address_type: IpAddressType,
    /// Region, for region-scoped addresses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// An IP address as reported by the control API.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IpAddressRecord {
    /// Backend identifier.
    pub id: String,
    /// The address itself.
    pub address: String,
    /// Address type.
    #[serde(rename = "type")]
    pub address_type: IpAddressType,
    /// Region (`global` for anycast addresses).
    #[serde(default)]
    pub region: String,
}

/// One segment of a GraphQL error path.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PathSegment {
    /// Field name.
    Key(String),
    /// List index.
    Index(u64),
}

/// One entry of a structured backend error list.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BackendError {
    /// Error message.
    pub message: String,
    /// Path of the field that failed.
    #[serde(default)]
    pub path: Vec<PathSegment>,
}

impl BackendError {
    /// Creates an entry with a single-field path.
    #[must_use]
    pub fn new(message: impl Into<String>, field: &str) -> Self {
        Self {
            message: message.into(),
            path: vec![PathSegment::Key(field.to_string())],
        }
    }

    /// Creates the entry the control API uses for unresolvable objects.
    #[must_use]
    pub fn not_found(field: &str) -> Self {
        Self::new(NOT_FOUND_MARKER, field)
    }

    /// Returns true if this entry is the not-found marker.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.message == NOT_FOUND_MARKER
    }

    /// Renders the path as `field.sub[0].leaf`.
    #[must_use]
    pub fn path_string(&self) -> String {
        let mut out = String::new();
        for segment in &self.path {
            match segment {
                PathSegment::Key(key) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(key);
                }
                PathSegment::Index(index) => {
                    out.push('[');
                    out.push_str(&index.to_string());
                    out.push(']');
                }
            }
        }
        out
    }
}

/// Runtime state of a machine as reported by the Machines API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Created but never started.
    Created,
    /// Booting.
    Starting,
    /// Running.
    Started,
    /// Stop requested.
    Stopping,
    /// Stopped.
    Stopped,
    /// Destroy requested.
    Destroying,
    /// Gone.
    Destroyed,
    /// Any state this client does not know about.
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Body of `POST /v1/apps/{app}/machines`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CreateMachineRequest {
    /// Machine name.
    pub name: String,
    /// Region to place the machine in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Machine configuration.
    pub config: MachineConfigRequest,
    /// Guest sizing, only present when at least one field is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest: Option<GuestRequest>,
}

/// `config` section of a create request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MachineConfigRequest {
    /// Container image.
    pub image: String,
}

/// Guest sizing of a create request. Unset fields are omitted.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct GuestRequest {
    /// CPU count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<i64>,
    /// Memory in MB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<i64>,
    /// CPU kind (`shared`, `performance`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_type: Option<String>,
}

impl GuestRequest {
    /// Returns true if no sizing field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.cpus.is_none() && self.memory_mb.is_none() && self.cpu_type.is_none()
    }
}

/// A machine as returned by the Machines API.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Machine {
    /// Machine ID.
    pub id: String,
    /// Machine name.
    #[serde(default)]
    pub name: String,
    /// Runtime state.
    #[serde(default)]
    pub state: InstanceState,
    /// Region.
    #[serde(default)]
    pub region: String,
    /// Instance (version) ID.
    #[serde(default)]
    pub instance_id: String,
    /// Private 6PN address.
    #[serde(default)]
    pub private_ip: String,
    /// Effective configuration.
    #[serde(default)]
    pub config: MachineConfigResponse,
    /// Creation timestamp.
    #[serde(default)]
    pub created_at: Option<String>,
}

/// `config` section of a machine response.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct MachineConfigResponse {
    /// Container image.
    #[serde(default)]
    pub image: String,
    /// Effective guest sizing.
    #[serde(default)]
    pub guest: GuestResponse,
}

/// Effective guest sizing of a machine.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct GuestResponse {
    /// CPU kind.
    #[serde(default)]
    pub cpu_kind: String,
    /// CPU count.
    #[serde(default)]
    pub cpus: i64,
    /// Memory in MB.
    #[serde(default)]
    pub memory_mb: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_string() {
        let err: BackendError = serde_json::from_value(serde_json::json!({
            "message": "boom",
            "path": ["apps", 0, "name"]
        }))
        .expect("valid error entry");

        assert_eq!(err.path_string(), "apps[0].name");
        assert!(!err.is_not_found());
        assert!(BackendError::not_found("app").is_not_found());
    }

    #[test]
    fn test_unknown_instance_state() {
        let machine: Machine = serde_json::from_value(serde_json::json!({
            "id": "148e",
            "state": "replacing"
        }))
        .expect("valid machine");

        assert_eq!(machine.state, InstanceState::Unknown);
        assert_eq!(machine.config.guest.cpus, 0);
    }

    #[test]
    fn test_create_request_omits_unset_sizing() {
        let request = CreateMachineRequest {
            name: String::from("web"),
            region: None,
            config: MachineConfigRequest {
                image: String::from("nginx:latest"),
            },
            guest: Some(GuestRequest {
                cpus: Some(2),
                ..GuestRequest::default()
            }),
        };

        let body = serde_json::to_value(&request).expect("serializable");
        assert_eq!(
            body,
            serde_json::json!({
                "name": "web",
                "config": { "image": "nginx:latest" },
                "guest": { "cpus": 2 }
            })
        );
    }

    #[test]
    fn test_ip_type_wire_names() {
        assert_eq!(
            serde_json::to_value(IpAddressType::PrivateV6).expect("serializable"),
            serde_json::json!("private_v6")
        );
        assert_eq!(IpAddressType::SharedV4.to_string(), "shared_v4");
    }
}
