//! IP address reconciler.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::fly::{AllocateIpInput, ControlApi, IpAddressType};

use super::diagnostics::{DiagnosticKind, Diagnostics};
use super::types::{IpAddressConfig, ResourceKind};
use super::{is_not_found, record_control_error, Reconciler, Tracked};

/// Reconciles IP addresses through the control API.
pub struct IpReconciler {
    api: Arc<dyn ControlApi>,
}

impl IpReconciler {
    /// Creates a reconciler over the given control API.
    #[must_use]
    pub fn new(api: Arc<dyn ControlApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Reconciler for IpReconciler {
    type Config = IpAddressConfig;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Ip
    }

    async fn create(
        &self,
        desired: &IpAddressConfig,
        diags: &mut Diagnostics,
    ) -> Tracked<IpAddressConfig> {
        let input = AllocateIpInput {
            app_id: desired.app.clone(),
            address_type: desired.address_type,
            region: desired.region.clone(),
        };

        match self.api.allocate_ip(&input).await {
            Ok(record) => {
                info!(app = %desired.app, address = %record.address, "Allocated IP address");
                Tracked::Present(desired.clone().with_record(record))
            }
            Err(e) => {
                record_control_error(&e, "Allocate IP address failed", diags);
                Tracked::Absent
            }
        }
    }

    async fn read(
        &self,
        state: &IpAddressConfig,
        diags: &mut Diagnostics,
    ) -> Tracked<IpAddressConfig> {
        let Some(address) = state.address.as_deref().filter(|a| !a.is_empty()) else {
            diags.add_error(
                DiagnosticKind::QueryFailed,
                "Read: query failed",
                format!("IP address of app {} has no address", state.app),
            );
            return Tracked::Present(state.clone());
        };

        match self.api.get_ip(&state.app, address).await {
            Ok(record) => Tracked::Present(state.clone().with_record(record)),
            Err(e) if is_not_found(&e) => {
                info!(app = %state.app, address, "IP address no longer exists");
                Tracked::Absent
            }
            Err(e) => {
                record_control_error(&e, "Read: query failed", diags);
                Tracked::Present(state.clone())
            }
        }
    }

    async fn update(
        &self,
        _plan: &IpAddressConfig,
        prior: &IpAddressConfig,
        diags: &mut Diagnostics,
    ) -> Tracked<IpAddressConfig> {
        diags.add_error(
            DiagnosticKind::UnsupportedOperation,
            "IP address update not available",
            "not allowed by backend; delete and recreate",
        );
        Tracked::Present(prior.clone())
    }

    async fn delete(
        &self,
        state: &IpAddressConfig,
        diags: &mut Diagnostics,
    ) -> Tracked<IpAddressConfig> {
        if let Some(id) = state.id.as_deref().filter(|id| !id.is_empty()) {
            if let Err(e) = self.api.release_ip(id).await {
                record_control_error(&e, "Release IP address failed", diags);
                warn!(app = %state.app, id, "Release failed; the address is no longer tracked");
            } else {
                info!(app = %state.app, id, "Released IP address");
            }
        }

        Tracked::Absent
    }

    fn import_state(&self, id: &str, diags: &mut Diagnostics) -> Tracked<IpAddressConfig> {
        match id.split_once('/') {
            Some((app, address)) if !app.is_empty() && !address.is_empty() => {
                // Refined by the following read.
                let address_type = if address.contains(':') {
                    IpAddressType::V6
                } else {
                    IpAddressType::V4
                };
                Tracked::Present(IpAddressConfig {
                    app: app.to_string(),
                    address_type,
                    region: None,
                    id: None,
                    address: Some(address.to_string()),
                })
            }
            _ => {
                diags.add_error(
                    DiagnosticKind::InvalidImportId,
                    "Invalid import ID",
                    format!("expected <app>/<address>, got {id:?}"),
                );
                Tracked::Absent
            }
        }
    }
}
