//! Fly.io API integration.
//!
//! This module provides:
//! - A GraphQL client for the control plane (apps, IP addresses)
//! - A REST client for the Machines API
//! - A probe for the local Machines API tunnel

mod graphql;
mod machines;
mod tunnel;
mod types;

#[cfg(test)]
pub mod testing;

pub use graphql::{ControlApi, ControlApiError, FlyGraphqlClient, FLY_GRAPHQL_URL};
#[cfg(test)]
pub use graphql::MockControlApi;
#[cfg(test)]
pub use machines::MockMachineApi;
pub use machines::{HttpReply, MachineApi, MachineApiError, MachinesClient, DEFAULT_MACHINES_URL};
pub use tunnel::{verify_tunnel, TunnelError};
pub use types::*;
