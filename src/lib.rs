// ============================================================================
// Strict linting
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # flyrec
//!
//! Declarative, idempotent reconciliation of Fly.io applications, machines
//! and IP addresses.
//!
//! ## Overview
//!
//! Resources are declared in a `flyrec.yaml` manifest. flyrec keeps a
//! tracked-state file recording what it created and the hash of each
//! declaration, and converges the Fly backend towards the manifest:
//!
//! - Applications are created and updated through the GraphQL control API
//! - Machines are created and torn down through the Machines REST API,
//!   which is reached over a local tunnel (`fly machines api-proxy`)
//! - IP addresses are allocated and released through the GraphQL API
//!
//! ## Architecture
//!
//! 1. **Desired state**: the manifest, hashed per resource
//! 2. **Tracked state**: the last backend view of each managed resource
//! 3. **Reconcilers**: per-kind create/read/update/delete/import that never
//!    fail outright but report [`resources::Diagnostics`] and say whether the
//!    resource should remain tracked
//!
//! Machine deletion runs a bounded stop/wait/delete state machine, see
//! [`resources::Teardown`].
//!
//! ## Modules
//!
//! - [`config`]: Manifest parsing, validation and hashing
//! - [`fly`]: Fly GraphQL and Machines API clients
//! - [`resources`]: Per-kind reconcilers and diagnostics
//! - [`state`]: Tracked state and its lock
//! - [`planner`]: Diff computation, plan ordering and execution
//! - [`workspace`]: Plan, apply, refresh, destroy and import over a state store
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! apps:
//!   - name: hello
//!     regions: [ord, ams]
//!
//! machines:
//!   - name: web
//!     app: hello
//!     image: registry.fly.io/hello:latest
//!     region: ord
//!     memory_mb: 512
//!
//! ips:
//!   - name: public-v6
//!     app: hello
//!     type: v6
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod fly;
pub mod planner;
pub mod resources;
pub mod state;
pub mod workspace;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, Manifest};
pub use error::{FlyrecError, Result};
pub use fly::{ControlApi, FlyGraphqlClient, MachineApi, MachinesClient};
pub use planner::{ApplyPlan, DiffEngine, PlanExecutor};
pub use resources::{
    Diagnostic, Diagnostics, Reconciler, Reconcilers, ResourceKind, Teardown, Tracked,
};
pub use state::{LocalStateStore, ResourceState, StateStore};
pub use workspace::Workspace;
