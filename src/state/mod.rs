//! Tracked state.
//!
//! This module persists the last known backend view of every managed
//! resource together with the hash of the declaration that produced it.

mod local;
mod lock;
mod store;
mod types;

pub use local::LocalStateStore;
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use store::StateStore;
pub use types::{
    HistoryEntry, Operation, ResourceRecord, ResourceState, TrackedResource, STATE_VERSION,
};
