//! State management.
//!
//! Holds the last-applied view of every resource instance, the local
//! file backend that persists it, and the lock guarding that file.

mod local;
mod lock;
mod store;
mod types;

pub use local::LocalStateStore;
pub use lock::{LockInfo, generate_holder_id};
pub use store::StateStore;
pub use types::{
    InstanceState, ModuleState, ResourceState, STATE_VERSION, SharedState, State, UNKNOWN_VALUE,
};
