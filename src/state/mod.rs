//! State management module.
//!
//! This module records what each apply produced: remote identities, the
//! applied attribute trees and the references between instances. That
//! record is the prior state of the next plan.

mod local;
mod lock;
mod store;
mod types;

pub use local::{DEFAULT_STATE_PATH, LocalStateStore};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use store::StateStore;
pub use types::{HistoryEntry, Operation, ResourceState, STATE_VERSION, WorkspaceState};
