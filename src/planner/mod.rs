//! Planning and apply.
//!
//! This module compares desired configuration with prior state, produces
//! a [`Plan`] of per-instance actions, and executes it against the remote
//! API.

mod diff;
mod executor;
mod plan;
mod references;

pub use diff::{AttributeChange, ChangeKind, DiffEngine, changed_fields, requires_replace};
pub use executor::{DEFAULT_CONCURRENCY, ExecutionResult, IdentityGuard, IdentityLocks, InstanceOutcome, OutcomeStatus, PlanExecutor};
pub use plan::{Action, Address, InstancePlan, Plan, ResourceInstance, plan_instance};
pub use references::{Reference, collect as collect_references, substitute as substitute_references};
