// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is flagged
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
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
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # costform
//!
//! A declarative, idempotent reconciliation engine for cloud cost
//! management resources: reports, budgets, alerts, allocations, labels and
//! annotations.
//!
//! ## Overview
//!
//! You describe the resources you want in `costform.yaml`. costform reads
//! what exists remotely, computes a plan of creates, updates, replacements
//! and deletions, and applies it in dependency order.
//!
//! - Attribute schemas with defaults, computed fields and constraints
//! - References between resources (`${label.prod.id}`) resolved at apply time
//! - Drift detection against recorded state
//! - Read-only data sources with transparent pagination
//!
//! ## Architecture
//!
//! 1. **Desired state**: decoded from the workspace file against each kind's schema
//! 2. **Prior state**: recorded by the last apply and refreshed from the API
//! 3. **Plan**: per-instance actions, ordered by references
//! 4. **Apply**: bounded-concurrency execution with per-instance outcomes
//!
//! ## Modules
//!
//! - [`schema`]: Attribute trees, schemas, validation and codecs
//! - [`kinds`]: The managed resource and data source kinds
//! - [`client`]: HTTP client with retries and cancellation
//! - [`registry`]: Per-kind CRUD dispatch
//! - [`planner`]: Diffing, planning and plan execution
//! - [`reader`]: Data source reads
//! - [`state`]: State storage and locking
//! - [`config`]: Workspace file parsing and validation
//! - [`reconciler`]: Plan, apply, refresh and drift entry points
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! workspace: finops
//!
//! resources:
//!   - kind: label
//!     name: prod
//!     attributes:
//!       name: prod
//!       color: blue
//!   - kind: annotation
//!     name: release
//!     attributes:
//!       content: "v2 rollout"
//!       timestamp: "2024-01-01T00:00:00Z"
//!       labels: ["${label.prod.id}"]
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod client;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod kinds;
pub mod planner;
pub mod reader;
pub mod reconciler;
pub mod registry;
pub mod schema;
pub mod state;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, WorkspaceConfig};
pub use diagnostics::{Diagnostic, Severity};
pub use error::{EngineError, Result};
pub use kinds::{DataSourceKind, ResourceKind};
pub use planner::{Action, Address, DiffEngine, Plan, PlanExecutor};
pub use reader::DataSourceReader;
pub use reconciler::{DriftReport, PlanReport, ReconciliationResult, Reconciler};
pub use registry::Registry;
pub use state::{LocalStateStore, StateStore, WorkspaceState};
