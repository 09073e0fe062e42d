//! Plan executor.
//!
//! This module applies a [`Plan`] against the remote API. Configured
//! instances run in dependency waves on a bounded worker pool; removed
//! instances are deleted afterwards, dependents first. One instance's
//! failure never cancels unrelated instances, but its dependents are
//! skipped.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::client::Remote;
use crate::diagnostics::{Diagnostic, Severity};
use crate::error::{ApiError, ApplyError, EngineError};
use crate::registry::{Registry, ResourceHandler};
use crate::schema::{Value, merge_applied, to_config};
use crate::state::{ResourceState, WorkspaceState};

use super::diff::{DiffEngine, changed_fields};
use super::plan::{Action, Address, InstancePlan, Plan};
use super::references::{self, Reference};

/// Default number of instances applied concurrently.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Serializes mutations per remote identity.
///
/// Entries live only while some task holds or waits for the identity.
#[derive(Debug, Default)]
pub struct IdentityLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for exclusive use of `id`.
    pub async fn lock(self: &Arc<Self>, id: &str) -> IdentityGuard {
        let lock = Arc::clone(self.table().entry(id.to_string()).or_default());
        let guard = lock.lock_owned().await;
        IdentityGuard {
            table: Arc::clone(self),
            id: id.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of identities currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table().len()
    }

    /// Returns true if no identity is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    fn release(&self, id: &str) {
        let mut table = self.table();
        if table.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            table.remove(id);
        }
    }
}

/// Exclusive use of one remote identity, released on drop.
#[derive(Debug)]
pub struct IdentityGuard {
    table: Arc<IdentityLocks>,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.table.release(&self.id);
    }
}

/// What happened to one instance.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeStatus {
    /// Created, updated or replaced; the tree to record as state.
    Applied {
        /// Remote identity after apply.
        id: String,
        /// Applied attribute tree.
        attributes: Value,
    },
    /// Deleted remotely.
    Deleted,
    /// Nothing to do.
    Unchanged,
    /// The resource was gone when it was about to be updated.
    Vanished,
    /// The remote call failed. `removed` is set when the old resource was
    /// already deleted as part of a replacement.
    Failed {
        /// Whether the remote resource no longer exists.
        removed: bool,
    },
    /// Not attempted.
    Skipped,
}

/// Result of applying one instance.
#[derive(Debug, Clone)]
pub struct InstanceOutcome {
    /// Instance address.
    pub address: Address,
    /// Planned action.
    pub action: Action,
    /// Outcome.
    pub status: OutcomeStatus,
    /// Diagnostics raised for this instance.
    pub diagnostics: Vec<Diagnostic>,
}

impl InstanceOutcome {
    fn new(plan: &InstancePlan, status: OutcomeStatus) -> Self {
        Self {
            address: plan.address.clone(),
            action: plan.action,
            status,
            diagnostics: Vec::new(),
        }
    }

    fn failed(plan: &InstancePlan, error: &EngineError, removed: bool) -> Self {
        let address = plan.address.to_string();
        error!("Failed to {} {address}: {error}", plan.action);
        Self {
            diagnostics: vec![Diagnostic::from_error(error).at(address)],
            ..Self::new(plan, OutcomeStatus::Failed { removed })
        }
    }

    fn skipped(plan: &InstancePlan, reason: ApplyError) -> Self {
        let address = plan.address.to_string();
        warn!("Skipping {address}: {reason}");
        Self {
            diagnostics: vec![Diagnostic::from_apply_error(&reason).at(address)],
            ..Self::new(plan, OutcomeStatus::Skipped)
        }
    }

    /// Returns true if the instance did not reach its planned state or
    /// raised an error on the way.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self.status,
            OutcomeStatus::Failed { .. } | OutcomeStatus::Skipped | OutcomeStatus::Vanished
        ) || self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// Result of executing a plan.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// Outcomes in execution order.
    pub outcomes: Vec<InstanceOutcome>,
}

impl ExecutionResult {
    /// Every diagnostic, in execution order.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.outcomes.iter().flat_map(|o| o.diagnostics.iter().cloned()).collect()
    }

    /// Number of instances that reached their planned state through a remote call.
    #[must_use]
    pub fn successful(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Applied { .. } | OutcomeStatus::Deleted))
            .count()
    }

    /// Number of failed instances.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Failed { .. }))
            .count()
    }

    /// Number of skipped instances.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status == OutcomeStatus::Skipped).count()
    }

    /// Returns true if no error diagnostic was raised.
    #[must_use]
    pub fn success(&self) -> bool {
        self.outcomes
            .iter()
            .flat_map(|o| &o.diagnostics)
            .all(|d| d.severity != Severity::Error)
    }

    /// Addresses touched by a remote call.
    #[must_use]
    pub fn touched(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| o.action.is_mutation() && o.status != OutcomeStatus::Skipped)
            .map(|o| o.address.to_string())
            .collect()
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Applied {} changes: {} succeeded, {} failed, {} skipped",
            self.outcomes.iter().filter(|o| o.action.is_mutation()).count(),
            self.successful(),
            self.failed(),
            self.skipped()
        )
    }
}

/// Everything a worker task needs.
struct Worker {
    registry: Arc<Registry>,
    remote: Remote,
    permits: Arc<Semaphore>,
    locks: Arc<IdentityLocks>,
}

/// Executor for plans.
#[derive(Debug)]
pub struct PlanExecutor {
    registry: Arc<Registry>,
    remote: Remote,
    concurrency: usize,
    locks: Arc<IdentityLocks>,
}

impl PlanExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(registry: Arc<Registry>, remote: Remote) -> Self {
        Self {
            registry,
            remote,
            concurrency: DEFAULT_CONCURRENCY,
            locks: Arc::new(IdentityLocks::new()),
        }
    }

    /// Sets the worker pool width.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Executes a plan, recording every outcome in `state`.
    ///
    /// Failures are reported as diagnostics on the result; state keeps the
    /// last known good tree of every instance that did not apply.
    pub async fn execute(&self, plan: &Plan, state: &mut WorkspaceState) -> ExecutionResult {
        info!("Executing plan with {} changes", plan.changes().count());

        let worker = Arc::new(Worker {
            registry: Arc::clone(&self.registry),
            remote: self.remote.clone(),
            permits: Arc::new(Semaphore::new(self.concurrency)),
            locks: Arc::clone(&self.locks),
        });

        let mut applied: HashMap<Address, Value> = plan
            .instances
            .iter()
            .filter_map(|p| p.prior.clone().map(|prior| (p.address.clone(), prior)))
            .collect();
        let mut failed: HashSet<Address> = HashSet::new();
        let mut result = ExecutionResult::default();

        let (deletes, applies): (Vec<&InstancePlan>, Vec<&InstancePlan>) =
            plan.instances.iter().partition(|p| p.action == Action::Delete);

        let apply_waves = waves(&applies, |plan, other| plan.depends_on.contains(&other.address));
        let delete_waves = waves(&deletes, |plan, other| other.depends_on.contains(&plan.address));

        for wave in apply_waves.into_iter().chain(delete_waves) {
            let outcomes = self.run_wave(&worker, &wave, &applied, &failed).await;
            for (plan, mut outcome) in wave.iter().zip(outcomes) {
                self.record(plan, &mut outcome, state, &mut applied, &mut failed);
                result.outcomes.push(outcome);
            }
        }

        info!("{result}");
        result
    }

    /// Runs one wave concurrently and returns outcomes in wave order.
    async fn run_wave(
        &self,
        worker: &Arc<Worker>,
        wave: &[&InstancePlan],
        applied: &HashMap<Address, Value>,
        failed: &HashSet<Address>,
    ) -> Vec<InstanceOutcome> {
        let mut outcomes: BTreeMap<usize, InstanceOutcome> = BTreeMap::new();
        let mut tasks = JoinSet::new();

        for (index, plan) in wave.iter().enumerate() {
            if plan.action == Action::NoOp {
                outcomes.insert(index, InstanceOutcome::new(plan, OutcomeStatus::Unchanged));
                continue;
            }
            if self.remote.cancel_token().is_cancelled() {
                let reason = ApplyError::Aborted {
                    reason: String::from("cancelled before start"),
                };
                outcomes.insert(index, InstanceOutcome::skipped(plan, reason));
                continue;
            }
            if let Some(dependency) = plan.depends_on.iter().find(|d| failed.contains(*d)) {
                let reason = ApplyError::DependencyFailed {
                    address: plan.address.to_string(),
                    dependency: dependency.to_string(),
                };
                outcomes.insert(index, InstanceOutcome::skipped(plan, reason));
                continue;
            }

            let desired = plan
                .raw_desired
                .as_ref()
                .map(|raw| references::substitute(raw, &|r: &Reference| resolve_applied(r, applied)));
            let plan = (*plan).clone();
            let worker = Arc::clone(worker);
            tasks.spawn(async move { (index, worker.apply(&plan, desired).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    outcomes.insert(index, outcome);
                }
                Err(e) => error!("Apply task failed: {e}"),
            }
        }

        wave.iter()
            .enumerate()
            .map(|(index, plan)| {
                outcomes.remove(&index).unwrap_or_else(|| {
                    InstanceOutcome::failed(plan, &EngineError::internal("apply task did not complete"), false)
                })
            })
            .collect()
    }

    /// Records one outcome in state and in the run's bookkeeping. An applied
    /// tree that cannot be stored is recorded by identity alone.
    fn record(
        &self,
        plan: &InstancePlan,
        outcome: &mut InstanceOutcome,
        state: &mut WorkspaceState,
        applied: &mut HashMap<Address, Value>,
        failed: &mut HashSet<Address>,
    ) {
        let address = &plan.address;
        match &outcome.status {
            OutcomeStatus::Applied { id, attributes } => {
                let recorded = self
                    .registry
                    .schema(address.kind)
                    .map_err(EngineError::from)
                    .and_then(|schema| to_config(schema, attributes).map_err(EngineError::from));
                match recorded {
                    Ok(json) => state.upsert(ResourceState::new(address, id, json, &plan.depends_on)),
                    Err(e) => {
                        error!("Cannot record state for {address}: {e}");
                        let identity = serde_json::json!({ "id": id });
                        state.upsert(ResourceState::new(address, id, identity, &plan.depends_on));
                        outcome.diagnostics.push(Diagnostic::from_error(&e).at(address.to_string()));
                    }
                }
                applied.insert(address.clone(), attributes.clone());
            }
            OutcomeStatus::Deleted | OutcomeStatus::Vanished | OutcomeStatus::Failed { removed: true } => {
                state.remove(address);
                applied.remove(address);
            }
            OutcomeStatus::Unchanged | OutcomeStatus::Failed { removed: false } | OutcomeStatus::Skipped => {}
        }
        if outcome.is_failure() {
            failed.insert(address.clone());
        }
    }
}

/// Apply-time value of a reference: the target's freshly applied tree.
fn resolve_applied(reference: &Reference, applied: &HashMap<Address, Value>) -> Value {
    match applied.get(&reference.target) {
        Some(tree) => match reference.lookup(tree) {
            Value::Null => Value::Unknown,
            value => value,
        },
        None => Value::Unknown,
    }
}

/// Groups `items` into waves; an item joins the wave after every item it
/// must follow. `follows(a, b)` is true when `a` must run after `b`.
fn waves<'a, F>(items: &[&'a InstancePlan], follows: F) -> Vec<Vec<&'a InstancePlan>>
where
    F: Fn(&InstancePlan, &InstancePlan) -> bool,
{
    let mut levels: Vec<usize> = Vec::with_capacity(items.len());
    for i in 0..items.len() {
        let level = (0..i)
            .filter(|&j| follows(items[i], items[j]))
            .map(|j| levels[j] + 1)
            .max()
            .unwrap_or(0);
        levels.push(level);
    }

    let mut grouped: Vec<Vec<&'a InstancePlan>> = Vec::new();
    for (item, level) in items.iter().zip(levels) {
        if grouped.len() <= level {
            grouped.resize_with(level + 1, Vec::new);
        }
        grouped[level].push(*item);
    }
    grouped
}

fn ensure_known(address: &Address, desired: &Value) -> Result<(), EngineError> {
    if desired.contains_unknown() {
        return Err(ApplyError::Encode {
            address: address.to_string(),
            message: String::from("a referenced value is still unknown"),
        }
        .into());
    }
    Ok(())
}

fn missing_identity(plan: &InstancePlan) -> EngineError {
    ApplyError::MissingIdentity {
        address: plan.address.to_string(),
    }
    .into()
}

impl Worker {
    async fn apply(&self, plan: &InstancePlan, desired: Option<Value>) -> InstanceOutcome {
        let Ok(_permit) = self.permits.acquire().await else {
            return InstanceOutcome::failed(plan, &EngineError::internal("worker pool closed"), false);
        };
        let handler = match self.registry.handler(plan.address.kind) {
            Ok(handler) => handler,
            Err(e) => return InstanceOutcome::failed(plan, &EngineError::from(e), false),
        };
        debug!("{} {}", plan.action, plan.address);

        match plan.action {
            Action::NoOp => InstanceOutcome::new(plan, OutcomeStatus::Unchanged),
            Action::Create => match desired {
                Some(desired) => self.create(handler, plan, &desired, false).await,
                None => InstanceOutcome::failed(plan, &EngineError::internal("create without desired state"), false),
            },
            Action::Update => self.update(handler, plan, desired).await,
            Action::Replace => self.replace(handler, plan, desired).await,
            Action::Delete => self.delete(handler, plan).await,
        }
    }

    /// Creates the instance. `removed` marks a failure after the old
    /// resource of a replacement was already deleted.
    async fn create(
        &self,
        handler: &dyn ResourceHandler,
        plan: &InstancePlan,
        desired: &Value,
        removed: bool,
    ) -> InstanceOutcome {
        if let Err(e) = ensure_known(&plan.address, desired) {
            return InstanceOutcome::failed(plan, &e, removed);
        }
        match handler.create(&self.remote, desired).await {
            Ok(record) => {
                let attributes = merge_applied(handler.schema(), desired, &record.attributes);
                info!("Created {} ({})", plan.address, record.id);
                InstanceOutcome::new(plan, OutcomeStatus::Applied { id: record.id, attributes })
            }
            Err(EngineError::Api(ApiError::UnreadableRecord { id, message })) => {
                // Keep the identity so the next run refreshes instead of creating again.
                let address = plan.address.to_string();
                error!("Created {address} ({id}) but could not read it: {message}");
                let identity = Value::object([("id", Value::from(id.as_str()))]);
                let attributes = merge_applied(handler.schema(), desired, &identity);
                let error = EngineError::from(ApiError::UnreadableRecord { id: id.clone(), message });
                InstanceOutcome {
                    diagnostics: vec![Diagnostic::from_error(&error).at(address)],
                    ..InstanceOutcome::new(plan, OutcomeStatus::Applied { id, attributes })
                }
            }
            Err(e) => InstanceOutcome::failed(plan, &e, removed),
        }
    }

    async fn update(&self, handler: &dyn ResourceHandler, plan: &InstancePlan, desired: Option<Value>) -> InstanceOutcome {
        let (Some(id), Some(desired), Some(prior)) = (&plan.id, desired, &plan.prior) else {
            return InstanceOutcome::failed(plan, &missing_identity(plan), false);
        };
        let _guard = self.locks.lock(id).await;
        let schema = handler.schema();

        let changed = match DiffEngine::new().diff(schema, &desired, prior) {
            Ok(changes) => changed_fields(&changes),
            Err(e) => return InstanceOutcome::failed(plan, &EngineError::from(e), false),
        };
        if changed.is_empty() {
            debug!("{} unchanged once references resolved", plan.address);
            let attributes = merge_applied(schema, &desired, prior);
            return InstanceOutcome::new(plan, OutcomeStatus::Applied { id: id.clone(), attributes });
        }
        if let Err(e) = ensure_known(&plan.address, &desired) {
            return InstanceOutcome::failed(plan, &e, false);
        }

        match handler.update(&self.remote, id, &changed, &desired, prior).await {
            Ok(record) => {
                info!("Updated {} ({id}): {}", plan.address, changed.join(", "));
                let attributes = merge_applied(schema, &desired, &record.attributes);
                InstanceOutcome::new(plan, OutcomeStatus::Applied { id: record.id, attributes })
            }
            Err(e) if e.is_not_found() => {
                warn!("{} ({id}) disappeared before update", plan.address);
                InstanceOutcome {
                    diagnostics: vec![Diagnostic::disappeared(&plan.address.to_string(), id)],
                    ..InstanceOutcome::new(plan, OutcomeStatus::Vanished)
                }
            }
            Err(e) => InstanceOutcome::failed(plan, &e, false),
        }
    }

    async fn replace(&self, handler: &dyn ResourceHandler, plan: &InstancePlan, desired: Option<Value>) -> InstanceOutcome {
        let (Some(id), Some(desired)) = (&plan.id, desired) else {
            return InstanceOutcome::failed(plan, &missing_identity(plan), false);
        };
        if let Err(e) = ensure_known(&plan.address, &desired) {
            return InstanceOutcome::failed(plan, &e, false);
        }
        let _guard = self.locks.lock(id).await;

        if let Err(e) = handler.delete(&self.remote, id).await {
            return InstanceOutcome::failed(plan, &e, false);
        }
        info!("Deleted {} ({id}) for replacement", plan.address);

        if self.remote.cancel_token().is_cancelled() {
            let reason = ApplyError::Aborted {
                reason: String::from("cancelled between delete and create"),
            };
            return InstanceOutcome::failed(plan, &EngineError::from(reason), true);
        }
        self.create(handler, plan, &desired, true).await
    }

    async fn delete(&self, handler: &dyn ResourceHandler, plan: &InstancePlan) -> InstanceOutcome {
        let Some(id) = &plan.id else {
            debug!("No remote id for {}, considering delete successful", plan.address);
            return InstanceOutcome::new(plan, OutcomeStatus::Deleted);
        };
        let _guard = self.locks.lock(id).await;
        match handler.delete(&self.remote, id).await {
            Ok(()) => {
                info!("Deleted {} ({id})", plan.address);
                InstanceOutcome::new(plan, OutcomeStatus::Deleted)
            }
            Err(e) => InstanceOutcome::failed(plan, &e, false),
        }
    }
}
