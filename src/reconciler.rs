//! Reconciler for converging remote resources to the workspace file.
//!
//! This module joins the workspace configuration with recorded state,
//! refreshes prior state from the remote API, builds plans and applies them,
//! and persists the new state with a history entry.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::Remote;
use crate::config::{ConfigValidator, WorkspaceConfig};
use crate::diagnostics::{Diagnostic, has_errors};
use crate::error::{EngineError, Result};
use crate::kinds::ResourceKind;
use crate::planner::{
    Action, Address, DEFAULT_CONCURRENCY, DiffEngine, ExecutionResult, OutcomeStatus, Plan, PlanExecutor,
    ResourceInstance,
};
use crate::reader::DataSourceReader;
use crate::registry::Registry;
use crate::schema::{ObjectSchema, from_config, to_config};
use crate::state::{HistoryEntry, LockInfo, Operation, ResourceState, StateStore, WorkspaceState, generate_holder_id};

/// Reconciler for one workspace.
pub struct Reconciler<'a, S: StateStore> {
    /// Workspace configuration.
    config: &'a WorkspaceConfig,
    /// State store.
    state_store: &'a S,
    /// Per-kind handlers and schemas.
    registry: Arc<Registry>,
    /// Remote API access.
    remote: Remote,
    /// Instances applied concurrently.
    concurrency: usize,
}

/// A plan together with the refreshed state it was computed against.
#[derive(Debug)]
pub struct PlanReport {
    /// What the plan is for.
    pub operation: Operation,
    /// The plan, absent when configuration or planning failed.
    pub plan: Option<Plan>,
    /// Refreshed state the plan applies to.
    pub state: WorkspaceState,
    /// Diagnostics from validation, refresh and planning.
    pub diagnostics: Vec<Diagnostic>,
}

/// Result of applying a plan.
#[derive(Debug, serde::Serialize)]
pub struct ReconciliationResult {
    /// Whether every instance applied without error diagnostics.
    pub success: bool,
    /// Number of resources created.
    pub created: usize,
    /// Number of resources updated in place.
    pub updated: usize,
    /// Number of resources replaced.
    pub replaced: usize,
    /// Number of resources deleted.
    pub deleted: usize,
    /// Number of resources unchanged.
    pub unchanged: usize,
    /// Number of instances that failed.
    pub failed: usize,
    /// Number of instances skipped.
    pub skipped: usize,
    /// Every diagnostic produced.
    pub diagnostics: Vec<Diagnostic>,
    /// Final state after reconciliation.
    #[serde(skip)]
    pub final_state: Option<WorkspaceState>,
}

/// Report of drift between recorded state and the remote API.
#[derive(Debug, serde::Serialize)]
pub struct DriftReport {
    /// Whether drift was detected.
    pub has_drift: bool,
    /// Resources whose remote attributes differ from recorded state.
    pub drifted_resources: Vec<String>,
    /// Resources that no longer exist remotely.
    pub disappeared: Vec<String>,
    /// Number of resources in recorded state.
    pub total_resources: usize,
    /// Errors from reading the remote API.
    pub diagnostics: Vec<Diagnostic>,
}

impl<'a, S: StateStore> Reconciler<'a, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(config: &'a WorkspaceConfig, state_store: &'a S, registry: Arc<Registry>, remote: Remote) -> Self {
        Self {
            config,
            state_store,
            registry,
            remote,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Sets the number of instances applied concurrently.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Acquires the state lock for `operation`.
    ///
    /// # Errors
    ///
    /// Returns an error if another holder owns an unexpired lock.
    pub async fn lock(&self, operation: Operation) -> Result<LockInfo> {
        self.state_store
            .acquire_lock(&generate_holder_id(), &operation.to_string())
            .await
    }

    /// Releases the state lock, logging instead of failing.
    pub async fn unlock(&self, lock: &LockInfo) {
        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {e}", lock.lock_id);
        }
    }

    /// Loads recorded state, or an empty state for a new workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be read.
    pub async fn load_state(&self) -> Result<WorkspaceState> {
        Ok(self
            .state_store
            .load()
            .await?
            .unwrap_or_else(|| WorkspaceState::new(&self.config.workspace)))
    }

    fn schema_of(&self, kind: ResourceKind) -> ObjectSchema {
        self.registry.schema(kind).map_or_else(|_| kind.schema(), Clone::clone)
    }

    /// Re-reads every resource in `state` from the remote API.
    ///
    /// Resources that are gone are removed from state with a warning, so the
    /// next plan creates them again. Read failures leave the recorded state
    /// untouched and produce an error diagnostic.
    pub async fn refresh_state(&self, state: &mut WorkspaceState) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for address in state.addresses() {
            let Some(resource) = state.get(&address).cloned() else {
                continue;
            };
            let handler = match self.registry.handler(address.kind) {
                Ok(handler) => handler,
                Err(e) => {
                    diagnostics.push(Diagnostic::from_error(&EngineError::from(e)).at(address.to_string()));
                    continue;
                }
            };

            match handler.read(&self.remote, &resource.id).await {
                Ok(record) => match to_config(&self.schema_of(address.kind), &record.attributes) {
                    Ok(attributes) => {
                        debug!("Refreshed {address} ({})", resource.id);
                        state.upsert(ResourceState::new(
                            &address,
                            &record.id,
                            attributes,
                            &resource.dependency_addresses(),
                        ));
                    }
                    Err(e) => {
                        diagnostics.push(Diagnostic::from_error(&EngineError::from(e)).at(address.to_string()));
                    }
                },
                Err(e) if e.is_not_found() => {
                    warn!("{address} ({}) disappeared outside of management", resource.id);
                    state.remove(&address);
                    diagnostics.push(Diagnostic::disappeared(&address.to_string(), &resource.id));
                }
                Err(e) => diagnostics.push(Diagnostic::from_error(&e).at(address.to_string())),
            }
        }
        diagnostics
    }

    /// Joins configured resources with recorded state.
    fn instances(
        &self,
        state: &WorkspaceState,
        removing_all: bool,
    ) -> std::result::Result<Vec<ResourceInstance>, Vec<Diagnostic>> {
        let mut diagnostics = Vec::new();
        let mut instances = Vec::new();
        let mut configured = HashSet::new();

        if !removing_all {
            let validator = ConfigValidator::new(&self.registry);
            diagnostics = validator.validate(self.config);
            if has_errors(&diagnostics) {
                return Err(diagnostics);
            }
            for resource in &self.config.resources {
                let address = resource.address();
                match validator.decode(resource) {
                    Ok(desired) => {
                        configured.insert(address.clone());
                        instances.push(ResourceInstance::configured(address, desired));
                    }
                    Err(d) => diagnostics.push(d),
                }
            }
        }

        for instance in &mut instances {
            if let Some(recorded) = state.get(&instance.address) {
                match recorded.prior(&self.schema_of(instance.address.kind)) {
                    Ok(prior) => {
                        instance.id = Some(recorded.id.clone());
                        instance.prior = Some(prior);
                        instance.recorded_dependencies = recorded.dependency_addresses();
                    }
                    Err(e) => diagnostics.push(
                        Diagnostic::error("State error", format!("recorded attributes do not decode: {e}"))
                            .at(instance.address.to_string()),
                    ),
                }
            }
        }

        for recorded in state.resources.values() {
            let address = recorded.address();
            if configured.contains(&address) {
                continue;
            }
            match recorded.prior(&self.schema_of(address.kind)) {
                Ok(prior) => instances.push(ResourceInstance {
                    id: Some(recorded.id.clone()),
                    desired: None,
                    prior: Some(prior),
                    recorded_dependencies: recorded.dependency_addresses(),
                    address,
                }),
                Err(e) => diagnostics.push(
                    Diagnostic::error("State error", format!("recorded attributes do not decode: {e}"))
                        .at(address.to_string()),
                ),
            }
        }

        if has_errors(&diagnostics) {
            Err(diagnostics)
        } else {
            Ok(instances)
        }
    }

    async fn prepare(&self, operation: Operation, refresh: bool) -> Result<PlanReport> {
        let mut state = self.load_state().await?;
        let mut diagnostics = if refresh {
            self.refresh_state(&mut state).await
        } else {
            Vec::new()
        };

        let plan = match self.instances(&state, operation == Operation::Destroy) {
            Ok(instances) => match Plan::build(instances, |kind| self.schema_of(kind)) {
                Ok(plan) => Some(plan),
                Err(e) => {
                    diagnostics.push(Diagnostic::from_error(&EngineError::from(e)));
                    None
                }
            },
            Err(problems) => {
                diagnostics.extend(problems);
                None
            }
        };

        if let Some(plan) = &plan {
            info!("{plan}");
        }
        Ok(PlanReport {
            operation,
            plan,
            state,
            diagnostics,
        })
    }

    /// Refreshes state and plans the changes that converge it to the
    /// workspace configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be read. Configuration and
    /// planning problems are reported as diagnostics.
    pub async fn plan(&self, refresh: bool) -> Result<PlanReport> {
        info!("Planning workspace '{}'", self.config.workspace);
        self.prepare(Operation::Apply, refresh).await
    }

    /// Refreshes state and plans the deletion of every managed resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be read.
    pub async fn plan_destroy(&self) -> Result<PlanReport> {
        info!("Planning destruction of workspace '{}'", self.config.workspace);
        self.prepare(Operation::Destroy, true).await
    }

    /// Applies a plan and saves the resulting state.
    ///
    /// A report without a plan is not applied; its diagnostics are returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be saved.
    pub async fn apply(&self, report: PlanReport) -> Result<ReconciliationResult> {
        let PlanReport {
            operation,
            plan,
            mut state,
            mut diagnostics,
        } = report;

        let Some(plan) = plan else {
            return Ok(ReconciliationResult::not_applied(diagnostics));
        };

        let execution = PlanExecutor::new(Arc::clone(&self.registry), self.remote.clone())
            .with_concurrency(self.concurrency)
            .execute(&plan, &mut state)
            .await;
        diagnostics.extend(execution.diagnostics());
        let success = !has_errors(&diagnostics);

        let fingerprint = self.config.fingerprint();
        let touched = execution.touched();
        let entry = if success {
            state.fingerprint.clone_from(&fingerprint);
            HistoryEntry::new(operation, &fingerprint, touched)
        } else {
            let summary = format!("{} failed, {} skipped", execution.failed(), execution.skipped());
            HistoryEntry::failed(operation, &fingerprint, touched, &summary)
        };
        state.add_history(entry);
        state.serial += 1;
        self.state_store.save(&state).await?;

        let mut result = ReconciliationResult::from_execution(&plan, &execution, diagnostics);
        result.final_state = Some(state);
        Ok(result)
    }

    /// Locks state, plans and applies in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken or state cannot be read
    /// or saved.
    pub async fn reconcile(&self) -> Result<ReconciliationResult> {
        let lock = self.lock(Operation::Apply).await?;
        let result = match self.plan(true).await {
            Ok(report) => self.apply(report).await,
            Err(e) => Err(e),
        };
        self.unlock(&lock).await;
        result
    }

    /// Locks state, then deletes every managed resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken or state cannot be read
    /// or saved.
    pub async fn destroy(&self) -> Result<ReconciliationResult> {
        let lock = self.lock(Operation::Destroy).await?;
        let result = match self.plan_destroy().await {
            Ok(report) => self.apply(report).await,
            Err(e) => Err(e),
        };
        self.unlock(&lock).await;
        result
    }

    /// Refreshes recorded state from the remote API and saves it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken or state cannot be read
    /// or saved.
    pub async fn refresh(&self) -> Result<Vec<Diagnostic>> {
        let lock = self.lock(Operation::Refresh).await?;
        let result = self.refresh_locked().await;
        self.unlock(&lock).await;
        result
    }

    async fn refresh_locked(&self) -> Result<Vec<Diagnostic>> {
        let mut state = self.load_state().await?;
        let diagnostics = self.refresh_state(&mut state).await;
        let addresses = state.addresses().iter().map(ToString::to_string).collect();
        let fingerprint = state.fingerprint.clone();
        state.add_history(if has_errors(&diagnostics) {
            HistoryEntry::failed(Operation::Refresh, &fingerprint, addresses, "some resources could not be read")
        } else {
            HistoryEntry::new(Operation::Refresh, &fingerprint, addresses)
        });
        state.serial += 1;
        self.state_store.save(&state).await?;
        Ok(diagnostics)
    }

    /// Compares recorded state with the remote API without changing either.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be read.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!("Checking for drift in workspace '{}'", self.config.workspace);
        let recorded = self.load_state().await?;
        let mut refreshed = recorded.clone();
        let mut diagnostics = self.refresh_state(&mut refreshed).await;

        let mut drifted_resources = Vec::new();
        let mut disappeared = Vec::new();
        for address in recorded.addresses() {
            let Some(after) = refreshed.get(&address) else {
                disappeared.push(address.to_string());
                continue;
            };
            let Some(before) = recorded.get(&address) else {
                continue;
            };
            let schema = self.schema_of(address.kind);
            let (Ok(before), Ok(after)) = (before.prior(&schema), after.prior(&schema)) else {
                continue;
            };
            match DiffEngine::new().diff(&schema, &after, &before) {
                Ok(changes) if !changes.is_empty() => drifted_resources.push(address.to_string()),
                Ok(_) => {}
                Err(e) => diagnostics.push(Diagnostic::from_error(&EngineError::from(e)).at(address.to_string())),
            }
        }
        diagnostics.retain(Diagnostic::is_error);

        Ok(DriftReport {
            has_drift: !drifted_resources.is_empty() || !disappeared.is_empty(),
            drifted_resources,
            disappeared,
            total_resources: recorded.resources.len(),
            diagnostics,
        })
    }

    /// Reads a configured data source.
    ///
    /// # Errors
    ///
    /// Returns diagnostics if the data source is not configured, its inputs
    /// are invalid, or the read fails.
    pub async fn read_data(&self, name: &str) -> std::result::Result<serde_json::Value, Vec<Diagnostic>> {
        let source = self.config.data_source(name).ok_or_else(|| {
            vec![Diagnostic::error(
                "Unknown data source",
                format!("no data source named '{name}' is configured"),
            )]
        })?;
        let kind = source
            .source()
            .map_err(|e| vec![Diagnostic::from_error(&EngineError::from(e)).at(format!("data.{name}"))])?;
        let inputs = from_config(&kind.schema(), &source.inputs)
            .map_err(|e| vec![Diagnostic::from_error(&EngineError::from(e)).at(format!("data.{name}"))])?;

        let value = DataSourceReader::new(Arc::clone(&self.registry), self.remote.clone())
            .read(kind, &inputs)
            .await?;
        to_config(&kind.schema(), &value)
            .map_err(|e| vec![Diagnostic::from_error(&EngineError::from(e)).at(format!("data.{name}"))])
    }
}

impl PlanReport {
    /// Returns true if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }

    /// Returns true if there is a plan with at least one change.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.plan.as_ref().is_some_and(|p| !p.is_empty())
    }

    /// Addresses in the plan, by action.
    #[must_use]
    pub fn addresses(&self, action: Action) -> Vec<Address> {
        self.plan
            .iter()
            .flat_map(|p| &p.instances)
            .filter(|i| i.action == action)
            .map(|i| i.address.clone())
            .collect()
    }
}

impl ReconciliationResult {
    fn not_applied(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            success: !has_errors(&diagnostics),
            created: 0,
            updated: 0,
            replaced: 0,
            deleted: 0,
            unchanged: 0,
            failed: 0,
            skipped: 0,
            diagnostics,
            final_state: None,
        }
    }

    fn from_execution(plan: &Plan, execution: &ExecutionResult, diagnostics: Vec<Diagnostic>) -> Self {
        let succeeded = |action: Action| {
            execution
                .outcomes
                .iter()
                .filter(|o| o.action == action && !o.is_failure() && o.status != OutcomeStatus::Skipped)
                .count()
        };
        Self {
            success: !has_errors(&diagnostics),
            created: succeeded(Action::Create),
            updated: succeeded(Action::Update),
            replaced: succeeded(Action::Replace),
            deleted: succeeded(Action::Delete),
            unchanged: plan.count(Action::NoOp),
            failed: execution.failed(),
            skipped: execution.skipped(),
            diagnostics,
            final_state: None,
        }
    }
}

impl DriftReport {
    /// Returns true if the state is converged (no drift).
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        !self.has_drift
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_drift {
            writeln!(f, "Drift detected:")?;
            for resource in &self.drifted_resources {
                writeln!(f, "  ~ {resource} changed outside of management")?;
            }
            for resource in &self.disappeared {
                writeln!(f, "  - {resource} disappeared")?;
            }
        } else {
            write!(f, "No drift detected - {} resources converged", self.total_resources)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success { "complete" } else { "failed" };
        write!(
            f,
            "Apply {status}! Resources: {} added, {} changed, {} replaced, {} destroyed.",
            self.created, self.updated, self.replaced, self.deleted
        )?;
        if self.failed > 0 || self.skipped > 0 {
            write!(f, " {} failed, {} skipped.", self.failed, self.skipped)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceConfig;
    use crate::error::StateError;
    use crate::state::LocalStateStore;
    use crate::testing::FakeApi;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        fake: Arc<FakeApi>,
        store: LocalStateStore,
        _dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().expect("temp dir");
            Self {
                fake: FakeApi::new(),
                store: LocalStateStore::new(dir.path().join("state.json")),
                _dir: dir,
            }
        }

        fn reconciler<'a>(&'a self, config: &'a WorkspaceConfig) -> Reconciler<'a, LocalStateStore> {
            Reconciler::new(config, &self.store, Arc::new(Registry::standard()), self.fake.remote())
        }
    }

    fn report_config() -> ResourceConfig {
        ResourceConfig::new(
            ResourceKind::Report,
            "test-ds-report-1",
            json!({
                "name": "test-ds-report-1",
                "config": {"aggregation": "total", "currency": "USD", "time_interval": "month", "layout": "table"}
            }),
        )
    }

    fn label_config(name: &str, color: &str) -> ResourceConfig {
        ResourceConfig::new(ResourceKind::Label, name, json!({"name": name, "color": color}))
    }

    fn budget_config(description: &str, kind: &str) -> ResourceConfig {
        ResourceConfig::new(
            ResourceKind::Budget,
            "main",
            json!({
                "name": "main",
                "description": description,
                "type": kind,
                "start_period": 1_735_689_600_000_i64,
                "time_interval": "month",
                "end_period": 1_767_225_600_000_i64,
                "amount": 1000,
                "currency": "USD"
            }),
        )
    }

    fn workspace(resources: Vec<ResourceConfig>) -> WorkspaceConfig {
        let mut config = WorkspaceConfig::new("finops");
        config.resources = resources;
        config
    }

    #[tokio::test]
    async fn test_reapply_is_noop() {
        let fx = Fixture::new();
        let config = workspace(vec![report_config(), label_config("prod", "blue")]);
        let reconciler = fx.reconciler(&config);

        let result = reconciler.reconcile().await.expect("applies");
        assert!(result.success, "{:?}", result.diagnostics);
        assert_eq!(result.created, 2);
        let mutations = fx.fake.mutations();

        let report = reconciler.plan(true).await.expect("plans");
        assert!(!report.has_errors(), "{:?}", report.diagnostics);
        assert!(!report.has_changes());
        assert_eq!(report.addresses(Action::NoOp).len(), 2);

        let result = reconciler.reconcile().await.expect("re-applies");
        assert_eq!(result.unchanged, 2);
        assert_eq!(fx.fake.mutations(), mutations);

        let state = reconciler.load_state().await.expect("state");
        assert_eq!(state.serial, 2);
        assert_eq!(state.fingerprint, config.fingerprint());
        assert_eq!(state.history.len(), 2);
    }

    #[tokio::test]
    async fn test_disappeared_resource_is_recreated_with_warning() {
        let fx = Fixture::new();
        let config = workspace(vec![label_config("prod", "blue")]);
        let reconciler = fx.reconciler(&config);
        reconciler.reconcile().await.expect("applies");

        let state = reconciler.load_state().await.expect("state");
        let id = state
            .get(&Address::new(ResourceKind::Label, "prod"))
            .map(|r| r.id.clone())
            .expect("recorded");
        fx.fake.remove(ResourceKind::Label, &id);

        let report = reconciler.plan(true).await.expect("plans");
        assert_eq!(report.addresses(Action::Create), vec![Address::new(ResourceKind::Label, "prod")]);
        assert!(!report.has_errors());
        assert!(
            report
                .diagnostics
                .iter()
                .any(|d| d.detail.contains("disappeared outside of management"))
        );
    }

    #[tokio::test]
    async fn test_budget_description_updates_and_type_replaces() {
        let fx = Fixture::new();
        let config = workspace(vec![budget_config("first", "fixed")]);
        fx.reconciler(&config).reconcile().await.expect("applies");

        let changed = workspace(vec![budget_config("second", "fixed")]);
        let report = fx.reconciler(&changed).plan(true).await.expect("plans");
        assert_eq!(report.addresses(Action::Update).len(), 1);

        let retyped = workspace(vec![budget_config("first", "recurring")]);
        let report = fx.reconciler(&retyped).plan(true).await.expect("plans");
        assert_eq!(report.addresses(Action::Replace).len(), 1);
    }

    #[tokio::test]
    async fn test_cleared_budget_field_converges() {
        let fx = Fixture::new();
        let config = workspace(vec![budget_config("test budget", "fixed")]);
        fx.reconciler(&config).reconcile().await.expect("applies");

        let mut cleared = budget_config("unused", "fixed");
        if let Some(fields) = cleared.attributes.as_object_mut() {
            fields.remove("description");
        }
        let cleared = workspace(vec![cleared]);
        let reconciler = fx.reconciler(&cleared);
        let result = reconciler.reconcile().await.expect("re-applies");
        assert!(result.success, "{:?}", result.diagnostics);
        assert_eq!(result.updated, 1);

        let state = reconciler.load_state().await.expect("state");
        let id = state
            .get(&Address::new(ResourceKind::Budget, "main"))
            .map(|r| r.id.clone())
            .expect("recorded");
        let stored = fx.fake.record(ResourceKind::Budget, &id).expect("stored");
        assert!(stored.get("description").is_none(), "{stored}");

        let report = reconciler.plan(true).await.expect("plans");
        assert!(!report.has_changes(), "{:?}", report.addresses(Action::Update));
        assert_eq!(report.addresses(Action::NoOp).len(), 1);
    }

    #[tokio::test]
    async fn test_removed_resource_is_deleted() {
        let fx = Fixture::new();
        let config = workspace(vec![label_config("prod", "blue"), label_config("dev", "teal")]);
        fx.reconciler(&config).reconcile().await.expect("applies");

        let smaller = workspace(vec![label_config("prod", "blue")]);
        let result = fx.reconciler(&smaller).reconcile().await.expect("applies");
        assert_eq!(result.deleted, 1);
        assert_eq!(fx.fake.count(ResourceKind::Label), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_plans_nothing() {
        let fx = Fixture::new();
        let config = workspace(vec![label_config("prod", "plaid")]);
        let reconciler = fx.reconciler(&config);

        let result = reconciler.reconcile().await.expect("runs");
        assert!(!result.success);
        assert!(fx.fake.calls().is_empty());
        assert!(!fx.store.exists().await.expect("exists"));
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let fx = Fixture::new();
        let config = workspace(vec![report_config(), label_config("prod", "blue")]);
        let reconciler = fx.reconciler(&config);
        reconciler.reconcile().await.expect("applies");

        let result = reconciler.destroy().await.expect("destroys");
        assert!(result.success, "{:?}", result.diagnostics);
        assert_eq!(result.deleted, 2);
        assert_eq!(fx.fake.count(ResourceKind::Report), 0);
        assert_eq!(fx.fake.count(ResourceKind::Label), 0);

        let state = reconciler.load_state().await.expect("state");
        assert!(state.is_empty());
        assert_eq!(state.history.last().map(|h| h.operation), Some(Operation::Destroy));
    }

    #[tokio::test]
    async fn test_check_drift() {
        let fx = Fixture::new();
        let config = workspace(vec![label_config("prod", "blue"), label_config("dev", "teal")]);
        let reconciler = fx.reconciler(&config);
        reconciler.reconcile().await.expect("applies");
        assert!(reconciler.check_drift().await.expect("checks").is_converged());

        let state = reconciler.load_state().await.expect("state");
        let id_of = |name: &str| {
            state
                .get(&Address::new(ResourceKind::Label, name))
                .map(|r| r.id.clone())
                .expect("recorded")
        };
        fx.fake
            .remote()
            .patch(&format!("/analytics/v1/labels/{}", id_of("prod")), &json!({"color": "red"}))
            .await
            .expect("patched");
        fx.fake.remove(ResourceKind::Label, &id_of("dev"));

        let drift = reconciler.check_drift().await.expect("checks");
        assert!(drift.has_drift);
        assert_eq!(drift.drifted_resources, vec![String::from("label.prod")]);
        assert_eq!(drift.disappeared, vec![String::from("label.dev")]);

        let unchanged = reconciler.load_state().await.expect("state");
        assert_eq!(unchanged, state);
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let fx = Fixture::new();
        let config = workspace(vec![label_config("prod", "blue")]);
        let reconciler = fx.reconciler(&config);

        let lock = reconciler.lock(Operation::Apply).await.expect("locks");
        let err = reconciler.reconcile().await.expect_err("locked");
        assert!(matches!(err, EngineError::State(StateError::LockedByOther { .. })));
        reconciler.unlock(&lock).await;
        reconciler.reconcile().await.expect("unlocked");
    }

    #[tokio::test]
    async fn test_read_data() {
        let fx = Fixture::new();
        fx.fake.seed(ResourceKind::Label, json!({"name": "a", "color": "blue"}));
        fx.fake.seed(ResourceKind::Label, json!({"name": "b", "color": "mint"}));
        let mut config = workspace(Vec::new());
        config.data.push(crate::config::DataSourceConfig {
            kind: String::from("labels"),
            name: String::from("all-labels"),
            inputs: json!({}),
        });
        let reconciler = fx.reconciler(&config);

        let value = reconciler.read_data("all-labels").await.expect("reads");
        assert_eq!(value["row_count"], json!(2));
        assert_eq!(value["items"].as_array().map(Vec::len), Some(2));
        assert!(reconciler.read_data("missing").await.is_err());
    }
}
