//! costform CLI entrypoint.
//!
//! This is the main entrypoint for the costform command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use costform::cli::{Cli, Commands, OutputFormatter, StateCommands};
use costform::client::{HttpApiClient, Remote, RetryPolicy};
use costform::config::{ConfigParser, ConfigValidator, WorkspaceConfig, find_config_file};
use costform::diagnostics::{Diagnostic, has_errors};
use costform::error::Result;
use costform::reconciler::Reconciler;
use costform::registry::Registry;
use costform::state::{LocalStateStore, Operation, StateStore};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// A loaded workspace and its state store.
struct Workspace {
    config: WorkspaceConfig,
    store: LocalStateStore,
}

/// Remote access shared by the commands that talk to the API.
struct Connection {
    registry: Arc<Registry>,
    remote: Remote,
}

/// Main async entry point. Returns false when the command reported errors.
async fn run(cli: Cli) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);
    let workspace = load_workspace(cli.config.as_ref())?;

    match cli.command {
        Commands::Validate => Ok(cmd_validate(&workspace.config, &formatter)),
        Commands::Plan { detailed, no_refresh } => cmd_plan(&workspace, detailed, !no_refresh, &formatter).await,
        Commands::Apply { yes } => cmd_apply(&workspace, yes, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(&workspace, yes, &formatter).await,
        Commands::Refresh => cmd_refresh(&workspace, &formatter).await,
        Commands::Drift => cmd_drift(&workspace, &formatter).await,
        Commands::Read { name } => cmd_read(&workspace, &name, &formatter).await,
        Commands::State { command } => cmd_state(&workspace.store, command, &formatter).await,
    }
}

/// Validates the workspace without contacting the API.
fn cmd_validate(config: &WorkspaceConfig, formatter: &OutputFormatter) -> bool {
    let registry = Registry::standard();
    let diagnostics = ConfigValidator::new(&registry).validate(config);

    if formatter.is_json() || !diagnostics.is_empty() {
        println!("{}", formatter.format_diagnostics(&diagnostics));
    }
    if !has_errors(&diagnostics) && !formatter.is_json() {
        println!("Configuration is valid!");
        println!("\nWorkspace summary:");
        println!("  Workspace: {}", config.workspace);
        println!("  Resources: {}", config.resources.len());
        println!("  Data sources: {}", config.data.len());
    }
    !has_errors(&diagnostics)
}

/// Shows the plan without applying it.
async fn cmd_plan(workspace: &Workspace, detailed: bool, refresh: bool, formatter: &OutputFormatter) -> Result<bool> {
    let connection = connect(&workspace.config)?;
    let reconciler = reconciler(workspace, &connection);

    let report = reconciler.plan(refresh).await?;
    println!("{}", formatter.format_plan(&report, detailed));
    Ok(!report.has_errors())
}

/// Plans, confirms and applies.
async fn cmd_apply(workspace: &Workspace, auto_approve: bool, formatter: &OutputFormatter) -> Result<bool> {
    let connection = connect(&workspace.config)?;
    let reconciler = reconciler(workspace, &connection);

    let lock = reconciler.lock(Operation::Apply).await?;
    let outcome = apply_locked(&reconciler, auto_approve, formatter).await;
    reconciler.unlock(&lock).await;
    outcome
}

async fn apply_locked(
    reconciler: &Reconciler<'_, LocalStateStore>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let report = reconciler.plan(true).await?;
    println!("{}", formatter.format_plan(&report, false));
    if report.has_errors() {
        return Ok(false);
    }

    if report.has_changes() && !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(true);
    }

    let result = reconciler.apply(report).await?;
    println!("{}", formatter.format_result(&result));
    Ok(result.success)
}

/// Deletes every managed resource.
async fn cmd_destroy(workspace: &Workspace, auto_approve: bool, formatter: &OutputFormatter) -> Result<bool> {
    let connection = connect(&workspace.config)?;
    let reconciler = reconciler(workspace, &connection);

    let lock = reconciler.lock(Operation::Destroy).await?;
    let outcome = destroy_locked(&reconciler, auto_approve, formatter).await;
    reconciler.unlock(&lock).await;
    outcome
}

async fn destroy_locked(
    reconciler: &Reconciler<'_, LocalStateStore>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let report = reconciler.plan_destroy().await?;
    if !report.has_changes() {
        println!("{}", formatter.format_diagnostics(&report.diagnostics));
        eprintln!("No resources to destroy.");
        return Ok(!report.has_errors());
    }

    println!("{}", formatter.format_plan(&report, false));
    if !auto_approve
        && !confirm(
            "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
            "destroy",
        )?
    {
        eprintln!("Destruction cancelled.");
        return Ok(true);
    }

    let result = reconciler.apply(report).await?;
    println!("{}", formatter.format_result(&result));
    Ok(result.success)
}

/// Re-reads managed resources into state.
async fn cmd_refresh(workspace: &Workspace, formatter: &OutputFormatter) -> Result<bool> {
    let connection = connect(&workspace.config)?;
    let reconciler = reconciler(workspace, &connection);

    let diagnostics = reconciler.refresh().await?;
    print_diagnostics(&diagnostics, formatter);
    if !has_errors(&diagnostics) && !formatter.is_json() {
        println!("State refreshed.");
    }
    Ok(!has_errors(&diagnostics))
}

/// Reports drift without changing anything.
async fn cmd_drift(workspace: &Workspace, formatter: &OutputFormatter) -> Result<bool> {
    let connection = connect(&workspace.config)?;
    let reconciler = reconciler(workspace, &connection);

    let report = reconciler.check_drift().await?;
    println!("{}", formatter.format_drift(&report));
    Ok(!has_errors(&report.diagnostics))
}

/// Reads a data source and prints its result.
async fn cmd_read(workspace: &Workspace, name: &str, formatter: &OutputFormatter) -> Result<bool> {
    let connection = connect(&workspace.config)?;
    let reconciler = reconciler(workspace, &connection);

    match reconciler.read_data(name).await {
        Ok(data) => {
            println!("{}", formatter.format_data(&data));
            Ok(true)
        }
        Err(diagnostics) => {
            print_diagnostics(&diagnostics, formatter);
            Ok(false)
        }
    }
}

/// State management commands.
async fn cmd_state(store: &LocalStateStore, command: StateCommands, formatter: &OutputFormatter) -> Result<bool> {
    match command {
        StateCommands::Show => {
            if let Some(state) = store.load().await? {
                println!("{}", formatter.format_state(&state));
            } else {
                eprintln!("No state found at {}.", store.path().display());
            }
        }
        StateCommands::Lock => {
            let lock = store.get_lock_info().await?;
            println!("{}", formatter.format_lock(lock.as_ref()));
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                store.force_unlock().await?;
                eprintln!("State forcefully unlocked.");
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
                return Ok(false);
            }
        }
    }
    Ok(true)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the workspace file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads the workspace file, `.env` and environment overrides.
fn load_workspace(config_path: Option<&PathBuf>) -> Result<Workspace> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading workspace from: {}", config_file.display());

    let base = config_file.parent().unwrap_or_else(|| Path::new("."));
    let parser = ConfigParser::new().with_base_path(base);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let state_path = base.join(config.state_path());
    debug!("Using state file: {}", state_path.display());
    let store = LocalStateStore::new(state_path);

    Ok(Workspace { config, store })
}

/// Builds the API client, retry policy and resource registry.
fn connect(config: &WorkspaceConfig) -> Result<Connection> {
    let token = ConfigParser::api_token()?;
    let provider = &config.provider;
    let client = HttpApiClient::with_timeout(&provider.host, &token, provider.timeout_secs)?
        .with_customer_context(provider.customer_context.clone());

    let policy = RetryPolicy {
        max_attempts: provider.max_attempts,
        call_timeout: Duration::from_secs(provider.timeout_secs),
        ..RetryPolicy::default()
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding calls");
            on_signal.cancel();
        }
    });

    info!("Connecting to {}", provider.host);
    Ok(Connection {
        registry: Arc::new(Registry::standard()),
        remote: Remote::new(Arc::new(client), policy, cancel),
    })
}

fn reconciler<'a>(workspace: &'a Workspace, connection: &Connection) -> Reconciler<'a, LocalStateStore> {
    Reconciler::new(
        &workspace.config,
        &workspace.store,
        Arc::clone(&connection.registry),
        connection.remote.clone(),
    )
    .with_concurrency(workspace.config.provider.concurrency)
}

fn print_diagnostics(diagnostics: &[Diagnostic], formatter: &OutputFormatter) {
    if formatter.is_json() || !diagnostics.is_empty() {
        println!("{}", formatter.format_diagnostics(diagnostics));
    }
}

/// Prompts on stderr and compares the answer with `expected`.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}
