//! pagesync - resumable paginated API sync into a shared tabular store
//!
//! This is the command-line entry point. Every subcommand except `daemon`
//! is one invocation; `daemon` runs the cadence scheduler until signalled.

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use pagesync::config::Config;
use pagesync::database::{Database, SqliteDatabase};
use pagesync::error::AppError;
use pagesync::models::{RowSchema, ScopeRegistry};
use pagesync::sync::{
    ApiClient, ApiSource, Cadence, DispatchReport, Dispatcher, InvocationMode, Operation,
    OperationLog, SchedulerConfig, SchemaTransformer, ScopeOutcome, ScopeStatus, SyncScheduler,
};
use pagesync::telemetry::init_tracing;

/// pagesync - resumable paginated API sync into a shared tabular store
#[derive(Parser, Debug)]
#[command(name = "pagesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "PAGESYNC_CONFIG", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resume every non-complete scope
    Continue(RunArgs),
    /// Discover then continue, current scopes only
    Refresh(RunArgs),
    /// Probe for new records and reopen grown scopes
    Discover(RunArgs),
    /// Record row count and checkpoint per scope
    Snapshot(RunArgs),
    /// Re-read scopes on the reconcile track
    Reconcile(RunArgs),
    /// Clear a scope's primary checkpoint
    Reset {
        /// Scope to reset
        #[arg(long)]
        scope: String,
        /// Run as a scheduled invocation
        #[arg(long)]
        scheduled: bool,
    },
    /// Show classification, checkpoint and staleness per scope
    Status {
        /// Restrict to one scope
        #[arg(long)]
        scope: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Run all operations on their cadences until SIGINT/SIGTERM
    Daemon,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Restrict to one scope
    #[arg(long)]
    scope: Option<String>,
    /// Run as a scheduled invocation (short lock wait, failures logged only)
    #[arg(long)]
    scheduled: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    config
        .validate()
        .map_err(|e| AppError::Config(e.to_string()))?;

    init_tracing(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting pagesync");

    let database: Arc<dyn Database> = Arc::new(SqliteDatabase::new(&config.database.path).await?);
    info!(path = %config.database.path, "Database initialized");

    let client = ApiClient::new(&config.api, config.retry.clone())?
        .with_operation_log(OperationLog::new(database.clone()));
    let source = Arc::new(ApiSource::new(client));
    let schema = RowSchema::from_config(&config.rows);
    info!(columns = ?schema.headers(), "Row schema loaded");
    let transformer = Arc::new(SchemaTransformer::new(schema));
    let registry = ScopeRegistry::from_config(&config.scopes, config.sync.batch_size);
    info!(scopes = registry.len(), "Scope registry loaded");

    let dispatcher = Dispatcher::new(registry, database, source, transformer, &config);

    match cli.command {
        Command::Continue(args) => run(&dispatcher, Operation::Continue, args).await,
        Command::Refresh(args) => run(&dispatcher, Operation::Refresh, args).await,
        Command::Discover(args) => run(&dispatcher, Operation::Discover, args).await,
        Command::Snapshot(args) => run(&dispatcher, Operation::Snapshot, args).await,
        Command::Reconcile(args) => run(&dispatcher, Operation::Reconcile, args).await,
        Command::Reset { scope, scheduled } => {
            if dispatcher.reset(&scope, mode(scheduled)).await? {
                println!("{}: reset to NOT_STARTED", scope);
            } else {
                println!("{}: busy, not reset", scope);
            }
            Ok(())
        }
        Command::Status { scope, json } => {
            let statuses = dispatcher.status(scope.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                print_status(&statuses);
            }
            Ok(())
        }
        Command::Daemon => daemon(dispatcher, &config).await,
    }
}

fn mode(scheduled: bool) -> InvocationMode {
    if scheduled {
        InvocationMode::Scheduled
    } else {
        InvocationMode::Interactive
    }
}

async fn run(dispatcher: &Dispatcher, operation: Operation, args: RunArgs) -> anyhow::Result<()> {
    let report = dispatcher
        .run(operation, mode(args.scheduled), args.scope.as_deref())
        .await?;
    print_report(&report);
    Ok(())
}

async fn daemon(dispatcher: Dispatcher, config: &Config) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = SyncScheduler::new(
        SchedulerConfig::from_config(config),
        Arc::new(dispatcher),
        Cadence::from_config(config),
        shutdown_rx,
    );

    let handle = tokio::spawn(scheduler.run());

    shutdown_signal().await;
    if shutdown_tx.send(()).is_err() {
        error!("Scheduler already stopped");
    }
    handle.await?;

    info!("pagesync shutdown complete");
    Ok(())
}

fn print_report(report: &DispatchReport) {
    for result in &report.results {
        let line = match &result.outcome {
            ScopeOutcome::Synced(r) => format!(
                "{:?}: {} pages, {} rows, cursor {}/{}",
                r.outcome, r.pages_written, r.rows_written, r.cursor, r.total_units
            ),
            ScopeOutcome::Refreshed { extension, report } => format!(
                "{}{:?}: {} pages, {} rows",
                if extension.is_some() { "extended, " } else { "" },
                report.outcome,
                report.pages_written,
                report.rows_written
            ),
            ScopeOutcome::Extended(ext) => format!(
                "extended {} → {} records ({} pages)",
                ext.previous_records, ext.total_records, ext.total_units
            ),
            ScopeOutcome::Unchanged => "unchanged".to_string(),
            ScopeOutcome::Captured(s) => format!("snapshot: {} rows", s.row_count),
            ScopeOutcome::Skipped(reason) => format!("skipped ({})", reason),
            ScopeOutcome::Failed(e) => format!("failed: {}", e),
        };
        println!("{} {}: {}", report.operation, result.scope_id, line);
    }
}

fn print_status(statuses: &[ScopeStatus]) {
    println!(
        "{:<16} {:<10} {:<11} {:>9} {:>8} {:<6} {:<6}",
        "SCOPE", "KIND", "STATE", "PAGE", "ROWS", "STALE", "LOCK"
    );
    for s in statuses {
        let kind = if s.frozen {
            format!("{}*", s.kind)
        } else {
            s.kind.to_string()
        };
        println!(
            "{:<16} {:<10} {:<11} {:>9} {:>8} {:<6} {:<6}",
            s.scope_id,
            kind,
            s.state.to_string(),
            format!("{}/{}", s.checkpoint.cursor + 1, s.checkpoint.total_units),
            s.row_count,
            if s.stale { "yes" } else { "" },
            s.locked_by.as_deref().unwrap_or("")
        );
    }
}

/// Load configuration from file or environment
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    match &cli.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Ok(Config::from_file(path).map_err(|e| AppError::Config(e.to_string()))?)
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Ok(Config::from_env().map_err(|e| AppError::Config(e.to_string()))?)
        }
    }
}

/// Resolves when SIGINT or SIGTERM is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
