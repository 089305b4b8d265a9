//! Command-line interface for pg-replication-operator
//!
//! # Usage Examples
//!
//! ```bash
//! # One pass for every replication object in the manifest
//! pg-replication-operator reconcile --config replication.toml
//!
//! # One pass for a single object, without reading or writing stored status
//! pg-replication-operator reconcile --config replication.toml --only orders --no-store
//!
//! # Last recorded status of every object
//! pg-replication-operator status --config replication.toml
//! ```
//!
//! Logging is controlled through `RUST_LOG`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use pg_replication::ReplicationStatus;
use pg_replication_operator::config::parse_duration;
use pg_replication_operator::{FileResolver, Manifest, Reconciler};
use status_store::{FilesystemStore, NullStore, StatusStore, StoredStatus};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "pg_replication=info,pg_replication_operator=info,status_store=info";

#[derive(Parser)]
#[command(name = "pg-replication-operator")]
#[command(about = "Converges PostgreSQL subscribers onto publications")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one convergence pass per replication object
    Reconcile {
        /// Replication manifest
        #[arg(long, env = "PG_REPLICATION_CONFIG")]
        config: PathBuf,

        /// Only reconcile the replication object with this name
        #[arg(long)]
        only: Option<String>,

        /// Deadline of each pass (e.g. "30s", "5m"); overrides pass_timeout
        #[arg(long)]
        timeout: Option<String>,

        /// Ignore stored status: passes start without a prior fingerprint
        /// and their outcome is not recorded
        #[arg(long)]
        no_store: bool,
    },

    /// Show the last recorded status of each replication object
    Status {
        /// Replication manifest
        #[arg(long, env = "PG_REPLICATION_CONFIG")]
        config: PathBuf,

        /// Only show the replication object with this name
        #[arg(long)]
        only: Option<String>,

        /// Print the stored records as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Reconcile {
            config,
            only,
            timeout,
            no_store,
        } => run_reconcile(config, only, timeout, no_store).await,
        Commands::Status { config, only, json } => run_status(config, only, json).await,
    }
}

async fn run_reconcile(
    config: PathBuf,
    only: Option<String>,
    timeout: Option<String>,
    no_store: bool,
) -> anyhow::Result<()> {
    let manifest = Manifest::from_file(&config)?;
    let objects = manifest.select(only.as_deref())?;
    let pass_timeout = match timeout {
        Some(timeout) => parse_duration(&timeout)
            .with_context(|| format!("Invalid --timeout '{timeout}'"))?,
        None => manifest.pass_timeout()?,
    };

    let store: Arc<dyn StatusStore> = if no_store {
        Arc::new(NullStore)
    } else {
        Arc::new(FilesystemStore::new(manifest.status_dir()))
    };
    let resolver = Arc::new(FileResolver::new(manifest.base_dir.clone()));

    let cancel = CancellationToken::new();
    setup_shutdown_handler(cancel.clone());

    info!(
        objects = objects.len(),
        timeout_secs = pass_timeout.as_secs(),
        "starting reconciliation"
    );
    let reconciler = Reconciler::new(resolver, store, pass_timeout, cancel);
    let reports = reconciler.reconcile_all(&objects).await;

    let mut failed = 0;
    for (object, report) in objects.iter().zip(reports) {
        match report {
            Ok(report) if !report.failed() => {}
            Ok(_) => failed += 1,
            Err(e) => {
                error!(object = %object.name, "{e:#}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} replication objects did not converge", objects.len());
    }
    info!("all replication objects converged");
    Ok(())
}

async fn run_status(config: PathBuf, only: Option<String>, json: bool) -> anyhow::Result<()> {
    let manifest = Manifest::from_file(&config)?;
    let store = FilesystemStore::new(manifest.status_dir());

    let mut statuses: BTreeMap<String, Option<StoredStatus>> = BTreeMap::new();
    for object in manifest.select(only.as_deref())? {
        let stored = store.read_status(&object.status_id()?).await?;
        statuses.insert(object.name.clone(), stored);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    let pending = ReplicationStatus::pending();
    for (name, stored) in &statuses {
        let (status, updated_at) = match stored {
            None => (&pending, "-".to_string()),
            Some(stored) => (
                &stored.replication_status,
                stored
                    .updated_at
                    .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            ),
        };
        println!(
            "{name}\t{:?}\t{updated_at}\t{}{}",
            status.phase,
            status.reason.as_deref().unwrap_or("-"),
            status
                .message
                .as_deref()
                .map(|message| format!(": {message}"))
                .unwrap_or_default(),
        );
    }
    Ok(())
}

/// Cancels `cancel` on Ctrl+C so in-flight passes stop at their next
/// database call.
fn setup_shutdown_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt signal (Ctrl+C)");
                cancel.cancel();
            }
            Err(e) => error!("Failed to install Ctrl+C handler: {e}"),
        }
    });
}
