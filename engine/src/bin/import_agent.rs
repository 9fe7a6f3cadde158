//! Import Agent - Standalone Binary
//!
//! Keeps customer contact lists in sync with Identity Center on an interval.
//! Runs the same multi-customer pipeline as `crossacct import`, packaged for
//! CronJob (`--once`) or long-running deployment.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::interval;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crossacct_engine::history::FileExecutionHistory;
use crossacct_engine::import::{AwsImportEnvironment, ImportConfig, ImportExecutor};
use crossacct_engine::{CredentialManager, CustomerRegistry};

/// Import Agent - syncs Identity Center users into SES contact lists
#[derive(Parser, Debug)]
#[command(name = "import-agent", version, about)]
struct Args {
    /// Path to the customer registry JSON file
    #[arg(long, env = "CROSSACCT_REGISTRY")]
    registry: PathBuf,

    /// SES contact list name
    #[arg(long, default_value = "general", env = "CROSSACCT_CONTACT_LIST")]
    contact_list: String,

    /// Topics imported contacts are opted into (comma-separated)
    #[arg(long, default_value = "", env = "CROSSACCT_TOPICS")]
    topics: String,

    /// Sync interval in seconds
    #[arg(long, default_value = "3600", env = "SYNC_INTERVAL")]
    interval: u64,

    /// Run once and exit (for CronJob mode)
    #[arg(long, default_value = "false")]
    once: bool,

    /// Dry run - don't actually write contacts
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Customers processed concurrently
    #[arg(long, default_value = "5", env = "CROSSACCT_MAX_CONCURRENCY")]
    max_concurrency: usize,

    /// Shared API budget across all workers
    #[arg(long, default_value = "10", env = "CROSSACCT_REQUESTS_PER_SECOND")]
    requests_per_second: u32,

    /// Bound on one customer's wall-clock share, in seconds
    #[arg(long, default_value = "300")]
    timeout_secs: u64,

    /// Directory with per-customer snapshot files
    #[arg(long, env = "CROSSACCT_SNAPSHOT_DIR")]
    snapshot_dir: Option<PathBuf>,

    /// Execution history file
    #[arg(long, default_value = "crossacct-history.json", env = "CROSSACCT_HISTORY")]
    history_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .json()
        .init();

    let args = Args::parse();

    info!(
        registry = %args.registry.display(),
        interval = args.interval,
        once = args.once,
        dry_run = args.dry_run,
        "Starting Import Agent"
    );

    let registry = Arc::new(
        CustomerRegistry::from_file(&args.registry)
            .context("Failed to load customer registry")?,
    );
    let manager = Arc::new(CredentialManager::from_env(Arc::clone(&registry), "import-agent").await);
    let environment = Arc::new(AwsImportEnvironment::new(
        Arc::clone(&registry),
        Arc::clone(&manager),
    ));
    let history = Arc::new(FileExecutionHistory::new(&args.history_file, 10_000));
    let executor = ImportExecutor::new(Arc::clone(&registry), environment, history);

    let config = ImportConfig {
        customers: Vec::new(),
        contact_list: args.contact_list.clone(),
        topics: args
            .topics
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        max_concurrency: args.max_concurrency,
        requests_per_second: args.requests_per_second,
        per_customer_timeout: Duration::from_secs(args.timeout_secs),
        dry_run: args.dry_run,
        snapshot_dir: args.snapshot_dir.clone(),
        initiator: "import-agent".to_string(),
    };

    if args.once {
        run_cycle(&executor, &config).await?;
        return Ok(());
    }

    let mut ticker = interval(Duration::from_secs(args.interval));
    loop {
        ticker.tick().await;

        if let Err(e) = run_cycle(&executor, &config).await {
            error!(error = %e, "Import cycle failed");
        }
    }
}

/// Run a single sync cycle
async fn run_cycle(executor: &ImportExecutor, config: &ImportConfig) -> Result<()> {
    if config.dry_run {
        info!("DRY RUN - no contacts will be written");
    }

    let summary = executor.run(config).await;

    info!(
        succeeded = summary.successful_customers.len(),
        failed = summary.failed_customers.len(),
        users = summary.users_processed,
        added = summary.contacts_added,
        updated = summary.contacts_updated,
        skipped = summary.contacts_skipped,
        "Import cycle complete"
    );

    if !summary.all_succeeded() {
        anyhow::bail!(
            "import failed for: {}",
            summary.failed_customers.join(", ")
        );
    }
    Ok(())
}
