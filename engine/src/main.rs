//! Crossacct CLI
//!
//! Operations entry point: multi-customer contact import, isolation
//! validation, credential health checks, and directory snapshots. Every
//! subcommand works through per-customer assumed roles; nothing here holds
//! long-lived customer credentials.
//!
//! # Usage
//! ```bash
//! # Import Identity Center users into every customer's contact list
//! crossacct --registry customers.json import --topics alerts,newsletter
//!
//! # Audit isolation for one customer
//! crossacct --registry customers.json validate --customer-code hts
//!
//! # Verify every configured role still resolves to the right account
//! crossacct --registry customers.json check-credentials
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crossacct_engine::customers::ServiceType;
use crossacct_engine::directory::{save_snapshot, DirectorySource, IdentityStoreDirectory};
use crossacct_engine::history::FileExecutionHistory;
use crossacct_engine::import::{AwsImportEnvironment, ImportConfig, ImportExecutor};
use crossacct_engine::isolation::IsolationValidator;
use crossacct_engine::{CredentialManager, CustomerRegistry};

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser)]
#[command(name = "crossacct")]
#[command(about = "Cross-account customer operations", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the customer registry JSON file
    #[arg(long, env = "CROSSACCT_REGISTRY")]
    registry: PathBuf,

    /// External ID presented on every role assumption
    #[arg(long, env = "CROSSACCT_EXTERNAL_ID")]
    external_id: Option<String>,

    /// Execution history file consumed by the isolation rules
    #[arg(long, env = "CROSSACCT_HISTORY", default_value = "crossacct-history.json")]
    history_file: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import directory users into customer contact lists
    Import {
        /// Customer codes to process (comma-separated; default: all)
        #[arg(long)]
        customers: Option<String>,

        /// SES contact list name
        #[arg(long, default_value = "general")]
        contact_list: String,

        /// Topics imported contacts are opted into (comma-separated)
        #[arg(long, default_value = "")]
        topics: String,

        /// Customers processed concurrently
        #[arg(long, default_value = "5")]
        max_concurrency: usize,

        /// Shared API budget across all workers
        #[arg(long, default_value = "10")]
        requests_per_second: u32,

        /// Bound on one customer's wall-clock share
        #[arg(long, default_value = "300")]
        timeout_secs: u64,

        /// Directory with per-customer snapshot files
        #[arg(long, env = "CROSSACCT_SNAPSHOT_DIR")]
        snapshot_dir: Option<PathBuf>,

        /// Plan only - don't write any contact
        #[arg(long, default_value = "false")]
        dry_run: bool,

        /// Recorded as the run's initiator
        #[arg(long, default_value = "crossacct-cli", env = "CROSSACCT_INITIATOR")]
        initiator: String,
    },

    /// Run the isolation rule engine
    Validate {
        /// Single customer to validate (default: all)
        #[arg(long)]
        customer_code: Option<String>,

        /// Customers validated concurrently
        #[arg(long, default_value = "5")]
        max_concurrency: usize,
    },

    /// Verify every configured role resolves to the expected account
    CheckCredentials {
        /// Customers checked concurrently
        #[arg(long, default_value = "5")]
        max_concurrency: usize,
    },

    /// Save a customer's Identity Center users to a snapshot file
    Snapshot {
        /// Customer to snapshot
        #[arg(long)]
        customer_code: String,

        /// Directory snapshots are written into
        #[arg(long, default_value = "snapshots")]
        output_dir: PathBuf,
    },
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .json()
        .init();

    let registry = Arc::new(
        CustomerRegistry::from_file(&cli.registry)
            .context("Failed to load customer registry")?,
    );
    info!(customers = registry.len(), "Customer registry loaded");

    let mut manager = CredentialManager::from_env(Arc::clone(&registry), "crossacct").await;
    if let Some(external_id) = &cli.external_id {
        manager = manager.with_external_id(external_id);
    }
    let manager = Arc::new(manager);
    let history = Arc::new(FileExecutionHistory::new(&cli.history_file, 10_000));

    match cli.command {
        Commands::Import {
            customers,
            contact_list,
            topics,
            max_concurrency,
            requests_per_second,
            timeout_secs,
            snapshot_dir,
            dry_run,
            initiator,
        } => {
            let config = ImportConfig {
                customers: split_list(customers.as_deref()),
                contact_list,
                topics: split_list(Some(&topics)),
                max_concurrency,
                requests_per_second,
                per_customer_timeout: Duration::from_secs(timeout_secs),
                dry_run,
                snapshot_dir,
                initiator,
            };

            let environment = Arc::new(AwsImportEnvironment::new(
                Arc::clone(&registry),
                Arc::clone(&manager),
            ));
            let executor = ImportExecutor::new(registry, environment, history);
            let summary = executor.run(&config).await;

            println!(
                "\n{:<10} {:<8} {:>6} {:>6} {:>8} {:>8}  {}",
                "CUSTOMER", "STATUS", "USERS", "ADDED", "UPDATED", "SKIPPED", "ERROR"
            );
            println!("{}", "-".repeat(80));
            for result in &summary.results {
                println!(
                    "{:<10} {:<8} {:>6} {:>6} {:>8} {:>8}  {}",
                    result.customer_code,
                    if result.success { "ok" } else { "FAILED" },
                    result.users_processed,
                    result.contacts_added,
                    result.contacts_updated,
                    result.contacts_skipped,
                    result.error.as_deref().unwrap_or("-")
                );
            }
            println!(
                "\n{} succeeded, {} failed; {} users, {} added, {} updated, {} skipped",
                summary.successful_customers.len(),
                summary.failed_customers.len(),
                summary.users_processed,
                summary.contacts_added,
                summary.contacts_updated,
                summary.contacts_skipped,
            );

            if !summary.all_succeeded() {
                bail!(
                    "import failed for {} customer(s): {}",
                    summary.failed_customers.len(),
                    summary.failed_customers.join(", ")
                );
            }
        }

        Commands::Validate {
            customer_code,
            max_concurrency,
        } => {
            let validator = Arc::new(IsolationValidator::new(registry, manager, history));

            match customer_code {
                Some(code) => {
                    let report = validator.validate_customer_isolation(&code).await?;
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    if !report.overall_passed {
                        bail!(
                            "isolation validation failed for {}: {} critical, {} high",
                            code,
                            report.critical_issues,
                            report.high_issues
                        );
                    }
                }
                None => {
                    let reports = validator.validate_all_customers(max_concurrency).await;

                    println!(
                        "\n{:<10} {:<8} {:>8} {:>9} {:>6}",
                        "CUSTOMER", "RESULT", "FAILED", "CRITICAL", "HIGH"
                    );
                    println!("{}", "-".repeat(48));
                    let mut codes: Vec<&String> = reports.keys().collect();
                    codes.sort();
                    for code in &codes {
                        let report = &reports[code.as_str()];
                        println!(
                            "{:<10} {:<8} {:>8} {:>9} {:>6}",
                            report.customer_code,
                            if report.overall_passed { "pass" } else { "FAIL" },
                            report.failed_rules,
                            report.critical_issues,
                            report.high_issues
                        );
                    }

                    let failing = reports.values().filter(|r| !r.overall_passed).count();
                    if failing > 0 {
                        bail!("isolation validation failed for {} customer(s)", failing);
                    }
                }
            }
        }

        Commands::CheckCredentials { max_concurrency } => {
            let results = manager
                .validate_all_customer_credentials(max_concurrency)
                .await;

            println!("\n{:<10} {:<9} {}", "CUSTOMER", "STATUS", "CHECKS");
            println!("{}", "-".repeat(60));
            let mut codes: Vec<&String> = results.keys().collect();
            codes.sort();
            for code in &codes {
                let health = &results[code.as_str()];
                let detail: Vec<String> = health
                    .checks
                    .iter()
                    .map(|c| {
                        format!(
                            "{}:{}",
                            c.service,
                            if c.ok { "ok" } else { "fail" }
                        )
                    })
                    .collect();
                println!(
                    "{:<10} {:<9} {}",
                    health.customer_code,
                    if health.healthy() { "healthy" } else { "UNHEALTHY" },
                    detail.join(" ")
                );
            }

            let unhealthy = results.values().filter(|h| !h.healthy()).count();
            if unhealthy > 0 {
                bail!("{} customer(s) have failing credentials", unhealthy);
            }
        }

        Commands::Snapshot {
            customer_code,
            output_dir,
        } => {
            let customer = registry
                .get(&customer_code)
                .with_context(|| format!("unknown customer: {}", customer_code))?;
            let identity_store_id = customer
                .identity_store_id
                .as_ref()
                .with_context(|| {
                    format!("customer {} has no identity_store_id configured", customer_code)
                })?
                .clone();

            let session = manager
                .assume_customer_role(&customer_code, ServiceType::IdentityCenter)
                .await?;
            let directory =
                IdentityStoreDirectory::new(session.identitystore_client(), &identity_store_id);
            let users = directory.list_users().await?;

            let path = output_dir.join(format!("{}.json", customer_code));
            save_snapshot(&path, &users)?;
            println!("Saved {} users to {}", users.len(), path.display());
        }
    }

    Ok(())
}

/// Split a comma-separated flag value, dropping empty entries
fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}
