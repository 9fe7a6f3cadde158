//! Multi-Customer Import Executor
//!
//! Fans contact imports out across customers through the bulkhead pool: every
//! customer is attempted, each under its own role session, rate limit share,
//! and timeout. One customer's failure or slowness never cancels siblings;
//! the run ends with an aggregated summary either way.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::contacts::{plan_contact_action, ContactAction, ContactRecord, ContactStore, SesContactStore};
use crate::credentials::CredentialManager;
use crate::customers::{CustomerRegistry, ServiceType};
use crate::directory::{DirectorySource, IdentityStoreDirectory, SnapshotDirectory};
use crate::history::{ExecutionHistory, ExecutionRecord};
use crate::pool::Bulkhead;
use crate::ratelimit::RateLimiter;

/// Configuration for one multi-customer import run
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Customer codes to process; empty means every registered customer
    pub customers: Vec<String>,
    /// SES contact list imported into
    pub contact_list: String,
    /// Topics every imported contact is opted into
    pub topics: Vec<String>,
    pub max_concurrency: usize,
    pub requests_per_second: u32,
    /// Bound on one customer's wall-clock share of the run
    pub per_customer_timeout: Duration,
    pub dry_run: bool,
    /// Where directory snapshots live when the management role is absent
    pub snapshot_dir: Option<PathBuf>,
    /// Recorded on the run's execution history entry
    pub initiator: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            customers: Vec::new(),
            contact_list: "general".to_string(),
            topics: Vec::new(),
            max_concurrency: 5,
            requests_per_second: 10,
            per_customer_timeout: Duration::from_secs(300),
            dry_run: false,
            snapshot_dir: None,
            initiator: "crossacct".to_string(),
        }
    }
}

/// Per-customer outcome of a bulk import
#[derive(Debug, Clone, Serialize)]
pub struct CustomerImportResult {
    pub customer_code: String,
    pub success: bool,
    pub error: Option<String>,
    pub users_processed: u32,
    pub contacts_added: u32,
    pub contacts_updated: u32,
    pub contacts_skipped: u32,
}

impl CustomerImportResult {
    fn failed(customer_code: &str, error: String) -> Self {
        Self {
            customer_code: customer_code.to_string(),
            success: false,
            error: Some(error),
            users_processed: 0,
            contacts_added: 0,
            contacts_updated: 0,
            contacts_skipped: 0,
        }
    }
}

/// Counters a single customer's import produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportCounts {
    pub users_processed: u32,
    pub added: u32,
    pub updated: u32,
    pub skipped: u32,
}

/// Aggregated outcome of the whole run
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub successful_customers: Vec<String>,
    pub failed_customers: Vec<String>,
    pub users_processed: u32,
    pub contacts_added: u32,
    pub contacts_updated: u32,
    pub contacts_skipped: u32,
    pub results: Vec<CustomerImportResult>,
}

impl ImportSummary {
    pub fn aggregate(mut results: Vec<CustomerImportResult>) -> Self {
        results.sort_by(|a, b| a.customer_code.cmp(&b.customer_code));

        let mut summary = Self {
            successful_customers: Vec::new(),
            failed_customers: Vec::new(),
            users_processed: 0,
            contacts_added: 0,
            contacts_updated: 0,
            contacts_skipped: 0,
            results: Vec::new(),
        };

        for result in &results {
            if result.success {
                summary.successful_customers.push(result.customer_code.clone());
            } else {
                summary.failed_customers.push(result.customer_code.clone());
            }
            summary.users_processed += result.users_processed;
            summary.contacts_added += result.contacts_added;
            summary.contacts_updated += result.contacts_updated;
            summary.contacts_skipped += result.contacts_skipped;
        }

        summary.results = results;
        summary
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_customers.is_empty()
    }
}

/// Per-customer collaborators the executor resolves before importing.
/// A seam so the orchestration runs against stubs in tests.
#[async_trait]
pub trait ImportEnvironment: Send + Sync {
    async fn directory_for(
        &self,
        customer_code: &str,
        config: &ImportConfig,
    ) -> Result<Box<dyn DirectorySource>>;

    async fn contact_store_for(&self, customer_code: &str) -> Result<Box<dyn ContactStore>>;
}

/// Production environment: sessions from the credential manager, live
/// Identity Store reads with snapshot fallback
pub struct AwsImportEnvironment {
    registry: Arc<CustomerRegistry>,
    credentials: Arc<CredentialManager>,
}

impl AwsImportEnvironment {
    pub fn new(registry: Arc<CustomerRegistry>, credentials: Arc<CredentialManager>) -> Self {
        Self {
            registry,
            credentials,
        }
    }
}

#[async_trait]
impl ImportEnvironment for AwsImportEnvironment {
    async fn directory_for(
        &self,
        customer_code: &str,
        config: &ImportConfig,
    ) -> Result<Box<dyn DirectorySource>> {
        let customer = self
            .registry
            .get(customer_code)
            .with_context(|| format!("unknown customer: {}", customer_code))?;

        let live = customer
            .identity_center_role_arn
            .as_ref()
            .and_then(|_| customer.identity_store_id.clone());

        if let Some(identity_store_id) = live {
            match self
                .credentials
                .assume_customer_role(customer_code, ServiceType::IdentityCenter)
                .await
            {
                Ok(session) => {
                    return Ok(Box::new(IdentityStoreDirectory::new(
                        session.identitystore_client(),
                        &identity_store_id,
                    )));
                }
                Err(e) if config.snapshot_dir.is_some() => {
                    warn!(
                        customer = %customer_code,
                        error = %e,
                        "Identity Center role unavailable, falling back to snapshot"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        let snapshot_dir = config
            .snapshot_dir
            .as_ref()
            .with_context(|| {
                format!(
                    "customer {} has no Identity Center access and no snapshot dir was given",
                    customer_code
                )
            })?;
        Ok(Box::new(SnapshotDirectory::for_customer(
            snapshot_dir,
            customer_code,
        )))
    }

    async fn contact_store_for(&self, customer_code: &str) -> Result<Box<dyn ContactStore>> {
        let session = self
            .credentials
            .assume_customer_role(customer_code, ServiceType::Ses)
            .await?;
        Ok(Box::new(SesContactStore::new(session.ses_client())))
    }
}

/// Import one customer's directory users into its contact list.
///
/// Policy per contact: identical topic set is skipped, a differing one is
/// removed and re-added, an absent one is added. A dry run reads but never
/// writes.
pub async fn import_customer_contacts(
    directory: &dyn DirectorySource,
    contacts: &dyn ContactStore,
    limiter: &RateLimiter,
    contact_list: &str,
    topics: &[String],
    dry_run: bool,
) -> Result<ImportCounts> {
    let users = directory.list_users().await?;
    let mut counts = ImportCounts::default();

    for user in users {
        counts.users_processed += 1;

        let Some(email) = user.email.as_deref() else {
            counts.skipped += 1;
            continue;
        };

        limiter.wait().await;
        let existing = contacts.get_contact(contact_list, email).await?;
        let desired = ContactRecord {
            email: email.to_string(),
            topics: topics.to_vec(),
        };

        match plan_contact_action(existing.as_ref(), topics) {
            ContactAction::Skip => counts.skipped += 1,
            ContactAction::Add => {
                if !dry_run {
                    limiter.wait().await;
                    contacts.add_contact(contact_list, &desired).await?;
                }
                counts.added += 1;
            }
            ContactAction::Update => {
                if !dry_run {
                    limiter.wait().await;
                    contacts.remove_contact(contact_list, email).await?;
                    limiter.wait().await;
                    contacts.add_contact(contact_list, &desired).await?;
                }
                counts.updated += 1;
            }
        }
    }

    Ok(counts)
}

/// Drives bulk imports across customers
pub struct ImportExecutor {
    registry: Arc<CustomerRegistry>,
    environment: Arc<dyn ImportEnvironment>,
    history: Arc<dyn ExecutionHistory>,
}

impl ImportExecutor {
    pub fn new(
        registry: Arc<CustomerRegistry>,
        environment: Arc<dyn ImportEnvironment>,
        history: Arc<dyn ExecutionHistory>,
    ) -> Self {
        Self {
            registry,
            environment,
            history,
        }
    }

    /// Process every selected customer and aggregate the outcome.
    ///
    /// All customers are attempted regardless of individual failures; the
    /// summary carries the partition into successes and failures.
    pub async fn run(&self, config: &ImportConfig) -> ImportSummary {
        let codes = if config.customers.is_empty() {
            self.registry.codes()
        } else {
            config.customers.clone()
        };

        info!(
            customers = codes.len(),
            max_concurrency = config.max_concurrency,
            requests_per_second = config.requests_per_second,
            dry_run = config.dry_run,
            "Starting multi-customer import"
        );

        let limiter = Arc::new(RateLimiter::new(config.requests_per_second));
        let pool = Bulkhead::new(config.max_concurrency);
        let shared_config = Arc::new(config.clone());

        let environment = Arc::clone(&self.environment);
        let limiter_for_tasks = Arc::clone(&limiter);
        let results = pool
            .run_all(codes.clone(), move |code| {
                let environment = Arc::clone(&environment);
                let limiter = Arc::clone(&limiter_for_tasks);
                let config = Arc::clone(&shared_config);
                async move {
                    let outcome = tokio::time::timeout(
                        config.per_customer_timeout,
                        import_one(&*environment, &limiter, &config, &code),
                    )
                    .await;

                    match outcome {
                        Ok(Ok(counts)) => {
                            info!(
                                customer = %code,
                                users = counts.users_processed,
                                added = counts.added,
                                updated = counts.updated,
                                skipped = counts.skipped,
                                "Customer import complete"
                            );
                            CustomerImportResult {
                                customer_code: code,
                                success: true,
                                error: None,
                                users_processed: counts.users_processed,
                                contacts_added: counts.added,
                                contacts_updated: counts.updated,
                                contacts_skipped: counts.skipped,
                            }
                        }
                        Ok(Err(e)) => {
                            warn!(customer = %code, error = %e, "Customer import failed");
                            CustomerImportResult::failed(&code, format!("{:#}", e))
                        }
                        Err(_) => {
                            warn!(
                                customer = %code,
                                timeout_secs = config.per_customer_timeout.as_secs(),
                                "Customer import timed out"
                            );
                            CustomerImportResult::failed(
                                &code,
                                format!(
                                    "timed out after {}s",
                                    config.per_customer_timeout.as_secs()
                                ),
                            )
                        }
                    }
                }
            })
            .await;

        limiter.stop();

        if !config.dry_run {
            let record = ExecutionRecord::new(codes, &config.initiator, "contact-import");
            if let Err(e) = self.history.record_execution(record).await {
                warn!(error = %e, "Failed to record import execution");
            }
        }

        let summary = ImportSummary::aggregate(results);
        info!(
            succeeded = summary.successful_customers.len(),
            failed = summary.failed_customers.len(),
            users = summary.users_processed,
            added = summary.contacts_added,
            updated = summary.contacts_updated,
            skipped = summary.contacts_skipped,
            "Multi-customer import complete"
        );
        summary
    }
}

async fn import_one(
    environment: &dyn ImportEnvironment,
    limiter: &RateLimiter,
    config: &ImportConfig,
    customer_code: &str,
) -> Result<ImportCounts> {
    let directory = environment.directory_for(customer_code, config).await?;
    let contacts = environment.contact_store_for(customer_code).await?;

    import_customer_contacts(
        &*directory,
        &*contacts,
        limiter,
        &config.contact_list,
        &config.topics,
        config.dry_run,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customers::CustomerAccountInfo;
    use crate::directory::DirectoryUser;
    use crate::history::InMemoryExecutionHistory;
    use anyhow::bail;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    struct StaticDirectory {
        users: Vec<DirectoryUser>,
    }

    #[async_trait]
    impl DirectorySource for StaticDirectory {
        async fn list_users(&self) -> Result<Vec<DirectoryUser>> {
            Ok(self.users.clone())
        }
    }

    #[derive(Default)]
    struct MemoryContacts {
        entries: RwLock<HashMap<String, ContactRecord>>,
    }

    #[async_trait]
    impl ContactStore for MemoryContacts {
        async fn get_contact(&self, _list: &str, email: &str) -> Result<Option<ContactRecord>> {
            Ok(self.entries.read().await.get(email).cloned())
        }

        async fn add_contact(&self, _list: &str, contact: &ContactRecord) -> Result<()> {
            self.entries
                .write()
                .await
                .insert(contact.email.clone(), contact.clone());
            Ok(())
        }

        async fn remove_contact(&self, _list: &str, email: &str) -> Result<()> {
            self.entries.write().await.remove(email);
            Ok(())
        }
    }

    fn user(email: Option<&str>) -> DirectoryUser {
        DirectoryUser {
            user_id: "u-1".to_string(),
            user_name: "jdoe".to_string(),
            display_name: "J. Doe".to_string(),
            email: email.map(|e| e.to_string()),
        }
    }

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_import_is_idempotent() {
        let directory = StaticDirectory {
            users: vec![user(Some("jdoe@example.com"))],
        };
        let contacts = MemoryContacts::default();
        let limiter = RateLimiter::new(100);
        let desired = topics(&["alerts", "newsletter"]);

        let first =
            import_customer_contacts(&directory, &contacts, &limiter, "general", &desired, false)
                .await
                .unwrap();
        assert_eq!(first.added, 1);
        assert_eq!(first.skipped, 0);

        // Unchanged topics on the second run: counted skipped, no mutation.
        let second =
            import_customer_contacts(&directory, &contacts, &limiter, "general", &desired, false)
                .await
                .unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.skipped, 1);

        // Changed topics: remove-then-re-add counted as updated.
        let changed = topics(&["alerts"]);
        let third =
            import_customer_contacts(&directory, &contacts, &limiter, "general", &changed, false)
                .await
                .unwrap();
        assert_eq!(third.updated, 1);
        assert_eq!(
            contacts
                .get_contact("general", "jdoe@example.com")
                .await
                .unwrap()
                .unwrap()
                .topics,
            changed
        );
    }

    #[tokio::test]
    async fn test_dry_run_reads_but_never_writes() {
        let directory = StaticDirectory {
            users: vec![user(Some("jdoe@example.com")), user(None)],
        };
        let contacts = MemoryContacts::default();
        let limiter = RateLimiter::new(100);

        let counts = import_customer_contacts(
            &directory,
            &contacts,
            &limiter,
            "general",
            &topics(&["alerts"]),
            true,
        )
        .await
        .unwrap();

        assert_eq!(counts.users_processed, 2);
        assert_eq!(counts.added, 1);
        // The user without an email was skipped.
        assert_eq!(counts.skipped, 1);
        assert!(contacts.entries.read().await.is_empty());
    }

    /// Environment where selected customers misbehave
    struct StubEnvironment {
        failing: Vec<String>,
        hanging: Vec<String>,
    }

    #[async_trait]
    impl ImportEnvironment for StubEnvironment {
        async fn directory_for(
            &self,
            customer_code: &str,
            _config: &ImportConfig,
        ) -> Result<Box<dyn DirectorySource>> {
            if self.failing.iter().any(|c| c == customer_code) {
                bail!("AccessDenied: cannot assume identity role");
            }
            if self.hanging.iter().any(|c| c == customer_code) {
                // Simulates a hung API call; only the per-customer timeout ends it.
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(Box::new(StaticDirectory {
                users: vec![user(Some(&format!("{}@example.com", customer_code)))],
            }))
        }

        async fn contact_store_for(&self, _customer_code: &str) -> Result<Box<dyn ContactStore>> {
            Ok(Box::<MemoryContacts>::default())
        }
    }

    fn registry(codes: &[&str]) -> Arc<CustomerRegistry> {
        Arc::new(CustomerRegistry::new(
            codes
                .iter()
                .map(|code| CustomerAccountInfo {
                    customer_code: code.to_string(),
                    aws_account_id: "111122223333".to_string(),
                    region: "eu-central-1".to_string(),
                    display_name: code.to_uppercase(),
                    ses_role_arn: Some(format!(
                        "arn:aws:iam::111122223333:role/{}-ses-ops",
                        code
                    )),
                    sqs_role_arn: None,
                    s3_role_arn: None,
                    identity_center_role_arn: None,
                    identity_store_id: None,
                })
                .collect(),
        ))
    }

    #[tokio::test]
    async fn test_one_failure_never_blocks_siblings() {
        let history = Arc::new(InMemoryExecutionHistory::new(10));
        let executor = ImportExecutor::new(
            registry(&["cds", "hts", "zrx"]),
            Arc::new(StubEnvironment {
                failing: vec!["hts".to_string()],
                hanging: vec![],
            }),
            history.clone(),
        );

        let config = ImportConfig {
            topics: vec!["alerts".to_string()],
            initiator: "tests".to_string(),
            ..ImportConfig::default()
        };
        let summary = executor.run(&config).await;

        assert_eq!(summary.successful_customers, vec!["cds", "zrx"]);
        assert_eq!(summary.failed_customers, vec!["hts"]);
        assert!(!summary.all_succeeded());
        assert_eq!(summary.users_processed, 2);
        assert_eq!(summary.contacts_added, 2);

        // The run was recorded with every attempted customer.
        let recorded = history.recent_executions("hts").await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].is_shared_with("cds"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_customer_times_out_without_stalling_others() {
        let executor = ImportExecutor::new(
            registry(&["cds", "hts"]),
            Arc::new(StubEnvironment {
                failing: vec![],
                hanging: vec!["cds".to_string()],
            }),
            Arc::new(InMemoryExecutionHistory::new(10)),
        );

        let config = ImportConfig {
            topics: vec!["alerts".to_string()],
            per_customer_timeout: Duration::from_secs(30),
            initiator: "tests".to_string(),
            ..ImportConfig::default()
        };
        let summary = executor.run(&config).await;

        assert_eq!(summary.successful_customers, vec!["hts"]);
        assert_eq!(summary.failed_customers, vec!["cds"]);
        let failed = summary
            .results
            .iter()
            .find(|r| r.customer_code == "cds")
            .unwrap();
        assert!(failed.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_explicit_customer_selection() {
        let executor = ImportExecutor::new(
            registry(&["cds", "hts", "zrx"]),
            Arc::new(StubEnvironment {
                failing: vec![],
                hanging: vec![],
            }),
            Arc::new(InMemoryExecutionHistory::new(10)),
        );

        let config = ImportConfig {
            customers: vec!["hts".to_string()],
            topics: vec!["alerts".to_string()],
            initiator: "tests".to_string(),
            ..ImportConfig::default()
        };
        let summary = executor.run(&config).await;

        assert_eq!(summary.results.len(), 1);
        assert_eq!(summary.successful_customers, vec!["hts"]);
    }
}
