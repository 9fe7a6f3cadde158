//! Execution History
//!
//! Record of past cross-account runs, consumed by the isolation rules that
//! audit data segregation and execution context. Backed by a JSON file in
//! production; an in-memory store exists for bounded retention and tests.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// One recorded run, possibly spanning several customers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: Uuid,
    /// Customers the run legitimately acted for
    pub customer_codes: Vec<String>,
    /// Who or what started the run (operator, agent, pipeline)
    pub initiator: String,
    /// Operation label (e.g., "contact-import")
    pub operation: String,
    pub started_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new(customer_codes: Vec<String>, initiator: &str, operation: &str) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            customer_codes,
            initiator: initiator.to_string(),
            operation: operation.to_string(),
            started_at: Utc::now(),
        }
    }

    pub fn references(&self, customer_code: &str) -> bool {
        self.customer_codes.iter().any(|c| c == customer_code)
    }

    /// A record listing two or more customers including the queried one is a
    /// recognized multi-customer execution. Kept in one place so upstream
    /// authorization can tighten this later (see DESIGN.md).
    pub fn is_shared_with(&self, customer_code: &str) -> bool {
        self.customer_codes.len() >= 2 && self.references(customer_code)
    }
}

/// Source of recent execution records for a customer
#[async_trait]
pub trait ExecutionHistory: Send + Sync {
    /// Records that reference the customer, newest first
    async fn recent_executions(&self, customer_code: &str) -> Result<Vec<ExecutionRecord>>;

    /// Append a record of a finished run
    async fn record_execution(&self, record: ExecutionRecord) -> Result<()>;
}

/// Bounded in-memory history, newest records kept
pub struct InMemoryExecutionHistory {
    records: RwLock<Vec<ExecutionRecord>>,
    max_records: usize,
}

impl InMemoryExecutionHistory {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            max_records: max_records.max(1),
        }
    }

    /// Pre-seeded history, mainly for tests and dry runs
    pub fn with_records(records: Vec<ExecutionRecord>) -> Self {
        Self {
            max_records: records.len().max(1),
            records: RwLock::new(records),
        }
    }
}

#[async_trait]
impl ExecutionHistory for InMemoryExecutionHistory {
    async fn recent_executions(&self, customer_code: &str) -> Result<Vec<ExecutionRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<ExecutionRecord> = records
            .iter()
            .filter(|r| r.references(customer_code))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(matching)
    }

    async fn record_execution(&self, record: ExecutionRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.len() >= self.max_records {
            records.remove(0);
        }
        records.push(record);
        Ok(())
    }
}

/// JSON-file-backed history (one array, rewritten on append)
pub struct FileExecutionHistory {
    path: PathBuf,
    max_records: usize,
}

impl FileExecutionHistory {
    pub fn new(path: impl Into<PathBuf>, max_records: usize) -> Self {
        Self {
            path: path.into(),
            max_records: max_records.max(1),
        }
    }

    fn load(&self) -> Result<Vec<ExecutionRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read history file: {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse history file: {}", self.path.display()))
    }

    fn store(&self, records: &[ExecutionRecord]) -> Result<()> {
        let raw = serde_json::to_string_pretty(records)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("Failed to write history file: {}", self.path.display()))
    }
}

#[async_trait]
impl ExecutionHistory for FileExecutionHistory {
    async fn recent_executions(&self, customer_code: &str) -> Result<Vec<ExecutionRecord>> {
        let mut matching: Vec<ExecutionRecord> = self
            .load()?
            .into_iter()
            .filter(|r| r.references(customer_code))
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(matching)
    }

    async fn record_execution(&self, record: ExecutionRecord) -> Result<()> {
        let mut records = self.load()?;
        records.push(record);
        let overflow = records.len().saturating_sub(self.max_records);
        if overflow > 0 {
            records.drain(..overflow);
        }
        self.store(&records)
    }
}
