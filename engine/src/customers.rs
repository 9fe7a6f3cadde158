//! Customer Registry
//!
//! Static mapping of customer code to AWS account, region, and per-service
//! IAM role ARNs. Loaded once from JSON configuration and read-only afterwards.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// AWS service a per-customer role can be assumed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    Ses,
    Sqs,
    S3,
    IdentityCenter,
}

impl ServiceType {
    /// All service types, in the order health checks walk them
    pub const ALL: [ServiceType; 4] = [
        ServiceType::Ses,
        ServiceType::Sqs,
        ServiceType::S3,
        ServiceType::IdentityCenter,
    ];
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceType::Ses => write!(f, "ses"),
            ServiceType::Sqs => write!(f, "sqs"),
            ServiceType::S3 => write!(f, "s3"),
            ServiceType::IdentityCenter => write!(f, "identity-center"),
        }
    }
}

/// One customer account entry. Immutable after the registry loads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerAccountInfo {
    /// Short tenant identifier (e.g., "hts")
    pub customer_code: String,
    /// AWS account ID the customer's roles must resolve to
    pub aws_account_id: String,
    /// Home region for the customer's service clients
    pub region: String,
    /// Human-readable name for reports
    pub display_name: String,
    /// Role ARN for SES operations
    #[serde(default)]
    pub ses_role_arn: Option<String>,
    /// Role ARN for SQS operations
    #[serde(default)]
    pub sqs_role_arn: Option<String>,
    /// Role ARN for S3 operations
    #[serde(default)]
    pub s3_role_arn: Option<String>,
    /// Role ARN for Identity Center directory reads
    #[serde(default)]
    pub identity_center_role_arn: Option<String>,
    /// Identity Store id for live directory reads (snapshot fallback when absent)
    #[serde(default)]
    pub identity_store_id: Option<String>,
}

impl CustomerAccountInfo {
    /// Role ARN configured for the given service, if any
    pub fn role_arn(&self, service: ServiceType) -> Option<&str> {
        match service {
            ServiceType::Ses => self.ses_role_arn.as_deref(),
            ServiceType::Sqs => self.sqs_role_arn.as_deref(),
            ServiceType::S3 => self.s3_role_arn.as_deref(),
            ServiceType::IdentityCenter => self.identity_center_role_arn.as_deref(),
        }
    }

    /// Service types that have a role configured
    pub fn configured_services(&self) -> Vec<ServiceType> {
        ServiceType::ALL
            .into_iter()
            .filter(|s| self.role_arn(*s).is_some())
            .collect()
    }
}

/// Read-only registry of all known customers
#[derive(Debug, Clone)]
pub struct CustomerRegistry {
    customers: HashMap<String, CustomerAccountInfo>,
}

impl CustomerRegistry {
    /// Build a registry from already-loaded entries
    pub fn new(entries: Vec<CustomerAccountInfo>) -> Self {
        let customers = entries
            .into_iter()
            .map(|c| (c.customer_code.clone(), c))
            .collect();
        Self { customers }
    }

    /// Load the registry from a JSON file (an array of customer entries)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read registry file: {}", path.display()))?;
        let entries: Vec<CustomerAccountInfo> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse registry file: {}", path.display()))?;
        Ok(Self::new(entries))
    }

    /// Look up a customer by code
    pub fn get(&self, customer_code: &str) -> Option<&CustomerAccountInfo> {
        self.customers.get(customer_code)
    }

    /// All customer codes, sorted for deterministic fan-out order
    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.customers.keys().cloned().collect();
        codes.sort();
        codes
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }
}
