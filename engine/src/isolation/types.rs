//! Isolation Validation Types
//!
//! Result and report types for the per-customer rule engine. Everything here
//! serializes to JSON so monitoring and CLI layers can consume reports as-is.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category a rule audits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleCategory {
    Credentials,
    Access,
    Data,
    Network,
    Audit,
}

impl std::fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleCategory::Credentials => write!(f, "credentials"),
            RuleCategory::Access => write!(f, "access"),
            RuleCategory::Data => write!(f, "data"),
            RuleCategory::Network => write!(f, "network"),
            RuleCategory::Audit => write!(f, "audit"),
        }
    }
}

/// How serious a rule failure is. Critical and high failures flip the
/// customer's overall verdict; the rest are reported only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// Outcome of one rule for one customer. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub rule: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub passed: bool,
    pub message: String,
    pub details: serde_json::Value,
    pub checked_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Aggregate of every rule result for one customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationValidationResult {
    pub customer_code: String,
    pub overall_passed: bool,
    pub total_rules: u32,
    pub passed_rules: u32,
    pub failed_rules: u32,
    pub critical_issues: u32,
    pub high_issues: u32,
    /// Failed-rule count per category
    pub category_failures: BTreeMap<String, u32>,
    pub recommendations: Vec<String>,
    pub results: Vec<ValidationResult>,
    pub generated_at: DateTime<Utc>,
}

impl IsolationValidationResult {
    /// Fold individual rule results into the customer's report.
    ///
    /// Overall pass requires zero critical and zero high-severity failures;
    /// medium/low/info failures are reported without flipping the verdict.
    pub fn from_results(
        customer_code: &str,
        results: Vec<ValidationResult>,
        recommendations: Vec<String>,
    ) -> Self {
        let total_rules = results.len() as u32;
        let passed_rules = results.iter().filter(|r| r.passed).count() as u32;
        let failed_rules = total_rules - passed_rules;

        let critical_issues = results
            .iter()
            .filter(|r| !r.passed && r.severity == Severity::Critical)
            .count() as u32;
        let high_issues = results
            .iter()
            .filter(|r| !r.passed && r.severity == Severity::High)
            .count() as u32;

        let mut category_failures: BTreeMap<String, u32> = BTreeMap::new();
        for result in results.iter().filter(|r| !r.passed) {
            *category_failures
                .entry(result.category.to_string())
                .or_default() += 1;
        }

        Self {
            customer_code: customer_code.to_string(),
            overall_passed: critical_issues == 0 && high_issues == 0,
            total_rules,
            passed_rules,
            failed_rules,
            critical_issues,
            high_issues,
            category_failures,
            recommendations,
            results,
            generated_at: Utc::now(),
        }
    }
}

/// A detected (and by default blocked) cross-customer access attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossCustomerAccessAttempt {
    pub id: Uuid,
    pub source_customer: String,
    pub target_customer: String,
    pub access_type: String,
    pub resource: String,
    pub blocked: bool,
    pub detected_at: DateTime<Utc>,
}
