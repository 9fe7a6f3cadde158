//! Isolation Rules
//!
//! The fixed rule set the validator runs per customer. Each rule is a pure
//! check over an explicit context (customer, registry, credential manager,
//! execution history) and returns an outcome value; rules never raise, so one
//! failing rule cannot abort the rest of the run.

use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;

use super::types::{RuleCategory, Severity};
use crate::credentials::CredentialManager;
use crate::customers::CustomerRegistry;
use crate::history::ExecutionHistory;

/// Role-name fragments that indicate over-broad privileges
const SUSPICIOUS_ROLE_FRAGMENTS: [&str; 5] = ["admin", "root", "full", "all", "*"];

/// Everything a rule may consult
pub struct RuleContext<'a> {
    pub customer_code: &'a str,
    pub registry: &'a CustomerRegistry,
    pub credentials: &'a CredentialManager,
    pub history: &'a dyn ExecutionHistory,
}

/// Outcome of one rule evaluation
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub passed: bool,
    pub message: String,
    pub details: serde_json::Value,
}

impl RuleOutcome {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// One named, categorized, severity-ranked isolation check
#[async_trait]
pub trait IsolationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn category(&self) -> RuleCategory;
    fn severity(&self) -> Severity;
    /// Advice surfaced in the report when this rule fails
    fn recommendation(&self) -> &'static str;

    async fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome;
}

/// The validator's fixed, ordered rule set
pub fn default_rules() -> Vec<Box<dyn IsolationRule>> {
    vec![
        Box::new(CredentialIsolationRule),
        Box::new(CrossAccountAccessRule),
        Box::new(DataSegregationRule),
        Box::new(RolePermissionBoundariesRule),
        Box::new(AuditTrailIsolationRule),
        Box::new(NetworkIsolationRule),
        Box::new(CredentialExpirationRule),
        Box::new(ExecutionContextRule),
    ]
}

// =========================================================================
// Credential rules
// =========================================================================

/// Canonical cross-tenant leak detector: assume the customer's role and
/// assert the session resolves to the customer's own account. The credential
/// manager performs the account assertion; any mismatch surfaces here.
pub struct CredentialIsolationRule;

#[async_trait]
impl IsolationRule for CredentialIsolationRule {
    fn name(&self) -> &'static str {
        "credential-isolation"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Credentials
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
    fn recommendation(&self) -> &'static str {
        "Review the role trust policy and rotate the customer's role credentials"
    }

    async fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(customer) = ctx.registry.get(ctx.customer_code) else {
            return RuleOutcome::fail(format!("unknown customer {}", ctx.customer_code));
        };
        let Some(service) = customer.configured_services().into_iter().next() else {
            return RuleOutcome::fail("no service roles configured; nothing to verify");
        };

        match ctx
            .credentials
            .assume_customer_role(ctx.customer_code, service)
            .await
        {
            Ok(session) => RuleOutcome::pass(format!(
                "session resolves to expected account {}",
                session.account_id
            ))
            .with_details(json!({
                "service": service.to_string(),
                "account_id": session.account_id,
                "role_arn": session.role_arn,
            })),
            Err(e) => RuleOutcome::fail(format!("role assumption check failed: {}", e)),
        }
    }
}

/// Remaining session lifetime must lie strictly between 5 minutes and 2 hours
pub struct CredentialExpirationRule;

#[async_trait]
impl IsolationRule for CredentialExpirationRule {
    fn name(&self) -> &'static str {
        "credential-expiration"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Credentials
    }
    fn severity(&self) -> Severity {
        Severity::Medium
    }
    fn recommendation(&self) -> &'static str {
        "Refresh the session; its lifetime is outside the expected window"
    }

    async fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(customer) = ctx.registry.get(ctx.customer_code) else {
            return RuleOutcome::fail(format!("unknown customer {}", ctx.customer_code));
        };
        let Some(service) = customer.configured_services().into_iter().next() else {
            return RuleOutcome::fail("no service roles configured; nothing to verify");
        };

        let session = match ctx
            .credentials
            .assume_customer_role(ctx.customer_code, service)
            .await
        {
            Ok(s) => s,
            Err(e) => return RuleOutcome::fail(format!("could not obtain session: {}", e)),
        };

        let remaining = session.credentials.remaining();
        let in_window = remaining > Duration::minutes(5) && remaining < Duration::hours(2);
        let outcome = if in_window {
            RuleOutcome::pass(format!(
                "session lifetime {}s within expected window",
                remaining.num_seconds()
            ))
        } else {
            RuleOutcome::fail(format!(
                "session lifetime {}s outside (5min, 2h) window",
                remaining.num_seconds()
            ))
        };
        outcome.with_details(json!({ "remaining_seconds": remaining.num_seconds() }))
    }
}

// =========================================================================
// Access rules
// =========================================================================

/// Every configured role ARN must carry the customer's own account ID and a
/// well-formed IAM prefix.
pub struct CrossAccountAccessRule;

#[async_trait]
impl IsolationRule for CrossAccountAccessRule {
    fn name(&self) -> &'static str {
        "cross-account-access"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Access
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
    fn recommendation(&self) -> &'static str {
        "Point the role ARN at the customer's own account"
    }

    async fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(customer) = ctx.registry.get(ctx.customer_code) else {
            return RuleOutcome::fail(format!("unknown customer {}", ctx.customer_code));
        };

        let mut offending = Vec::new();
        let mut checked = 0u32;
        for service in customer.configured_services() {
            if let Some(arn) = customer.role_arn(service) {
                checked += 1;
                if !arn.starts_with("arn:aws:iam::") || !arn.contains(&customer.aws_account_id) {
                    offending.push(json!({ "service": service.to_string(), "role_arn": arn }));
                }
            }
        }

        if offending.is_empty() {
            RuleOutcome::pass(format!("{} role ARNs scoped to the customer account", checked))
                .with_details(json!({ "checked": checked }))
        } else {
            RuleOutcome::fail("role ARNs reference a foreign account or malformed prefix")
                .with_details(json!({ "checked": checked, "offending": offending }))
        }
    }
}

/// Role names must follow the per-customer naming convention and must not
/// carry broad-privilege fragments.
pub struct RolePermissionBoundariesRule;

#[async_trait]
impl IsolationRule for RolePermissionBoundariesRule {
    fn name(&self) -> &'static str {
        "role-permission-boundaries"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Access
    }
    fn severity(&self) -> Severity {
        Severity::High
    }
    fn recommendation(&self) -> &'static str {
        "Rename or scope down roles whose names suggest broad privileges"
    }

    async fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(customer) = ctx.registry.get(ctx.customer_code) else {
            return RuleOutcome::fail(format!("unknown customer {}", ctx.customer_code));
        };

        let code = ctx.customer_code.to_lowercase();
        let mut violations = Vec::new();
        for service in customer.configured_services() {
            let Some(arn) = customer.role_arn(service) else {
                continue;
            };
            let role_name = arn.rsplit('/').next().unwrap_or(arn).to_lowercase();

            if !role_name.contains(&code) {
                violations.push(json!({
                    "service": service.to_string(),
                    "role_name": role_name,
                    "problem": "role name does not carry the customer code",
                }));
                continue;
            }
            if let Some(fragment) = SUSPICIOUS_ROLE_FRAGMENTS
                .iter()
                .find(|f| role_name.contains(**f))
            {
                violations.push(json!({
                    "service": service.to_string(),
                    "role_name": role_name,
                    "problem": format!("role name contains broad-privilege fragment '{}'", fragment),
                }));
            }
        }

        if violations.is_empty() {
            RuleOutcome::pass("role names follow the per-customer convention")
        } else {
            RuleOutcome::fail("role naming violates permission boundaries")
                .with_details(json!({ "violations": violations }))
        }
    }
}

// =========================================================================
// Data / audit rules
// =========================================================================

/// Execution records for this customer must not reference other customers,
/// unless the record is a recognized multi-customer execution.
pub struct DataSegregationRule;

#[async_trait]
impl IsolationRule for DataSegregationRule {
    fn name(&self) -> &'static str {
        "data-segregation"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Data
    }
    fn severity(&self) -> Severity {
        Severity::High
    }
    fn recommendation(&self) -> &'static str {
        "Review execution records that reference customers outside the run"
    }

    async fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let records = match ctx.history.recent_executions(ctx.customer_code).await {
            Ok(r) => r,
            Err(e) => return RuleOutcome::fail(format!("execution history unavailable: {}", e)),
        };

        let mut shared = 0u32;
        let mut violations = Vec::new();
        for record in &records {
            let foreign: Vec<&String> = record
                .customer_codes
                .iter()
                .filter(|c| c.as_str() != ctx.customer_code)
                .collect();
            if foreign.is_empty() {
                continue;
            }
            if record.is_shared_with(ctx.customer_code) {
                shared += 1;
            } else {
                violations.push(json!({
                    "execution_id": record.execution_id,
                    "customer_codes": record.customer_codes,
                }));
            }
        }

        if violations.is_empty() {
            RuleOutcome::pass(format!(
                "{} records segregated ({} legitimately shared)",
                records.len(),
                shared
            ))
            .with_details(json!({ "records": records.len(), "shared_records": shared }))
        } else {
            RuleOutcome::fail("execution records reference foreign customers").with_details(json!({
                "records": records.len(),
                "shared_records": shared,
                "violations": violations,
            }))
        }
    }
}

/// The history store must honor the customer filter: every record returned
/// for this customer has to actually reference it.
pub struct AuditTrailIsolationRule;

#[async_trait]
impl IsolationRule for AuditTrailIsolationRule {
    fn name(&self) -> &'static str {
        "audit-trail-isolation"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Audit
    }
    fn severity(&self) -> Severity {
        Severity::Medium
    }
    fn recommendation(&self) -> &'static str {
        "Repair the execution-history customer filter"
    }

    async fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let records = match ctx.history.recent_executions(ctx.customer_code).await {
            Ok(r) => r,
            Err(e) => return RuleOutcome::fail(format!("execution history unavailable: {}", e)),
        };

        let stray: Vec<_> = records
            .iter()
            .filter(|r| !r.references(ctx.customer_code))
            .map(|r| json!({ "execution_id": r.execution_id, "customer_codes": r.customer_codes }))
            .collect();

        if stray.is_empty() {
            RuleOutcome::pass(format!("{} records all reference this customer", records.len()))
        } else {
            RuleOutcome::fail("history filter returned records for other customers")
                .with_details(json!({ "stray": stray }))
        }
    }
}

/// Every execution record must carry a non-empty initiator
pub struct ExecutionContextRule;

#[async_trait]
impl IsolationRule for ExecutionContextRule {
    fn name(&self) -> &'static str {
        "execution-context-isolation"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Audit
    }
    fn severity(&self) -> Severity {
        Severity::Low
    }
    fn recommendation(&self) -> &'static str {
        "Require an initiator on every recorded execution"
    }

    async fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let records = match ctx.history.recent_executions(ctx.customer_code).await {
            Ok(r) => r,
            Err(e) => return RuleOutcome::fail(format!("execution history unavailable: {}", e)),
        };

        let anonymous = records
            .iter()
            .filter(|r| r.initiator.trim().is_empty())
            .count();

        if anonymous == 0 {
            RuleOutcome::pass(format!("{} records carry an initiator", records.len()))
        } else {
            RuleOutcome::fail(format!("{} records missing an initiator", anonymous))
                .with_details(json!({ "anonymous_records": anonymous }))
        }
    }
}

// =========================================================================
// Network rule
// =========================================================================

/// Clients must stay in the customer's home region and the public AWS
/// partition; a role in another partition cannot be reached from here.
pub struct NetworkIsolationRule;

fn region_is_well_formed(region: &str) -> bool {
    let mut parts = region.split('-');
    let Some(first) = parts.next() else {
        return false;
    };
    let rest: Vec<&str> = parts.collect();
    if first.len() != 2 || rest.is_empty() {
        return false;
    }
    let Some(last) = rest.last() else {
        return false;
    };
    first.chars().all(|c| c.is_ascii_lowercase())
        && last.chars().all(|c| c.is_ascii_digit())
        && rest[..rest.len() - 1]
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_lowercase()))
}

#[async_trait]
impl IsolationRule for NetworkIsolationRule {
    fn name(&self) -> &'static str {
        "network-isolation"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Network
    }
    fn severity(&self) -> Severity {
        Severity::Medium
    }
    fn recommendation(&self) -> &'static str {
        "Pin the customer's clients to its home region and the aws partition"
    }

    async fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(customer) = ctx.registry.get(ctx.customer_code) else {
            return RuleOutcome::fail(format!("unknown customer {}", ctx.customer_code));
        };

        let mut problems = Vec::new();
        if !region_is_well_formed(&customer.region) {
            problems.push(json!({ "problem": "malformed region", "region": customer.region }));
        }
        for service in customer.configured_services() {
            if let Some(arn) = customer.role_arn(service) {
                if !arn.starts_with("arn:aws:") {
                    problems.push(json!({
                        "problem": "role outside the aws partition",
                        "service": service.to_string(),
                        "role_arn": arn,
                    }));
                }
            }
        }

        if problems.is_empty() {
            RuleOutcome::pass(format!("region {} and partition checks hold", customer.region))
        } else {
            RuleOutcome::fail("network boundary checks failed")
                .with_details(json!({ "problems": problems }))
        }
    }
}
