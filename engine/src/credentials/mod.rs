//! Credential Manager
//!
//! Assumes per-customer IAM roles via STS, caches the resulting sessions with
//! expiry, and hands out customer-scoped service clients. Every fresh
//! assumption is verified against the registry's expected account ID before it
//! is cached; a session that resolves to the wrong account is discarded and
//! surfaced as a validation error.

pub mod sts;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::ExpiringCache;
use crate::customers::{CustomerRegistry, ServiceType};
use crate::pool::Bulkhead;

pub use sts::{AssumedCredentials, StsClientOps, StsOps};

/// Fixed STS session duration (1 hour)
pub const SESSION_DURATION_SECS: i32 = 3600;

/// Cached sessions within this buffer of expiry are treated as misses
pub const EXPIRY_SAFETY_BUFFER_MIN: i64 = 5;

/// Errors raised while resolving customer credentials
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Customer code not present in the registry
    #[error("unknown customer: {0}")]
    UnknownCustomer(String),

    /// The customer has no role configured for the requested service
    #[error("no {service} role configured for customer {customer}")]
    Configuration {
        customer: String,
        service: ServiceType,
    },

    /// STS refused or failed the assumption (trust policy, permissions)
    #[error("role assumption failed for customer {customer}: {reason}")]
    RoleAssumption { customer: String, reason: String },

    /// Post-assumption identity check resolved to the wrong account.
    /// The strongest signal of a prospective isolation breach.
    #[error(
        "credential validation failed for customer {customer}: expected account {expected}, got {actual}"
    )]
    Validation {
        customer: String,
        expected: String,
        actual: String,
    },
}

/// One cached role session, keyed by (customer code, service type)
#[derive(Debug, Clone)]
pub struct CachedCredentials {
    pub credentials: AssumedCredentials,
    pub role_arn: String,
    pub session_name: String,
}

/// A verified, customer-scoped session ready to build service clients
#[derive(Debug, Clone)]
pub struct CustomerSession {
    pub customer_code: String,
    pub account_id: String,
    pub region: String,
    pub service: ServiceType,
    pub role_arn: String,
    pub credentials: AssumedCredentials,
}

impl CustomerSession {
    fn sdk_config(&self) -> aws_config::SdkConfig {
        self.credentials.sdk_config(&self.region)
    }

    pub fn ses_client(&self) -> aws_sdk_sesv2::Client {
        aws_sdk_sesv2::Client::new(&self.sdk_config())
    }

    pub fn sqs_client(&self) -> aws_sdk_sqs::Client {
        aws_sdk_sqs::Client::new(&self.sdk_config())
    }

    pub fn identitystore_client(&self) -> aws_sdk_identitystore::Client {
        aws_sdk_identitystore::Client::new(&self.sdk_config())
    }
}

/// Outcome of verifying one customer's configured roles
#[derive(Debug, Clone, Serialize)]
pub struct CredentialHealth {
    pub customer_code: String,
    pub checks: Vec<CredentialCheck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialCheck {
    pub service: ServiceType,
    pub ok: bool,
    pub error: Option<String>,
}

impl CredentialHealth {
    pub fn healthy(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }
}

/// Manages per-customer role assumption and the shared credential cache
pub struct CredentialManager {
    registry: Arc<CustomerRegistry>,
    sts: Arc<dyn StsOps>,
    cache: ExpiringCache<(String, ServiceType), CachedCredentials>,
    purpose: String,
    external_id: Option<String>,
}

impl CredentialManager {
    pub fn new(registry: Arc<CustomerRegistry>, sts: Arc<dyn StsOps>, purpose: &str) -> Self {
        Self {
            registry,
            sts,
            cache: ExpiringCache::new(),
            purpose: purpose.to_string(),
            external_id: None,
        }
    }

    /// Attach an external ID presented on every assumption
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Build a manager backed by the real STS client from ambient credentials
    pub async fn from_env(registry: Arc<CustomerRegistry>, purpose: &str) -> Self {
        let sts = Arc::new(StsClientOps::from_env().await);
        Self::new(registry, sts, purpose)
    }

    pub fn registry(&self) -> &CustomerRegistry {
        &self.registry
    }

    /// Resolve a customer-scoped session for the given service.
    ///
    /// Serves from the cache when the entry has more than five minutes of
    /// lifetime left; otherwise assumes the role fresh, asserts the resulting
    /// account ID matches the registry, and caches the replacement wholesale.
    pub async fn assume_customer_role(
        &self,
        customer_code: &str,
        service: ServiceType,
    ) -> Result<CustomerSession, CredentialError> {
        let customer = self
            .registry
            .get(customer_code)
            .ok_or_else(|| CredentialError::UnknownCustomer(customer_code.to_string()))?;

        let role_arn = customer
            .role_arn(service)
            .ok_or_else(|| CredentialError::Configuration {
                customer: customer_code.to_string(),
                service,
            })?;

        let key = (customer_code.to_string(), service);
        if let Some(cached) = self
            .cache
            .get_fresh(&key, Duration::minutes(EXPIRY_SAFETY_BUFFER_MIN))
            .await
        {
            debug!(
                customer = %customer_code,
                service = %service,
                "Serving cached role session"
            );
            return Ok(CustomerSession {
                customer_code: customer_code.to_string(),
                account_id: customer.aws_account_id.clone(),
                region: customer.region.clone(),
                service,
                role_arn: cached.role_arn,
                credentials: cached.credentials,
            });
        }

        let session_name = format!(
            "{}-{}-{}",
            self.purpose,
            customer_code,
            Utc::now().timestamp()
        );

        let credentials = self
            .sts
            .assume_role(
                role_arn,
                &session_name,
                SESSION_DURATION_SECS,
                self.external_id.as_deref(),
            )
            .await
            .map_err(|e| CredentialError::RoleAssumption {
                customer: customer_code.to_string(),
                reason: e.to_string(),
            })?;

        // Verify before caching: a session resolving to the wrong account
        // must never be served, not even once.
        let actual_account = self
            .sts
            .caller_account(&credentials, &customer.region)
            .await
            .map_err(|e| CredentialError::RoleAssumption {
                customer: customer_code.to_string(),
                reason: format!("identity check failed: {}", e),
            })?;

        if actual_account != customer.aws_account_id {
            warn!(
                customer = %customer_code,
                expected = %customer.aws_account_id,
                actual = %actual_account,
                "Assumed role resolved to unexpected account"
            );
            return Err(CredentialError::Validation {
                customer: customer_code.to_string(),
                expected: customer.aws_account_id.clone(),
                actual: actual_account,
            });
        }

        let cached = CachedCredentials {
            credentials: credentials.clone(),
            role_arn: role_arn.to_string(),
            session_name: session_name.clone(),
        };
        self.cache
            .insert(key, cached, credentials.expires_at)
            .await;

        info!(
            customer = %customer_code,
            service = %service,
            session = %session_name,
            "Assumed and verified customer role"
        );

        Ok(CustomerSession {
            customer_code: customer_code.to_string(),
            account_id: customer.aws_account_id.clone(),
            region: customer.region.clone(),
            service,
            role_arn: role_arn.to_string(),
            credentials,
        })
    }

    /// Force-evict the cached session and assume the role fresh
    pub async fn refresh_credentials(
        &self,
        customer_code: &str,
        service: ServiceType,
    ) -> Result<CustomerSession, CredentialError> {
        self.cache
            .invalidate(&(customer_code.to_string(), service))
            .await;
        self.assume_customer_role(customer_code, service).await
    }

    /// Seconds of lifetime left on the cached session, if one exists
    pub async fn cached_session_remaining(
        &self,
        customer_code: &str,
        service: ServiceType,
    ) -> Option<Duration> {
        let expires_at = self
            .cache
            .expires_at(&(customer_code.to_string(), service))
            .await?;
        Some((expires_at - Utc::now()).max(Duration::zero()))
    }

    /// Verify identity for every service role the customer has configured
    pub async fn validate_customer_credentials(&self, customer_code: &str) -> CredentialHealth {
        let services = self
            .registry
            .get(customer_code)
            .map(|c| c.configured_services())
            .unwrap_or_default();

        let mut checks = Vec::with_capacity(services.len());
        for service in services {
            let check = match self.assume_customer_role(customer_code, service).await {
                Ok(_) => CredentialCheck {
                    service,
                    ok: true,
                    error: None,
                },
                Err(e) => CredentialCheck {
                    service,
                    ok: false,
                    error: Some(e.to_string()),
                },
            };
            checks.push(check);
        }

        CredentialHealth {
            customer_code: customer_code.to_string(),
            checks,
        }
    }

    /// Fan out identity verification across every registered customer
    pub async fn validate_all_customer_credentials(
        self: Arc<Self>,
        max_concurrency: usize,
    ) -> HashMap<String, CredentialHealth> {
        let pool = Bulkhead::new(max_concurrency);
        let manager = Arc::clone(&self);

        let results = pool
            .run_all(self.registry.codes(), move |code| {
                let manager = Arc::clone(&manager);
                async move {
                    let health = manager.validate_customer_credentials(&code).await;
                    (code, health)
                }
            })
            .await;

        let healthy = results.iter().filter(|(_, h)| h.healthy()).count();
        info!(
            customers = results.len(),
            healthy = healthy,
            unhealthy = results.len() - healthy,
            "Credential validation sweep complete"
        );

        results.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customers::CustomerAccountInfo;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Stub STS whose sessions resolve to a fixed account ID
    struct StubSts {
        account_id: String,
        assume_calls: AtomicU32,
        fail_assumption: bool,
        /// Issued session lifetime; defaults to the requested duration
        session_lifetime: Option<Duration>,
    }

    impl StubSts {
        fn resolving_to(account_id: &str) -> Self {
            Self {
                account_id: account_id.to_string(),
                assume_calls: AtomicU32::new(0),
                fail_assumption: false,
                session_lifetime: None,
            }
        }

        fn failing() -> Self {
            Self {
                fail_assumption: true,
                ..Self::resolving_to("000000000000")
            }
        }

        fn short_lived(account_id: &str, lifetime: Duration) -> Self {
            Self {
                session_lifetime: Some(lifetime),
                ..Self::resolving_to(account_id)
            }
        }
    }

    #[async_trait]
    impl StsOps for StubSts {
        async fn assume_role(
            &self,
            _role_arn: &str,
            session_name: &str,
            duration_secs: i32,
            _external_id: Option<&str>,
        ) -> Result<AssumedCredentials> {
            self.assume_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_assumption {
                bail!("AccessDenied: not authorized to perform sts:AssumeRole");
            }
            let lifetime = self
                .session_lifetime
                .unwrap_or_else(|| Duration::seconds(duration_secs as i64));
            Ok(AssumedCredentials {
                access_key_id: "ASIASTUB".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: format!("token-{}", session_name),
                expires_at: Utc::now() + lifetime,
            })
        }

        async fn caller_account(
            &self,
            _credentials: &AssumedCredentials,
            _region: &str,
        ) -> Result<String> {
            Ok(self.account_id.clone())
        }
    }

    fn registry_with(code: &str, account_id: &str) -> Arc<CustomerRegistry> {
        Arc::new(CustomerRegistry::new(vec![CustomerAccountInfo {
            customer_code: code.to_string(),
            aws_account_id: account_id.to_string(),
            region: "eu-central-1".to_string(),
            display_name: code.to_uppercase(),
            ses_role_arn: Some(format!("arn:aws:iam::{}:role/{}-ses-ops", account_id, code)),
            sqs_role_arn: None,
            s3_role_arn: None,
            identity_center_role_arn: None,
            identity_store_id: None,
        }]))
    }

    #[tokio::test]
    async fn test_cache_hit_skips_second_sts_call() {
        let sts = Arc::new(StubSts::resolving_to("111122223333"));
        let manager = CredentialManager::new(
            registry_with("hts", "111122223333"),
            sts.clone(),
            "contact-import",
        );

        let first = manager
            .assume_customer_role("hts", ServiceType::Ses)
            .await
            .unwrap();
        let second = manager
            .assume_customer_role("hts", ServiceType::Ses)
            .await
            .unwrap();

        assert_eq!(sts.assume_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.credentials.session_token, second.credentials.session_token);
        assert_eq!(second.account_id, "111122223333");
    }

    #[tokio::test]
    async fn test_near_expiry_entry_triggers_reassumption() {
        // Sessions expire within the 5-minute safety buffer, so every call
        // counts the cached entry as a miss and re-assumes.
        let sts = Arc::new(StubSts::short_lived("111122223333", Duration::minutes(4)));
        let manager = CredentialManager::new(
            registry_with("hts", "111122223333"),
            sts.clone(),
            "contact-import",
        );

        manager
            .assume_customer_role("hts", ServiceType::Ses)
            .await
            .unwrap();
        manager
            .assume_customer_role("hts", ServiceType::Ses)
            .await
            .unwrap();

        assert_eq!(sts.assume_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_forces_new_assumption() {
        let sts = Arc::new(StubSts::resolving_to("111122223333"));
        let manager = CredentialManager::new(
            registry_with("hts", "111122223333"),
            sts.clone(),
            "contact-import",
        );

        manager
            .assume_customer_role("hts", ServiceType::Ses)
            .await
            .unwrap();
        manager
            .refresh_credentials("hts", ServiceType::Ses)
            .await
            .unwrap();

        assert_eq!(sts.assume_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_account_mismatch_is_fatal_and_never_cached() {
        // Stub resolves to an account that is not the registry's.
        let sts = Arc::new(StubSts::resolving_to("999988887777"));
        let manager = CredentialManager::new(
            registry_with("hts", "111122223333"),
            sts.clone(),
            "contact-import",
        );

        for _ in 0..2 {
            let err = manager
                .assume_customer_role("hts", ServiceType::Ses)
                .await
                .unwrap_err();
            match err {
                CredentialError::Validation {
                    expected, actual, ..
                } => {
                    assert_eq!(expected, "111122223333");
                    assert_eq!(actual, "999988887777");
                }
                other => panic!("expected validation error, got {other}"),
            }
        }

        // The bad session was never cached, so the second attempt re-assumed.
        assert_eq!(sts.assume_calls.load(Ordering::SeqCst), 2);
        assert!(manager
            .cached_session_remaining("hts", ServiceType::Ses)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_service_is_configuration_error() {
        let sts = Arc::new(StubSts::resolving_to("111122223333"));
        let manager =
            CredentialManager::new(registry_with("hts", "111122223333"), sts, "contact-import");

        let err = manager
            .assume_customer_role("hts", ServiceType::Sqs)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Configuration { .. }));

        let err = manager
            .assume_customer_role("cds", ServiceType::Ses)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::UnknownCustomer(_)));
    }

    #[tokio::test]
    async fn test_validate_all_reports_per_customer_health() {
        let sts = Arc::new(StubSts::failing());
        let manager = Arc::new(CredentialManager::new(
            registry_with("hts", "111122223333"),
            sts,
            "health-check",
        ));

        let results = manager.validate_all_customer_credentials(4).await;

        assert_eq!(results.len(), 1);
        let health = &results["hts"];
        assert!(!health.healthy());
        assert_eq!(health.checks.len(), 1);
        assert!(health.checks[0]
            .error
            .as_deref()
            .unwrap()
            .contains("AccessDenied"));
    }
}
