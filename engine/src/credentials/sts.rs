//! STS Operations
//!
//! Thin seam over AWS STS so the credential manager can be exercised against
//! stub identities in tests. The real implementation signs AssumeRole and
//! GetCallerIdentity calls through the official SDK.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Temporary credentials returned by a role assumption
#[derive(Debug, Clone)]
pub struct AssumedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

impl AssumedCredentials {
    /// Seconds until these credentials expire (0 when already expired)
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).max(Duration::zero())
    }

    /// Build an SDK config that signs requests with these credentials
    pub fn sdk_config(&self, region: &str) -> SdkConfig {
        let credentials = Credentials::new(
            self.access_key_id.clone(),
            self.secret_access_key.clone(),
            Some(self.session_token.clone()),
            None,
            "crossacct-assumed-role",
        );

        SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(SharedCredentialsProvider::new(credentials))
            .build()
    }
}

/// STS calls the credential manager depends on
#[async_trait]
pub trait StsOps: Send + Sync {
    /// Assume `role_arn` for `duration_secs`, optionally presenting an external id
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
        duration_secs: i32,
        external_id: Option<&str>,
    ) -> Result<AssumedCredentials>;

    /// Account ID the given credentials actually resolve to
    async fn caller_account(
        &self,
        credentials: &AssumedCredentials,
        region: &str,
    ) -> Result<String>;
}

/// Real STS implementation backed by the SDK client
pub struct StsClientOps {
    client: aws_sdk_sts::Client,
}

impl StsClientOps {
    pub fn new(client: aws_sdk_sts::Client) -> Self {
        Self { client }
    }

    /// Build from ambient credentials (env, profile, or instance role)
    pub async fn from_env() -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self::new(aws_sdk_sts::Client::new(&config))
    }
}

#[async_trait]
impl StsOps for StsClientOps {
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
        duration_secs: i32,
        external_id: Option<&str>,
    ) -> Result<AssumedCredentials> {
        debug!(role_arn = %role_arn, session_name = %session_name, "Calling sts:AssumeRole");

        let response = self
            .client
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .duration_seconds(duration_secs)
            .set_external_id(external_id.map(String::from))
            .send()
            .await
            .with_context(|| format!("sts:AssumeRole failed for {}", role_arn))?;

        let credentials = response
            .credentials()
            .ok_or_else(|| anyhow!("AssumeRole response for {} missing credentials", role_arn))?;

        let expiration = credentials.expiration();
        let expires_at =
            DateTime::from_timestamp(expiration.secs(), expiration.subsec_nanos())
                .unwrap_or_else(|| Utc::now() + Duration::seconds(duration_secs as i64));

        Ok(AssumedCredentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expires_at,
        })
    }

    async fn caller_account(
        &self,
        credentials: &AssumedCredentials,
        region: &str,
    ) -> Result<String> {
        let config = credentials.sdk_config(region);
        let client = aws_sdk_sts::Client::new(&config);

        let identity = client
            .get_caller_identity()
            .send()
            .await
            .context("sts:GetCallerIdentity failed for assumed session")?;

        identity
            .account()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("GetCallerIdentity response missing account"))
    }
}
