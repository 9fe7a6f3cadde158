//! Identity Center Directory
//!
//! Source of the users a customer's contact import works from: a live
//! Identity Store read when the management role and store id are configured,
//! or a previously persisted JSON snapshot otherwise.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One directory user eligible for contact import
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub user_id: String,
    pub user_name: String,
    pub display_name: String,
    pub email: Option<String>,
}

/// Where import users come from
#[async_trait]
pub trait DirectorySource: Send + Sync {
    async fn list_users(&self) -> Result<Vec<DirectoryUser>>;
}

/// Live Identity Store directory read, paginated
pub struct IdentityStoreDirectory {
    client: aws_sdk_identitystore::Client,
    identity_store_id: String,
}

impl IdentityStoreDirectory {
    pub fn new(client: aws_sdk_identitystore::Client, identity_store_id: &str) -> Self {
        Self {
            client,
            identity_store_id: identity_store_id.to_string(),
        }
    }
}

#[async_trait]
impl DirectorySource for IdentityStoreDirectory {
    async fn list_users(&self) -> Result<Vec<DirectoryUser>> {
        let mut users = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_users()
                .identity_store_id(&self.identity_store_id);
            if let Some(token) = &next_token {
                request = request.next_token(token);
            }

            let response = request
                .send()
                .await
                .context("identitystore:ListUsers failed")?;

            for user in response.users() {
                let email = user
                    .emails()
                    .iter()
                    .find(|e| e.primary())
                    .or_else(|| user.emails().first())
                    .and_then(|e| e.value())
                    .map(|v| v.to_string());

                users.push(DirectoryUser {
                    user_id: user.user_id().to_string(),
                    user_name: user.user_name().unwrap_or_default().to_string(),
                    display_name: user.display_name().unwrap_or_default().to_string(),
                    email,
                });
            }

            next_token = response.next_token().map(|t| t.to_string());
            if next_token.is_none() {
                break;
            }
        }

        debug!(count = users.len(), store = %self.identity_store_id, "Listed directory users");
        Ok(users)
    }
}

/// Snapshot fallback: users persisted to a JSON file by an earlier run
pub struct SnapshotDirectory {
    path: PathBuf,
}

impl SnapshotDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Conventional snapshot path for a customer under a snapshot directory
    pub fn for_customer(snapshot_dir: &Path, customer_code: &str) -> Self {
        Self::new(snapshot_dir.join(format!("{}.json", customer_code)))
    }
}

#[async_trait]
impl DirectorySource for SnapshotDirectory {
    async fn list_users(&self) -> Result<Vec<DirectoryUser>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read snapshot: {}", self.path.display()))?;
        let users: Vec<DirectoryUser> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse snapshot: {}", self.path.display()))?;

        debug!(count = users.len(), path = %self.path.display(), "Loaded directory snapshot");
        Ok(users)
    }
}

/// Persist users so later runs can import without the management role
pub fn save_snapshot(path: &Path, users: &[DirectoryUser]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create snapshot dir: {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(users)?;
    std::fs::write(path, raw)
        .with_context(|| format!("Failed to write snapshot: {}", path.display()))?;

    info!(count = users.len(), path = %path.display(), "Directory snapshot saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let users = vec![
            DirectoryUser {
                user_id: "u-1".to_string(),
                user_name: "jdoe".to_string(),
                display_name: "J. Doe".to_string(),
                email: Some("jdoe@example.com".to_string()),
            },
            DirectoryUser {
                user_id: "u-2".to_string(),
                user_name: "asmith".to_string(),
                display_name: "A. Smith".to_string(),
                email: None,
            },
        ];

        let path = dir.path().join("snapshots").join("hts.json");
        save_snapshot(&path, &users).unwrap();

        let source = SnapshotDirectory::for_customer(&dir.path().join("snapshots"), "hts");
        let loaded = source.list_users().await.unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].email.as_deref(), Some("jdoe@example.com"));
        assert!(loaded[1].email.is_none());
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = SnapshotDirectory::for_customer(dir.path(), "absent");
        assert!(source.list_users().await.is_err());
    }
}
