//! SES Contact Operations
//!
//! Contact-store seam over SES v2 plus the idempotent import policy: an
//! incoming contact whose topic set already matches is skipped, a differing
//! one is removed and re-added, an absent one is added. Topic comparisons are
//! order-independent.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_sesv2::types::{SubscriptionStatus, TopicPreference};
use tracing::debug;

/// A mailing-list contact and the topics it is opted into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    pub email: String,
    pub topics: Vec<String>,
}

/// What the importer decided to do with one contact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactAction {
    /// Contact absent from the list
    Add,
    /// Present with a different topic set: remove, then re-add
    Update,
    /// Present with an identical topic set
    Skip,
}

/// Order-independent topic-set equality
pub fn topics_equal(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a_sorted = a.to_vec();
    let mut b_sorted = b.to_vec();
    a_sorted.sort();
    b_sorted.sort();
    a_sorted == b_sorted
}

/// Decide the idempotent action for one contact
pub fn plan_contact_action(existing: Option<&ContactRecord>, desired: &[String]) -> ContactAction {
    match existing {
        None => ContactAction::Add,
        Some(record) if topics_equal(&record.topics, desired) => ContactAction::Skip,
        Some(_) => ContactAction::Update,
    }
}

/// Contact-list operations the importer needs
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Current contact record, or None when the contact is absent
    async fn get_contact(&self, list: &str, email: &str) -> Result<Option<ContactRecord>>;

    /// Add a contact opted into the given topics
    async fn add_contact(&self, list: &str, contact: &ContactRecord) -> Result<()>;

    /// Remove a contact from the list
    async fn remove_contact(&self, list: &str, email: &str) -> Result<()>;
}

/// Real store backed by a customer-scoped SES v2 client
pub struct SesContactStore {
    client: aws_sdk_sesv2::Client,
}

impl SesContactStore {
    pub fn new(client: aws_sdk_sesv2::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContactStore for SesContactStore {
    async fn get_contact(&self, list: &str, email: &str) -> Result<Option<ContactRecord>> {
        let response = self
            .client
            .get_contact()
            .contact_list_name(list)
            .email_address(email)
            .send()
            .await;

        let output = match response {
            Ok(output) => output,
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found_exception() {
                    return Ok(None);
                }
                return Err(service_err)
                    .with_context(|| format!("ses:GetContact failed for {}", email));
            }
        };

        let topics = output
            .topic_preferences()
            .iter()
            .filter(|p| *p.subscription_status() == SubscriptionStatus::OptIn)
            .map(|p| p.topic_name().to_string())
            .collect();

        Ok(Some(ContactRecord {
            email: email.to_string(),
            topics,
        }))
    }

    async fn add_contact(&self, list: &str, contact: &ContactRecord) -> Result<()> {
        let mut request = self
            .client
            .create_contact()
            .contact_list_name(list)
            .email_address(&contact.email);

        for topic in &contact.topics {
            let preference = TopicPreference::builder()
                .topic_name(topic)
                .subscription_status(SubscriptionStatus::OptIn)
                .build()
                .with_context(|| format!("invalid topic preference: {}", topic))?;
            request = request.topic_preferences(preference);
        }

        request
            .send()
            .await
            .with_context(|| format!("ses:CreateContact failed for {}", contact.email))?;

        debug!(email = %contact.email, list = %list, "Contact added");
        Ok(())
    }

    async fn remove_contact(&self, list: &str, email: &str) -> Result<()> {
        self.client
            .delete_contact()
            .contact_list_name(list)
            .email_address(email)
            .send()
            .await
            .with_context(|| format!("ses:DeleteContact failed for {}", email))?;

        debug!(email = %email, list = %list, "Contact removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(email: &str, topics: &[&str]) -> ContactRecord {
        ContactRecord {
            email: email.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_topics_equal_ignores_order() {
        let a = vec!["alerts".to_string(), "newsletter".to_string()];
        let b = vec!["newsletter".to_string(), "alerts".to_string()];
        assert!(topics_equal(&a, &b));

        let c = vec!["alerts".to_string()];
        assert!(!topics_equal(&a, &c));
        assert!(topics_equal(&[], &[]));
    }

    #[test]
    fn test_plan_add_update_skip() {
        let desired = vec!["alerts".to_string(), "newsletter".to_string()];

        assert_eq!(plan_contact_action(None, &desired), ContactAction::Add);

        let same = record("a@example.com", &["newsletter", "alerts"]);
        assert_eq!(
            plan_contact_action(Some(&same), &desired),
            ContactAction::Skip
        );

        let different = record("a@example.com", &["alerts"]);
        assert_eq!(
            plan_contact_action(Some(&different), &desired),
            ContactAction::Update
        );
    }

    #[test]
    fn test_plan_is_idempotent() {
        // Planning twice against the post-import state always lands on Skip.
        let desired = vec!["alerts".to_string()];
        let after_import = record("a@example.com", &["alerts"]);
        assert_eq!(
            plan_contact_action(Some(&after_import), &desired),
            ContactAction::Skip
        );
        assert_eq!(
            plan_contact_action(Some(&after_import), &desired),
            ContactAction::Skip
        );
    }
}
