//! SQS Message Processor
//!
//! Validates and processes one customer's S3 event notifications. A processor
//! instance is bound to exactly one (customer code, queue URL) pair; any
//! message whose object key does not sit under `customers/<code>/` is refused
//! outright, well-formed or not. Fails closed.

pub mod types;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

pub use types::{
    ProcessingResult, ProcessingStats, S3EventNotification, S3EventRecord, SqsMessage,
};

/// Why a message was refused
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message id is empty")]
    EmptyMessageId,

    #[error("message body is empty")]
    EmptyBody,

    #[error("message body is not a valid S3 event: {0}")]
    MalformedBody(String),

    #[error("event source '{0}' is not aws:s3")]
    WrongEventSource(String),

    #[error("event contains no records")]
    NoRecords,

    #[error("malformed object key: {0}")]
    MalformedKey(String),

    #[error("object key '{key}' does not belong to customer {customer}")]
    ForeignObjectKey { customer: String, key: String },

    #[error("notification failed: {0}")]
    NotificationFailed(String),
}

/// Downstream notification/email trigger invoked once a message's ownership
/// has been validated. Returns the number of emails sent.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn notify_change(&self, customer_code: &str, change_id: &str) -> Result<u32>;
}

/// Notifier that only records the trigger; used until a delivery backend is
/// wired in and as the dry-run stand-in.
pub struct LoggingNotifier;

#[async_trait]
impl ChangeNotifier for LoggingNotifier {
    async fn notify_change(&self, customer_code: &str, change_id: &str) -> Result<u32> {
        info!(customer = %customer_code, change_id = %change_id, "Change notification triggered");
        Ok(0)
    }
}

/// Processor bound to a single customer's queue
pub struct SqsMessageProcessor {
    customer_code: String,
    queue_url: String,
    notifier: Arc<dyn ChangeNotifier>,
}

impl SqsMessageProcessor {
    pub fn new(customer_code: &str, queue_url: &str, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self {
            customer_code: customer_code.to_string(),
            queue_url: queue_url.to_string(),
            notifier,
        }
    }

    pub fn customer_code(&self) -> &str {
        &self.customer_code
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// Structural validation: id, body, JSON shape, and event source
    pub fn validate_sqs_message(message: &SqsMessage) -> Result<S3EventNotification, MessageError> {
        if message.message_id.trim().is_empty() {
            return Err(MessageError::EmptyMessageId);
        }
        if message.body.trim().is_empty() {
            return Err(MessageError::EmptyBody);
        }

        let event: S3EventNotification = serde_json::from_str(&message.body)
            .map_err(|e| MessageError::MalformedBody(e.to_string()))?;

        if event.records.is_empty() {
            return Err(MessageError::NoRecords);
        }
        for record in &event.records {
            if record.event_source != "aws:s3" {
                return Err(MessageError::WrongEventSource(record.event_source.clone()));
            }
        }

        Ok(event)
    }

    /// The isolation boundary for this component: the key must be exactly
    /// `customers/<boundCustomer>/<name>.json`. Anything else fails closed.
    pub fn validate_customer_from_s3_key(&self, key: &str) -> Result<(), MessageError> {
        let segments: Vec<&str> = key.split('/').collect();
        if segments.len() != 3 || segments[0] != "customers" {
            return Err(MessageError::MalformedKey(key.to_string()));
        }

        let (owner, file_name) = (segments[1], segments[2]);
        let Some(stem) = file_name.strip_suffix(".json") else {
            return Err(MessageError::MalformedKey(key.to_string()));
        };
        if owner.is_empty() || stem.is_empty() {
            return Err(MessageError::MalformedKey(key.to_string()));
        }

        if owner != self.customer_code {
            return Err(MessageError::ForeignObjectKey {
                customer: self.customer_code.clone(),
                key: key.to_string(),
            });
        }

        Ok(())
    }

    /// Process one message end to end.
    ///
    /// Validation failures produce a failed result without side effects; the
    /// notifier only runs after ownership of the object key is proven.
    pub async fn process_message(&self, message: &SqsMessage) -> ProcessingResult {
        let started = Instant::now();

        match self.try_process(message).await {
            Ok((change_id, emails_sent)) => {
                info!(
                    customer = %self.customer_code,
                    message_id = %message.message_id,
                    change_id = %change_id,
                    emails_sent = emails_sent,
                    "Message processed"
                );
                ProcessingResult {
                    message_id: message.message_id.clone(),
                    customer_code: self.customer_code.clone(),
                    success: true,
                    emails_sent,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    customer = %self.customer_code,
                    message_id = %message.message_id,
                    error = %e,
                    "Message refused"
                );
                ProcessingResult {
                    message_id: message.message_id.clone(),
                    customer_code: self.customer_code.clone(),
                    success: false,
                    emails_sent: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn try_process(&self, message: &SqsMessage) -> Result<(String, u32), MessageError> {
        let event = Self::validate_sqs_message(message)?;

        // Validated above: at least one record exists.
        let key = &event.records[0].s3.object.key;
        self.validate_customer_from_s3_key(key)?;

        let change_id = extract_change_id_from_s3_key(key)
            .ok_or_else(|| MessageError::MalformedKey(key.to_string()))?;

        let emails_sent = self
            .notifier
            .notify_change(&self.customer_code, &change_id)
            .await
            .map_err(|e| MessageError::NotificationFailed(e.to_string()))?;

        Ok((change_id, emails_sent))
    }

    /// Process a batch sequentially, in slice order.
    ///
    /// Each message's result stands alone; one refused message never aborts
    /// the rest. An empty batch is an error.
    pub async fn process_message_batch(
        &self,
        messages: &[SqsMessage],
    ) -> Result<Vec<ProcessingResult>> {
        if messages.is_empty() {
            bail!("batch contains no messages");
        }

        let mut results = Vec::with_capacity(messages.len());
        for message in messages {
            results.push(self.process_message(message).await);
        }
        Ok(results)
    }
}

/// Change identifier embedded in the object key: the file stem with a
/// trailing `-YYYY-MM-DDTHH-MM-SS` segment stripped when present.
pub fn extract_change_id_from_s3_key(key: &str) -> Option<String> {
    let file_name = key.rsplit('/').next()?;
    let stem = file_name.strip_suffix(".json").unwrap_or(file_name);
    if stem.is_empty() {
        return None;
    }

    const TS_LEN: usize = 20; // "-YYYY-MM-DDTHH-MM-SS"
    if stem.len() > TS_LEN {
        let (head, tail) = stem.split_at(stem.len() - TS_LEN);
        if is_timestamp_suffix(tail) {
            return Some(head.to_string());
        }
    }

    Some(stem.to_string())
}

fn is_timestamp_suffix(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 20 {
        return false;
    }
    for (i, b) in bytes.iter().enumerate() {
        let ok = match i {
            0 | 5 | 8 | 14 | 17 => *b == b'-',
            11 => *b == b'T',
            _ => b.is_ascii_digit(),
        };
        if !ok {
            return false;
        }
    }
    true
}

/// Reduce a result slice to totals and a success-rate percentage
pub fn processing_stats(results: &[ProcessingResult]) -> ProcessingStats {
    let total_messages = results.len() as u32;
    if total_messages == 0 {
        return ProcessingStats::default();
    }

    let successful_messages = results.iter().filter(|r| r.success).count() as u32;
    let total_emails_sent = results.iter().map(|r| r.emails_sent).sum();

    let rate = successful_messages as f64 / total_messages as f64 * 100.0;
    ProcessingStats {
        total_messages,
        successful_messages,
        failed_messages: total_messages - successful_messages,
        total_emails_sent,
        success_rate: (rate * 100.0).round() / 100.0,
    }
}
