//! SQS Processing Types
//!
//! Inbound S3-event-wrapped SQS message shapes and per-message outcomes.

use serde::{Deserialize, Serialize};

/// One inbound queue message as the poller hands it over
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqsMessage {
    pub message_id: String,
    pub body: String,
    /// Needed to delete the message after successful processing
    pub receipt_handle: Option<String>,
}

/// S3 event notification envelope carried in the message body
#[derive(Debug, Clone, Deserialize)]
pub struct S3EventNotification {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3EventRecord {
    #[serde(rename = "eventSource", default)]
    pub event_source: String,
    #[serde(rename = "eventName", default)]
    pub event_name: String,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub object: S3ObjectInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3ObjectInfo {
    pub key: String,
}

/// Outcome of processing one message. Immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub message_id: String,
    pub customer_code: String,
    pub success: bool,
    pub emails_sent: u32,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Reduction over a slice of processing results
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingStats {
    pub total_messages: u32,
    pub successful_messages: u32,
    pub failed_messages: u32,
    pub total_emails_sent: u32,
    /// Percentage with two decimals; 0 for empty input
    pub success_rate: f64,
}
