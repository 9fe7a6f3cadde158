//! Crossacct Engine Library
//!
//! Cross-account customer operations: per-customer role assumption with a
//! verified credential cache, an isolation rule engine, and the rate-limited
//! multi-customer import pipeline.

pub mod cache;
pub mod contacts;
pub mod credentials;
pub mod customers;
pub mod directory;
pub mod history;
pub mod import;
pub mod isolation;
pub mod pool;
pub mod ratelimit;
pub mod sqs;

pub use credentials::{CredentialError, CredentialManager, CustomerSession};
pub use customers::{CustomerAccountInfo, CustomerRegistry, ServiceType};
pub use import::{ImportConfig, ImportExecutor, ImportSummary};
pub use isolation::IsolationValidator;
pub use pool::Bulkhead;
pub use ratelimit::RateLimiter;
pub use sqs::SqsMessageProcessor;
