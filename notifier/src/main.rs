//! Crossacct Notifier
//!
//! Long-running processor bound to one (customer, queue) pair: polls the
//! customer's S3 event-notification queue, validates ownership of every
//! message, and triggers downstream notifications. Messages are deleted only
//! after successful processing; refused messages stay on the queue for the
//! DLQ policy to collect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use clap::Parser;
use tokio::sync::RwLock;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crossacct_engine::sqs::{
    processing_stats, LoggingNotifier, ProcessingResult, SqsMessage, SqsMessageProcessor,
};

/// Cap on retained per-message results backing /stats
const RESULT_RETENTION: usize = 1000;

/// Crossacct Notifier - processes one customer's S3 event notifications
#[derive(Parser, Debug)]
#[command(name = "notifier", version, about)]
struct Args {
    /// Customer this processor is bound to
    #[arg(long, env = "CROSSACCT_CUSTOMER_CODE")]
    customer_code: String,

    /// Queue URL this processor is bound to
    #[arg(long, env = "CROSSACCT_QUEUE_URL")]
    queue_url: String,

    /// Long-poll wait time in seconds
    #[arg(long, default_value = "20")]
    wait_time: i32,

    /// Messages fetched per poll
    #[arg(long, default_value = "10")]
    max_messages: i32,

    /// Port for the health/stats endpoints
    #[arg(long, default_value = "8081", env = "NOTIFIER_PORT")]
    port: u16,
}

#[derive(Clone)]
struct AppState {
    customer_code: String,
    results: Arc<RwLock<Vec<ProcessingResult>>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .json()
        .init();

    let args = Args::parse();

    info!(
        customer = %args.customer_code,
        queue = %args.queue_url,
        "Starting Crossacct Notifier"
    );

    let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .load()
        .await;
    let sqs = aws_sdk_sqs::Client::new(&config);

    let processor = Arc::new(SqsMessageProcessor::new(
        &args.customer_code,
        &args.queue_url,
        Arc::new(LoggingNotifier),
    ));

    let state = AppState {
        customer_code: args.customer_code.clone(),
        results: Arc::new(RwLock::new(Vec::new())),
    };

    let port = args.port;

    // Background poll loop
    let poll_state = state.clone();
    let poll_processor = Arc::clone(&processor);
    tokio::spawn(async move {
        loop {
            if let Err(e) = poll_once(&sqs, &poll_processor, &poll_state, &args).await {
                error!(error = %e, "Poll cycle failed");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .with_state(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Notifier listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Final stats line on the way out.
    let results = state.results.read().await;
    let final_stats = processing_stats(&results);
    info!(
        total = final_stats.total_messages,
        successful = final_stats.successful_messages,
        failed = final_stats.failed_messages,
        emails = final_stats.total_emails_sent,
        success_rate = final_stats.success_rate,
        "Notifier shutting down"
    );

    Ok(())
}

/// Receive one batch, process it, and delete the successes
async fn poll_once(
    sqs: &aws_sdk_sqs::Client,
    processor: &SqsMessageProcessor,
    state: &AppState,
    args: &Args,
) -> Result<()> {
    let response = sqs
        .receive_message()
        .queue_url(&args.queue_url)
        .wait_time_seconds(args.wait_time)
        .max_number_of_messages(args.max_messages)
        .send()
        .await
        .context("sqs:ReceiveMessage failed")?;

    let batch: Vec<SqsMessage> = response
        .messages()
        .iter()
        .map(|m| SqsMessage {
            message_id: m.message_id().unwrap_or_default().to_string(),
            body: m.body().unwrap_or_default().to_string(),
            receipt_handle: m.receipt_handle().map(|h| h.to_string()),
        })
        .collect();

    if batch.is_empty() {
        return Ok(());
    }

    let results = processor.process_message_batch(&batch).await?;

    for (message, result) in batch.iter().zip(&results) {
        if !result.success {
            warn!(
                message_id = %result.message_id,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Message left on queue"
            );
            continue;
        }
        let Some(receipt_handle) = &message.receipt_handle else {
            continue;
        };
        sqs.delete_message()
            .queue_url(&args.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .context("sqs:DeleteMessage failed")?;
    }

    let mut retained = state.results.write().await;
    retained.extend(results);
    let overflow = retained.len().saturating_sub(RESULT_RETENTION);
    if overflow > 0 {
        retained.drain(..overflow);
    }

    Ok(())
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "crossacct-notifier",
        "customer": state.customer_code,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let results = state.results.read().await;
    let stats = processing_stats(&results);
    Json(serde_json::json!({
        "customer": state.customer_code,
        "stats": stats
    }))
}
