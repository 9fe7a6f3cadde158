//! Rate Limiter
//!
//! Token-bucket gate shared by bulk SES / Identity Store operations so that
//! per-account API quotas hold regardless of worker-pool concurrency. The
//! bucket holds `requests_per_second` tokens and a background ticker refills
//! one token per `1/requests_per_second` interval, dropping the token when the
//! bucket is already full.

use std::time::Duration;

use async_channel::{bounded, Receiver, TrySendError};
use tokio::task::AbortHandle;
use tracing::debug;

/// Token-bucket rate limiter with a background refill task
#[derive(Debug)]
pub struct RateLimiter {
    tokens: Receiver<()>,
    refill: AbortHandle,
    requests_per_second: u32,
}

impl RateLimiter {
    /// Create a limiter admitting `requests_per_second` operations (minimum 1)
    pub fn new(requests_per_second: u32) -> Self {
        let capacity = requests_per_second.max(1);
        let (tx, rx) = bounded(capacity as usize);

        // Start with a full bucket so short bursts do not pay the ramp-up.
        for _ in 0..capacity {
            let _ = tx.try_send(());
        }

        let period = Duration::from_secs_f64(1.0 / capacity as f64);
        let refill = tokio::spawn(async move {
            // First refill lands one full period out; the pre-filled bucket
            // covers the interim.
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                match tx.try_send(()) {
                    Ok(()) => {}
                    // Bucket full: drop the token.
                    Err(TrySendError::Full(())) => {}
                    Err(TrySendError::Closed(())) => break,
                }
            }
        })
        .abort_handle();

        debug!(requests_per_second = capacity, "Rate limiter started");

        Self {
            tokens: rx,
            refill,
            requests_per_second: capacity,
        }
    }

    pub fn requests_per_second(&self) -> u32 {
        self.requests_per_second
    }

    /// Block until a token is available.
    ///
    /// After `stop()` the refill task is gone; once the bucket drains this
    /// returns immediately rather than parking callers forever.
    pub async fn wait(&self) {
        let _ = self.tokens.recv().await;
    }

    /// Halt the background refill task
    pub fn stop(&self) {
        self.refill.abort();
        self.tokens.close();
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.refill.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_burst_up_to_capacity_then_throttled() {
        let limiter = RateLimiter::new(5);

        // The pre-filled bucket admits a full burst without waiting.
        let start = Instant::now();
        for _ in 0..5 {
            limiter.wait().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        // The next token only arrives from the refill ticker.
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(190));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_bucket_capacity() {
        let limiter = RateLimiter::new(2);

        // Leave the bucket untouched while many refill intervals elapse.
        tokio::time::sleep(Duration::from_secs(5)).await;

        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        // A third token was dropped, not queued.
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unblocks_waiters() {
        let limiter = RateLimiter::new(1);
        limiter.wait().await;

        limiter.stop();

        // Closed bucket: wait returns instead of hanging forever.
        limiter.wait().await;
        limiter.wait().await;
    }
}
