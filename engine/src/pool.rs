//! Bulkhead Worker Pool
//!
//! Bounded fan-out primitive shared by the multi-customer executor and the
//! validation sweeps: each item runs as its own task, but at most `limit`
//! are in flight at once. One item's failure or slowness never cancels the
//! others; the caller gets every finished result back.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

/// Bounded-parallelism task group
#[derive(Debug, Clone)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
}

impl Bulkhead {
    /// Create a pool admitting at most `limit` concurrent tasks (minimum 1)
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Run `op` over every item, returning results in completion order.
    ///
    /// Every item is attempted; a panicking task is logged and dropped from
    /// the result set rather than poisoning its siblings.
    pub async fn run_all<I, T, F, Fut>(&self, items: Vec<I>, op: F) -> Vec<T>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut tasks = JoinSet::new();

        for item in items {
            let semaphore = Arc::clone(&self.semaphore);
            let op = op.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("bulkhead semaphore never closes");
                op(item).await
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "Bulkhead task panicked"),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_items_complete() {
        let pool = Bulkhead::new(3);
        let results = pool
            .run_all((0..10).collect(), |i: i32| async move { i * 2 })
            .await;

        let mut results = results;
        results.sort();
        assert_eq!(results, (0..10).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let pool = Bulkhead::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = pool
            .run_all((0..8).collect::<Vec<i32>>(), {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                move |_| {
                    let in_flight = Arc::clone(&in_flight);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    }
                }
            })
            .await;

        assert_eq!(results.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_one_panic_does_not_lose_siblings() {
        let pool = Bulkhead::new(4);
        let results = pool
            .run_all(vec![1, 2, 3, 4], |i: i32| async move {
                if i == 3 {
                    panic!("boom");
                }
                i
            })
            .await;

        let mut results = results;
        results.sort();
        assert_eq!(results, vec![1, 2, 4]);
    }
}
