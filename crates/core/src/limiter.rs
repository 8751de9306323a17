// crates/core/src/limiter.rs
//! Bounded concurrency for bulk work.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Semaphore;

/// At most `limit` tasks run at once across all callers. Waiters are served
/// in arrival order (tokio's semaphore is fair).
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a slot, then run `task`.
    pub async fn run<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                // Only possible if the semaphore is closed, which never happens.
                tracing::warn!("Concurrency limiter closed, running unbounded");
                None
            }
        };
        task.await
    }

    /// Run `f` over every item through the limiter. Results keep input order;
    /// one task failing has no effect on the others.
    pub async fn run_all<I, F, Fut, T>(&self, items: I, f: F) -> Vec<T>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = T>,
    {
        join_all(items.into_iter().map(|item| self.run(f(item)))).await
    }
}
