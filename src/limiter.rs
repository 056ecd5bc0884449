//! Admission control for outbound metadata API calls.
//!
//! The metadata API is rate limited, so at most N requests may be in flight
//! at once. Queued callers are released strictly in arrival order, one for
//! one as active slots free up; there is no queue timeout and a queued
//! caller cannot withdraw.
//!
//! Built on tokio's [`Semaphore`], whose fairness guarantee (permits handed
//! out in acquire order) provides the FIFO release property directly.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Bounds the number of concurrently executing futures.
#[derive(Clone)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
}

impl RateLimiter {
    /// Create a limiter admitting at most `max_concurrent` futures at once.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Run `fut` once a slot is available, holding the slot for the
    /// future's whole duration.
    pub async fn run<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("limiter semaphore is never closed");
        fut.await
    }
}
