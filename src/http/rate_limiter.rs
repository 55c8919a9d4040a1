use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::{sleep_until, Instant};

use crate::error::{AppError, Result};

/// A simple concurrency limiter to prevent flooding RPCs and the consumer host.
/// Waiters are admitted in FIFO order.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
}

impl RateLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.semaphore
            .acquire()
            .await
            .map_err(|_| AppError::Operation("rate limiter closed".into()))
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// FIFO job queue: at most `concurrency` jobs in flight and consecutive job
/// starts spaced by at least `min_interval`.
#[derive(Debug, Clone)]
pub struct Throttle {
    limiter: RateLimiter,
    next_start: Arc<Mutex<Instant>>,
    min_interval: Duration,
}

impl Throttle {
    pub fn new(concurrency: usize, min_interval: Duration) -> Self {
        Self {
            limiter: RateLimiter::new(concurrency),
            next_start: Arc::new(Mutex::new(Instant::now())),
            min_interval,
        }
    }

    pub async fn run<F, Fut, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _permit = self.limiter.acquire().await?;

        // The lock is held while sleeping so start slots are handed out in arrival order.
        {
            let mut next_start = self.next_start.lock().await;
            if *next_start > Instant::now() {
                sleep_until(*next_start).await;
            }
            *next_start = Instant::now() + self.min_interval;
        }

        job().await
    }
}
