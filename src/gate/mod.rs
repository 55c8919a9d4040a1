//! Request gate: bounded concurrency, keyed result caching with TTL,
//! de-duplication of in-flight requests, and fixed-delay retry.
//!
//! A [`RequestGate`] owns its cache and limiters, so independent gates never
//! share state. Clones of one gate do.

pub mod cache;
pub mod key;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::error::{AppError, Result};
use crate::http::rate_limiter::{RateLimiter, Throttle};
use crate::utils::time::{elapsed_ms, now_instant};
use cache::{Lookup, Outcome, ResponseCache, SharedValue};

pub use key::{make_cache_key, CacheKeyOptions};

#[derive(Debug, Clone)]
pub struct GateOptions {
    /// Slots of the shared limiter used by [`RequestGate::limit`].
    pub max_concurrent: usize,
    /// TTL applied when a caller passes a key but no TTL.
    pub default_ttl: Duration,
    /// How long a caller waits on another caller's in-flight computation.
    pub pending_wait_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Concurrency of the [`RequestGate::schedule`] queue.
    pub queue_concurrency: usize,
    /// Minimum spacing between job starts on the schedule queue.
    pub queue_min_interval: Duration,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            default_ttl: Duration::from_millis(3000),
            pending_wait_timeout: Duration::from_secs(50),
            max_attempts: 4,
            retry_delay: Duration::from_secs(10),
            queue_concurrency: 2,
            queue_min_interval: Duration::from_millis(1500),
        }
    }
}

#[derive(Clone)]
pub struct RequestGate {
    cache: ResponseCache,
    limiter: RateLimiter,
    queue: Throttle,
    options: Arc<GateOptions>,
}

impl RequestGate {
    pub fn new(options: GateOptions) -> Self {
        Self {
            cache: ResponseCache::new(),
            limiter: RateLimiter::new(options.max_concurrent),
            queue: Throttle::new(options.queue_concurrency, options.queue_min_interval),
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &GateOptions {
        &self.options
    }

    /// Run `operation` behind the shared limiter with retry. Errors that are
    /// not [retryable](AppError::is_retryable) are returned after one attempt.
    ///
    /// With a `cache_key`, a live cached value is returned without calling
    /// `operation`, and overlapping callers for the same key share a single
    /// computation. `ttl` defaults to [`GateOptions::default_ttl`]; a zero TTL
    /// keeps the value until the key is invalidated.
    pub async fn limit<T, E, F, Fut>(
        &self,
        operation: F,
        cache_key: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<AppError>,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let Some(key) = cache_key else {
            return self.run_with_retry(operation).await;
        };

        match self.cache.lookup_or_claim(key) {
            Lookup::Hit(value) => {
                debug!("Gate cache hit for {}", key);
                downcast(key, value)
            }
            Lookup::Wait(outcome) => self.wait_for_pending(key, outcome).await,
            Lookup::Claimed(claim) => match self.run_with_retry(operation).await {
                Ok(value) => {
                    let ttl = ttl.unwrap_or(self.options.default_ttl);
                    claim.resolve(Arc::new(value.clone()), ttl);
                    Ok(value)
                }
                Err(e) => {
                    claim.fail(e.to_string());
                    Err(e)
                }
            },
        }
    }

    /// Run `job` through the FIFO schedule queue. Independent of [`RequestGate::limit`].
    pub async fn schedule<T, F, Fut>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.queue.run(job).await
    }

    /// Live cached value for `key`, if any and of type `T`.
    pub fn cached<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        let value = self.cache.get(key)?;
        value.downcast_ref::<T>().cloned()
    }

    pub fn invalidate(&self, key: &str) {
        self.cache.remove(key);
    }

    pub fn purge_expired(&self) {
        self.cache.cleanup();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    async fn wait_for_pending<T>(
        &self,
        key: &str,
        mut outcome: watch::Receiver<Option<Outcome>>,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        debug!("Waiting on in-flight request for {}", key);
        let waited = tokio::time::timeout(self.options.pending_wait_timeout, async {
            outcome
                .wait_for(Option::is_some)
                .await
                .map(|published| (*published).clone())
        })
        .await;

        match waited {
            Err(_) => {
                warn!(
                    "Gave up waiting on {} after {:?}; the in-flight request keeps running",
                    key, self.options.pending_wait_timeout
                );
                Err(AppError::PendingTimeout { key: key.to_string() })
            }
            Ok(Err(_)) => Err(AppError::Operation(format!(
                "in-flight request for {} was abandoned",
                key
            ))),
            Ok(Ok(Some(Ok(value)))) => downcast(key, value),
            Ok(Ok(Some(Err(message)))) => Err(AppError::Operation(message)),
            Ok(Ok(None)) => Err(AppError::Operation(format!(
                "in-flight request for {} published nothing",
                key
            ))),
        }
    }

    async fn run_with_retry<T, E, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        E: Into<AppError>,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let _permit = self.limiter.acquire().await?;
        let max_attempts = self.options.max_attempts.max(1);
        let start = now_instant();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let e: AppError = e.into();
                    if !e.is_retryable() {
                        warn!("Request failed, not retrying: {}", e);
                        return Err(e);
                    }
                    if attempt >= max_attempts {
                        error!(
                            "Request failed after {} attempts in {}ms: {}",
                            attempt,
                            elapsed_ms(start),
                            e
                        );
                        return Err(AppError::RetriesExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    warn!("Request failed, retrying ({}/{}): {}", attempt, max_attempts, e);
                    tokio::time::sleep(self.options.retry_delay).await;
                }
            }
        }
    }
}

impl Default for RequestGate {
    fn default() -> Self {
        Self::new(GateOptions::default())
    }
}

fn downcast<T: Clone + 'static>(key: &str, value: SharedValue) -> Result<T> {
    value
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| AppError::CacheTypeMismatch { key: key.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{advance, Instant};

    fn counting_op(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnMut() -> std::future::Ready<std::result::Result<u32, AppError>> {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(value))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_call() {
        let gate = RequestGate::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let slow = |calls: Arc<AtomicUsize>| {
            move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, AppError>(42u32)
                }
            }
        };

        let (a, b) = tokio::join!(
            gate.limit(slow(calls.clone()), Some("k1"), Some(Duration::from_secs(5))),
            gate.limit(slow(calls.clone()), Some("k1"), Some(Duration::from_secs(5))),
        );

        assert_eq!(a.unwrap(), 42);
        assert_eq!(b.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_value_reused_within_ttl() {
        let gate = RequestGate::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Some(Duration::from_millis(5000));

        assert_eq!(gate.limit(counting_op(&calls, 42), Some("k1"), ttl).await.unwrap(), 42);
        advance(Duration::from_millis(4000)).await;
        assert_eq!(gate.limit(counting_op(&calls, 43), Some("k1"), ttl).await.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_unreachable_after_ttl() {
        let gate = RequestGate::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Some(Duration::from_millis(1000));

        gate.limit(counting_op(&calls, 1), Some("k"), ttl).await.unwrap();
        advance(Duration::from_millis(999)).await;
        assert_eq!(gate.cached::<u32>("k"), Some(1));

        advance(Duration::from_millis(1)).await;
        assert_eq!(gate.cached::<u32>("k"), None);
        assert_eq!(gate.limit(counting_op(&calls, 2), Some("k"), ttl).await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_never_evicts() {
        let gate = RequestGate::default();
        let calls = Arc::new(AtomicUsize::new(0));

        gate.limit(counting_op(&calls, 7), Some("k"), Some(Duration::ZERO)).await.unwrap();
        advance(Duration::from_secs(60 * 60 * 24)).await;
        gate.purge_expired();

        assert_eq!(gate.limit(counting_op(&calls, 8), Some("k"), None).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_applies_without_explicit_ttl() {
        let gate = RequestGate::default();
        let calls = Arc::new(AtomicUsize::new(0));

        gate.limit(counting_op(&calls, 1), Some("k"), None).await.unwrap();
        advance(Duration::from_millis(3000)).await;
        assert_eq!(gate.cached::<u32>("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_call_four_times_and_clear_key() {
        let gate = RequestGate::default();
        let attempts = Arc::new(std::sync::Mutex::new(Vec::new()));

        let op = {
            let attempts = attempts.clone();
            move || {
                attempts.lock().unwrap().push(Instant::now());
                std::future::ready(Err::<u32, _>(AppError::Operation("rpc unavailable".into())))
            }
        };

        let err = gate.limit(op, Some("failing"), None).await.unwrap_err();
        match err {
            AppError::RetriesExhausted { attempts, last_error } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_error, "Operation error: rpc unavailable");
            }
            other => panic!("unexpected error: {other}"),
        }

        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 4);
        for pair in attempts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(10));
        }
        assert!(gate.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_transient_failure() {
        let gate = RequestGate::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let op = {
            let calls = calls.clone();
            move || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                std::future::ready(if n < 2 {
                    Err(AppError::Operation("flaky".into()))
                } else {
                    Ok(n as u32)
                })
            }
        };

        assert_eq!(gate.limit(op, None, None).await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_times_out_but_owner_populates_cache() {
        let gate = RequestGate::new(GateOptions {
            pending_wait_timeout: Duration::from_secs(1),
            ..GateOptions::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));

        let owner = {
            let gate = gate.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                let op = move || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok::<_, AppError>(9u32)
                    }
                };
                gate.limit(op, Some("slow"), Some(Duration::ZERO)).await
            })
        };
        tokio::task::yield_now().await;

        let err = gate
            .limit(counting_op(&calls, 0), Some("slow"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PendingTimeout { .. }));

        assert_eq!(owner.await.unwrap().unwrap(), 9);
        assert_eq!(gate.limit(counting_op(&calls, 0), Some("slow"), None).await.unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_sees_owner_failure() {
        let gate = RequestGate::new(GateOptions {
            max_attempts: 1,
            ..GateOptions::default()
        });

        let failing = || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err::<u32, _>(AppError::Operation("boom".into()))
        };
        let (a, b) = tokio::join!(
            gate.limit(failing, Some("k"), None),
            gate.limit(failing, Some("k"), None),
        );

        let errors = [a.unwrap_err(), b.unwrap_err()];
        let owner_failed = errors
            .iter()
            .filter(|e| matches!(e, AppError::RetriesExhausted { .. }))
            .count();
        let waiter_failed = errors
            .iter()
            .filter(|e| matches!(e, AppError::Operation(_)))
            .count();
        assert_eq!((owner_failed, waiter_failed), (1, 1));
        assert!(gate.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncached_calls_respect_limiter() {
        let gate = RequestGate::default();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let op = move || {
                    let in_flight = in_flight.clone();
                    let peak = peak.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, AppError>(())
                    }
                };
                gate.limit(op, None, None).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_fails_fast() {
        let gate = RequestGate::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let op = {
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Err::<u32, _>(AppError::UserRejected))
            }
        };

        let err = gate.limit(op, Some("declined"), None).await.unwrap_err();
        assert!(matches!(err, AppError::UserRejected));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(gate.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_admits_callers_in_arrival_order() {
        let gate = RequestGate::new(GateOptions {
            max_concurrent: 1,
            ..GateOptions::default()
        });
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let gate = gate.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let op = move || {
                    let order = order.clone();
                    async move {
                        order.lock().unwrap().push(i);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, AppError>(())
                    }
                };
                gate.limit(op, None, None).await
            }));
            tokio::task::yield_now().await;
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_evicted_automatically() {
        let gate = RequestGate::default();
        let calls = Arc::new(AtomicUsize::new(0));

        for id in ["QmA", "QmB", "QmC"] {
            gate.limit(counting_op(&calls, 1), Some(id), Some(Duration::from_secs(1)))
                .await
                .unwrap();
        }
        gate.limit(counting_op(&calls, 2), Some("pinned"), Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(gate.len(), 4);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(gate.len(), 1);
        assert_eq!(gate.cached::<u32>("pinned"), Some(2));
    }

    #[tokio::test]
    async fn test_type_mismatch_on_shared_key() {
        let gate = RequestGate::default();
        gate.limit(|| async { Ok::<_, AppError>(1u32) }, Some("k"), Some(Duration::ZERO))
            .await
            .unwrap();

        let err = gate
            .limit(|| async { Ok::<_, AppError>("text".to_string()) }, Some("k"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CacheTypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let gate = RequestGate::default();
        let calls = Arc::new(AtomicUsize::new(0));

        gate.limit(counting_op(&calls, 1), Some("k"), Some(Duration::ZERO)).await.unwrap();
        gate.invalidate("k");
        assert_eq!(gate.limit(counting_op(&calls, 2), Some("k"), None).await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_runs_jobs_in_order() {
        let gate = RequestGate::default();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3 {
            let gate = gate.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                gate.schedule(|| async move {
                    order.lock().unwrap().push(i);
                    Ok(())
                })
                .await
            }));
            tokio::task::yield_now().await;
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
