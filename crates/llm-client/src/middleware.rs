//! Typed middleware pipeline (spec §4.7, C7).
//!
//! The pipeline is typed **per operation**: a [`MiddlewareChain<Req, Resp>`] wraps one request
//! family's terminal call. Composition folds right to left — the first middleware pushed runs
//! first on the request and last on the response, matching the teacher's own before/after-execute
//! chain in spirit, generalized here to a higher-order `next(req) -> Result<Resp>` instead of a
//! fixed before/after hook pair.

use async_trait::async_trait;
use dashmap::DashMap;
use llm_core::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The continuation a middleware calls to run the rest of the chain. Wrapped in `Arc` (not
/// `Box`) because retry middleware must be able to invoke it more than once.
pub type Next<Req, Resp> =
    Arc<dyn Fn(Req) -> Pin<Box<dyn Future<Output = Result<Resp>> + Send>> + Send + Sync>;

/// One link in a typed middleware chain.
#[async_trait]
pub trait Middleware<Req, Resp>: Send + Sync
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Handle `req`, calling `next` zero or more times to continue the chain.
    async fn handle(&self, req: Req, next: Next<Req, Resp>) -> Result<Resp>;
}

/// A typed, per-operation middleware chain (spec §4.7). One instance guards one request family
/// (text, stream, structured, embeddings, image, or audio); [`crate::client::Client`] holds up to
/// six of these.
pub struct MiddlewareChain<Req, Resp> {
    middlewares: Vec<Arc<dyn Middleware<Req, Resp>>>,
}

impl<Req, Resp> Default for MiddlewareChain<Req, Resp> {
    fn default() -> Self {
        Self { middlewares: Vec::new() }
    }
}

impl<Req, Resp> MiddlewareChain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Build an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware. The most recently pushed middleware runs innermost (closest to the
    /// terminal handler).
    pub fn push(&mut self, middleware: Arc<dyn Middleware<Req, Resp>>) {
        self.middlewares.push(middleware);
    }

    /// Whether any middleware has been installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run `req` through every installed middleware, outermost-first, terminating in `handler`.
    /// Guarantees at-most-once delivery to `handler` per chain pass unless a retry middleware
    /// re-invokes `next`.
    pub async fn run<H, Fut>(&self, req: Req, handler: H) -> Result<Resp>
    where
        H: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
    {
        let terminal: Next<Req, Resp> = Arc::new(move |r| Box::pin(handler(r)));
        let chain = self.middlewares.iter().rev().fold(terminal, |next, mw| {
            let mw = Arc::clone(mw);
            let next = Arc::clone(&next);
            let wrapped: Next<Req, Resp> = Arc::new(move |r: Req| {
                let mw = Arc::clone(&mw);
                let next = Arc::clone(&next);
                Box::pin(async move { mw.handle(r, next).await })
            });
            wrapped
        });
        chain(req).await
    }
}

/// Logs entry/exit of every call on the chain it guards. `verbose` additionally logs request
/// debug output (spec §6's `debugLogging`).
pub struct LoggingMiddleware {
    label: String,
    verbose: bool,
}

impl LoggingMiddleware {
    /// Build a logging middleware labelling its spans `label` (e.g. `"text"`, `"stream"`).
    #[must_use]
    pub fn new(label: impl Into<String>, verbose: bool) -> Self {
        Self { label: label.into(), verbose }
    }
}

#[async_trait]
impl<Req, Resp> Middleware<Req, Resp> for LoggingMiddleware
where
    Req: std::fmt::Debug + Send + 'static,
    Resp: Send + 'static,
{
    async fn handle(&self, req: Req, next: Next<Req, Resp>) -> Result<Resp> {
        if self.verbose {
            debug!(operation = %self.label, request = ?req, "dispatching");
        } else {
            debug!(operation = %self.label, "dispatching");
        }
        let result = next(req).await;
        match &result {
            Ok(_) => debug!(operation = %self.label, "completed"),
            Err(e) => warn!(operation = %self.label, error = %e, "failed"),
        }
        result
    }
}

/// Counters and cumulative latency for one operation family, exposed for an external collector
/// to scrape (spec §4.7's "metrics (counters/timers by label set)").
#[derive(Default)]
struct MetricsCounters {
    calls: AtomicU64,
    errors: AtomicU64,
    latency_micros_sum: AtomicU64,
}

/// Records call counts, error counts, and cumulative latency per operation label.
#[derive(Default)]
pub struct MetricsMiddleware {
    label: String,
    counters: Arc<MetricsCounters>,
}

impl MetricsMiddleware {
    /// Build a metrics middleware labelling its counters `label`.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            counters: Arc::new(MetricsCounters::default()),
        }
    }

    /// Total calls observed.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.counters.calls.load(Ordering::Relaxed)
    }

    /// Total errored calls observed.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.counters.errors.load(Ordering::Relaxed)
    }

    /// Average latency across every observed call, or `None` if none have completed.
    #[must_use]
    pub fn average_latency(&self) -> Option<Duration> {
        let calls = self.calls();
        if calls == 0 {
            return None;
        }
        let micros = self.counters.latency_micros_sum.load(Ordering::Relaxed) / calls;
        Some(Duration::from_micros(micros))
    }
}

#[async_trait]
impl<Req, Resp> Middleware<Req, Resp> for MetricsMiddleware
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn handle(&self, req: Req, next: Next<Req, Resp>) -> Result<Resp> {
        let started = Instant::now();
        let result = next(req).await;
        let elapsed = started.elapsed();
        self.counters.calls.fetch_add(1, Ordering::Relaxed);
        self.counters
            .latency_micros_sum
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        if result.is_err() {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }
        debug!(operation = %self.label, latency_us = elapsed.as_micros() as u64, "recorded");
        result
    }
}

/// Bounds the wall-clock time a call is allowed to take.
pub struct TimeoutMiddleware {
    timeout: Duration,
}

impl TimeoutMiddleware {
    /// Build a timeout middleware bounding each call to `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl<Req, Resp> Middleware<Req, Resp> for TimeoutMiddleware
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn handle(&self, req: Req, next: Next<Req, Resp>) -> Result<Resp> {
        if self.timeout.is_zero() {
            return next(req).await;
        }
        match tokio::time::timeout(self.timeout, next(req)).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(self.timeout.as_millis() as u64)),
        }
    }
}

/// Retries the remainder of the chain under [`llm_resilience::RetryConfig`], achieving
/// at-least-once delivery across retries while the chain itself stays at-most-once per attempt.
pub struct RetryMiddleware {
    config: llm_resilience::RetryConfig,
}

impl RetryMiddleware {
    /// Build a retry middleware under `config`.
    #[must_use]
    pub fn new(config: llm_resilience::RetryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl<Req, Resp> Middleware<Req, Resp> for RetryMiddleware
where
    Req: Clone + Send + 'static,
    Resp: Send + 'static,
{
    async fn handle(&self, req: Req, next: Next<Req, Resp>) -> Result<Resp> {
        llm_resilience::retry_with_backoff(self.config, || {
            let next = Arc::clone(&next);
            let req = req.clone();
            async move { next(req).await }
        })
        .await
    }
}

/// Rejects calls while the guarded circuit is open (spec §4.1/§4.7).
pub struct CircuitBreakerMiddleware {
    breaker: llm_resilience::CircuitBreaker,
}

impl CircuitBreakerMiddleware {
    /// Build a circuit breaker middleware guarding `id` under `config`.
    #[must_use]
    pub fn new(id: impl Into<String>, config: llm_resilience::CircuitBreakerConfig) -> Self {
        Self {
            breaker: llm_resilience::CircuitBreaker::new(id, config),
        }
    }
}

#[async_trait]
impl<Req, Resp> Middleware<Req, Resp> for CircuitBreakerMiddleware
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn handle(&self, req: Req, next: Next<Req, Resp>) -> Result<Resp> {
        self.breaker.try_acquire()?;
        let result = next(req).await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        result
    }
}

/// Bounds concurrent in-flight calls through the guarded chain segment.
pub struct RateLimitMiddleware {
    semaphore: llm_resilience::BoundedSemaphore,
}

impl RateLimitMiddleware {
    /// Build a rate-limit middleware admitting at most `capacity` concurrent calls.
    #[must_use]
    pub fn new(id: impl Into<String>, capacity: u32) -> Self {
        Self {
            semaphore: llm_resilience::BoundedSemaphore::new(id, capacity),
        }
    }
}

#[async_trait]
impl<Req, Resp> Middleware<Req, Resp> for RateLimitMiddleware
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn handle(&self, req: Req, next: Next<Req, Resp>) -> Result<Resp> {
        let _permit = self.semaphore.acquire().await?;
        next(req).await
    }
}

struct CacheEntry<Resp> {
    inserted_at: Instant,
    response: Resp,
}

/// Fingerprint-keyed response cache with a fixed TTL (spec §4.7's "caching"). `fingerprint` maps
/// a request to the key two equivalent requests share; callers typically hash a canonical
/// serialization and exclude volatile fields like the request ID.
pub struct CachingMiddleware<Req, Resp> {
    ttl: Duration,
    fingerprint: Arc<dyn Fn(&Req) -> u64 + Send + Sync>,
    entries: DashMap<u64, CacheEntry<Resp>>,
}

impl<Req, Resp> CachingMiddleware<Req, Resp>
where
    Resp: Clone,
{
    /// Build a caching middleware with the given TTL and fingerprint function.
    #[must_use]
    pub fn new(ttl: Duration, fingerprint: impl Fn(&Req) -> u64 + Send + Sync + 'static) -> Self {
        Self {
            ttl,
            fingerprint: Arc::new(fingerprint),
            entries: DashMap::new(),
        }
    }

    /// Number of live cache entries, including ones past their TTL but not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl<Req, Resp> Middleware<Req, Resp> for CachingMiddleware<Req, Resp>
where
    Req: Send + 'static,
    Resp: Clone + Send + 'static,
{
    async fn handle(&self, req: Req, next: Next<Req, Resp>) -> Result<Resp> {
        let key = (self.fingerprint)(&req);
        if let Some(entry) = self.entries.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Ok(entry.response.clone());
            }
        }
        let response = next(req).await?;
        self.entries.insert(
            key,
            CacheEntry {
                inserted_at: Instant::now(),
                response: response.clone(),
            },
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn chain_runs_outermost_first_on_request_and_last_on_response() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::<&'static str>::new()));

        struct Tagging {
            tag: &'static str,
            order: Arc<parking_lot::Mutex<Vec<&'static str>>>,
        }

        #[async_trait]
        impl Middleware<u32, u32> for Tagging {
            async fn handle(&self, req: u32, next: Next<u32, u32>) -> Result<u32> {
                self.order.lock().push(self.tag);
                let result = next(req).await;
                self.order.lock().push(self.tag);
                result
            }
        }

        let mut chain: MiddlewareChain<u32, u32> = MiddlewareChain::new();
        chain.push(Arc::new(Tagging { tag: "outer", order: Arc::clone(&order) }));
        chain.push(Arc::new(Tagging { tag: "inner", order: Arc::clone(&order) }));

        let result = chain.run(1, |n| async move { Ok(n + 1) }).await.unwrap();
        assert_eq!(result, 2);
        assert_eq!(*order.lock(), vec!["outer", "inner", "inner", "outer"]);
    }

    #[tokio::test]
    async fn retry_middleware_reinvokes_next_until_success() {
        let mut chain: MiddlewareChain<u32, u32> = MiddlewareChain::new();
        chain.push(Arc::new(RetryMiddleware::new(llm_resilience::RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        })));

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let result = chain
            .run(1u32, move |_req| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(Error::timeout(10))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn circuit_breaker_middleware_rejects_while_open() {
        let mut chain: MiddlewareChain<u32, u32> = MiddlewareChain::new();
        chain.push(Arc::new(CircuitBreakerMiddleware::new(
            "test",
            llm_resilience::CircuitBreakerConfig { threshold: 1, ..Default::default() },
        )));

        let first = chain.run(1u32, |_| async { Err(Error::timeout(5)) }).await;
        assert!(first.is_err());
        let second = chain.run(1u32, |_| async { Ok(1u32) }).await;
        assert!(matches!(second, Err(Error::CircuitOpen)));
    }

    #[tokio::test]
    async fn timeout_middleware_bounds_slow_calls() {
        let mut chain: MiddlewareChain<u32, u32> = MiddlewareChain::new();
        chain.push(Arc::new(TimeoutMiddleware::new(Duration::from_millis(5))));
        let result = chain
            .run(1u32, |_| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(1u32)
            })
            .await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn caching_middleware_returns_cached_response_within_ttl() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut chain: MiddlewareChain<u32, u32> = MiddlewareChain::new();
        chain.push(Arc::new(CachingMiddleware::new(Duration::from_secs(60), |req: &u32| *req as u64)));

        let calls_clone = Arc::clone(&calls);
        let result1 = chain
            .run(7u32, move |req| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(req * 2)
                }
            })
            .await
            .unwrap();

        let calls_clone = Arc::clone(&calls);
        let result2 = chain
            .run(7u32, move |req| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(req * 2)
                }
            })
            .await
            .unwrap();

        assert_eq!(result1, 14);
        assert_eq!(result2, 14);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second call must hit the cache");
    }

    #[tokio::test]
    async fn metrics_middleware_tracks_calls_and_errors() {
        let metrics = Arc::new(MetricsMiddleware::new("text"));
        let mut chain: MiddlewareChain<u32, u32> = MiddlewareChain::new();
        chain.push(Arc::clone(&metrics) as Arc<dyn Middleware<u32, u32>>);

        let _ = chain.run(1u32, |_| async { Ok(1u32) }).await;
        let _ = chain.run(1u32, |_| async { Err(Error::timeout(5)) }).await;

        assert_eq!(metrics.calls(), 2);
        assert_eq!(metrics.errors(), 1);
        assert!(metrics.average_latency().is_some());
    }
}
