//! Provider cache (spec §4.6, C6): lazy factory invocation under double-checked-locking-equivalent
//! semantics, in-flight ref-counting, and stale-entry cleanup.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use llm_core::{Error, Provider, Result};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One cached provider instance plus its bookkeeping.
///
/// Open Question 2's resolution (spec §9): the naive monotonically-incrementing `refCount` the
/// distilled spec describes is replaced with a proper in-flight counter, incremented on checkout
/// and decremented when the returned [`ProviderHandle`] drops, alongside a separate monotonic
/// `total_checkouts` counter kept purely for observability.
struct CachedProvider {
    provider: Arc<dyn Provider>,
    last_used_ms: AtomicU64,
    in_flight: AtomicU32,
    total_checkouts: AtomicU64,
}

impl CachedProvider {
    fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            last_used_ms: AtomicU64::new(now_ms()),
            in_flight: AtomicU32::new(0),
            total_checkouts: AtomicU64::new(0),
        }
    }

    fn is_idle(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) == 0
    }

    fn idle_for(&self) -> Duration {
        let elapsed_ms = now_ms().saturating_sub(self.last_used_ms.load(Ordering::Acquire));
        Duration::from_millis(elapsed_ms)
    }
}

/// A checked-out provider. Dereferences to the underlying [`Provider`]; dropping it releases the
/// in-flight count the cache uses to decide eviction eligibility.
pub struct ProviderHandle {
    provider: Arc<dyn Provider>,
    entry: Arc<CachedProvider>,
}

impl std::ops::Deref for ProviderHandle {
    type Target = dyn Provider;

    fn deref(&self) -> &Self::Target {
        &*self.provider
    }
}

impl ProviderHandle {
    /// A cheap `Arc` clone of the underlying provider, for callers (e.g. middleware closures)
    /// that need a `'static` owned reference independent of this handle's checkout lifecycle.
    #[must_use]
    pub fn provider_arc(&self) -> Arc<dyn Provider> {
        Arc::clone(&self.provider)
    }
}

impl Drop for ProviderHandle {
    fn drop(&mut self) {
        self.entry.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cache of live provider instances keyed by registration name.
#[derive(Default)]
pub struct ProviderCache {
    entries: DashMap<String, Arc<CachedProvider>>,
}

impl ProviderCache {
    /// Build an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check out the provider registered under `name`, invoking `build` at most once per cache
    /// miss (spec §4.6). `build` must be fast and non-blocking — it runs while holding the
    /// cache's per-shard lock for `name`.
    ///
    /// # Errors
    /// Propagates any error `build` returns on a cache miss.
    pub fn get_or_build<F>(&self, name: &str, build: F) -> Result<ProviderHandle>
    where
        F: FnOnce() -> Result<Arc<dyn Provider>>,
    {
        if let Some(entry) = self.entries.get(name) {
            return Ok(self.checkout(Arc::clone(entry.value())));
        }

        let entry = match self.entries.entry(name.to_string()) {
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                let provider = build()?;
                let cached = Arc::new(CachedProvider::new(provider));
                vacant.insert(Arc::clone(&cached));
                cached
            }
        };
        Ok(self.checkout(entry))
    }

    fn checkout(&self, entry: Arc<CachedProvider>) -> ProviderHandle {
        entry.last_used_ms.store(now_ms(), Ordering::Release);
        entry.in_flight.fetch_add(1, Ordering::AcqRel);
        entry.total_checkouts.fetch_add(1, Ordering::Relaxed);
        let provider = Arc::clone(&entry.provider);
        ProviderHandle { provider, entry }
    }

    /// Total checkouts ever served for `name`, for observability. `None` if never cached.
    #[must_use]
    pub fn total_checkouts(&self, name: &str) -> Option<u64> {
        self.entries.get(name).map(|e| e.total_checkouts.load(Ordering::Relaxed))
    }

    /// Number of providers currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no providers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict idle entries older than `max_age`, then (if still above `max_count`) evict the
    /// oldest idle entries until the cache fits, calling `close()` on each evicted provider.
    /// Close errors are logged, not returned (spec §4.6).
    pub async fn cleanup_stale(&self, max_age: Duration, max_count: usize) {
        let mut to_close: Vec<(String, Arc<dyn Provider>)> = Vec::new();

        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_idle() && e.value().idle_for() > max_age)
            .map(|e| e.key().clone())
            .collect();
        for name in stale {
            if let Some((_, cached)) = self.entries.remove(&name) {
                to_close.push((name, Arc::clone(&cached.provider)));
            }
        }

        if self.entries.len() > max_count {
            let mut idle: Vec<(String, u64)> = self
                .entries
                .iter()
                .filter(|e| e.value().is_idle())
                .map(|e| (e.key().clone(), e.value().last_used_ms.load(Ordering::Acquire)))
                .collect();
            idle.sort_by_key(|(_, last_used)| *last_used);
            let overflow = self.entries.len() - max_count;
            for (name, _) in idle.into_iter().take(overflow) {
                if let Some((_, cached)) = self.entries.remove(&name) {
                    to_close.push((name, Arc::clone(&cached.provider)));
                }
            }
        }

        for (name, provider) in to_close {
            debug!(provider = %name, "evicting stale provider from cache");
            if let Err(e) = provider.close().await {
                warn!(provider = %name, error = %e, "error closing evicted provider");
            }
        }
    }

    /// Close and remove every cached provider, for client shutdown. Errors are logged, not
    /// returned, matching [`Self::cleanup_stale`]'s policy.
    pub async fn close_all(&self) {
        let names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, cached)) = self.entries.remove(&name) {
                if let Err(e) = cached.provider.close().await {
                    warn!(provider = %name, error = %e, "error closing provider during shutdown");
                }
            }
        }
    }
}

/// Construct an [`llm_core::Error::ProviderNotFound`] or `ProviderNotConfigured` naming the
/// requested provider and the sorted list of configured names. Shared by [`crate::client::Client`]
/// so both error kinds stay consistent about which names they report.
pub(crate) fn not_found(requested: &str, configured: Vec<String>) -> Error {
    Error::provider_not_found(requested, configured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_core::provider::ProviderCapabilities;
    use llm_core::request::{AudioRequest, EmbeddingsRequest, ImageRequest, StructuredRequest, TextRequest};
    use llm_core::response::{AudioResponse, EmbeddingsResponse, ImageResponse, StructuredResponse, TextResponse};
    use llm_core::streaming::TextChunkStream;
    use std::sync::atomic::AtomicUsize;

    struct CountingProvider {
        name: String,
        caps: ProviderCapabilities,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Provider for CountingProvider {
        async fn text(&self, _req: &TextRequest) -> Result<TextResponse> {
            unimplemented!()
        }
        async fn stream(&self, _req: &TextRequest) -> Result<TextChunkStream> {
            unimplemented!()
        }
        async fn structured(&self, _req: &StructuredRequest) -> Result<StructuredResponse> {
            unimplemented!()
        }
        async fn embeddings(&self, _req: &EmbeddingsRequest) -> Result<EmbeddingsResponse> {
            unimplemented!()
        }
        async fn generate_image(&self, _req: &ImageRequest) -> Result<ImageResponse> {
            unimplemented!()
        }
        async fn audio(&self, _req: &AudioRequest) -> Result<AudioResponse> {
            unimplemented!()
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn capabilities(&self) -> &ProviderCapabilities {
            &self.caps
        }
        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting(name: &str, closes: Arc<AtomicUsize>) -> Arc<dyn Provider> {
        Arc::new(CountingProvider {
            name: name.to_string(),
            caps: ProviderCapabilities::new(name, []),
            closes,
        })
    }

    #[test]
    fn factory_invoked_once_per_cache_miss() {
        let cache = ProviderCache::new();
        let closes = Arc::new(AtomicUsize::new(0));
        let build_calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let build_calls = Arc::clone(&build_calls);
            let closes = Arc::clone(&closes);
            let _handle = cache
                .get_or_build("openai", move || {
                    build_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(counting("openai", closes))
                })
                .unwrap();
        }

        assert_eq!(build_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.total_checkouts("openai"), Some(3));
    }

    #[test]
    fn handle_drop_releases_in_flight_count() {
        let cache = ProviderCache::new();
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let handle = cache.get_or_build("openai", || Ok(counting("openai", Arc::clone(&closes)))).unwrap();
            assert_eq!(handle.name(), "openai");
        }
        // After the handle drops the entry must be idle; cleanup below should not skip it.
        let entry = cache.entries.get("openai").unwrap();
        assert!(entry.value().is_idle());
    }

    #[tokio::test]
    async fn cleanup_stale_evicts_idle_entries_past_max_age() {
        let cache = ProviderCache::new();
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let _handle = cache.get_or_build("openai", || Ok(counting("openai", Arc::clone(&closes)))).unwrap();
        }
        cache.cleanup_stale(Duration::ZERO, 100).await;
        assert_eq!(cache.len(), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cleanup_stale_skips_in_flight_entries() {
        let cache = ProviderCache::new();
        let closes = Arc::new(AtomicUsize::new(0));
        let handle = cache.get_or_build("openai", || Ok(counting("openai", Arc::clone(&closes)))).unwrap();
        cache.cleanup_stale(Duration::ZERO, 100).await;
        assert_eq!(cache.len(), 1, "in-flight handle must keep the entry alive");
        drop(handle);
    }

    #[tokio::test]
    async fn close_all_closes_every_cached_provider() {
        let cache = ProviderCache::new();
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let _a = cache.get_or_build("openai", || Ok(counting("openai", Arc::clone(&closes)))).unwrap();
            let _b = cache.get_or_build("anthropic", || Ok(counting("anthropic", Arc::clone(&closes)))).unwrap();
        }
        cache.close_all().await;
        assert_eq!(closes.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }
}
