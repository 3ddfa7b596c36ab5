//! Fleet-wide adaptive concurrency governor: owns per-key [`AdaptiveState`] and the background
//! loops that periodically re-tune capacity.

use crate::metrics::MetricsCollector;
use crate::state::{AdaptiveConfig, AdaptiveState};
use dashmap::DashMap;
use llm_core::Error;
use llm_resilience::SemaphorePermit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_ADJUSTMENT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_METRICS_ERROR_RATE_THRESHOLD: f64 = 0.10;
const GLOBAL_KEY: &str = "global";

/// Whether per-key state is tracked per model or collapsed to the provider level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGranularity {
    /// One state per provider, regardless of model.
    Provider,
    /// One state per `provider:model` pair.
    Model,
}

/// Governor-wide configuration.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Whether state is tracked per-model or per-provider.
    pub granularity: KeyGranularity,
    /// How often the adjustment loop re-tunes every known state.
    pub adjustment_interval: Duration,
    /// How often the metrics-query loop polls an injected collector, when present.
    pub query_interval: Duration,
    /// Error-rate threshold (`[0, 1]`) above which a label resolved from the injected
    /// collector's stats raises a logged advisory (spec §4.3's "Metrics query" loop).
    pub metrics_error_rate_threshold: f64,
    /// Default adaptive config applied to keys with no per-provider override.
    pub default_state_config: AdaptiveConfig,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            granularity: KeyGranularity::Provider,
            adjustment_interval: DEFAULT_ADJUSTMENT_INTERVAL,
            query_interval: DEFAULT_QUERY_INTERVAL,
            metrics_error_rate_threshold: DEFAULT_METRICS_ERROR_RATE_THRESHOLD,
            default_state_config: AdaptiveConfig::default(),
        }
    }
}

fn resolve_key(granularity: KeyGranularity, provider: &str, model: &str) -> String {
    match granularity {
        KeyGranularity::Provider => provider.to_string(),
        KeyGranularity::Model if model.is_empty() => provider.to_string(),
        KeyGranularity::Model => format!("{provider}:{model}"),
    }
}

/// Fleet-wide governor: resolves `(provider, model)` to an [`AdaptiveState`], lazily
/// constructing it from a per-provider override or the governor's default config.
pub struct Governor {
    config: GovernorConfig,
    states: DashMap<String, Arc<AdaptiveState>>,
    overrides: DashMap<String, AdaptiveConfig>,
    global: Arc<AdaptiveState>,
    adjustments: AtomicU64,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    loops: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    metrics_collector: parking_lot::RwLock<Option<Arc<dyn MetricsCollector>>>,
}

impl Governor {
    /// Build a governor with `config`.
    #[must_use]
    pub fn new(config: GovernorConfig) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let global = Arc::new(AdaptiveState::new(GLOBAL_KEY, config.default_state_config.clone()));
        Arc::new(Self {
            config,
            states: DashMap::new(),
            overrides: DashMap::new(),
            global,
            adjustments: AtomicU64::new(0),
            stop_tx,
            stop_rx,
            loops: parking_lot::Mutex::new(Vec::new()),
            metrics_collector: parking_lot::RwLock::new(None),
        })
    }

    /// Register a per-provider override so `resolve` lazily constructs matching keys with it
    /// instead of the governor's default config.
    pub fn set_provider_config(&self, provider: impl Into<String>, config: AdaptiveConfig) {
        self.overrides.insert(provider.into(), config);
    }

    /// Inject the metrics backend the background metrics-query loop polls (spec §1, §4.3). A
    /// governor with no collector injected runs the loop as a no-op tick.
    pub fn set_metrics_collector(&self, collector: Arc<dyn MetricsCollector>) {
        *self.metrics_collector.write() = Some(collector);
    }

    /// Poll the injected collector once, resolving each reported label to its adaptive state
    /// and returning the keys whose reported error rate exceeded
    /// [`GovernorConfig::metrics_error_rate_threshold`]. Returns an empty vector, without
    /// touching any state, when no collector has been injected.
    pub fn poll_metrics_advisories(&self) -> Vec<String> {
        let collector = self.metrics_collector.read().clone();
        let Some(collector) = collector else {
            return Vec::new();
        };

        let mut advisories = Vec::new();
        for stats in collector.query() {
            let state = self.resolve(&stats.provider, &stats.model);
            if stats.error_rate > self.config.metrics_error_rate_threshold {
                warn!(
                    key = state.key(),
                    error_rate = stats.error_rate,
                    threshold = self.config.metrics_error_rate_threshold,
                    "sustained error rate exceeds threshold"
                );
                advisories.push(state.key().to_string());
            }
        }
        advisories
    }

    /// Number of adjustment ticks the background loop has run.
    #[must_use]
    pub fn adjustments(&self) -> u64 {
        self.adjustments.load(Ordering::Relaxed)
    }

    fn resolve(&self, provider: &str, model: &str) -> Arc<AdaptiveState> {
        if provider.is_empty() {
            return Arc::clone(&self.global);
        }
        let key = resolve_key(self.config.granularity, provider, model);
        if let Some(state) = self.states.get(&key) {
            return Arc::clone(&state);
        }
        let config = self
            .overrides
            .get(provider)
            .map(|c| c.clone())
            .unwrap_or_else(|| self.config.default_state_config.clone());
        let state = Arc::new(AdaptiveState::new(key.clone(), config));
        self.states.entry(key).or_insert_with(|| Arc::clone(&state));
        state
    }

    /// Acquire a concurrency slot for `(provider, model)`, resolving or lazily constructing
    /// state per [`GovernorConfig::granularity`].
    ///
    /// # Errors
    /// Propagates [`llm_core::Error::Canceled`] if the resolved semaphore closed mid-acquire.
    pub async fn acquire(&self, provider: &str, model: &str) -> Result<GovernorPermit, Error> {
        let state = self.resolve(provider, model);
        let semaphore = state.semaphore();
        let permit = semaphore.acquire().await?;
        Ok(GovernorPermit {
            _permit: permit,
            acquired_at: std::time::Instant::now(),
            state,
        })
    }

    /// Record a completed call's outcome against the state the permit was acquired from. This
    /// happens automatically when [`GovernorPermit`] drops is not sufficient (latency and error
    /// must be known at call completion), so callers record explicitly before dropping the permit.
    pub fn record_outcome(&self, permit: &GovernorPermit, is_error: bool) {
        permit.state.record(permit.acquired_at.elapsed(), is_error);
    }

    /// Run one adjustment pass over every known state (provider/model states plus global).
    pub fn adjust_all(&self) {
        for entry in self.states.iter() {
            let new_capacity = entry.value().adjust();
            debug!(key = entry.key(), capacity = new_capacity, "adjusted");
        }
        self.global.adjust();
        self.adjustments.fetch_add(1, Ordering::Relaxed);
    }

    /// Spawn the adjustment-ticker and metrics-query background loops. Call [`Self::stop`] to
    /// join them.
    pub fn spawn_background_loops(self: &Arc<Self>) {
        let governor = Arc::clone(self);
        let mut stop_rx = self.stop_rx.clone();
        let adjustment_interval = self.config.adjustment_interval;
        let adjustment_loop = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(adjustment_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => governor.adjust_all(),
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("governor adjustment loop stopped");
        });

        let governor = Arc::clone(self);
        let mut stop_rx = self.stop_rx.clone();
        let query_interval = self.config.query_interval;
        let query_loop = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(query_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let advisories = governor.poll_metrics_advisories();
                        debug!(count = advisories.len(), "governor metrics-query tick");
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("governor metrics-query loop stopped");
        });

        self.loops.lock().extend([adjustment_loop, query_loop]);
    }

    /// Signal both background loops to stop and join them. Idempotent; subsequent calls are a
    /// no-op once the stop channel has already closed.
    pub async fn stop(&self) {
        if self.stop_tx.send(true).is_err() {
            warn!("governor stop channel already closed");
        }
        let handles: Vec<_> = self.loops.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// An acquired governor slot. Dropping it releases the underlying semaphore permit.
pub struct GovernorPermit {
    _permit: SemaphorePermit,
    acquired_at: std::time::Instant,
    state: Arc<AdaptiveState>,
}

impl GovernorPermit {
    /// The key (`provider`, `provider:model`, or `"global"`) this permit was acquired against.
    #[must_use]
    pub fn key(&self) -> &str {
        self.state.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_release_via_global_when_no_provider() {
        let governor = Governor::new(GovernorConfig::default());
        let permit = governor.acquire("", "").await.expect("acquire");
        assert_eq!(permit.key(), GLOBAL_KEY);
    }

    #[tokio::test]
    async fn distinct_providers_get_distinct_states() {
        let governor = Governor::new(GovernorConfig::default());
        let a = governor.acquire("openai", "").await.expect("acquire a");
        let b = governor.acquire("anthropic", "").await.expect("acquire b");
        assert_ne!(a.key(), b.key());
    }

    #[tokio::test]
    async fn model_granularity_splits_by_provider_and_model() {
        let mut config = GovernorConfig::default();
        config.granularity = KeyGranularity::Model;
        let governor = Governor::new(config);
        let a = governor.acquire("openai", "gpt-4o").await.expect("acquire a");
        let b = governor.acquire("openai", "gpt-4o-mini").await.expect("acquire b");
        assert_ne!(a.key(), b.key());
    }

    #[tokio::test]
    async fn record_outcome_feeds_state_latency() {
        let governor = Governor::new(GovernorConfig::default());
        let permit = governor.acquire("openai", "").await.expect("acquire");
        governor.record_outcome(&permit, false);
        drop(permit);
        governor.adjust_all();
        assert_eq!(governor.adjustments(), 1);
    }

    #[tokio::test]
    async fn metrics_query_is_a_no_op_without_an_injected_collector() {
        let governor = Governor::new(GovernorConfig::default());
        assert!(governor.poll_metrics_advisories().is_empty());
    }

    #[tokio::test]
    async fn metrics_query_resolves_labels_and_flags_sustained_error_rate() {
        use crate::metrics::{FixedCollector, LabeledStats};

        let governor = Governor::new(GovernorConfig::default());
        governor.set_metrics_collector(Arc::new(FixedCollector(vec![
            LabeledStats {
                provider: "openai".to_string(),
                model: String::new(),
                error_rate: 0.42,
            },
            LabeledStats {
                provider: "anthropic".to_string(),
                model: String::new(),
                error_rate: 0.01,
            },
        ])));

        let advisories = governor.poll_metrics_advisories();
        assert_eq!(advisories, vec!["openai".to_string()]);
    }

    #[tokio::test]
    async fn spawn_and_stop_background_loops() {
        let governor = Governor::new(GovernorConfig {
            adjustment_interval: Duration::from_millis(5),
            query_interval: Duration::from_millis(5),
            ..Default::default()
        });
        governor.spawn_background_loops();
        tokio::time::sleep(Duration::from_millis(30)).await;
        governor.stop().await;
        assert!(governor.adjustments() > 0);
    }
}
