//! Per-key adaptive state: latency/error tracking, percentile readout, capacity adjustment.

use llm_resilience::{BoundedSemaphore, PidConfig, PidController};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

const ERROR_RATE_THRESHOLD: f64 = 0.10;
const ERROR_RATE_PENALTY: f64 = 2.0;
const RESET_FRACTION: f64 = 0.20;
const DEFAULT_PERCENTILE_WINDOW: usize = 512;

/// Configuration for a single [`AdaptiveState`].
#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    /// Target average latency the PID controller steers toward.
    pub target_latency: Duration,
    /// Minimum allowed capacity.
    pub min_capacity: u32,
    /// Maximum allowed capacity.
    pub max_capacity: u32,
    /// Starting capacity.
    pub initial_capacity: u32,
    /// Bounded percentile-sample window size.
    pub window: usize,
    /// PID gains and clamps.
    pub pid: PidConfig,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            target_latency: Duration::from_millis(500),
            min_capacity: 1,
            max_capacity: 256,
            initial_capacity: 16,
            window: DEFAULT_PERCENTILE_WINDOW,
            pid: PidConfig::default(),
        }
    }
}

/// Latency/error accumulator plus the semaphore it governs, for one provider, model, or the
/// global fallback key.
pub struct AdaptiveState {
    key: String,
    config: AdaptiveConfig,
    semaphore: Mutex<Arc<BoundedSemaphore>>,
    pid: Mutex<PidController>,
    samples: Mutex<VecDeque<Duration>>,
    sample_count: AtomicU64,
    latency_sum_micros: AtomicU64,
    error_count: AtomicU64,
    last_adjustment: Mutex<Instant>,
    samples_since_adjustment: AtomicU32,
}

impl AdaptiveState {
    /// Build fresh state for `key` with `config`.
    #[must_use]
    pub fn new(key: impl Into<String>, config: AdaptiveConfig) -> Self {
        let key = key.into();
        let semaphore = BoundedSemaphore::new(key.clone(), config.initial_capacity);
        Self {
            key,
            pid: Mutex::new(PidController::new(config.pid)),
            semaphore: Mutex::new(Arc::new(semaphore)),
            samples: Mutex::new(VecDeque::with_capacity(config.window)),
            sample_count: AtomicU64::new(0),
            latency_sum_micros: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            last_adjustment: Mutex::new(Instant::now()),
            samples_since_adjustment: AtomicU32::new(0),
            config,
        }
    }

    /// The key this state tracks (a provider name, `"provider:model"`, or `"global"`).
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The semaphore currently governing this key's concurrency. Cloning the returned `Arc`
    /// is safe across an in-flight capacity swap: old holders keep their reference to the old
    /// semaphore until they release, at which point it is dropped.
    #[must_use]
    pub fn semaphore(&self) -> Arc<BoundedSemaphore> {
        Arc::clone(&self.semaphore.lock())
    }

    /// Current capacity of the governed semaphore.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.semaphore.lock().capacity()
    }

    /// Record one completed call's latency and outcome.
    pub fn record(&self, latency: Duration, is_error: bool) {
        self.sample_count.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        if is_error {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        self.samples_since_adjustment.fetch_add(1, Ordering::Relaxed);

        let mut samples = self.samples.lock();
        if samples.len() >= self.config.window {
            samples.pop_front();
        }
        samples.push_back(latency);
    }

    /// Mean latency across all recorded samples, `0` when empty.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        let count = self.sample_count.load(Ordering::Relaxed);
        if count == 0 {
            return Duration::ZERO;
        }
        let sum = self.latency_sum_micros.load(Ordering::Relaxed);
        Duration::from_micros(sum / count)
    }

    /// Fraction of recorded calls that errored, `0.0` when empty.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        let count = self.sample_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.error_count.load(Ordering::Relaxed) as f64 / count as f64
    }

    /// Nearest-rank percentile (`q` in `[0.0, 1.0]`) over the bounded sample window.
    #[must_use]
    pub fn percentile(&self, q: f64) -> Duration {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<Duration> = samples.iter().copied().collect();
        sorted.sort();
        let idx = ((sorted.len() as f64) * q).floor() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    /// p50/p90/p99 in one pass over a sorted copy of the window.
    #[must_use]
    pub fn percentiles(&self) -> (Duration, Duration, Duration) {
        (self.percentile(0.50), self.percentile(0.90), self.percentile(0.99))
    }

    /// Run one capacity-adjustment step. Returns the new capacity.
    pub fn adjust(&self) -> u32 {
        let since_last = self.samples_since_adjustment.swap(0, Ordering::AcqRel);
        let current = self.capacity();
        if since_last == 0 {
            return current;
        }

        let dt = {
            let mut last = self.last_adjustment.lock();
            let dt = last.elapsed();
            *last = Instant::now();
            dt
        };

        let target_secs = self.config.target_latency.as_secs_f64();
        let average_secs = self.average_latency().as_secs_f64();
        let mut signal = self.pid.lock().update(target_secs, average_secs, dt);

        let error_rate = self.error_rate();
        if error_rate > ERROR_RATE_THRESHOLD {
            signal *= 1.0 + ERROR_RATE_PENALTY * (error_rate - ERROR_RATE_THRESHOLD);
        }

        let proposed = (current as f64 * (1.0 - signal)).round() as i64;
        let clamped = proposed
            .clamp(self.config.min_capacity as i64, self.config.max_capacity as i64) as u32;

        if clamped != current {
            let mut sem = self.semaphore.lock();
            *sem = Arc::new(BoundedSemaphore::new(self.key.clone(), clamped));
            info!(key = %self.key, from = current, to = clamped, signal, "capacity adjusted");

            let delta_fraction = (clamped as f64 - current as f64).abs() / current.max(1) as f64;
            if delta_fraction > RESET_FRACTION {
                self.pid.lock().reset();
                self.sample_count.store(0, Ordering::Relaxed);
                self.latency_sum_micros.store(0, Ordering::Relaxed);
                self.error_count.store(0, Ordering::Relaxed);
                self.samples.lock().clear();
            }
        }

        clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_capacity_when_no_samples() {
        let state = AdaptiveState::new("p", AdaptiveConfig::default());
        assert_eq!(state.adjust(), state.config.initial_capacity);
    }

    #[test]
    fn average_and_error_rate_are_zero_when_empty() {
        let state = AdaptiveState::new("p", AdaptiveConfig::default());
        assert_eq!(state.average_latency(), Duration::ZERO);
        assert_eq!(state.error_rate(), 0.0);
    }

    #[test]
    fn error_rate_tracks_recorded_outcomes() {
        let state = AdaptiveState::new("p", AdaptiveConfig::default());
        state.record(Duration::from_millis(10), false);
        state.record(Duration::from_millis(10), true);
        assert_eq!(state.error_rate(), 0.5);
    }

    #[test]
    fn high_latency_shrinks_capacity_over_repeated_adjustment() {
        let state = AdaptiveState::new(
            "p",
            AdaptiveConfig {
                target_latency: Duration::from_millis(100),
                initial_capacity: 100,
                min_capacity: 1,
                max_capacity: 200,
                ..Default::default()
            },
        );
        for _ in 0..20 {
            state.record(Duration::from_millis(900), false);
        }
        let first = state.adjust();
        for _ in 0..20 {
            state.record(Duration::from_millis(900), false);
        }
        let second = state.adjust();
        assert!(second <= first);
    }

    #[test]
    fn percentile_nearest_rank_on_sorted_window() {
        let state = AdaptiveState::new("p", AdaptiveConfig::default());
        for ms in [10, 20, 30, 40, 50] {
            state.record(Duration::from_millis(ms), false);
        }
        let p50 = state.percentile(0.5);
        assert_eq!(p50, Duration::from_millis(30));
    }

    #[test]
    fn capacity_stays_within_bounds() {
        let state = AdaptiveState::new(
            "p",
            AdaptiveConfig {
                target_latency: Duration::from_millis(10),
                initial_capacity: 5,
                min_capacity: 2,
                max_capacity: 8,
                ..Default::default()
            },
        );
        for _ in 0..50 {
            state.record(Duration::from_millis(1), false);
            let cap = state.adjust();
            assert!(cap >= 2 && cap <= 8);
        }
    }
}
