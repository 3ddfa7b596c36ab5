//! Read-side interface to an external metrics backend, polled by the governor's metrics-query
//! background loop (spec §1's "metrics collector", §4.3's "Metrics query" loop).

/// One `(provider, model)` stats sample as reported by an external metrics backend.
#[derive(Debug, Clone)]
pub struct LabeledStats {
    /// Provider the stats are scoped to.
    pub provider: String,
    /// Model the stats are scoped to; empty for a provider-level aggregate.
    pub model: String,
    /// Error rate observed by the backend over its own window, in `[0, 1]`.
    pub error_rate: f64,
}

/// A label-keyed metrics backend the governor can poll for out-of-band error-rate signals,
/// independent of the latency/error samples it records itself via [`crate::AdaptiveState::record`].
///
/// Implementers typically wrap a Prometheus/StatsD client or similar; none is bundled here since
/// the wire format of any particular backend is out of scope for this crate.
pub trait MetricsCollector: Send + Sync {
    /// Snapshot of every `(provider, model)` pair the backend currently has stats for.
    fn query(&self) -> Vec<LabeledStats>;
}

#[cfg(test)]
pub(crate) struct FixedCollector(pub Vec<LabeledStats>);

#[cfg(test)]
impl MetricsCollector for FixedCollector {
    fn query(&self) -> Vec<LabeledStats> {
        self.0.clone()
    }
}
