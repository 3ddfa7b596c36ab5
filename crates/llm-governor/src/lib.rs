//! # llm-governor
//!
//! Adaptive concurrency control: per-`(provider, model)` PID-controlled semaphores that resize
//! themselves from observed latency and error-rate telemetry, plus a fleet-wide governor that
//! resolves routing keys to state and runs the periodic adjustment loop.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod governor;
pub mod metrics;
pub mod state;

pub use governor::{Governor, GovernorConfig, GovernorPermit, KeyGranularity};
pub use metrics::{LabeledStats, MetricsCollector};
pub use state::{AdaptiveConfig, AdaptiveState};
