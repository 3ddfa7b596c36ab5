//! # llm-telemetry
//!
//! Structured, span-based logging and tracing for the LLM client library, carried over from this
//! workspace's existing telemetry crate: `TracingConfig` plus `init_tracing`/`shutdown_tracing`
//! wired to `tracing-subscriber`, with an optional OpenTelemetry OTLP exporter.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, shutdown_tracing, TracingConfig, TracingError};
