//! Error type re-export.
//!
//! `llm-client` does not define its own error kinds — every failure mode it can produce
//! (provider not found/configured, validation, timeout, circuit open, tool iteration exhausted,
//! ...) already has a variant on [`llm_core::Error`], which every crate in this workspace shares.

pub use llm_core::{Error, Result};
