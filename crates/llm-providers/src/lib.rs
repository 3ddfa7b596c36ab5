//! # llm-providers
//!
//! Concrete [`llm_core::Provider`] implementations: an OpenAI-wire-compatible provider (covering
//! OpenAI itself and any gateway speaking the same wire format — OpenRouter, Groq, Mistral,
//! LMStudio, vLLM, Together AI) and an Anthropic Messages API provider. Per-provider wire codecs
//! are an external collaborator to the core dispatch/orchestration/governor subsystems this
//! workspace specifies; these implementations exist at interface-shape fidelity so the rest of
//! the workspace has something real to dispatch to.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod registry;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "anthropic")]
pub mod anthropic;

// Re-export main types
pub use registry::{ProviderRegistry, ProviderEntry};

#[cfg(feature = "openai")]
pub use openai::OpenAIProvider;

#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicProvider;
