//! Built-in factory registrations consumed by the client's provider cache (spec §5 C6).
//!
//! This crate does not own the cache itself — that lives in `llm-client` — but it is the natural
//! place to declare which provider names this crate knows how to construct, and how.

use llm_core::ProviderFactory;

/// One built-in provider registration: a name and the factory that constructs it.
#[derive(Clone)]
pub struct ProviderEntry {
    /// Registration name (e.g. `"openai"`, `"anthropic"`).
    pub name: String,
    /// Factory invoked by the client's provider cache on a cache miss.
    pub factory: ProviderFactory,
}

/// The set of provider factories this crate ships, gated by Cargo feature.
pub struct ProviderRegistry;

impl ProviderRegistry {
    /// Every factory compiled into this build, one entry per enabled provider feature.
    #[must_use]
    pub fn builtin() -> Vec<ProviderEntry> {
        #[allow(unused_mut)]
        let mut entries = Vec::new();

        #[cfg(feature = "openai")]
        entries.push(ProviderEntry {
            name: "openai".to_string(),
            factory: crate::openai::OpenAIProvider::factory("openai"),
        });

        #[cfg(feature = "anthropic")]
        entries.push(ProviderEntry {
            name: "anthropic".to_string(),
            factory: crate::anthropic::AnthropicProvider::factory("anthropic"),
        });

        entries
    }
}
