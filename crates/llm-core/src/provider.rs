//! The downstream boundary: what a concrete LLM backend must implement.

use crate::error::Result;
use crate::request::{AudioRequest, EmbeddingsRequest, ImageRequest, StructuredRequest, TextRequest};
use crate::response::{AudioResponse, EmbeddingsResponse, ImageResponse, StructuredResponse, TextResponse};
use crate::streaming::TextChunkStream;
use crate::types::ApiKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Capability tags a provider may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Non-streaming text completion.
    Text,
    /// Structured (schema-conforming) JSON output.
    Structured,
    /// Vector embeddings.
    Embeddings,
    /// Image generation.
    Images,
    /// Speech synthesis/recognition.
    Audio,
    /// Tool/function calling.
    ToolCalling,
    /// Server-sent delta streaming.
    Streaming,
    /// Multimodal vision input.
    Vision,
    /// Sandboxed code execution.
    CodeExecution,
}

/// Immutable, once-built record of what a named provider supports.
///
/// Built once per provider name; builders consult it before dispatch to fail fast with
/// [`crate::error::Error::Unsupported`] rather than discovering the gap mid-call.
#[derive(Debug, Clone)]
pub struct ProviderCapabilities {
    name: String,
    capabilities: HashSet<Capability>,
}

impl ProviderCapabilities {
    /// Build a capability record for `name` from an explicit set.
    #[must_use]
    pub fn new(name: impl Into<String>, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            name: name.into(),
            capabilities: capabilities.into_iter().collect(),
        }
    }

    /// Whether `capability` is present.
    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// The provider name this record describes.
    #[must_use]
    pub fn provider_name(&self) -> &str {
        &self.name
    }
}

/// Immutable configuration passed to a [`ProviderFactory`] exactly once per cache miss.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider API key, if required.
    pub api_key: Option<ApiKey>,
    /// Base URL override (required for OpenAI-wire-compatible gateways, optional otherwise).
    pub base_url: Option<String>,
    /// Per-provider request timeout. `0` defers to the client's default timeout.
    pub timeout_seconds: u64,
    /// Whether this provider's model catalog should be refreshed from its discovery endpoint.
    pub dynamic_models: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            timeout_seconds: 0,
            dynamic_models: false,
        }
    }
}

impl ProviderConfig {
    /// Resolve the effective timeout given the client's default.
    ///
    /// `0` on both sides means unbounded, which the client must document as an explicit opt-in.
    #[must_use]
    pub fn effective_timeout(&self, client_default_seconds: u64) -> u64 {
        if self.timeout_seconds == 0 {
            client_default_seconds
        } else {
            self.timeout_seconds
        }
    }
}

/// A pure factory function: `ProviderConfig -> Provider | error`.
///
/// Called at most once per `(name, config)` pair until the cached instance is evicted. Factories
/// must be fast and non-blocking — no network calls at construction time, since the provider
/// cache may invoke one while holding its write lock.
pub type ProviderFactory = std::sync::Arc<
    dyn Fn(ProviderConfig) -> Result<std::sync::Arc<dyn Provider>> + Send + Sync,
>;

/// `(provider, model)` composite key. A key with an empty model acts as a provider-level
/// aggregate (used by the governor's provider-level fallback state).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderKey {
    /// Provider name.
    pub provider: String,
    /// Model name, or empty for a provider-level aggregate.
    pub model: String,
}

impl ProviderKey {
    /// Build a `(provider, model)` key.
    #[must_use]
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Build a provider-level aggregate key (empty model).
    #[must_use]
    pub fn provider_only(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: String::new(),
        }
    }

    /// Whether this key is a provider-level aggregate.
    #[must_use]
    pub fn is_provider_level(&self) -> bool {
        self.model.is_empty()
    }
}

/// A provider is an abstract endpoint capable of fulfilling one or more request families.
///
/// Capability subsets are discoverable at runtime via [`Provider::capabilities`]; calling an
/// unsupported operation must return [`crate::error::Error::Unsupported`] naming the provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Non-streaming text completion.
    async fn text(&self, req: &TextRequest) -> Result<TextResponse>;

    /// Server-sent delta stream.
    async fn stream(&self, req: &TextRequest) -> Result<TextChunkStream>;

    /// JSON output conforming to a supplied schema.
    async fn structured(&self, req: &StructuredRequest) -> Result<StructuredResponse>;

    /// Vector embeddings.
    async fn embeddings(&self, req: &EmbeddingsRequest) -> Result<EmbeddingsResponse>;

    /// Image generation.
    async fn generate_image(&self, req: &ImageRequest) -> Result<ImageResponse>;

    /// Speech synthesis or recognition, distinguished by the request's `kind` field.
    async fn audio(&self, req: &AudioRequest) -> Result<AudioResponse>;

    /// The provider's registered name.
    fn name(&self) -> &str;

    /// The provider's immutable capability record.
    fn capabilities(&self) -> &ProviderCapabilities;

    /// Release any held resources. Must be idempotent: a second call is a no-op success.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_lookup() {
        let caps = ProviderCapabilities::new("openai", [Capability::Text, Capability::Streaming]);
        assert!(caps.supports(Capability::Text));
        assert!(!caps.supports(Capability::Audio));
        assert_eq!(caps.provider_name(), "openai");
    }

    #[test]
    fn provider_key_level() {
        let agg = ProviderKey::provider_only("openai");
        assert!(agg.is_provider_level());
        let specific = ProviderKey::new("openai", "gpt-4o");
        assert!(!specific.is_provider_level());
    }

    #[test]
    fn effective_timeout_falls_back_to_client_default() {
        let cfg = ProviderConfig::default();
        assert_eq!(cfg.effective_timeout(30), 30);
        let cfg = ProviderConfig {
            timeout_seconds: 5,
            ..Default::default()
        };
        assert_eq!(cfg.effective_timeout(30), 5);
    }
}
