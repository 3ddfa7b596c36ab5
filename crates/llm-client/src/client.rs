//! Client root (spec §4.9, C9): configuration, provider factories, the provider cache, the tool
//! registry, and the optional adaptive governor, all joined under one `Arc`-friendly handle.

use crate::cache::ProviderCache;
use crate::config::ClientConfig;
use crate::middleware::MiddlewareChain;
use llm_core::request::{AudioRequest, EmbeddingsRequest, ImageRequest, StructuredRequest, TextRequest};
use llm_core::response::{AudioResponse, EmbeddingsResponse, ImageResponse, StructuredResponse, TextResponse};
use llm_core::streaming::TextChunkStream;
use llm_core::{Error, Provider, ProviderConfig, ProviderFactory, Result};
use llm_governor::{Governor, GovernorConfig};
use llm_tools::{ToolExecutor, ToolRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Per-operation middleware chains, one per request family (spec §4.7). Built once at
/// construction and never mutated afterward.
#[derive(Default)]
pub struct MiddlewareChains {
    /// Chain guarding [`Client::text`].
    pub text: MiddlewareChain<TextRequest, TextResponse>,
    /// Chain guarding [`Client::structured`].
    pub structured: MiddlewareChain<StructuredRequest, StructuredResponse>,
    /// Chain guarding [`Client::embeddings`].
    pub embeddings: MiddlewareChain<EmbeddingsRequest, EmbeddingsResponse>,
    /// Chain guarding [`Client::generate_image`].
    pub image: MiddlewareChain<ImageRequest, ImageResponse>,
    /// Chain guarding [`Client::audio`].
    pub audio: MiddlewareChain<AudioRequest, AudioResponse>,
}

/// Entry point for dispatching requests to configured LLM providers.
///
/// Holds the resolved [`ClientConfig`], a map of provider factories (built-ins from
/// `llm-providers` plus any custom registrations), a lazily-populated [`ProviderCache`], the
/// shared [`ToolRegistry`]/[`ToolExecutor`] pair, optional per-operation middleware chains, and an
/// optional fleet-wide [`Governor`] for adaptive concurrency across providers.
pub struct Client {
    config: Arc<ClientConfig>,
    factories: HashMap<String, ProviderFactory>,
    cache: ProviderCache,
    tool_registry: Arc<ToolRegistry>,
    tool_executor: Arc<ToolExecutor>,
    middleware: MiddlewareChains,
    governor: Option<Arc<Governor>>,
    closed: AtomicBool,
}

impl Client {
    /// Build a client from `config`, registering every built-in provider factory
    /// (`llm-providers::ProviderRegistry::builtin()`).
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Start a fluent [`ClientBuilder`].
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The client's resolved configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The shared tool registry, for registering tool handlers before dispatch.
    #[must_use]
    pub fn tool_registry(&self) -> &Arc<ToolRegistry> {
        &self.tool_registry
    }

    /// The shared tool executor, for builders that run the tool-calling loop directly against a
    /// resolved provider (spec §4.8).
    pub(crate) fn tool_executor(&self) -> &Arc<ToolExecutor> {
        &self.tool_executor
    }

    /// The fleet-wide adaptive governor, if enabled.
    #[must_use]
    pub fn governor(&self) -> Option<&Arc<Governor>> {
        self.governor.as_ref()
    }

    /// The per-operation middleware chains.
    #[must_use]
    pub fn middleware(&self) -> &MiddlewareChains {
        &self.middleware
    }

    /// Resolve the provider to dispatch to: `override_name` wins if present, otherwise the
    /// configured default (spec §4.6/§4.8). `base_url_override` builds a transient
    /// OpenAI-wire-compatible provider that bypasses the cache entirely, matching an explicit
    /// per-call endpoint override.
    ///
    /// # Errors
    /// [`Error::ProviderNotConfigured`] if no provider name can be resolved; [`Error::ProviderNotFound`]
    /// if the resolved name has no registered factory.
    pub fn resolve_provider(
        &self,
        override_name: Option<&str>,
        base_url_override: Option<&str>,
    ) -> Result<ResolvedProvider> {
        let name = override_name
            .map(str::to_string)
            .or_else(|| self.config.default_provider().map(str::to_string))
            .ok_or_else(|| Error::provider_not_configured("<default>", self.configured_names()))?;

        if let Some(base_url) = base_url_override {
            let provider_config = self.provider_config_for(&name, Some(base_url));
            let provider = self.build_transient(&name, provider_config)?;
            return Ok(ResolvedProvider::Transient(provider));
        }

        let factory = match self.factories.get(&name).cloned() {
            Some(factory) => factory,
            // A name with a config entry but no registered factory is assumed to be an
            // OpenAI-wire-compatible gateway (OpenRouter, Groq, vLLM, ...) reachable via its
            // `base_url` (spec §4.6).
            None if self.config.provider_config(&name).is_some() => llm_providers::OpenAIProvider::factory(name.clone()),
            None => return Err(crate::cache::not_found(&name, self.configured_names())),
        };
        let provider_config = self.provider_config_for(&name, None);
        let handle = self.cache.get_or_build(&name, move || factory(provider_config))?;
        Ok(ResolvedProvider::Cached(handle))
    }

    fn provider_config_for(&self, name: &str, base_url_override: Option<&str>) -> ProviderConfig {
        let mut provider_config = self.config.provider_config(name).cloned().unwrap_or_default();
        if let Some(base_url) = base_url_override {
            provider_config.base_url = Some(base_url.to_string());
        }
        provider_config.timeout_seconds = provider_config.effective_timeout(self.config.timeout_seconds());
        provider_config
    }

    fn build_transient(&self, name: &str, provider_config: ProviderConfig) -> Result<Arc<dyn Provider>> {
        let factory = self
            .factories
            .get(name)
            .cloned()
            .ok_or_else(|| crate::cache::not_found(name, self.configured_names()))?;
        factory(provider_config)
    }

    fn configured_names(&self) -> Vec<String> {
        self.config.configured_provider_names()
    }

    /// Non-streaming text completion, run through the text middleware chain (if any) and the
    /// resolved provider in sequence.
    ///
    /// # Errors
    /// Propagates validation, provider-resolution, and provider-call errors.
    pub async fn text(&self, req: TextRequest) -> Result<TextResponse> {
        req.validate()?;
        let resolved = self.resolve_provider(None, None)?;
        let provider = resolved.provider_arc();
        self.middleware
            .text
            .run(req, move |req| {
                let provider = Arc::clone(&provider);
                async move { provider.text(&req).await.map_err(|e| e.with_provider(provider.name())) }
            })
            .await
    }

    /// Run `req` against the resolved provider, transparently executing any tool calls it emits
    /// via the shared [`ToolExecutor`] (spec §4.5/§8 scenarios 1-2).
    ///
    /// # Errors
    /// [`Error::ToolIterationExhausted`] if the loop exceeds its iteration cap; otherwise
    /// propagates provider/tool errors.
    pub async fn text_with_tools(&self, req: TextRequest, max_iterations: Option<u32>) -> Result<TextResponse> {
        let resolved = self.resolve_provider(None, None)?;
        llm_tools::execute_with_tools(
            resolved.provider(),
            &self.tool_registry,
            &self.tool_executor,
            &req,
            max_iterations,
        )
        .await
    }

    /// Server-sent delta stream. The returned stream is cancel-safe: dropping it before
    /// exhaustion releases any resources the provider holds promptly (spec §8 scenario 6).
    ///
    /// # Errors
    /// Propagates validation, provider-resolution, and provider-call errors.
    pub async fn stream(&self, req: TextRequest) -> Result<TextChunkStream> {
        req.validate()?;
        let resolved = self.resolve_provider(None, None)?;
        resolved
            .provider()
            .stream(&req)
            .await
            .map_err(|e| e.with_provider(resolved.provider().name()))
    }

    /// Structured (schema-conforming) JSON output.
    ///
    /// # Errors
    /// Propagates provider-resolution and provider-call errors.
    pub async fn structured(&self, req: StructuredRequest) -> Result<StructuredResponse> {
        let resolved = self.resolve_provider(None, None)?;
        let provider = resolved.provider_arc();
        self.middleware
            .structured
            .run(req, move |req| {
                let provider = Arc::clone(&provider);
                async move { provider.structured(&req).await.map_err(|e| e.with_provider(provider.name())) }
            })
            .await
    }

    /// Vector embeddings.
    ///
    /// # Errors
    /// Propagates validation, provider-resolution, and provider-call errors.
    pub async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        req.validate()?;
        let resolved = self.resolve_provider(None, None)?;
        let provider = resolved.provider_arc();
        self.middleware
            .embeddings
            .run(req, move |req| {
                let provider = Arc::clone(&provider);
                async move { provider.embeddings(&req).await.map_err(|e| e.with_provider(provider.name())) }
            })
            .await
    }

    /// Image generation.
    ///
    /// # Errors
    /// Propagates validation, provider-resolution, and provider-call errors.
    pub async fn generate_image(&self, req: ImageRequest) -> Result<ImageResponse> {
        req.validate()?;
        let resolved = self.resolve_provider(None, None)?;
        let provider = resolved.provider_arc();
        self.middleware
            .image
            .run(req, move |req| {
                let provider = Arc::clone(&provider);
                async move { provider.generate_image(&req).await.map_err(|e| e.with_provider(provider.name())) }
            })
            .await
    }

    /// Speech synthesis or transcription.
    ///
    /// # Errors
    /// Propagates validation, provider-resolution, and provider-call errors.
    pub async fn audio(&self, req: AudioRequest) -> Result<AudioResponse> {
        req.validate()?;
        let resolved = self.resolve_provider(None, None)?;
        let provider = resolved.provider_arc();
        self.middleware
            .audio
            .run(req, move |req| {
                let provider = Arc::clone(&provider);
                async move { provider.audio(&req).await.map_err(|e| e.with_provider(provider.name())) }
            })
            .await
    }

    /// Acquire an adaptive-concurrency permit for `provider`/`model`, if a governor is
    /// configured. Callers that skip this when no governor is set dispatch unthrottled.
    ///
    /// # Errors
    /// Propagates the governor's semaphore error (e.g. if it has been shut down).
    pub async fn acquire_governor_permit(
        &self,
        provider: &str,
        model: &str,
    ) -> Result<Option<llm_governor::GovernorPermit>> {
        match &self.governor {
            Some(governor) => Ok(Some(governor.acquire(provider, model).await?)),
            None => Ok(None),
        }
    }

    /// Run one adaptive-capacity adjustment pass across every provider the governor has seen.
    /// No-op if adaptive concurrency is disabled.
    pub fn adjust_governed_capacity(&self) {
        if let Some(governor) = &self.governor {
            governor.adjust_all();
        }
    }

    /// Evict providers idle past `max_age`, keeping at most `max_count` cached at once (spec
    /// §4.6's `CleanupStaleProviders`).
    pub async fn cleanup_stale_providers(&self, max_age: std::time::Duration, max_count: usize) {
        self.cache.cleanup_stale(max_age, max_count).await;
    }

    /// Close every cached provider, stop the governor's background loops, and mark the client
    /// closed. Idempotent: a second call is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("client already closed");
            return;
        }
        info!("closing client");
        self.cache.close_all().await;
        if let Some(governor) = &self.governor {
            governor.stop();
        }
    }
}

/// A provider resolved for one call: either a cache-owned [`crate::cache::ProviderHandle`] or a
/// transient instance built for a one-off `base_url` override.
pub enum ResolvedProvider {
    /// Checked out of the client's [`ProviderCache`].
    Cached(crate::cache::ProviderHandle),
    /// Built directly for this call and discarded afterward.
    Transient(Arc<dyn Provider>),
}

impl ResolvedProvider {
    fn provider(&self) -> &dyn Provider {
        match self {
            Self::Cached(handle) => &**handle,
            Self::Transient(provider) => &**provider,
        }
    }

    /// A cheap `Arc<dyn Provider>` clone, for middleware closures that need an owned `'static`
    /// reference independent of the cache checkout's lifecycle.
    fn provider_arc(&self) -> Arc<dyn Provider> {
        match self {
            Self::Cached(handle) => handle.provider_arc(),
            Self::Transient(provider) => Arc::clone(provider),
        }
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    config: Option<ClientConfig>,
    factories: HashMap<String, ProviderFactory>,
    middleware: MiddlewareChains,
    enable_governor: bool,
    governor_config: GovernorConfig,
}

impl ClientBuilder {
    fn new() -> Self {
        let mut factories = HashMap::new();
        for entry in llm_providers::ProviderRegistry::builtin() {
            factories.insert(entry.name, entry.factory);
        }
        Self {
            config: None,
            factories,
            middleware: MiddlewareChains::default(),
            enable_governor: false,
            governor_config: GovernorConfig::default(),
        }
    }

    /// Set the client configuration.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Register or override a provider factory under `name`.
    #[must_use]
    pub fn provider_factory(mut self, name: impl Into<String>, factory: ProviderFactory) -> Self {
        self.factories.insert(name.into(), factory);
        self
    }

    /// Install a middleware chain set, replacing any previously installed chains.
    #[must_use]
    pub fn middleware(mut self, middleware: MiddlewareChains) -> Self {
        self.middleware = middleware;
        self
    }

    /// Enable the fleet-wide adaptive governor under `config`.
    #[must_use]
    pub fn with_governor(mut self, config: GovernorConfig) -> Self {
        self.enable_governor = true;
        self.governor_config = config;
        self
    }

    /// Build the client.
    #[must_use]
    pub fn build(self) -> Client {
        let config = self.config.unwrap_or_default();
        let tool_registry = Arc::new(ToolRegistry::new());
        let tool_executor = Arc::new(ToolExecutor::new(
            Arc::clone(&tool_registry),
            config.tool_safety().into(),
        ));
        let governor = self.enable_governor.then(|| {
            let governor = Governor::new(self.governor_config);
            governor.spawn_background_loops();
            governor
        });
        Client {
            config: Arc::new(config),
            factories: self.factories,
            cache: ProviderCache::new(),
            tool_registry,
            tool_executor,
            middleware: self.middleware,
            governor,
            closed: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_core::provider::ProviderCapabilities;
    use llm_core::request::ChatMessage;
    use std::sync::atomic::AtomicUsize;

    struct EchoProvider {
        name: String,
        caps: ProviderCapabilities,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Provider for EchoProvider {
        async fn text(&self, req: &TextRequest) -> Result<TextResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TextResponse {
                id: req.id,
                model: req.model.clone(),
                text: "echo".to_string(),
                tool_calls: None,
                finish_reason: llm_core::response::FinishReason::Stop,
                usage: Some(llm_core::response::Usage { prompt_tokens: 1, completion_tokens: 1, total_tokens: 2 }),
            })
        }
        async fn stream(&self, _req: &TextRequest) -> Result<TextChunkStream> {
            Err(Error::unsupported(self.name.clone(), "stream"))
        }
        async fn structured(&self, _req: &StructuredRequest) -> Result<StructuredResponse> {
            Err(Error::unsupported(self.name.clone(), "structured"))
        }
        async fn embeddings(&self, _req: &EmbeddingsRequest) -> Result<EmbeddingsResponse> {
            Err(Error::unsupported(self.name.clone(), "embeddings"))
        }
        async fn generate_image(&self, _req: &ImageRequest) -> Result<ImageResponse> {
            Err(Error::unsupported(self.name.clone(), "image"))
        }
        async fn audio(&self, _req: &AudioRequest) -> Result<AudioResponse> {
            Err(Error::unsupported(self.name.clone(), "audio"))
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn capabilities(&self) -> &ProviderCapabilities {
            &self.caps
        }
    }

    fn echo_client(calls: Arc<AtomicUsize>) -> Client {
        let config = ClientConfig::builder()
            .default_provider("echo")
            .provider("echo", llm_core::provider::ProviderConfig::default())
            .build()
            .unwrap();
        Client::builder()
            .config(config)
            .provider_factory(
                "echo",
                Arc::new(move |_cfg| {
                    Ok(Arc::new(EchoProvider {
                        name: "echo".to_string(),
                        caps: ProviderCapabilities::new("echo", []),
                        calls: Arc::clone(&calls),
                    }) as Arc<dyn Provider>)
                }),
            )
            .build()
    }

    #[tokio::test]
    async fn text_dispatches_through_resolved_default_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = echo_client(Arc::clone(&calls));
        let req = TextRequest::builder()
            .model("echo-1")
            .message(ChatMessage::user("hi"))
            .build()
            .unwrap();
        let response = client.text(req).await.unwrap();
        assert_eq!(response.text, "echo");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolve_provider_reuses_cached_instance() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = echo_client(Arc::clone(&calls));
        let req = TextRequest::builder()
            .model("echo-1")
            .message(ChatMessage::user("hi"))
            .build()
            .unwrap();
        client.text(req.clone()).await.unwrap();
        client.text(req).await.unwrap();
        assert_eq!(client.cache.total_checkouts("echo"), Some(2));
    }

    #[tokio::test]
    async fn unconfigured_default_provider_is_rejected() {
        let config = ClientConfig::default();
        let client = Client::new(config);
        let result = client.resolve_provider(None, None);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = echo_client(calls);
        client.close().await;
        client.close().await;
    }
}
