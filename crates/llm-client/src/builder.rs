//! Fluent per-call request builders and batch dispatch (spec §4.8, C8).
//!
//! Each builder wraps the matching `llm_core::request::*Builder`, adding the two knobs every
//! request family shares: an explicit provider override (`using`) and a `base_url` override that
//! builds a transient provider for that one call (spec §4.6's resolution order — explicit beats
//! default, `base_url` beats the cache).

use crate::client::Client;
use llm_core::request::{AudioRequest, EmbeddingsRequest, ImageRequest, StructuredRequest, TextRequest, TextRequestBuilder};
use llm_core::response::{AudioResponse, EmbeddingsResponse, ImageResponse, StructuredResponse, TextResponse};
use llm_core::streaming::TextChunkStream;
use llm_core::types::RequestId;
use llm_core::{Error, Result};
use std::sync::Arc;

/// The provider-routing knobs shared by every request builder.
#[derive(Default, Clone)]
struct CommonBuilder {
    provider: Option<String>,
    base_url: Option<String>,
}

impl CommonBuilder {
    fn using(&mut self, provider: impl Into<String>) {
        self.provider = Some(provider.into());
    }

    fn base_url(&mut self, base_url: impl Into<String>) {
        self.base_url = Some(base_url.into());
    }
}

/// Builds and dispatches a non-streaming [`TextRequest`].
pub struct TextCallBuilder<'a> {
    client: &'a Client,
    inner: TextRequestBuilder,
    common: CommonBuilder,
    max_tool_iterations: Option<u32>,
    use_tools: bool,
}

impl<'a> TextCallBuilder<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self {
            client,
            inner: TextRequest::builder(),
            common: CommonBuilder::default(),
            max_tool_iterations: None,
            use_tools: false,
        }
    }

    /// Set the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.inner = self.inner.model(model);
        self
    }

    /// Append a message.
    #[must_use]
    pub fn message(mut self, message: llm_core::request::ChatMessage) -> Self {
        self.inner = self.inner.message(message);
        self
    }

    /// Replace every message.
    #[must_use]
    pub fn messages(mut self, messages: Vec<llm_core::request::ChatMessage>) -> Self {
        self.inner = self.inner.messages(messages);
        self
    }

    /// Set sampling temperature.
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.inner = self.inner.temperature(temperature);
        self
    }

    /// Set the max output tokens.
    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.inner = self.inner.max_tokens(max_tokens);
        self
    }

    /// Register tool definitions the model may call.
    #[must_use]
    pub fn tools(mut self, tools: Vec<llm_core::request::ToolDefinition>) -> Self {
        self.inner = self.inner.tools(tools);
        self
    }

    /// Explicitly pick the provider this call dispatches to, overriding the client's default.
    #[must_use]
    pub fn using(mut self, provider: impl Into<String>) -> Self {
        self.common.using(provider);
        self
    }

    /// Dispatch to a one-off endpoint instead of a cached provider instance.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.common.base_url(base_url);
        self
    }

    /// Transparently execute any tool calls the model emits, feeding results back until a final
    /// answer or `max_iterations` is reached (spec §4.5/§8 scenarios 1-2).
    #[must_use]
    pub fn with_tools(mut self, max_iterations: Option<u32>) -> Self {
        self.use_tools = true;
        self.max_tool_iterations = max_iterations;
        self
    }

    /// Validate and dispatch.
    ///
    /// # Errors
    /// Propagates builder validation errors, provider-resolution errors, and provider-call errors.
    pub async fn send(self) -> Result<TextResponse> {
        let req = self.inner.build()?;
        if self.common.provider.is_some() || self.common.base_url.is_some() {
            let resolved = self
                .client
                .resolve_provider(self.common.provider.as_deref(), self.common.base_url.as_deref())?;
            return dispatch_text(self.client, resolved, req, self.use_tools, self.max_tool_iterations).await;
        }
        if self.use_tools {
            self.client.text_with_tools(req, self.max_tool_iterations).await
        } else {
            self.client.text(req).await
        }
    }

    /// Validate and dispatch as a server-sent delta stream.
    ///
    /// # Errors
    /// Propagates builder validation errors, provider-resolution errors, and provider-call errors.
    pub async fn stream(self) -> Result<TextChunkStream> {
        let req = self.inner.stream(true).build()?;
        if self.common.provider.is_some() || self.common.base_url.is_some() {
            let resolved = self
                .client
                .resolve_provider(self.common.provider.as_deref(), self.common.base_url.as_deref())?;
            return match resolved {
                crate::client::ResolvedProvider::Cached(handle) => handle.stream(&req).await,
                crate::client::ResolvedProvider::Transient(provider) => provider.stream(&req).await,
            };
        }
        self.client.stream(req).await
    }
}

async fn dispatch_text(
    client: &Client,
    resolved: crate::client::ResolvedProvider,
    req: TextRequest,
    use_tools: bool,
    max_iterations: Option<u32>,
) -> Result<TextResponse> {
    let provider: &dyn llm_core::Provider = match &resolved {
        crate::client::ResolvedProvider::Cached(handle) => &**handle,
        crate::client::ResolvedProvider::Transient(provider) => &**provider,
    };
    if use_tools {
        llm_tools::execute_with_tools(provider, client.tool_registry(), client.tool_executor(), &req, max_iterations).await
    } else {
        provider.text(&req).await.map_err(|e| e.with_provider(provider.name()))
    }
}

/// Builds and dispatches a [`StructuredRequest`].
pub struct StructuredCallBuilder<'a> {
    client: &'a Client,
    base: TextRequestBuilder,
    schema: Option<serde_json::Value>,
    common: CommonBuilder,
}

impl<'a> StructuredCallBuilder<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self {
            client,
            base: TextRequest::builder(),
            schema: None,
            common: CommonBuilder::default(),
        }
    }

    /// Set the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.base = self.base.model(model);
        self
    }

    /// Append a message.
    #[must_use]
    pub fn message(mut self, message: llm_core::request::ChatMessage) -> Self {
        self.base = self.base.message(message);
        self
    }

    /// Set the JSON schema the response must conform to.
    #[must_use]
    pub fn schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Explicitly pick the provider this call dispatches to.
    #[must_use]
    pub fn using(mut self, provider: impl Into<String>) -> Self {
        self.common.using(provider);
        self
    }

    /// Validate and dispatch.
    ///
    /// # Errors
    /// [`Error::Validation`] if no schema was set; otherwise propagates builder, resolution, and
    /// provider-call errors.
    pub async fn send(self) -> Result<StructuredResponse> {
        let base = self.base.build()?;
        let schema = self
            .schema
            .ok_or_else(|| Error::validation("schema is required", Some("schema".to_string()), "missing_schema"))?;
        let req = StructuredRequest { base, schema };
        if let Some(provider) = self.common.provider {
            let resolved = self.client.resolve_provider(Some(&provider), self.common.base_url.as_deref())?;
            return match resolved {
                crate::client::ResolvedProvider::Cached(handle) => {
                    handle.structured(&req).await.map_err(|e| e.with_provider(handle.name()))
                }
                crate::client::ResolvedProvider::Transient(p) => {
                    p.structured(&req).await.map_err(|e| e.with_provider(p.name()))
                }
            };
        }
        self.client.structured(req).await
    }
}

/// Builds and dispatches an [`EmbeddingsRequest`].
pub struct EmbeddingsCallBuilder<'a> {
    client: &'a Client,
    model: Option<String>,
    input: Vec<String>,
    dimensions: Option<u32>,
    common: CommonBuilder,
}

impl<'a> EmbeddingsCallBuilder<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self {
            client,
            model: None,
            input: Vec::new(),
            dimensions: None,
            common: CommonBuilder::default(),
        }
    }

    /// Set the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the input strings to embed.
    #[must_use]
    pub fn input(mut self, input: Vec<String>) -> Self {
        self.input = input;
        self
    }

    /// Request a truncated embedding dimensionality.
    #[must_use]
    pub fn dimensions(mut self, dimensions: u32) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    /// Explicitly pick the provider this call dispatches to.
    #[must_use]
    pub fn using(mut self, provider: impl Into<String>) -> Self {
        self.common.using(provider);
        self
    }

    /// Validate and dispatch.
    ///
    /// # Errors
    /// [`Error::Validation`] if `model` is unset; otherwise propagates provider-resolution and
    /// provider-call errors.
    pub async fn send(self) -> Result<EmbeddingsResponse> {
        let req = EmbeddingsRequest {
            id: RequestId::generate(),
            model: self
                .model
                .ok_or_else(|| Error::validation("model is required", Some("model".to_string()), "missing_model"))?,
            input: self.input,
            dimensions: self.dimensions,
        };
        req.validate()?;
        if let Some(provider) = &self.common.provider {
            let resolved = self.client.resolve_provider(Some(provider), self.common.base_url.as_deref())?;
            return match resolved {
                crate::client::ResolvedProvider::Cached(handle) => {
                    handle.embeddings(&req).await.map_err(|e| e.with_provider(handle.name()))
                }
                crate::client::ResolvedProvider::Transient(p) => {
                    p.embeddings(&req).await.map_err(|e| e.with_provider(p.name()))
                }
            };
        }
        self.client.embeddings(req).await
    }
}

/// Builds and dispatches an [`ImageRequest`].
pub struct ImageCallBuilder<'a> {
    client: &'a Client,
    model: Option<String>,
    prompt: Option<String>,
    size: Option<String>,
    n: Option<u32>,
    common: CommonBuilder,
}

impl<'a> ImageCallBuilder<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self {
            client,
            model: None,
            prompt: None,
            size: None,
            n: None,
            common: CommonBuilder::default(),
        }
    }

    /// Set the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the generation prompt.
    #[must_use]
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Request a specific output size, e.g. `"1024x1024"`.
    #[must_use]
    pub fn size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    /// Request `n` images.
    #[must_use]
    pub fn n(mut self, n: u32) -> Self {
        self.n = Some(n);
        self
    }

    /// Explicitly pick the provider this call dispatches to.
    #[must_use]
    pub fn using(mut self, provider: impl Into<String>) -> Self {
        self.common.using(provider);
        self
    }

    /// Validate and dispatch.
    ///
    /// # Errors
    /// [`Error::Validation`] if `model`/`prompt` are unset; otherwise propagates
    /// provider-resolution and provider-call errors.
    pub async fn send(self) -> Result<ImageResponse> {
        let req = ImageRequest {
            id: RequestId::generate(),
            model: self
                .model
                .ok_or_else(|| Error::validation("model is required", Some("model".to_string()), "missing_model"))?,
            prompt: self
                .prompt
                .ok_or_else(|| Error::validation("prompt is required", Some("prompt".to_string()), "missing_prompt"))?,
            size: self.size,
            n: self.n,
        };
        req.validate()?;
        if let Some(provider) = &self.common.provider {
            let resolved = self.client.resolve_provider(Some(provider), self.common.base_url.as_deref())?;
            return match resolved {
                crate::client::ResolvedProvider::Cached(handle) => {
                    handle.generate_image(&req).await.map_err(|e| e.with_provider(handle.name()))
                }
                crate::client::ResolvedProvider::Transient(p) => {
                    p.generate_image(&req).await.map_err(|e| e.with_provider(p.name()))
                }
            };
        }
        self.client.generate_image(req).await
    }
}

/// Outcome of one item in a batch, keeping its original index so callers can reassemble order
/// even though items complete out of order (spec §8 scenario 3).
#[derive(Debug)]
pub struct BatchItem<T> {
    /// Position of this item in the batch as submitted.
    pub index: usize,
    /// The item's outcome.
    pub result: Result<T>,
}

/// Runs a batch of [`TextRequest`]s with a concurrency cap, preserving submission order in the
/// returned slice regardless of completion order or per-item failure (spec §4.8/§8 scenario 3).
pub struct BatchBuilder<'a> {
    client: &'a Client,
    requests: Vec<TextRequest>,
    concurrency: usize,
}

const DEFAULT_BATCH_CONCURRENCY: usize = 10;

impl<'a> BatchBuilder<'a> {
    pub(crate) fn new(client: &'a Client, requests: Vec<TextRequest>) -> Self {
        Self { client, requests, concurrency: DEFAULT_BATCH_CONCURRENCY }
    }

    /// Cap the number of requests in flight at once.
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Run every request, returning one [`BatchItem`] per input in submission order. A failed
    /// request does not cancel its siblings.
    pub async fn execute_collect(self) -> Vec<BatchItem<TextResponse>> {
        use futures::stream::{self, StreamExt};

        let client = self.client;
        let mut results: Vec<BatchItem<TextResponse>> = stream::iter(self.requests.into_iter().enumerate())
            .map(|(index, req)| async move {
                let result = dispatch_governed(client, req).await;
                BatchItem { index, result }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|item| item.index);
        results
    }

    /// Run every request, returning as soon as the first one succeeds. Remaining in-flight
    /// requests are dropped (and, for streaming dispatch, their connections closed promptly).
    pub async fn execute_first(self) -> Result<TextResponse> {
        use futures::stream::{FuturesUnordered, StreamExt};

        let client = self.client;
        let mut futures = FuturesUnordered::new();
        let mut pending = self.requests.into_iter();
        for req in pending.by_ref().take(self.concurrency) {
            futures.push(dispatch_governed(client, req));
        }

        let mut last_err = None;
        while let Some(result) = futures.next().await {
            match result {
                Ok(response) => return Ok(response),
                Err(e) => {
                    last_err = Some(e);
                    if let Some(req) = pending.next() {
                        futures.push(dispatch_governed(client, req));
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::validation("batch was empty", None, "empty_batch")))
    }
}

/// Dispatch one batch item's text call, acquiring an adaptive-concurrency permit for the
/// resolved `(provider, model)` pair first when a governor is configured (spec §4.8's batching
/// worker loop). The permit's outcome is recorded before it is released, regardless of whether
/// the call succeeded.
async fn dispatch_governed(client: &Client, req: TextRequest) -> Result<TextResponse> {
    let provider_name = client.config().default_provider().unwrap_or("").to_string();
    let Some(permit) = client.acquire_governor_permit(&provider_name, &req.model).await? else {
        return client.text(req).await;
    };
    let result = client.text(req).await;
    if let Some(governor) = client.governor() {
        governor.record_outcome(&permit, result.is_err());
    }
    result
}

impl Client {
    /// Start a fluent text-completion call.
    #[must_use]
    pub fn text_builder(&self) -> TextCallBuilder<'_> {
        TextCallBuilder::new(self)
    }

    /// Start a fluent structured-output call.
    #[must_use]
    pub fn structured_builder(&self) -> StructuredCallBuilder<'_> {
        StructuredCallBuilder::new(self)
    }

    /// Start a fluent embeddings call.
    #[must_use]
    pub fn embeddings_builder(&self) -> EmbeddingsCallBuilder<'_> {
        EmbeddingsCallBuilder::new(self)
    }

    /// Start a fluent image-generation call.
    #[must_use]
    pub fn image_builder(&self) -> ImageCallBuilder<'_> {
        ImageCallBuilder::new(self)
    }

    /// Start a batch of text-completion calls, run with bounded concurrency (spec §8 scenario 3).
    #[must_use]
    pub fn batch(&self, requests: Vec<TextRequest>) -> BatchBuilder<'_> {
        BatchBuilder::new(self, requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_core::request::ChatMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_client(calls: Arc<AtomicUsize>, fail_on: Vec<usize>) -> Client {
        use llm_core::provider::ProviderCapabilities;
        use llm_core::{Provider, ProviderConfig};

        struct CountingProvider {
            caps: ProviderCapabilities,
            calls: Arc<AtomicUsize>,
            fail_on: Vec<usize>,
        }

        #[async_trait::async_trait]
        impl Provider for CountingProvider {
            async fn text(&self, req: &TextRequest) -> Result<TextResponse> {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if self.fail_on.contains(&n) {
                    return Err(Error::timeout(5));
                }
                Ok(TextResponse {
                    id: req.id,
                    model: req.model.clone(),
                    text: req.model.clone(),
                    tool_calls: None,
                    finish_reason: llm_core::response::FinishReason::Stop,
                    usage: None,
                })
            }
            async fn stream(&self, _req: &TextRequest) -> Result<TextChunkStream> {
                Err(Error::unsupported("batch-test", "stream"))
            }
            async fn structured(&self, _req: &StructuredRequest) -> Result<StructuredResponse> {
                Err(Error::unsupported("batch-test", "structured"))
            }
            async fn embeddings(&self, _req: &EmbeddingsRequest) -> Result<EmbeddingsResponse> {
                Err(Error::unsupported("batch-test", "embeddings"))
            }
            async fn generate_image(&self, _req: &ImageRequest) -> Result<ImageResponse> {
                Err(Error::unsupported("batch-test", "image"))
            }
            async fn audio(&self, _req: &AudioRequest) -> Result<AudioResponse> {
                Err(Error::unsupported("batch-test", "audio"))
            }
            fn name(&self) -> &str {
                "batch-test"
            }
            fn capabilities(&self) -> &ProviderCapabilities {
                &self.caps
            }
        }

        let config = crate::config::ClientConfig::builder()
            .default_provider("batch-test")
            .provider("batch-test", ProviderConfig::default())
            .build()
            .unwrap();
        Client::builder()
            .config(config)
            .provider_factory(
                "batch-test",
                Arc::new(move |_cfg| {
                    Ok(Arc::new(CountingProvider {
                        caps: ProviderCapabilities::new("batch-test", []),
                        calls: Arc::clone(&calls),
                        fail_on: fail_on.clone(),
                    }) as Arc<dyn Provider>)
                }),
            )
            .build()
    }

    fn req(model: &str) -> TextRequest {
        TextRequest::builder().model(model).message(ChatMessage::user("hi")).build().unwrap()
    }

    #[tokio::test]
    async fn batch_preserves_submission_order_with_a_failure_in_the_middle() {
        let client = test_client(Arc::new(AtomicUsize::new(0)), vec![1]);
        let requests = vec![req("a"), req("b"), req("c")];
        let results = client.batch(requests).concurrency(1).execute_collect().await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].index, 0);
        assert_eq!(results[1].index, 1);
        assert_eq!(results[2].index, 2);
        assert!(results[0].result.is_ok());
        assert!(results[1].result.is_err());
        assert!(results[2].result.is_ok());
    }

    #[tokio::test]
    async fn execute_first_returns_as_soon_as_one_succeeds() {
        let client = test_client(Arc::new(AtomicUsize::new(0)), vec![0]);
        let requests = vec![req("a"), req("b")];
        let result = client.batch(requests).execute_first().await.unwrap();
        assert_eq!(result.text, "b");
    }

    #[tokio::test]
    async fn text_builder_dispatches_with_fluent_configuration() {
        let client = test_client(Arc::new(AtomicUsize::new(0)), vec![]);
        let response = client
            .text_builder()
            .model("gpt-test")
            .message(ChatMessage::user("hi"))
            .temperature(0.5)
            .send()
            .await
            .unwrap();
        assert_eq!(response.text, "gpt-test");
    }
}
