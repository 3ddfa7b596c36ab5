//! Multi-turn tool-calling orchestration loop.

use crate::executor::ToolExecutor;
use crate::registry::ToolRegistry;
use llm_core::{ChatMessage, Error, Provider, TextRequest, TextResponse};
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Run `req` against `provider`, transparently executing any tool calls the model emits and
/// feeding results back, until a response carries no tool calls or `max_iterations` is reached.
///
/// The caller's request is never mutated; the loop operates on a private copy. If `req.tools` is
/// empty, the registry's current snapshot is injected before the first call.
///
/// # Errors
/// Propagates the provider's error, wrapped with the iteration it occurred on. Returns
/// [`Error::ToolIterationExhausted`] if the loop runs `max_iterations` times without a
/// tool-call-free response.
pub async fn execute_with_tools(
    provider: &dyn Provider,
    registry: &Arc<ToolRegistry>,
    executor: &Arc<ToolExecutor>,
    req: &TextRequest,
    max_iterations: Option<u32>,
) -> Result<TextResponse, Error> {
    let max_iterations = match max_iterations {
        Some(0) | None => DEFAULT_MAX_ITERATIONS,
        Some(n) => n,
    };
    let mut req = req.clone();
    if req.tools.is_none() {
        let snapshot = registry.list();
        if !snapshot.is_empty() {
            req.tools = Some(snapshot);
        }
    }

    let mut iteration = 1u32;
    loop {
        if iteration > max_iterations {
            return Err(Error::tool_iteration_exhausted(max_iterations));
        }

        let response = provider
            .text(&req)
            .await
            .map_err(|e| e.with_provider(provider.name()))?;

        if !response.has_tool_calls() {
            return Ok(response);
        }

        let tool_calls = response.tool_calls.clone().unwrap_or_default();
        debug!(iteration, calls = tool_calls.len(), "executing tool calls");

        let results = executor.execute_all(&tool_calls).await;

        req.messages
            .push(ChatMessage::assistant(response.text.clone(), Some(tool_calls)));
        req.messages.push(ToolExecutor::build_tool_result_message(&results));

        iteration += 1;
    }
}

/// Convenience wrapper pairing a registry and executor for repeated orchestration calls.
pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    max_iterations: u32,
}

impl Orchestrator {
    /// Build an orchestrator over `registry`/`executor`, capping each run at `max_iterations`.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, executor: Arc<ToolExecutor>, max_iterations: u32) -> Self {
        Self {
            registry,
            executor,
            max_iterations,
        }
    }

    /// Run the multi-turn loop for `req` against `provider`.
    ///
    /// # Errors
    /// See [`execute_with_tools`].
    pub async fn run(&self, provider: &dyn Provider, req: &TextRequest) -> Result<TextResponse, Error> {
        let response = execute_with_tools(
            provider,
            &self.registry,
            &self.executor,
            req,
            Some(self.max_iterations),
        )
        .await?;
        info!(model = %response.model, "tool orchestration complete");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SafetyConfig;
    use async_trait::async_trait;
    use llm_core::{
        AudioRequest, AudioResponse, Capability, EmbeddingsRequest, EmbeddingsResponse, FinishReason,
        FunctionCall, ImageRequest, ImageResponse, ProviderCapabilities, StructuredRequest,
        StructuredResponse, TextChunkStream, ToolCall, ToolDefinition,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    struct TwoTurnWeatherProvider {
        call_count: AtomicU32,
        caps: ProviderCapabilities,
    }

    impl TwoTurnWeatherProvider {
        fn new(call_count: u32) -> Self {
            Self {
                call_count: AtomicU32::new(call_count),
                caps: ProviderCapabilities::new("mock", [Capability::Text, Capability::ToolCalling]),
            }
        }
    }

    #[async_trait]
    impl Provider for TwoTurnWeatherProvider {
        async fn text(&self, _req: &TextRequest) -> Result<TextResponse, Error> {
            let n = self.call_count.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(TextResponse {
                    id: llm_core::RequestId::generate(),
                    model: "mock".to_string(),
                    text: String::new(),
                    tool_calls: Some(vec![ToolCall {
                        id: "c1".to_string(),
                        function: FunctionCall {
                            name: "get_weather".to_string(),
                            arguments: r#"{"city":"SF"}"#.to_string(),
                        },
                    }]),
                    finish_reason: FinishReason::ToolCalls,
                    usage: None,
                })
            } else {
                Ok(TextResponse {
                    id: llm_core::RequestId::generate(),
                    model: "mock".to_string(),
                    text: "The weather in SF is 72°F and sunny.".to_string(),
                    tool_calls: None,
                    finish_reason: FinishReason::Stop,
                    usage: None,
                })
            }
        }

        async fn stream(&self, _req: &TextRequest) -> Result<TextChunkStream, Error> {
            unimplemented!()
        }

        async fn structured(&self, _req: &StructuredRequest) -> Result<StructuredResponse, Error> {
            unimplemented!()
        }

        async fn embeddings(&self, _req: &EmbeddingsRequest) -> Result<EmbeddingsResponse, Error> {
            unimplemented!()
        }

        async fn generate_image(&self, _req: &ImageRequest) -> Result<ImageResponse, Error> {
            unimplemented!()
        }

        async fn audio(&self, _req: &AudioRequest) -> Result<AudioResponse, Error> {
            unimplemented!()
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn capabilities(&self) -> &ProviderCapabilities {
            &self.caps
        }
    }

    struct WeatherHandler;

    #[async_trait]
    impl crate::registry::ToolHandler for WeatherHandler {
        async fn call(&self, _arguments: serde_json::Value) -> Result<serde_json::Value, Error> {
            Ok(serde_json::json!({"temp": 72, "condition": "sunny"}))
        }
    }

    #[tokio::test]
    async fn two_turn_weather_scenario() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(
            ToolDefinition {
                name: "get_weather".to_string(),
                description: None,
                input_schema: Some(serde_json::json!({"required": ["city"]})),
            },
            Arc::new(WeatherHandler),
        );
        let executor = Arc::new(ToolExecutor::new(Arc::clone(&registry), SafetyConfig::default()));
        let provider = TwoTurnWeatherProvider::new(0);
        let req = TextRequest::builder()
            .model("mock")
            .message(ChatMessage::user("What's the weather in SF?"))
            .build()
            .expect("build request");

        let response = execute_with_tools(&provider, &registry, &executor, &req, None)
            .await
            .expect("orchestration");

        assert_eq!(response.text, "The weather in SF is 72°F and sunny.");
        assert_eq!(provider.call_count.load(Ordering::SeqCst), 2);
    }

    struct AlwaysToolCallsProvider {
        caps: ProviderCapabilities,
    }

    impl AlwaysToolCallsProvider {
        fn new() -> Self {
            Self {
                caps: ProviderCapabilities::new("mock", [Capability::Text, Capability::ToolCalling]),
            }
        }
    }

    #[async_trait]
    impl Provider for AlwaysToolCallsProvider {
        async fn text(&self, _req: &TextRequest) -> Result<TextResponse, Error> {
            Ok(TextResponse {
                id: llm_core::RequestId::generate(),
                model: "mock".to_string(),
                text: String::new(),
                tool_calls: Some(vec![ToolCall {
                    id: "c1".to_string(),
                    function: FunctionCall {
                        name: "noop".to_string(),
                        arguments: "{}".to_string(),
                    },
                }]),
                finish_reason: FinishReason::ToolCalls,
                usage: None,
            })
        }

        async fn stream(&self, _req: &TextRequest) -> Result<TextChunkStream, Error> {
            unimplemented!()
        }
        async fn structured(&self, _req: &StructuredRequest) -> Result<StructuredResponse, Error> {
            unimplemented!()
        }
        async fn embeddings(&self, _req: &EmbeddingsRequest) -> Result<EmbeddingsResponse, Error> {
            unimplemented!()
        }
        async fn generate_image(&self, _req: &ImageRequest) -> Result<ImageResponse, Error> {
            unimplemented!()
        }
        async fn audio(&self, _req: &AudioRequest) -> Result<AudioResponse, Error> {
            unimplemented!()
        }
        fn name(&self) -> &str {
            "mock"
        }
        fn capabilities(&self) -> &ProviderCapabilities {
            &self.caps
        }
    }

    struct NoopHandler;

    #[async_trait]
    impl crate::registry::ToolHandler for NoopHandler {
        async fn call(&self, _arguments: serde_json::Value) -> Result<serde_json::Value, Error> {
            Ok(serde_json::Value::Null)
        }
    }

    #[tokio::test]
    async fn exhausted_iterations_returns_error_not_a_tool_asking_response() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(
            ToolDefinition {
                name: "noop".to_string(),
                description: None,
                input_schema: None,
            },
            Arc::new(NoopHandler),
        );
        let executor = Arc::new(ToolExecutor::new(Arc::clone(&registry), SafetyConfig::default()));
        let provider = AlwaysToolCallsProvider::new();
        let req = TextRequest::builder()
            .model("mock")
            .message(ChatMessage::user("loop forever"))
            .build()
            .expect("build request");

        let result = execute_with_tools(&provider, &registry, &executor, &req, Some(3)).await;
        assert!(matches!(result, Err(Error::ToolIterationExhausted { .. })));
    }

    #[tokio::test]
    async fn loop_never_mutates_callers_request() {
        let registry = Arc::new(ToolRegistry::new());
        let executor = Arc::new(ToolExecutor::new(Arc::clone(&registry), SafetyConfig::default()));
        let provider = TwoTurnWeatherProvider::new(1); // first call returns final response immediately
        let req = TextRequest::builder()
            .model("mock")
            .message(ChatMessage::user("hi"))
            .build()
            .expect("build request");
        let original_len = req.messages.len();

        let _ = execute_with_tools(&provider, &registry, &executor, &req, None).await;
        assert_eq!(req.messages.len(), original_len);
    }
}
