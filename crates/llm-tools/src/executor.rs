//! Tool executor: safety controls around registered handler invocation.

use crate::registry::ToolRegistry;
use llm_core::{ChatMessage, Error, ToolCall};
use llm_governor::{AdaptiveConfig, AdaptiveState};
use llm_resilience::{retry_with_backoff, CircuitBreaker, CircuitBreakerConfig, RetryConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Safety controls for tool execution (spec §4.5). Validation clamps negative or nonsensical
/// values to safe defaults; `max_concurrent_tools == 0` means unlimited.
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    /// Cap on tools executing concurrently within one `ExecuteAll` fan-out. `0` means unlimited.
    pub max_concurrent_tools: u32,
    /// Per-call timeout. `Duration::ZERO` means unbounded.
    pub tool_timeout: Duration,
    /// Number of retries per tool call. `0` disables the retry executor.
    pub max_retries_per_tool: u32,
    /// Whether a circuit breaker guards the executor as a whole.
    pub enable_circuit_breaker: bool,
    /// Consecutive failures before the breaker opens.
    pub breaker_threshold: u32,
    /// Time the breaker stays open before probing.
    pub breaker_reset_timeout: Duration,
    /// Whether tool-call arguments are validated against the tool's schema before invocation.
    pub enable_input_validation: bool,
    /// Serialized tool output larger than this many bytes is rejected as a tool failure.
    pub max_tool_output_size: usize,
    /// When set, `max_concurrent_tools` is ignored and the executor's fan-out is instead gated
    /// by a PID-controlled [`AdaptiveState`] that resizes itself from observed tool latency and
    /// error rate, the same mechanism the governor uses per-provider (spec §4.5).
    pub enable_adaptive_concurrency: bool,
    /// Target average tool latency the adaptive controller steers toward.
    pub adaptive_target_latency: Duration,
    /// Minimum concurrency the adaptive controller may shrink to.
    pub adaptive_min_capacity: u32,
    /// Maximum concurrency the adaptive controller may grow to.
    pub adaptive_max_capacity: u32,
    /// Bounded percentile-sample window backing the adaptive controller.
    pub adaptive_window: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tools: 8,
            tool_timeout: Duration::from_secs(30),
            max_retries_per_tool: 0,
            enable_circuit_breaker: true,
            breaker_threshold: 5,
            breaker_reset_timeout: Duration::from_secs(30),
            enable_input_validation: true,
            max_tool_output_size: 1_000_000,
            enable_adaptive_concurrency: false,
            adaptive_target_latency: Duration::from_millis(500),
            adaptive_min_capacity: 1,
            adaptive_max_capacity: 64,
            adaptive_window: 512,
        }
    }
}

impl SafetyConfig {
    /// Clamp nonsensical values (the spec names this "validation", distinct from schema
    /// validation) to safe defaults rather than rejecting construction outright.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.breaker_threshold == 0 {
            self.breaker_threshold = Self::default().breaker_threshold;
        }
        if self.max_tool_output_size == 0 {
            self.max_tool_output_size = Self::default().max_tool_output_size;
        }
        self
    }
}

/// Outcome of a single tool call: either a JSON result or an error string, never both.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// The tool call ID this result answers.
    pub tool_call_id: String,
    /// Success payload, when the handler succeeded.
    pub result: Option<serde_json::Value>,
    /// Failure message, when the handler (or a safety control) rejected the call.
    pub error: Option<String>,
}

impl ToolResult {
    fn ok(tool_call_id: String, result: serde_json::Value) -> Self {
        Self {
            tool_call_id,
            result: Some(result),
            error: None,
        }
    }

    fn err(tool_call_id: String, error: impl Into<String>) -> Self {
        Self {
            tool_call_id,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// The fan-out gate an in-flight `execute_all` call acquires a slot from.
enum Concurrency {
    /// Fixed-capacity semaphore (or unbounded, when `None`).
    Fixed(Option<llm_resilience::BoundedSemaphore>),
    /// PID-controlled capacity that resizes itself from observed latency/error-rate.
    Adaptive(Arc<AdaptiveState>),
}

/// Executes registered tool calls under the configured safety controls.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    config: SafetyConfig,
    breaker: Option<CircuitBreaker>,
    concurrency: Concurrency,
}

impl ToolExecutor {
    /// Build an executor over `registry` with `config`.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, config: SafetyConfig) -> Self {
        let config = config.normalized();
        let breaker = config.enable_circuit_breaker.then(|| {
            CircuitBreaker::new(
                "tool-executor",
                CircuitBreakerConfig {
                    threshold: config.breaker_threshold,
                    reset_timeout: config.breaker_reset_timeout,
                    max_half_open_calls: 1,
                },
            )
        });
        let concurrency = if config.enable_adaptive_concurrency {
            Concurrency::Adaptive(Arc::new(AdaptiveState::new(
                "tool-executor",
                AdaptiveConfig {
                    target_latency: config.adaptive_target_latency,
                    min_capacity: config.adaptive_min_capacity,
                    max_capacity: config.adaptive_max_capacity,
                    initial_capacity: config
                        .max_concurrent_tools
                        .clamp(config.adaptive_min_capacity, config.adaptive_max_capacity),
                    window: config.adaptive_window,
                    ..AdaptiveConfig::default()
                },
            )))
        } else {
            Concurrency::Fixed(
                (config.max_concurrent_tools > 0)
                    .then(|| llm_resilience::BoundedSemaphore::new("tool-executor", config.max_concurrent_tools)),
            )
        };
        Self {
            registry,
            config,
            breaker,
            concurrency,
        }
    }

    /// Current fan-out capacity, when bounded. `None` when running unbounded (fixed mode with
    /// `max_concurrent_tools == 0`).
    #[must_use]
    pub fn current_capacity(&self) -> Option<u32> {
        match &self.concurrency {
            Concurrency::Fixed(Some(sem)) => Some(sem.capacity()),
            Concurrency::Fixed(None) => None,
            Concurrency::Adaptive(state) => Some(state.capacity()),
        }
    }

    /// Run one adaptive capacity-adjustment step. A no-op when adaptive concurrency is disabled.
    pub fn adjust_adaptive_capacity(&self) {
        if let Concurrency::Adaptive(state) = &self.concurrency {
            state.adjust();
        }
    }

    /// Execute a single tool call end to end (breaker check, lookup, validation, timeout,
    /// optional retry, breaker recording).
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        if let Some(breaker) = &self.breaker {
            if breaker.try_acquire().is_err() {
                return ToolResult::err(call.id.clone(), "circuit breaker tripped");
            }
        }

        let Some(tool) = self.registry.get(&call.function.name) else {
            self.record_failure();
            return ToolResult::err(call.id.clone(), format!("tool '{}' is not registered", call.function.name));
        };

        let arguments: serde_json::Value = match serde_json::from_str(&call.function.arguments) {
            Ok(value) => value,
            Err(e) => {
                self.record_failure();
                return ToolResult::err(call.id.clone(), format!("invalid tool arguments: {e}"));
            }
        };

        if self.config.enable_input_validation {
            if let Some(schema) = &tool.definition.input_schema {
                if let Err(e) = validate_against_schema(schema, &arguments) {
                    self.record_failure();
                    return ToolResult::err(call.id.clone(), format!("argument validation failed: {e}"));
                }
            }
        }

        let outcome = self.invoke(&tool.handler, arguments).await;

        match outcome {
            Ok(value) => match serde_json::to_vec(&value) {
                Ok(bytes) if bytes.len() > self.config.max_tool_output_size => {
                    self.record_failure();
                    ToolResult::err(call.id.clone(), "tool output exceeds max_tool_output_size")
                }
                _ => {
                    self.record_success();
                    ToolResult::ok(call.id.clone(), value)
                }
            },
            Err(e) => {
                self.record_failure();
                ToolResult::err(call.id.clone(), e.to_string())
            }
        }
    }

    async fn invoke(
        &self,
        handler: &Arc<dyn crate::registry::ToolHandler>,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, Error> {
        let run = || {
            let handler = Arc::clone(handler);
            let arguments = arguments.clone();
            async move { handler.call(arguments).await }
        };

        let future = async {
            if self.config.max_retries_per_tool > 0 {
                retry_with_backoff(RetryConfig::with_max_retries(self.config.max_retries_per_tool), run).await
            } else {
                run().await
            }
        };

        if self.config.tool_timeout.is_zero() {
            future.await
        } else {
            match tokio::time::timeout(self.config.tool_timeout, future).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(self.config.tool_timeout.as_millis() as u64)),
            }
        }
    }

    fn record_success(&self) {
        if let Some(breaker) = &self.breaker {
            breaker.record_success();
        }
    }

    fn record_failure(&self) {
        if let Some(breaker) = &self.breaker {
            breaker.record_failure();
        }
    }

    /// Execute every call in `calls` concurrently, gated by the executor's semaphore, preserving
    /// input order in the returned vector. Each call runs in its own task for panic isolation,
    /// which is why this takes `self` behind an `Arc`.
    pub async fn execute_all(self: &Arc<Self>, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut slots: Vec<Option<ToolResult>> = (0..calls.len()).map(|_| None).collect();
        let mut handles = Vec::with_capacity(calls.len());

        for (index, call) in calls.iter().enumerate() {
            let call = call.clone();
            let executor = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let adaptive_permit = match &executor.concurrency {
                    Concurrency::Adaptive(state) => state.semaphore().acquire().await.ok(),
                    Concurrency::Fixed(_) => None,
                };
                let _fixed_permit = match &executor.concurrency {
                    Concurrency::Fixed(Some(sem)) => sem.acquire().await.ok(),
                    Concurrency::Fixed(None) | Concurrency::Adaptive(_) => None,
                };

                let started = Instant::now();
                let result = executor.execute(&call).await;
                if let Concurrency::Adaptive(state) = &executor.concurrency {
                    state.record(started.elapsed(), result.error.is_some());
                }
                drop(adaptive_permit);
                (index, result)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((index, result)) => slots[index] = Some(result),
                Err(join_err) => {
                    if join_err.is_panic() {
                        error!("tool execution panicked");
                    } else {
                        warn!("tool execution task was cancelled");
                    }
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| slot.unwrap_or_else(|| ToolResult::err(format!("unknown-{i}"), "tool task did not complete")))
            .collect()
    }

    /// Build the single provider-agnostic tool-result message from a batch of results. The
    /// message carries the first call's ID for providers that key results by ID.
    #[must_use]
    pub fn build_tool_result_message(results: &[ToolResult]) -> ChatMessage {
        let first_id = results
            .first()
            .map(|r| r.tool_call_id.clone())
            .unwrap_or_default();

        let content = results
            .iter()
            .map(|r| match (&r.result, &r.error) {
                (Some(value), _) => format!("Tool {} result: {}", r.tool_call_id, value),
                (None, Some(err)) => format!("Tool {} failed: {}", r.tool_call_id, err),
                (None, None) => format!("Tool {} result: null", r.tool_call_id),
            })
            .collect::<Vec<_>>()
            .join("\n");

        ChatMessage::tool(first_id, content)
    }
}

fn validate_against_schema(schema: &serde_json::Value, arguments: &serde_json::Value) -> Result<(), String> {
    let is_empty_schema = schema
        .as_object()
        .map(|obj| obj.is_empty())
        .unwrap_or(false);
    if is_empty_schema {
        return Ok(());
    }

    let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
        return Ok(());
    };
    let Some(args_obj) = arguments.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };
    for field in required {
        let Some(name) = field.as_str() else { continue };
        if !args_obj.contains_key(name) {
            return Err(format!("missing required field '{name}'"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llm_core::{FunctionCall, ToolDefinition};

    struct EchoHandler;

    #[async_trait]
    impl crate::registry::ToolHandler for EchoHandler {
        async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value, Error> {
            Ok(arguments)
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl crate::registry::ToolHandler for FailingHandler {
        async fn call(&self, _arguments: serde_json::Value) -> Result<serde_json::Value, Error> {
            Err(Error::validation("handler always fails", None, "handler_error"))
        }
    }

    fn call(id: &str, name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: args.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn missing_tool_returns_error_result() {
        let registry = Arc::new(ToolRegistry::new());
        let executor = ToolExecutor::new(registry, SafetyConfig::default());
        let result = executor.execute(&call("c1", "missing", "{}")).await;
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn successful_handler_returns_result() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(
            ToolDefinition {
                name: "echo".to_string(),
                description: None,
                input_schema: None,
            },
            Arc::new(EchoHandler),
        );
        let executor = ToolExecutor::new(registry, SafetyConfig::default());
        let result = executor.execute(&call("c1", "echo", r#"{"x":1}"#)).await;
        assert!(result.result.is_some());
    }

    #[tokio::test]
    async fn schema_validation_rejects_missing_required_field() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(
            ToolDefinition {
                name: "echo".to_string(),
                description: None,
                input_schema: Some(serde_json::json!({"required": ["city"]})),
            },
            Arc::new(EchoHandler),
        );
        let executor = ToolExecutor::new(registry, SafetyConfig::default());
        let result = executor.execute(&call("c1", "echo", "{}")).await;
        assert!(result.error.unwrap().contains("city"));
    }

    #[tokio::test]
    async fn breaker_trips_after_threshold_failures() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(
            ToolDefinition {
                name: "fail".to_string(),
                description: None,
                input_schema: None,
            },
            Arc::new(FailingHandler),
        );
        let executor = ToolExecutor::new(
            registry,
            SafetyConfig {
                breaker_threshold: 2,
                enable_circuit_breaker: true,
                ..SafetyConfig::default()
            },
        );
        executor.execute(&call("c1", "fail", "{}")).await;
        executor.execute(&call("c2", "fail", "{}")).await;
        let tripped = executor.execute(&call("c3", "fail", "{}")).await;
        assert_eq!(tripped.error.unwrap(), "circuit breaker tripped");
    }

    #[tokio::test]
    async fn execute_all_preserves_input_order() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(
            ToolDefinition {
                name: "echo".to_string(),
                description: None,
                input_schema: None,
            },
            Arc::new(EchoHandler),
        );
        let executor = Arc::new(ToolExecutor::new(registry, SafetyConfig::default()));
        let calls = vec![
            call("c1", "echo", r#"{"n":1}"#),
            call("c2", "echo", r#"{"n":2}"#),
            call("c3", "echo", r#"{"n":3}"#),
        ];
        let results = executor.execute_all(&calls).await;
        assert_eq!(results[0].tool_call_id, "c1");
        assert_eq!(results[1].tool_call_id, "c2");
        assert_eq!(results[2].tool_call_id, "c3");
    }

    #[tokio::test]
    async fn adaptive_concurrency_tracks_capacity_and_records_outcomes() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(
            ToolDefinition {
                name: "echo".to_string(),
                description: None,
                input_schema: None,
            },
            Arc::new(EchoHandler),
        );
        let executor = Arc::new(ToolExecutor::new(
            registry,
            SafetyConfig {
                enable_adaptive_concurrency: true,
                adaptive_min_capacity: 1,
                adaptive_max_capacity: 4,
                ..SafetyConfig::default()
            },
        ));
        assert_eq!(executor.current_capacity(), Some(4));

        let calls = vec![
            call("c1", "echo", r#"{"n":1}"#),
            call("c2", "echo", r#"{"n":2}"#),
        ];
        let results = executor.execute_all(&calls).await;
        assert!(results.iter().all(|r| r.result.is_some()));

        executor.adjust_adaptive_capacity();
        assert!(executor.current_capacity().unwrap() >= 1);
    }

    #[test]
    fn build_tool_result_message_uses_first_id() {
        let results = vec![
            ToolResult::ok("c1".to_string(), serde_json::json!({"temp": 72})),
            ToolResult::err("c2".to_string(), "boom"),
        ];
        let message = ToolExecutor::build_tool_result_message(&results);
        assert_eq!(message.tool_call_id.as_deref(), Some("c1"));
    }
}
