//! Anthropic Messages API provider implementation.
//!
//! Wire shape only: the `/v1/messages` request/response envelope, `system` lifted out of the
//! message list, and `tool_use`/`tool_result` content blocks. Per-parameter coverage beyond this
//! shared shape (e.g. every vendor-specific sampling knob) is not a goal (spec §1).

use async_stream::try_stream;
use async_trait::async_trait;
use llm_core::{
    AudioRequest, AudioResponse, Capability, ChatMessage, EmbeddingsRequest,
    EmbeddingsResponse, Error, FinishReason, FunctionCall, ImageRequest, ImageResponse,
    MessageContent, MessageRole, Provider, ProviderCapabilities, ProviderConfig, ProviderFactory,
    RequestId, Result, StructuredRequest, StructuredResponse, TextChunk, TextChunkStream,
    TextRequest, TextResponse, ToolCall, ToolDefinition, Usage,
};
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_TIMEOUT_SECONDS: u64 = 60;
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// An Anthropic Messages API provider.
pub struct AnthropicProvider {
    name: String,
    client: Client,
    base_url: String,
    api_key: llm_core::ApiKey,
    capabilities: ProviderCapabilities,
}

impl AnthropicProvider {
    /// Build a provider registered under `name` from a resolved [`ProviderConfig`].
    ///
    /// # Errors
    /// Returns [`Error::Auth`] if no API key is configured, or a transport error if the
    /// underlying HTTP client cannot be constructed.
    pub fn new(name: impl Into<String>, config: ProviderConfig) -> Result<Self> {
        let name = name.into();
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Error::auth(format!("{name} requires an api_key")))?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout = Duration::from_secs(config.effective_timeout(DEFAULT_TIMEOUT_SECONDS));

        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            Error::provider(format!("failed to build http client: {e}"), name.clone())
        })?;

        let capabilities = ProviderCapabilities::new(
            name.clone(),
            [
                Capability::Text,
                Capability::Streaming,
                Capability::ToolCalling,
                Capability::Vision,
            ],
        );

        Ok(Self {
            name,
            client,
            base_url,
            api_key,
            capabilities,
        })
    }

    /// A [`ProviderFactory`] that builds an [`AnthropicProvider`] registered under `name`.
    #[must_use]
    pub fn factory(name: impl Into<String>) -> ProviderFactory {
        let name = name.into();
        Arc::new(move |config: ProviderConfig| {
            let provider = Self::new(name.clone(), config)?;
            Ok(Arc::new(provider) as Arc<dyn Provider>)
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
    }

    fn messages_request(&self, req: &TextRequest, stream: bool) -> MessagesRequest {
        let (system, messages) = split_system(&req.messages);

        MessagesRequest {
            model: req.model.clone(),
            max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            system,
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            stop_sequences: req.stop.clone(),
            stream,
            tools: req
                .tools
                .as_ref()
                .map(|tools| tools.iter().map(to_wire_tool).collect()),
        }
    }

    async fn send_messages(&self, body: &MessagesRequest) -> Result<reqwest::Response> {
        let url = self.endpoint("/messages");
        debug!(provider = %self.name, model = %body.model, "sending messages request");

        let response = self
            .authed(self.client.post(&url))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::provider(format!("request failed: {e}"), self.name.clone()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(&self.name, status.as_u16(), &text));
        }
        Ok(response)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn text(&self, req: &TextRequest) -> Result<TextResponse> {
        let body = self.messages_request(req, false);
        let response = self.send_messages(&body).await?;
        let text = response.text().await.map_err(|e| {
            Error::provider(format!("failed to read response body: {e}"), self.name.clone())
        })?;
        trace!(body = %text, "received messages response");

        let wire: MessagesResponse = serde_json::from_str(&text).map_err(|e| {
            Error::provider(format!("invalid response JSON: {e}"), self.name.clone())
        })?;
        from_wire_response(wire)
    }

    async fn stream(&self, req: &TextRequest) -> Result<TextChunkStream> {
        let body = self.messages_request(req, true);
        let url = self.endpoint("/messages");
        let builder = self.authed(self.client.post(&url)).json(&body);

        let mut source = EventSource::new(builder)
            .map_err(|e| Error::provider(format!("failed to open event stream: {e}"), self.name.clone()))?;

        let provider_name = self.name.clone();
        let stream = try_stream! {
            use futures::StreamExt;

            let mut text_so_far_index = 0u32;
            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => continue,
                    Ok(Event::Message(message)) => {
                        let event: StreamEvent = match serde_json::from_str(&message.data) {
                            Ok(e) => e,
                            Err(e) => {
                                warn!(error = %e, "skipping malformed stream event");
                                continue;
                            }
                        };
                        match event {
                            StreamEvent::ContentBlockDelta { index, delta } => {
                                text_so_far_index = index;
                                if let Some(text) = delta.text {
                                    yield TextChunk {
                                        index,
                                        delta: text,
                                        tool_calls: None,
                                        finish_reason: None,
                                        usage: None,
                                    };
                                }
                            }
                            StreamEvent::MessageDelta { delta, usage } => {
                                yield TextChunk {
                                    index: text_so_far_index,
                                    delta: String::new(),
                                    tool_calls: None,
                                    finish_reason: delta.stop_reason.as_deref().map(map_stop_reason),
                                    usage: usage.map(to_core_usage),
                                };
                            }
                            StreamEvent::MessageStop => {
                                source.close();
                                break;
                            }
                            StreamEvent::Other => continue,
                        }
                    }
                    Err(e) => {
                        source.close();
                        Err(Error::provider(format!("stream error: {e}"), provider_name.clone()))?;
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn structured(&self, _req: &StructuredRequest) -> Result<StructuredResponse> {
        Err(Error::unsupported(self.name.clone(), "structured output"))
    }

    async fn embeddings(&self, _req: &EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        Err(Error::unsupported(self.name.clone(), "embeddings"))
    }

    async fn generate_image(&self, _req: &ImageRequest) -> Result<ImageResponse> {
        Err(Error::unsupported(self.name.clone(), "image generation"))
    }

    async fn audio(&self, _req: &AudioRequest) -> Result<AudioResponse> {
        Err(Error::unsupported(self.name.clone(), "audio"))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }
}

/// Lift system messages out of the conversation (Anthropic's `system` is a top-level field, not
/// a message role) and translate tool-result messages into `tool_result` content blocks.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<WireMessage>) {
    let mut system_parts = Vec::new();
    let mut wire = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            MessageRole::System => {
                if let Some(text) = message.content.as_text() {
                    system_parts.push(text.to_string());
                }
            }
            MessageRole::User => wire.push(WireMessage {
                role: "user".to_string(),
                content: vec![WireContentBlock::Text {
                    text: extract_text(&message.content),
                }],
            }),
            MessageRole::Assistant => {
                let mut blocks = Vec::new();
                let text = extract_text(&message.content);
                if !text.is_empty() {
                    blocks.push(WireContentBlock::Text { text });
                }
                for call in message.tool_calls.iter().flatten() {
                    blocks.push(WireContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.function.name.clone(),
                        input: serde_json::from_str(&call.function.arguments)
                            .unwrap_or(serde_json::Value::Null),
                    });
                }
                wire.push(WireMessage {
                    role: "assistant".to_string(),
                    content: blocks,
                });
            }
            MessageRole::Tool => wire.push(WireMessage {
                role: "user".to_string(),
                content: vec![WireContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: extract_text(&message.content),
                }],
            }),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };
    (system, wire)
}

fn extract_text(content: &MessageContent) -> String {
    content.as_text().map(str::to_string).unwrap_or_default()
}

fn to_wire_tool(def: &ToolDefinition) -> WireTool {
    WireTool {
        name: def.name.clone(),
        description: def.description.clone(),
        input_schema: def
            .input_schema
            .clone()
            .unwrap_or_else(|| serde_json::json!({"type": "object"})),
    }
}

fn from_wire_response(wire: MessagesResponse) -> Result<TextResponse> {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in wire.content {
        match block {
            WireContentBlock::Text { text: t } => text.push_str(&t),
            WireContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                function: FunctionCall {
                    name,
                    arguments: serde_json::to_string(&input).unwrap_or_default(),
                },
            }),
            WireContentBlock::ToolResult { .. } => {}
        }
    }

    let finish_reason = wire
        .stop_reason
        .as_deref()
        .map(map_stop_reason)
        .unwrap_or(FinishReason::Stop);

    Ok(TextResponse {
        id: RequestId::generate(),
        model: wire.model,
        text,
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        finish_reason,
        usage: Some(to_core_usage(wire.usage)),
    })
}

fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        other => FinishReason::Other(other.to_string()),
    }
}

fn to_core_usage(usage: WireUsage) -> Usage {
    Usage::new(usage.input_tokens, usage.output_tokens)
}

fn parse_error(provider: &str, status: u16, body: &str) -> Error {
    #[derive(Deserialize)]
    struct WireErrorBody {
        error: WireErrorDetail,
    }
    #[derive(Deserialize)]
    struct WireErrorDetail {
        message: String,
    }

    let message = serde_json::from_str::<WireErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| format!("HTTP {status}: {body}"));

    match status {
        401 => Error::auth(message),
        429 => Error::rate_limit(message),
        400 => Error::validation(message, None, "bad_request"),
        _ => Error::provider(message, provider.to_string()),
    }
}

// Wire types for Anthropic's Messages API.

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: Vec<WireContentBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<WireContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { index: u32, delta: StreamDelta },
    MessageDelta { delta: MessageDeltaPayload, #[serde(default)] usage: Option<WireUsage> },
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaPayload {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_core::ApiKey;

    fn config() -> ProviderConfig {
        ProviderConfig {
            api_key: Some(ApiKey::new("sk-ant-test")),
            base_url: None,
            timeout_seconds: 0,
            dynamic_models: false,
        }
    }

    #[test]
    fn new_requires_api_key() {
        assert!(AnthropicProvider::new("anthropic", ProviderConfig::default()).is_err());
    }

    #[test]
    fn new_defaults_base_url() {
        let provider = AnthropicProvider::new("anthropic", config()).expect("build");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn split_system_lifts_system_messages_out() {
        let messages = vec![
            ChatMessage::system("You are terse."),
            ChatMessage::user("Hi"),
        ];
        let (system, wire) = split_system(&messages);
        assert_eq!(system, Some("You are terse.".to_string()));
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].role, "user");
    }

    #[test]
    fn split_system_translates_tool_result_to_user_block() {
        let messages = vec![ChatMessage::tool("call-1", "72 degrees")];
        let (_, wire) = split_system(&messages);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].role, "user");
        match &wire[0].content[0] {
            WireContentBlock::ToolResult { tool_use_id, content } => {
                assert_eq!(tool_use_id, "call-1");
                assert_eq!(content, "72 degrees");
            }
            _ => panic!("expected tool result block"),
        }
    }

    #[test]
    fn assistant_tool_calls_become_tool_use_blocks() {
        let messages = vec![ChatMessage::assistant(
            "",
            Some(vec![ToolCall {
                id: "c1".to_string(),
                function: FunctionCall {
                    name: "get_weather".to_string(),
                    arguments: r#"{"city":"SF"}"#.to_string(),
                },
            }]),
        )];
        let (_, wire) = split_system(&messages);
        assert_eq!(wire[0].content.len(), 1);
        match &wire[0].content[0] {
            WireContentBlock::ToolUse { name, .. } => assert_eq!(name, "get_weather"),
            _ => panic!("expected tool use block"),
        }
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(map_stop_reason("end_turn"), FinishReason::Stop);
        assert_eq!(map_stop_reason("tool_use"), FinishReason::ToolCalls);
        assert_eq!(map_stop_reason("max_tokens"), FinishReason::Length);
    }

    #[test]
    fn capabilities_do_not_include_embeddings() {
        let provider = AnthropicProvider::new("anthropic", config()).expect("build");
        assert!(!provider.capabilities().supports(Capability::Embeddings));
        assert!(provider.capabilities().supports(Capability::ToolCalling));
    }

    #[tokio::test]
    async fn embeddings_is_unsupported() {
        let provider = AnthropicProvider::new("anthropic", config()).expect("build");
        let req = EmbeddingsRequest {
            id: RequestId::generate(),
            model: "claude-3-5-sonnet".to_string(),
            input: vec!["hi".to_string()],
            dimensions: None,
        };
        assert!(matches!(provider.embeddings(&req).await, Err(Error::Unsupported { .. })));
    }
}
