//! OpenAI-wire-compatible provider implementation.
//!
//! Covers OpenAI itself and any gateway that speaks the same `/chat/completions` wire format
//! (OpenRouter, Groq, Mistral, LMStudio, vLLM, Together AI) — only the base URL and API key
//! differ. Per-provider parameter coverage beyond this shared shape is not a goal (spec §1).

use async_stream::try_stream;
use async_trait::async_trait;
use llm_core::{
    AudioKind, AudioRequest, AudioResponse, Capability, ChatMessage, EmbeddingsRequest,
    EmbeddingsResponse, Error, FinishReason, FunctionCall, GeneratedImage, ImageRequest,
    ImageResponse, Provider, ProviderCapabilities, ProviderConfig, ProviderFactory, RequestId,
    Result, StructuredRequest, StructuredResponse, TextChunk, TextChunkStream, TextRequest,
    TextResponse, ToolCall, ToolDefinition, Usage,
};
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

/// An OpenAI-wire-compatible provider.
///
/// `name` is the registration name (e.g. `"openai"`, `"openrouter"`, `"groq"`); the wire format
/// it speaks is fixed, only `base_url` and the API key vary between deployments.
pub struct OpenAIProvider {
    name: String,
    client: Client,
    base_url: String,
    api_key: llm_core::ApiKey,
    capabilities: ProviderCapabilities,
}

impl OpenAIProvider {
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
                Capability::Structured,
                Capability::Embeddings,
                Capability::Images,
                Capability::Audio,
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

    /// A [`ProviderFactory`] that builds an [`OpenAIProvider`] registered under `name`.
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
        builder.bearer_auth(self.api_key.expose())
    }

    fn chat_request(&self, req: &TextRequest, stream: bool) -> ChatCompletionsRequest {
        ChatCompletionsRequest {
            model: req.model.clone(),
            messages: req.messages.iter().map(to_wire_message).collect(),
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            top_p: req.top_p,
            stop: req.stop.clone(),
            stream,
            tools: req.tools.as_ref().map(|tools| tools.iter().map(to_wire_tool).collect()),
            response_format: None,
        }
    }

    async fn send_chat(&self, body: &ChatCompletionsRequest) -> Result<reqwest::Response> {
        let url = self.endpoint("/chat/completions");
        debug!(provider = %self.name, model = %body.model, "sending chat completion request");

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
impl Provider for OpenAIProvider {
    async fn text(&self, req: &TextRequest) -> Result<TextResponse> {
        let body = self.chat_request(req, false);
        let response = self.send_chat(&body).await?;
        let text = response.text().await.map_err(|e| {
            Error::provider(format!("failed to read response body: {e}"), self.name.clone())
        })?;
        trace!(body = %text, "received chat completion response");

        let wire: ChatCompletionsResponse = serde_json::from_str(&text).map_err(|e| {
            Error::provider(format!("invalid response JSON: {e}"), self.name.clone())
        })?;
        from_wire_response(wire, &req.model)
    }

    async fn stream(&self, req: &TextRequest) -> Result<TextChunkStream> {
        let body = self.chat_request(req, true);
        let url = self.endpoint("/chat/completions");
        let builder = self.authed(self.client.post(&url)).json(&body);

        let mut source = EventSource::new(builder)
            .map_err(|e| Error::provider(format!("failed to open event stream: {e}"), self.name.clone()))?;

        let provider_name = self.name.clone();
        let stream = try_stream! {
            use futures::StreamExt;

            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => continue,
                    Ok(Event::Message(message)) => {
                        if message.data == "[DONE]" {
                            source.close();
                            break;
                        }
                        let chunk: ChatCompletionChunk = match serde_json::from_str(&message.data) {
                            Ok(c) => c,
                            Err(e) => {
                                warn!(error = %e, "skipping malformed stream chunk");
                                continue;
                            }
                        };
                        if let Some(choice) = chunk.choices.into_iter().next() {
                            yield TextChunk {
                                index: choice.index,
                                delta: choice.delta.content.unwrap_or_default(),
                                tool_calls: choice.delta.tool_calls.map(|calls| {
                                    calls.into_iter().map(to_core_tool_call).collect()
                                }),
                                finish_reason: choice.finish_reason.as_deref().map(map_finish_reason),
                                usage: chunk.usage.map(to_core_usage),
                            };
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

    async fn structured(&self, req: &StructuredRequest) -> Result<StructuredResponse> {
        let mut body = self.chat_request(&req.base, false);
        body.response_format = Some(ResponseFormat {
            format_type: "json_schema".to_string(),
            json_schema: Some(JsonSchemaFormat {
                name: "response".to_string(),
                schema: req.schema.clone(),
                strict: true,
            }),
        });

        let response = self.send_chat(&body).await?;
        let text = response.text().await.map_err(|e| {
            Error::provider(format!("failed to read response body: {e}"), self.name.clone())
        })?;
        let wire: ChatCompletionsResponse = serde_json::from_str(&text).map_err(|e| {
            Error::provider(format!("invalid response JSON: {e}"), self.name.clone())
        })?;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider("no choices in response", self.name.clone()))?;
        let data: serde_json::Value = serde_json::from_str(&choice.message.content.unwrap_or_default())
            .map_err(|e| Error::provider(format!("structured output was not valid JSON: {e}"), self.name.clone()))?;

        Ok(StructuredResponse {
            id: RequestId::generate(),
            model: wire.model,
            data,
            usage: wire.usage.map(to_core_usage),
        })
    }

    async fn embeddings(&self, req: &EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let url = self.endpoint("/embeddings");
        let body = EmbeddingsWireRequest {
            model: req.model.clone(),
            input: req.input.clone(),
            dimensions: req.dimensions,
        };

        let response = self
            .authed(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::provider(format!("request failed: {e}"), self.name.clone()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(parse_error(&self.name, status.as_u16(), &text));
        }

        let wire: EmbeddingsWireResponse = serde_json::from_str(&text).map_err(|e| {
            Error::provider(format!("invalid response JSON: {e}"), self.name.clone())
        })?;

        Ok(EmbeddingsResponse {
            model: req.model.clone(),
            embeddings: wire.data.into_iter().map(|d| d.embedding).collect(),
            usage: wire.usage.map(to_core_usage),
        })
    }

    async fn generate_image(&self, req: &ImageRequest) -> Result<ImageResponse> {
        let url = self.endpoint("/images/generations");
        let body = ImageWireRequest {
            model: req.model.clone(),
            prompt: req.prompt.clone(),
            size: req.size.clone(),
            n: req.n,
        };

        let response = self
            .authed(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::provider(format!("request failed: {e}"), self.name.clone()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(parse_error(&self.name, status.as_u16(), &text));
        }

        let wire: ImageWireResponse = serde_json::from_str(&text).map_err(|e| {
            Error::provider(format!("invalid response JSON: {e}"), self.name.clone())
        })?;

        let images = wire
            .data
            .into_iter()
            .map(|d| match d.url {
                Some(url) => GeneratedImage::Url(url),
                None => GeneratedImage::Base64(d.b64_json.unwrap_or_default()),
            })
            .collect();

        Ok(ImageResponse {
            model: req.model.clone(),
            images,
        })
    }

    async fn audio(&self, req: &AudioRequest) -> Result<AudioResponse> {
        match req.kind {
            AudioKind::Synthesize => {
                let url = self.endpoint("/audio/speech");
                let body = SpeechWireRequest {
                    model: req.model.clone(),
                    input: req.text.clone().unwrap_or_default(),
                    voice: "alloy".to_string(),
                };
                let response = self
                    .authed(self.client.post(&url))
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| Error::provider(format!("request failed: {e}"), self.name.clone()))?;

                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(parse_error(&self.name, status.as_u16(), &text));
                }
                let bytes = response.bytes().await.map_err(|e| {
                    Error::provider(format!("failed to read audio body: {e}"), self.name.clone())
                })?;

                Ok(AudioResponse {
                    model: req.model.clone(),
                    text: None,
                    audio: Some(bytes.to_vec()),
                })
            }
            AudioKind::Transcribe => Err(Error::unsupported(
                self.name.clone(),
                "audio transcription (multipart upload not implemented)",
            )),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }
}

fn to_wire_message(message: &ChatMessage) -> WireMessage {
    WireMessage {
        role: message.role.to_string(),
        content: message.content.as_text().map(str::to_string),
        name: message.name.clone(),
        tool_calls: message
            .tool_calls
            .as_ref()
            .map(|calls| calls.iter().map(to_wire_tool_call).collect()),
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn to_wire_tool_call(call: &ToolCall) -> WireToolCall {
    WireToolCall {
        id: call.id.clone(),
        call_type: "function".to_string(),
        function: WireFunctionCall {
            name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
        },
    }
}

fn to_wire_tool(def: &ToolDefinition) -> WireTool {
    WireTool {
        tool_type: "function".to_string(),
        function: WireFunctionDef {
            name: def.name.clone(),
            description: def.description.clone(),
            parameters: def.input_schema.clone(),
        },
    }
}

fn to_core_tool_call(call: WireToolCall) -> ToolCall {
    ToolCall {
        id: call.id,
        function: FunctionCall {
            name: call.function.name,
            arguments: call.function.arguments,
        },
    }
}

fn to_core_usage(usage: WireUsage) -> Usage {
    Usage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

fn from_wire_response(wire: ChatCompletionsResponse, model: &str) -> Result<TextResponse> {
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::provider("no choices in response", "openai"))?;

    let tool_calls = choice.message.tool_calls.map(|calls| {
        calls.into_iter().map(to_core_tool_call).collect::<Vec<_>>()
    });
    let finish_reason = choice
        .finish_reason
        .as_deref()
        .map(map_finish_reason)
        .unwrap_or(FinishReason::Stop);

    Ok(TextResponse {
        id: RequestId::generate(),
        model: wire.model.clone().unwrap_or_else(|| model.to_string()),
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish_reason,
        usage: wire.usage.map(to_core_usage),
    })
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::Other("content_filter".to_string()),
        other => FinishReason::Other(other.to_string()),
    }
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
        401 | 403 => Error::auth(message),
        429 => Error::rate_limit(message),
        400 => Error::validation(message, None, "bad_request"),
        _ => Error::provider(message, provider.to_string()),
    }
}

// Wire types. `camelCase`/`snake_case` conventions below follow the OpenAI chat completions API.

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_schema: Option<JsonSchemaFormat>,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: String,
    schema: serde_json::Value,
    strict: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<WireChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChunkChoice {
    index: u32,
    delta: WireChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingsWireRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsWireResponse {
    data: Vec<EmbeddingWireEntry>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingWireEntry {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ImageWireRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ImageWireResponse {
    data: Vec<ImageWireEntry>,
}

#[derive(Debug, Deserialize)]
struct ImageWireEntry {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Debug, Serialize)]
struct SpeechWireRequest {
    model: String,
    input: String,
    voice: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_core::ApiKey;

    fn config() -> ProviderConfig {
        ProviderConfig {
            api_key: Some(ApiKey::new("sk-test")),
            base_url: None,
            timeout_seconds: 0,
            dynamic_models: false,
        }
    }

    #[test]
    fn new_requires_api_key() {
        let config = ProviderConfig::default();
        assert!(OpenAIProvider::new("openai", config).is_err());
    }

    #[test]
    fn new_defaults_base_url() {
        let provider = OpenAIProvider::new("openai", config()).expect("build");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn base_url_override_is_honored() {
        let mut cfg = config();
        cfg.base_url = Some("https://openrouter.ai/api/v1".to_string());
        let provider = OpenAIProvider::new("openrouter", cfg).expect("build");
        assert_eq!(provider.endpoint("/chat/completions"), "https://openrouter.ai/api/v1/chat/completions");
    }

    #[test]
    fn capabilities_advertise_tool_calling_and_streaming() {
        let provider = OpenAIProvider::new("openai", config()).expect("build");
        assert!(provider.capabilities().supports(Capability::ToolCalling));
        assert!(provider.capabilities().supports(Capability::Streaming));
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(map_finish_reason("stop"), FinishReason::Stop);
        assert_eq!(map_finish_reason("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(map_finish_reason("length"), FinishReason::Length);
    }

    #[test]
    fn parse_error_maps_status_codes() {
        assert!(matches!(parse_error("openai", 401, "{}"), Error::Auth { .. }));
        assert!(matches!(parse_error("openai", 429, "{}"), Error::RateLimit { .. }));
    }

    #[tokio::test]
    async fn transcription_is_unsupported() {
        let provider = OpenAIProvider::new("openai", config()).expect("build");
        let req = AudioRequest {
            id: RequestId::generate(),
            model: "whisper-1".to_string(),
            kind: AudioKind::Transcribe,
            text: None,
            audio: Some(vec![0u8; 4]),
        };
        let result = provider.audio(&req).await;
        assert!(matches!(result, Err(Error::Unsupported { .. })));
    }
}
