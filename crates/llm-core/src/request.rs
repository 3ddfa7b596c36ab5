//! Request types: the data side of the six request families a provider may fulfil.

use crate::error::Error;
use crate::types::{MaxTokens, ModelId, RequestId, Temperature, TopK, TopP};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unified text-completion request, also the base shape reused (with `stream = true`) for the
/// streaming family and (wrapped in [`StructuredRequest`]) for schema-constrained output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRequest {
    /// Unique request identifier.
    #[serde(default = "RequestId::generate")]
    pub id: RequestId,

    /// Target model (e.g., "gpt-4o", "claude-3-5-sonnet").
    pub model: String,

    /// Chat messages for conversation.
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature (0.0 - 2.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Top-p (nucleus sampling) parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Top-k sampling parameter (provider-specific).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    /// Enable streaming response.
    #[serde(default)]
    pub stream: bool,

    /// Tool/function definitions available to this request. Populated either by the caller or,
    /// when absent, by the orchestrator's registry snapshot (spec §4.5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Tool choice configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Request metadata for routing/billing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RequestMetadata>,
}

impl TextRequest {
    /// Start a fluent builder.
    #[must_use]
    pub fn builder() -> TextRequestBuilder {
        TextRequestBuilder::default()
    }

    /// Validated model ID.
    ///
    /// # Errors
    /// Returns an error if the model name is empty.
    pub fn validated_model(&self) -> Result<ModelId, Error> {
        ModelId::new(&self.model)
    }

    /// Validate every populated field, collecting nothing — the first failure short-circuits,
    /// matching the rest of the validated-newtype surface in this crate.
    ///
    /// # Errors
    /// Returns an error describing the first invalid field encountered.
    pub fn validate(&self) -> Result<(), Error> {
        self.validated_model()?;

        if self.messages.is_empty() {
            return Err(Error::validation(
                "messages cannot be empty",
                Some("messages".to_string()),
                "empty_messages",
            ));
        }

        if let Some(t) = self.temperature {
            Temperature::new(t)?;
        }
        if let Some(m) = self.max_tokens {
            MaxTokens::new(m)?;
        }
        if let Some(p) = self.top_p {
            TopP::new(p)?;
        }
        if let Some(k) = self.top_k {
            TopK::new(k)?;
        }

        Ok(())
    }

    /// Whether the response to this request should be forced through the multi-turn tool loop.
    #[must_use]
    pub fn wants_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
    }
}

/// Fluent, single-owner builder for [`TextRequest`]. Reused directly for streaming requests by
/// setting `stream(true)`.
#[derive(Debug, Default)]
pub struct TextRequestBuilder {
    id: Option<RequestId>,
    model: Option<String>,
    messages: Vec<ChatMessage>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    stop: Option<Vec<String>>,
    stream: bool,
    tools: Option<Vec<ToolDefinition>>,
    tool_choice: Option<ToolChoice>,
    metadata: Option<RequestMetadata>,
}

impl TextRequestBuilder {
    /// Set the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Replace the message list.
    #[must_use]
    pub fn messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Append one message.
    #[must_use]
    pub fn message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max_tokens.
    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set top_p.
    #[must_use]
    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Set top_k.
    #[must_use]
    pub fn top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Set stop sequences.
    #[must_use]
    pub fn stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Enable streaming.
    #[must_use]
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Set the tool definitions made available to the model.
    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Set tool_choice.
    #[must_use]
    pub fn tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    /// Set request metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: RequestMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Reset every scalar field and zero-length (not drop the capacity of) every slice, per the
    /// pool-reuse discipline in spec §9. The caller pool calls this on checkin.
    pub fn reset(&mut self) {
        self.id = None;
        self.model = None;
        self.messages.clear();
        self.temperature = None;
        self.max_tokens = None;
        self.top_p = None;
        self.top_k = None;
        self.stop = None;
        self.stream = false;
        self.tools = None;
        self.tool_choice = None;
        self.metadata = None;
    }

    /// Validate and produce an immutable [`TextRequest`].
    ///
    /// # Errors
    /// Returns an error if `model` is unset, `messages` is empty, or any populated field fails
    /// its own validation.
    pub fn build(self) -> Result<TextRequest, Error> {
        let model = self.model.ok_or_else(|| {
            Error::validation("model is required", Some("model".to_string()), "missing_model")
        })?;

        if self.messages.is_empty() {
            return Err(Error::validation(
                "messages cannot be empty",
                Some("messages".to_string()),
                "empty_messages",
            ));
        }

        let request = TextRequest {
            id: self.id.unwrap_or_default(),
            model,
            messages: self.messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            top_k: self.top_k,
            stop: self.stop,
            stream: self.stream,
            tools: self.tools,
            tool_choice: self.tool_choice,
            metadata: self.metadata,
        };

        request.validate()?;
        Ok(request)
    }
}

/// A schema-constrained variant of [`TextRequest`]: the provider must return JSON conforming to
/// `schema`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredRequest {
    /// The underlying text request.
    #[serde(flatten)]
    pub base: TextRequest,
    /// JSON Schema the response must conform to.
    pub schema: serde_json::Value,
}

/// A request for vector embeddings of one or more input strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsRequest {
    /// Unique request identifier.
    #[serde(default = "RequestId::generate")]
    pub id: RequestId,
    /// Target embedding model.
    pub model: String,
    /// Input strings to embed.
    pub input: Vec<String>,
    /// Requested embedding dimensionality, if the model supports truncation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
}

impl EmbeddingsRequest {
    /// Validate required fields.
    ///
    /// # Errors
    /// Returns an error if `model`/`input` are empty or `dimensions` is `Some(0)`.
    pub fn validate(&self) -> Result<(), Error> {
        ModelId::new(&self.model)?;
        if self.input.is_empty() {
            return Err(Error::validation(
                "input cannot be empty",
                Some("input".to_string()),
                "empty_input",
            ));
        }
        if let Some(0) = self.dimensions {
            return Err(Error::validation(
                "dimensions must be greater than zero",
                Some("dimensions".to_string()),
                "invalid_dimensions",
            ));
        }
        Ok(())
    }
}

/// A request to generate one or more images from a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRequest {
    /// Unique request identifier.
    #[serde(default = "RequestId::generate")]
    pub id: RequestId,
    /// Target image model.
    pub model: String,
    /// Generation prompt.
    pub prompt: String,
    /// Requested image size, e.g. `"1024x1024"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// Number of images to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
}

impl ImageRequest {
    /// Validate required fields.
    ///
    /// # Errors
    /// Returns an error if `model`/`prompt` are empty.
    pub fn validate(&self) -> Result<(), Error> {
        ModelId::new(&self.model)?;
        if self.prompt.trim().is_empty() {
            return Err(Error::validation(
                "prompt cannot be empty",
                Some("prompt".to_string()),
                "empty_prompt",
            ));
        }
        Ok(())
    }
}

/// Distinguishes the two directions an [`AudioRequest`] can flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioKind {
    /// Speech-to-text.
    Transcribe,
    /// Text-to-speech.
    Synthesize,
}

/// A speech synthesis or recognition request, distinguished by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioRequest {
    /// Unique request identifier.
    #[serde(default = "RequestId::generate")]
    pub id: RequestId,
    /// Target audio model.
    pub model: String,
    /// Which direction this request flows.
    pub kind: AudioKind,
    /// Text to synthesize (required when `kind == Synthesize`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Raw audio bytes to transcribe (required when `kind == Transcribe`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<Vec<u8>>,
}

impl AudioRequest {
    /// Validate that the fields required by `kind` are present.
    ///
    /// # Errors
    /// Returns an error if `model` is empty or the kind-specific payload is missing.
    pub fn validate(&self) -> Result<(), Error> {
        ModelId::new(&self.model)?;
        match self.kind {
            AudioKind::Synthesize if self.text.is_none() => Err(Error::validation(
                "text is required for speech synthesis",
                Some("text".to_string()),
                "missing_text",
            )),
            AudioKind::Transcribe if self.audio.is_none() => Err(Error::validation(
                "audio is required for transcription",
                Some("audio".to_string()),
                "missing_audio",
            )),
            _ => Ok(()),
        }
    }
}

/// Chat message with role and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message author.
    pub role: MessageRole,
    /// Content of the message.
    pub content: MessageContent,
    /// Optional name of the author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool calls made by the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool call ID for tool response messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(MessageRole::System, content)
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(MessageRole::User, content)
    }

    /// Create an assistant message, optionally carrying tool calls.
    #[must_use]
    pub fn assistant(content: impl Into<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Text(content.into()),
            name: None,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Create a tool-result message for `tool_call_id`.
    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: MessageContent::Text(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// The text content, when this message is not a multimodal parts message.
    #[must_use]
    pub fn text_content(&self) -> Option<&str> {
        self.content.as_text()
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message.
    System,
    /// User message.
    User,
    /// Assistant message.
    Assistant,
    /// Tool response message.
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// Message content (text or multimodal parts).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content.
    Text(String),
    /// Multimodal content parts.
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Borrow as text, if this is a text content.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Parts(_) => None,
        }
    }

    /// Whether the content is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }
}

/// Content part for multimodal messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content part.
    Text {
        /// The text.
        text: String,
    },
    /// Image content part.
    ImageUrl {
        /// Image URL details.
        image_url: ImageUrl,
    },
}

/// Image URL for vision models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    /// URL of the image.
    pub url: String,
    /// Detail level for processing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<ImageDetail>,
}

/// Image detail level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    /// Auto detail level.
    Auto,
    /// Low detail level.
    Low,
    /// High detail level.
    High,
}

/// Tool/function definition, registered globally per client (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name. If empty on registration, it is backfilled from the registry key.
    pub name: String,
    /// Human-readable description shown to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema describing accepted arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

/// Tool call emitted by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call.
    pub id: String,
    /// Function call details.
    pub function: FunctionCall,
}

/// Function call details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,
    /// Function arguments as a JSON string.
    pub arguments: String,
}

/// Tool choice configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// String choice: "none", "auto", "required".
    String(String),
    /// Force a specific tool by name.
    Tool {
        /// Function name to force.
        name: String,
    },
}

/// Request metadata for routing and billing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Tenant ID for multi-tenancy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Project ID for cost attribution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Request tags for filtering/routing.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
    /// Preferred provider ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_provider: Option<String>,
    /// Request timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}
