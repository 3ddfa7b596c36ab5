//! Response types for the six request families.

use crate::request::ToolCall;
use crate::types::RequestId;
use serde::{Deserialize, Serialize};

/// Response to a non-streaming [`crate::request::TextRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextResponse {
    /// Echo of the request ID this response answers.
    pub id: RequestId,
    /// Model that produced the response.
    pub model: String,
    /// Generated text, empty when the model only emitted tool calls.
    #[serde(default)]
    pub text: String,
    /// Tool calls requested by the model, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
    /// Token accounting, when the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl TextResponse {
    /// Whether the model asked to invoke one or more tools.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}

/// Reason a text or stream generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop token or completion.
    Stop,
    /// Truncated by `max_tokens`.
    Length,
    /// Stopped to let the caller execute one or more tool calls.
    ToolCalls,
    /// Stopped by a configured stop sequence.
    StopSequence,
    /// Provider-specific reason not covered above.
    Other(String),
}

/// Response to a [`crate::request::StructuredRequest`]: JSON conforming to the requested schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredResponse {
    /// Echo of the request ID this response answers.
    pub id: RequestId,
    /// Model that produced the response.
    pub model: String,
    /// The schema-conforming JSON payload.
    pub data: serde_json::Value,
    /// Token accounting, when the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Response to an [`crate::request::EmbeddingsRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsResponse {
    /// Model that produced the embeddings.
    pub model: String,
    /// One embedding vector per input, in input order.
    pub embeddings: Vec<Vec<f32>>,
    /// Token accounting, when the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Response to an [`crate::request::ImageRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResponse {
    /// Model that produced the images.
    pub model: String,
    /// Generated images, as provider-hosted URLs or inline base64 payloads.
    pub images: Vec<GeneratedImage>,
}

/// A single generated image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeneratedImage {
    /// A provider-hosted URL.
    Url(String),
    /// An inline base64-encoded payload.
    Base64(String),
}

/// Response to an [`crate::request::AudioRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioResponse {
    /// Model that produced the response.
    pub model: String,
    /// Transcribed text (present when the request's `kind` was `Transcribe`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Synthesized audio bytes (present when the request's `kind` was `Synthesize`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<Vec<u8>>,
}

/// Token usage accounting, summed across a request or a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens consumed by the completion.
    pub completion_tokens: u32,
    /// Sum of the two.
    pub total_tokens: u32,
}

impl Usage {
    /// Build a usage record, computing the total.
    #[must_use]
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

impl std::ops::Add for Usage {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_tool_calls_detects_empty_vec() {
        let mut resp = TextResponse {
            id: RequestId::generate(),
            model: "gpt-4o".to_string(),
            text: String::new(),
            tool_calls: Some(vec![]),
            finish_reason: FinishReason::Stop,
            usage: None,
        };
        assert!(!resp.has_tool_calls());
        resp.tool_calls = None;
        assert!(!resp.has_tool_calls());
    }

    #[test]
    fn usage_arithmetic() {
        let total = Usage::new(10, 5) + Usage::new(20, 15);
        assert_eq!(total, Usage::new(30, 20));
    }
}
