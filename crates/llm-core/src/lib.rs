//! # llm-core
//!
//! Core types, traits, and error handling for the unified LLM client library.
//!
//! This crate provides the foundational vocabulary shared by every other crate in the
//! workspace: request and response families, the [`provider::Provider`] trait downstream
//! backends implement, a tagged error type, and validated domain newtypes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod provider;
pub mod request;
pub mod response;
pub mod streaming;
pub mod types;

pub use error::{Error, Result};
pub use provider::{Capability, Provider, ProviderCapabilities, ProviderConfig, ProviderFactory, ProviderKey};
pub use request::{
    AudioKind, AudioRequest, ChatMessage, ContentPart, EmbeddingsRequest, FunctionCall, ImageRequest,
    ImageUrl, MessageContent, MessageRole, RequestMetadata, StructuredRequest, TextRequest,
    TextRequestBuilder, ToolCall, ToolChoice, ToolDefinition,
};
pub use response::{
    AudioResponse, EmbeddingsResponse, FinishReason, GeneratedImage, ImageResponse, StructuredResponse,
    TextResponse, Usage,
};
pub use streaming::{collect_text, TextChunk, TextChunkStream};
pub use types::{ApiKey, MaxTokens, ModelId, ProviderId, RequestId, Temperature, TenantId, TopK, TopP};
