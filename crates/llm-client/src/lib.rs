//! # llm-client
//!
//! Unified client for dispatching text, streaming, structured, embeddings, image, and audio
//! requests to any configured LLM provider, with transparent tool calling, per-operation
//! middleware, and optional fleet-wide adaptive concurrency.
//!
//! ## Features
//!
//! - Provider-agnostic dispatch behind a lazily-populated, ref-counted provider cache
//! - Multi-turn tool calling via the shared `llm-tools` orchestrator
//! - Typed per-operation middleware (logging, metrics, caching, rate limiting, retry, circuit
//!   breaking)
//! - Fluent request builders with an explicit per-call provider/endpoint override
//! - Batch dispatch with a concurrency cap and order-preserving results
//! - Optional fleet-wide adaptive concurrency via `llm-governor`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use llm_client::{Client, ClientConfig};
//! use llm_core::provider::ProviderConfig;
//! use llm_core::request::ChatMessage;
//!
//! # async fn run() -> Result<(), llm_client::Error> {
//! let config = ClientConfig::builder()
//!     .default_provider("openai")
//!     .provider("openai", ProviderConfig { api_key: Some("sk-...".into()), ..Default::default() })
//!     .build()?;
//! let client = Client::new(config);
//!
//! let response = client
//!     .text_builder()
//!     .model("gpt-4o")
//!     .message(ChatMessage::user("Hello, world!"))
//!     .send()
//!     .await?;
//!
//! println!("{}", response.text);
//! # Ok(())
//! # }
//! ```
//!
//! ## Streaming
//!
//! ```rust,no_run
//! use llm_client::{Client, ClientConfig};
//! use llm_core::request::ChatMessage;
//! use llm_core::streaming::collect_text;
//!
//! # async fn run() -> Result<(), llm_client::Error> {
//! let client = Client::new(ClientConfig::default());
//! let stream = client
//!     .text_builder()
//!     .model("gpt-4o")
//!     .message(ChatMessage::user("Tell me a story"))
//!     .stream()
//!     .await?;
//! let text = collect_text(stream).await?;
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod builder;
mod cache;
mod client;
mod config;
mod error;
mod middleware;
mod streaming;

pub use builder::{BatchBuilder, BatchItem, EmbeddingsCallBuilder, ImageCallBuilder, StructuredCallBuilder, TextCallBuilder};
pub use cache::{ProviderCache, ProviderHandle};
pub use client::{Client, ClientBuilder, MiddlewareChains, ResolvedProvider};
pub use config::{ClientConfig, ClientConfigBuilder, DiscoveryConfig, ToolSafetyConfig};
pub use error::{Error, Result};
pub use middleware::{
    CachingMiddleware, CircuitBreakerMiddleware, LoggingMiddleware, MetricsMiddleware, Middleware, MiddlewareChain,
    Next, RateLimitMiddleware, RetryMiddleware, TimeoutMiddleware,
};
pub use streaming::{track_cancellation, CancelFlag};

// Re-export the shared request/response/provider surface for convenience so callers rarely need
// a direct `llm-core` dependency of their own.
pub use llm_core::{
    request::{AudioRequest, ChatMessage, EmbeddingsRequest, ImageRequest, StructuredRequest, TextRequest, ToolDefinition},
    response::{AudioResponse, EmbeddingsResponse, ImageResponse, StructuredResponse, TextResponse, Usage},
    streaming::{collect_text, TextChunk, TextChunkStream},
    ApiKey, Capability, Provider, ProviderCapabilities, ProviderConfig, ProviderFactory,
};
