//! The lazy, single-pass sequence abstraction used by streaming text responses.

use crate::error::{Error, Result};
use crate::request::ToolCall;
use crate::response::{FinishReason, Usage};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// One delta in a streaming text response.
///
/// A stream is a finite sequence of these with an explicit terminating sentinel: the last
/// successfully-yielded chunk carries `finish_reason.is_some()`, or the stream ends with an
/// `Err` item. Consumers must treat either as the end of iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextChunk {
    /// Index of the choice this delta belongs to (almost always `0`).
    pub index: u32,
    /// Text fragment produced since the previous chunk. Empty on a tool-call-only delta.
    #[serde(default)]
    pub delta: String,
    /// Tool-call fragments accumulated so far, when the model is emitting a tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Present on the terminating chunk: why generation stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Present on the terminating chunk when the provider reports usage mid-stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl TextChunk {
    /// Whether this chunk terminates the stream.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// A boxed, owned stream of [`TextChunk`] results.
///
/// Providers return this from [`crate::provider::Provider::stream`]; implementers should prefer
/// a bounded internal buffer (e.g. `async_stream` backed by a channel with a fixed capacity) to
/// apply natural backpressure, and must close the stream promptly on context cancellation.
pub type TextChunkStream = Pin<Box<dyn Stream<Item = Result<TextChunk>> + Send>>;

/// Drain a [`TextChunkStream`] into its concatenated text, stopping at the first error.
///
/// # Errors
/// Returns the first error encountered while draining the stream.
pub async fn collect_text(mut stream: TextChunkStream) -> Result<String> {
    use futures::StreamExt;

    let mut text = String::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                text.push_str(&chunk.delta);
                if chunk.is_final() {
                    break;
                }
            }
            Err(e) => return Err(e),
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn collect_text_concatenates_until_final_chunk() {
        let chunks: Vec<Result<TextChunk>> = vec![
            Ok(TextChunk {
                index: 0,
                delta: "Hello, ".to_string(),
                tool_calls: None,
                finish_reason: None,
                usage: None,
            }),
            Ok(TextChunk {
                index: 0,
                delta: "world!".to_string(),
                tool_calls: None,
                finish_reason: Some(FinishReason::Stop),
                usage: None,
            }),
        ];
        let boxed: TextChunkStream = Box::pin(stream::iter(chunks));
        let text = collect_text(boxed).await.expect("collect");
        assert_eq!(text, "Hello, world!");
    }

    #[tokio::test]
    async fn collect_text_stops_at_first_error() {
        let chunks: Vec<Result<TextChunk>> = vec![
            Ok(TextChunk {
                index: 0,
                delta: "partial".to_string(),
                tool_calls: None,
                finish_reason: None,
                usage: None,
            }),
            Err(Error::timeout(1_000)),
        ];
        let boxed: TextChunkStream = Box::pin(stream::iter(chunks));
        assert!(collect_text(boxed).await.is_err());
    }
}
