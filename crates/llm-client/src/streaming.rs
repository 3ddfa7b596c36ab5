//! Stream cancellation wrapper (spec §4.8, §8 scenario 6).
//!
//! [`llm_core::streaming::TextChunkStream`] is already cancel-safe on its own — it's a plain
//! `Stream`, and dropping it mid-poll simply stops polling the provider's underlying transport.
//! What this module adds is observability: [`track_cancellation`] wraps a stream so callers (and
//! tests) can tell whether it was drained to completion or abandoned early.

use futures::stream::Stream;
use llm_core::streaming::TextChunk;
use llm_core::Result;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

/// Shared flag a [`CancellableStream`] sets on drop if it never reached its terminating chunk.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Whether the stream this flag is attached to was dropped before completion.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pin_project! {
    /// Wraps a [`llm_core::streaming::TextChunkStream`], marking its [`CancelFlag`] if the stream
    /// is dropped before yielding a terminating chunk or an error.
    struct CancellableStream {
        #[pin]
        inner: Pin<Box<dyn Stream<Item = Result<TextChunk>> + Send>>,
        finished: bool,
        flag: Arc<AtomicBool>,
    }
}

impl Stream for CancellableStream {
    type Item = Result<TextChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if chunk.is_final() {
                    *this.finished = true;
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                *this.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                *this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for CancellableStream {
    fn drop(&mut self) {
        if !self.finished {
            self.flag.store(true, Ordering::Release);
        }
    }
}

/// Wrap `stream` so dropping it before completion is observable via the returned [`CancelFlag`].
#[must_use]
pub fn track_cancellation(
    stream: llm_core::streaming::TextChunkStream,
) -> (llm_core::streaming::TextChunkStream, CancelFlag) {
    let flag = Arc::new(AtomicBool::new(false));
    let wrapped = CancellableStream {
        inner: stream,
        finished: false,
        flag: Arc::clone(&flag),
    };
    (Box::pin(wrapped), CancelFlag(flag))
}
