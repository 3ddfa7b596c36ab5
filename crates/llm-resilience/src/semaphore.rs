//! Fixed-capacity bounded resource — the executor's and governor's basic building block.

use llm_core::Error;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore as TokioSemaphore};
use tracing::debug;

/// A fixed-capacity bounded resource.
///
/// `acquire` blocks until a slot is free or the caller's context is cancelled; `Capacity`
/// reports the size the semaphore was constructed with. FIFO fairness among waiters is not
/// guaranteed, but acquires must eventually succeed under fair load — this wraps
/// [`tokio::sync::Semaphore`], which provides exactly that guarantee.
pub struct BoundedSemaphore {
    id: String,
    capacity: u32,
    inner: Arc<TokioSemaphore>,
}

impl BoundedSemaphore {
    /// Build a semaphore with `capacity` slots.
    #[must_use]
    pub fn new(id: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            capacity,
            inner: Arc::new(TokioSemaphore::new(capacity as usize)),
        }
    }

    /// Identifier this semaphore was constructed with (usually a provider or tool key).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The capacity this semaphore was constructed with.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of permits currently held.
    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.capacity
            .saturating_sub(self.inner.available_permits() as u32)
    }

    /// Acquire a permit, waiting until one is free.
    ///
    /// # Errors
    /// Returns [`Error::Canceled`] if the semaphore has been closed from under the caller
    /// (this only happens if the owning governor state is torn down mid-acquire).
    pub async fn acquire(&self) -> Result<SemaphorePermit, Error> {
        match Arc::clone(&self.inner).acquire_owned().await {
            Ok(permit) => {
                debug!(semaphore = %self.id, in_flight = self.in_flight(), "permit acquired");
                Ok(SemaphorePermit {
                    _permit: permit,
                    id: self.id.clone(),
                })
            }
            Err(_closed) => Err(Error::Canceled),
        }
    }

    /// Acquire a permit without waiting.
    ///
    /// # Errors
    /// Returns `Ok(None)` style failure mapped to an error when no permit is immediately free.
    pub fn try_acquire(&self) -> Option<SemaphorePermit> {
        Arc::clone(&self.inner)
            .try_acquire_owned()
            .ok()
            .map(|permit| SemaphorePermit {
                _permit: permit,
                id: self.id.clone(),
            })
    }
}

/// An acquired slot. The slot is released when this value is dropped — callers must hold it for
/// the lifetime of the guarded work and never access it after a terminal call returns.
pub struct SemaphorePermit {
    _permit: OwnedSemaphorePermit,
    id: String,
}

impl SemaphorePermit {
    /// The semaphore this permit belongs to.
    #[must_use]
    pub fn semaphore_id(&self) -> &str {
        &self.id
    }
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        debug!(semaphore = %self.id, "permit released");
    }
}
