//! # llm-resilience
//!
//! Resilience primitives shared by the tool executor and the adaptive-concurrency governor:
//! - Circuit breaker for preventing cascading failures
//! - Retry executor with exponential backoff
//! - Bounded semaphore for capacity-limited resources
//! - PID controller driving the governor's capacity adjustments

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit_breaker;
pub mod pid;
pub mod retry;
pub mod semaphore;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use pid::{PidConfig, PidController};
pub use retry::{retry as retry_with_backoff, RetryConfig};
pub use semaphore::{BoundedSemaphore, SemaphorePermit};
