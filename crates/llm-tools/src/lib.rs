//! # llm-tools
//!
//! Tool registry and the multi-turn tool-calling orchestrator: provider-agnostic execution of
//! model-requested tool calls under concurrency, timeout, retry, circuit-breaker, and schema
//! validation controls.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod executor;
pub mod orchestrator;
pub mod registry;

pub use executor::{SafetyConfig, ToolExecutor, ToolResult};
pub use orchestrator::{execute_with_tools, Orchestrator};
pub use registry::{RegisteredTool, ToolHandler, ToolRegistry};
