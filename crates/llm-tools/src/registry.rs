//! Thread-safe tool registry keyed by name.

use async_trait::async_trait;
use llm_core::{Error, ToolDefinition};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A registered tool handler. Implementors perform the actual side effect (file I/O, a network
/// call, a calculation) and return a JSON-serializable result.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Invoke the tool with `arguments` (already schema-validated by the executor, if input
    /// validation is enabled).
    async fn call(&self, arguments: Value) -> Result<Value, Error>;
}

/// A registered tool: its wire-level definition plus the handler that executes it.
#[derive(Clone)]
pub struct RegisteredTool {
    /// Name, description, and JSON-Schema sent to providers.
    pub definition: ToolDefinition,
    /// The handler invoked on a matching tool call.
    pub handler: Arc<dyn ToolHandler>,
}

/// Thread-safe name → `{schema, handler}` map. Reads are concurrent; registrations serialize
/// behind a single writer lock.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, overwriting any existing registration under the same name.
    pub fn register(&self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) {
        let name = definition.name.clone();
        self.tools
            .write()
            .insert(name, RegisteredTool { definition, handler });
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<RegisteredTool> {
        self.tools.read().get(name).cloned()
    }

    /// Whether a tool with `name` is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Remove a tool by name.
    ///
    /// # Errors
    /// Returns an error if no tool with `name` is registered.
    pub fn unregister(&self, name: &str) -> Result<(), Error> {
        self.tools
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::validation(format!("tool '{name}' is not registered"), None, "not_found"))
    }

    /// Snapshot of registered tool definitions, suitable for attaching to an outgoing request.
    /// Handlers are not included.
    #[must_use]
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.read().values().map(|t| t.definition.clone()).collect()
    }

    /// Sorted list of registered tool names.
    #[must_use]
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    #[must_use]
    pub fn count(&self) -> usize {
        self.tools.read().len()
    }

    /// Remove every registered tool.
    pub fn clear(&self) {
        self.tools.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(&self, arguments: Value) -> Result<Value, Error> {
            Ok(arguments)
        }
    }

    fn sample_definition(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: Some("test tool".to_string()),
            input_schema: Some(serde_json::json!({"type": "object"})),
        }
    }

    #[test]
    fn register_then_get_roundtrips() {
        let registry = ToolRegistry::new();
        registry.register(sample_definition("echo"), Arc::new(EchoHandler));
        assert!(registry.has("echo"));
        assert_eq!(registry.get("echo").unwrap().definition.name, "echo");
    }

    #[test]
    fn register_overwrites_existing() {
        let registry = ToolRegistry::new();
        registry.register(sample_definition("echo"), Arc::new(EchoHandler));
        registry.register(sample_definition("echo"), Arc::new(EchoHandler));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn unregister_missing_tool_errors() {
        let registry = ToolRegistry::new();
        assert!(registry.unregister("missing").is_err());
    }

    #[test]
    fn list_names_is_sorted() {
        let registry = ToolRegistry::new();
        registry.register(sample_definition("zeta"), Arc::new(EchoHandler));
        registry.register(sample_definition("alpha"), Arc::new(EchoHandler));
        assert_eq!(registry.list_names(), vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn clear_empties_the_registry() {
        let registry = ToolRegistry::new();
        registry.register(sample_definition("echo"), Arc::new(EchoHandler));
        registry.clear();
        assert_eq!(registry.count(), 0);
    }
}
