//! Client configuration (spec §6, §10.3).
//!
//! Built in the same shape as the teacher's `gateway-sdk::ClientConfig`/`ClientBuilder`: an
//! immutable struct with `DEFAULT_*` associated constants, constructed through a fluent builder
//! that validates at `build()` time rather than the struct validating itself piecemeal.

use llm_core::{Error, ProviderConfig, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Safety and adaptive-concurrency knobs for the tool executor (spec §6's "Adaptive safety"
/// block), carried on [`ClientConfig`] so [`crate::client::Client::new`] can build the one
/// `llm_tools::ToolExecutor` it owns.
#[derive(Debug, Clone)]
pub struct ToolSafetyConfig {
    /// Cap on tools executing concurrently within one `execute_all` fan-out.
    pub max_concurrent_tools: u32,
    /// Per-tool-call timeout.
    pub tool_timeout: Duration,
    /// Whether a circuit breaker guards the tool executor as a whole.
    pub enable_circuit_breaker: bool,
    /// Consecutive tool failures before the breaker opens.
    pub breaker_threshold: u32,
    /// Time the breaker stays open before probing.
    pub breaker_reset_timeout: Duration,
    /// Number of retries per tool call. `0` disables the retry executor.
    pub max_retries_per_tool: u32,
    /// Serialized tool output larger than this many bytes is rejected as a tool failure.
    pub max_tool_output_size: usize,
    /// Whether tool-call arguments are validated against the tool's schema before invocation.
    pub enable_input_validation: bool,
    /// Whether the tool executor's fan-out is PID-governed instead of fixed-capacity.
    pub enable_adaptive_concurrency: bool,
    /// Target average tool latency the adaptive controller steers toward.
    pub adaptive_target_latency: Duration,
    /// Minimum concurrency the adaptive controller may shrink to.
    pub adaptive_min_capacity: u32,
    /// Maximum concurrency the adaptive controller may grow to.
    pub adaptive_max_capacity: u32,
    /// Bounded percentile-sample window backing the adaptive controller.
    pub adaptive_window: usize,
}

impl Default for ToolSafetyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tools: 8,
            tool_timeout: Duration::from_secs(30),
            enable_circuit_breaker: true,
            breaker_threshold: 5,
            breaker_reset_timeout: Duration::from_secs(30),
            max_retries_per_tool: 0,
            max_tool_output_size: 1_000_000,
            enable_input_validation: true,
            enable_adaptive_concurrency: false,
            adaptive_target_latency: Duration::from_millis(500),
            adaptive_min_capacity: 1,
            adaptive_max_capacity: 64,
            adaptive_window: 512,
        }
    }
}

impl From<&ToolSafetyConfig> for llm_tools::SafetyConfig {
    fn from(c: &ToolSafetyConfig) -> Self {
        llm_tools::SafetyConfig {
            max_concurrent_tools: c.max_concurrent_tools,
            tool_timeout: c.tool_timeout,
            max_retries_per_tool: c.max_retries_per_tool,
            enable_circuit_breaker: c.enable_circuit_breaker,
            breaker_threshold: c.breaker_threshold,
            breaker_reset_timeout: c.breaker_reset_timeout,
            enable_input_validation: c.enable_input_validation,
            max_tool_output_size: c.max_tool_output_size,
            enable_adaptive_concurrency: c.enable_adaptive_concurrency,
            adaptive_target_latency: c.adaptive_target_latency,
            adaptive_min_capacity: c.adaptive_min_capacity,
            adaptive_max_capacity: c.adaptive_max_capacity,
            adaptive_window: c.adaptive_window,
        }
    }
}

/// Polling configuration for the optional model-discovery service (spec §6's
/// `enableDiscovery`/`discoveryConfig`).
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// How often discovery refreshes a provider's advertised model catalog.
    pub poll_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
        }
    }
}

/// Immutable client configuration (spec §6). Construct via [`ClientConfigBuilder`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) default_provider: Option<String>,
    pub(crate) providers: HashMap<String, ProviderConfig>,
    pub(crate) timeout: Duration,
    pub(crate) debug_logging: bool,
    pub(crate) model_validation: bool,
    pub(crate) enable_discovery: bool,
    pub(crate) discovery_config: DiscoveryConfig,
    pub(crate) tool_safety: ToolSafetyConfig,
    pub(crate) user_agent: String,
    pub(crate) tenant_id: Option<String>,
}

impl ClientConfig {
    /// Default client-wide timeout (spec §6: `0` means unlimited; this is the non-zero default).
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
    /// Default user agent sent by any transient OpenAI-wire-compatible provider this client
    /// constructs for a `base_url` override (spec §4.8).
    pub const DEFAULT_USER_AGENT: &'static str = concat!("llm-client-rust/", env!("CARGO_PKG_VERSION"));

    /// Start a fluent builder.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// The provider used when a builder does not name one explicitly.
    #[must_use]
    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    /// Configuration registered for `name`, if any.
    #[must_use]
    pub fn provider_config(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Every configured provider name, sorted.
    #[must_use]
    pub fn configured_provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Client-wide default timeout in seconds, passed to [`ProviderConfig::effective_timeout`].
    #[must_use]
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout.as_secs()
    }

    /// Whether verbose request/response logging middleware should be installed.
    #[must_use]
    pub fn debug_logging(&self) -> bool {
        self.debug_logging
    }

    /// Whether requests are validated against [`llm_core::request::TextRequest::validate`]
    /// before dispatch.
    #[must_use]
    pub fn model_validation(&self) -> bool {
        self.model_validation
    }

    /// Whether the client runs a background model-discovery service.
    #[must_use]
    pub fn discovery_enabled(&self) -> bool {
        self.enable_discovery
    }

    /// Discovery polling configuration.
    #[must_use]
    pub fn discovery_config(&self) -> &DiscoveryConfig {
        &self.discovery_config
    }

    /// Tool-safety and adaptive-concurrency knobs.
    #[must_use]
    pub fn tool_safety(&self) -> &ToolSafetyConfig {
        &self.tool_safety
    }

    /// User agent used by transient providers this client constructs.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Tenant ID stamped onto request metadata when the caller doesn't set one explicitly.
    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfigBuilder::new().build().expect("default config is always valid")
    }
}

/// Fluent builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    default_provider: Option<String>,
    providers: HashMap<String, ProviderConfig>,
    timeout: Option<Duration>,
    debug_logging: bool,
    model_validation: Option<bool>,
    enable_discovery: bool,
    discovery_config: Option<DiscoveryConfig>,
    tool_safety: ToolSafetyConfig,
    user_agent: Option<String>,
    tenant_id: Option<String>,
}

impl ClientConfigBuilder {
    /// Start building a config with every field at its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider used when a request builder does not name one explicitly.
    #[must_use]
    pub fn default_provider(mut self, name: impl Into<String>) -> Self {
        self.default_provider = Some(name.into());
        self
    }

    /// Register (or replace) a provider's configuration.
    #[must_use]
    pub fn provider(mut self, name: impl Into<String>, config: ProviderConfig) -> Self {
        self.providers.insert(name.into(), config);
        self
    }

    /// Set the client-wide default timeout. `Duration::ZERO` means unlimited, and only takes
    /// effect for providers whose own `timeout_seconds` is also unset (spec §4.6).
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable verbose request/response logging middleware.
    #[must_use]
    pub fn debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    /// Enable or disable pre-dispatch request validation (default: enabled).
    #[must_use]
    pub fn model_validation(mut self, enabled: bool) -> Self {
        self.model_validation = Some(enabled);
        self
    }

    /// Enable the background model-discovery service.
    #[must_use]
    pub fn enable_discovery(mut self, enabled: bool) -> Self {
        self.enable_discovery = enabled;
        self
    }

    /// Configure model-discovery polling.
    #[must_use]
    pub fn discovery_config(mut self, config: DiscoveryConfig) -> Self {
        self.discovery_config = Some(config);
        self
    }

    /// Set every tool-safety and adaptive-concurrency knob at once.
    #[must_use]
    pub fn tool_safety(mut self, config: ToolSafetyConfig) -> Self {
        self.tool_safety = config;
        self
    }

    /// Set the user agent used by transient providers this client constructs.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the tenant ID stamped onto request metadata by default.
    #[must_use]
    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Validate and produce an immutable [`ClientConfig`].
    ///
    /// # Errors
    /// Returns an error if `default_provider` names a provider that was never registered via
    /// [`Self::provider`].
    pub fn build(self) -> Result<ClientConfig> {
        if let Some(name) = &self.default_provider {
            if !self.providers.contains_key(name) {
                return Err(Error::validation(
                    format!("default_provider '{name}' has no registered provider config"),
                    Some("default_provider".to_string()),
                    "unknown_default_provider",
                ));
            }
        }

        Ok(ClientConfig {
            default_provider: self.default_provider,
            providers: self.providers,
            timeout: self.timeout.unwrap_or(ClientConfig::DEFAULT_TIMEOUT),
            debug_logging: self.debug_logging,
            model_validation: self.model_validation.unwrap_or(true),
            enable_discovery: self.enable_discovery,
            discovery_config: self.discovery_config.unwrap_or_default(),
            tool_safety: self.tool_safety,
            user_agent: self.user_agent.unwrap_or_else(|| ClientConfig::DEFAULT_USER_AGENT.to_string()),
            tenant_id: self.tenant_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_timeout_and_validation() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, ClientConfig::DEFAULT_TIMEOUT);
        assert!(config.model_validation());
        assert!(!config.debug_logging());
    }

    #[test]
    fn unregistered_default_provider_is_rejected() {
        let result = ClientConfig::builder().default_provider("openai").build();
        assert!(result.is_err());
    }

    #[test]
    fn registered_default_provider_builds() {
        let config = ClientConfig::builder()
            .provider("openai", ProviderConfig::default())
            .default_provider("openai")
            .build()
            .unwrap();
        assert_eq!(config.default_provider(), Some("openai"));
        assert_eq!(config.configured_provider_names(), vec!["openai".to_string()]);
    }

    #[test]
    fn tool_safety_config_converts_to_llm_tools_shape() {
        let safety = ToolSafetyConfig {
            max_concurrent_tools: 4,
            ..ToolSafetyConfig::default()
        };
        let converted: llm_tools::SafetyConfig = (&safety).into();
        assert_eq!(converted.max_concurrent_tools, 4);
    }
}
