//! Tagged error type shared by every crate in this workspace.

use thiserror::Error;

/// Result type used throughout the LLM client library.
pub type Result<T> = std::result::Result<T, Error>;

/// Tagged error kinds for the client, independent of any particular provider's wire codes.
#[derive(Error, Debug)]
pub enum Error {
    /// Credential rejected by the provider.
    #[error("authentication failed{}: {message}", provider_suffix(provider))]
    Auth {
        /// Human-readable message.
        message: String,
        /// Provider that rejected the credential, if known.
        provider: Option<String>,
    },

    /// Provider signalled throttling.
    #[error("rate limited{}: {message}", provider_suffix(provider))]
    RateLimit {
        /// Human-readable message.
        message: String,
        /// Provider that throttled the call, if known.
        provider: Option<String>,
        /// Retry-after hint, when the provider supplied one.
        retry_after: Option<std::time::Duration>,
    },

    /// Deadline exceeded, locally or upstream.
    #[error("timed out after {duration_ms}ms{}", provider_suffix(provider))]
    Timeout {
        /// Elapsed time before the deadline fired.
        duration_ms: u64,
        /// Provider involved, if known.
        provider: Option<String>,
    },

    /// Pre-flight validation failed.
    #[error("invalid request: {message}{}", field_suffix(field))]
    InvalidRequest {
        /// Human-readable message.
        message: String,
        /// Field or constraint that failed, if applicable.
        field: Option<String>,
    },

    /// A provider name was requested that has no registration at all.
    #[error("provider not found: {requested} (configured: {})", configured.join(", "))]
    ProviderNotFound {
        /// The name that was requested.
        requested: String,
        /// Sorted list of configured provider names.
        configured: Vec<String>,
    },

    /// A provider name is known but lacks the configuration needed to instantiate it.
    #[error("provider not configured: {requested} (configured: {})", configured.join(", "))]
    ProviderNotConfigured {
        /// The name that was requested.
        requested: String,
        /// Sorted list of configured provider names.
        configured: Vec<String>,
    },

    /// Upstream 5xx or other non-retryable server error.
    #[error("provider error{}: {message}", provider_suffix(provider))]
    Provider {
        /// Human-readable message.
        message: String,
        /// Provider that returned the error.
        provider: Option<String>,
        /// HTTP status code, when the transport is HTTP.
        status_code: Option<u16>,
    },

    /// Capability missing on the resolved provider.
    #[error("{provider} does not support {operation}")]
    Unsupported {
        /// Provider name.
        provider: String,
        /// Operation that was attempted.
        operation: String,
    },

    /// Model-specific requirement violated.
    #[error("model constraint violated: {message}")]
    ModelConstraint {
        /// Human-readable message.
        message: String,
        /// Model the constraint applies to.
        model: Option<String>,
    },

    /// Caller cancellation.
    #[error("operation canceled")]
    Canceled,

    /// Tool-execution circuit breaker is open.
    #[error("circuit breaker tripped")]
    CircuitOpen,

    /// Tool orchestrator hit its iteration cap without a final answer.
    #[error("max tool execution iterations reached without final response (iterations={iterations})")]
    ToolIterationExhausted {
        /// Number of iterations executed before giving up.
        iterations: u32,
    },

    /// Tool argument rejected by its schema.
    #[error("tool argument validation failed for {tool}: {message}")]
    Validation {
        /// Tool name.
        tool: String,
        /// Human-readable message.
        message: String,
    },

    /// Low-level transport failure that did not map to a more specific kind.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

fn provider_suffix(provider: &Option<String>) -> String {
    match provider {
        Some(p) => format!(" ({p})"),
        None => String::new(),
    }
}

fn field_suffix(field: &Option<String>) -> String {
    match field {
        Some(f) => format!(" (field: {f})"),
        None => String::new(),
    }
}

impl Error {
    /// Build an [`Error::Auth`].
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
            provider: None,
        }
    }

    /// Build an [`Error::RateLimit`].
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit {
            message: message.into(),
            provider: None,
            retry_after: None,
        }
    }

    /// Build an [`Error::Timeout`].
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout {
            duration_ms,
            provider: None,
        }
    }

    /// Build an [`Error::InvalidRequest`] naming the offending field.
    pub fn validation(message: impl Into<String>, field: Option<String>, _code: &str) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            field,
        }
    }

    /// Build an [`Error::ProviderNotFound`], sorting the configured-names list.
    pub fn provider_not_found(requested: impl Into<String>, mut configured: Vec<String>) -> Self {
        configured.sort();
        Self::ProviderNotFound {
            requested: requested.into(),
            configured,
        }
    }

    /// Build an [`Error::ProviderNotConfigured`], sorting the configured-names list.
    pub fn provider_not_configured(requested: impl Into<String>, mut configured: Vec<String>) -> Self {
        configured.sort();
        Self::ProviderNotConfigured {
            requested: requested.into(),
            configured,
        }
    }

    /// Build an [`Error::Provider`].
    pub fn provider(message: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            provider: Some(provider.into()),
            status_code: None,
        }
    }

    /// Build an [`Error::Unsupported`].
    pub fn unsupported(provider: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            provider: provider.into(),
            operation: operation.into(),
        }
    }

    /// Build an [`Error::ModelConstraint`].
    pub fn model_constraint(message: impl Into<String>, model: Option<String>) -> Self {
        Self::ModelConstraint {
            message: message.into(),
            model,
        }
    }

    /// Build an [`Error::ToolIterationExhausted`].
    pub fn tool_iteration_exhausted(iterations: u32) -> Self {
        Self::ToolIterationExhausted { iterations }
    }

    /// Build an [`Error::Validation`].
    pub fn tool_validation(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Attach a provider name to the variants that carry one.
    #[must_use]
    pub fn with_provider(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        match &mut self {
            Self::Auth { provider, .. }
            | Self::RateLimit { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::Provider { provider, .. } => *provider = Some(name),
            _ => {}
        }
        self
    }

    /// Whether middleware may safely retry the call that produced this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimit { .. } | Self::Timeout { .. } => true,
            Self::Provider { status_code, .. } => {
                matches!(status_code, Some(500..=599) | None)
            }
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Provider name, when this variant carries one.
    #[must_use]
    pub fn provider_name(&self) -> Option<&str> {
        match self {
            Self::Auth { provider, .. }
            | Self::RateLimit { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::Provider { provider, .. } => provider.as_deref(),
            Self::Unsupported { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// HTTP status code, when known.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Provider { status_code, .. } => *status_code,
            Self::RateLimit { .. } => Some(429),
            Self::Auth { .. } => Some(401),
            Self::InvalidRequest { .. } => Some(400),
            _ => None,
        }
    }

    /// Retry-after hint, when known.
    #[must_use]
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<ApiErrorBody> for Error {
    fn from(body: ApiErrorBody) -> Self {
        Self::Provider {
            message: body.error.message,
            provider: None,
            status_code: None,
        }
    }
}

/// Common shape of an upstream JSON error body (`{"error": {"message": ..., "type": ...}}`).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiErrorBody {
    /// Nested error detail.
    pub error: ApiErrorDetail,
}

/// Detail payload of an upstream JSON error body.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiErrorDetail {
    /// Human-readable message.
    pub message: String,
    /// Provider-specific error type/code.
    #[serde(rename = "type")]
    pub error_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(Error::rate_limit("slow down").is_retryable());
        assert!(Error::timeout(5_000).is_retryable());
        assert!(!Error::auth("bad key").is_retryable());
        assert!(!Error::tool_iteration_exhausted(10).is_retryable());
    }

    #[test]
    fn provider_not_found_sorts_configured() {
        let err = Error::provider_not_found("mystery", vec!["openai".into(), "anthropic".into()]);
        match err {
            Error::ProviderNotFound { configured, .. } => {
                assert_eq!(configured, vec!["anthropic".to_string(), "openai".to_string()]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn with_provider_attaches_name() {
        let err = Error::auth("bad key").with_provider("openai");
        assert_eq!(err.provider_name(), Some("openai"));
    }

    #[test]
    fn status_codes() {
        assert_eq!(Error::auth("x").status_code(), Some(401));
        assert_eq!(Error::rate_limit("x").status_code(), Some(429));
    }
}
