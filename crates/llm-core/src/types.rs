//! Validated domain newtypes shared across requests, responses, and provider configuration.

use crate::error::Error;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A provider API key. Never printed or serialized in plaintext.
#[derive(Clone, Deserialize)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Wrap a raw key value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into()))
    }

    /// Expose the underlying secret. Callers must not log or persist the result.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

/// A non-empty, bounded maximum-tokens request parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaxTokens(u32);

impl MaxTokens {
    /// Largest value accepted; providers commonly reject larger completions outright.
    pub const MAX: u32 = 1_000_000;

    /// Validate and wrap a raw token count.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRequest`] if `value` is zero or exceeds [`Self::MAX`].
    pub fn new(value: u32) -> Result<Self, Error> {
        if value == 0 {
            return Err(Error::validation(
                "max_tokens must be greater than zero",
                Some("max_tokens".to_string()),
                "invalid_max_tokens",
            ));
        }
        if value > Self::MAX {
            return Err(Error::validation(
                format!("max_tokens must not exceed {}, got {value}", Self::MAX),
                Some("max_tokens".to_string()),
                "invalid_max_tokens",
            ));
        }
        Ok(Self(value))
    }

    /// The wrapped value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

/// A non-empty model identifier (e.g. `"gpt-4o"`, `"claude-3-5-sonnet"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId(String);

impl ModelId {
    /// Validate and wrap a raw model name.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRequest`] if `value` is empty or whitespace-only.
    pub fn new(value: impl Into<String>) -> Result<Self, Error> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(Error::validation(
                "model name must not be empty",
                Some("model".to_string()),
                "empty_model",
            ));
        }
        Ok(Self(value))
    }

    /// Borrow the model name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A non-empty provider registration name (e.g. `"openai"`, `"anthropic"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(String);

impl ProviderId {
    /// Validate and wrap a raw provider name.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRequest`] if `value` is empty or whitespace-only.
    pub fn new(value: impl Into<String>) -> Result<Self, Error> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(Error::validation(
                "provider name must not be empty",
                Some("provider".to_string()),
                "empty_provider",
            ));
        }
        Ok(Self(value))
    }

    /// Borrow the provider name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Unique per-request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(uuid::Uuid);

impl RequestId {
    /// Generate a fresh, random request ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Sampling temperature, clamped to the `[0.0, 2.0]` range honoured by every mainstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature(f32);

impl Temperature {
    /// Validate and wrap a raw temperature value.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRequest`] if `value` is outside `[0.0, 2.0]` or non-finite.
    pub fn new(value: f32) -> Result<Self, Error> {
        if !value.is_finite() || !(0.0..=2.0).contains(&value) {
            return Err(Error::validation(
                format!("temperature must be between 0.0 and 2.0, got {value}"),
                Some("temperature".to_string()),
                "invalid_temperature",
            ));
        }
        Ok(Self(value))
    }

    /// The wrapped value.
    #[must_use]
    pub fn get(self) -> f32 {
        self.0
    }
}

/// Multi-tenancy identifier attached to request metadata for routing and cost attribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    /// Validate and wrap a raw tenant identifier.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRequest`] if `value` is empty.
    pub fn new(value: impl Into<String>) -> Result<Self, Error> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(Error::validation(
                "tenant id must not be empty",
                Some("tenant_id".to_string()),
                "empty_tenant_id",
            ));
        }
        Ok(Self(value))
    }

    /// Borrow the tenant id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Top-k sampling parameter; provider-specific but bounded to a sane range here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopK(u32);

impl TopK {
    /// Validate and wrap a raw top-k value.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRequest`] if `value` is zero.
    pub fn new(value: u32) -> Result<Self, Error> {
        if value == 0 {
            return Err(Error::validation(
                "top_k must be greater than zero",
                Some("top_k".to_string()),
                "invalid_top_k",
            ));
        }
        Ok(Self(value))
    }

    /// The wrapped value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Top-p (nucleus sampling) parameter, clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TopP(f32);

impl TopP {
    /// Validate and wrap a raw top-p value.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRequest`] if `value` is outside `[0.0, 1.0]` or non-finite.
    pub fn new(value: f32) -> Result<Self, Error> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(Error::validation(
                format!("top_p must be between 0.0 and 1.0, got {value}"),
                Some("top_p".to_string()),
                "invalid_top_p",
            ));
        }
        Ok(Self(value))
    }

    /// The wrapped value.
    #[must_use]
    pub fn get(self) -> f32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_never_prints_secret() {
        let key = ApiKey::new("sk-super-secret");
        assert_eq!(format!("{key:?}"), "ApiKey(***)");
        assert_eq!(key.expose(), "sk-super-secret");
    }

    #[test]
    fn max_tokens_rejects_zero() {
        assert!(MaxTokens::new(0).is_err());
        assert!(MaxTokens::new(100).is_ok());
    }

    #[test]
    fn model_id_rejects_empty() {
        assert!(ModelId::new("").is_err());
        assert!(ModelId::new("   ").is_err());
        assert!(ModelId::new("gpt-4o").is_ok());
    }

    #[test]
    fn temperature_bounds() {
        assert!(Temperature::new(-0.1).is_err());
        assert!(Temperature::new(2.1).is_err());
        assert!(Temperature::new(0.7).is_ok());
    }

    #[test]
    fn top_p_bounds() {
        assert!(TopP::new(1.5).is_err());
        assert!(TopP::new(0.9).is_ok());
    }

    #[test]
    fn request_id_is_unique() {
        assert_ne!(RequestId::generate(), RequestId::generate());
    }
}
