//! Error taxonomy for the completion router.

use thiserror::Error;

/// Errors surfaced by the completion router.
///
/// Every variant is a distinct, user-facing failure kind; callers building a
/// UI can present them directly (the unavailable-provider message names the
/// env var to set, the unsupported-model message lists the valid models).
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Provider key is not in the registry.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Provider is known but its credential env var is unset or blank.
    #[error("provider '{provider}' is not available; set the {env_key} environment variable")]
    ProviderUnavailable { provider: String, env_key: String },

    /// Model is not in the provider's declared model list.
    #[error("model '{model}' is not available for provider '{provider}'; available models: {available}")]
    ModelNotSupported {
        provider: String,
        model: String,
        available: String,
    },

    /// Malformed input (empty messages, bad role content, temperature out of range).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Rate limit persisted through every backoff retry.
    #[error("rate limit exceeded for {provider}")]
    RateLimited { provider: String },

    /// Authorization failure. Never retried.
    #[error("invalid API key for {provider}")]
    InvalidCredential { provider: String },

    /// Request timed out on every attempt.
    #[error("request timeout for {provider}")]
    RequestTimeout { provider: String },

    /// Any other upstream failure, surfaced after the final attempt.
    #[error("failed after {attempts} attempts: {message}")]
    Upstream {
        provider: String,
        attempts: u32,
        message: String,
    },
}

impl CompletionError {
    pub fn unknown_provider(provider: impl Into<String>) -> Self {
        Self::UnknownProvider(provider.into())
    }

    pub fn unavailable(provider: impl Into<String>, env_key: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            env_key: env_key.into(),
        }
    }

    pub fn model_not_supported(
        provider: impl Into<String>,
        model: impl Into<String>,
        models: &[String],
    ) -> Self {
        Self::ModelNotSupported {
            provider: provider.into(),
            model: model.into(),
            available: models.join(", "),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn rate_limited(provider: impl Into<String>) -> Self {
        Self::RateLimited {
            provider: provider.into(),
        }
    }

    pub fn invalid_credential(provider: impl Into<String>) -> Self {
        Self::InvalidCredential {
            provider: provider.into(),
        }
    }

    pub fn request_timeout(provider: impl Into<String>) -> Self {
        Self::RequestTimeout {
            provider: provider.into(),
        }
    }

    pub fn upstream(provider: impl Into<String>, attempts: u32, message: impl Into<String>) -> Self {
        Self::Upstream {
            provider: provider.into(),
            attempts,
            message: message.into(),
        }
    }

    /// Short error code for logs and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownProvider(_) => "unknown_provider",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::ModelNotSupported { .. } => "model_not_supported",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidCredential { .. } => "invalid_credential",
            Self::RequestTimeout { .. } => "request_timeout",
            Self::Upstream { .. } => "upstream_error",
        }
    }

    /// The provider key this error is attributed to, when there is one.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::UnknownProvider(p) => Some(p),
            Self::ProviderUnavailable { provider, .. } => Some(provider),
            Self::ModelNotSupported { provider, .. } => Some(provider),
            Self::InvalidRequest(_) => None,
            Self::RateLimited { provider } => Some(provider),
            Self::InvalidCredential { provider } => Some(provider),
            Self::RequestTimeout { provider } => Some(provider),
            Self::Upstream { provider, .. } => Some(provider),
        }
    }
}
