//! Completion router: validates requests against the provider registry,
//! dispatches them to per-provider transports, and retries transient
//! failures with a bounded, classified policy.
//!
//! Every completion in the crate flows through [`Router::complete`]. The
//! caller names a provider and model in catalog terms; the router owns wire
//! naming, credential handling, and the retry schedule.

pub mod error;
pub mod transport;
pub mod types;

pub use error::CompletionError;
pub use transport::{CallFailure, ChatTransport, FailureKind, HttpChatTransport};
pub use types::{
    validate_messages, validate_temperature, CompletionRequest, Message, Role,
    DEFAULT_TEMPERATURE,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::registry::ProviderRegistry;

/// Default primary route for fallback completion.
pub const DEFAULT_PRIMARY: (&str, &str) = ("openai", "gpt-4o-mini");
/// Default fallback route, deliberately on a different provider.
pub const DEFAULT_FALLBACK: (&str, &str) = ("anthropic", "claude-3-haiku-20240307");

// =============================================================================
// CONFIG
// =============================================================================

/// Retry and timeout policy for the router.
///
/// `max_retries` counts total requests, not re-requests: the default of 3
/// means at most three requests leave the process for one completion.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub max_retries: u32,
    pub timeout: Duration,
    pub rate_limit_base_delay: Duration,
    pub retry_pause: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(30),
            rate_limit_base_delay: Duration::from_secs(2),
            retry_pause: Duration::from_secs(1),
        }
    }
}

impl RouterConfig {
    /// Delay to wait before the next attempt after a failure of `kind`, or
    /// `None` when the failure is terminal and must surface immediately.
    pub fn retry_delay(&self, kind: FailureKind, attempt: u32) -> Option<Duration> {
        match kind {
            FailureKind::Credential => None,
            FailureKind::RateLimit => Some(backoff_delay(self.rate_limit_base_delay, attempt)),
            FailureKind::Timeout => Some(Duration::ZERO),
            FailureKind::Upstream => Some(self.retry_pause),
        }
    }
}

/// Exponential backoff delay: `base * 2^attempt`, exponent capped at 5.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.pow(attempt.min(5))
}

// =============================================================================
// ROUTER
// =============================================================================

/// Multi-provider completion router.
///
/// Holds one [`ChatTransport`] per available provider, keyed by registry
/// provider key. Cheap to share behind an [`Arc`]; all methods take `&self`.
pub struct Router {
    registry: Arc<ProviderRegistry>,
    transports: HashMap<String, Arc<dyn ChatTransport>>,
    config: RouterConfig,
}

impl Router {
    pub fn new(registry: Arc<ProviderRegistry>) -> Result<Self, CompletionError> {
        Self::with_config(registry, RouterConfig::default())
    }

    /// Build a router, creating an HTTP transport for every provider with a
    /// resolved credential.
    pub fn with_config(
        registry: Arc<ProviderRegistry>,
        config: RouterConfig,
    ) -> Result<Self, CompletionError> {
        let mut transports: HashMap<String, Arc<dyn ChatTransport>> = HashMap::new();
        for provider in registry.providers() {
            if let Some(credential) = provider.credential.as_deref() {
                let transport = HttpChatTransport::new(credential, &provider.base_url)?;
                transports.insert(provider.key.clone(), Arc::new(transport));
            }
        }
        Ok(Self {
            registry,
            transports,
            config,
        })
    }

    /// Replace the transport for one provider. Used by tests to substitute
    /// a scripted transport without an HTTP server.
    pub fn with_transport(
        mut self,
        provider: impl Into<String>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        self.transports.insert(provider.into(), transport);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Route one completion.
    ///
    /// Validation happens in a fixed order before any network traffic:
    /// provider known, provider available, model declared for the provider,
    /// messages well-formed, temperature in range. A request that fails
    /// validation never consumes an attempt.
    pub async fn complete(
        &self,
        provider: &str,
        model: &str,
        messages: &[Message],
        temperature: f64,
    ) -> Result<String, CompletionError> {
        let entry = self
            .registry
            .get(provider)
            .ok_or_else(|| CompletionError::unknown_provider(provider))?;
        if !entry.available {
            return Err(CompletionError::unavailable(provider, &entry.env_key));
        }
        if !entry.models.iter().any(|m| m == model) {
            return Err(CompletionError::model_not_supported(
                provider,
                model,
                &entry.models,
            ));
        }
        validate_messages(messages)?;
        validate_temperature(temperature)?;

        let transport = self
            .transports
            .get(provider)
            .cloned()
            .ok_or_else(|| CompletionError::upstream(provider, 0, "no transport registered"))?;

        let request = CompletionRequest::new(provider, entry.wire_model(model), messages.to_vec())
            .temperature(temperature)
            .timeout(self.config.timeout);

        self.run_with_retries(transport.as_ref(), &request).await
    }

    async fn run_with_retries(
        &self,
        transport: &dyn ChatTransport,
        request: &CompletionRequest,
    ) -> Result<String, CompletionError> {
        let provider = request.provider.as_str();
        for attempt in 0..self.config.max_retries {
            match transport.complete(request).await {
                Ok(text) => {
                    debug!(provider, model = %request.model, attempt, "completion ok");
                    return Ok(text);
                }
                Err(failure) => {
                    warn!(
                        provider,
                        model = %request.model,
                        attempt,
                        kind = ?failure.kind,
                        error = %failure,
                        "completion attempt failed"
                    );
                    let final_attempt = attempt + 1 == self.config.max_retries;
                    match self.config.retry_delay(failure.kind, attempt) {
                        None => return Err(self.terminal_error(provider, failure)),
                        Some(_) if final_attempt => {
                            return Err(self.terminal_error(provider, failure))
                        }
                        Some(delay) => {
                            if !delay.is_zero() {
                                tokio::time::sleep(delay).await;
                            }
                        }
                    }
                }
            }
        }
        // Only reachable with a zero-attempt config.
        Err(CompletionError::upstream(
            provider,
            0,
            "no completion attempts were made",
        ))
    }

    /// Convert the last transport failure into the caller-facing error.
    fn terminal_error(&self, provider: &str, failure: CallFailure) -> CompletionError {
        match failure.kind {
            FailureKind::Credential => CompletionError::invalid_credential(provider),
            FailureKind::RateLimit => CompletionError::rate_limited(provider),
            FailureKind::Timeout => CompletionError::request_timeout(provider),
            FailureKind::Upstream => {
                CompletionError::upstream(provider, self.config.max_retries, failure.message)
            }
        }
    }

    /// Complete on the default primary route, falling back to the default
    /// fallback route. Both routes failing yields `None`, never an error.
    pub async fn complete_with_fallback(
        &self,
        messages: &[Message],
        temperature: f64,
    ) -> Option<String> {
        self.complete_with_fallback_to(DEFAULT_PRIMARY, DEFAULT_FALLBACK, messages, temperature)
            .await
    }

    /// Complete on `primary`, then on `fallback` if the primary route fails
    /// for any reason. Each route is a `(provider, model)` pair and gets its
    /// own full retry budget.
    pub async fn complete_with_fallback_to(
        &self,
        primary: (&str, &str),
        fallback: (&str, &str),
        messages: &[Message],
        temperature: f64,
    ) -> Option<String> {
        match self.complete(primary.0, primary.1, messages, temperature).await {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(
                    provider = primary.0,
                    model = primary.1,
                    error = %err,
                    "primary route failed, trying fallback"
                );
                match self
                    .complete(fallback.0, fallback.1, messages, temperature)
                    .await
                {
                    Ok(text) => Some(text),
                    Err(err) => {
                        warn!(
                            provider = fallback.0,
                            model = fallback.1,
                            error = %err,
                            "fallback route failed"
                        );
                        None
                    }
                }
            }
        }
    }
}
