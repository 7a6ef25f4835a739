//! Provider transport: one abstracted chat-completions call.
//!
//! Every provider is reached through the same OpenAI-compatible
//! `POST {base_url}/chat/completions` shape; the router hands the transport a
//! provider-qualified model identifier and the transport forwards it
//! verbatim. Failures come back pre-classified so the retry loop never has
//! to inspect raw errors.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::CompletionError;
use super::types::{CompletionRequest, Message};

// =============================================================================
// FAILURE CLASSIFICATION
// =============================================================================

/// Classified failure kind for one transport attempt.
///
/// The kind decides the retry policy; classification happens here, before
/// the retry loop ever sees the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Provider signalled a rate limit (429 or message text).
    RateLimit,
    /// Authorization/credential problem (401/403 or message text).
    Credential,
    /// The request timed out.
    Timeout,
    /// Anything else.
    Upstream,
}

impl FailureKind {
    /// Classify from HTTP status first, then from the error message.
    ///
    /// The message sniffing mirrors how upstream SDK errors describe
    /// themselves ("rate limit", "api key", "unauthorized", "timeout") so a
    /// 200-level body error or a status-less network error still lands in
    /// the right bucket.
    pub fn classify(status: Option<StatusCode>, message: &str) -> Self {
        if let Some(status) = status {
            match status.as_u16() {
                429 => return FailureKind::RateLimit,
                401 | 403 => return FailureKind::Credential,
                408 | 504 => return FailureKind::Timeout,
                _ => {}
            }
        }
        let lower = message.to_lowercase();
        if lower.contains("rate limit") || lower.contains("too many requests") {
            FailureKind::RateLimit
        } else if lower.contains("api key")
            || lower.contains("unauthorized")
            || lower.contains("authentication")
        {
            FailureKind::Credential
        } else if lower.contains("timed out") || lower.contains("timeout") {
            FailureKind::Timeout
        } else {
            FailureKind::Upstream
        }
    }
}

/// One failed transport attempt.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CallFailure {
    pub kind: FailureKind,
    pub message: String,
    pub http_status: Option<u16>,
}

impl CallFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            http_status: None,
        }
    }

    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: FailureKind::classify(Some(status), &message),
            message,
            http_status: Some(status.as_u16()),
        }
    }
}

// =============================================================================
// TRAIT
// =============================================================================

/// The single abstracted provider call, returning response text.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(&self, req: &CompletionRequest) -> Result<String, CallFailure>;
}

// =============================================================================
// HTTP ADAPTER
// =============================================================================

/// OpenAI-compatible chat-completions adapter.
///
/// One instance per provider, holding that provider's bearer credential and
/// base URL. The base URL is configurable so tests can stand up a mock
/// server in its place.
#[derive(Debug, Clone)]
pub struct HttpChatTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChatTransport {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, CompletionError> {
        let api_key = api_key.into();
        let base_url = base_url.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| CompletionError::invalid_request("credential is not a valid header value"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| {
                CompletionError::invalid_request(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f64,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a Message> for ApiMessage<'a> {
    fn from(m: &'a Message) -> Self {
        Self {
            role: m.role.as_str(),
            content: &m.content,
        }
    }
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}

// =============================================================================
// TRANSPORT IMPL
// =============================================================================

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn complete(&self, req: &CompletionRequest) -> Result<String, CallFailure> {
        let messages: Vec<ApiMessage> = req.messages.iter().map(ApiMessage::from).collect();
        let api_req = ChatApiRequest {
            model: &req.model,
            messages,
            temperature: req.temperature,
        };

        let response = self
            .client
            .post(self.chat_url())
            .timeout(req.timeout)
            .json(&api_req)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_reqwest)?;

        if !status.is_success() {
            let message = serde_json::from_str::<ChatApiResponse>(&body)
                .ok()
                .and_then(|parsed| parsed.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(CallFailure::from_status(status, message));
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body).map_err(|e| {
            CallFailure::new(FailureKind::Upstream, format!("invalid JSON response: {e}"))
        })?;

        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_else(|| "unspecified error".into());
            return Err(CallFailure::new(
                FailureKind::classify(None, &message),
                message,
            ));
        }

        parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| CallFailure::new(FailureKind::Upstream, "no choices in response"))
    }
}

fn classify_reqwest(e: reqwest::Error) -> CallFailure {
    if e.is_timeout() {
        CallFailure::new(FailureKind::Timeout, format!("request timed out: {e}"))
    } else {
        CallFailure::new(FailureKind::classify(None, &e.to_string()), e.to_string())
    }
}
