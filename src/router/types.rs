//! Core types for the completion router.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CompletionError;

/// Default sampling temperature when the caller does not specify one.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Chat message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Validate a message sequence before it goes anywhere near the wire.
///
/// Checks: the list is non-empty, and every message has an allowed role and
/// non-blank content. Chat-turn alternation is deliberately NOT validated.
pub fn validate_messages(messages: &[Message]) -> Result<(), CompletionError> {
    if messages.is_empty() {
        return Err(CompletionError::invalid_request("messages must not be empty"));
    }
    for (idx, msg) in messages.iter().enumerate() {
        if msg.content.trim().is_empty() {
            return Err(CompletionError::invalid_request(format!(
                "message {idx} ({}) has blank content",
                msg.role.as_str()
            )));
        }
    }
    Ok(())
}

/// Validate a sampling temperature.
pub fn validate_temperature(temperature: f64) -> Result<(), CompletionError> {
    if !(0.0..=1.0).contains(&temperature) || temperature.is_nan() {
        return Err(CompletionError::invalid_request(format!(
            "temperature {temperature} outside [0.0, 1.0]"
        )));
    }
    Ok(())
}

/// One outbound completion request as handed to the transport.
///
/// `model` is the provider-qualified wire identifier (e.g.
/// `openai/gpt-4o-mini` or `gemini/gemini-2.5-flash`); `provider` is the
/// registry key, carried for error attribution only.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub provider: String,
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f64,
    pub timeout: Duration,
}

impl CompletionRequest {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            messages,
            temperature: DEFAULT_TEMPERATURE,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn temperature(mut self, t: f64) -> Self {
        self.temperature = t;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"assistant\"").unwrap(),
            Role::Assistant
        );
    }

    #[test]
    fn test_validate_messages_ok() {
        let messages = vec![Message::system("be brief"), Message::user("hi")];
        assert!(validate_messages(&messages).is_ok());
    }

    #[test]
    fn test_validate_messages_empty_list() {
        let err = validate_messages(&[]).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn test_validate_messages_blank_content() {
        let messages = vec![Message::user("   ")];
        let err = validate_messages(&messages).unwrap_err();
        assert!(err.to_string().contains("blank content"));
    }

    #[test]
    fn test_validate_temperature_bounds() {
        assert!(validate_temperature(0.0).is_ok());
        assert!(validate_temperature(1.0).is_ok());
        assert!(validate_temperature(-0.1).is_err());
        assert!(validate_temperature(1.5).is_err());
        assert!(validate_temperature(f64::NAN).is_err());
    }

    #[test]
    fn test_request_builder_defaults() {
        let req = CompletionRequest::new("openai", "openai/gpt-4o-mini", vec![Message::user("hi")]);
        assert!((req.temperature - DEFAULT_TEMPERATURE).abs() < 1e-12);
        assert_eq!(req.timeout, Duration::from_secs(30));

        let req = req.temperature(0.2).timeout(Duration::from_secs(5));
        assert!((req.temperature - 0.2).abs() < 1e-12);
        assert_eq!(req.timeout, Duration::from_secs(5));
    }
}
