//! Provider registry: the static catalog of providers, their models, and
//! the environment variables gating their availability.
//!
//! Availability is computed exactly once, when the registry is built, and is
//! immutable for the life of the process. Credential changes mid-process are
//! not observed until restart. The registry is built at startup and injected
//! by reference into the router and collector.

use std::fmt;

use serde::Serialize;

/// Environment variable overriding a provider's base URL:
/// `ARENA_<PROVIDER>_BASE_URL` (provider key uppercased).
fn base_url_env_key(provider_key: &str) -> String {
    format!("ARENA_{}_BASE_URL", provider_key.to_uppercase())
}

/// Configuration for one provider.
///
/// `wire_prefix` is the vendor identifier used to compose wire model
/// identifiers and pricing keys (`<wire_prefix>/<model>`). It usually equals
/// the provider key, but not always: Google models go out as `gemini/...`.
/// Keeping the prefix here makes the mapping data, not code.
#[derive(Clone, Serialize)]
pub struct ProviderConfig {
    pub key: String,
    pub models: Vec<String>,
    pub env_key: String,
    pub wire_prefix: String,
    pub base_url: String,
    pub available: bool,
    #[serde(skip)]
    pub credential: Option<String>,
}

impl ProviderConfig {
    pub fn new(
        key: impl Into<String>,
        models: &[&str],
        env_key: impl Into<String>,
        wire_prefix: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            models: models.iter().map(|m| m.to_string()).collect(),
            env_key: env_key.into(),
            wire_prefix: wire_prefix.into(),
            base_url: base_url.into(),
            available: false,
            credential: None,
        }
    }

    /// Wire model identifier for one of this provider's models.
    pub fn wire_model(&self, model: &str) -> String {
        format!("{}/{}", self.wire_prefix, model)
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("key", &self.key)
            .field("models", &self.models)
            .field("env_key", &self.env_key)
            .field("wire_prefix", &self.wire_prefix)
            .field("base_url", &self.base_url)
            .field("available", &self.available)
            .field("credential", &self.credential.as_ref().map(|_| "***"))
            .finish()
    }
}

/// The built-in provider catalog.
pub fn default_catalog() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new(
            "openai",
            &["gpt-4o-mini", "gpt-4o", "gpt-3.5-turbo", "gpt-4-turbo"],
            "OPENAI_API_KEY",
            "openai",
            "https://api.openai.com/v1",
        ),
        ProviderConfig::new(
            "anthropic",
            &["claude-3-5-sonnet-20241022", "claude-3-haiku-20240307"],
            "ANTHROPIC_API_KEY",
            "anthropic",
            "https://api.anthropic.com/v1",
        ),
        ProviderConfig::new(
            "google",
            &["gemini-2.5-flash", "gemini-2.5-pro"],
            "GEMINI_API_KEY",
            "gemini",
            "https://generativelanguage.googleapis.com/v1beta/openai",
        ),
    ]
}

/// Immutable snapshot of the provider catalog with availability resolved.
///
/// Declaration order is preserved; it is the tie-break for fallback
/// selection.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Vec<ProviderConfig>,
}

impl ProviderRegistry {
    /// Build the default catalog, reading each provider's env vars once.
    pub fn from_env() -> Self {
        Self::with_env_lookup(default_catalog(), |key| std::env::var(key).ok())
    }

    /// Build from an explicit catalog and environment lookup.
    ///
    /// The lookup seam exists so tests can resolve availability without
    /// touching process-global environment variables.
    pub fn with_env_lookup(
        catalog: Vec<ProviderConfig>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let providers = catalog
            .into_iter()
            .map(|mut p| {
                p.credential = lookup(&p.env_key).filter(|v| !v.trim().is_empty());
                p.available = p.credential.is_some();
                if let Some(base_url) = lookup(&base_url_env_key(&p.key)) {
                    if !base_url.trim().is_empty() {
                        p.base_url = base_url;
                    }
                }
                p
            })
            .collect();
        Self { providers }
    }

    /// All providers, in declaration order.
    pub fn providers(&self) -> &[ProviderConfig] {
        &self.providers
    }

    pub fn get(&self, key: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.key == key)
    }

    /// Models selectable for a provider. Empty for unknown or unavailable
    /// providers; never an error.
    pub fn available_models(&self, key: &str) -> &[String] {
        self.get(key)
            .filter(|p| p.available)
            .map(|p| p.models.as_slice())
            .unwrap_or(&[])
    }

    /// Wire model identifier, `None` if the provider key is unknown.
    pub fn wire_model(&self, provider: &str, model: &str) -> Option<String> {
        self.get(provider).map(|p| p.wire_model(model))
    }

    /// First available provider other than `exclude`, with its first model.
    ///
    /// Declaration order is the only tie-break.
    pub fn fallback_for(&self, exclude: &str) -> Option<(&str, &str)> {
        self.providers
            .iter()
            .filter(|p| p.available && p.key != exclude)
            .find_map(|p| {
                p.models
                    .first()
                    .map(|m| (p.key.as_str(), m.as_str()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_availability_from_lookup() {
        let registry = ProviderRegistry::with_env_lookup(
            default_catalog(),
            lookup_from(&[("OPENAI_API_KEY", "sk-test")]),
        );
        assert!(registry.get("openai").unwrap().available);
        assert!(!registry.get("anthropic").unwrap().available);
        assert!(!registry.get("google").unwrap().available);
    }

    #[test]
    fn test_blank_credential_is_unavailable() {
        let registry = ProviderRegistry::with_env_lookup(
            default_catalog(),
            lookup_from(&[("OPENAI_API_KEY", "   ")]),
        );
        assert!(!registry.get("openai").unwrap().available);
        assert!(registry.available_models("openai").is_empty());
    }

    #[test]
    fn test_available_models_unknown_provider_is_empty() {
        let registry = ProviderRegistry::with_env_lookup(default_catalog(), |_| None);
        assert!(registry.available_models("mistral").is_empty());
    }

    #[test]
    fn test_available_models_lists_declared_models() {
        let registry = ProviderRegistry::with_env_lookup(
            default_catalog(),
            lookup_from(&[("ANTHROPIC_API_KEY", "sk-ant")]),
        );
        let models = registry.available_models("anthropic");
        assert_eq!(
            models,
            &[
                "claude-3-5-sonnet-20241022".to_string(),
                "claude-3-haiku-20240307".to_string(),
            ]
        );
    }

    #[test]
    fn test_google_wire_prefix_is_gemini() {
        let registry = ProviderRegistry::with_env_lookup(default_catalog(), |_| None);
        assert_eq!(
            registry.wire_model("google", "gemini-2.5-flash").unwrap(),
            "gemini/gemini-2.5-flash"
        );
        assert_eq!(
            registry.wire_model("openai", "gpt-4o-mini").unwrap(),
            "openai/gpt-4o-mini"
        );
        assert!(registry.wire_model("mistral", "m").is_none());
    }

    #[test]
    fn test_base_url_override() {
        let registry = ProviderRegistry::with_env_lookup(
            default_catalog(),
            lookup_from(&[
                ("OPENAI_API_KEY", "sk-test"),
                ("ARENA_OPENAI_BASE_URL", "http://localhost:8080/v1"),
            ]),
        );
        assert_eq!(
            registry.get("openai").unwrap().base_url,
            "http://localhost:8080/v1"
        );
        // Others keep their defaults.
        assert_eq!(
            registry.get("anthropic").unwrap().base_url,
            "https://api.anthropic.com/v1"
        );
    }

    #[test]
    fn test_fallback_first_available_in_declaration_order() {
        let registry = ProviderRegistry::with_env_lookup(
            default_catalog(),
            lookup_from(&[("ANTHROPIC_API_KEY", "a"), ("GEMINI_API_KEY", "g")]),
        );
        // openai unavailable; anthropic is declared before google.
        assert_eq!(
            registry.fallback_for("openai"),
            Some(("anthropic", "claude-3-5-sonnet-20241022"))
        );
        // Excluding anthropic skips to google.
        assert_eq!(
            registry.fallback_for("anthropic"),
            Some(("google", "gemini-2.5-flash"))
        );
    }

    #[test]
    fn test_debug_redacts_credential() {
        let registry = ProviderRegistry::with_env_lookup(
            default_catalog(),
            lookup_from(&[("OPENAI_API_KEY", "sk-secret-value")]),
        );
        let rendered = format!("{:?}", registry.get("openai").unwrap());
        assert!(!rendered.contains("sk-secret-value"));
        assert!(rendered.contains("***"));
    }
}
