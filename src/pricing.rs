//! Model pricing table.
//!
//! Rates are USD per 1K tokens, keyed by wire model identifier
//! (`<wire_prefix>/<model>`). A built-in table covers the default catalog;
//! an external YAML file can replace it entirely.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("failed to read pricing file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse pricing file {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Per-1K-token rates for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingEntry {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl PricingEntry {
    const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }
}

// =============================================================================
// PRICING DATA
// =============================================================================

// OpenAI
// GPT-4o-mini: $0.15/1M input, $0.60/1M output
const GPT_4O_MINI: PricingEntry = PricingEntry::new(0.00015, 0.0006);
// GPT-4o: $2.50/1M input, $10.00/1M output
const GPT_4O: PricingEntry = PricingEntry::new(0.0025, 0.01);
// GPT-3.5 Turbo: $0.50/1M input, $1.50/1M output
const GPT_35_TURBO: PricingEntry = PricingEntry::new(0.0005, 0.0015);
// GPT-4 Turbo: $10.00/1M input, $30.00/1M output
const GPT_4_TURBO: PricingEntry = PricingEntry::new(0.01, 0.03);

// Anthropic
// Claude 3.5 Sonnet: $3.00/1M input, $15.00/1M output
const CLAUDE_35_SONNET: PricingEntry = PricingEntry::new(0.003, 0.015);
// Claude 3 Haiku: $0.25/1M input, $1.25/1M output
const CLAUDE_3_HAIKU: PricingEntry = PricingEntry::new(0.00025, 0.00125);

// Google (verify periodically against the Gemini pricing page)
// Gemini 2.5 Flash: $0.30/1M input, $2.50/1M output
const GEMINI_25_FLASH: PricingEntry = PricingEntry::new(0.0003, 0.0025);
// Gemini 2.5 Pro: $1.25/1M input, $10.00/1M output
const GEMINI_25_PRO: PricingEntry = PricingEntry::new(0.00125, 0.01);

// =============================================================================
// TABLE
// =============================================================================

/// Pricing lookup table.
///
/// Unpriced models are not an error anywhere in the crate: estimation
/// returns $0.00 for them so a comparison can still run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingTable {
    #[serde(default)]
    models: HashMap<String, PricingEntry>,
}

impl PricingTable {
    /// Built-in rates for every model in the default catalog.
    pub fn builtin() -> Self {
        let mut models = HashMap::new();
        models.insert("openai/gpt-4o-mini".to_string(), GPT_4O_MINI);
        models.insert("openai/gpt-4o".to_string(), GPT_4O);
        models.insert("openai/gpt-3.5-turbo".to_string(), GPT_35_TURBO);
        models.insert("openai/gpt-4-turbo".to_string(), GPT_4_TURBO);
        models.insert(
            "anthropic/claude-3-5-sonnet-20241022".to_string(),
            CLAUDE_35_SONNET,
        );
        models.insert(
            "anthropic/claude-3-haiku-20240307".to_string(),
            CLAUDE_3_HAIKU,
        );
        models.insert("gemini/gemini-2.5-flash".to_string(), GEMINI_25_FLASH);
        models.insert("gemini/gemini-2.5-pro".to_string(), GEMINI_25_PRO);
        Self { models }
    }

    /// Load a table from a YAML file with a top-level `models:` mapping.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PricingError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| PricingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| PricingError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn rate(&self, wire_model: &str) -> Option<PricingEntry> {
        self.models.get(wire_model).copied()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Estimated USD cost, rounded to 6 decimal places. Unknown models
    /// cost $0.00.
    pub fn estimate_cost_usd(
        &self,
        wire_model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> f64 {
        let Some(entry) = self.rate(wire_model) else {
            return 0.0;
        };
        let raw = (input_tokens as f64 / 1000.0) * entry.input_per_1k
            + (output_tokens as f64 / 1000.0) * entry.output_per_1k;
        round6(raw)
    }
}

fn round6(x: f64) -> f64 {
    (x * 1_000_000.0).round() / 1_000_000.0
}
