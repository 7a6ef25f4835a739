//! Blind comparison collector.
//!
//! Runs one prompt against several provider/model combos and returns the
//! responses under shuffled single-letter labels, so a human can score them
//! without knowing which model produced which answer. The label mapping is
//! kept alongside the items for later reveal.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::pricing::PricingTable;
use crate::prompts::sha256_text;
use crate::router::{Message, Router, DEFAULT_TEMPERATURE};

/// Labels assigned to shuffled responses, in display order.
pub const BLIND_LABELS: [char; 26] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
    'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

/// A comparison needs at least two responses to be a comparison.
pub const MIN_COMBOS: usize = 2;
/// One label per letter.
pub const MAX_COMBOS: usize = BLIND_LABELS.len();

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("a comparison takes {MIN_COMBOS} to {MAX_COMBOS} combos, got {got}")]
    ComboCount { got: usize },
    #[error("combo must be '<provider>/<model>', got '{0}'")]
    ComboFormat(String),
}

/// One provider/model pair to run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Combo {
    pub provider: String,
    pub model: String,
}

impl Combo {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl FromStr for Combo {
    type Err = CompareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Ok(Self::new(provider, model))
            }
            _ => Err(CompareError::ComboFormat(s.to_string())),
        }
    }
}

impl fmt::Display for Combo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Options for one comparison run.
#[derive(Debug, Clone)]
pub struct CompareOptions {
    pub temperature: f64,
    /// Whether identities should stay hidden when the run is displayed.
    /// Labels and mapping are produced either way.
    pub blind: bool,
    /// Optional system prompt prepended to every combo's messages.
    pub priming_text: Option<String>,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            blind: true,
            priming_text: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Ok,
    Error,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// One combo's outcome within a comparison run.
///
/// Token counts are char/4 estimates, not vendor usage; cost follows from
/// them. Failed calls keep their slot so the run shape is stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonItem {
    pub provider: String,
    pub model: String,
    pub temperature: f64,
    pub latency_ms: u64,
    pub input_tokens_est: u64,
    pub output_tokens_est: u64,
    pub estimated_cost_usd: f64,
    pub response_text: String,
    pub status: ItemStatus,
    pub error: Option<String>,
    pub blind_label: String,
}

/// A completed comparison: items in display order plus the label mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRun {
    pub run_id: String,
    pub prompt_text: String,
    pub prompt_sha256: String,
    pub priming_text: Option<String>,
    pub temperature: f64,
    pub blind: bool,
    pub items: Vec<ComparisonItem>,
    pub mapping: BTreeMap<String, Combo>,
}

/// Heuristic token count: one token per four characters, with a floor of
/// one for non-empty text. Good enough for relative cost comparison.
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let tokens = (text.chars().count() as f64 / 4.0).round() as u64;
    tokens.max(1)
}

/// Fresh run identifier: UTC second timestamp plus a short random suffix.
pub fn new_run_id() -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("run-{stamp}-{}", &suffix[..8])
}

type ShuffleFn = Box<dyn Fn(&mut [usize]) + Send + Sync>;

/// Runs comparisons through a [`Router`] and prices them from a
/// [`PricingTable`].
pub struct Collector {
    router: Arc<Router>,
    pricing: Arc<PricingTable>,
    shuffle: ShuffleFn,
}

impl Collector {
    pub fn new(router: Arc<Router>, pricing: Arc<PricingTable>) -> Self {
        Self {
            router,
            pricing,
            // Fresh thread-local RNG per run; no state carries across runs.
            shuffle: Box::new(|order| order.shuffle(&mut rand::rng())),
        }
    }

    /// Replace the shuffle with a deterministic one. Test seam.
    pub fn with_shuffle(
        mut self,
        shuffle: impl Fn(&mut [usize]) + Send + Sync + 'static,
    ) -> Self {
        self.shuffle = Box::new(shuffle);
        self
    }

    /// Run `prompt_text` against every combo and label the shuffled results.
    ///
    /// Calls run sequentially. A failed call becomes an error item with
    /// empty response text; it still gets a label and an input-cost
    /// estimate. No label is assigned until every call has finished.
    pub async fn compare(
        &self,
        prompt_text: &str,
        combos: &[Combo],
        options: &CompareOptions,
    ) -> Result<ComparisonRun, CompareError> {
        if !(MIN_COMBOS..=MAX_COMBOS).contains(&combos.len()) {
            return Err(CompareError::ComboCount { got: combos.len() });
        }

        let mut messages = Vec::new();
        if let Some(priming) = &options.priming_text {
            messages.push(Message::system(priming));
        }
        messages.push(Message::user(prompt_text));

        let joined_input = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let input_tokens = estimate_tokens(&joined_input);

        // Sequential on purpose: runs are a handful of calls and the log
        // stays readable.
        let mut items = Vec::with_capacity(combos.len());
        for combo in combos {
            let start = Instant::now();
            let outcome = self
                .router
                .complete(&combo.provider, &combo.model, &messages, options.temperature)
                .await;
            let latency_ms = start.elapsed().as_millis() as u64;

            let (response_text, status, error) = match outcome {
                Ok(text) => (text, ItemStatus::Ok, None),
                Err(err) => {
                    warn!(
                        provider = %combo.provider,
                        model = %combo.model,
                        error = %err,
                        "comparison item failed"
                    );
                    (String::new(), ItemStatus::Error, Some(err.to_string()))
                }
            };

            let output_tokens = estimate_tokens(&response_text);
            let wire_model = self
                .router
                .registry()
                .wire_model(&combo.provider, &combo.model)
                .unwrap_or_else(|| combo.to_string());
            let estimated_cost_usd =
                self.pricing
                    .estimate_cost_usd(&wire_model, input_tokens, output_tokens);

            items.push(ComparisonItem {
                provider: combo.provider.clone(),
                model: combo.model.clone(),
                temperature: options.temperature,
                latency_ms,
                input_tokens_est: input_tokens,
                output_tokens_est: output_tokens,
                estimated_cost_usd,
                response_text,
                status,
                error,
                blind_label: String::new(),
            });
        }

        let mut order: Vec<usize> = (0..items.len()).collect();
        (self.shuffle)(&mut order);

        let mut ordered = Vec::with_capacity(items.len());
        let mut mapping = BTreeMap::new();
        for (position, &index) in order.iter().enumerate() {
            let mut item = items[index].clone();
            let label = BLIND_LABELS[position].to_string();
            item.blind_label = label.clone();
            mapping.insert(label, Combo::new(&item.provider, &item.model));
            ordered.push(item);
        }

        Ok(ComparisonRun {
            run_id: new_run_id(),
            prompt_text: prompt_text.to_string(),
            prompt_sha256: sha256_text(prompt_text),
            priming_text: options.priming_text.clone(),
            temperature: options.temperature,
            blind: options.blind,
            items: ordered,
            mapping,
        })
    }
}
