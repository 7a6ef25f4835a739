#![forbid(unsafe_code)]

//! # arena-harness
//!
//! Send one prompt to several LLM providers, compare the answers blind,
//! and keep score.
//!
//! The router fans a completion out to whichever of the configured
//! providers hold credentials, with classified retries and cross-provider
//! fallback. The collector runs one prompt against N provider/model combos,
//! shuffles the responses behind single-letter labels, and persists results,
//! human rubric scores, and pairwise preferences to an append-only JSONL
//! log that merge/tally readers reconstruct views from.

pub mod compare;
pub mod pricing;
pub mod prompts;
pub mod registry;
pub mod router;
pub mod store;

pub use compare::{
    estimate_tokens, new_run_id, Collector, CompareError, CompareOptions, Combo, ComparisonItem,
    ComparisonRun, ItemStatus, BLIND_LABELS,
};
pub use pricing::{PricingEntry, PricingError, PricingTable};
pub use prompts::{sha256_text, PromptEntry, PromptSet, PromptSetError};
pub use registry::{default_catalog, ProviderConfig, ProviderRegistry};
pub use router::{
    CompletionError, Message, Role, Router, RouterConfig, DEFAULT_FALLBACK, DEFAULT_PRIMARY,
};
pub use store::{
    export_preferences_csv, export_results_csv, merge_latest_scores, tally_preferences,
    Envelope, EvalLog, EvaluationRecord, JoinedRow, PreferenceRecord, PreferenceSide,
    ResultRecord, Rubric, ScoreRecord, StoreError, WinTally, DEFAULT_LOG_PATH,
};
