//! Append-only evaluation log.
//!
//! Every comparison outcome and every human judgment lands in one JSONL
//! file as a tagged record: `result`, `score`, or `preference`, all sharing
//! a common envelope (version, timestamp, run id, prompt fingerprint).
//! Records are immutable once appended; corrections are new records with
//! newer timestamps, and readers resolve "latest wins" at merge time.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::compare::{ComparisonRun, ItemStatus};

/// Schema version stamped into every record envelope.
pub const RECORD_VERSION: u32 = 1;

/// Where the log lives unless a caller says otherwise.
pub const DEFAULT_LOG_PATH: &str = "experiments/results.jsonl";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("winner label '{0}' is not a side of the pair")]
    WinnerNotInPair(String),
}

// =============================================================================
// RECORD TYPES
// =============================================================================

/// Fields shared by every record kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub prompt_sha256: String,
}

impl Envelope {
    /// Envelope stamped with the current time.
    pub fn new(run_id: impl Into<String>, prompt_sha256: impl Into<String>) -> Self {
        Self {
            version: RECORD_VERSION,
            timestamp: Utc::now(),
            run_id: run_id.into(),
            prompt_sha256: prompt_sha256.into(),
        }
    }
}

/// One provider/model outcome, persisted per item of a comparison run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    #[serde(flatten)]
    pub envelope: Envelope,
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
    pub blind: bool,
}

/// The fixed scoring rubric, each axis 1 to 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rubric {
    pub correctness: u8,
    pub usefulness: u8,
    pub clarity: u8,
    pub safety: u8,
    pub overall: u8,
}

/// A human score for one labeled response.
///
/// Scores reference items only by blind label; identity stays out of the
/// record so a log reader sees exactly what the scorer saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub blind_label: String,
    #[serde(flatten)]
    pub rubric: Rubric,
    pub notes: Option<String>,
    pub is_winner: bool,
    pub scorer: String,
}

/// One side of a pairwise preference, with its identity resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceSide {
    pub label: String,
    pub provider: String,
    pub model: String,
}

impl PreferenceSide {
    pub fn new(
        label: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// A pairwise winner pick. Ties are never persisted, so every preference
/// record names a winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub side_a: PreferenceSide,
    pub side_b: PreferenceSide,
    pub winner_label: String,
    pub scorer: String,
}

impl PreferenceRecord {
    /// The side named by `winner_label`.
    pub fn winner(&self) -> &PreferenceSide {
        if self.side_a.label == self.winner_label {
            &self.side_a
        } else {
            &self.side_b
        }
    }
}

/// One line of the evaluation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EvaluationRecord {
    Result(ResultRecord),
    Score(ScoreRecord),
    Preference(PreferenceRecord),
}

impl EvaluationRecord {
    pub fn envelope(&self) -> &Envelope {
        match self {
            Self::Result(r) => &r.envelope,
            Self::Score(s) => &s.envelope,
            Self::Preference(p) => &p.envelope,
        }
    }
}

impl ComparisonRun {
    /// Result records for every item of this run, stamped now.
    pub fn to_result_records(&self) -> Vec<EvaluationRecord> {
        self.items
            .iter()
            .map(|item| {
                EvaluationRecord::Result(ResultRecord {
                    envelope: Envelope::new(&self.run_id, &self.prompt_sha256),
                    provider: item.provider.clone(),
                    model: item.model.clone(),
                    temperature: item.temperature,
                    latency_ms: item.latency_ms,
                    input_tokens_est: item.input_tokens_est,
                    output_tokens_est: item.output_tokens_est,
                    estimated_cost_usd: item.estimated_cost_usd,
                    response_text: item.response_text.clone(),
                    status: item.status,
                    error: item.error.clone(),
                    blind_label: item.blind_label.clone(),
                    blind: self.blind,
                })
            })
            .collect()
    }
}

// =============================================================================
// LOG FILE
// =============================================================================

/// Handle to a JSONL evaluation log on disk.
///
/// The file may not exist yet; reads treat a missing file as an empty log
/// and the first append creates it, parent directories included. Appends
/// take a sidecar file lock so concurrent processes interleave whole lines,
/// never partial ones.
#[derive(Debug, Clone)]
pub struct EvalLog {
    path: PathBuf,
}

impl EvalLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as one line.
    pub fn append(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        self.append_all(std::slice::from_ref(record))
    }

    /// Append several records under a single lock, so a run's items land
    /// contiguously even with concurrent writers.
    pub fn append_all(&self, records: &[EvaluationRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }
        let _lock = LogLock::new(&self.path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(buf.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Read every record in the log. Blank and malformed lines are skipped
    /// with a warning, never an error; a missing file is an empty log.
    pub fn read_all(&self) -> Result<Vec<EvaluationRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let mut records = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(line = lineno + 1, error = %err, "skipping malformed log line");
                }
            }
        }
        Ok(records)
    }

    /// Records belonging to one run.
    pub fn read_run(&self, run_id: &str) -> Result<Vec<EvaluationRecord>, StoreError> {
        let mut records = self.read_all()?;
        records.retain(|r| r.envelope().run_id == run_id);
        Ok(records)
    }

    /// Append a preference record unless the human declined to pick.
    ///
    /// `winner` = `None` means tie or skip: nothing is written and the
    /// call returns `Ok(false)`.
    pub fn append_preference(
        &self,
        run_id: &str,
        prompt_sha256: &str,
        side_a: PreferenceSide,
        side_b: PreferenceSide,
        winner: Option<&str>,
        scorer: &str,
    ) -> Result<bool, StoreError> {
        let Some(winner_label) = winner else {
            return Ok(false);
        };
        if winner_label != side_a.label && winner_label != side_b.label {
            return Err(StoreError::WinnerNotInPair(winner_label.to_string()));
        }
        let record = EvaluationRecord::Preference(PreferenceRecord {
            envelope: Envelope::new(run_id, prompt_sha256),
            side_a,
            side_b,
            winner_label: winner_label.to_string(),
            scorer: scorer.to_string(),
        });
        self.append(&record)?;
        Ok(true)
    }
}

#[derive(Debug)]
struct LogLock {
    _file: std::fs::File,
}

impl LogLock {
    fn new(log_path: &Path) -> Result<Self, std::io::Error> {
        let mut lock_path = log_path.to_path_buf();
        lock_path.set_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }
}

// =============================================================================
// MERGE AND TALLY
// =============================================================================

/// A result row joined with its latest score, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedRow {
    pub run_id: String,
    pub prompt_sha256: String,
    pub blind_label: String,
    pub provider: String,
    pub model: String,
    pub status: ItemStatus,
    pub latency_ms: u64,
    pub input_tokens_est: u64,
    pub output_tokens_est: u64,
    pub estimated_cost_usd: f64,
    pub rubric: Option<Rubric>,
    pub is_winner: Option<bool>,
    pub notes: Option<String>,
    pub scorer: Option<String>,
    pub scored_at: Option<DateTime<Utc>>,
}

/// Left-join result records with the latest score per
/// (run, prompt, blind label).
///
/// "Latest" is the maximum timestamp; on an exact timestamp tie the record
/// read later wins, matching append order. Rows keep the result records'
/// log order, so the merge is idempotent over an unchanged log.
pub fn merge_latest_scores(records: &[EvaluationRecord]) -> Vec<JoinedRow> {
    let mut latest: HashMap<(&str, &str, &str), &ScoreRecord> = HashMap::new();
    for record in records {
        if let EvaluationRecord::Score(score) = record {
            let key = (
                score.envelope.run_id.as_str(),
                score.envelope.prompt_sha256.as_str(),
                score.blind_label.as_str(),
            );
            match latest.entry(key) {
                Entry::Occupied(mut slot) => {
                    if score.envelope.timestamp >= slot.get().envelope.timestamp {
                        slot.insert(score);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(score);
                }
            }
        }
    }

    let mut rows = Vec::new();
    for record in records {
        if let EvaluationRecord::Result(result) = record {
            let key = (
                result.envelope.run_id.as_str(),
                result.envelope.prompt_sha256.as_str(),
                result.blind_label.as_str(),
            );
            let score = latest.get(&key).copied();
            rows.push(JoinedRow {
                run_id: result.envelope.run_id.clone(),
                prompt_sha256: result.envelope.prompt_sha256.clone(),
                blind_label: result.blind_label.clone(),
                provider: result.provider.clone(),
                model: result.model.clone(),
                status: result.status,
                latency_ms: result.latency_ms,
                input_tokens_est: result.input_tokens_est,
                output_tokens_est: result.output_tokens_est,
                estimated_cost_usd: result.estimated_cost_usd,
                rubric: score.map(|s| s.rubric),
                is_winner: score.map(|s| s.is_winner),
                notes: score.and_then(|s| s.notes.clone()),
                scorer: score.map(|s| s.scorer.clone()),
                scored_at: score.map(|s| s.envelope.timestamp),
            });
        }
    }
    rows
}

/// Pairwise win count for one provider/model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WinTally {
    pub provider: String,
    pub model: String,
    pub wins: u64,
    pub appearances: u64,
}

/// Count pairwise wins and appearances per provider/model, sorted by wins
/// descending, then provider/model for a stable order.
pub fn tally_preferences(records: &[EvaluationRecord]) -> Vec<WinTally> {
    let mut counts: BTreeMap<(String, String), (u64, u64)> = BTreeMap::new();
    for record in records {
        if let EvaluationRecord::Preference(pref) = record {
            for side in [&pref.side_a, &pref.side_b] {
                let entry = counts
                    .entry((side.provider.clone(), side.model.clone()))
                    .or_default();
                entry.1 += 1;
                if side.label == pref.winner_label {
                    entry.0 += 1;
                }
            }
        }
    }
    let mut tallies: Vec<WinTally> = counts
        .into_iter()
        .map(|((provider, model), (wins, appearances))| WinTally {
            provider,
            model,
            wins,
            appearances,
        })
        .collect();
    tallies.sort_by(|a, b| {
        b.wins
            .cmp(&a.wins)
            .then_with(|| a.provider.cmp(&b.provider))
            .then_with(|| a.model.cmp(&b.model))
    });
    tallies
}

// =============================================================================
// CSV EXPORT
// =============================================================================

/// Joined result+score rows as a flat CSV table.
///
/// `prompts` is an optional fingerprint-to-id index; when given, rows whose
/// prompt is in a catalog get their `prompt_id` column filled.
pub fn export_results_csv(
    rows: &[JoinedRow],
    prompts: Option<&HashMap<String, String>>,
) -> String {
    let mut out = String::from(
        "run_id,prompt_sha256,prompt_id,blind_label,provider,model,status,latency_ms,\
         input_tokens_est,output_tokens_est,estimated_cost_usd,correctness,\
         usefulness,clarity,safety,overall,is_winner,notes,scorer,scored_at\n",
    );
    for row in rows {
        let rubric = |f: fn(&Rubric) -> u8| {
            row.rubric.as_ref().map(|r| f(r).to_string()).unwrap_or_default()
        };
        let prompt_id = prompts
            .and_then(|index| index.get(&row.prompt_sha256))
            .map(String::as_str)
            .unwrap_or_default();
        let fields = [
            csv_field(&row.run_id),
            csv_field(&row.prompt_sha256),
            csv_field(prompt_id),
            csv_field(&row.blind_label),
            csv_field(&row.provider),
            csv_field(&row.model),
            row.status.as_str().to_string(),
            row.latency_ms.to_string(),
            row.input_tokens_est.to_string(),
            row.output_tokens_est.to_string(),
            row.estimated_cost_usd.to_string(),
            rubric(|r| r.correctness),
            rubric(|r| r.usefulness),
            rubric(|r| r.clarity),
            rubric(|r| r.safety),
            rubric(|r| r.overall),
            row.is_winner.map(|w| w.to_string()).unwrap_or_default(),
            csv_field(row.notes.as_deref().unwrap_or_default()),
            csv_field(row.scorer.as_deref().unwrap_or_default()),
            row.scored_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
        ];
        let _ = writeln!(out, "{}", fields.join(","));
    }
    out
}

/// Preference records as a flat CSV table, one row per pick with both
/// sides and the resolved winner spelled out.
pub fn export_preferences_csv(records: &[EvaluationRecord]) -> String {
    let mut out = String::from(
        "timestamp,run_id,prompt_sha256,side_a_label,side_a_provider,side_a_model,\
         side_b_label,side_b_provider,side_b_model,winner_label,winner_provider,\
         winner_model,scorer\n",
    );
    for record in records {
        if let EvaluationRecord::Preference(pref) = record {
            let winner = pref.winner();
            let fields = [
                pref.envelope.timestamp.to_rfc3339(),
                csv_field(&pref.envelope.run_id),
                csv_field(&pref.envelope.prompt_sha256),
                csv_field(&pref.side_a.label),
                csv_field(&pref.side_a.provider),
                csv_field(&pref.side_a.model),
                csv_field(&pref.side_b.label),
                csv_field(&pref.side_b.provider),
                csv_field(&pref.side_b.model),
                csv_field(&pref.winner_label),
                csv_field(&winner.provider),
                csv_field(&winner.model),
                csv_field(&pref.scorer),
            ];
            let _ = writeln!(out, "{}", fields.join(","));
        }
    }
    out
}

/// Quote a CSV field only when it needs it.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
