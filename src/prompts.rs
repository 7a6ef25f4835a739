//! Prompt set catalog.
//!
//! A prompt set is a YAML file pairing prompts (id, text, tags) with the
//! default provider/model combos to run them against. Prompts are addressed
//! in the evaluation log by the SHA-256 of their text, so the catalog can be
//! reorganized without breaking old records.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::compare::Combo;

/// The only prompt set schema version this build reads.
pub const PROMPT_SET_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PromptSetError {
    #[error("failed to read prompt set {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse prompt set {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("unsupported prompt set version {found} in {path}, expected {expected}")]
    Version {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
}

/// One prompt in a set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptEntry {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PromptEntry {
    /// SHA-256 fingerprint of the prompt text, lowercase hex.
    pub fn fingerprint(&self) -> String {
        sha256_text(&self.text)
    }
}

/// A loaded prompt set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSet {
    pub version: u32,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub combos: Vec<Combo>,
    #[serde(default)]
    pub prompts: Vec<PromptEntry>,
}

impl PromptSet {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PromptSetError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| PromptSetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let set: Self = serde_yaml::from_str(&raw).map_err(|source| PromptSetError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        if set.version != PROMPT_SET_VERSION {
            return Err(PromptSetError::Version {
                path: path.to_path_buf(),
                found: set.version,
                expected: PROMPT_SET_VERSION,
            });
        }
        Ok(set)
    }

    /// Load a set keeping only prompts that share at least one tag with
    /// `tags`. An empty tag list keeps everything.
    pub fn load_filtered(
        path: impl AsRef<Path>,
        tags: &[String],
    ) -> Result<Self, PromptSetError> {
        let mut set = Self::load(path)?;
        set.retain_tagged(tags);
        Ok(set)
    }

    pub fn retain_tagged(&mut self, tags: &[String]) {
        if tags.is_empty() {
            return;
        }
        self.prompts
            .retain(|p| p.tags.iter().any(|t| tags.contains(t)));
    }

    /// Fingerprint-to-entry index, for joining log records back to prompts.
    pub fn fingerprint_index(&self) -> HashMap<String, PromptEntry> {
        self.prompts
            .iter()
            .map(|p| (p.fingerprint(), p.clone()))
            .collect()
    }
}

/// SHA-256 of a UTF-8 string, lowercase hex.
pub fn sha256_text(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}
