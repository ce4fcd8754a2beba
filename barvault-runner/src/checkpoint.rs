//! Resumable batch-import state.
//!
//! One JSON file per import request, named by the blake3 hash of the request,
//! listing the instruments that finished. Rewritten atomically after every
//! completed instrument.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use barvault_core::domain::Period;

/// What a batch import was asked to do. Two identical requests share a
/// checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub instrument_ids: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub period: Period,
}

impl ImportRequest {
    pub fn new(instrument_ids: Vec<String>, start: NaiveDate, end: NaiveDate, period: Period) -> Self {
        Self {
            instrument_ids,
            start,
            end,
            period,
        }
    }

    /// Hex blake3 over the request fields.
    pub fn key(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for id in &self.instrument_ids {
            hasher.update(id.as_bytes());
            hasher.update(b"\x1f");
        }
        hasher.update(format!("|{}|{}|{}", self.start, self.end, self.period).as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub key: String,
    pub completed: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    path: PathBuf,
}

impl Checkpoint {
    pub fn path_for(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{key}.json"))
    }

    /// Resume from `{dir}/{key}.json`, or start empty.
    pub fn load_or_new(dir: &Path, key: &str) -> Result<Self> {
        let path = Self::path_for(dir, key);
        if !path.exists() {
            return Ok(Self {
                key: key.to_string(),
                completed: BTreeSet::new(),
                updated_at: Utc::now(),
                path,
            });
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("reading checkpoint {}", path.display()))?;
        let mut checkpoint: Checkpoint = serde_json::from_str(&content)
            .with_context(|| format!("parsing checkpoint {}", path.display()))?;
        checkpoint.path = path;
        Ok(checkpoint)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_completed(&self, instrument_id: &str) -> bool {
        self.completed.contains(instrument_id)
    }

    pub fn mark_completed(&mut self, instrument_id: &str) {
        self.completed.insert(instrument_id.to_string());
        self.updated_at = Utc::now();
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating checkpoint dir {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("serializing checkpoint")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("atomic rename to {}", self.path.display()))?;
        Ok(())
    }

    /// Delete the file once the import has finished cleanly.
    pub fn remove(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("removing checkpoint {}", self.path.display()))?;
        }
        Ok(())
    }
}
