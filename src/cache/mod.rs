//! Durable per-file results, resumable across runs.
//!
//! The document on disk is `{"results": [...], "stats": {...}}`. Saving copies
//! the records under the lock, releases it, then writes a temp file next to
//! the destination and renames it into place.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::stats::StatsSnapshot;

/// Last known result for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionOutcome {
    pub file: PathBuf,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecognitionOutcome {
    pub fn success(file: impl Into<PathBuf>, response: Value, ip: Option<String>) -> Self {
        Self {
            file: file.into(),
            success: true,
            ip,
            response: Some(response),
            error: None,
        }
    }

    pub fn failure(file: impl Into<PathBuf>, error: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            success: false,
            ip: None,
            response: None,
            error: Some(error.into()),
        }
    }

    /// A success carries a response, a failure carries an error
    fn is_well_formed(&self) -> bool {
        !self.file.as_os_str().is_empty()
            && if self.success {
                self.response.is_some()
            } else {
                self.error.is_some()
            }
    }
}

#[derive(Serialize)]
struct CacheDocument<'a> {
    results: &'a [RecognitionOutcome],
    stats: &'a StatsSnapshot,
}

pub struct ResultCache {
    path: PathBuf,
    entries: Mutex<BTreeMap<PathBuf, RecognitionOutcome>>,
    write_lock: Mutex<()>,
}

impl ResultCache {
    /// Empty cache that will be saved to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(BTreeMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Load a previous run's results.
    ///
    /// A missing file yields an empty cache. A file that is not a JSON
    /// document is an error; individual malformed records are skipped.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let cache = Self::new(path);
        if !cache.path.exists() {
            info!("No previous results at {:?}, starting fresh", cache.path);
            return Ok(cache);
        }

        let content = fs::read_to_string(&cache.path)
            .with_context(|| format!("Failed to read results file {:?}", cache.path))?;
        let document: Value = serde_json::from_str(&content)
            .with_context(|| format!("Results file {:?} is not valid JSON", cache.path))?;
        if !document.is_object() {
            return Err(anyhow!("Results file {:?} is not a JSON object", cache.path));
        }

        let records = document
            .get("results")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut skipped = 0;
        {
            let mut entries = cache.lock();
            for record in records {
                match serde_json::from_value::<RecognitionOutcome>(record.clone()) {
                    Ok(outcome) if outcome.is_well_formed() => {
                        entries.insert(outcome.file.clone(), outcome);
                    }
                    _ => skipped += 1,
                }
            }
        }

        if skipped > 0 {
            warn!("⚠️ Skipped {} malformed records in {:?}", skipped, cache.path);
        }
        info!("📂 Loaded {} cached results from {:?}", cache.len(), cache.path);
        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, file: &Path) -> bool {
        self.lock().contains_key(file)
    }

    pub fn get(&self, file: &Path) -> Option<RecognitionOutcome> {
        self.lock().get(file).cloned()
    }

    /// Record an outcome, replacing any earlier one for the same file
    pub fn insert(&self, outcome: RecognitionOutcome) {
        self.lock().insert(outcome.file.clone(), outcome);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Records ordered by path
    pub fn snapshot(&self) -> Vec<RecognitionOutcome> {
        self.lock().values().cloned().collect()
    }

    /// Successful and failed record counts
    pub fn counts(&self) -> (usize, usize) {
        let entries = self.lock();
        let successful = entries.values().filter(|o| o.success).count();
        (successful, entries.len() - successful)
    }

    /// Atomically write every record plus `stats` to the cache path
    pub fn save(&self, stats: &StatsSnapshot) -> Result<()> {
        let _writing = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let results = self.snapshot();

        let json = serde_json::to_string_pretty(&CacheDocument {
            results: &results,
            stats,
        })?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut temp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temp file in {dir:?}"))?;
        temp.write_all(json.as_bytes())?;
        temp.write_all(b"\n")?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path)
            .with_context(|| format!("Failed to replace {:?}", self.path))?;

        debug!("Saved {} results to {:?}", results.len(), self.path);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PathBuf, RecognitionOutcome>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
