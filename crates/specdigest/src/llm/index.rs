//! Term-frequency retrieval index over raw specification text, used to
//! answer follow-up questions about a job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::LlmError;
use crate::storage::write_atomic;

const WINDOW_LINES: usize = 30;
const WINDOW_STEP: usize = 20;

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

const INDEX_DIR: &str = "_index";
const MEMORY_CAPACITY: u64 = 64;
const MEMORY_IDLE: Duration = Duration::from_secs(60 * 60);

/// A window of consecutive lines from the source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Zero-based line where the window starts.
    pub start_line: usize,
    pub text: String,
    terms: HashMap<String, u32>,
    length: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalIndex {
    content_hash: String,
    passages: Vec<Passage>,
    document_frequency: HashMap<String, u32>,
    average_length: f64,
}

/// BLAKE3 hex digest of the text.
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|token| token.chars().count() >= 2)
        .map(str::to_lowercase)
}

impl RetrievalIndex {
    /// Splits `text` into overlapping line windows and indexes their terms.
    pub fn build(text: &str) -> Result<Self, LlmError> {
        let lines: Vec<&str> = text.lines().collect();
        if lines.iter().all(|line| line.trim().is_empty()) {
            return Err(LlmError::IndexCreation(
                "specification text is empty".to_string(),
            ));
        }

        let mut passages = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + WINDOW_LINES).min(lines.len());
            let chunk = lines[start..end].join("\n");

            let mut terms: HashMap<String, u32> = HashMap::new();
            for token in tokenize(&chunk) {
                *terms.entry(token).or_default() += 1;
            }
            if !terms.is_empty() {
                let length = terms.values().sum();
                passages.push(Passage {
                    start_line: start,
                    text: chunk,
                    terms,
                    length,
                });
            }

            if end == lines.len() {
                break;
            }
            start += WINDOW_STEP;
        }

        if passages.is_empty() {
            return Err(LlmError::IndexCreation(
                "specification text has no indexable terms".to_string(),
            ));
        }

        let mut document_frequency: HashMap<String, u32> = HashMap::new();
        for passage in &passages {
            for term in passage.terms.keys() {
                *document_frequency.entry(term.clone()).or_default() += 1;
            }
        }
        let total: u64 = passages.iter().map(|p| u64::from(p.length)).sum();
        let average_length = total as f64 / passages.len() as f64;

        Ok(Self {
            content_hash: content_hash(text),
            passages,
            document_frequency,
            average_length,
        })
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    /// Returns up to `limit` passages ranked by BM25 against `query`.
    /// Passages sharing no term with the query are never returned.
    pub fn search(&self, query: &str, limit: usize) -> Vec<&Passage> {
        let mut query_terms: Vec<String> = tokenize(query).collect();
        query_terms.sort();
        query_terms.dedup();

        let n = self.passages.len() as f64;
        let mut scored: Vec<(usize, f64)> = self
            .passages
            .iter()
            .enumerate()
            .filter_map(|(i, passage)| {
                let score: f64 = query_terms
                    .iter()
                    .filter_map(|term| {
                        let tf = f64::from(*passage.terms.get(term)?);
                        let df = f64::from(self.document_frequency.get(term).copied().unwrap_or(0));
                        let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
                        let norm = 1.0 - BM25_B
                            + BM25_B * f64::from(passage.length) / self.average_length.max(1.0);
                        Some(idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * norm))
                    })
                    .sum();
                (score > 0.0).then_some((i, score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored
            .into_iter()
            .take(limit)
            .map(|(i, _)| &self.passages[i])
            .collect()
    }
}

/// Retrieval indexes keyed by content hash, on disk under
/// `<storage_root>/_index/` and in memory for recently used ones.
#[derive(Clone)]
pub struct IndexCache {
    dir: PathBuf,
    memory: Cache<String, Arc<RetrievalIndex>>,
}

impl IndexCache {
    pub fn new(storage_root: &Path) -> Self {
        Self {
            dir: storage_root.join(INDEX_DIR),
            memory: Cache::builder()
                .max_capacity(MEMORY_CAPACITY)
                .time_to_idle(MEMORY_IDLE)
                .build(),
        }
    }

    pub fn path_for(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{hash}.json"))
    }

    /// Loads the index for `text`, building and persisting it on first use.
    pub fn get_or_build(&self, text: &str) -> Result<Arc<RetrievalIndex>, LlmError> {
        let hash = content_hash(text);
        if let Some(index) = self.memory.get(&hash) {
            return Ok(index);
        }

        let path = self.path_for(&hash);
        if let Some(index) = load_cached(&path) {
            debug!(%hash, "Loaded retrieval index from disk");
            let index = Arc::new(index);
            self.memory.insert(hash, index.clone());
            return Ok(index);
        }

        let index = Arc::new(RetrievalIndex::build(text)?);
        match serde_json::to_vec(index.as_ref()) {
            Ok(bytes) => {
                if let Err(e) = write_atomic(&path, &bytes) {
                    warn!(error = %e, "Failed to persist retrieval index");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize retrieval index"),
        }
        debug!(%hash, passages = index.len(), "Built retrieval index");

        self.memory.insert(hash, index.clone());
        Ok(index)
    }
}

fn load_cached(path: &Path) -> Option<RetrievalIndex> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(index) => Some(index),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable retrieval index");
            None
        }
    }
}
