// Vector index
// Embedded chunks, their lancedb-backed cosine search, and the store that persists them

mod records;
pub mod store;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{DistanceType, Table};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::detector::Fingerprint;
use crate::embeddings::Chunk;
use crate::{KbError, ProviderErrorKind, Result};

pub use store::{IndexStore, LanceIndexStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Embedding model that produced the vectors
    pub model: String,
    /// Vector length; `None` until the first vector is added
    pub dimension: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One embedded chunk
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub text: String,
    pub source_path: String,
    pub chunk_index: usize,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub text: String,
    pub source_path: String,
    pub chunk_index: usize,
    /// Cosine similarity to the query, higher is closer
    pub score: f32,
}

/// The lancedb table an index was loaded from or saved to
#[derive(Clone)]
pub(crate) struct StoredTable {
    pub(crate) path: PathBuf,
    pub(crate) table: Table,
    /// Entries already written to `table`
    pub(crate) rows: usize,
}

impl fmt::Debug for StoredTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredTable")
            .field("path", &self.path)
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

/// Snapshot of the index
///
/// Entries are only ever appended. `ingested` records every document
/// fingerprint embedded into this index, including documents that produced
/// no chunks. When a path is ingested again under a new fingerprint, its
/// older entries stay stored but are no longer returned by [`search`].
///
/// [`search`]: VectorIndex::search
#[derive(Debug, Clone)]
pub struct VectorIndex {
    metadata: IndexMetadata,
    entries: Vec<IndexEntry>,
    ingested: BTreeSet<Fingerprint>,
    /// Fingerprint most recently ingested for each source path
    latest: BTreeMap<String, Fingerprint>,
    stored: Option<StoredTable>,
}

impl PartialEq for VectorIndex {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.metadata == other.metadata
            && self.entries == other.entries
            && self.ingested == other.ingested
            && self.latest == other.latest
    }
}

impl VectorIndex {
    #[inline]
    pub fn new(model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            metadata: IndexMetadata {
                model: model.into(),
                dimension: None,
                created_at: now,
                updated_at: now,
            },
            entries: Vec::new(),
            ingested: BTreeSet::new(),
            latest: BTreeMap::new(),
            stored: None,
        }
    }

    /// Assemble an index from persisted parts, rejecting vectors of the wrong length
    pub(crate) fn from_parts(
        metadata: IndexMetadata,
        entries: Vec<IndexEntry>,
        ingested: BTreeSet<Fingerprint>,
        latest: BTreeMap<String, Fingerprint>,
    ) -> Result<Self> {
        if let Some(entry) = entries
            .iter()
            .find(|e| Some(e.vector.len()) != metadata.dimension)
        {
            return Err(KbError::CorruptIndex(format!(
                "entry {} has {} dimensions, index declares {:?}",
                entry.id,
                entry.vector.len(),
                metadata.dimension
            )));
        }

        Ok(Self {
            metadata,
            entries,
            ingested,
            latest,
            stored: None,
        })
    }

    #[inline]
    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    #[inline]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    #[inline]
    pub fn ingested(&self) -> &BTreeSet<Fingerprint> {
        &self.ingested
    }

    #[inline]
    pub fn is_ingested(&self, fingerprint: &Fingerprint) -> bool {
        self.ingested.contains(fingerprint)
    }

    /// Fingerprint whose chunks are served for `source_path`
    #[inline]
    pub fn latest_fingerprint(&self, source_path: &str) -> Option<&Fingerprint> {
        self.latest.get(source_path)
    }

    /// Whether `entry` belongs to the most recent ingestion of its document
    #[inline]
    pub fn is_current(&self, entry: &IndexEntry) -> bool {
        self.latest
            .get(&entry.source_path)
            .is_none_or(|latest| *latest == entry.fingerprint)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the index has been written to disk in its current form
    #[inline]
    pub fn is_saved(&self) -> bool {
        self.stored
            .as_ref()
            .is_some_and(|stored| stored.rows == self.entries.len())
    }

    /// Append an embedded chunk; the first vector fixes the index dimension
    #[inline]
    pub fn push(&mut self, chunk: &Chunk, vector: Vec<f32>) -> Result<()> {
        match self.metadata.dimension {
            Some(dimension) if dimension != vector.len() => {
                return Err(KbError::provider(
                    ProviderErrorKind::InvalidResponse,
                    format!(
                        "embedding has {} dimensions but the index uses {}",
                        vector.len(),
                        dimension
                    ),
                ));
            }
            Some(_) => {}
            None if vector.is_empty() => {
                return Err(KbError::provider(
                    ProviderErrorKind::InvalidResponse,
                    "provider returned an empty embedding",
                ));
            }
            None => self.metadata.dimension = Some(vector.len()),
        }

        self.entries.push(IndexEntry {
            id: Uuid::new_v4(),
            vector,
            text: chunk.text.clone(),
            source_path: chunk.source_path.clone(),
            chunk_index: chunk.chunk_index,
            fingerprint: chunk.fingerprint.clone(),
        });
        self.record_ingested(&chunk.source_path, chunk.fingerprint.clone());
        Ok(())
    }

    /// Mark a document as ingested, even when it contributed no entries
    ///
    /// Entries from earlier fingerprints of the same path stop being served.
    #[inline]
    pub fn record_ingested(&mut self, source_path: &str, fingerprint: Fingerprint) {
        self.ingested.insert(fingerprint.clone());
        self.latest.insert(source_path.to_string(), fingerprint);
        self.metadata.updated_at = Utc::now();
    }

    /// Number of stored entries hidden by a newer ingestion of their document
    #[inline]
    pub fn superseded(&self) -> usize {
        self.entries.iter().filter(|e| !self.is_current(e)).count()
    }

    /// Top `limit` current entries by descending cosine similarity; ties keep insertion order
    ///
    /// Runs a lancedb vector query against the table this snapshot was
    /// loaded from or saved to, so an index must be saved before it is searched.
    #[inline]
    pub async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        if limit == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        let stored = self.stored.as_ref().ok_or_else(|| {
            KbError::NoData("index has not been saved yet".to_string())
        })?;

        let candidates = limit.saturating_add(self.superseded());
        let batches: Vec<RecordBatch> = stored
            .table
            .vector_search(query)
            .map_err(|e| KbError::Database(format!("Failed to create vector search: {e}")))?
            .column(records::VECTOR_COLUMN)
            .distance_type(DistanceType::Cosine)
            .limit(candidates)
            .execute()
            .await
            .map_err(|e| KbError::Database(format!("Failed to execute search: {e}")))?
            .try_collect()
            .await
            .map_err(|e| KbError::Database(format!("Failed to read result stream: {e}")))?;

        let mut scored = Vec::new();
        for batch in &batches {
            for (position, distance) in records::read_hits(batch)? {
                let Some(entry) = self.entries.get(position) else {
                    continue;
                };
                if self.is_current(entry) {
                    scored.push((similarity(distance), position));
                }
            }
        }

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.truncate(limit);
        debug!("Vector search kept {} of {} candidates", scored.len(), candidates);

        Ok(scored
            .into_iter()
            .filter_map(|(score, position)| {
                self.entries.get(position).map(|entry| SearchResult {
                    text: entry.text.clone(),
                    source_path: entry.source_path.clone(),
                    chunk_index: entry.chunk_index,
                    score,
                })
            })
            .collect())
    }
}

/// Cosine similarity from lancedb's cosine distance
fn similarity(distance: f32) -> f32 {
    let score = 1.0 - distance;
    if score.is_finite() { score } else { 0.0 }
}
