
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use lancedb::database::CreateTableMode;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, Table};
use tokio::fs;
use tracing::{debug, info, warn};

use super::records::{self, CHUNKS_TABLE, DOCUMENTS_TABLE, METADATA_TABLE};
use super::{IndexEntry, StoredTable, VectorIndex};
use crate::detector::Fingerprint;
use crate::embeddings::{Chunk, EmbeddingProvider};
use crate::{KbError, ProviderErrorKind, Result};

/// Persistence and construction of vector indexes
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Whether an index is stored at `path`
    async fn exists(&self, path: &Path) -> bool;

    async fn load(&self, path: &Path) -> Result<VectorIndex>;

    /// Embed `chunks` into a brand new index
    async fn create_from(&self, chunks: &[Chunk]) -> Result<VectorIndex>;

    /// Embed `chunks` and append them to a copy of `index`
    async fn add_to(&self, index: &VectorIndex, chunks: &[Chunk]) -> Result<VectorIndex>;

    /// Replace whatever is stored at `path` with `index`
    ///
    /// Once saved, `index` searches the stored tables.
    async fn save(&self, index: &mut VectorIndex, path: &Path) -> Result<()>;
}

/// Index store backed by a LanceDB database, embedding through an [`EmbeddingProvider`]
///
/// The database directory holds three tables: `chunks` with the vectors,
/// `documents` with the ingested fingerprints and `metadata` with the model
/// and timestamps. Every lancedb write commits a new table version, so a save
/// interrupted partway leaves the previous version of each table readable.
pub struct LanceIndexStore {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl LanceIndexStore {
    #[inline]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
        }
    }

    async fn embed_into(&self, index: &mut VectorIndex, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let bar = if console::user_attended_stderr() {
            ProgressBar::new(chunks.len() as u64).with_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] Embedding {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            )
        } else {
            ProgressBar::hidden()
        };

        for batch in chunks.chunks(self.batch_size) {
            if let Some(first) = batch.first() {
                bar.set_message(first.source_path.clone());
            }

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = match self.provider.embed_batch(&texts).await {
                Ok(vectors) => vectors,
                Err(e) => {
                    bar.abandon();
                    return Err(e);
                }
            };

            if vectors.len() != batch.len() {
                bar.abandon();
                return Err(KbError::provider(
                    ProviderErrorKind::InvalidResponse,
                    format!(
                        "requested {} embeddings, received {}",
                        batch.len(),
                        vectors.len()
                    ),
                ));
            }

            for (chunk, vector) in batch.iter().zip(vectors) {
                if let Err(e) = index.push(chunk, vector) {
                    bar.abandon();
                    return Err(e);
                }
            }

            bar.inc(batch.len() as u64);
            debug!("Embedded batch of {} chunks", batch.len());
        }

        bar.finish_and_clear();
        Ok(())
    }

    /// Write `entries[from..]` to the chunks table, appending when the table
    /// holds exactly the first `from` entries and rewriting it otherwise
    async fn write_chunks(
        connection: &Connection,
        entries: &[IndexEntry],
        from: Option<usize>,
        dimension: usize,
    ) -> Result<Table> {
        if let Some(from) = from {
            let table = connection
                .open_table(CHUNKS_TABLE)
                .execute()
                .await
                .map_err(|e| KbError::Database(format!("Failed to open table: {e}")))?;
            let stored_rows = table
                .count_rows(None)
                .await
                .map_err(|e| KbError::Database(format!("Failed to count rows: {e}")))?;

            if stored_rows == from {
                let new_entries = entries.get(from..).unwrap_or_default();
                if !new_entries.is_empty() {
                    let batch = records::chunks_batch(new_entries, from, dimension)?;
                    table
                        .add(records::reader(batch))
                        .execute()
                        .await
                        .map_err(|e| {
                            KbError::Database(format!("Failed to insert embeddings: {e}"))
                        })?;
                }
                debug!("Appended {} chunks", new_entries.len());
                return Ok(table);
            }

            warn!(
                "Chunks table holds {} rows where {} were expected; rewriting it",
                stored_rows, from
            );
        }

        let batch = records::chunks_batch(entries, 0, dimension)?;
        overwrite_table(connection, CHUNKS_TABLE, batch).await
    }
}

#[async_trait]
impl IndexStore for LanceIndexStore {
    #[inline]
    async fn exists(&self, path: &Path) -> bool {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return false;
        }

        let table_names = match connect(path).await {
            Ok(connection) => connection.table_names().execute().await,
            Err(e) => Err(e),
        };
        match table_names {
            Ok(names) => names.iter().any(|name| name == CHUNKS_TABLE),
            Err(e) => {
                // Something is stored; let `load` report it as corrupt
                warn!("Failed to list tables in {}: {}", path.display(), e);
                true
            }
        }
    }

    #[inline]
    async fn load(&self, path: &Path) -> Result<VectorIndex> {
        let connection = connect(path).await.map_err(|e| {
            KbError::CorruptIndex(format!("cannot open {}: {}", path.display(), e))
        })?;
        let chunks = open_stored(&connection, CHUNKS_TABLE).await?;
        let documents = open_stored(&connection, DOCUMENTS_TABLE).await?;
        let metadata = open_stored(&connection, METADATA_TABLE).await?;

        let schema = chunks
            .schema()
            .await
            .map_err(|e| KbError::CorruptIndex(format!("cannot read chunks schema: {e}")))?;
        let dimension = records::vector_dimension(&schema)?;

        let mut positioned = Vec::new();
        for batch in scan(&chunks, CHUNKS_TABLE).await? {
            positioned.extend(records::read_entries(&batch)?);
        }
        positioned.sort_by_key(|(position, _)| *position);
        if let Some((row, (position, _))) = positioned
            .iter()
            .enumerate()
            .find(|(row, (position, _))| row != position)
        {
            return Err(KbError::CorruptIndex(format!(
                "chunk at row {row} has position {position}"
            )));
        }
        let entries: Vec<IndexEntry> = positioned.into_iter().map(|(_, entry)| entry).collect();

        let mut ingested = BTreeSet::new();
        let mut latest = BTreeMap::new();
        for batch in scan(&documents, DOCUMENTS_TABLE).await? {
            for (fingerprint, source_path) in records::read_documents(&batch)? {
                if let Some(source_path) = source_path {
                    latest.insert(source_path, fingerprint.clone());
                }
                ingested.insert(fingerprint);
            }
        }
        // Chunks reach the disk before the documents table does
        for entry in &entries {
            if !ingested.contains(&entry.fingerprint) {
                ingested.insert(entry.fingerprint.clone());
                latest.insert(entry.source_path.clone(), entry.fingerprint.clone());
            }
        }

        let metadata_batches = scan(&metadata, METADATA_TABLE).await?;
        let metadata = metadata_batches
            .first()
            .ok_or_else(|| KbError::CorruptIndex("metadata table is empty".to_string()))
            .and_then(|batch| records::read_metadata(batch, dimension))?;

        let mut index = VectorIndex::from_parts(metadata, entries, ingested, latest)?;
        index.stored = Some(StoredTable {
            path: path.to_path_buf(),
            table: chunks,
            rows: index.len(),
        });

        info!(
            "Loaded index with {} chunks from {} documents at {}",
            index.len(),
            index.ingested().len(),
            path.display()
        );
        Ok(index)
    }

    #[inline]
    async fn create_from(&self, chunks: &[Chunk]) -> Result<VectorIndex> {
        let mut index = VectorIndex::new(self.provider.model());
        self.embed_into(&mut index, chunks).await?;
        info!("Created index with {} chunks", index.len());
        Ok(index)
    }

    #[inline]
    async fn add_to(&self, index: &VectorIndex, chunks: &[Chunk]) -> Result<VectorIndex> {
        let mut updated = index.clone();
        self.embed_into(&mut updated, chunks).await?;
        info!(
            "Added {} chunks to index ({} total)",
            chunks.len(),
            updated.len()
        );
        Ok(updated)
    }

    #[inline]
    async fn save(&self, index: &mut VectorIndex, path: &Path) -> Result<()> {
        let dimension = index.metadata().dimension.ok_or_else(|| {
            KbError::NoData("an index without entries cannot be saved".to_string())
        })?;

        fs::create_dir_all(path).await?;
        let connection = connect(path)
            .await
            .map_err(|e| KbError::Database(format!("Failed to connect to LanceDB: {e}")))?;

        // Appending is only safe onto the table this index was read from
        let from = index
            .stored
            .as_ref()
            .filter(|stored| stored.path == path && stored.rows <= index.len())
            .map(|stored| stored.rows);
        let table = Self::write_chunks(&connection, index.entries(), from, dimension).await?;

        let documents = records::documents_batch(index.ingested().iter().map(|fingerprint| {
            (fingerprint, served_path(index, fingerprint))
        }))?;
        overwrite_table(&connection, DOCUMENTS_TABLE, documents).await?;
        overwrite_table(
            &connection,
            METADATA_TABLE,
            records::metadata_batch(index.metadata())?,
        )
        .await?;

        index.stored = Some(StoredTable {
            path: path.to_path_buf(),
            table,
            rows: index.len(),
        });
        debug!("Saved index with {} chunks to {}", index.len(), path.display());
        Ok(())
    }
}

/// Path this fingerprint's chunks are served for, if it is the latest one
fn served_path<'a>(index: &'a VectorIndex, fingerprint: &Fingerprint) -> Option<&'a str> {
    index
        .latest
        .iter()
        .find(|(_, latest)| *latest == fingerprint)
        .map(|(path, _)| path.as_str())
}

async fn connect(path: &Path) -> lancedb::Result<Connection> {
    lancedb::connect(&path.to_string_lossy()).execute().await
}

async fn open_stored(connection: &Connection, name: &str) -> Result<Table> {
    connection
        .open_table(name)
        .execute()
        .await
        .map_err(|e| KbError::CorruptIndex(format!("cannot open table {name}: {e}")))
}

/// Every row of a stored table
async fn scan(table: &Table, name: &str) -> Result<Vec<RecordBatch>> {
    let rows = table
        .count_rows(None)
        .await
        .map_err(|e| KbError::CorruptIndex(format!("cannot count rows of {name}: {e}")))?;
    if rows == 0 {
        return Ok(Vec::new());
    }

    table
        .query()
        .limit(rows)
        .execute()
        .await
        .map_err(|e| KbError::CorruptIndex(format!("cannot read table {name}: {e}")))?
        .try_collect()
        .await
        .map_err(|e| KbError::CorruptIndex(format!("cannot read table {name}: {e}")))
}

/// Commit `batch` as the new contents of table `name`
///
/// A table too damaged to overwrite is dropped and created again.
async fn overwrite_table(connection: &Connection, name: &str, batch: RecordBatch) -> Result<Table> {
    let created = connection
        .create_table(name, records::reader(batch.clone()))
        .mode(CreateTableMode::Overwrite)
        .execute()
        .await;

    match created {
        Ok(table) => Ok(table),
        Err(e) => {
            warn!("Failed to overwrite table {}, recreating it: {}", name, e);
            connection
                .drop_table(name)
                .await
                .map_err(|e| KbError::Database(format!("Failed to drop table: {e}")))?;
            connection
                .create_table(name, records::reader(batch))
                .execute()
                .await
                .map_err(|e| KbError::Database(format!("Failed to create table: {e}")))
        }
    }
}
