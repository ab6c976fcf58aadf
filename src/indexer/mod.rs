// Indexer module
// Coordinates change detection, chunking, embedding and persistence into one sync pass

pub mod consistency;


use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::detector::ChangeDetector;
use crate::embeddings::{ChunkingConfig, EmbeddingProvider, OpenAiEmbeddings, chunk_documents};
use crate::index::{IndexStore, LanceIndexStore, SearchResult, VectorIndex};
use crate::manifest::{Manifest, ManifestStore};
use crate::{KbError, ProviderErrorKind, Result};

pub use consistency::{ConsistencyReport, ConsistencyValidator};

/// Lifecycle of the knowledge base held by an [`Indexer`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexerState {
    Uninitialized,
    LoadingExisting,
    BuildingNew,
    Ready,
    Updating,
    Failed { error: String },
}

impl fmt::Display for IndexerState {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::LoadingExisting => f.write_str("loading existing index"),
            Self::BuildingNew => f.write_str("building new index"),
            Self::Ready => f.write_str("ready"),
            Self::Updating => f.write_str("updating"),
            Self::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

/// What a successful sync pass changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub new_documents: usize,
    pub new_chunks: usize,
    pub total_chunks: usize,
}

/// Result of a boundary sync operation, with errors already logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub new_document_count: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexerStatus {
    pub state: IndexerState,
    pub indexed_documents: usize,
    pub indexed_chunks: usize,
    pub manifest_entries: usize,
}

/// Keeps the on-disk index, the manifest and the served snapshot in step with the knowledge-base directory
pub struct Indexer {
    store: Arc<dyn IndexStore>,
    provider: Arc<dyn EmbeddingProvider>,
    manifest_store: ManifestStore,
    detector: ChangeDetector,
    chunking: ChunkingConfig,
    index_path: PathBuf,
    sync_lock: Mutex<()>,
    state: RwLock<IndexerState>,
    current: RwLock<Option<Arc<VectorIndex>>>,
}

impl Indexer {
    /// Build an indexer for `config` that embeds through `provider`
    #[inline]
    pub fn new(config: &Config, provider: Arc<dyn EmbeddingProvider>) -> Self {
        let store = Arc::new(LanceIndexStore::new(
            Arc::clone(&provider),
            config.embeddings.batch_size as usize,
        ));

        Self::with_components(
            store,
            provider,
            ManifestStore::new(config.manifest_path()),
            ChangeDetector::from_config(config),
            config.chunking.clone(),
            config.vector_store_path(),
        )
    }

    /// Build an indexer backed by the configured OpenAI-compatible provider
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = OpenAiEmbeddings::new(&config.embeddings)?;
        Ok(Self::new(config, Arc::new(provider)))
    }

    #[inline]
    pub fn with_components(
        store: Arc<dyn IndexStore>,
        provider: Arc<dyn EmbeddingProvider>,
        manifest_store: ManifestStore,
        detector: ChangeDetector,
        chunking: ChunkingConfig,
        index_path: PathBuf,
    ) -> Self {
        Self {
            store,
            provider,
            manifest_store,
            detector,
            chunking,
            index_path,
            sync_lock: Mutex::new(()),
            state: RwLock::new(IndexerState::Uninitialized),
            current: RwLock::new(None),
        }
    }

    #[inline]
    pub async fn state(&self) -> IndexerState {
        self.state.read().await.clone()
    }

    /// Snapshot currently served to queries
    #[inline]
    pub async fn current_index(&self) -> Option<Arc<VectorIndex>> {
        self.current.read().await.clone()
    }

    /// Bring the index up to date with the knowledge-base directory
    ///
    /// With `force_reload` every document is embedded into a fresh index that
    /// replaces the previous one only once it has been saved.
    #[inline]
    pub async fn initialize(&self, force_reload: bool) -> Result<SyncReport> {
        let _guard = self.sync_lock.lock().await;

        let result = if force_reload {
            self.rebuild().await
        } else {
            self.sync().await
        };

        match &result {
            Ok(report) => {
                self.set_state(IndexerState::Ready).await;
                info!(
                    "Knowledge base ready: {} new documents, {} new chunks, {} chunks total",
                    report.new_documents, report.new_chunks, report.total_chunks
                );
            }
            Err(e) => {
                self.set_state(IndexerState::Failed {
                    error: e.to_string(),
                })
                .await;
            }
        }

        result
    }

    /// Embed documents added or changed since the last successful sync
    #[inline]
    pub async fn update(&self) -> Result<SyncReport> {
        self.initialize(false).await
    }

    #[inline]
    pub async fn initialize_knowledge_base(&self, force_reload: bool) -> SyncOutcome {
        match self.initialize(force_reload).await {
            Ok(report) => SyncOutcome {
                success: true,
                new_document_count: report.new_documents,
                message: if force_reload {
                    format!(
                        "Knowledge base rebuilt from {} documents",
                        report.new_documents
                    )
                } else {
                    format!(
                        "Knowledge base initialized successfully ({} new documents)",
                        report.new_documents
                    )
                },
            },
            Err(e) => {
                error!("Failed to initialize knowledge base: {}", e);
                SyncOutcome {
                    success: false,
                    new_document_count: 0,
                    message: format!("Failed to initialize knowledge base: {e}"),
                }
            }
        }
    }

    #[inline]
    pub async fn update_knowledge_base(&self) -> SyncOutcome {
        match self.update().await {
            Ok(report) => SyncOutcome {
                success: true,
                new_document_count: report.new_documents,
                message: if report.new_documents == 0 {
                    "Knowledge base is up to date".to_string()
                } else {
                    format!(
                        "Knowledge base updated with {} new documents",
                        report.new_documents
                    )
                },
            },
            Err(e) => {
                error!("Failed to update knowledge base: {}", e);
                SyncOutcome {
                    success: false,
                    new_document_count: 0,
                    message: format!("Failed to update knowledge base: {e}"),
                }
            }
        }
    }

    /// Chunks most similar to `text` from the served snapshot
    #[inline]
    pub async fn query(&self, text: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let index = self.current_index().await.ok_or_else(|| {
            KbError::NoData("knowledge base not initialized".to_string())
        })?;

        let vector = self.provider.embed(text).await?;
        if let Some(dimension) = index.metadata().dimension {
            if dimension != vector.len() {
                return Err(KbError::provider(
                    ProviderErrorKind::InvalidResponse,
                    format!(
                        "query embedding has {} dimensions but the index uses {}",
                        vector.len(),
                        dimension
                    ),
                ));
            }
        }

        let results = index.search(&vector, limit).await?;
        debug!("Query matched {} chunks", results.len());
        Ok(results)
    }

    /// Serve the stored index without looking for new documents
    ///
    /// Returns `false` when nothing has been stored yet. The manifest is
    /// repaired the same way a sync would.
    #[inline]
    pub async fn open(&self) -> Result<bool> {
        let _guard = self.sync_lock.lock().await;
        if self.current_index().await.is_some() {
            return Ok(true);
        }

        match self.load_existing().await {
            Ok((Some(_), _)) => {
                self.set_state(IndexerState::Ready).await;
                Ok(true)
            }
            Ok((None, _)) => {
                self.set_state(IndexerState::Uninitialized).await;
                Ok(false)
            }
            Err(e) => {
                self.set_state(IndexerState::Failed {
                    error: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    /// Compare the manifest with the served or stored index without changing either
    #[inline]
    pub async fn validate_consistency(&self) -> Result<Option<ConsistencyReport>> {
        let index = match self.current_index().await {
            Some(index) => index,
            None if self.store.exists(&self.index_path).await => {
                Arc::new(self.store.load(&self.index_path).await?)
            }
            None => return Ok(None),
        };

        let mut manifest = self.manifest_store.load().await;
        Ok(Some(ConsistencyValidator::new(&index, &mut manifest).validate()))
    }

    #[inline]
    pub async fn status(&self) -> IndexerStatus {
        let (indexed_documents, indexed_chunks) = self
            .current_index()
            .await
            .map_or((0, 0), |index| (index.ingested().len(), index.len()));

        IndexerStatus {
            state: self.state().await,
            indexed_documents,
            indexed_chunks,
            manifest_entries: self.manifest_store.load().await.len(),
        }
    }

    async fn set_state(&self, state: IndexerState) {
        debug!("Indexer state: {}", state);
        *self.state.write().await = state;
    }

    async fn sync(&self) -> Result<SyncReport> {
        let (base, mut manifest) = match self.current_index().await {
            Some(index) => {
                self.set_state(IndexerState::Updating).await;
                (Some(index), self.manifest_store.load().await)
            }
            None => self.load_existing().await?,
        };

        let documents = self.detector.detect(&manifest).await?;
        if documents.is_empty() {
            return match base {
                Some(index) => Ok(SyncReport {
                    new_documents: 0,
                    new_chunks: 0,
                    total_chunks: index.len(),
                }),
                None => Err(KbError::NoData(format!(
                    "no documents found in {}",
                    self.detector.source_dir().display()
                ))),
            };
        }

        let chunks = chunk_documents(&documents, &self.chunking)?;

        let mut index = match &base {
            Some(index) => self.store.add_to(index, &chunks).await?,
            None if chunks.is_empty() => {
                return Err(KbError::NoData(
                    "documents contain no text to index".to_string(),
                ));
            }
            None => self.store.create_from(&chunks).await?,
        };
        for document in &documents {
            index.record_ingested(&document.source_path, document.fingerprint.clone());
        }

        self.store.save(&mut index, &self.index_path).await?;
        manifest.extend(documents.iter().map(|d| d.fingerprint.clone()));
        self.manifest_store.save(&manifest).await?;

        let report = SyncReport {
            new_documents: documents.len(),
            new_chunks: chunks.len(),
            total_chunks: index.len(),
        };
        *self.current.write().await = Some(Arc::new(index));
        Ok(report)
    }

    /// Load the on-disk index and a manifest consistent with it
    async fn load_existing(&self) -> Result<(Option<Arc<VectorIndex>>, Manifest)> {
        if !self.store.exists(&self.index_path).await {
            self.set_state(IndexerState::BuildingNew).await;
            let manifest = self.manifest_store.load().await;
            if !manifest.is_empty() {
                warn!(
                    "Manifest lists {} documents but no index exists at {}; ingesting everything",
                    manifest.len(),
                    self.index_path.display()
                );
            }
            return Ok((None, Manifest::new()));
        }

        self.set_state(IndexerState::LoadingExisting).await;
        match self.store.load(&self.index_path).await {
            Ok(index) => {
                let mut manifest = self.manifest_store.load().await;
                let removed = ConsistencyValidator::new(&index, &mut manifest).repair();
                if removed > 0 {
                    self.manifest_store.save(&manifest).await?;
                }

                let index = Arc::new(index);
                *self.current.write().await = Some(Arc::clone(&index));
                self.set_state(IndexerState::Updating).await;
                Ok((Some(index), manifest))
            }
            Err(KbError::CorruptIndex(reason)) => {
                warn!(
                    "Index at {} is corrupt ({}); rebuilding from scratch",
                    self.index_path.display(),
                    reason
                );
                self.set_state(IndexerState::BuildingNew).await;
                Ok((None, Manifest::new()))
            }
            Err(e) => Err(e),
        }
    }

    /// Embed every document into a fresh index and replace the stored one
    async fn rebuild(&self) -> Result<SyncReport> {
        self.set_state(IndexerState::BuildingNew).await;

        let documents = self.detector.detect(&Manifest::new()).await?;
        if documents.is_empty() {
            return Err(KbError::NoData(format!(
                "no documents found in {}",
                self.detector.source_dir().display()
            )));
        }

        let chunks = chunk_documents(&documents, &self.chunking)?;
        if chunks.is_empty() {
            return Err(KbError::NoData(
                "documents contain no text to index".to_string(),
            ));
        }

        let mut index = self.store.create_from(&chunks).await?;
        for document in &documents {
            index.record_ingested(&document.source_path, document.fingerprint.clone());
        }
        let manifest: Manifest = documents.iter().map(|d| d.fingerprint.clone()).collect();

        self.store.save(&mut index, &self.index_path).await?;
        self.manifest_store.save(&manifest).await?;

        let report = SyncReport {
            new_documents: documents.len(),
            new_chunks: chunks.len(),
            total_chunks: index.len(),
        };
        *self.current.write().await = Some(Arc::new(index));
        Ok(report)
    }
}
