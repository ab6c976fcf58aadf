// File change detection
// Lists eligible knowledge-base documents and keeps the ones the manifest has not seen

#[cfg(test)]
mod tests;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::manifest::Manifest;
use crate::{KbError, Result};

/// How a document's fingerprint is derived
///
/// `PathAndModified` notices edits because the modification time is part of
/// the fingerprint. `PathOnly` only notices files that were added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintPolicy {
    #[default]
    PathAndModified,
    PathOnly,
}

impl fmt::Display for FingerprintPolicy {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathAndModified => f.write_str("path_and_modified"),
            Self::PathOnly => f.write_str("path_only"),
        }
    }
}

/// Identifier recorded in the manifest once a document has been ingested
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Build a fingerprint for a document path relative to the knowledge-base directory
    ///
    /// The modification time always follows the last `@` and is purely
    /// numeric, so two distinct paths never share a fingerprint.
    #[inline]
    pub fn new(policy: FingerprintPolicy, relative_path: &str, modified_ms: u128) -> Self {
        match policy {
            FingerprintPolicy::PathAndModified => Self(format!("{relative_path}@{modified_ms}")),
            FingerprintPolicy::PathOnly => Self(relative_path.to_string()),
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    #[inline]
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Fingerprint {
    #[inline]
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One source document read during a sync pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    /// Full path on disk
    pub path: PathBuf,
    /// Path relative to the knowledge-base directory, used as the source identifier
    pub source_path: String,
    /// Raw file bytes; decoded during ingestion
    pub content: Vec<u8>,
    pub fingerprint: Fingerprint,
}

/// An eligible file and its fingerprint, before its content is read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub source_path: String,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    source_dir: PathBuf,
    extensions: Vec<String>,
    policy: FingerprintPolicy,
}

impl ChangeDetector {
    #[inline]
    pub fn new(source_dir: impl Into<PathBuf>, extensions: &[String], policy: FingerprintPolicy) -> Self {
        Self {
            source_dir: source_dir.into(),
            extensions: extensions
                .iter()
                .map(|ext| ext.trim().to_ascii_lowercase())
                .collect(),
            policy,
        }
    }

    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.knowledge_base_dir(),
            &config.knowledge_base.extensions,
            config.knowledge_base.fingerprint,
        )
    }

    #[inline]
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    #[inline]
    pub fn policy(&self) -> FingerprintPolicy {
        self.policy
    }

    /// Documents whose fingerprint is absent from `manifest`, ordered by source path
    #[inline]
    pub async fn detect(&self, manifest: &Manifest) -> Result<Vec<DocumentRecord>> {
        let candidates = self.scan().await?;
        let total = candidates.len();

        let mut documents = Vec::new();
        for candidate in candidates {
            if manifest.contains(&candidate.fingerprint) {
                continue;
            }

            let content = fs::read(&candidate.path).await.map_err(|e| {
                KbError::Ingestion(format!(
                    "Failed to read document {}: {}",
                    candidate.path.display(),
                    e
                ))
            })?;

            debug!(
                "Detected new document {} ({} bytes)",
                candidate.source_path,
                content.len()
            );

            documents.push(DocumentRecord {
                path: candidate.path,
                source_path: candidate.source_path,
                content,
                fingerprint: candidate.fingerprint,
            });
        }

        info!(
            "Found {} new or changed documents out of {} in {}",
            documents.len(),
            total,
            self.source_dir.display()
        );

        Ok(documents)
    }

    /// Every eligible file in the knowledge-base directory, ordered by source path
    #[inline]
    pub async fn scan(&self) -> Result<Vec<Candidate>> {
        let mut entries = fs::read_dir(&self.source_dir).await.map_err(|e| {
            KbError::Detection(format!(
                "Failed to read knowledge base directory {}: {}",
                self.source_dir.display(),
                e
            ))
        })?;

        let mut candidates = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(KbError::Detection(format!(
                        "Failed to list knowledge base directory {}: {}",
                        self.source_dir.display(),
                        e
                    )));
                }
            };

            let path = entry.path();
            if !self.is_eligible(&path) {
                continue;
            }

            // Follows symlinks so linked documents are picked up
            let metadata = match fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            let Some(source_path) = entry.file_name().to_str().map(ToString::to_string) else {
                warn!("Skipping file with non UTF-8 name: {}", path.display());
                continue;
            };

            let modified_ms = match self.policy {
                FingerprintPolicy::PathAndModified => {
                    let modified = metadata.modified().map_err(|e| {
                        KbError::Detection(format!(
                            "Modification time unavailable for {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                    millis_since_epoch(modified)
                }
                FingerprintPolicy::PathOnly => 0,
            };

            candidates.push(Candidate {
                fingerprint: Fingerprint::new(self.policy, &source_path, modified_ms),
                path,
                source_path,
            });
        }

        candidates.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        Ok(candidates)
    }

    fn is_eligible(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            })
    }
}

fn millis_since_epoch(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
