// Sync manifest
// Durable record of the document fingerprints already embedded into the index


use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::Result;
use crate::detector::Fingerprint;

/// Set of ingested fingerprints, persisted as `{"files": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    files: BTreeSet<Fingerprint>,
}

impl Manifest {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.files.contains(fingerprint)
    }

    /// Returns false when the fingerprint was already recorded
    #[inline]
    pub fn insert(&mut self, fingerprint: Fingerprint) -> bool {
        self.files.insert(fingerprint)
    }

    #[inline]
    pub fn remove(&mut self, fingerprint: &Fingerprint) -> bool {
        self.files.remove(fingerprint)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> {
        self.files.iter()
    }
}

impl Extend<Fingerprint> for Manifest {
    #[inline]
    fn extend<T: IntoIterator<Item = Fingerprint>>(&mut self, iter: T) {
        self.files.extend(iter);
    }
}

impl FromIterator<Fingerprint> for Manifest {
    #[inline]
    fn from_iter<T: IntoIterator<Item = Fingerprint>>(iter: T) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

/// Reads and writes the manifest file
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    #[inline]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the manifest, treating a missing or unparseable file as empty
    #[inline]
    pub async fn load(&self) -> Manifest {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No manifest at {}, starting empty", self.path.display());
                return Manifest::new();
            }
            Err(e) => {
                warn!(
                    "Failed to read manifest {}: {}; starting empty",
                    self.path.display(),
                    e
                );
                return Manifest::new();
            }
        };

        match serde_json::from_str::<Manifest>(&content) {
            Ok(manifest) => {
                debug!(
                    "Loaded manifest with {} entries from {}",
                    manifest.len(),
                    self.path.display()
                );
                manifest
            }
            Err(e) => {
                warn!(
                    "Manifest {} is corrupt ({}); all documents will be treated as new",
                    self.path.display(),
                    e
                );
                Manifest::new()
            }
        }
    }

    /// Persist the full manifest, replacing the previous file
    #[inline]
    pub async fn save(&self, manifest: &Manifest) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(manifest).map_err(anyhow::Error::from)?;

        let tmp_path = self.path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        fs::write(&tmp_path, json).await?;
        if let Err(e) = fs::rename(&tmp_path, &self.path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!(
            "Saved manifest with {} entries to {}",
            manifest.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Persist and return an empty manifest
    #[inline]
    pub async fn reset(&self) -> Result<Manifest> {
        let manifest = Manifest::new();
        self.save(&manifest).await?;
        info!("Reset manifest at {}", self.path.display());
        Ok(manifest)
    }
}
