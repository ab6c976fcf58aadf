// Manifest/index consistency validation
// Keeps the manifest from claiming documents the index never stored

#[cfg(test)]
mod tests;

use tracing::{debug, info, warn};

use crate::detector::Fingerprint;
use crate::index::VectorIndex;
use crate::manifest::Manifest;

/// Consistency check results between the manifest and a loaded index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Number of fingerprints in the manifest
    pub manifest_entries: usize,
    /// Number of documents the index records as ingested
    pub index_documents: usize,
    /// Fingerprints in the manifest that the index does not contain
    pub missing_in_index: Vec<Fingerprint>,
    /// Fingerprints in the index that the manifest does not list
    pub unrecorded_in_manifest: Vec<Fingerprint>,
    pub is_consistent: bool,
}

impl ConsistencyReport {
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Manifest is consistent: {} entries, {} documents in index",
                self.manifest_entries, self.index_documents
            )
        } else {
            format!(
                "Manifest inconsistencies found: {} missing in index, {} not recorded in manifest",
                self.missing_in_index.len(),
                self.unrecorded_in_manifest.len()
            )
        }
    }

    #[inline]
    pub fn total_issues(&self) -> usize {
        self.missing_in_index.len() + self.unrecorded_in_manifest.len()
    }
}

/// Compares a manifest against the index it describes
pub struct ConsistencyValidator<'a> {
    index: &'a VectorIndex,
    manifest: &'a mut Manifest,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub fn new(index: &'a VectorIndex, manifest: &'a mut Manifest) -> Self {
        Self { index, manifest }
    }

    #[inline]
    pub fn validate(&self) -> ConsistencyReport {
        let missing_in_index: Vec<Fingerprint> = self
            .manifest
            .iter()
            .filter(|fp| !self.index.is_ingested(fp))
            .cloned()
            .collect();

        let unrecorded_in_manifest: Vec<Fingerprint> = self
            .index
            .ingested()
            .iter()
            .filter(|fp| !self.manifest.contains(fp))
            .cloned()
            .collect();

        let is_consistent = missing_in_index.is_empty() && unrecorded_in_manifest.is_empty();
        let report = ConsistencyReport {
            manifest_entries: self.manifest.len(),
            index_documents: self.index.ingested().len(),
            missing_in_index,
            unrecorded_in_manifest,
            is_consistent,
        };

        if report.is_consistent {
            debug!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }

        report
    }

    /// Drop manifest entries the index does not contain so those documents are ingested again
    ///
    /// Returns the number of entries removed. Documents only the index knows
    /// about are left alone; they are re-embedded on the next sync.
    #[inline]
    pub fn repair(&mut self) -> usize {
        let report = self.validate();
        for fingerprint in &report.missing_in_index {
            self.manifest.remove(fingerprint);
        }

        if !report.missing_in_index.is_empty() {
            info!(
                "Removed {} manifest entries with no indexed content",
                report.missing_in_index.len()
            );
        }

        report.missing_in_index.len()
    }
}
