use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::EmbeddingProvider;
use crate::{KbError, ProviderErrorKind, Result};

/// Deterministic bag-of-words embeddings with failure injection
pub(crate) struct FakeEmbeddings {
    dimension: usize,
    delay: Duration,
    failure: Mutex<Option<ProviderErrorKind>>,
    calls: AtomicUsize,
    embedded: AtomicUsize,
}

impl FakeEmbeddings {
    pub(crate) fn new(dimension: usize) -> Self {
        Self {
            dimension,
            delay: Duration::ZERO,
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
            embedded: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn fail_with(&self, kind: Option<ProviderErrorKind>) {
        *self.failure.lock().expect("failure lock poisoned") = kind;
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Total number of texts embedded so far
    pub(crate) fn embedded(&self) -> usize {
        self.embedded.load(Ordering::SeqCst)
    }

    pub(crate) fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
                    (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
                });
            vector[(hash % self.dimension as u64) as usize] += 1.0;
        }
        // Keeps whitespace-like chunks away from the zero vector
        vector[0] += 0.01;
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbeddings {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failure = *self.failure.lock().expect("failure lock poisoned");
        if let Some(kind) = failure {
            return Err(KbError::provider(kind, "injected failure"));
        }

        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn model(&self) -> &str {
        "fake-embedding"
    }
}
