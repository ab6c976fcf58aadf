// Embeddings module
// Embedding provider abstraction, the OpenAI-compatible client and document chunking

pub mod chunking;
#[cfg(test)]
pub(crate) mod fake;
pub mod openai;

use async_trait::async_trait;

use crate::{KbError, ProviderErrorKind, Result};

pub use chunking::{Chunk, ChunkingConfig, chunk_documents, split_text};
pub use openai::OpenAiEmbeddings;

/// Turns text into vectors
///
/// Implementations return exactly one vector per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    #[inline]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            KbError::provider(
                ProviderErrorKind::InvalidResponse,
                "provider returned no embedding for the query",
            )
        })
    }

    /// Model identifier recorded in index metadata
    fn model(&self) -> &str;
}
