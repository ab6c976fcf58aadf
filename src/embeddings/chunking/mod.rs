
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detector::{DocumentRecord, Fingerprint};
use crate::{KbError, Result};

/// A piece of a document ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text
    pub text: String,
    /// Relative path of the document this chunk came from
    pub source_path: String,
    /// Position of this chunk within its document
    pub chunk_index: usize,
    /// Fingerprint of the source document
    pub fingerprint: Fingerprint,
}

/// Configuration for the text splitter
///
/// Both values are measured in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Separator groups in priority order; a cut lands right after the separator
const SEPARATORS: &[&[&str]] = &[&["\n\n"], &["\n"], &[". ", "! ", "? "], &[" "]];

/// Decode and split documents into chunks, preserving document order
#[inline]
pub fn chunk_documents(documents: &[DocumentRecord], config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();

    for document in documents {
        let text = std::str::from_utf8(&document.content).map_err(|e| {
            KbError::Ingestion(format!(
                "Document {} is not valid UTF-8: {}",
                document.source_path, e
            ))
        })?;

        let pieces = split_text(text, config);
        debug!(
            "Split {} into {} chunks",
            document.source_path,
            pieces.len()
        );

        chunks.extend(pieces.into_iter().enumerate().map(|(chunk_index, text)| Chunk {
            text,
            source_path: document.source_path.clone(),
            chunk_index,
            fingerprint: document.fingerprint.clone(),
        }));
    }

    Ok(chunks)
}

/// Split text into overlapping chunks of at most `chunk_size` characters
///
/// Each chunk after the first starts `chunk_overlap` characters before the end
/// of the previous one, so dropping the first `chunk_overlap` characters of every
/// later chunk and concatenating reconstructs the input.
#[inline]
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let size = config.chunk_size.max(1);
    let overlap = config.chunk_overlap.min(size - 1);

    if chars.len() <= size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let max_end = start + size;
        if max_end >= chars.len() {
            chunks.push(chars[start..].iter().collect());
            break;
        }

        // Upper half of the window only, and always past the overlap so the window advances
        let min_end = start + (overlap + 1).max(size / 2);
        let end = find_boundary(&chars, min_end, max_end).unwrap_or(max_end);

        chunks.push(chars[start..end].iter().collect());
        start = end - overlap;
    }

    chunks
}

/// Latest cut position in `min_end..=max_end` for the highest-priority separator present
fn find_boundary(chars: &[char], min_end: usize, max_end: usize) -> Option<usize> {
    SEPARATORS.iter().find_map(|group| {
        (min_end..=max_end)
            .rev()
            .find(|&end| group.iter().any(|sep| ends_with(chars, end, sep)))
    })
}

fn ends_with(chars: &[char], end: usize, separator: &str) -> bool {
    let len = separator.chars().count();
    end >= len && chars[end - len..end].iter().copied().eq(separator.chars())
}
