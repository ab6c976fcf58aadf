use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KbError>;

#[derive(Error, Debug)]
pub enum KbError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Embedding provider error ({kind}): {message}")]
    EmbeddingProvider {
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("No data: {0}")]
    NoData(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Classifies embedding provider failures so callers can decide whether to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Auth,
    Quota,
    Timeout,
    Transport,
    Server,
    InvalidResponse,
    Configuration,
}

impl ProviderErrorKind {
    #[inline]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Quota | Self::Timeout | Self::Transport | Self::Server
        )
    }
}

impl fmt::Display for ProviderErrorKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auth => "auth",
            Self::Quota => "quota",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Server => "server",
            Self::InvalidResponse => "invalid response",
            Self::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

impl KbError {
    #[inline]
    pub fn provider(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self::EmbeddingProvider {
            kind,
            message: message.into(),
        }
    }

    /// Whether the failed operation may succeed if the caller tries again later
    #[inline]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EmbeddingProvider { kind, .. } => kind.is_retryable(),
            // New files may be dropped into the knowledge base at any time
            Self::NoData(_) => true,
            _ => false,
        }
    }
}

pub mod commands;
pub mod config;
pub mod detector;
pub mod embeddings;
pub mod index;
pub mod indexer;
pub mod manifest;
pub mod mcp;
