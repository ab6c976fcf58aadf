// Configuration management module
// TOML settings for the embedding provider, chunking and the knowledge base layout

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{Config, ConfigError, EmbeddingConfig, KnowledgeBaseConfig};
