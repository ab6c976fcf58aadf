
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Config, ConfigError, EmbeddingConfig, KnowledgeBaseConfig};
use crate::detector::FingerprintPolicy;

#[inline]
pub fn run_interactive_config(base_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Yucca Knowledge Base Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(base_dir);

    eprintln!("{}", style("Embedding Provider").bold().yellow());
    eprintln!("Configure the OpenAI-compatible API used to embed documents.");
    eprintln!();

    configure_embeddings(&mut config.embeddings)?;

    eprintln!();
    eprintln!("{}", style("Knowledge Base").bold().yellow());
    configure_knowledge_base(&mut config.knowledge_base)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_provider_connection(&config.embeddings) {
        eprintln!("{}", style("✓ Embedding API reachable!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not reach the embedding API").yellow()
        );
        eprintln!("You can continue, but indexing will fail until the API is reachable.");
    }

    if config.embeddings.api_key().is_none() {
        eprintln!(
            "{}",
            style(format!(
                "⚠ Environment variable {} is not set",
                config.embeddings.api_key_env
            ))
            .yellow()
        );
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(base_dir: &Path) -> Result<()> {
    let config = Config::load(base_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    eprintln!("  API Base: {}", style(&config.embeddings.api_base).cyan());
    eprintln!("  Model: {}", style(&config.embeddings.model).cyan());
    eprintln!(
        "  API Key: {} ({})",
        style(&config.embeddings.api_key_env).cyan(),
        if config.embeddings.api_key().is_some() {
            style("set").green()
        } else {
            style("missing").red()
        }
    );
    eprintln!("  Batch Size: {}", style(config.embeddings.batch_size).cyan());
    eprintln!(
        "  Request Timeout: {}s",
        style(config.embeddings.request_timeout_secs).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Chunking:").bold().yellow());
    eprintln!("  Chunk Size: {}", style(config.chunking.chunk_size).cyan());
    eprintln!(
        "  Chunk Overlap: {}",
        style(config.chunking.chunk_overlap).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Knowledge Base:").bold().yellow());
    eprintln!(
        "  Source Directory: {}",
        style(config.knowledge_base_dir().display()).cyan()
    );
    eprintln!(
        "  Extensions: {}",
        style(config.knowledge_base.extensions.join(", ")).cyan()
    );
    eprintln!(
        "  Fingerprint: {}",
        style(config.knowledge_base.fingerprint).cyan()
    );
    eprintln!(
        "  Vector Store: {}",
        style(config.vector_store_path().display()).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(base_dir: &Path) -> Config {
    Config::load(base_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            Config::with_base_dir(base_dir)
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        },
    )
}

fn configure_embeddings(embeddings: &mut EmbeddingConfig) -> Result<()> {
    let api_base: String = Input::new()
        .with_prompt("API base URL")
        .default(embeddings.api_base.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = EmbeddingConfig {
                api_base: input.clone(),
                ..EmbeddingConfig::default()
            };
            temp_config.api_base_url()?;
            Ok(())
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(embeddings.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding requests")
        .default(embeddings.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 2048 {
                Err("Batch size must be 2048 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let timeout: u64 = Input::new()
        .with_prompt("Request timeout (seconds)")
        .default(embeddings.request_timeout_secs)
        .interact_text()?;

    embeddings.set_api_base(api_base)?;
    embeddings.set_model(model)?;
    embeddings.set_batch_size(batch_size)?;
    embeddings.set_request_timeout_secs(timeout)?;

    Ok(())
}

fn configure_knowledge_base(knowledge_base: &mut KnowledgeBaseConfig) -> Result<()> {
    let source_dir: String = Input::new()
        .with_prompt("Knowledge base directory")
        .default(knowledge_base.source_dir.display().to_string())
        .interact_text()?;

    let policies = [FingerprintPolicy::PathAndModified, FingerprintPolicy::PathOnly];
    let labels = [
        "path + modified time (re-ingest edited files)",
        "path only (ingest new files only)",
    ];
    let default_index = policies
        .iter()
        .position(|p| *p == knowledge_base.fingerprint)
        .unwrap_or(0);

    let policy_index = Select::new()
        .with_prompt("Change detection")
        .default(default_index)
        .items(&labels)
        .interact()?;

    knowledge_base.source_dir = source_dir.into();
    knowledge_base.fingerprint = policies[policy_index];

    Ok(())
}

fn test_provider_connection(embeddings: &EmbeddingConfig) -> bool {
    let Ok(base) = embeddings.api_base_url() else {
        return false;
    };
    let Ok(url) = base.join("models") else {
        return false;
    };

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    let mut request = agent.get(url.as_str());
    if let Some(key) = embeddings.api_key() {
        request = request.header("Authorization", format!("Bearer {}", key));
    }

    match request.call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}
