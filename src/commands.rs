use anyhow::{Context, Result, anyhow};
use console::style;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::Config;
use crate::indexer::{ConsistencyReport, Indexer, SyncOutcome};
use crate::manifest::ManifestStore;
use crate::mcp::{McpServer, register_knowledge_base_tools};

fn load_indexer(base_dir: &Path) -> Result<Indexer> {
    let config = Config::load(base_dir).context("Failed to load configuration")?;
    Indexer::from_config(&config).context("Failed to create indexer")
}

fn print_outcome(outcome: &SyncOutcome) -> Result<()> {
    if outcome.success {
        println!("{} {}", style("✓").green(), outcome.message);
        Ok(())
    } else {
        eprintln!("{} {}", style("✗").red(), outcome.message);
        Err(anyhow!("{}", outcome.message))
    }
}

/// Ingest documents into the knowledge base, rebuilding from scratch when `force` is set
#[inline]
pub async fn init(base_dir: &Path, force: bool) -> Result<()> {
    let indexer = load_indexer(base_dir)?;
    info!("Initializing knowledge base in {}", base_dir.display());
    print_outcome(&indexer.initialize_knowledge_base(force).await)
}

/// Embed documents added or changed since the last sync
#[inline]
pub async fn update(base_dir: &Path) -> Result<()> {
    let indexer = load_indexer(base_dir)?;
    print_outcome(&indexer.update_knowledge_base().await)
}

/// Print the chunks most similar to `text`
#[inline]
pub async fn query(base_dir: &Path, text: &str, limit: usize) -> Result<()> {
    let indexer = load_indexer(base_dir)?;
    if !indexer.open().await? {
        println!("The knowledge base has not been initialized yet.");
        println!("Use 'yucca-kb init' to ingest documents.");
        return Ok(());
    }

    let results = indexer.query(text, limit).await?;
    if results.is_empty() {
        println!("No matching passages.");
        return Ok(());
    }

    for (rank, result) in results.iter().enumerate() {
        println!(
            "{} {} #{} {}",
            style(format!("{}.", rank + 1)).bold(),
            style(&result.source_path).cyan(),
            result.chunk_index,
            style(format!("(score {:.3})", result.score)).dim()
        );
        for line in result.text.lines() {
            println!("   {line}");
        }
        println!();
    }

    Ok(())
}

/// Show what is indexed and whether the manifest agrees with it
#[inline]
pub async fn status(base_dir: &Path) -> Result<()> {
    let config = Config::load(base_dir).context("Failed to load configuration")?;
    let indexer = Indexer::from_config(&config).context("Failed to create indexer")?;

    println!("{}", style("📊 Knowledge Base Status").bold().cyan());
    println!("{}", "=".repeat(50));
    println!();

    println!("{}", style("Locations:").bold().yellow());
    println!("   Documents: {}", config.knowledge_base_dir().display());
    println!("   Index: {}", config.vector_store_path().display());
    println!("   Manifest: {}", config.manifest_path().display());
    println!();

    println!("{}", style("Embedding Provider:").bold().yellow());
    println!("   Model: {}", config.embeddings.model);
    println!("   API Base: {}", config.embeddings.api_base);
    if config.embeddings.api_key().is_none() {
        println!(
            "   {} {} is not set",
            style("⚠").yellow(),
            config.embeddings.api_key_env
        );
    }
    println!();

    let (consistency, opened) = inspect(&indexer).await;

    println!("{}", style("Index:").bold().yellow());
    match opened {
        Ok(true) => {
            let status = indexer.status().await;
            println!("   ✅ Loaded");
            println!("   📄 Documents: {}", status.indexed_documents);
            println!("   🧩 Chunks: {}", status.indexed_chunks);
            println!("   📋 Manifest entries: {}", status.manifest_entries);
        }
        Ok(false) => {
            println!("   📭 No index stored yet");
        }
        Err(e) => {
            error!("Failed to load index: {}", e);
            println!("   ❌ Failed to load: {e}");
        }
    }

    println!();
    println!("{}", style("Consistency:").bold().yellow());
    match consistency {
        Ok(Some(report)) if report.is_consistent => {
            println!("   ✅ {}", report.summary());
        }
        Ok(Some(report)) => {
            println!("   ⚠️  {}", report.summary());
            println!("   Documents missing from the index were dropped from the manifest and will be ingested by the next update.");
        }
        Ok(None) => {
            println!("   Nothing to check");
        }
        Err(e) => {
            println!("   ❌ Failed to check consistency: {e}");
        }
    }

    println!();
    println!("💡 Next Steps:");
    println!("   • Use 'yucca-kb update' after adding documents");
    println!("   • Use 'yucca-kb init --force' to rebuild the index");
    println!("   • Use 'yucca-kb serve' to start the MCP server");

    Ok(())
}

/// Check the manifest against the stored index, then open it
///
/// Opening repairs the manifest, so the check has to come first to see the drift.
async fn inspect(
    indexer: &Indexer,
) -> (
    crate::Result<Option<ConsistencyReport>>,
    crate::Result<bool>,
) {
    let consistency = indexer.validate_consistency().await;
    let opened = indexer.open().await;
    (consistency, opened)
}

/// Forget which documents were ingested so the next sync embeds everything again
#[inline]
pub async fn reset_manifest(base_dir: &Path) -> Result<()> {
    let config = Config::load(base_dir).context("Failed to load configuration")?;
    let store = ManifestStore::new(config.manifest_path());
    let previous = store.load().await.len();

    store
        .reset()
        .await
        .context("Failed to reset the sync manifest")?;

    println!(
        "{} Cleared {} entries from {}",
        style("✓").green(),
        previous,
        store.path().display()
    );
    println!("Run 'yucca-kb init --force' to rebuild the index from every document.");
    Ok(())
}

/// Serve the knowledge-base tools over MCP on stdio
///
/// stdout carries the protocol, so everything else goes to stderr.
#[inline]
pub async fn serve_mcp(base_dir: &Path) -> Result<()> {
    let indexer = Arc::new(load_indexer(base_dir)?);

    let server = Arc::new(McpServer::new(
        "yucca-kb".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    ));
    register_knowledge_base_tools(&server, &indexer).await;

    let startup = {
        let indexer = Arc::clone(&indexer);
        tokio::spawn(async move {
            let outcome = indexer.initialize_knowledge_base(false).await;
            if outcome.success {
                info!("{}", outcome.message);
            }
        })
    };

    eprintln!(
        "✅ MCP server initialized with tools: init_knowledge_base, update_knowledge_base, search_knowledge_base"
    );
    eprintln!("Note: This server uses stdio transport. Connect via MCP client.");

    let result = tokio::select! {
        result = Arc::clone(&server).serve_stdio() => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n📴 Received interrupt signal, shutting down...");
            Ok(())
        }
    };

    startup.abort();
    if let Err(e) = &result {
        error!("MCP server error: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{Fingerprint, FingerprintPolicy};
    use crate::embeddings::EmbeddingProvider;
    use crate::embeddings::fake::FakeEmbeddings;
    use tempfile::TempDir;

    #[tokio::test]
    async fn status_sees_drift_before_open_repairs_it() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let config = Config::with_base_dir(temp_dir.path());
        std::fs::create_dir_all(config.knowledge_base_dir()).expect("can create kb dir");
        std::fs::write(config.knowledge_base_dir().join("a.txt"), "Hello world.")
            .expect("can write document");
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(FakeEmbeddings::new(16));

        Indexer::new(&config, Arc::clone(&provider))
            .initialize(false)
            .await
            .expect("initial sync succeeds");

        let ghost = Fingerprint::new(FingerprintPolicy::PathAndModified, "ghost.txt", 5);
        let manifest_store = ManifestStore::new(config.manifest_path());
        let mut manifest = manifest_store.load().await;
        manifest.insert(ghost.clone());
        manifest_store.save(&manifest).await.expect("manifest saves");

        let indexer = Indexer::new(&config, provider);
        let (consistency, opened) = inspect(&indexer).await;

        let report = consistency.expect("check runs").expect("index is stored");
        assert_eq!(report.missing_in_index, vec![ghost]);
        assert!(opened.expect("open succeeds"));
        assert_eq!(manifest_store.load().await.len(), 1);
    }
}
