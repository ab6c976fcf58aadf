use std::path::PathBuf;

use clap::{Parser, Subcommand};
use yucca_kb::Result;
use yucca_kb::commands::{init, query, reset_manifest, serve_mcp, status, update};
use yucca_kb::config::{Config, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "yucca-kb")]
#[command(about = "A change-aware knowledge base with embedding search and an MCP server")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml, the index and the manifest
    #[arg(long, global = true, value_name = "DIR")]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding provider and knowledge base
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Ingest documents into the knowledge base
    Init {
        /// Rebuild the index from every document
        #[arg(long)]
        force: bool,
    },
    /// Embed documents added or changed since the last sync
    Update,
    /// Search the knowledge base
    Query {
        /// Text to search for
        text: String,
        /// Maximum number of passages to print
        #[arg(long, default_value_t = 4)]
        limit: usize,
    },
    /// Show what is indexed
    Status,
    /// Forget which documents were ingested
    ResetManifest,
    /// Start MCP server on stdio
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base_dir = match cli.base_dir {
        Some(dir) => dir,
        None => Config::default_base_dir().map_err(anyhow::Error::from)?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&base_dir)?;
            } else {
                run_interactive_config(&base_dir)?;
            }
        }
        Commands::Init { force } => {
            init(&base_dir, force).await?;
        }
        Commands::Update => {
            update(&base_dir).await?;
        }
        Commands::Query { text, limit } => {
            query(&base_dir, &text, limit).await?;
        }
        Commands::Status => {
            status(&base_dir).await?;
        }
        Commands::ResetManifest => {
            reset_manifest(&base_dir).await?;
        }
        Commands::Serve => {
            serve_mcp(&base_dir).await?;
        }
    }

    Ok(())
}
