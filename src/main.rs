//! Mnemos - Eternal fact memory
//!
//! Command-line front end over the memory engine. Each invocation loads the
//! snapshot from the data directory and saves it again after commands that
//! change the store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mnemos::{
    consolidate::ConsolidationOutcome, MemoryConfig, MemoryEngine, PredictionContext,
    RetrievalQuery,
};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mnemos")]
#[command(author = "Mnemos Contributors")]
#[command(version)]
#[command(about = "Eternal fact memory with hybrid retrieval")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MNEMOS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and store facts from text
    Ingest {
        /// Text to ingest
        #[arg(conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,

        /// Read the text from a file instead
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Retrieve memories relevant to a query
    Query {
        /// The question
        query: String,

        /// Use deep retrieval with reasoning over category summaries
        #[arg(long)]
        deep: bool,

        /// Recent conversation used to make the query self-contained
        #[arg(long)]
        context: Option<String>,
    },

    /// Run one consolidation pass
    Consolidate,

    /// Predict what the user needs next and print the injection block
    Predict {
        /// Application currently open (repeatable)
        #[arg(long = "app")]
        apps: Vec<String>,

        /// Recently touched file (repeatable)
        #[arg(long = "recent-file")]
        files: Vec<String>,

        /// Where the user is
        #[arg(long)]
        location: Option<String>,
    },

    /// Show store statistics
    Stats,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let config = match &cli.config {
        Some(path) => MemoryConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => MemoryConfig::from_env(),
    };

    match cli.command {
        Commands::Ingest { text, file } => {
            let (engine, cancel) = open_engine(config).await?;
            let (text, metadata) = read_input(text, file).await?;
            let items = engine.ingest(&text, &metadata, Some(&cancel)).await?;
            engine.save().await?;
            print_json(&items)?;
        }
        Commands::Query {
            query,
            deep,
            context,
        } => {
            let (engine, cancel) = open_engine(config).await?;
            let mut query = if deep {
                RetrievalQuery::deep(query)
            } else {
                RetrievalQuery::fast(query)
            };
            if let Some(context) = context {
                query = query.with_context(context);
            }
            let result = engine.retrieve(&query, Some(&cancel)).await?;
            // retrieval updates access times
            engine.save().await?;
            print_json(&result)?;
        }
        Commands::Consolidate => {
            let (engine, cancel) = open_engine(config).await?;
            let outcome = engine.consolidate(Some(&cancel)).await;
            if matches!(outcome, ConsolidationOutcome::Completed(_)) {
                engine.save().await?;
            }
            print_json(&outcome)?;
        }
        Commands::Predict {
            apps,
            files,
            location,
        } => {
            let (engine, cancel) = open_engine(config).await?;
            let mut context = PredictionContext::now().with_apps(apps).with_files(files);
            if let Some(location) = location {
                context = context.with_location(location);
            }
            let prediction = engine.predict(&context, Some(&cancel)).await?;
            print_json(&prediction)?;
        }
        Commands::Stats => {
            let (engine, _) = open_engine(config).await?;
            print_json(&engine.stats().await)?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

async fn open_engine(config: MemoryConfig) -> Result<(MemoryEngine, CancellationToken)> {
    let engine = MemoryEngine::open(config).await?;
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    Ok((engine, cancel))
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("mnemos={}", log_level).into());

    // Logs go to stderr so stdout stays parseable JSON
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling...");
            cancel.cancel();
        }
    });
}

async fn read_input(
    text: Option<String>,
    file: Option<PathBuf>,
) -> Result<(String, HashMap<String, serde_json::Value>)> {
    let mut metadata = HashMap::new();
    metadata.insert("source".to_string(), serde_json::json!("cli"));
    match (text, file) {
        (Some(text), _) => Ok((text, metadata)),
        (None, Some(path)) => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            metadata.insert(
                "uri".to_string(),
                serde_json::json!(format!("file://{}", path.display())),
            );
            metadata.insert("modality".to_string(), serde_json::json!("document"));
            Ok((text, metadata))
        }
        (None, None) => anyhow::bail!("either text or --file is required"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn show_config(config: Option<&MemoryConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
