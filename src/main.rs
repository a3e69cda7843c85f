//! CLI entry point for the civic similarity engine.
//!
//! Provides commands for indexing records, searching, finding similar
//! records, clustering duplicates, and serving the same over HTTP.

use anyhow::Context;
use civicsim::io::{ExitCode, JsonResponse, OutputFormat, OutputManager};
use civicsim::{
    Collection, EngineError, IndexStats, InMemoryRecordStore, OwnerId, RecordDataset,
    RecordFilter, SemanticEngine, Settings, VectorStore,
};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Semantic search and duplicate clustering for civic issue reports
#[derive(Parser)]
#[command(
    name = "civicsim",
    version = env!("CARGO_PKG_VERSION"),
    about = "Semantic search and duplicate clustering for civic records",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Quick Start:\n  $ civicsim init\n  $ civicsim index records.json\n  $ civicsim search \"broken streetlight\" --type issues\n  $ civicsim clusters --min-similarity 0.85"
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Emit a JSON envelope instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Set up .civicsim directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Embed every record of a JSON dataset
    #[command(
        after_help = "Dataset layout:\n  {\"solutions\": [{\"id\": 1, \"title\": \"...\", \"description\": \"...\"}],\n   \"issues\": [{\"id\": 7, \"title\": \"...\", \"status\": \"reported\", \"category\": \"roads\"}]}"
    )]
    Index {
        /// Path to the records JSON file
        records: PathBuf,

        /// Drop stored embeddings and embed everything again
        #[arg(short, long)]
        force: bool,
    },

    /// Rank records against a text query
    Search {
        query: String,

        /// Collection to search: solutions or issues
        #[arg(long = "type", default_value = "solutions")]
        collection: Collection,

        #[arg(short, long)]
        limit: Option<usize>,

        /// Minimum similarity, exclusive
        #[arg(short, long)]
        threshold: Option<f32>,
    },

    /// Records most similar to an existing record
    Similar {
        /// Collection of the reference record: solutions or issues
        collection: Collection,

        /// Id of the reference record
        id: OwnerId,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Group near-duplicate records
    Clusters {
        #[arg(long = "type", default_value = "issues")]
        collection: Collection,

        /// Only cluster records with this status (defaults to config)
        #[arg(long, conflicts_with = "all_statuses")]
        status: Option<String>,

        /// Cluster every status
        #[arg(long)]
        all_statuses: bool,

        /// Only cluster records in this category
        #[arg(long)]
        category: Option<String>,

        /// Minimum pair similarity, exclusive
        #[arg(long)]
        min_similarity: Option<f32>,

        /// Cluster each category separately
        #[arg(long, conflicts_with = "category")]
        by_category: bool,
    },

    /// Display active settings
    Config,

    /// Serve search, similar and clusters over HTTP
    #[cfg(feature = "http-server")]
    Serve {
        /// Bind address (defaults to config)
        #[arg(long)]
        bind: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct IndexSummary {
    records: PathBuf,
    model: String,
    solutions: IndexStats,
    issues: IndexStats,
}

impl fmt::Display for IndexSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Indexed {} with {}", self.records.display(), self.model)?;
        for (name, stats) in [("solutions", &self.solutions), ("issues", &self.issues)] {
            writeln!(
                f,
                "  {name:<10} {} created, {} updated, {} unchanged, {} removed",
                stats.created, stats.updated, stats.unchanged, stats.removed
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct InitSummary {
    path: PathBuf,
}

impl fmt::Display for InitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Created configuration file at: {}\nEdit this file to customize your settings.",
            self.path.display()
        )
    }
}

fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_settings(cli: &Cli) -> Result<Settings, EngineError> {
    match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
}

/// Engine over the record snapshot written by the last `index` run.
fn open_engine(settings: Settings) -> anyhow::Result<SemanticEngine> {
    let snapshot = settings.records_path();
    if !snapshot.exists() {
        return Err(EngineError::RecordStore {
            reason: format!(
                "no indexed records at {}; run 'civicsim index <records.json>' first",
                snapshot.display()
            ),
        }
        .into());
    }
    let records = Arc::new(InMemoryRecordStore::from_json_file(&snapshot)?);
    Ok(SemanticEngine::from_settings(settings, records)?)
}

/// Cancel `token` on ctrl-c.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

async fn run(cli: Cli, settings: Settings, out: &mut OutputManager) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force)?;
            Ok(out.success(InitSummary { path })?)
        }

        Commands::Config => {
            if out.format().is_json() {
                let response = JsonResponse::success(&settings);
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("Current Configuration:");
                println!("{}", "=".repeat(50));
                println!("{}", toml::to_string_pretty(&settings)?);
            }
            Ok(ExitCode::Success)
        }

        Commands::Index { records, force } => {
            let dataset = RecordDataset::from_json_file(&records)?;
            let store = Arc::new(InMemoryRecordStore::from_dataset(&dataset)?);
            out.progress(&format!("Indexing {} records...", dataset.len()))?;

            let snapshot = settings.records_path();
            let engine = SemanticEngine::from_settings(settings, store)?;
            if force {
                for collection in Collection::ALL {
                    engine.store().clear(collection)?;
                }
            }

            let solutions = engine.sync_collection(Collection::Solution)?;
            let issues = engine.sync_collection(Collection::Issue)?;
            engine.save()?;
            dataset.save_json(&snapshot)?;

            Ok(out.success(IndexSummary {
                records,
                model: engine.model_name(),
                solutions,
                issues,
            })?)
        }

        Commands::Search {
            query,
            collection,
            limit,
            threshold,
        } => {
            let engine = open_engine(settings)?;
            let results = engine.search(collection, &query, limit, threshold)?;
            Ok(out.collection(results, "results", &format!("'{query}'"))?)
        }

        Commands::Similar {
            collection,
            id,
            limit,
        } => {
            let engine = open_engine(settings)?;
            let results = engine.find_similar(collection, id, limit)?;
            Ok(out.collection(results, "similar records", &format!("{collection} {id}"))?)
        }

        Commands::Clusters {
            collection,
            status,
            all_statuses,
            category,
            min_similarity,
            by_category,
        } => {
            let engine = Arc::new(open_engine(settings)?);
            let mut filter = if all_statuses {
                RecordFilter::any()
            } else {
                engine.default_cluster_filter()
            };
            if status.is_some() {
                filter.status = status;
            }
            filter.category = category;

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let worker = engine.clone();
            let query = format!("{collection} matching {filter:?}");
            let clusters = tokio::task::spawn_blocking(move || {
                if by_category {
                    worker.cluster_by_category(collection, &filter, min_similarity, &cancel)
                } else {
                    worker.cluster(collection, &filter, min_similarity, &cancel)
                }
            })
            .await
            .context("clustering worker panicked")??;

            Ok(out.collection(clusters, "clusters", &query)?)
        }

        #[cfg(feature = "http-server")]
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.server.bind.clone());
            let engine = Arc::new(open_engine(settings)?);
            civicsim::http_server::serve_http(engine, &bind).await?;
            Ok(ExitCode::Success)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut out = OutputManager::new(OutputFormat::from_json_flag(cli.json));

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            // Logging is not up yet; report through the envelope
            let code = out.error(&e).unwrap_or(ExitCode::ConfigError);
            std::process::exit(code.into());
        }
    };
    init_tracing(cli.debug || settings.debug);

    let code = match run(cli, settings, &mut out).await {
        Ok(code) => code,
        Err(e) => match e.downcast_ref::<EngineError>() {
            Some(engine_error) => out
                .error(engine_error)
                .unwrap_or_else(|_| ExitCode::from_error(engine_error)),
            None => {
                eprintln!("Error: {e:#}");
                ExitCode::GeneralError
            }
        },
    };
    std::process::exit(code.into());
}
