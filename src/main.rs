//! CLI entry point for the taxonomy builder.
//!
//! Provides commands for importing records, building taxonomies, inspecting
//! topics, and serving the HTTP API.

use anyhow::Context;
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use taxonomist::display::{THEME, create_build_summary_table, create_topic_tree_table};
use taxonomist::labeling::{EmbeddingGenerator, FastEmbedGenerator, build_labeler};
use taxonomist::store::{FileStore, StoredRecord};
use taxonomist::{BuildError, BuildStatus, Settings, TaxonomyService, TopicStore};
use tokio_util::sync::CancellationToken;

/// Texts embedded per model call during import.
const EMBED_CHUNK: usize = 64;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Hierarchical topic taxonomies from text embeddings
#[derive(Parser)]
#[command(
    name = "taxonomist",
    version = env!("CARGO_PKG_VERSION"),
    about = "Build hierarchical topic taxonomies from text embeddings",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Quick Start:\n  $ taxonomist init\n  $ taxonomist import acme records.jsonl --embed\n  $ taxonomist build acme\n  $ taxonomist topics acme"
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up .taxonomist directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,

    /// Import records from a JSON Lines file
    #[command(
        after_help = "Each line is an object with \"id\", \"text\" and optionally \"embedding\" and \"created_at\".\n\nExamples:\n  taxonomist import acme records.jsonl\n  taxonomist import acme texts.jsonl --embed"
    )]
    Import {
        tenant: String,

        file: PathBuf,

        /// Compute missing embeddings with the local embedding model
        #[arg(long)]
        embed: bool,
    },

    /// Rebuild a tenant's taxonomy
    Build {
        tenant: String,

        /// Maximum tree depth (overrides config)
        #[arg(long)]
        max_levels: Option<u32>,

        /// Output the build result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a tenant's topics
    Topics {
        tenant: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = if let Some(config_path) = &cli.config {
        Settings::load_from(config_path).unwrap_or_else(|e| {
            eprintln!(
                "Configuration error loading from {}: {e}",
                config_path.display()
            );
            std::process::exit(1);
        })
    } else {
        Settings::load().unwrap_or_else(|e| {
            eprintln!("Configuration error: {e}");
            Settings::default()
        })
    };

    taxonomist::logging::init(&settings.logging);

    if let Err(e) = run(cli.command, settings).await {
        eprintln!("{}", THEME.error_with_icon(&format!("{e:#}")));
        std::process::exit(1);
    }
}

async fn run(command: Commands, settings: Settings) -> anyhow::Result<()> {
    match command {
        Commands::Init { force } => {
            match Settings::init_config_file(force) {
                Ok(path) => {
                    println!("Created configuration file at: {}", path.display());
                    println!("Edit this file to customize your settings.");
                }
                Err(e) => anyhow::bail!("{e}"),
            }
            Ok(())
        }

        Commands::Config => {
            println!("{}", THEME.apply(&THEME.header, "Current Configuration:"));
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }

        Commands::Import {
            tenant,
            file,
            embed,
        } => import(&settings, &tenant, &file, embed).await,

        Commands::Build {
            tenant,
            max_levels,
            json,
        } => {
            let mut config = settings.clustering.clone();
            if let Some(max_levels) = max_levels {
                config.max_levels = max_levels;
            }
            let service = service_from(&settings)?;
            let result = service.build(&tenant, Some(config)).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", create_build_summary_table(&result));
                if !result.topics.is_empty() {
                    let topics = service.topics(&tenant).await?;
                    println!("{}", create_topic_tree_table(&topics));
                }
            }
            if result.status == BuildStatus::Failed {
                let suggestions = result
                    .error_code
                    .as_deref()
                    .map(BuildError::suggestions_for_code)
                    .unwrap_or_default();
                if !json && !suggestions.is_empty() {
                    eprintln!("{}", THEME.suggestions(&suggestions));
                }
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Topics { tenant, json } => {
            let store = FileStore::new(&settings.storage.data_dir);
            let topics = store.list_topics(&tenant).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&topics)?);
            } else if topics.is_empty() {
                println!(
                    "{}",
                    THEME.warning_with_icon(&format!("No topics for tenant '{tenant}'"))
                );
            } else {
                println!(
                    "{} {}",
                    THEME.apply(&THEME.title, format!("Topics for '{tenant}'")),
                    THEME.apply(&THEME.dim, format!("({} total)", topics.len()))
                );
                println!("{}", create_topic_tree_table(&topics));
            }
            Ok(())
        }

        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.server.bind.clone());
            let shutdown = CancellationToken::new();
            let service = service_from(&settings)?.with_shutdown(shutdown.clone());
            taxonomist::server::serve_http(service, &bind, shutdown).await
        }
    }
}

fn service_from(settings: &Settings) -> anyhow::Result<TaxonomyService> {
    let store = Arc::new(FileStore::new(&settings.storage.data_dir));
    let labeler = build_labeler(&settings.labeler).context("Failed to create labeler")?;
    let timeout = match settings.server.build_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    Ok(TaxonomyService::new(store.clone(), store, labeler)
        .with_defaults(settings.clustering.clone())
        .with_build_timeout(timeout))
}

async fn import(settings: &Settings, tenant: &str, file: &Path, embed: bool) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let mut records = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: StoredRecord = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid record", file.display(), line_no + 1))?;
        records.push(record);
    }

    let missing = records.iter().filter(|r| r.embedding.is_empty()).count();
    if missing > 0 && embed {
        eprintln!(
            "Embedding {} records with the local model...",
            THEME.apply(&THEME.number, missing)
        );
        records = tokio::task::spawn_blocking(move || embed_missing(records)).await??;
    } else if missing > 0 {
        eprintln!(
            "{}",
            THEME.warning_with_icon(&format!(
                "{missing} records have no embedding and will be skipped by builds (use --embed)"
            ))
        );
    }

    let store = FileStore::new(&settings.storage.data_dir);
    let imported = store.import_records(tenant, &records).await?;
    println!(
        "{}",
        THEME.success_with_icon(&format!("Imported {imported} records into '{tenant}'"))
    );
    Ok(())
}

fn embed_missing(mut records: Vec<StoredRecord>) -> anyhow::Result<Vec<StoredRecord>> {
    let generator = FastEmbedGenerator::new_with_progress()?;
    let pending: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.embedding.is_empty())
        .map(|(i, _)| i)
        .collect();

    for chunk in pending.chunks(EMBED_CHUNK) {
        let texts: Vec<&str> = chunk.iter().map(|&i| records[i].text.as_str()).collect();
        let embeddings = generator.generate_embeddings(&texts)?;
        for (&i, embedding) in chunk.iter().zip(embeddings) {
            records[i].embedding = embedding;
        }
    }
    Ok(records)
}
