//! # Capsule CLI (`capsule`)
//!
//! Command-line front end for the prediction store.
//!
//! ```bash
//! capsule --config ./config/capsule.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `capsule init` | Create the local store and its schema |
//! | `capsule save <file>` | Save a record from a JSON file (`-` for stdin) |
//! | `capsule get <id>` | Print a record from the local store |
//! | `capsule list` | Load every record (remote, then hot cache, then local) |
//! | `capsule search` | Filter records by language, category, author, tags... |
//! | `capsule index global` | Print the global index |
//! | `capsule index cluster <lang> <cat>` | Print one cluster index |
//! | `capsule index rebuild` | Rebuild every index |
//! | `capsule cache hot` | Print the hot cache entry, if fresh |
//! | `capsule path <lang> <cat> <reveal-date>` | Show where a record would be stored |
//! | `capsule snapshot --out <file>` | Write the offline `hot.json` snapshot |
//!
//! Results are printed as JSON on stdout; logs go to stderr and honour
//! `RUST_LOG`, falling back to `log.level` from the config.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use capsule_store::cluster::Quarter;
use capsule_store::commands;
use capsule_store::config::{self, Config};
use capsule_store::query::SearchCriteria;
use capsule_store::{Category, Language};

/// Capsule: clustered prediction storage with a hot cache and derived
/// indices over a git content repository.
#[derive(Parser)]
#[command(name = "capsule", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/capsule.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the local store and its schema. Idempotent.
    Init,

    /// Save a record from a JSON file, or `-` for stdin.
    Save { file: PathBuf },

    /// Print a record by id (local store only).
    Get { id: String },

    /// Load every record through the tiered loader.
    List {
        /// Print at most this many records.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search records. All filters are optional and combined with AND.
    Search {
        #[arg(long)]
        language: Option<Language>,

        #[arg(long)]
        category: Option<Category>,

        /// Reveal year; only applies when both language and category are set.
        #[arg(long)]
        year: Option<i32>,

        /// Reveal quarter (Q1-Q4); only applies when both language and
        /// category are set.
        #[arg(long)]
        quarter: Option<Quarter>,

        #[arg(long)]
        author: Option<String>,

        #[arg(long)]
        revealed: Option<bool>,

        /// Match records carrying any of these tags. Repeatable.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Inspect or rebuild indices.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Inspect cache entries.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show the cluster directory and file path for a record.
    Path {
        language: Language,
        category: Category,

        /// Epoch milliseconds or YYYY-MM-DD.
        reveal_date: String,

        #[arg(long)]
        id: Option<String>,

        /// Creation time in epoch milliseconds.
        #[arg(long)]
        created: Option<i64>,
    },

    /// Write the offline hot snapshot.
    Snapshot {
        #[arg(long)]
        out: PathBuf,

        /// Read records from a directory tree of JSON files instead of the store.
        #[arg(long)]
        from_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    Global,
    Cluster {
        language: Language,
        category: Category,
    },
    Rebuild,
}

#[derive(Subcommand)]
enum CacheAction {
    Hot,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let loaded = config::load_config(&cli.config);
    init_tracing(
        loaded
            .as_ref()
            .map(|c| c.log.level.as_str())
            .unwrap_or("info"),
    );

    // Commands that work without a config file
    match &cli.command {
        Commands::Path {
            language,
            category,
            reveal_date,
            id,
            created,
        } => {
            let cfg = loaded.unwrap_or_else(|_| Config::local("./data/capsule.sqlite"));
            let reveal_date = commands::parse_timestamp_arg(reveal_date)?;
            return commands::run_path(&cfg, *language, *category, reveal_date, id.as_deref(), *created);
        }
        Commands::Snapshot {
            out,
            from_dir: Some(dir),
        } => {
            let cfg = loaded.unwrap_or_else(|_| Config::local("./data/capsule.sqlite"));
            return commands::run_snapshot(cfg, out, Some(dir.as_path())).await;
        }
        _ => {}
    }

    let cfg = loaded?;

    match cli.command {
        Commands::Init => commands::run_init(cfg).await?,
        Commands::Save { file } => commands::run_save(cfg, &file).await?,
        Commands::Get { id } => commands::run_get(cfg, &id).await?,
        Commands::List { limit } => commands::run_list(cfg, limit).await?,
        Commands::Search {
            language,
            category,
            year,
            quarter,
            author,
            revealed,
            tags,
        } => {
            let criteria = SearchCriteria {
                language,
                category,
                year,
                quarter,
                author,
                revealed,
                tags: if tags.is_empty() { None } else { Some(tags) },
            };
            commands::run_search(cfg, &criteria).await?;
        }
        Commands::Index { action } => match action {
            IndexAction::Global => commands::run_global_index(cfg).await?,
            IndexAction::Cluster { language, category } => {
                commands::run_cluster_index(cfg, language, category).await?
            }
            IndexAction::Rebuild => commands::run_rebuild_indices(cfg).await?,
        },
        Commands::Cache { action } => match action {
            CacheAction::Hot => commands::run_hot_cache(cfg).await?,
        },
        Commands::Path { .. } => unreachable!("handled before config loading"),
        Commands::Snapshot { out, from_dir } => {
            commands::run_snapshot(cfg, &out, from_dir.as_deref()).await?
        }
    }

    Ok(())
}
