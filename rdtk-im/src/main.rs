//! rdtk-im - identity maintenance command line
//!
//! Runs identity and merge operations against the local database as the
//! local operator, printing results as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rdtk_common::config::{prepare_root_folder, resolve_root_folder, TomlConfig};
use rdtk_common::db::init::init_database;
use rdtk_im::isbn::IsbnDetails;
use rdtk_im::{ImServices, ImSettings, Operator};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for rdtk-im
#[derive(Parser, Debug)]
#[command(name = "rdtk-im")]
#[command(about = "Book and author identity maintenance")]
#[command(version)]
struct Args {
    /// Root folder holding rdtk.db
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Operator id recorded in merge records
    #[arg(long, default_value_t = 1)]
    operator: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or upgrade the database
    Init,
    /// Resolve a book to its canonical record
    Canonical { book_id: i64 },
    /// Bind an isbn to a book
    AddIsbn {
        book_id: i64,
        isbn: String,
        #[arg(long)]
        edition: Option<String>,
        #[arg(long)]
        year: Option<i64>,
        #[arg(long)]
        primary: bool,
    },
    /// Merge one book into another
    MergeBooks {
        from_id: i64,
        to_id: i64,
        /// Copy the target's title, author and page count onto the source
        #[arg(long)]
        sync_metadata: bool,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Merge several books into one target
    BulkMerge {
        target_id: i64,
        #[arg(required = true)]
        source_ids: Vec<i64>,
        #[arg(long)]
        sync_metadata: bool,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Merge one author into another
    MergeAuthors {
        from_id: i64,
        to_id: i64,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Bind an alternate name to an author
    AddAlias { author_id: i64, alias: String },
    /// Resolve a free-text author name, creating the author if needed
    ResolveAuthor { name: String },
    /// Run the legacy author migration
    Migrate {
        /// Stop after this many batches instead of running to completion
        #[arg(long)]
        batches: Option<u32>,
    },
    /// Show the migration cursor
    MigrationStatus,
    /// List pending duplicate reports
    Reports,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = TomlConfig::load_or_default(args.config.as_deref());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "Starting rdtk-im v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    let db_path = prepare_root_folder(&root_folder)
        .with_context(|| format!("Failed to prepare root folder {}", root_folder.display()))?;
    info!("Database path: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .context("Failed to open database")?;
    let settings = ImSettings::resolve(&pool, &toml_config).await?;
    let services = ImServices::new(pool, settings);
    let operator = Operator::admin(args.operator);

    match args.command {
        Command::Init => {
            print_json(&serde_json::json!({ "database": db_path }))?;
        }
        Command::Canonical { book_id } => {
            let canonical = services.identity.get_canonical(book_id).await?;
            let members = services.identity.group_members(book_id).await?;
            print_json(&serde_json::json!({
                "book_id": book_id,
                "canonical": canonical,
                "group": members,
            }))?;
        }
        Command::AddIsbn {
            book_id,
            isbn,
            edition,
            year,
            primary,
        } => {
            let details = IsbnDetails {
                edition,
                year,
                is_primary: primary,
            };
            let entry = services
                .isbns
                .add_isbn(&operator, book_id, &isbn, details)
                .await?;
            print_json(&entry)?;
        }
        Command::MergeBooks {
            from_id,
            to_id,
            sync_metadata,
            reason,
        } => {
            let record = services
                .merges
                .merge_books(&operator, from_id, to_id, sync_metadata, &reason)
                .await?;
            print_json(&record)?;
        }
        Command::BulkMerge {
            target_id,
            source_ids,
            sync_metadata,
            reason,
        } => {
            let report = services
                .merges
                .bulk_merge(&operator, target_id, &source_ids, sync_metadata, &reason)
                .await?;
            print_json(&report)?;
        }
        Command::MergeAuthors {
            from_id,
            to_id,
            reason,
        } => {
            let record = services
                .authors
                .merge_authors(&operator, from_id, to_id, &reason)
                .await?;
            print_json(&record)?;
        }
        Command::AddAlias { author_id, alias } => {
            let alias = services
                .authors
                .add_alias(&operator, author_id, &alias)
                .await?;
            print_json(&alias)?;
        }
        Command::ResolveAuthor { name } => {
            let author = services.authors.resolve_or_create(&operator, &name).await?;
            print_json(&author)?;
        }
        Command::Migrate { batches } => {
            let cursor = match batches {
                Some(limit) => {
                    let mut cursor = services.migration.status().await?;
                    for _ in 0..limit {
                        let report = services.migration.run_batch(&operator).await?;
                        cursor = report.cursor.clone();
                        if report.is_complete() {
                            break;
                        }
                    }
                    cursor
                }
                None => services.migration.run_to_completion(&operator).await?,
            };
            print_json(&cursor)?;
        }
        Command::MigrationStatus => {
            print_json(&services.migration.status().await?)?;
        }
        Command::Reports => {
            print_json(&services.reports.list_pending().await?)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
