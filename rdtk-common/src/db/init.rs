//! Database initialization
//!
//! Creates the database on first run, applies the current schema and then
//! runs versioned migrations. Every step is idempotent.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Default SQLite busy timeout before a statement reports "database is locked"
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 250;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        // WAL allows concurrent readers alongside the single writer
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the full schema
///
/// Limited to one connection: every pooled connection to `sqlite::memory:`
/// would otherwise see its own empty database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables, indexes and triggers, then run migrations
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;

    // Content Store (externally owned rows, shared database)
    create_books_table(pool).await?;

    // Identity tables
    create_book_identity_table(pool).await?;
    create_book_isbns_table(pool).await?;
    create_authors_table(pool).await?;
    create_author_aliases_table(pool).await?;
    create_book_authors_table(pool).await?;

    // Audit trail
    create_merge_log_tables(pool).await?;

    create_duplicate_reports_table(pool).await?;

    crate::db::migrations::run_migrations(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores key-value pairs, including the author migration cursor.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_books_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS books (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL DEFAULT '',
            author TEXT,
            page_count INTEGER,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'publish',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_book_identity_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS book_identity (
            book_id INTEGER PRIMARY KEY REFERENCES books(id) ON DELETE CASCADE,
            group_id INTEGER NOT NULL,
            is_canonical INTEGER NOT NULL DEFAULT 1 CHECK (is_canonical IN (0, 1)),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Exactly one canonical member per group
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_book_identity_one_canonical
        ON book_identity(group_id) WHERE is_canonical = 1
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_book_identity_group ON book_identity(group_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_book_isbns_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS book_isbns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            isbn TEXT NOT NULL,
            book_id INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
            is_primary INTEGER NOT NULL DEFAULT 0 CHECK (is_primary IN (0, 1)),
            edition TEXT,
            year INTEGER,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(isbn, book_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one primary isbn per book
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_book_isbns_one_primary
        ON book_isbns(book_id) WHERE is_primary = 1
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_book_isbns_isbn ON book_isbns(isbn)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_authors_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS authors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            canonical_name TEXT NOT NULL UNIQUE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_author_aliases_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS author_aliases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id INTEGER NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
            alias_name TEXT NOT NULL UNIQUE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_author_aliases_author ON author_aliases(author_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_book_authors_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS book_authors (
            book_id INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
            author_id INTEGER NOT NULL REFERENCES authors(id),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (book_id, author_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_book_authors_author ON book_authors(author_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create append-only merge logs
///
/// No foreign keys: records must outlive the entities they describe.
async fn create_merge_log_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS book_merge_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_id INTEGER NOT NULL,
            to_id INTEGER NOT NULL,
            reason TEXT NOT NULL DEFAULT '',
            operator INTEGER NOT NULL,
            sync_metadata INTEGER NOT NULL DEFAULT 0,
            merged_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS author_merge_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_id INTEGER NOT NULL,
            to_id INTEGER NOT NULL,
            from_name TEXT NOT NULL,
            reason TEXT NOT NULL DEFAULT '',
            operator INTEGER NOT NULL,
            merged_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    for table in ["book_merge_log", "author_merge_log"] {
        for (event, verb) in [("UPDATE", "amended"), ("DELETE", "deleted")] {
            let sql = format!(
                r#"
                CREATE TRIGGER IF NOT EXISTS {table}_no_{event_lc}
                BEFORE {event} ON {table}
                BEGIN
                    SELECT RAISE(ABORT, 'merge records cannot be {verb}');
                END
                "#,
                table = table,
                event = event,
                event_lc = event.to_lowercase(),
                verb = verb,
            );
            sqlx::query(&sql).execute(pool).await?;
        }
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_book_merge_log_from ON book_merge_log(from_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_book_merge_log_to ON book_merge_log(to_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_duplicate_reports_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS duplicate_reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            book_id INTEGER NOT NULL,
            reporter_id INTEGER NOT NULL,
            reason TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'pending',
            reported_at TEXT NOT NULL,
            resolved_at TEXT,
            resolved_by INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_duplicate_reports_status ON duplicate_reports(status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
