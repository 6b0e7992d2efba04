//! Database Test Utilities

use anyhow::Result;
use rdtk_common::db::init::init_database;
use rdtk_common::db::{create_book, BookId, NewBook};
use rdtk_im::{ImServices, ImSettings, Operator};
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Tables whose contents the identity core may change
const TRACKED_TABLES: &[&str] = &[
    "books",
    "book_identity",
    "book_isbns",
    "authors",
    "author_aliases",
    "book_authors",
    "book_merge_log",
    "author_merge_log",
    "duplicate_reports",
    "settings",
];

/// Services over a temporary file-backed database
///
/// `_dir` must stay alive for the duration of the test.
pub struct TestEnv {
    pub _dir: TempDir,
    pub services: ImServices,
}

impl TestEnv {
    pub fn pool(&self) -> &SqlitePool {
        self.services.pool()
    }
}

pub async fn create_test_services() -> Result<TestEnv> {
    create_test_services_with(ImSettings::default()).await
}

pub async fn create_test_services_with(settings: ImSettings) -> Result<TestEnv> {
    let dir = TempDir::new()?;
    let pool = init_database(&dir.path().join("test_rdtk.db")).await?;
    Ok(TestEnv {
        _dir: dir,
        services: ImServices::new(pool, settings),
    })
}

pub fn admin() -> Operator {
    Operator::admin(1)
}

pub fn member() -> Operator {
    Operator::member(42)
}

/// Insert a Content Store book
pub async fn seed_book(pool: &SqlitePool, title: &str, author: Option<&str>) -> BookId {
    let mut book = NewBook::new(title);
    if let Some(author) = author {
        book = book.with_author(author);
    }
    create_book(pool, &book).await.unwrap()
}

/// Write an isbn row directly, bypassing exclusivity checks (legacy data)
pub async fn seed_isbn_row(pool: &SqlitePool, book_id: BookId, isbn: &str, primary: bool) {
    sqlx::query("INSERT INTO book_isbns (isbn, book_id, is_primary) VALUES (?, ?, ?)")
        .bind(isbn)
        .bind(book_id)
        .bind(primary)
        .execute(pool)
        .await
        .unwrap();
}

/// Full contents of every tracked table, for before/after comparisons
pub async fn table_snapshot(pool: &SqlitePool) -> Vec<(String, Vec<String>)> {
    let mut snapshot = Vec::new();
    for table in TRACKED_TABLES {
        // Rows are rendered through SQLite's quote() so any column type compares
        let columns: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info(?) ORDER BY cid")
                .bind(*table)
                .fetch_all(pool)
                .await
                .unwrap();
        let row_expr = columns
            .iter()
            .map(|c| format!("quote({})", c))
            .collect::<Vec<_>>()
            .join(" || '|' || ");
        let sql = format!("SELECT {} FROM {} ORDER BY rowid", row_expr, table);
        let rows: Vec<String> = sqlx::query_scalar(&sql).fetch_all(pool).await.unwrap();
        snapshot.push((table.to_string(), rows));
    }
    snapshot
}
