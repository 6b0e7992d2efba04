//! Batch Migration Driver
//!
//! Normalizes the legacy free-text author field of each book into an author
//! entity plus a book-author link. Work proceeds in client-driven batches:
//! each call scans the next N books in id order, commits its links and the
//! advanced cursor in one transaction, and returns. Interrupting between
//! calls never leaves a batch half-applied.
//!
//! The cursor advances by books scanned, so a batch where every book is
//! skipped still makes progress. Books already linked to an author are
//! skipped, which makes a re-run over the same range harmless.

use crate::auth::{require_admin, AuthContext};
use crate::authors::{link_book_tx, resolve_or_create_tx};
use crate::store::Store;
use rdtk_common::db::{delete_setting, get_json_setting, set_json_setting, BookId};
use rdtk_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

/// Settings key holding the serialized [`MigrationCursor`]
pub const CURSOR_KEY: &str = "im_author_migration_cursor";

/// Default books scanned per batch
pub const DEFAULT_BATCH_SIZE: u32 = 50;

/// Largest accepted batch size
pub const MAX_BATCH_SIZE: u32 = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    #[default]
    Idle,
    Running,
    Complete,
}

/// Process-wide resumable progress
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationCursor {
    /// Books scanned so far, in id order
    pub offset: u64,
    /// Books that received an author link
    pub processed: u64,
    pub created_authors: u64,
    pub created_links: u64,
    #[serde(default)]
    pub state: MigrationState,
}

/// Result of one batch call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub scanned: u64,
    pub linked: u64,
    pub skipped: u64,
    pub created_authors: u64,
    pub cursor: MigrationCursor,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.cursor.state == MigrationState::Complete
    }
}

#[derive(FromRow)]
struct LegacyBook {
    id: BookId,
    author: Option<String>,
    status: String,
}

#[derive(Clone)]
pub struct MigrationDriver {
    store: Store,
    batch_size: u32,
}

impl MigrationDriver {
    pub fn new(store: Store, batch_size: u32) -> Self {
        Self {
            store,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Current cursor; `Idle` with zero counters before the first batch
    pub async fn status(&self) -> Result<MigrationCursor> {
        Ok(get_json_setting(self.store.pool(), CURSOR_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Process the next batch and persist the advanced cursor
    ///
    /// Running again after `Complete` picks up books created since.
    pub async fn run_batch(&self, auth: &dyn AuthContext) -> Result<BatchReport> {
        require_admin(auth, "run the author migration")?;
        let batch_size = self.batch_size;

        let report = self
            .store
            .write("migration::run_batch", |conn| {
                Box::pin(run_batch_tx(conn, batch_size))
            })
            .await?;

        tracing::info!(
            offset = report.cursor.offset,
            scanned = report.scanned,
            linked = report.linked,
            skipped = report.skipped,
            created_authors = report.created_authors,
            state = ?report.cursor.state,
            "Author migration batch committed"
        );
        Ok(report)
    }

    /// Run batches until the cursor reaches the end of the book table
    pub async fn run_to_completion(&self, auth: &dyn AuthContext) -> Result<MigrationCursor> {
        loop {
            let report = self.run_batch(auth).await?;
            if report.is_complete() {
                return Ok(report.cursor);
            }
        }
    }

    /// Forget all progress; the next batch starts from the first book
    ///
    /// Authors and links already created are kept.
    pub async fn reset(&self, auth: &dyn AuthContext) -> Result<()> {
        require_admin(auth, "reset the author migration")?;
        self.store
            .write("migration::reset", |conn| {
                Box::pin(async move { delete_setting(&mut *conn, CURSOR_KEY).await })
            })
            .await?;
        tracing::info!("Author migration cursor reset");
        Ok(())
    }
}

async fn run_batch_tx(conn: &mut SqliteConnection, batch_size: u32) -> Result<BatchReport> {
    let mut cursor: MigrationCursor = get_json_setting(&mut *conn, CURSOR_KEY)
        .await?
        .unwrap_or_default();

    let books = sqlx::query_as::<_, LegacyBook>(
        "SELECT id, author, status FROM books ORDER BY id ASC LIMIT ? OFFSET ?",
    )
    .bind(i64::from(batch_size))
    .bind(cursor.offset as i64)
    .fetch_all(&mut *conn)
    .await?;

    let mut report = BatchReport {
        scanned: books.len() as u64,
        ..Default::default()
    };

    for book in books {
        let name = match book.author.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() && book.status != "trash" => name.to_string(),
            _ => {
                report.skipped += 1;
                continue;
            }
        };

        let linked: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM book_authors WHERE book_id = ?)")
                .bind(book.id)
                .fetch_one(&mut *conn)
                .await?;
        if linked {
            report.skipped += 1;
            continue;
        }

        let resolution = resolve_or_create_tx(conn, &name).await?;
        if resolution.created {
            report.created_authors += 1;
        }
        if link_book_tx(conn, book.id, resolution.author.id).await? {
            report.linked += 1;
        }
        tracing::debug!(book_id = book.id, author_id = resolution.author.id, "Linked legacy author");
    }

    cursor.offset += report.scanned;
    cursor.processed += report.linked;
    cursor.created_authors += report.created_authors;
    cursor.created_links += report.linked;
    cursor.state = if report.scanned < u64::from(batch_size) {
        MigrationState::Complete
    } else {
        MigrationState::Running
    };

    set_json_setting(&mut *conn, CURSOR_KEY, &cursor).await?;

    report.cursor = cursor;
    Ok(report)
}
