//! ISBN Catalog
//!
//! Multimap of identifier strings to books with at most one primary isbn per
//! book. An isbn may be bound to at most one canonical book at a time.
//! Format and checksum validation are deliberately not performed.

use crate::auth::{require_admin, AuthContext};
use crate::identity::{canonical_of, require_book};
use crate::store::Store;
use rdtk_common::db::BookId;
use rdtk_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

/// One isbn binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct IsbnEntry {
    pub id: i64,
    pub isbn: String,
    pub book_id: BookId,
    pub is_primary: bool,
    pub edition: Option<String>,
    pub year: Option<i64>,
}

/// Optional attributes for [`IsbnCatalog::add_isbn`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IsbnDetails {
    pub edition: Option<String>,
    pub year: Option<i64>,
    pub is_primary: bool,
}

impl IsbnDetails {
    pub fn primary() -> Self {
        Self {
            is_primary: true,
            ..Default::default()
        }
    }
}

/// What happened to `from`'s isbns when they were folded into another book
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsbnMergeOutcome {
    /// Rows re-pointed to the target
    pub moved: u64,
    /// Source rows dropped because the target already held the same isbn
    pub dropped: u64,
    /// Target's primary isbn after the merge
    pub primary: Option<String>,
}

#[derive(Clone)]
pub struct IsbnCatalog {
    store: Store,
}

impl IsbnCatalog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Bind an isbn to a book
    ///
    /// `Conflict` when the isbn already belongs to a different book that is
    /// currently canonical, or when `book_id` itself was merged away.
    /// Re-adding an isbn the book already holds updates its details.
    pub async fn add_isbn(
        &self,
        auth: &dyn AuthContext,
        book_id: BookId,
        isbn: &str,
        details: IsbnDetails,
    ) -> Result<IsbnEntry> {
        require_admin(auth, "add isbns")?;
        let isbn = normalize_isbn(isbn)?;

        let entry = self
            .store
            .write("isbn::add_isbn", |conn| {
                let isbn = isbn.clone();
                let details = details.clone();
                Box::pin(async move { add_isbn_tx(conn, book_id, &isbn, &details).await })
            })
            .await?;

        tracing::info!(
            book_id,
            isbn = %entry.isbn,
            is_primary = entry.is_primary,
            operator = auth.operator_id(),
            "ISBN bound to book"
        );
        Ok(entry)
    }

    /// Make `isbn` the book's primary identifier, clearing any prior primary
    pub async fn set_primary(
        &self,
        auth: &dyn AuthContext,
        book_id: BookId,
        isbn: &str,
    ) -> Result<IsbnEntry> {
        require_admin(auth, "change primary isbns")?;
        let isbn = normalize_isbn(isbn)?;

        let entry = self
            .store
            .write("isbn::set_primary", |conn| {
                let isbn = isbn.clone();
                Box::pin(async move { set_primary_tx(conn, book_id, &isbn).await })
            })
            .await?;

        tracing::info!(book_id, isbn = %entry.isbn, "Primary ISBN changed");
        Ok(entry)
    }

    /// Delete every binding of `isbn`; returns the number of rows removed
    ///
    /// No cascade: a removed primary is not replaced.
    pub async fn remove_isbn(&self, auth: &dyn AuthContext, isbn: &str) -> Result<u64> {
        require_admin(auth, "remove isbns")?;
        let isbn = isbn.trim().to_string();

        let removed = self
            .store
            .write("isbn::remove_isbn", |conn| {
                let isbn = isbn.clone();
                Box::pin(async move {
                    let result = sqlx::query("DELETE FROM book_isbns WHERE isbn = ?")
                        .bind(&isbn)
                        .execute(&mut *conn)
                        .await?;
                    Ok::<_, Error>(result.rows_affected())
                })
            })
            .await?;

        tracing::info!(isbn = %isbn, removed, "ISBN removed");
        Ok(removed)
    }

    /// Isbns of a book, primary first then insertion order
    pub async fn list_for_book(&self, book_id: BookId) -> Result<Vec<IsbnEntry>> {
        let mut conn = self.store.pool().acquire().await?;
        list_for_book_tx(&mut conn, book_id).await
    }

    /// Primary isbn of a book, if one is designated
    pub async fn primary_isbn(&self, book_id: BookId) -> Result<Option<IsbnEntry>> {
        let entry = sqlx::query_as::<_, IsbnEntry>(
            r#"
            SELECT id, isbn, book_id, is_primary, edition, year
            FROM book_isbns
            WHERE book_id = ? AND is_primary = 1
            "#,
        )
        .bind(book_id)
        .fetch_optional(self.store.pool())
        .await?;
        Ok(entry)
    }

    /// Canonical book currently holding `isbn`
    pub async fn find_book_by_isbn(&self, isbn: &str) -> Result<Option<BookId>> {
        let mut conn = self.store.pool().acquire().await?;
        let holders: Vec<BookId> =
            sqlx::query_scalar("SELECT book_id FROM book_isbns WHERE isbn = ? ORDER BY id ASC")
                .bind(isbn.trim())
                .fetch_all(&mut *conn)
                .await?;

        for holder in holders {
            if canonical_of(&mut conn, holder).await? == holder {
                return Ok(Some(holder));
            }
        }
        Ok(None)
    }
}

fn normalize_isbn(isbn: &str) -> Result<String> {
    let trimmed = isbn.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("isbn must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

async fn add_isbn_tx(
    conn: &mut SqliteConnection,
    book_id: BookId,
    isbn: &str,
    details: &IsbnDetails,
) -> Result<IsbnEntry> {
    let canonical = canonical_of(conn, book_id).await?;
    if canonical != book_id {
        return Err(Error::Conflict(format!(
            "book {} was merged into {}; bind isbns to the canonical record",
            book_id, canonical
        )));
    }

    let holders: Vec<BookId> =
        sqlx::query_scalar("SELECT book_id FROM book_isbns WHERE isbn = ? AND book_id != ?")
            .bind(isbn)
            .bind(book_id)
            .fetch_all(&mut *conn)
            .await?;

    for holder in holders {
        if canonical_of(conn, holder).await? == holder {
            return Err(Error::Conflict(format!(
                "isbn {} is already bound to book {}",
                isbn, holder
            )));
        }

        // A stale binding on a merged-away record yields to the live book
        sqlx::query("DELETE FROM book_isbns WHERE isbn = ? AND book_id = ?")
            .bind(isbn)
            .bind(holder)
            .execute(&mut *conn)
            .await?;
        tracing::warn!(isbn, stale_holder = holder, "Dropped isbn from non-canonical book");
    }

    sqlx::query(
        r#"
        INSERT INTO book_isbns (isbn, book_id, is_primary, edition, year, created_at)
        VALUES (?, ?, 0, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(isbn, book_id) DO UPDATE SET
            edition = COALESCE(excluded.edition, edition),
            year = COALESCE(excluded.year, year)
        "#,
    )
    .bind(isbn)
    .bind(book_id)
    .bind(&details.edition)
    .bind(details.year)
    .execute(&mut *conn)
    .await?;

    if details.is_primary {
        return set_primary_tx(conn, book_id, isbn).await;
    }

    load_binding(conn, book_id, isbn)
        .await?
        .ok_or_else(|| Error::Internal(format!("isbn {} vanished after insert", isbn)))
}

async fn set_primary_tx(
    conn: &mut SqliteConnection,
    book_id: BookId,
    isbn: &str,
) -> Result<IsbnEntry> {
    require_book(conn, book_id).await?;

    let entry = load_binding(conn, book_id, isbn).await?.ok_or_else(|| {
        Error::NotFound(format!("isbn {} is not bound to book {}", isbn, book_id))
    })?;

    // Clear first: the partial unique index allows one primary per book
    sqlx::query("UPDATE book_isbns SET is_primary = 0 WHERE book_id = ? AND is_primary = 1")
        .bind(book_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query("UPDATE book_isbns SET is_primary = 1 WHERE id = ?")
        .bind(entry.id)
        .execute(&mut *conn)
        .await?;

    Ok(IsbnEntry {
        is_primary: true,
        ..entry
    })
}

async fn load_binding(
    conn: &mut SqliteConnection,
    book_id: BookId,
    isbn: &str,
) -> Result<Option<IsbnEntry>> {
    let entry = sqlx::query_as::<_, IsbnEntry>(
        r#"
        SELECT id, isbn, book_id, is_primary, edition, year
        FROM book_isbns
        WHERE book_id = ? AND isbn = ?
        "#,
    )
    .bind(book_id)
    .bind(isbn)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(entry)
}

pub(crate) async fn list_for_book_tx(
    conn: &mut SqliteConnection,
    book_id: BookId,
) -> Result<Vec<IsbnEntry>> {
    require_book(conn, book_id).await?;

    let entries = sqlx::query_as::<_, IsbnEntry>(
        r#"
        SELECT id, isbn, book_id, is_primary, edition, year
        FROM book_isbns
        WHERE book_id = ?
        ORDER BY is_primary DESC, id ASC
        "#,
    )
    .bind(book_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(entries)
}

/// Re-point all of `from`'s isbns to `to`
///
/// Isbns already held by `to` are dropped from `from` instead of duplicated.
/// `to` keeps its primary if it has one; otherwise the lexicographically
/// smallest isbn of the merged set becomes primary.
pub(crate) async fn repoint_isbns(
    conn: &mut SqliteConnection,
    from: BookId,
    to: BookId,
) -> Result<IsbnMergeOutcome> {
    let dropped = sqlx::query(
        r#"
        DELETE FROM book_isbns
        WHERE book_id = ?
          AND isbn IN (SELECT isbn FROM book_isbns WHERE book_id = ?)
        "#,
    )
    .bind(from)
    .bind(to)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    let target_primary: Option<String> =
        sqlx::query_scalar("SELECT isbn FROM book_isbns WHERE book_id = ? AND is_primary = 1")
            .bind(to)
            .fetch_optional(&mut *conn)
            .await?;

    sqlx::query("UPDATE book_isbns SET is_primary = 0 WHERE book_id = ?")
        .bind(from)
        .execute(&mut *conn)
        .await?;

    let moved = sqlx::query("UPDATE book_isbns SET book_id = ? WHERE book_id = ?")
        .bind(to)
        .bind(from)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    let primary = match target_primary {
        Some(isbn) => Some(isbn),
        None => {
            let smallest: Option<String> = sqlx::query_scalar(
                "SELECT isbn FROM book_isbns WHERE book_id = ? ORDER BY isbn ASC LIMIT 1",
            )
            .bind(to)
            .fetch_optional(&mut *conn)
            .await?;

            if let Some(isbn) = &smallest {
                sqlx::query("UPDATE book_isbns SET is_primary = 1 WHERE book_id = ? AND isbn = ?")
                    .bind(to)
                    .bind(isbn)
                    .execute(&mut *conn)
                    .await?;
            }
            smallest
        }
    };

    Ok(IsbnMergeOutcome {
        moved,
        dropped,
        primary,
    })
}
