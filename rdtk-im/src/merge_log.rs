//! Append-only merge audit trail
//!
//! The only record of an entity's identity after it has been merged away.
//! Rows are written inside the merge transaction and the schema rejects any
//! later UPDATE or DELETE.

use crate::auth::OperatorId;
use crate::authors::AuthorId;
use rdtk_common::db::BookId;
use rdtk_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct BookMergeRecord {
    pub id: i64,
    pub from_id: BookId,
    pub to_id: BookId,
    pub reason: String,
    pub operator: OperatorId,
    pub sync_metadata: bool,
    /// RFC 3339 UTC
    pub merged_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AuthorMergeRecord {
    pub id: i64,
    pub from_id: AuthorId,
    pub to_id: AuthorId,
    /// Canonical name of the deleted author
    pub from_name: String,
    pub reason: String,
    pub operator: OperatorId,
    pub merged_at: String,
}

pub(crate) async fn append_book_merge(
    conn: &mut SqliteConnection,
    from_id: BookId,
    to_id: BookId,
    reason: &str,
    operator: OperatorId,
    sync_metadata: bool,
) -> Result<BookMergeRecord> {
    let merged_at = chrono::Utc::now().to_rfc3339();

    let result = sqlx::query(
        r#"
        INSERT INTO book_merge_log (from_id, to_id, reason, operator, sync_metadata, merged_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(from_id)
    .bind(to_id)
    .bind(reason)
    .bind(operator)
    .bind(sync_metadata)
    .bind(&merged_at)
    .execute(&mut *conn)
    .await?;

    Ok(BookMergeRecord {
        id: result.last_insert_rowid(),
        from_id,
        to_id,
        reason: reason.to_string(),
        operator,
        sync_metadata,
        merged_at,
    })
}

pub(crate) async fn append_author_merge(
    conn: &mut SqliteConnection,
    from_id: AuthorId,
    to_id: AuthorId,
    from_name: &str,
    reason: &str,
    operator: OperatorId,
) -> Result<AuthorMergeRecord> {
    let merged_at = chrono::Utc::now().to_rfc3339();

    let result = sqlx::query(
        r#"
        INSERT INTO author_merge_log (from_id, to_id, from_name, reason, operator, merged_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(from_id)
    .bind(to_id)
    .bind(from_name)
    .bind(reason)
    .bind(operator)
    .bind(&merged_at)
    .execute(&mut *conn)
    .await?;

    Ok(AuthorMergeRecord {
        id: result.last_insert_rowid(),
        from_id,
        to_id,
        from_name: from_name.to_string(),
        reason: reason.to_string(),
        operator,
        merged_at,
    })
}

/// Read side of the audit trail
#[derive(Clone)]
pub struct MergeLog {
    db: SqlitePool,
}

impl MergeLog {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Every record where the book was source or target, oldest first
    pub async fn book_merge_history(&self, book_id: BookId) -> Result<Vec<BookMergeRecord>> {
        let records = sqlx::query_as::<_, BookMergeRecord>(
            r#"
            SELECT id, from_id, to_id, reason, operator, sync_metadata, merged_at
            FROM book_merge_log
            WHERE from_id = ? OR to_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(book_id)
        .bind(book_id)
        .fetch_all(&self.db)
        .await?;
        Ok(records)
    }

    /// Book ids folded into this book, directly or through earlier merges
    pub async fn prior_identities(&self, book_id: BookId) -> Result<Vec<BookId>> {
        let ids: Vec<BookId> = sqlx::query_scalar(
            r#"
            WITH RECURSIVE absorbed(id) AS (
                SELECT from_id FROM book_merge_log WHERE to_id = ?
                UNION
                SELECT l.from_id FROM book_merge_log l JOIN absorbed a ON l.to_id = a.id
            )
            SELECT id FROM absorbed WHERE id != ? ORDER BY id ASC
            "#,
        )
        .bind(book_id)
        .bind(book_id)
        .fetch_all(&self.db)
        .await?;
        Ok(ids)
    }

    /// Number of records for an exact (from, to) pair
    pub async fn book_merge_count(&self, from_id: BookId, to_id: BookId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM book_merge_log WHERE from_id = ? AND to_id = ?",
        )
        .bind(from_id)
        .bind(to_id)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    pub async fn author_merge_history(
        &self,
        author_id: AuthorId,
    ) -> Result<Vec<AuthorMergeRecord>> {
        let records = sqlx::query_as::<_, AuthorMergeRecord>(
            r#"
            SELECT id, from_id, to_id, from_name, reason, operator, merged_at
            FROM author_merge_log
            WHERE from_id = ? OR to_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(author_id)
        .bind(author_id)
        .fetch_all(&self.db)
        .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdtk_common::db::init::init_memory_database;

    #[tokio::test]
    async fn test_prior_identities_follows_chain() {
        let pool = init_memory_database().await.unwrap();
        {
            let mut conn = pool.acquire().await.unwrap();
            append_book_merge(&mut conn, 1, 2, "dup", 9, false).await.unwrap();
            append_book_merge(&mut conn, 2, 3, "dup", 9, false).await.unwrap();
            append_book_merge(&mut conn, 4, 3, "dup", 9, true).await.unwrap();
        }

        let log = MergeLog::new(pool);
        assert_eq!(log.prior_identities(3).await.unwrap(), vec![1, 2, 4]);
        assert_eq!(log.prior_identities(2).await.unwrap(), vec![1]);
        assert!(log.prior_identities(1).await.unwrap().is_empty());

        let history = log.book_merge_history(2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!((history[0].from_id, history[0].to_id), (1, 2));
        assert_eq!(log.book_merge_count(4, 3).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_records_cannot_be_amended() {
        let pool = init_memory_database().await.unwrap();
        {
            let mut conn = pool.acquire().await.unwrap();
            append_author_merge(&mut conn, 5, 6, "Jon Smith", "typo", 1)
                .await
                .unwrap();
        }

        let amended = sqlx::query("UPDATE author_merge_log SET reason = 'edited'")
            .execute(&pool)
            .await;
        assert!(amended.is_err());

        let deleted = sqlx::query("DELETE FROM author_merge_log").execute(&pool).await;
        assert!(deleted.is_err());

        let history = MergeLog::new(pool).author_merge_history(6).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_name, "Jon Smith");
    }
}
