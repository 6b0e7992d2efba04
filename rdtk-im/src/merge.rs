//! Merge Engine
//!
//! Folds a duplicate book into its canonical survivor. A single merge is all
//! or nothing: isbn re-pointing, the optional metadata sync, the identity
//! update and the audit record commit together or not at all.
//!
//! Both ends of a merge must be current canonical heads. Callers always
//! target the head of a group, so reads never walk merge chains.

use crate::auth::{require_admin, AuthContext};
use crate::identity::{canonical_of, join_group, require_book};
use crate::isbn::repoint_isbns;
use crate::merge_log::{append_book_merge, BookMergeRecord};
use crate::store::Store;
use rdtk_common::db::{get_book_record, set_field, BookField, BookId};
use rdtk_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

/// Per-source failure of a bulk merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkMergeError {
    pub source_id: BookId,
    pub code: String,
    pub message: String,
}

/// Outcome of [`MergeEngine::bulk_merge`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkMergeReport {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<BulkMergeError>,
    pub records: Vec<BookMergeRecord>,
}

#[derive(Clone)]
pub struct MergeEngine {
    store: Store,
}

impl MergeEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Merge book `from_id` into book `to_id`
    ///
    /// # Errors
    /// - `Conflict` for a self-merge or when either book is not canonical
    /// - `NotFound` when either book does not exist
    /// - `PermissionDenied` for non-administrators
    pub async fn merge_books(
        &self,
        auth: &dyn AuthContext,
        from_id: BookId,
        to_id: BookId,
        sync_metadata: bool,
        reason: &str,
    ) -> Result<BookMergeRecord> {
        require_admin(auth, "merge books")?;
        if from_id == to_id {
            return Err(Error::Conflict(format!(
                "cannot merge book {} into itself",
                from_id
            )));
        }

        let operator = auth.operator_id();
        let reason = reason.trim().to_string();

        let record = self
            .store
            .write("merge::merge_books", |conn| {
                let reason = reason.clone();
                Box::pin(async move {
                    merge_books_tx(conn, from_id, to_id, sync_metadata, &reason, operator).await
                })
            })
            .await?;

        tracing::info!(
            from_id,
            to_id,
            operator,
            sync_metadata,
            reason = %record.reason,
            "Books merged"
        );
        Ok(record)
    }

    /// Merge every source into `target_id`, isolating failures per source
    ///
    /// The target is silently removed from `source_ids`. Each source is an
    /// independent transaction; a failing source does not affect the others.
    pub async fn bulk_merge(
        &self,
        auth: &dyn AuthContext,
        target_id: BookId,
        source_ids: &[BookId],
        sync_metadata: bool,
        reason: &str,
    ) -> Result<BulkMergeReport> {
        require_admin(auth, "merge books")?;

        let mut report = BulkMergeReport::default();
        for &source_id in source_ids.iter().filter(|&&id| id != target_id) {
            match self
                .merge_books(auth, source_id, target_id, sync_metadata, reason)
                .await
            {
                Ok(record) => {
                    report.succeeded += 1;
                    report.records.push(record);
                }
                Err(err) => {
                    tracing::warn!(
                        source_id,
                        target_id,
                        error = %err,
                        "Bulk merge item failed"
                    );
                    report.failed += 1;
                    report.errors.push(BulkMergeError {
                        source_id,
                        code: err.code().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            target_id,
            succeeded = report.succeeded,
            failed = report.failed,
            "Bulk merge finished"
        );
        Ok(report)
    }
}

async fn merge_books_tx(
    conn: &mut SqliteConnection,
    from_id: BookId,
    to_id: BookId,
    sync_metadata: bool,
    reason: &str,
    operator: i64,
) -> Result<BookMergeRecord> {
    require_book(conn, from_id).await?;
    require_book(conn, to_id).await?;

    let from_head = canonical_of(conn, from_id).await?;
    if from_head != from_id {
        return Err(Error::Conflict(format!(
            "book {} is not canonical (already merged into {})",
            from_id, from_head
        )));
    }
    let to_head = canonical_of(conn, to_id).await?;
    if to_head != to_id {
        return Err(Error::Conflict(format!(
            "target book {} is not canonical (merged into {})",
            to_id, to_head
        )));
    }

    let isbns = repoint_isbns(conn, from_id, to_id).await?;

    if sync_metadata {
        sync_metadata_onto(conn, to_id, from_id).await?;
    }

    join_group(conn, from_id, to_id).await?;

    let record = append_book_merge(conn, from_id, to_id, reason, operator, sync_metadata).await?;

    tracing::debug!(
        from_id,
        to_id,
        isbns_moved = isbns.moved,
        isbns_dropped = isbns.dropped,
        primary_isbn = ?isbns.primary,
        "Merge applied"
    );
    Ok(record)
}

/// Copy the survivor's title, author and page count onto the retired record
async fn sync_metadata_onto(
    conn: &mut SqliteConnection,
    source: BookId,
    retired: BookId,
) -> Result<()> {
    let survivor = get_book_record(&mut *conn, source).await?;

    let fields = [
        BookField::Title(survivor.title),
        BookField::Author(survivor.author),
        BookField::PageCount(survivor.page_count),
    ];
    for field in &fields {
        set_field(&mut *conn, retired, field).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Operator;
    use crate::store::DEFAULT_MAX_LOCK_WAIT_MS;
    use rdtk_common::db::init::init_memory_database;
    use rdtk_common::db::{create_book, NewBook};

    async fn setup() -> MergeEngine {
        let pool = init_memory_database().await.unwrap();
        MergeEngine::new(Store::new(pool, DEFAULT_MAX_LOCK_WAIT_MS))
    }

    #[tokio::test]
    async fn test_member_cannot_merge() {
        let engine = setup().await;
        let a = create_book(engine.store.pool(), &NewBook::new("A")).await.unwrap();
        let b = create_book(engine.store.pool(), &NewBook::new("B")).await.unwrap();

        let err = engine
            .merge_books(&Operator::member(3), a, b, false, "dup")
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());

        let err = engine
            .bulk_merge(&Operator::member(3), b, &[a], false, "dup")
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn test_unknown_target_not_found() {
        let engine = setup().await;
        let a = create_book(engine.store.pool(), &NewBook::new("A")).await.unwrap();

        let err = engine
            .merge_books(&Operator::admin(1), a, 999, false, "dup")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_bulk_merge_skips_target_in_sources() {
        let engine = setup().await;
        let admin = Operator::admin(1);
        let t = create_book(engine.store.pool(), &NewBook::new("T")).await.unwrap();
        let a = create_book(engine.store.pool(), &NewBook::new("A")).await.unwrap();

        let report = engine
            .bulk_merge(&admin, t, &[t, a, t], false, "dup")
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
        assert!(report.errors.is_empty());
    }
}
