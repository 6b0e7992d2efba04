//! Shared store handle injected into every component
//!
//! All mutations go through [`Store::write`]: one transaction per call,
//! serialized in-process by the write gate and retried from scratch on
//! SQLite lock contention with other processes. A retried attempt re-reads
//! every precondition, so two operators racing on the same ids cannot both
//! succeed.

use crate::utils::{begin_monitored, LockRetry};
use futures::future::BoxFuture;
use rdtk_common::Result;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default upper bound for lock-contention retries
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

#[derive(Clone)]
pub struct Store {
    db: SqlitePool,
    write_gate: Arc<Mutex<()>>,
    max_lock_wait_ms: u64,
}

impl Store {
    pub fn new(db: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            write_gate: Arc::new(Mutex::new(())),
            max_lock_wait_ms,
        }
    }

    /// Pool for read-only queries
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    pub fn max_lock_wait_ms(&self) -> u64 {
        self.max_lock_wait_ms
    }

    /// Run `work` inside one all-or-nothing transaction
    ///
    /// Any error from `work` rolls back every write it made. `work` may be
    /// invoked more than once when the database is locked, so it must not
    /// carry state between attempts.
    pub async fn write<T, F>(&self, operation: &'static str, mut work: F) -> Result<T>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>>,
    {
        let _gate = self.write_gate.lock().await;
        let mut retry = LockRetry::new(operation, self.max_lock_wait_ms);

        loop {
            match self.attempt(operation, &mut work).await {
                Ok(value) => {
                    retry.log_success();
                    return Ok(value);
                }
                Err(err) => retry.on_error(err).await?,
            }
        }
    }

    async fn attempt<T, F>(&self, operation: &'static str, work: &mut F) -> Result<T>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>>,
    {
        let mut tx = begin_monitored(&self.db, operation).await?;

        let result = work(tx.conn()?).await;
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(operation, error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdtk_common::db::init::init_memory_database;
    use rdtk_common::Error;

    #[tokio::test]
    async fn test_failed_work_rolls_back() {
        let pool = init_memory_database().await.unwrap();
        let store = Store::new(pool, DEFAULT_MAX_LOCK_WAIT_MS);

        let result: Result<()> = store
            .write("test_rollback", |conn| {
                Box::pin(async move {
                    sqlx::query("INSERT INTO books (title) VALUES ('ghost')")
                        .execute(&mut *conn)
                        .await?;
                    Err::<(), Error>(Error::Conflict("abort".to_string()))
                })
            })
            .await;
        assert!(result.unwrap_err().is_conflict());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_successful_work_commits() {
        let pool = init_memory_database().await.unwrap();
        let store = Store::new(pool, DEFAULT_MAX_LOCK_WAIT_MS);

        let id = store
            .write("test_commit", |conn| {
                Box::pin(async move {
                    let result = sqlx::query("INSERT INTO books (title) VALUES ('kept')")
                        .execute(&mut *conn)
                        .await?;
                    Ok::<_, Error>(result.last_insert_rowid())
                })
            })
            .await
            .unwrap();

        let title: String = sqlx::query_scalar("SELECT title FROM books WHERE id = ?")
            .bind(id)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(title, "kept");
    }
}
