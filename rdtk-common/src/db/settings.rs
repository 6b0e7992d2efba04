//! Settings table accessors
//!
//! Key-value storage for runtime tunables and resumable job state.
//! Accessors accept any SQLite executor so they can run on the pool or
//! inside an open transaction.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqliteExecutor;

/// Read and parse a setting, `None` when the key is absent or NULL
pub async fn get_setting<'e, E, T>(db: E, key: &str) -> Result<Option<T>>
where
    E: SqliteExecutor<'e>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(db)
            .await?;

    match value.flatten() {
        Some(value) => {
            let parsed = value.trim().parse::<T>().map_err(|e| {
                Error::Config(format!("Parse setting '{}' failed: {}", key, e))
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Insert or replace a setting
pub async fn set_setting<'e, E, T>(db: E, key: &str, value: T) -> Result<()>
where
    E: SqliteExecutor<'e>,
    T: std::fmt::Display,
{
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

/// Read a JSON-encoded setting
pub async fn get_json_setting<'e, E, T>(db: E, key: &str) -> Result<Option<T>>
where
    E: SqliteExecutor<'e>,
    T: DeserializeOwned,
{
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(db)
            .await?;

    match value.flatten() {
        Some(json) => serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| Error::Config(format!("Decode setting '{}' failed: {}", key, e))),
        None => Ok(None),
    }
}

/// Store a value as JSON under `key`
pub async fn set_json_setting<'e, E, T>(db: E, key: &str, value: &T) -> Result<()>
where
    E: SqliteExecutor<'e>,
    T: Serialize,
{
    let json = serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Encode setting '{}' failed: {}", key, e)))?;
    set_setting(db, key, json).await
}

/// Remove a setting; absent keys are not an error
pub async fn delete_setting<'e, E>(db: E, key: &str) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query("DELETE FROM settings WHERE key = ?")
        .bind(key)
        .execute(db)
        .await?;
    Ok(())
}
