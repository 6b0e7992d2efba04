//! Runtime tunables for rdtk-im
//!
//! Each tunable resolves Database → ENV → TOML → compiled default. Values
//! outside their valid range are ignored with a warning and the next tier
//! is consulted.

use crate::migration::{DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE};
use crate::store::DEFAULT_MAX_LOCK_WAIT_MS;
use rdtk_common::config::TomlConfig;
use rdtk_common::db::get_setting;
use rdtk_common::Result;
use sqlx::SqlitePool;
use std::fmt::Display;
use std::str::FromStr;
use tracing::{info, warn};

pub const BATCH_SIZE_SETTING: &str = "im_migration_batch_size";
pub const MAX_LOCK_WAIT_SETTING: &str = "im_database_max_lock_wait_ms";

pub const BATCH_SIZE_ENV: &str = "RDTK_IM_MIGRATION_BATCH_SIZE";
pub const MAX_LOCK_WAIT_ENV: &str = "RDTK_IM_MAX_LOCK_WAIT_MS";

/// Longest accepted lock wait
const MAX_LOCK_WAIT_LIMIT_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImSettings {
    pub migration_batch_size: u32,
    pub max_lock_wait_ms: u64,
}

impl Default for ImSettings {
    fn default() -> Self {
        Self {
            migration_batch_size: DEFAULT_BATCH_SIZE,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }
}

impl ImSettings {
    /// Resolve every tunable from its configured sources
    pub async fn resolve(db: &SqlitePool, toml_config: &TomlConfig) -> Result<Self> {
        let migration_batch_size = resolve_tunable(
            db,
            BATCH_SIZE_SETTING,
            BATCH_SIZE_ENV,
            toml_config.migration.batch_size,
            DEFAULT_BATCH_SIZE,
            |v| (1..=MAX_BATCH_SIZE).contains(v),
        )
        .await?;

        let max_lock_wait_ms = resolve_tunable(
            db,
            MAX_LOCK_WAIT_SETTING,
            MAX_LOCK_WAIT_ENV,
            toml_config.database.max_lock_wait_ms,
            DEFAULT_MAX_LOCK_WAIT_MS,
            |v| *v <= MAX_LOCK_WAIT_LIMIT_MS,
        )
        .await?;

        Ok(Self {
            migration_batch_size,
            max_lock_wait_ms,
        })
    }
}

async fn resolve_tunable<T>(
    db: &SqlitePool,
    key: &'static str,
    env_var: &'static str,
    toml_value: Option<T>,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> Result<T>
where
    T: FromStr + Display + Copy,
    T::Err: Display,
{
    // Tier 1: Database (authoritative). Unparseable text is skipped.
    let db_value = match get_setting::<_, T>(db, key).await {
        Ok(value) => value,
        Err(e) => {
            warn!(key, error = %e, "Ignoring unreadable database setting");
            None
        }
    };

    // Tier 2: Environment variable
    let env_value = std::env::var(env_var)
        .ok()
        .and_then(|raw| match raw.trim().parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(env_var, value = %raw, "Ignoring unparseable environment value");
                None
            }
        });

    let tiers = [
        ("database", db_value),
        ("environment", env_value),
        ("TOML", toml_value),
    ];

    for (source, value) in tiers {
        let Some(value) = value else { continue };
        if valid(&value) {
            info!(key, %value, source, "Resolved setting");
            return Ok(value);
        }
        warn!(key, %value, source, "Ignoring out-of-range setting");
    }

    Ok(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdtk_common::db::init::init_memory_database;
    use rdtk_common::db::set_setting;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn test_defaults_when_nothing_configured() {
        std::env::remove_var(BATCH_SIZE_ENV);
        std::env::remove_var(MAX_LOCK_WAIT_ENV);
        let pool = init_memory_database().await.unwrap();

        let settings = ImSettings::resolve(&pool, &TomlConfig::default())
            .await
            .unwrap();
        assert_eq!(settings, ImSettings::default());
    }

    #[tokio::test]
    #[serial]
    async fn test_database_beats_env_beats_toml() {
        let pool = init_memory_database().await.unwrap();
        let mut toml_config = TomlConfig::default();
        toml_config.migration.batch_size = Some(10);
        toml_config.database.max_lock_wait_ms = Some(700);

        std::env::set_var(BATCH_SIZE_ENV, "20");
        std::env::remove_var(MAX_LOCK_WAIT_ENV);
        set_setting(&pool, BATCH_SIZE_SETTING, 30u32).await.unwrap();

        let settings = ImSettings::resolve(&pool, &toml_config).await.unwrap();
        assert_eq!(settings.migration_batch_size, 30);
        assert_eq!(settings.max_lock_wait_ms, 700);

        std::env::remove_var(BATCH_SIZE_ENV);
    }

    #[tokio::test]
    #[serial]
    async fn test_out_of_range_falls_through() {
        let pool = init_memory_database().await.unwrap();
        let mut toml_config = TomlConfig::default();
        toml_config.migration.batch_size = Some(25);

        std::env::set_var(BATCH_SIZE_ENV, "0");
        set_setting(&pool, BATCH_SIZE_SETTING, 5000u32).await.unwrap();

        let settings = ImSettings::resolve(&pool, &toml_config).await.unwrap();
        assert_eq!(settings.migration_batch_size, 25);

        std::env::remove_var(BATCH_SIZE_ENV);
    }
}
