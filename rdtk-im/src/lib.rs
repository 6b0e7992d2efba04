//! rdtk-im: book and author identity resolution
//!
//! Canonical-group tracking for duplicate books, the isbn catalog, the
//! author registry with alias resolution, atomic merges with an append-only
//! audit trail, duplicate-report intake and the resumable author migration.

pub mod auth;
pub mod authors;
pub mod config;
pub mod identity;
pub mod isbn;
pub mod merge;
pub mod merge_log;
pub mod migration;
pub mod reports;
pub mod store;
pub mod utils;

pub use crate::auth::{AuthContext, Operator};
pub use crate::config::ImSettings;
pub use rdtk_common::{Error, Result};

use crate::authors::AuthorRegistry;
use crate::identity::IdentityRegistry;
use crate::isbn::IsbnCatalog;
use crate::merge::MergeEngine;
use crate::merge_log::MergeLog;
use crate::migration::MigrationDriver;
use crate::reports::DuplicateReports;
use crate::store::Store;
use sqlx::SqlitePool;

/// Every component wired to one shared store
#[derive(Clone)]
pub struct ImServices {
    pub identity: IdentityRegistry,
    pub isbns: IsbnCatalog,
    pub authors: AuthorRegistry,
    pub merges: MergeEngine,
    pub merge_log: MergeLog,
    pub reports: DuplicateReports,
    pub migration: MigrationDriver,
    store: Store,
}

impl ImServices {
    pub fn new(db: SqlitePool, settings: ImSettings) -> Self {
        let store = Store::new(db.clone(), settings.max_lock_wait_ms);

        Self {
            identity: IdentityRegistry::new(store.clone()),
            isbns: IsbnCatalog::new(store.clone()),
            authors: AuthorRegistry::new(store.clone()),
            merges: MergeEngine::new(store.clone()),
            merge_log: MergeLog::new(db),
            reports: DuplicateReports::new(store.clone()),
            migration: MigrationDriver::new(store.clone(), settings.migration_batch_size),
            store,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        self.store.pool()
    }
}
