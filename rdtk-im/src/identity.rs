//! Identity Registry
//!
//! Tracks which book records belong to the same real-world work. Each group
//! has exactly one canonical member; all reads resolve to it.
//!
//! A book without an entry is its own canonical singleton whose group id is
//! its own book id. Entries are persisted on registration or merge.

use crate::auth::{require_admin, AuthContext};
use crate::store::Store;
use rdtk_common::db::{book_exists, BookId};
use rdtk_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

/// Group identifier shared by every record of one work
pub type GroupId = i64;

/// Canonical-group membership of one book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct IdentityEntry {
    pub book_id: BookId,
    pub group_id: GroupId,
    pub is_canonical: bool,
}

impl IdentityEntry {
    /// Entry implied for a book that has never been registered
    pub fn singleton(book_id: BookId) -> Self {
        Self {
            book_id,
            group_id: book_id,
            is_canonical: true,
        }
    }
}

#[derive(Clone)]
pub struct IdentityRegistry {
    store: Store,
}

impl IdentityRegistry {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Resolve a book to the canonical survivor of its group
    ///
    /// `NotFound` only when the book does not exist at all. Read-only: a book
    /// with no identity entry resolves to itself and nothing is persisted.
    pub async fn get_canonical(&self, book_id: BookId) -> Result<BookId> {
        let mut conn = self.store.pool().acquire().await?;
        let canonical = canonical_of(&mut conn, book_id).await?;
        tracing::debug!(book_id, canonical, "Resolved canonical book");
        Ok(canonical)
    }

    /// True when the book currently heads its group
    pub async fn is_canonical(&self, book_id: BookId) -> Result<bool> {
        Ok(self.get_canonical(book_id).await? == book_id)
    }

    /// Persisted or implied identity entry of a book
    pub async fn get_entry(&self, book_id: BookId) -> Result<IdentityEntry> {
        let mut conn = self.store.pool().acquire().await?;
        require_book(&mut conn, book_id).await?;
        Ok(load_entry(&mut conn, book_id)
            .await?
            .unwrap_or_else(|| IdentityEntry::singleton(book_id)))
    }

    /// Persist the identity entry of a book (idempotent)
    ///
    /// A book without an entry is registered as the canonical head of its
    /// own group; an existing entry is returned unchanged.
    pub async fn register_canonical(
        &self,
        auth: &dyn AuthContext,
        book_id: BookId,
    ) -> Result<IdentityEntry> {
        require_admin(auth, "register canonical books")?;

        self.store
            .write("identity::register_canonical", |conn| {
                Box::pin(ensure_entry(conn, book_id))
            })
            .await
    }

    /// All book ids of the book's group, canonical first then ascending id
    pub async fn group_members(&self, book_id: BookId) -> Result<Vec<BookId>> {
        let mut conn = self.store.pool().acquire().await?;
        require_book(&mut conn, book_id).await?;

        let entry = match load_entry(&mut conn, book_id).await? {
            Some(entry) => entry,
            None => return Ok(vec![book_id]),
        };

        let members: Vec<BookId> = sqlx::query_scalar(
            r#"
            SELECT book_id FROM book_identity
            WHERE group_id = ?
            ORDER BY is_canonical DESC, book_id ASC
            "#,
        )
        .bind(entry.group_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(members)
    }
}

/// `NotFound` unless the Content Store has the book
pub(crate) async fn require_book(conn: &mut SqliteConnection, book_id: BookId) -> Result<()> {
    if book_exists(&mut *conn, book_id).await? {
        Ok(())
    } else {
        Err(Error::NotFound(format!("book {}", book_id)))
    }
}

pub(crate) async fn load_entry(
    conn: &mut SqliteConnection,
    book_id: BookId,
) -> Result<Option<IdentityEntry>> {
    let entry = sqlx::query_as::<_, IdentityEntry>(
        "SELECT book_id, group_id, is_canonical FROM book_identity WHERE book_id = ?",
    )
    .bind(book_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(entry)
}

/// Load the entry, creating a canonical singleton when absent
pub(crate) async fn ensure_entry(
    conn: &mut SqliteConnection,
    book_id: BookId,
) -> Result<IdentityEntry> {
    require_book(conn, book_id).await?;

    if let Some(entry) = load_entry(conn, book_id).await? {
        return Ok(entry);
    }

    let entry = IdentityEntry::singleton(book_id);
    sqlx::query(
        r#"
        INSERT INTO book_identity (book_id, group_id, is_canonical, created_at, updated_at)
        VALUES (?, ?, 1, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        "#,
    )
    .bind(entry.book_id)
    .bind(entry.group_id)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(book_id, "Registered canonical identity entry");
    Ok(entry)
}

/// Canonical survivor of the book's group
pub(crate) async fn canonical_of(conn: &mut SqliteConnection, book_id: BookId) -> Result<BookId> {
    require_book(conn, book_id).await?;

    let entry = match load_entry(conn, book_id).await? {
        Some(entry) => entry,
        None => return Ok(book_id),
    };

    if entry.is_canonical {
        return Ok(book_id);
    }

    let canonical: Option<BookId> = sqlx::query_scalar(
        "SELECT book_id FROM book_identity WHERE group_id = ? AND is_canonical = 1",
    )
    .bind(entry.group_id)
    .fetch_optional(&mut *conn)
    .await?;

    canonical.ok_or_else(|| {
        Error::Internal(format!(
            "identity group {} of book {} has no canonical member",
            entry.group_id, book_id
        ))
    })
}

/// Fold `from`'s whole group into `to`'s group, leaving `to` canonical
///
/// Both books must be canonical heads; the caller checks this inside the
/// same transaction. Members previously absorbed by `from` are carried
/// along so every member points directly at the surviving group.
pub(crate) async fn join_group(
    conn: &mut SqliteConnection,
    from: BookId,
    to: BookId,
) -> Result<IdentityEntry> {
    let target = ensure_entry(conn, to).await?;
    let source = ensure_entry(conn, from).await?;

    sqlx::query(
        "UPDATE book_identity SET is_canonical = 0, updated_at = CURRENT_TIMESTAMP WHERE book_id = ?",
    )
    .bind(from)
    .execute(&mut *conn)
    .await?;

    let moved = sqlx::query(
        "UPDATE book_identity SET group_id = ?, updated_at = CURRENT_TIMESTAMP WHERE group_id = ?",
    )
    .bind(target.group_id)
    .bind(source.group_id)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(
        from,
        to,
        group_id = target.group_id,
        members_moved = moved.rows_affected(),
        "Joined identity groups"
    );

    Ok(IdentityEntry {
        book_id: from,
        group_id: target.group_id,
        is_canonical: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Operator;
    use crate::store::DEFAULT_MAX_LOCK_WAIT_MS;
    use rdtk_common::db::init::init_memory_database;
    use rdtk_common::db::{create_book, NewBook};

    async fn setup() -> IdentityRegistry {
        let pool = init_memory_database().await.unwrap();
        IdentityRegistry::new(Store::new(pool, DEFAULT_MAX_LOCK_WAIT_MS))
    }

    #[tokio::test]
    async fn test_unregistered_book_is_own_canonical() {
        let registry = setup().await;
        let id = create_book(registry.store.pool(), &NewBook::new("Solo"))
            .await
            .unwrap();

        assert_eq!(registry.get_canonical(id).await.unwrap(), id);
        assert_eq!(registry.get_entry(id).await.unwrap(), IdentityEntry::singleton(id));
        assert_eq!(registry.group_members(id).await.unwrap(), vec![id]);

        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM book_identity")
            .fetch_one(registry.store.pool())
            .await
            .unwrap();
        assert_eq!(stored, 0);
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = setup().await;
        let admin = Operator::admin(1);
        let id = create_book(registry.store.pool(), &NewBook::new("Twice"))
            .await
            .unwrap();

        let first = registry.register_canonical(&admin, id).await.unwrap();
        let second = registry.register_canonical(&admin, id).await.unwrap();
        assert_eq!(first, second);
        assert!(first.is_canonical);
    }

    #[tokio::test]
    async fn test_unknown_book_not_found() {
        let registry = setup().await;
        assert!(registry.get_canonical(77).await.unwrap_err().is_not_found());
        assert!(registry
            .register_canonical(&Operator::admin(1), 77)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_register_requires_admin() {
        let registry = setup().await;
        let id = create_book(registry.store.pool(), &NewBook::new("Guarded"))
            .await
            .unwrap();

        let err = registry
            .register_canonical(&Operator::member(5), id)
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
    }
}
