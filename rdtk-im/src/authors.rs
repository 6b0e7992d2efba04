//! Author Registry & Alias Resolver
//!
//! Canonical author entities plus globally unique alternate names. Free-text
//! author strings resolve in order: exact canonical name, then alias, then a
//! newly created entity. Matching is on the trimmed literal string; case
//! variants that were never aliased are distinct authors.

use crate::auth::{require_admin, AuthContext};
use crate::identity::require_book;
use crate::merge_log::{append_author_merge, AuthorMergeRecord};
use crate::store::Store;
use rdtk_common::db::BookId;
use rdtk_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

/// Author identifier
pub type AuthorId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AuthorEntity {
    pub id: AuthorId,
    pub canonical_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AuthorAlias {
    pub id: i64,
    pub author_id: AuthorId,
    pub alias_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct BookAuthorLink {
    pub book_id: BookId,
    pub author_id: AuthorId,
}

/// Outcome of resolving a free-text name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub author: AuthorEntity,
    pub created: bool,
}

#[derive(Clone)]
pub struct AuthorRegistry {
    store: Store,
}

impl AuthorRegistry {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Resolve a free-text author name, creating an entity when nothing matches
    ///
    /// Identical literal strings always resolve to the same author.
    pub async fn resolve_or_create(
        &self,
        auth: &dyn AuthContext,
        name: &str,
    ) -> Result<AuthorEntity> {
        require_admin(auth, "create authors")?;
        let name = normalize_name(name)?;

        let resolution = self
            .store
            .write("authors::resolve_or_create", |conn| {
                let name = name.clone();
                Box::pin(async move { resolve_or_create_tx(conn, &name).await })
            })
            .await?;

        if resolution.created {
            tracing::info!(
                author_id = resolution.author.id,
                name = %resolution.author.canonical_name,
                "Created author from free-text name"
            );
        }
        Ok(resolution.author)
    }

    /// Resolve a name without creating anything
    pub async fn find_by_name(&self, name: &str) -> Result<Option<AuthorEntity>> {
        let name = normalize_name(name)?;
        let mut conn = self.store.pool().acquire().await?;
        lookup_name(&mut conn, &name).await
    }

    /// Create an author explicitly
    ///
    /// `Conflict` when the name is already a canonical name or an alias.
    pub async fn create_author(&self, auth: &dyn AuthContext, name: &str) -> Result<AuthorEntity> {
        require_admin(auth, "create authors")?;
        let name = normalize_name(name)?;

        let author = self
            .store
            .write("authors::create_author", |conn| {
                let name = name.clone();
                Box::pin(async move {
                    if let Some(existing) = lookup_name(conn, &name).await? {
                        return Err(Error::Conflict(format!(
                            "name '{}' already resolves to author {}",
                            name, existing.id
                        )));
                    }
                    insert_author(conn, &name).await
                })
            })
            .await?;

        tracing::info!(author_id = author.id, name = %author.canonical_name, "Author created");
        Ok(author)
    }

    pub async fn get_author(&self, author_id: AuthorId) -> Result<AuthorEntity> {
        let mut conn = self.store.pool().acquire().await?;
        load_author(&mut conn, author_id).await
    }

    /// Bind an alternate name to an author
    ///
    /// Idempotent for the same author; `Conflict` when the name is bound to
    /// any other author as alias or canonical name.
    pub async fn add_alias(
        &self,
        auth: &dyn AuthContext,
        author_id: AuthorId,
        alias_name: &str,
    ) -> Result<AuthorAlias> {
        require_admin(auth, "add author aliases")?;
        let alias_name = normalize_name(alias_name)?;

        let alias = self
            .store
            .write("authors::add_alias", |conn| {
                let alias_name = alias_name.clone();
                Box::pin(async move { add_alias_tx(conn, author_id, &alias_name).await })
            })
            .await?;

        tracing::info!(author_id, alias = %alias.alias_name, "Alias bound to author");
        Ok(alias)
    }

    /// Unbind an alias; `NotFound` when it is not bound
    pub async fn remove_alias(&self, auth: &dyn AuthContext, alias_name: &str) -> Result<()> {
        require_admin(auth, "remove author aliases")?;
        let alias_name = normalize_name(alias_name)?;

        self.store
            .write("authors::remove_alias", |conn| {
                let alias_name = alias_name.clone();
                Box::pin(async move {
                    let result = sqlx::query("DELETE FROM author_aliases WHERE alias_name = ?")
                        .bind(&alias_name)
                        .execute(&mut *conn)
                        .await?;
                    if result.rows_affected() == 0 {
                        return Err(Error::NotFound(format!("alias '{}'", alias_name)));
                    }
                    Ok(())
                })
            })
            .await?;

        tracing::info!(alias = %alias_name, "Alias removed");
        Ok(())
    }

    pub async fn list_aliases(&self, author_id: AuthorId) -> Result<Vec<AuthorAlias>> {
        let aliases = sqlx::query_as::<_, AuthorAlias>(
            "SELECT id, author_id, alias_name FROM author_aliases WHERE author_id = ? ORDER BY id ASC",
        )
        .bind(author_id)
        .fetch_all(self.store.pool())
        .await?;
        Ok(aliases)
    }

    /// Link a book to an author; returns false when the link already existed
    pub async fn link_book(
        &self,
        auth: &dyn AuthContext,
        book_id: BookId,
        author_id: AuthorId,
    ) -> Result<bool> {
        require_admin(auth, "link books to authors")?;

        self.store
            .write("authors::link_book", |conn| {
                Box::pin(async move {
                    require_book(conn, book_id).await?;
                    load_author(conn, author_id).await?;
                    link_book_tx(conn, book_id, author_id).await
                })
            })
            .await
    }

    pub async fn authors_for_book(&self, book_id: BookId) -> Result<Vec<AuthorEntity>> {
        let authors = sqlx::query_as::<_, AuthorEntity>(
            r#"
            SELECT a.id, a.canonical_name
            FROM book_authors ba
            JOIN authors a ON a.id = ba.author_id
            WHERE ba.book_id = ?
            ORDER BY a.id ASC
            "#,
        )
        .bind(book_id)
        .fetch_all(self.store.pool())
        .await?;
        Ok(authors)
    }

    pub async fn books_for_author(&self, author_id: AuthorId) -> Result<Vec<BookId>> {
        let books: Vec<BookId> = sqlx::query_scalar(
            "SELECT book_id FROM book_authors WHERE author_id = ? ORDER BY book_id ASC",
        )
        .bind(author_id)
        .fetch_all(self.store.pool())
        .await?;
        Ok(books)
    }

    /// Fold `from_id` into `to_id` and delete `from_id`
    ///
    /// Book links are re-pointed (duplicates dropped), aliases move, the
    /// retired canonical name becomes an alias of the survivor when it does
    /// not collide, and an immutable merge record is appended. Irreversible.
    pub async fn merge_authors(
        &self,
        auth: &dyn AuthContext,
        from_id: AuthorId,
        to_id: AuthorId,
        reason: &str,
    ) -> Result<AuthorMergeRecord> {
        require_admin(auth, "merge authors")?;
        if from_id == to_id {
            return Err(Error::Conflict(format!(
                "cannot merge author {} into itself",
                from_id
            )));
        }

        let operator = auth.operator_id();
        let reason = reason.trim().to_string();

        let record = self
            .store
            .write("authors::merge_authors", |conn| {
                let reason = reason.clone();
                Box::pin(async move {
                    merge_authors_tx(conn, from_id, to_id, &reason, operator).await
                })
            })
            .await?;

        tracing::info!(
            from_id,
            to_id,
            operator,
            reason = %record.reason,
            "Authors merged"
        );
        Ok(record)
    }

    /// Delete an author that has no linked books
    pub async fn delete_author(&self, auth: &dyn AuthContext, author_id: AuthorId) -> Result<()> {
        require_admin(auth, "delete authors")?;

        self.store
            .write("authors::delete_author", |conn| {
                Box::pin(async move {
                    load_author(conn, author_id).await?;

                    let links: i64 =
                        sqlx::query_scalar("SELECT COUNT(*) FROM book_authors WHERE author_id = ?")
                            .bind(author_id)
                            .fetch_one(&mut *conn)
                            .await?;
                    if links > 0 {
                        return Err(Error::Conflict(format!(
                            "author {} still has {} linked book(s)",
                            author_id, links
                        )));
                    }

                    sqlx::query("DELETE FROM author_aliases WHERE author_id = ?")
                        .bind(author_id)
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("DELETE FROM authors WHERE id = ?")
                        .bind(author_id)
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .await?;

        tracing::info!(author_id, "Author deleted");
        Ok(())
    }
}

/// Trim a free-text name; empty names are invalid
pub fn normalize_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("author name must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

pub(crate) async fn load_author(
    conn: &mut SqliteConnection,
    author_id: AuthorId,
) -> Result<AuthorEntity> {
    sqlx::query_as::<_, AuthorEntity>("SELECT id, canonical_name FROM authors WHERE id = ?")
        .bind(author_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("author {}", author_id)))
}

/// Exact canonical name first, then alias
async fn lookup_name(conn: &mut SqliteConnection, name: &str) -> Result<Option<AuthorEntity>> {
    let by_name = sqlx::query_as::<_, AuthorEntity>(
        "SELECT id, canonical_name FROM authors WHERE canonical_name = ?",
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;

    if by_name.is_some() {
        return Ok(by_name);
    }

    let by_alias = sqlx::query_as::<_, AuthorEntity>(
        r#"
        SELECT a.id, a.canonical_name
        FROM author_aliases al
        JOIN authors a ON a.id = al.author_id
        WHERE al.alias_name = ?
        "#,
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(by_alias)
}

async fn insert_author(conn: &mut SqliteConnection, name: &str) -> Result<AuthorEntity> {
    let result = sqlx::query(
        "INSERT INTO authors (canonical_name, created_at) VALUES (?, CURRENT_TIMESTAMP)",
    )
    .bind(name)
    .execute(&mut *conn)
    .await?;

    Ok(AuthorEntity {
        id: result.last_insert_rowid(),
        canonical_name: name.to_string(),
    })
}

/// `name` must already be normalized
pub(crate) async fn resolve_or_create_tx(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<Resolution> {
    if let Some(author) = lookup_name(conn, name).await? {
        return Ok(Resolution {
            author,
            created: false,
        });
    }

    let author = insert_author(conn, name).await?;
    Ok(Resolution {
        author,
        created: true,
    })
}

/// Returns true when a new link row was written
pub(crate) async fn link_book_tx(
    conn: &mut SqliteConnection,
    book_id: BookId,
    author_id: AuthorId,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO book_authors (book_id, author_id, created_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(book_id, author_id) DO NOTHING
        "#,
    )
    .bind(book_id)
    .bind(author_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn add_alias_tx(
    conn: &mut SqliteConnection,
    author_id: AuthorId,
    alias_name: &str,
) -> Result<AuthorAlias> {
    let author = load_author(conn, author_id).await?;
    if author.canonical_name == alias_name {
        return Err(Error::InvalidInput(format!(
            "'{}' is already the canonical name of author {}",
            alias_name, author_id
        )));
    }

    let existing = sqlx::query_as::<_, AuthorAlias>(
        "SELECT id, author_id, alias_name FROM author_aliases WHERE alias_name = ?",
    )
    .bind(alias_name)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(existing) = existing {
        if existing.author_id == author_id {
            return Ok(existing);
        }
        return Err(Error::Conflict(format!(
            "alias '{}' is already bound to author {}",
            alias_name, existing.author_id
        )));
    }

    let owner: Option<AuthorId> =
        sqlx::query_scalar("SELECT id FROM authors WHERE canonical_name = ?")
            .bind(alias_name)
            .fetch_optional(&mut *conn)
            .await?;
    if let Some(owner) = owner {
        return Err(Error::Conflict(format!(
            "'{}' is the canonical name of author {}",
            alias_name, owner
        )));
    }

    let result = sqlx::query(
        "INSERT INTO author_aliases (author_id, alias_name, created_at) VALUES (?, ?, CURRENT_TIMESTAMP)",
    )
    .bind(author_id)
    .bind(alias_name)
    .execute(&mut *conn)
    .await
    .map_err(|e| unique_violation_as_conflict(e, alias_name))?;

    Ok(AuthorAlias {
        id: result.last_insert_rowid(),
        author_id,
        alias_name: alias_name.to_string(),
    })
}

fn unique_violation_as_conflict(err: sqlx::Error, alias_name: &str) -> Error {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            Error::Conflict(format!("alias '{}' is already bound", alias_name))
        }
        _ => Error::Database(err),
    }
}

async fn merge_authors_tx(
    conn: &mut SqliteConnection,
    from_id: AuthorId,
    to_id: AuthorId,
    reason: &str,
    operator: i64,
) -> Result<AuthorMergeRecord> {
    let from = load_author(conn, from_id).await?;
    let to = load_author(conn, to_id).await?;

    // Links that would duplicate an existing to_id link are dropped
    sqlx::query(
        r#"
        INSERT INTO book_authors (book_id, author_id, created_at)
        SELECT book_id, ?, created_at FROM book_authors WHERE author_id = ?
        ON CONFLICT(book_id, author_id) DO NOTHING
        "#,
    )
    .bind(to_id)
    .bind(from_id)
    .execute(&mut *conn)
    .await?;

    let links = sqlx::query("DELETE FROM book_authors WHERE author_id = ?")
        .bind(from_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    let aliases = sqlx::query("UPDATE author_aliases SET author_id = ? WHERE author_id = ?")
        .bind(to_id)
        .bind(from_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    // Aliases cascade on delete, so delete the entity before reusing its name
    sqlx::query("DELETE FROM authors WHERE id = ?")
        .bind(from_id)
        .execute(&mut *conn)
        .await?;

    if from.canonical_name != to.canonical_name {
        sqlx::query(
            r#"
            INSERT INTO author_aliases (author_id, alias_name, created_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(alias_name) DO NOTHING
            "#,
        )
        .bind(to_id)
        .bind(&from.canonical_name)
        .execute(&mut *conn)
        .await?;
    }

    let record = append_author_merge(conn, from_id, to_id, &from.canonical_name, reason, operator)
        .await?;

    tracing::debug!(
        from_id,
        to_id,
        links_repointed = links,
        aliases_moved = aliases,
        "Author merge applied"
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trims() {
        assert_eq!(normalize_name("  Octavia Butler \n").unwrap(), "Octavia Butler");
    }

    #[test]
    fn test_normalize_rejects_blank() {
        assert!(matches!(normalize_name(" \t "), Err(Error::InvalidInput(_))));
    }
}
