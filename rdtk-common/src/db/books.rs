//! Content Store adapter
//!
//! Book rows are owned by the content platform; identity code reads them and
//! writes individual fields, but never creates identity state here.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor};

/// Book identifier assigned by the Content Store
pub type BookId = i64;

/// Book record as stored by the Content Store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct BookRecord {
    pub id: BookId,
    pub title: String,
    /// Legacy free-text author
    pub author: Option<String>,
    pub page_count: Option<i64>,
    pub description: Option<String>,
    pub status: String,
}

/// Fields for creating a book row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBook {
    pub title: String,
    pub author: Option<String>,
    pub page_count: Option<i64>,
    pub description: Option<String>,
}

impl NewBook {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_page_count(mut self, page_count: i64) -> Self {
        self.page_count = Some(page_count);
        self
    }
}

/// A single writable field with its new value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookField {
    Title(String),
    Author(Option<String>),
    PageCount(Option<i64>),
    Description(Option<String>),
}

impl BookField {
    pub fn column(&self) -> &'static str {
        match self {
            BookField::Title(_) => "title",
            BookField::Author(_) => "author",
            BookField::PageCount(_) => "page_count",
            BookField::Description(_) => "description",
        }
    }
}

/// Load a book, `NotFound` when the id does not exist at all
pub async fn get_book_record<'e, E>(db: E, id: BookId) -> Result<BookRecord>
where
    E: SqliteExecutor<'e>,
{
    find_book_record(db, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("book {}", id)))
}

/// Load a book if it exists
pub async fn find_book_record<'e, E>(db: E, id: BookId) -> Result<Option<BookRecord>>
where
    E: SqliteExecutor<'e>,
{
    let record = sqlx::query_as::<_, BookRecord>(
        r#"
        SELECT id, title, author, page_count, description, status
        FROM books
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(db)
    .await?;

    Ok(record)
}

/// Check whether a book row exists
pub async fn book_exists<'e, E>(db: E, id: BookId) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM books WHERE id = ?)")
        .bind(id)
        .fetch_one(db)
        .await?;
    Ok(exists)
}

/// Overwrite one field of a book
pub async fn set_field<'e, E>(db: E, id: BookId, field: &BookField) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    // Column names come from a closed enum, never from caller input
    let sql = format!(
        "UPDATE books SET {} = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        field.column()
    );
    let query = sqlx::query(&sql);
    let query = match field {
        BookField::Title(v) => query.bind(v.clone()),
        BookField::Author(v) => query.bind(v.clone()),
        BookField::PageCount(v) => query.bind(*v),
        BookField::Description(v) => query.bind(v.clone()),
    };

    let result = query.bind(id).execute(db).await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("book {}", id)));
    }
    Ok(())
}

/// Insert a book row and return its id
pub async fn create_book<'e, E>(db: E, book: &NewBook) -> Result<BookId>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO books (title, author, page_count, description, created_at, updated_at)
        VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        "#,
    )
    .bind(&book.title)
    .bind(&book.author)
    .bind(book.page_count)
    .bind(&book.description)
    .execute(db)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Move a book to the trash (lifecycle is externally owned; kept for tooling)
pub async fn trash_book<'e, E>(db: E, id: BookId) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE books SET status = 'trash', updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(id)
    .execute(db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("book {}", id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;

    #[tokio::test]
    async fn test_create_and_load_book() {
        let pool = init_memory_database().await.unwrap();

        let id = create_book(
            &pool,
            &NewBook::new("The Left Hand of Darkness")
                .with_author("Ursula K. Le Guin")
                .with_page_count(304),
        )
        .await
        .unwrap();

        let book = get_book_record(&pool, id).await.unwrap();
        assert_eq!(book.title, "The Left Hand of Darkness");
        assert_eq!(book.author.as_deref(), Some("Ursula K. Le Guin"));
        assert_eq!(book.page_count, Some(304));
        assert_eq!(book.status, "publish");
    }

    #[tokio::test]
    async fn test_missing_book_is_not_found() {
        let pool = init_memory_database().await.unwrap();
        let err = get_book_record(&pool, 999).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!book_exists(&pool, 999).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_field_updates_single_column() {
        let pool = init_memory_database().await.unwrap();
        let id = create_book(&pool, &NewBook::new("Draft").with_author("Anon"))
            .await
            .unwrap();

        set_field(&pool, id, &BookField::Title("Final".to_string()))
            .await
            .unwrap();
        set_field(&pool, id, &BookField::PageCount(Some(120)))
            .await
            .unwrap();

        let book = get_book_record(&pool, id).await.unwrap();
        assert_eq!(book.title, "Final");
        assert_eq!(book.author.as_deref(), Some("Anon"));
        assert_eq!(book.page_count, Some(120));

        let err = set_field(&pool, 4242, &BookField::Title("x".into()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
