use crate::DbError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::postgres::PgPool;

/// A row from the `notes` table.
///
/// Serialized camelCase on the wire (`createdAt`, `updatedAt`); `updated_at`
/// stays null until the note is modified for the first time.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: i32,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// The `NoteRepository` provides a high-level, application-specific interface
/// to the database. It encapsulates all SQL queries and data access logic.
#[derive(Debug, Clone)]
pub struct NoteRepository {
    pool: PgPool,
}

impl NoteRepository {
    /// Creates a new `NoteRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetches all notes, newest first.
    /// In a real app, this would support pagination with OFFSET and LIMIT.
    pub async fn list_notes(&self) -> Result<Vec<Note>, DbError> {
        let notes = sqlx::query_as::<_, Note>(
            "SELECT id, title, content, created_at, updated_at FROM notes ORDER BY id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(notes)
    }

    /// Fetches a single note by its identifier.
    pub async fn get_note(&self, id: i32) -> Result<Note, DbError> {
        let note = sqlx::query_as::<_, Note>(
            "SELECT id, title, content, created_at, updated_at FROM notes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(note)
    }

    /// Inserts a new note and returns the stored row.
    ///
    /// The caller is responsible for trimming and validating the title; this
    /// method persists exactly what it is given. `created_at` is set here,
    /// once, and never touched again.
    pub async fn create_note(&self, title: &str, content: &str) -> Result<Note, DbError> {
        let note = sqlx::query_as::<_, Note>(
            r#"
            INSERT INTO notes (title, content, created_at)
            VALUES ($1, $2, NOW())
            RETURNING id, title, content, created_at, updated_at
            "#,
        )
        .bind(title)
        .bind(content)
        .fetch_one(&self.pool)
        .await?;
        Ok(note)
    }

    /// Replaces a note's title and content, stamping `updated_at`.
    pub async fn update_note(&self, id: i32, title: &str, content: &str) -> Result<Note, DbError> {
        let note = sqlx::query_as::<_, Note>(
            r#"
            UPDATE notes
            SET title = $1, content = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING id, title, content, created_at, updated_at
            "#,
        )
        .bind(title)
        .bind(content)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(note)
    }

    /// Deletes a note by its identifier.
    pub async fn delete_note(&self, id: i32) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM notes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}
