//! Repository for the `library_files` table (the file catalog).

use bindery_core::types::DbId;
use sqlx::PgPool;

use crate::models::library_file::{CreateLibraryFile, LibraryFile};

/// Column list for `library_files` queries.
const COLUMNS: &str = "id, library_id, path, filename, extension, size_bytes, metadata, \
    quarantined_at, quarantine_reason, created_at, updated_at";

/// Provides catalog lookups and the in-place updates batch items perform.
pub struct LibraryFileRepo;

impl LibraryFileRepo {
    /// Register a file in the catalog.
    pub async fn create(
        pool: &PgPool,
        input: &CreateLibraryFile,
    ) -> Result<LibraryFile, sqlx::Error> {
        let query = format!(
            "INSERT INTO library_files (library_id, path, filename, extension, size_bytes) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LibraryFile>(&query)
            .bind(input.library_id)
            .bind(&input.path)
            .bind(&input.filename)
            .bind(&input.extension)
            .bind(input.size_bytes)
            .fetch_one(pool)
            .await
    }

    /// Find a file by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<LibraryFile>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM library_files WHERE id = $1");
        sqlx::query_as::<_, LibraryFile>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find the catalog record referencing an absolute path.
    pub async fn find_by_path(
        pool: &PgPool,
        path: &str,
    ) -> Result<Option<LibraryFile>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM library_files WHERE path = $1");
        sqlx::query_as::<_, LibraryFile>(&query)
            .bind(path)
            .fetch_optional(pool)
            .await
    }

    /// IDs of a library's non-quarantined files with one of the extensions,
    /// ascending.
    pub async fn list_ids_by_extension(
        pool: &PgPool,
        library_id: DbId,
        extensions: &[String],
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "SELECT id FROM library_files \
             WHERE library_id = $1 AND LOWER(extension) = ANY($2) \
               AND quarantined_at IS NULL \
             ORDER BY id ASC",
        )
        .bind(library_id)
        .bind(extensions)
        .fetch_all(pool)
        .await
    }

    /// Page of files from an id set strictly after the cursor, ascending.
    pub async fn list_in_after(
        pool: &PgPool,
        ids: &[DbId],
        after: Option<DbId>,
        limit: i64,
    ) -> Result<Vec<LibraryFile>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM library_files \
             WHERE id = ANY($1) AND ($2::BIGINT IS NULL OR id > $2) \
             ORDER BY id ASC \
             LIMIT $3"
        );
        sqlx::query_as::<_, LibraryFile>(&query)
            .bind(ids)
            .bind(after)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Point a record at a new location after a rename or conversion.
    pub async fn relocate(
        pool: &PgPool,
        id: DbId,
        path: &str,
        filename: &str,
        extension: &str,
        size_bytes: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE library_files \
             SET path = $2, filename = $3, extension = $4, size_bytes = $5 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(path)
        .bind(filename)
        .bind(extension)
        .bind(size_bytes)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record that a corrupt file was moved into quarantine.
    pub async fn quarantine(
        pool: &PgPool,
        id: DbId,
        quarantine_path: &str,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE library_files \
             SET path = $2, quarantined_at = NOW(), quarantine_reason = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(quarantine_path)
        .bind(reason)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Merge fields into the record's metadata object.
    pub async fn merge_metadata(
        pool: &PgPool,
        id: DbId,
        fields: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE library_files SET metadata = metadata || $2 WHERE id = $1")
            .bind(id)
            .bind(fields)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Remove a record. Returns `true` if a row was deleted.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM library_files WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
