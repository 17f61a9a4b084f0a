//! Repository for the `libraries` table.

use bindery_core::types::DbId;
use sqlx::PgPool;

use crate::models::library::{CreateLibrary, Library};

const COLUMNS: &str = "id, name, root_path, file_count, total_size_bytes, \
    stats_refreshed_at, created_at, updated_at";

/// Provides library CRUD and derived statistics.
pub struct LibraryRepo;

impl LibraryRepo {
    pub async fn create(pool: &PgPool, input: &CreateLibrary) -> Result<Library, sqlx::Error> {
        let query = format!(
            "INSERT INTO libraries (name, root_path) VALUES ($1, $2) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Library>(&query)
            .bind(&input.name)
            .bind(&input.root_path)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Library>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM libraries WHERE id = $1");
        sqlx::query_as::<_, Library>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Recompute file count and total size from the catalog.
    ///
    /// Quarantined files are excluded. Returns `None` for an unknown library.
    pub async fn refresh_stats(pool: &PgPool, id: DbId) -> Result<Option<Library>, sqlx::Error> {
        let query = format!(
            "UPDATE libraries l \
             SET file_count = s.file_count, total_size_bytes = s.total_size, \
                 stats_refreshed_at = NOW() \
             FROM ( \
                 SELECT COUNT(*)::INTEGER AS file_count, \
                        COALESCE(SUM(size_bytes), 0)::BIGINT AS total_size \
                 FROM library_files \
                 WHERE library_id = $1 AND quarantined_at IS NULL \
             ) s \
             WHERE l.id = $1 \
             RETURNING l.id, l.name, l.root_path, l.file_count, l.total_size_bytes, \
                 l.stats_refreshed_at, l.created_at, l.updated_at"
        );
        sqlx::query_as::<_, Library>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
