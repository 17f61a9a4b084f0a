//! Library models.

use bindery_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `libraries` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Library {
    pub id: DbId,
    pub name: String,
    pub root_path: String,
    pub file_count: i32,
    pub total_size_bytes: i64,
    pub stats_refreshed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a library.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLibrary {
    pub name: String,
    pub root_path: String,
}
