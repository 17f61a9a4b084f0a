//! Library file (catalog record) models.

use bindery_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `library_files` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct LibraryFile {
    pub id: DbId,
    pub library_id: DbId,
    pub path: String,
    pub filename: String,
    pub extension: String,
    pub size_bytes: i64,
    pub metadata: serde_json::Value,
    pub quarantined_at: Option<Timestamp>,
    pub quarantine_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for registering a file in the catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLibraryFile {
    pub library_id: DbId,
    pub path: String,
    pub filename: String,
    pub extension: String,
    pub size_bytes: i64,
}
