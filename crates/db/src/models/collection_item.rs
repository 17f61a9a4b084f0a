//! Collection membership models.

use bindery_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `collection_items` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CollectionItem {
    pub id: DbId,
    pub collection_id: DbId,
    pub library_file_id: DbId,
    pub position: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
