//! Repository for the `collections` and `collection_items` tables.
//!
//! Positions are dense and 1-based. The unique `(collection_id, position)`
//! constraint is deferred, so renumbering inside one transaction can pass
//! through intermediate duplicates.

use bindery_core::types::DbId;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::collection_item::CollectionItem;

const COLUMNS: &str = "id, collection_id, library_file_id, position, created_at, updated_at";

/// Provides collection membership operations.
pub struct CollectionItemRepo;

impl CollectionItemRepo {
    /// Create an empty collection, returning its id.
    pub async fn create_collection(pool: &PgPool, name: &str) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>("INSERT INTO collections (name) VALUES ($1) RETURNING id")
            .bind(name)
            .fetch_one(pool)
            .await
    }

    /// Append a file to the end of a collection.
    pub async fn append(
        pool: &PgPool,
        collection_id: DbId,
        library_file_id: DbId,
    ) -> Result<CollectionItem, sqlx::Error> {
        let query = format!(
            "INSERT INTO collection_items (collection_id, library_file_id, position) \
             SELECT $1, $2, COALESCE(MAX(position), 0) + 1 \
             FROM collection_items WHERE collection_id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, CollectionItem>(&query)
            .bind(collection_id)
            .bind(library_file_id)
            .fetch_one(pool)
            .await
    }

    /// List a collection's items by position.
    pub async fn list(
        pool: &PgPool,
        collection_id: DbId,
    ) -> Result<Vec<CollectionItem>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM collection_items \
             WHERE collection_id = $1 ORDER BY position ASC"
        );
        sqlx::query_as::<_, CollectionItem>(&query)
            .bind(collection_id)
            .fetch_all(pool)
            .await
    }

    /// Assign positions `1..=n` following `ordered_item_ids`, all or nothing.
    ///
    /// Fails with `RowNotFound` (and rolls back) if any id is not an item of
    /// the collection.
    pub async fn renumber(
        pool: &PgPool,
        collection_id: DbId,
        ordered_item_ids: &[DbId],
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        Self::renumber_inner(&mut tx, collection_id, ordered_item_ids).await?;
        tx.commit().await
    }

    /// Remove one item and close the gap it leaves, all or nothing.
    pub async fn remove_and_compact(
        pool: &PgPool,
        collection_id: DbId,
        item_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let removed = sqlx::query("DELETE FROM collection_items WHERE id = $1 AND collection_id = $2")
            .bind(item_id)
            .bind(collection_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        if removed {
            let remaining = sqlx::query_scalar::<_, DbId>(
                "SELECT id FROM collection_items WHERE collection_id = $1 ORDER BY position ASC",
            )
            .bind(collection_id)
            .fetch_all(&mut *tx)
            .await?;
            Self::renumber_inner(&mut tx, collection_id, &remaining).await?;
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn renumber_inner(
        tx: &mut Transaction<'_, Postgres>,
        collection_id: DbId,
        ordered_item_ids: &[DbId],
    ) -> Result<(), sqlx::Error> {
        for (index, item_id) in ordered_item_ids.iter().enumerate() {
            let position = i32::try_from(index + 1).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
            let result = sqlx::query(
                "UPDATE collection_items SET position = $3 WHERE id = $1 AND collection_id = $2",
            )
            .bind(item_id)
            .bind(collection_id)
            .bind(position)
            .execute(&mut **tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(sqlx::Error::RowNotFound);
            }
        }
        Ok(())
    }
}
