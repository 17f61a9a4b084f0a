//! Repository for the `batch_operations` table.
//!
//! Status transitions are conditional on the expected source status so a
//! concurrent writer can never move a batch out of a state it does not own.

use bindery_core::batch::BatchStatus;
use bindery_core::types::DbId;
use sqlx::PgPool;

use crate::models::batch_operation::{BatchCheckpoint, BatchOperation, CreateBatchOperation};
use crate::models::operation_log::CreateOperationLog;
use crate::repositories::OperationLogRepo;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, batch_type, status_id, library_id, total_items, \
    completed_items, failed_items, last_processed_id, error_summary, parameters, \
    error_message, started_at, completed_at, created_at, updated_at";

/// Provides CRUD operations for batch operations.
pub struct BatchOperationRepo;

impl BatchOperationRepo {
    /// Insert a pending batch together with its operation log items.
    ///
    /// Runs in one transaction: either the batch and every item exist, or
    /// nothing was written.
    pub async fn create_with_logs(
        pool: &PgPool,
        input: &CreateBatchOperation,
        logs: &[CreateOperationLog],
    ) -> Result<BatchOperation, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO batch_operations \
                (batch_type, status_id, library_id, total_items, parameters) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        let batch = sqlx::query_as::<_, BatchOperation>(&query)
            .bind(&input.batch_type)
            .bind(BatchStatus::Pending.id())
            .bind(input.library_id)
            .bind(input.total_items)
            .bind(&input.parameters)
            .fetch_one(&mut *tx)
            .await?;

        for log in logs {
            OperationLogRepo::insert_for_batch(&mut tx, batch.id, log).await?;
        }

        tx.commit().await?;
        Ok(batch)
    }

    /// Find a single batch operation by ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<BatchOperation>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM batch_operations WHERE id = $1");
        sqlx::query_as::<_, BatchOperation>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Move a pending or paused batch to in-progress.
    ///
    /// Sets `started_at` only on the first start and clears any error left by
    /// an earlier run. Returns `None` when the batch was not startable.
    pub async fn mark_started(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<BatchOperation>, sqlx::Error> {
        let query = format!(
            "UPDATE batch_operations \
             SET status_id = $2, started_at = COALESCE(started_at, NOW()), error_message = NULL \
             WHERE id = $1 AND status_id IN ($3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BatchOperation>(&query)
            .bind(id)
            .bind(BatchStatus::InProgress.id())
            .bind(BatchStatus::Pending.id())
            .bind(BatchStatus::Paused.id())
            .fetch_optional(pool)
            .await
    }

    /// Persist counters and the resumption cursor.
    pub async fn save_progress(
        pool: &PgPool,
        id: DbId,
        checkpoint: &BatchCheckpoint,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE batch_operations \
             SET completed_items = $2, failed_items = $3, last_processed_id = $4, \
                 error_summary = $5 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(checkpoint.completed_items)
        .bind(checkpoint.failed_items)
        .bind(checkpoint.last_processed_id)
        .bind(&checkpoint.error_summary)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Persist the final state of a run (terminal or paused).
    ///
    /// `completed_at` is stamped only for terminal statuses.
    pub async fn finish(
        pool: &PgPool,
        id: DbId,
        status: BatchStatus,
        checkpoint: &BatchCheckpoint,
        error_message: Option<&str>,
    ) -> Result<BatchOperation, sqlx::Error> {
        let query = format!(
            "UPDATE batch_operations \
             SET status_id = $2, completed_items = $3, failed_items = $4, \
                 last_processed_id = $5, error_summary = $6, error_message = $7, \
                 completed_at = CASE WHEN $8 THEN NOW() ELSE NULL END \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BatchOperation>(&query)
            .bind(id)
            .bind(status.id())
            .bind(checkpoint.completed_items)
            .bind(checkpoint.failed_items)
            .bind(checkpoint.last_processed_id)
            .bind(&checkpoint.error_summary)
            .bind(error_message)
            .bind(status.is_terminal())
            .fetch_one(pool)
            .await
    }

    /// Conditionally move a batch from one status to another.
    ///
    /// Returns `None` when the batch is not currently in `from`.
    pub async fn transition(
        pool: &PgPool,
        id: DbId,
        from: BatchStatus,
        to: BatchStatus,
    ) -> Result<Option<BatchOperation>, sqlx::Error> {
        let query = format!(
            "UPDATE batch_operations \
             SET status_id = $3, \
                 completed_at = CASE WHEN $4 THEN NOW() ELSE completed_at END \
             WHERE id = $1 AND status_id = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BatchOperation>(&query)
            .bind(id)
            .bind(from.id())
            .bind(to.id())
            .bind(to.is_terminal())
            .fetch_optional(pool)
            .await
    }

    /// List batches in a status, oldest first.
    pub async fn list_by_status(
        pool: &PgPool,
        status: BatchStatus,
    ) -> Result<Vec<BatchOperation>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM batch_operations \
             WHERE status_id = $1 \
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, BatchOperation>(&query)
            .bind(status.id())
            .fetch_all(pool)
            .await
    }
}
