//! Repository for the `operation_logs` table.

use bindery_core::operation::OperationStatus;
use bindery_core::types::DbId;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::operation_log::{CreateOperationLog, FinishOperationLog, OperationLog};

/// Column list for `operation_logs` queries.
const COLUMNS: &str = "id, batch_id, operation, source_path, destination_path, status, \
    reversible, metadata, error, created_at, updated_at";

/// Provides CRUD operations for operation logs.
pub struct OperationLogRepo;

impl OperationLogRepo {
    /// Insert a standalone operation log row (audit records).
    pub async fn create(
        pool: &PgPool,
        input: &CreateOperationLog,
    ) -> Result<OperationLog, sqlx::Error> {
        let query = format!(
            "INSERT INTO operation_logs \
                (batch_id, operation, source_path, destination_path, status, \
                 reversible, metadata, error) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, OperationLog>(&query)
            .bind(input.batch_id)
            .bind(&input.operation)
            .bind(&input.source_path)
            .bind(&input.destination_path)
            .bind(&input.status)
            .bind(input.reversible)
            .bind(&input.metadata)
            .bind(&input.error)
            .fetch_one(pool)
            .await
    }

    /// Insert an item row inside a batch-creation transaction.
    pub(crate) async fn insert_for_batch(
        tx: &mut Transaction<'_, Postgres>,
        batch_id: DbId,
        input: &CreateOperationLog,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "INSERT INTO operation_logs \
                (batch_id, operation, source_path, destination_path, status, \
                 reversible, metadata, error) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id",
        )
        .bind(batch_id)
        .bind(&input.operation)
        .bind(&input.source_path)
        .bind(&input.destination_path)
        .bind(&input.status)
        .bind(input.reversible)
        .bind(&input.metadata)
        .bind(&input.error)
        .fetch_one(&mut **tx)
        .await
    }

    /// Find an operation log by ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<OperationLog>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM operation_logs WHERE id = $1");
        sqlx::query_as::<_, OperationLog>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List every row of a batch in processing order.
    pub async fn list_by_batch(
        pool: &PgPool,
        batch_id: DbId,
    ) -> Result<Vec<OperationLog>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM operation_logs WHERE batch_id = $1 ORDER BY id ASC"
        );
        sqlx::query_as::<_, OperationLog>(&query)
            .bind(batch_id)
            .fetch_all(pool)
            .await
    }

    /// Page of a batch's items strictly after the cursor, ascending by id.
    pub async fn list_after(
        pool: &PgPool,
        batch_id: DbId,
        after: Option<DbId>,
        limit: i64,
    ) -> Result<Vec<OperationLog>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM operation_logs \
             WHERE batch_id = $1 AND ($2::BIGINT IS NULL OR id > $2) \
             ORDER BY id ASC \
             LIMIT $3"
        );
        sqlx::query_as::<_, OperationLog>(&query)
            .bind(batch_id)
            .bind(after)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Record the outcome of an item.
    pub async fn finish(
        pool: &PgPool,
        id: DbId,
        outcome: &FinishOperationLog,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE operation_logs \
             SET status = $2, reversible = $3, \
                 metadata = COALESCE($4, metadata), error = $5 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(outcome.status.as_str())
        .bind(outcome.reversible)
        .bind(&outcome.metadata)
        .bind(&outcome.error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Count a batch's rows in an outcome status.
    pub async fn count_by_status(
        pool: &PgPool,
        batch_id: DbId,
        status: OperationStatus,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM operation_logs WHERE batch_id = $1 AND status = $2",
        )
        .bind(batch_id)
        .bind(status.as_str())
        .fetch_one(pool)
        .await
    }
}
