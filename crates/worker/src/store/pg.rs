//! Postgres batch store over the `bindery-db` repositories.

use async_trait::async_trait;
use bindery_core::batch::{BatchStatus, BatchType};
use bindery_core::types::DbId;
use bindery_db::models::batch_operation::{BatchCheckpoint, BatchOperation, CreateBatchOperation};
use bindery_db::models::operation_log::{CreateOperationLog, FinishOperationLog, OperationLog};
use bindery_db::repositories::{BatchOperationRepo, LibraryFileRepo, OperationLogRepo};
use bindery_db::DbPool;

use super::{BatchStore, ConvertParameters, WorkItem, CONVERTIBLE_EXTENSIONS};
use crate::error::StoreError;

/// Batch store backed by Postgres.
#[derive(Clone)]
pub struct PgBatchStore {
    pool: DbPool,
}

impl PgBatchStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchStore for PgBatchStore {
    async fn create(
        &self,
        batch: CreateBatchOperation,
        items: Vec<CreateOperationLog>,
    ) -> Result<BatchOperation, StoreError> {
        Ok(BatchOperationRepo::create_with_logs(&self.pool, &batch, &items).await?)
    }

    async fn find(&self, id: DbId) -> Result<Option<BatchOperation>, StoreError> {
        Ok(BatchOperationRepo::find_by_id(&self.pool, id).await?)
    }

    async fn mark_started(&self, id: DbId) -> Result<Option<BatchOperation>, StoreError> {
        Ok(BatchOperationRepo::mark_started(&self.pool, id).await?)
    }

    async fn save_checkpoint(&self, id: DbId, checkpoint: &BatchCheckpoint) -> Result<(), StoreError> {
        Ok(BatchOperationRepo::save_progress(&self.pool, id, checkpoint).await?)
    }

    async fn finish(
        &self,
        id: DbId,
        status: BatchStatus,
        checkpoint: &BatchCheckpoint,
        error_message: Option<&str>,
    ) -> Result<BatchOperation, StoreError> {
        Ok(BatchOperationRepo::finish(&self.pool, id, status, checkpoint, error_message).await?)
    }

    async fn transition(
        &self,
        id: DbId,
        from: BatchStatus,
        to: BatchStatus,
    ) -> Result<Option<BatchOperation>, StoreError> {
        Ok(BatchOperationRepo::transition(&self.pool, id, from, to).await?)
    }

    async fn list_by_status(&self, status: BatchStatus) -> Result<Vec<BatchOperation>, StoreError> {
        Ok(BatchOperationRepo::list_by_status(&self.pool, status).await?)
    }

    async fn remaining_items(
        &self,
        batch: &BatchOperation,
        after: Option<DbId>,
        limit: i64,
    ) -> Result<Vec<WorkItem>, StoreError> {
        if batch.kind()? == BatchType::Convert {
            let ids = ConvertParameters::from_batch(batch)?.file_ids.unwrap_or_default();
            let files = LibraryFileRepo::list_in_after(&self.pool, &ids, after, limit).await?;
            return Ok(files
                .into_iter()
                .map(|f| WorkItem::File {
                    id: f.id,
                    path: f.path,
                    filename: f.filename,
                })
                .collect());
        }

        let logs = OperationLogRepo::list_after(&self.pool, batch.id, after, limit).await?;
        Ok(logs.into_iter().map(WorkItem::Log).collect())
    }

    async fn batch_logs(&self, batch_id: DbId) -> Result<Vec<OperationLog>, StoreError> {
        Ok(OperationLogRepo::list_by_batch(&self.pool, batch_id).await?)
    }

    async fn finish_item(&self, log_id: DbId, outcome: &FinishOperationLog) -> Result<(), StoreError> {
        Ok(OperationLogRepo::finish(&self.pool, log_id, outcome).await?)
    }

    async fn convertible_files(&self, library_id: DbId) -> Result<Vec<DbId>, StoreError> {
        let extensions: Vec<String> = CONVERTIBLE_EXTENSIONS.iter().map(|e| e.to_string()).collect();
        Ok(LibraryFileRepo::list_ids_by_extension(&self.pool, library_id, &extensions).await?)
    }
}
