//! Batch store seam.
//!
//! The orchestrator reads and writes batches only through [`BatchStore`].
//! [`pg::PgBatchStore`] is backed by the `bindery-db` repositories;
//! [`memory::MemoryStore`] keeps everything in process.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use bindery_core::batch::BatchStatus;
use bindery_core::types::DbId;
use bindery_db::models::batch_operation::{BatchCheckpoint, BatchOperation, CreateBatchOperation};
use bindery_db::models::operation_log::{CreateOperationLog, FinishOperationLog, OperationLog};
use bindery_pipeline::ConversionOptions;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use pg::PgBatchStore;

/// Archive extensions picked up by a library-wide conversion.
pub const CONVERTIBLE_EXTENSIONS: &[&str] = &["cbr", "rar"];

/// One unit of work, identified by a store-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem {
    /// A catalog file (conversion batches).
    File {
        id: DbId,
        path: String,
        filename: String,
    },
    /// A pre-created operation log row (file-operation batches).
    Log(OperationLog),
}

impl WorkItem {
    pub fn id(&self) -> DbId {
        match self {
            WorkItem::File { id, .. } => *id,
            WorkItem::Log(log) => log.id,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            WorkItem::File { path, .. } => path,
            WorkItem::Log(log) => &log.source_path,
        }
    }

    /// Name shown in error summaries.
    pub fn filename(&self) -> String {
        match self {
            WorkItem::File { filename, .. } => filename.clone(),
            WorkItem::Log(log) => log.filename(),
        }
    }
}

/// `parameters` of a conversion batch.
///
/// `file_ids` is resolved when the batch is created, so the work list of a
/// conversion never grows while it runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvertParameters {
    #[serde(default)]
    pub file_ids: Option<Vec<DbId>>,
    #[serde(default)]
    pub options: ConversionOptions,
}

impl ConvertParameters {
    pub fn from_batch(batch: &BatchOperation) -> Result<Self, StoreError> {
        serde_json::from_value(batch.parameters.clone()).map_err(|e| {
            StoreError::Unavailable(format!("batch {} has malformed parameters: {e}", batch.id))
        })
    }
}

/// Durable storage for batches and their items.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Insert a pending batch and its item rows in one transaction.
    async fn create(
        &self,
        batch: CreateBatchOperation,
        items: Vec<CreateOperationLog>,
    ) -> Result<BatchOperation, StoreError>;

    async fn find(&self, id: DbId) -> Result<Option<BatchOperation>, StoreError>;

    /// Move a pending or paused batch to in-progress; `None` if not startable.
    async fn mark_started(&self, id: DbId) -> Result<Option<BatchOperation>, StoreError>;

    async fn save_checkpoint(&self, id: DbId, checkpoint: &BatchCheckpoint) -> Result<(), StoreError>;

    /// Persist the final state of a run. `completed_at` is set only when
    /// `status` is terminal.
    async fn finish(
        &self,
        id: DbId,
        status: BatchStatus,
        checkpoint: &BatchCheckpoint,
        error_message: Option<&str>,
    ) -> Result<BatchOperation, StoreError>;

    /// Conditional status change; `None` when the batch is not in `from`.
    async fn transition(
        &self,
        id: DbId,
        from: BatchStatus,
        to: BatchStatus,
    ) -> Result<Option<BatchOperation>, StoreError>;

    async fn list_by_status(&self, status: BatchStatus) -> Result<Vec<BatchOperation>, StoreError>;

    /// Items of the batch with id greater than `after`, ascending, at most `limit`.
    async fn remaining_items(
        &self,
        batch: &BatchOperation,
        after: Option<DbId>,
        limit: i64,
    ) -> Result<Vec<WorkItem>, StoreError>;

    /// Every operation log row of a batch, ascending.
    async fn batch_logs(&self, batch_id: DbId) -> Result<Vec<OperationLog>, StoreError>;

    /// Record the outcome of a log-backed item.
    async fn finish_item(&self, log_id: DbId, outcome: &FinishOperationLog) -> Result<(), StoreError>;

    /// Catalog ids of a library's convertible files, ascending.
    async fn convertible_files(&self, library_id: DbId) -> Result<Vec<DbId>, StoreError>;
}
