//! Item executors: one strategy per batch type.

pub mod convert;
pub mod file_ops;
pub mod metadata;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bindery_core::batch::BatchType;
use bindery_core::types::DbId;
use bindery_db::models::batch_operation::BatchOperation;
use bindery_db::models::operation_log::OperationLog;
use bindery_pipeline::{ConversionPipeline, FileCatalog};

use crate::error::ItemFailure;
use crate::store::WorkItem;

pub use convert::ConvertExecutor;
pub use file_ops::{DeleteExecutor, MoveExecutor};
pub use metadata::MetadataExecutor;

/// What an executor knows about the batch it works for.
#[derive(Debug, Clone)]
pub struct BatchContext {
    pub batch_id: DbId,
    pub batch_type: BatchType,
    pub library_id: Option<DbId>,
    pub parameters: serde_json::Value,
}

impl BatchContext {
    pub fn new(batch: &BatchOperation, batch_type: BatchType) -> Self {
        Self {
            batch_id: batch.id,
            batch_type,
            library_id: batch.library_id,
            parameters: batch.parameters.clone(),
        }
    }
}

/// A successfully processed item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemSuccess {
    /// Library whose derived statistics changed.
    pub library_id: Option<DbId>,
    /// Whether a later restore batch can undo the operation.
    pub reversible: bool,
    /// Replaces the operation log metadata when set.
    pub metadata: Option<serde_json::Value>,
}

/// Performs one unit of work for a batch.
#[async_trait]
pub trait ItemExecutor: Send + Sync {
    async fn run(&self, ctx: &BatchContext, item: &WorkItem) -> Result<ItemSuccess, ItemFailure>;
}

/// Log-backed items only.
pub(crate) fn expect_log(item: &WorkItem) -> Result<&OperationLog, ItemFailure> {
    match item {
        WorkItem::Log(log) => Ok(log),
        WorkItem::File { id, .. } => Err(ItemFailure::Invalid(format!(
            "file {id} is not an operation log item"
        ))),
    }
}

// ---------------------------------------------------------------------------
// ExecutorRegistry
// ---------------------------------------------------------------------------

/// Dependencies of the built-in executors.
pub struct ExecutorDeps {
    pub pipeline: Arc<ConversionPipeline>,
    pub catalog: Arc<dyn FileCatalog>,
    pub trash_dir: Option<PathBuf>,
}

/// Batch type -> executor lookup.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<BatchType, Arc<dyn ItemExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with an executor for every batch type.
    pub fn standard(deps: ExecutorDeps) -> Self {
        let mover: Arc<dyn ItemExecutor> = Arc::new(MoveExecutor::new(deps.catalog.clone()));
        Self::new()
            .with(BatchType::Convert, Arc::new(ConvertExecutor::new(deps.pipeline)))
            .with(BatchType::Rename, mover.clone())
            .with(BatchType::TemplateRename, mover.clone())
            .with(BatchType::Move, mover.clone())
            .with(BatchType::RestoreOriginal, mover)
            .with(
                BatchType::Delete,
                Arc::new(DeleteExecutor::new(deps.catalog.clone(), deps.trash_dir)),
            )
            .with(BatchType::MetadataUpdate, Arc::new(MetadataExecutor::new(deps.catalog)))
    }

    pub fn with(mut self, batch_type: BatchType, executor: Arc<dyn ItemExecutor>) -> Self {
        self.executors.insert(batch_type, executor);
        self
    }

    pub fn get(&self, batch_type: BatchType) -> Option<Arc<dyn ItemExecutor>> {
        self.executors.get(&batch_type).cloned()
    }
}
