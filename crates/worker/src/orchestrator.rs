//! Batch orchestration.
//!
//! [`BatchOrchestrator`] validates and creates batches, drives one batch at a
//! time through its items, and persists counters and the resume cursor as it
//! goes. Items are always processed in ascending store id order; the cursor
//! (`last_processed_id`) is the id of the last handled item, so a resumed run
//! continues strictly after it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use bindery_core::batch::{
    validate_item_count, BatchCounters, BatchStatus, BatchTransition, BatchType, ErrorSummaryEntry,
};
use bindery_core::error::CoreError;
use bindery_core::naming::render_template;
use bindery_core::operation::{
    reversal_inputs, FileOperationInput, OperationKind, OperationStatus, ReversibleOperation,
    CATALOG_RECORD_KEY,
};
use bindery_core::types::{DbId, Timestamp};
use bindery_db::models::batch_operation::{BatchCheckpoint, BatchOperation, CreateBatchOperation};
use bindery_db::models::operation_log::{CreateOperationLog, FinishOperationLog, OperationLog};
use bindery_events::bus::{EVENT_BATCH_FINISHED, EVENT_BATCH_ITEM_SUCCEEDED, EVENT_BATCH_STARTED};
use bindery_events::{EventBus, PlatformEvent};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::{EngineConfig, DEFAULT_FLUSH_EVERY, DEFAULT_PAGE_SIZE};
use crate::error::{BatchError, ItemFailure};
use crate::executors::file_ops::trash_path;
use crate::executors::{BatchContext, ExecutorRegistry, ItemExecutor};
use crate::progress::{ProgressSink, ProgressUpdate};
use crate::scheduler::BatchScheduler;
use crate::store::{BatchStore, ConvertParameters, WorkItem};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Tunables of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Gate for rename and template-rename batches.
    pub renaming_enabled: bool,
    /// Work items fetched per page.
    pub page_size: i64,
    /// Items processed between checkpoint flushes.
    pub flush_every: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            renaming_enabled: true,
            page_size: DEFAULT_PAGE_SIZE,
            flush_every: DEFAULT_FLUSH_EVERY,
        }
    }
}

impl From<&EngineConfig> for OrchestratorSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            renaming_enabled: config.renaming_enabled,
            page_size: config.page_size,
            flush_every: config.flush_every,
        }
    }
}

/// Request to create a batch.
///
/// Conversion batches take no `items`; their `parameters` may carry
/// explicit `file_ids` and conversion `options`. Template renames read the
/// `template` parameter and fill it from each item's metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct NewBatchRequest {
    pub batch_type: BatchType,
    #[serde(default)]
    pub library_id: Option<DbId>,
    #[serde(default)]
    pub items: Vec<FileOperationInput>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Outcome of one execution run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub batch_id: DbId,
    pub status: BatchStatus,
    pub counters: BatchCounters,
}

impl BatchResult {
    pub fn progress_percent(&self) -> f64 {
        self.counters.progress_percent()
    }
}

/// Read model of a batch for callers polling progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchProgress {
    pub id: DbId,
    pub batch_type: String,
    pub status: BatchStatus,
    pub library_id: Option<DbId>,
    pub total_items: i32,
    pub completed_items: i32,
    pub failed_items: i32,
    pub last_processed_id: Option<DbId>,
    pub progress_percent: f64,
    pub error_summary: Vec<ErrorSummaryEntry>,
    pub error_message: Option<String>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl TryFrom<&BatchOperation> for BatchProgress {
    type Error = CoreError;

    fn try_from(batch: &BatchOperation) -> Result<Self, Self::Error> {
        let counters = batch.counters();
        Ok(Self {
            id: batch.id,
            batch_type: batch.batch_type.clone(),
            status: batch.status()?,
            library_id: batch.library_id,
            total_items: batch.total_items,
            completed_items: batch.completed_items,
            failed_items: batch.failed_items,
            last_processed_id: batch.last_processed_id,
            progress_percent: counters.progress_percent(),
            error_summary: counters.errors,
            error_message: batch.error_message.clone(),
            started_at: batch.started_at,
            completed_at: batch.completed_at,
            created_at: batch.created_at,
        })
    }
}

/// How the item loop ended.
enum RunEnd {
    Exhausted,
    Paused,
}

// ---------------------------------------------------------------------------
// BatchOrchestrator
// ---------------------------------------------------------------------------

pub struct BatchOrchestrator {
    store: Arc<dyn BatchStore>,
    executors: ExecutorRegistry,
    scheduler: Arc<BatchScheduler>,
    events: Option<Arc<EventBus>>,
    settings: OrchestratorSettings,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn BatchStore>,
        executors: ExecutorRegistry,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            executors,
            scheduler: Arc::new(BatchScheduler::new()),
            events: None,
            settings,
        }
    }

    /// Share an externally owned scheduler.
    pub fn with_scheduler(mut self, scheduler: Arc<BatchScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Publish lifecycle events on `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn scheduler(&self) -> &Arc<BatchScheduler> {
        &self.scheduler
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Validate a request and persist it as a pending batch.
    ///
    /// Nothing is persisted when validation fails.
    pub async fn create_batch(&self, request: NewBatchRequest) -> Result<BatchOperation, BatchError> {
        let batch_type = request.batch_type;
        if batch_type.is_renaming() && !self.settings.renaming_enabled {
            return Err(BatchError::FeatureDisabled(format!(
                "renaming is disabled; {batch_type} batches cannot be created"
            )));
        }

        let (input, items) = match (batch_type, request.library_id) {
            (_, None) if batch_type.requires_library() => {
                return Err(BatchError::Validation(format!(
                    "{batch_type} batches require a library_id"
                )));
            }
            (BatchType::Convert, Some(library_id)) => self.prepare_conversion(library_id, request).await?,
            _ => prepare_file_operations(request)?,
        };

        let batch = self.store.create(input, items).await?;
        tracing::info!(
            batch_id = batch.id,
            batch_type = %batch_type,
            library_id = ?batch.library_id,
            total_items = batch.total_items,
            "Batch created"
        );
        Ok(batch)
    }

    async fn prepare_conversion(
        &self,
        library_id: DbId,
        request: NewBatchRequest,
    ) -> Result<(CreateBatchOperation, Vec<CreateOperationLog>), BatchError> {
        if !request.items.is_empty() {
            return Err(BatchError::Validation(
                "convert batches do not take file operation items".into(),
            ));
        }

        let mut params: ConvertParameters = if request.parameters.is_null() {
            ConvertParameters::default()
        } else {
            serde_json::from_value(request.parameters)
                .map_err(|e| BatchError::Validation(format!("invalid conversion parameters: {e}")))?
        };

        let mut file_ids = match params.file_ids.take() {
            Some(ids) => ids,
            None => self.store.convertible_files(library_id).await?,
        };
        file_ids.sort_unstable();
        file_ids.dedup();
        validate_item_count(file_ids.len())?;

        let total_items = i32::try_from(file_ids.len())
            .map_err(|_| BatchError::Validation("too many files".into()))?;
        params.file_ids = Some(file_ids);
        let parameters = serde_json::to_value(&params)
            .map_err(|e| BatchError::Validation(format!("invalid conversion parameters: {e}")))?;

        Ok((
            CreateBatchOperation {
                batch_type: BatchType::Convert.as_str().to_string(),
                library_id: Some(library_id),
                total_items,
                parameters,
            },
            Vec::new(),
        ))
    }

    /// Build a `restore_original` batch that undoes the reversible,
    /// successful operations of `source_id`.
    pub async fn create_restore_batch(&self, source_id: DbId) -> Result<BatchOperation, BatchError> {
        let source = self
            .store
            .find(source_id)
            .await?
            .ok_or(BatchError::NotFound(source_id))?;
        let status = source.status()?;
        if matches!(status, BatchStatus::Pending | BatchStatus::InProgress) {
            return Err(BatchError::InvalidState(format!(
                "batch {source_id} is {status}; only batches that have run can be restored"
            )));
        }

        let logs = self.store.batch_logs(source_id).await?;
        let operations: Vec<ReversibleOperation<'_>> = logs.iter().filter_map(reversible_view).collect();
        let items = reversal_inputs(&operations);
        if items.is_empty() {
            return Err(BatchError::Validation(format!(
                "batch {source_id} has no reversible operations"
            )));
        }

        self.create_batch(NewBatchRequest {
            batch_type: BatchType::RestoreOriginal,
            library_id: source.library_id,
            items,
            parameters: json!({ "restores_batch": source_id }),
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run a pending or paused batch until its items are exhausted or
    /// cancellation is observed.
    ///
    /// Item failures are counted, never returned. An `Err` means the run
    /// itself could not proceed; where the batch had already started it is
    /// marked failed with the error message.
    pub async fn execute_batch(
        &self,
        id: DbId,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<BatchResult, BatchError> {
        let batch = self.store.find(id).await?.ok_or(BatchError::NotFound(id))?;
        batch.status()?.apply(BatchTransition::Start)?;

        let active = self.scheduler.try_acquire(id)?;
        let batch = self.store.mark_started(id).await?.ok_or_else(|| {
            BatchError::InvalidState(format!("batch {id} is no longer pending or paused"))
        })?;
        let mut counters = batch.counters();

        tracing::info!(
            batch_id = id,
            batch_type = %batch.batch_type,
            total_items = counters.total,
            resume_after = ?counters.last_processed_id,
            "Batch execution started"
        );
        self.publish(
            EVENT_BATCH_STARTED,
            id,
            json!({
                "batch_type": batch.batch_type,
                "library_id": batch.library_id,
                "total": counters.total,
                "resumed": counters.last_processed_id.is_some(),
            }),
        );

        let run = match self.resolve_executor(&batch) {
            Ok((batch_type, executor)) => {
                self.run_items(&batch, batch_type, executor.as_ref(), &mut counters, active.token(), progress)
                    .await
            }
            Err(e) => Err(e),
        };

        match run {
            Ok(RunEnd::Paused) => {
                let status = BatchStatus::InProgress.apply(BatchTransition::Pause)?;
                self.close(&batch, status, counters).await
            }
            Ok(RunEnd::Exhausted) => {
                let status = BatchStatus::InProgress.apply(BatchTransition::Finish {
                    completed: counters.completed,
                    total: counters.total,
                })?;
                self.close(&batch, status, counters).await
            }
            Err(e) => {
                self.abort(&batch, &counters, &e).await;
                Err(e)
            }
        }
    }

    fn resolve_executor(
        &self,
        batch: &BatchOperation,
    ) -> Result<(BatchType, Arc<dyn ItemExecutor>), BatchError> {
        let unknown = || BatchError::UnknownBatchType(batch.batch_type.clone());
        let batch_type = batch.kind().map_err(|_| unknown())?;
        let executor = self.executors.get(batch_type).ok_or_else(unknown)?;
        Ok((batch_type, executor))
    }

    async fn run_items(
        &self,
        batch: &BatchOperation,
        batch_type: BatchType,
        executor: &dyn ItemExecutor,
        counters: &mut BatchCounters,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<RunEnd, BatchError> {
        let ctx = BatchContext::new(batch, batch_type);
        let mut unflushed = 0usize;

        loop {
            if counters.is_exhausted() {
                return Ok(RunEnd::Exhausted);
            }
            let page = self
                .store
                .remaining_items(batch, counters.last_processed_id, self.settings.page_size)
                .await?;
            if page.is_empty() {
                return Ok(RunEnd::Exhausted);
            }

            for item in &page {
                if cancel.is_cancelled() {
                    tracing::info!(
                        batch_id = batch.id,
                        last_processed_id = ?counters.last_processed_id,
                        "Cancellation observed, pausing batch"
                    );
                    return Ok(RunEnd::Paused);
                }
                if counters.is_exhausted() {
                    return Ok(RunEnd::Exhausted);
                }

                self.process_item(&ctx, executor, item, counters).await?;

                unflushed += 1;
                if unflushed >= self.settings.flush_every {
                    self.store
                        .save_checkpoint(batch.id, &BatchCheckpoint::from(&*counters))
                        .await?;
                    unflushed = 0;
                }

                if let Some(sink) = progress {
                    sink.report(ProgressUpdate {
                        batch_id: batch.id,
                        current: counters.processed(),
                        total: counters.total,
                        message: format!("Processed {}", item.filename()),
                        detail: Some(json!({
                            "item_id": item.id(),
                            "completed": counters.completed,
                            "failed": counters.failed,
                        })),
                    });
                }

                tokio::task::yield_now().await;
            }
        }
    }

    async fn process_item(
        &self,
        ctx: &BatchContext,
        executor: &dyn ItemExecutor,
        item: &WorkItem,
        counters: &mut BatchCounters,
    ) -> Result<(), BatchError> {
        let item_id = item.id();
        let outcome = AssertUnwindSafe(executor.run(ctx, item))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ItemFailure::Panicked(panic_message(panic.as_ref()))));

        match outcome {
            Ok(success) => {
                counters.record_success(item_id);
                if let WorkItem::Log(log) = item {
                    self.store
                        .finish_item(
                            log.id,
                            &FinishOperationLog {
                                status: OperationStatus::Success,
                                reversible: success.reversible,
                                metadata: success.metadata,
                                error: None,
                            },
                        )
                        .await?;
                }
                self.publish(
                    EVENT_BATCH_ITEM_SUCCEEDED,
                    ctx.batch_id,
                    json!({
                        "item_id": item_id,
                        "batch_type": ctx.batch_type.as_str(),
                        "library_id": success.library_id.or(ctx.library_id),
                    }),
                );
            }
            Err(failure) => {
                let message = failure.to_string();
                tracing::warn!(
                    batch_id = ctx.batch_id,
                    item_id,
                    path = item.path(),
                    error = %message,
                    "Batch item failed"
                );
                counters.record_failure(item_id, &item.filename(), &message);
                if let WorkItem::Log(log) = item {
                    self.store
                        .finish_item(
                            log.id,
                            &FinishOperationLog {
                                status: OperationStatus::Failed,
                                reversible: false,
                                metadata: None,
                                error: Some(message),
                            },
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn close(
        &self,
        batch: &BatchOperation,
        status: BatchStatus,
        counters: BatchCounters,
    ) -> Result<BatchResult, BatchError> {
        self.store
            .finish(batch.id, status, &BatchCheckpoint::from(&counters), None)
            .await?;

        tracing::info!(
            batch_id = batch.id,
            status = %status,
            completed = counters.completed,
            failed = counters.failed,
            total = counters.total,
            "Batch run ended"
        );
        self.publish_finished(batch, status, &counters);

        Ok(BatchResult {
            batch_id: batch.id,
            status,
            counters,
        })
    }

    /// Record an aborted run as failed. A store that cannot take the
    /// write either is only logged; the caller still gets the first error.
    async fn abort(&self, batch: &BatchOperation, counters: &BatchCounters, error: &BatchError) {
        tracing::error!(batch_id = batch.id, error = %error, "Batch execution aborted");
        let status = match BatchStatus::InProgress.apply(BatchTransition::Fail) {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(batch_id = batch.id, error = %e, "Aborted batch left for recovery");
                return;
            }
        };
        let message = error.to_string();
        if let Err(persist) = self
            .store
            .finish(batch.id, status, &BatchCheckpoint::from(counters), Some(&message))
            .await
        {
            tracing::error!(
                batch_id = batch.id,
                error = %persist,
                "Failed to mark aborted batch as failed"
            );
        }
        self.publish_finished(batch, status, counters);
    }

    // -----------------------------------------------------------------------
    // Control & queries
    // -----------------------------------------------------------------------

    /// Ask the executing batch, if any, to pause after its current item.
    pub fn request_cancellation(&self) -> bool {
        self.scheduler.request_cancellation()
    }

    pub fn has_active_batch(&self) -> bool {
        self.scheduler.has_active_batch()
    }

    pub fn active_batch_id(&self) -> Option<DbId> {
        self.scheduler.active_batch_id()
    }

    /// Discard a paused batch for good.
    pub async fn abandon_batch(&self, id: DbId) -> Result<BatchOperation, BatchError> {
        let batch = self.store.find(id).await?.ok_or(BatchError::NotFound(id))?;
        let from = batch.status()?;
        let to = from.apply(BatchTransition::Abandon)?;

        let batch = self
            .store
            .transition(id, from, to)
            .await?
            .ok_or_else(|| BatchError::InvalidState(format!("batch {id} is no longer paused")))?;

        tracing::info!(
            batch_id = id,
            completed = batch.completed_items,
            total = batch.total_items,
            "Paused batch abandoned"
        );
        Ok(batch)
    }

    /// Progress snapshot, `None` for an unknown id.
    pub async fn get_batch(&self, id: DbId) -> Result<Option<BatchProgress>, BatchError> {
        match self.store.find(id).await? {
            Some(batch) => Ok(Some(BatchProgress::try_from(&batch)?)),
            None => Ok(None),
        }
    }

    pub async fn list_batches(&self, status: BatchStatus) -> Result<Vec<BatchProgress>, BatchError> {
        self.store
            .list_by_status(status)
            .await?
            .iter()
            .map(|batch| BatchProgress::try_from(batch).map_err(BatchError::from))
            .collect()
    }

    /// Move batches left `in_progress` by a previous process to `paused`.
    ///
    /// The batch executing in this process, if any, is left alone. Returns
    /// the ids of the recovered batches.
    pub async fn recover_interrupted(&self) -> Result<Vec<DbId>, BatchError> {
        let active = self.scheduler.active_batch_id();
        let mut recovered = Vec::new();

        for batch in self.store.list_by_status(BatchStatus::InProgress).await? {
            if Some(batch.id) == active {
                continue;
            }
            let target = BatchStatus::InProgress.apply(BatchTransition::Recover)?;
            if self
                .store
                .transition(batch.id, BatchStatus::InProgress, target)
                .await?
                .is_some()
            {
                tracing::warn!(
                    batch_id = batch.id,
                    last_processed_id = ?batch.last_processed_id,
                    "Recovered interrupted batch as paused"
                );
                recovered.push(batch.id);
            }
        }
        Ok(recovered)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    fn publish(&self, event_type: &str, batch_id: DbId, payload: serde_json::Value) {
        if let Some(bus) = &self.events {
            bus.publish(
                PlatformEvent::new(event_type)
                    .with_source("batch", batch_id)
                    .with_payload(payload),
            );
        }
    }

    fn publish_finished(&self, batch: &BatchOperation, status: BatchStatus, counters: &BatchCounters) {
        self.publish(
            EVENT_BATCH_FINISHED,
            batch.id,
            json!({
                "batch_type": batch.batch_type,
                "library_id": batch.library_id,
                "status": status.as_str(),
                "completed": counters.completed,
                "failed": counters.failed,
                "total": counters.total,
            }),
        );
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Validate file operation items and turn them into pending log rows.
fn prepare_file_operations(
    request: NewBatchRequest,
) -> Result<(CreateBatchOperation, Vec<CreateOperationLog>), BatchError> {
    let batch_type = request.batch_type;
    let expected = batch_type.item_operation().ok_or_else(|| {
        BatchError::Validation(format!("{batch_type} batches do not take file operation items"))
    })?;
    validate_item_count(request.items.len())?;

    let template = match batch_type {
        BatchType::TemplateRename => Some(
            request
                .parameters
                .get("template")
                .and_then(|t| t.as_str())
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| {
                    BatchError::Validation("template_rename batches require a template".into())
                })?
                .to_string(),
        ),
        _ => None,
    };

    let total_items = i32::try_from(request.items.len())
        .map_err(|_| BatchError::Validation("too many items".into()))?;
    let mut logs = Vec::with_capacity(request.items.len());

    for (index, item) in request.items.into_iter().enumerate() {
        if item.operation != expected {
            return Err(BatchError::Validation(format!(
                "item {index}: expected operation '{expected}', got '{}'",
                item.operation
            )));
        }
        if item.source_path.trim().is_empty() {
            return Err(BatchError::Validation(format!(
                "item {index}: source_path is required"
            )));
        }

        let destination_path = match &template {
            Some(template) => Some(
                templated_destination(&item, template)
                    .map_err(|e| BatchError::Validation(format!("item {index}: {e}")))?,
            ),
            None => item.destination_path,
        };
        if expected.needs_destination()
            && destination_path.as_deref().map_or(true, |d| d.trim().is_empty())
        {
            return Err(BatchError::Validation(format!(
                "item {index}: destination_path is required for {expected}"
            )));
        }

        logs.push(CreateOperationLog {
            batch_id: None,
            operation: expected.as_str().to_string(),
            source_path: item.source_path,
            destination_path,
            status: OperationStatus::Pending.as_str().to_string(),
            reversible: false,
            metadata: item.metadata,
            error: None,
        });
    }

    Ok((
        CreateBatchOperation {
            batch_type: batch_type.as_str().to_string(),
            library_id: request.library_id,
            total_items,
            parameters: request.parameters,
        },
        logs,
    ))
}

/// Destination of a template rename: the rendered name, with the source's
/// extension, in the source's directory.
fn templated_destination(item: &FileOperationInput, template: &str) -> Result<String, CoreError> {
    let fields = item
        .metadata
        .as_object()
        .ok_or_else(|| CoreError::Validation("template fields must be a JSON object".into()))?;
    let stem = render_template(template, fields)?;

    let source = Path::new(&item.source_path);
    let file_name = match source.extension() {
        Some(ext) => format!("{stem}.{}", ext.to_string_lossy()),
        None => stem,
    };
    Ok(source.with_file_name(file_name).to_string_lossy().into_owned())
}

/// Reversal view of a log row. A trashed delete is reversed from its trash
/// location.
fn reversible_view(log: &OperationLog) -> Option<ReversibleOperation<'_>> {
    let operation = log.kind().ok()?;
    let status = log.outcome().ok()?;
    let destination_path = match operation {
        OperationKind::Delete => trash_path(log),
        _ => log.destination_path.as_deref(),
    };
    Some(ReversibleOperation {
        operation,
        status,
        reversible: log.reversible,
        source_path: &log.source_path,
        destination_path,
        catalog_record: log.metadata.get(CATALOG_RECORD_KEY),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("executor panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn item(operation: OperationKind, source: &str, destination: Option<&str>) -> FileOperationInput {
        FileOperationInput {
            operation,
            source_path: source.into(),
            destination_path: destination.map(Into::into),
            metadata: json!({}),
        }
    }

    fn request(batch_type: BatchType, items: Vec<FileOperationInput>) -> NewBatchRequest {
        NewBatchRequest {
            batch_type,
            library_id: None,
            items,
            parameters: json!({}),
        }
    }

    #[test]
    fn file_operation_items_become_pending_logs() {
        let (batch, logs) = prepare_file_operations(request(
            BatchType::Move,
            vec![item(OperationKind::Move, "/a/x.cbz", Some("/b/x.cbz"))],
        ))
        .unwrap();

        assert_eq!(batch.batch_type, "move");
        assert_eq!(batch.total_items, 1);
        assert_eq!(logs[0].operation, "move");
        assert_eq!(logs[0].status, "pending");
        assert_eq!(logs[0].destination_path.as_deref(), Some("/b/x.cbz"));
    }

    #[test]
    fn mismatched_operation_is_rejected() {
        let result = prepare_file_operations(request(
            BatchType::Move,
            vec![item(OperationKind::Delete, "/a/x.cbz", None)],
        ));
        assert_matches!(result, Err(BatchError::Validation(msg)) if msg.contains("item 0"));
    }

    #[test]
    fn move_requires_destination() {
        let result = prepare_file_operations(request(
            BatchType::Move,
            vec![item(OperationKind::Move, "/a/x.cbz", None)],
        ));
        assert_matches!(result, Err(BatchError::Validation(_)));
    }

    #[test]
    fn template_rename_renders_destination_next_to_source() {
        let mut input = item(OperationKind::Rename, "/lib/Saga/saga_1.cbz", None);
        input.metadata = json!({"series": "Saga", "number": 1});
        let mut req = request(BatchType::TemplateRename, vec![input]);
        req.parameters = json!({"template": "{series} {number:3}"});

        let (_, logs) = prepare_file_operations(req).unwrap();
        assert_eq!(logs[0].destination_path.as_deref(), Some("/lib/Saga/Saga 001.cbz"));
    }

    #[test]
    fn template_rename_without_template_is_rejected() {
        let result = prepare_file_operations(request(
            BatchType::TemplateRename,
            vec![item(OperationKind::Rename, "/a/x.cbz", None)],
        ));
        assert_matches!(result, Err(BatchError::Validation(msg)) if msg.contains("template"));
    }

    #[test]
    fn template_missing_field_names_the_item() {
        let mut req = request(
            BatchType::TemplateRename,
            vec![item(OperationKind::Rename, "/a/x.cbz", None)],
        );
        req.parameters = json!({"template": "{series}"});
        assert_matches!(
            prepare_file_operations(req),
            Err(BatchError::Validation(msg)) if msg.starts_with("item 0")
        );
    }

    #[test]
    fn panic_payloads_are_described() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "executor panicked: boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "executor panicked: bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "executor panicked: unknown cause");
    }
}
