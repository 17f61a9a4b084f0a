//! In-process batch store and file catalog.
//!
//! Mirrors the Postgres semantics the orchestrator relies on: sequence ids,
//! conditional status updates, the `completed + failed <= total` check and
//! cursor paging. Failures can be injected per operation to exercise the
//! infrastructure-error paths.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bindery_core::batch::{BatchStatus, BatchType};
use bindery_core::types::DbId;
use bindery_db::models::batch_operation::{BatchCheckpoint, BatchOperation, CreateBatchOperation};
use bindery_db::models::library_file::LibraryFile;
use bindery_db::models::operation_log::{CreateOperationLog, FinishOperationLog, OperationLog};
use bindery_pipeline::catalog::path_parts;
use bindery_pipeline::{CatalogError, CatalogRecord, CatalogSnapshot, FileCatalog};
use chrono::Utc;

use super::{BatchStore, ConvertParameters, WorkItem, CONVERTIBLE_EXTENSIONS};
use crate::error::StoreError;

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    RemainingItems,
    SaveCheckpoint,
    Finish,
    FinishItem,
}

#[derive(Default)]
struct MemoryState {
    last_batch_id: DbId,
    last_log_id: DbId,
    last_file_id: DbId,
    batches: BTreeMap<DbId, BatchOperation>,
    logs: BTreeMap<DbId, OperationLog>,
    files: BTreeMap<DbId, LibraryFile>,
    failures: HashSet<FailurePoint>,
}

impl MemoryState {
    fn check(&self, point: FailurePoint) -> Result<(), StoreError> {
        if self.failures.contains(&point) {
            return Err(StoreError::Unavailable(format!("injected failure at {point:?}")));
        }
        Ok(())
    }

    fn insert_log(&mut self, batch_id: Option<DbId>, input: CreateOperationLog) -> DbId {
        self.last_log_id += 1;
        let id = self.last_log_id;
        let now = Utc::now();
        self.logs.insert(
            id,
            OperationLog {
                id,
                batch_id: batch_id.or(input.batch_id),
                operation: input.operation,
                source_path: input.source_path,
                destination_path: input.destination_path,
                status: input.status,
                reversible: input.reversible,
                metadata: input.metadata,
                error: input.error,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    fn batch_mut(&mut self, id: DbId) -> Result<&mut BatchOperation, StoreError> {
        self.batches
            .get_mut(&id)
            .ok_or_else(|| StoreError::Unavailable(format!("batch {id} does not exist")))
    }
}

/// Check-constraint equivalent of `ck_batch_operations_counts`.
fn apply_checkpoint(batch: &mut BatchOperation, checkpoint: &BatchCheckpoint) -> Result<(), StoreError> {
    if checkpoint.completed_items + checkpoint.failed_items > batch.total_items {
        return Err(StoreError::Unavailable(format!(
            "batch {} counters {} + {} exceed total {}",
            batch.id, checkpoint.completed_items, checkpoint.failed_items, batch.total_items
        )));
    }
    batch.completed_items = checkpoint.completed_items;
    batch.failed_items = checkpoint.failed_items;
    batch.last_processed_id = checkpoint.last_processed_id;
    batch.error_summary = checkpoint.error_summary.clone();
    batch.updated_at = Utc::now();
    Ok(())
}

/// Batch store and file catalog held in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a catalog file; the size is read from disk when it exists.
    pub fn add_file(&self, library_id: DbId, path: &str) -> DbId {
        let size_bytes = std::fs::metadata(path).map(|m| m.len() as i64).unwrap_or(0);
        self.insert_file(library_id, path, size_bytes, serde_json::json!({}))
    }

    fn insert_file(&self, library_id: DbId, path: &str, size_bytes: i64, metadata: serde_json::Value) -> DbId {
        let (filename, extension) = path_parts(path);
        let mut state = self.state();
        state.last_file_id += 1;
        let id = state.last_file_id;
        let now = Utc::now();
        state.files.insert(
            id,
            LibraryFile {
                id,
                library_id,
                path: path.to_string(),
                filename,
                extension,
                size_bytes,
                metadata,
                quarantined_at: None,
                quarantine_reason: None,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub fn file(&self, id: DbId) -> Option<LibraryFile> {
        self.state().files.get(&id).cloned()
    }

    pub fn batch_count(&self) -> usize {
        self.state().batches.len()
    }

    /// Every operation log row, including standalone audit rows.
    pub fn all_logs(&self) -> Vec<OperationLog> {
        self.state().logs.values().cloned().collect()
    }

    pub fn fail_at(&self, point: FailurePoint) {
        self.state().failures.insert(point);
    }

    pub fn clear_failure(&self, point: FailurePoint) {
        self.state().failures.remove(&point);
    }

    /// Overwrite a batch status, as a crash mid-run would leave it.
    pub fn force_status(&self, id: DbId, status: BatchStatus) {
        if let Some(batch) = self.state().batches.get_mut(&id) {
            batch.status_id = status.id();
        }
    }
}

#[async_trait]
impl BatchStore for MemoryStore {
    async fn create(
        &self,
        batch: CreateBatchOperation,
        items: Vec<CreateOperationLog>,
    ) -> Result<BatchOperation, StoreError> {
        let mut state = self.state();
        state.last_batch_id += 1;
        let id = state.last_batch_id;
        let now = Utc::now();
        let record = BatchOperation {
            id,
            batch_type: batch.batch_type,
            status_id: BatchStatus::Pending.id(),
            library_id: batch.library_id,
            total_items: batch.total_items,
            completed_items: 0,
            failed_items: 0,
            last_processed_id: None,
            error_summary: serde_json::json!([]),
            parameters: batch.parameters,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.batches.insert(id, record.clone());
        for item in items {
            state.insert_log(Some(id), item);
        }
        Ok(record)
    }

    async fn find(&self, id: DbId) -> Result<Option<BatchOperation>, StoreError> {
        Ok(self.state().batches.get(&id).cloned())
    }

    async fn mark_started(&self, id: DbId) -> Result<Option<BatchOperation>, StoreError> {
        let mut state = self.state();
        let Some(batch) = state.batches.get_mut(&id) else {
            return Ok(None);
        };
        let startable = [BatchStatus::Pending.id(), BatchStatus::Paused.id()];
        if !startable.contains(&batch.status_id) {
            return Ok(None);
        }
        let now = Utc::now();
        batch.status_id = BatchStatus::InProgress.id();
        batch.started_at.get_or_insert(now);
        batch.error_message = None;
        batch.updated_at = now;
        Ok(Some(batch.clone()))
    }

    async fn save_checkpoint(&self, id: DbId, checkpoint: &BatchCheckpoint) -> Result<(), StoreError> {
        let mut state = self.state();
        state.check(FailurePoint::SaveCheckpoint)?;
        apply_checkpoint(state.batch_mut(id)?, checkpoint)
    }

    async fn finish(
        &self,
        id: DbId,
        status: BatchStatus,
        checkpoint: &BatchCheckpoint,
        error_message: Option<&str>,
    ) -> Result<BatchOperation, StoreError> {
        let mut state = self.state();
        state.check(FailurePoint::Finish)?;
        let batch = state.batch_mut(id)?;
        apply_checkpoint(batch, checkpoint)?;
        batch.status_id = status.id();
        batch.error_message = error_message.map(str::to_string);
        batch.completed_at = status.is_terminal().then(Utc::now);
        Ok(batch.clone())
    }

    async fn transition(
        &self,
        id: DbId,
        from: BatchStatus,
        to: BatchStatus,
    ) -> Result<Option<BatchOperation>, StoreError> {
        let mut state = self.state();
        let Some(batch) = state.batches.get_mut(&id) else {
            return Ok(None);
        };
        if batch.status_id != from.id() {
            return Ok(None);
        }
        let now = Utc::now();
        batch.status_id = to.id();
        if to.is_terminal() {
            batch.completed_at = Some(now);
        }
        batch.updated_at = now;
        Ok(Some(batch.clone()))
    }

    async fn list_by_status(&self, status: BatchStatus) -> Result<Vec<BatchOperation>, StoreError> {
        Ok(self
            .state()
            .batches
            .values()
            .filter(|b| b.status_id == status.id())
            .cloned()
            .collect())
    }

    async fn remaining_items(
        &self,
        batch: &BatchOperation,
        after: Option<DbId>,
        limit: i64,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let state = self.state();
        state.check(FailurePoint::RemainingItems)?;
        let after = after.unwrap_or(0);
        let limit = usize::try_from(limit).unwrap_or(0);

        if batch.kind()? == BatchType::Convert {
            let ids: HashSet<DbId> = ConvertParameters::from_batch(batch)?
                .file_ids
                .unwrap_or_default()
                .into_iter()
                .collect();
            return Ok(state
                .files
                .range(after + 1..)
                .filter(|(id, _)| ids.contains(id))
                .take(limit)
                .map(|(_, f)| WorkItem::File {
                    id: f.id,
                    path: f.path.clone(),
                    filename: f.filename.clone(),
                })
                .collect());
        }

        Ok(state
            .logs
            .range(after + 1..)
            .filter(|(_, log)| log.batch_id == Some(batch.id))
            .take(limit)
            .map(|(_, log)| WorkItem::Log(log.clone()))
            .collect())
    }

    async fn batch_logs(&self, batch_id: DbId) -> Result<Vec<OperationLog>, StoreError> {
        Ok(self
            .state()
            .logs
            .values()
            .filter(|log| log.batch_id == Some(batch_id))
            .cloned()
            .collect())
    }

    async fn finish_item(&self, log_id: DbId, outcome: &FinishOperationLog) -> Result<(), StoreError> {
        let mut state = self.state();
        state.check(FailurePoint::FinishItem)?;
        let log = state
            .logs
            .get_mut(&log_id)
            .ok_or_else(|| StoreError::Unavailable(format!("operation log {log_id} does not exist")))?;
        log.status = outcome.status.as_str().to_string();
        log.reversible = outcome.reversible;
        if let Some(metadata) = &outcome.metadata {
            log.metadata = metadata.clone();
        }
        log.error = outcome.error.clone();
        log.updated_at = Utc::now();
        Ok(())
    }

    async fn convertible_files(&self, library_id: DbId) -> Result<Vec<DbId>, StoreError> {
        Ok(self
            .state()
            .files
            .values()
            .filter(|f| f.library_id == library_id && f.quarantined_at.is_none())
            .filter(|f| CONVERTIBLE_EXTENSIONS.contains(&f.extension.to_ascii_lowercase().as_str()))
            .map(|f| f.id)
            .collect())
    }
}

#[async_trait]
impl FileCatalog for MemoryStore {
    async fn find_by_path(&self, path: &str) -> Result<Option<CatalogRecord>, CatalogError> {
        Ok(self
            .state()
            .files
            .values()
            .find(|f| f.path == path)
            .cloned()
            .map(CatalogRecord::from))
    }

    async fn relocate(&self, id: DbId, new_path: &str, size_bytes: i64) -> Result<(), CatalogError> {
        let (filename, extension) = path_parts(new_path);
        if let Some(file) = self.state().files.get_mut(&id) {
            file.path = new_path.to_string();
            file.filename = filename;
            file.extension = extension;
            file.size_bytes = size_bytes;
            file.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn quarantine(&self, id: DbId, quarantine_path: &str, reason: &str) -> Result<(), CatalogError> {
        if let Some(file) = self.state().files.get_mut(&id) {
            file.path = quarantine_path.to_string();
            file.quarantined_at = Some(Utc::now());
            file.quarantine_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn remove(&self, id: DbId) -> Result<bool, CatalogError> {
        Ok(self.state().files.remove(&id).is_some())
    }

    async fn register(
        &self,
        snapshot: &CatalogSnapshot,
        path: &str,
        size_bytes: i64,
    ) -> Result<DbId, CatalogError> {
        let metadata = match &snapshot.metadata {
            serde_json::Value::Object(_) => snapshot.metadata.clone(),
            _ => serde_json::json!({}),
        };
        Ok(self.insert_file(snapshot.library_id, path, size_bytes, metadata))
    }

    async fn write_metadata(&self, id: DbId, fields: &serde_json::Value) -> Result<(), CatalogError> {
        if let (Some(file), Some(fields)) = (self.state().files.get_mut(&id), fields.as_object()) {
            if !file.metadata.is_object() {
                file.metadata = serde_json::json!({});
            }
            if let Some(metadata) = file.metadata.as_object_mut() {
                for (key, value) in fields {
                    metadata.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn record_operation(&self, log: CreateOperationLog) -> Result<DbId, CatalogError> {
        Ok(self.state().insert_log(None, log))
    }
}
