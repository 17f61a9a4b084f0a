//! Shared fixtures for worker integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bindery_core::batch::BatchType;
use bindery_core::operation::{FileOperationInput, OperationKind};
use bindery_core::types::DbId;
use bindery_worker::executors::{BatchContext, ExecutorRegistry, ItemExecutor, ItemSuccess};
use bindery_worker::store::{MemoryStore, WorkItem};
use bindery_worker::{BatchOrchestrator, BatchScheduler, ItemFailure, NewBatchRequest, OrchestratorSettings};
use tokio::sync::Notify;

/// Test executor that records the ids it sees and fails, panics or
/// requests cancellation on chosen items.
#[derive(Default)]
pub struct ScriptedExecutor {
    seen: Mutex<Vec<DbId>>,
    fail: HashSet<DbId>,
    panic: HashSet<DbId>,
    cancel_after: Option<(DbId, Arc<BatchScheduler>)>,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, ids: &[DbId]) -> Self {
        self.fail.extend(ids);
        self
    }

    pub fn panicking(mut self, ids: &[DbId]) -> Self {
        self.panic.extend(ids);
        self
    }

    /// Request cancellation while item `id` is running.
    pub fn cancelling_at(mut self, id: DbId, scheduler: Arc<BatchScheduler>) -> Self {
        self.cancel_after = Some((id, scheduler));
        self
    }

    /// Signal `started` on the first item, then wait for `release`.
    pub fn gated(mut self, started: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.gate = Some((started, release));
        self
    }

    pub fn seen(&self) -> Vec<DbId> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ItemExecutor for ScriptedExecutor {
    async fn run(&self, _ctx: &BatchContext, item: &WorkItem) -> Result<ItemSuccess, ItemFailure> {
        let id = item.id();
        self.seen.lock().unwrap().push(id);

        if let Some((started, release)) = &self.gate {
            started.notify_one();
            release.notified().await;
        }
        if let Some((at, scheduler)) = &self.cancel_after {
            if *at == id {
                scheduler.request_cancellation();
            }
        }
        if self.panic.contains(&id) {
            panic!("item {id} exploded");
        }
        if self.fail.contains(&id) {
            return Err(ItemFailure::Invalid(format!("item {id} rejected")));
        }
        Ok(ItemSuccess {
            library_id: Some(1),
            reversible: false,
            metadata: None,
        })
    }
}

/// Orchestrator over `store` whose delete batches run `executor`.
pub fn orchestrator_with(
    store: Arc<MemoryStore>,
    executor: Arc<ScriptedExecutor>,
    scheduler: Arc<BatchScheduler>,
) -> BatchOrchestrator {
    BatchOrchestrator::new(
        store,
        ExecutorRegistry::new().with(BatchType::Delete, executor),
        OrchestratorSettings::default(),
    )
    .with_scheduler(scheduler)
}

/// A delete batch request with `count` items.
pub fn delete_request(count: usize) -> NewBatchRequest {
    NewBatchRequest {
        batch_type: BatchType::Delete,
        library_id: Some(1),
        items: (1..=count)
            .map(|n| FileOperationInput {
                operation: OperationKind::Delete,
                source_path: format!("/library/book-{n}.cbz"),
                destination_path: None,
                metadata: serde_json::json!({}),
            })
            .collect(),
        parameters: serde_json::json!({}),
    }
}

/// Write a zip archive with the given entries.
pub fn write_zip(path: &std::path::Path, entries: &[(&str, &[u8])]) {
    use std::io::Write;

    let mut writer = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    for (name, bytes) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap();
}
