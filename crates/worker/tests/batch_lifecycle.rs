//! Integration tests for batch creation, execution, cancellation and
//! recovery against the in-memory store.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use bindery_core::batch::{BatchStatus, BatchType, MAX_BATCH_ITEMS};
use bindery_core::operation::{FileOperationInput, OperationKind};
use bindery_db::models::batch_operation::BatchCheckpoint;
use bindery_worker::executors::ExecutorRegistry;
use bindery_worker::store::memory::FailurePoint;
use bindery_worker::store::{BatchStore, MemoryStore};
use bindery_worker::{
    BatchError, BatchOrchestrator, BatchScheduler, NewBatchRequest, OrchestratorSettings, ProgressUpdate,
};
use tokio::sync::{mpsc, Notify};

use common::{delete_request, orchestrator_with, ScriptedExecutor};

fn setup(executor: ScriptedExecutor) -> (Arc<MemoryStore>, Arc<ScriptedExecutor>, BatchOrchestrator) {
    let store = Arc::new(MemoryStore::new());
    let executor = Arc::new(executor);
    let orchestrator = orchestrator_with(store.clone(), executor.clone(), Arc::new(BatchScheduler::new()));
    (store, executor, orchestrator)
}

// ---------------------------------------------------------------------------
// Test: creation
// ---------------------------------------------------------------------------

/// A new batch is pending with one pending log row per item.
#[tokio::test]
async fn created_batch_is_pending_with_item_rows() {
    let (store, _, orchestrator) = setup(ScriptedExecutor::new());

    let batch = orchestrator.create_batch(delete_request(3)).await.unwrap();

    assert_eq!(batch.status().unwrap(), BatchStatus::Pending);
    assert_eq!(batch.total_items, 3);
    assert_eq!(batch.completed_items + batch.failed_items, 0);
    let logs = store.batch_logs(batch.id).await.unwrap();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|l| l.status == "pending" && l.operation == "delete"));
}

/// Rename batches are refused while renaming is disabled, and nothing is
/// persisted.
#[tokio::test]
async fn renaming_disabled_rejects_rename_batches() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = BatchOrchestrator::new(
        store.clone(),
        ExecutorRegistry::new(),
        OrchestratorSettings {
            renaming_enabled: false,
            ..Default::default()
        },
    );

    let request = NewBatchRequest {
        batch_type: BatchType::Rename,
        library_id: None,
        items: vec![FileOperationInput {
            operation: OperationKind::Rename,
            source_path: "/a/x.cbz".into(),
            destination_path: Some("/a/y.cbz".into()),
            metadata: serde_json::json!({}),
        }],
        parameters: serde_json::json!({}),
    };

    assert_matches!(
        orchestrator.create_batch(request).await,
        Err(BatchError::FeatureDisabled(_))
    );
    assert_eq!(store.batch_count(), 0);
}

/// Oversized batches are rejected before anything is written.
#[tokio::test]
async fn oversized_batch_is_rejected() {
    let (store, _, orchestrator) = setup(ScriptedExecutor::new());

    let result = orchestrator.create_batch(delete_request(MAX_BATCH_ITEMS + 1)).await;

    assert_matches!(result, Err(BatchError::Validation(_)));
    assert_eq!(store.batch_count(), 0);
}

/// Library-wide conversion needs a library to scan.
#[tokio::test]
async fn conversion_without_library_is_rejected() {
    let (store, _, orchestrator) = setup(ScriptedExecutor::new());

    let result = orchestrator
        .create_batch(NewBatchRequest {
            batch_type: BatchType::Convert,
            library_id: None,
            items: Vec::new(),
            parameters: serde_json::Value::Null,
        })
        .await;

    assert_matches!(result, Err(BatchError::Validation(msg)) if msg.contains("require a library_id"));
    assert_eq!(store.batch_count(), 0);
}

// ---------------------------------------------------------------------------
// Test: execution outcomes
// ---------------------------------------------------------------------------

/// Every item succeeding completes the batch with the cursor on the last id.
#[tokio::test]
async fn all_items_succeed() {
    let (store, executor, orchestrator) = setup(ScriptedExecutor::new());
    let batch = orchestrator.create_batch(delete_request(4)).await.unwrap();

    let result = orchestrator.execute_batch(batch.id, None).await.unwrap();

    assert_eq!(result.status, BatchStatus::Completed);
    assert_eq!(result.counters.completed, 4);
    assert_eq!(result.counters.failed, 0);
    assert_eq!(executor.seen(), vec![1, 2, 3, 4]);

    let stored = store.find(batch.id).await.unwrap().unwrap();
    assert_eq!(stored.status().unwrap(), BatchStatus::Completed);
    assert_eq!(stored.last_processed_id, Some(4));
    assert!(stored.completed_at.is_some());
    assert!(!orchestrator.has_active_batch());
}

/// One success is enough to complete; failures land in the error summary.
#[tokio::test]
async fn partial_failure_still_completes() {
    let (store, _, orchestrator) = setup(ScriptedExecutor::new().failing(&[2]));
    let batch = orchestrator.create_batch(delete_request(3)).await.unwrap();

    let result = orchestrator.execute_batch(batch.id, None).await.unwrap();

    assert_eq!(result.status, BatchStatus::Completed);
    assert_eq!(result.counters.completed, 2);
    assert_eq!(result.counters.failed, 1);

    let progress = orchestrator.get_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(progress.error_summary.len(), 1);
    assert_eq!(progress.error_summary[0].item_id, 2);
    assert_eq!(progress.error_summary[0].filename, "book-2.cbz");
    assert_eq!(progress.progress_percent, 100.0);

    let logs = store.batch_logs(batch.id).await.unwrap();
    assert_eq!(logs[1].status, "failed");
    assert_eq!(logs[1].error.as_deref(), Some("invalid item: item 2 rejected"));
    assert_eq!(logs[0].status, "success");
}

/// No successes at all fails the batch.
#[tokio::test]
async fn all_items_failing_fails_the_batch() {
    let (_, _, orchestrator) = setup(ScriptedExecutor::new().failing(&[1, 2]));
    let batch = orchestrator.create_batch(delete_request(2)).await.unwrap();

    let result = orchestrator.execute_batch(batch.id, None).await.unwrap();

    assert_eq!(result.status, BatchStatus::Failed);
    assert_eq!(result.counters.failed, 2);
    assert_eq!(result.counters.errors.len(), 2);
}

/// An empty batch completes immediately.
#[tokio::test]
async fn empty_batch_completes() {
    let (_, executor, orchestrator) = setup(ScriptedExecutor::new());
    let batch = orchestrator.create_batch(delete_request(0)).await.unwrap();

    let result = orchestrator.execute_batch(batch.id, None).await.unwrap();

    assert_eq!(result.status, BatchStatus::Completed);
    assert!(executor.seen().is_empty());
}

/// A panicking executor fails only its own item.
#[tokio::test]
async fn executor_panic_is_an_item_failure() {
    let (_, executor, orchestrator) = setup(ScriptedExecutor::new().panicking(&[2]));
    let batch = orchestrator.create_batch(delete_request(3)).await.unwrap();

    let result = orchestrator.execute_batch(batch.id, None).await.unwrap();

    assert_eq!(result.status, BatchStatus::Completed);
    assert_eq!(result.counters.failed, 1);
    assert!(result.counters.errors[0].error.contains("item 2 exploded"));
    assert_eq!(executor.seen(), vec![1, 2, 3]);
}

/// Every processed item produces one progress update.
#[tokio::test]
async fn progress_is_reported_per_item() {
    let (_, _, orchestrator) = setup(ScriptedExecutor::new());
    let batch = orchestrator.create_batch(delete_request(3)).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressUpdate>();

    orchestrator.execute_batch(batch.id, Some(&tx)).await.unwrap();
    drop(tx);

    let mut updates = Vec::new();
    while let Some(update) = rx.recv().await {
        updates.push(update);
    }
    assert_eq!(updates.len(), 3);
    assert_eq!(updates.last().unwrap().current, 3);
    assert!(updates.iter().all(|u| u.total == 3 && u.batch_id == batch.id));
}

// ---------------------------------------------------------------------------
// Test: state machine guards
// ---------------------------------------------------------------------------

/// Terminal batches cannot be executed again.
#[tokio::test]
async fn executing_a_finished_batch_is_invalid() {
    let (_, _, orchestrator) = setup(ScriptedExecutor::new());
    let batch = orchestrator.create_batch(delete_request(1)).await.unwrap();
    orchestrator.execute_batch(batch.id, None).await.unwrap();

    assert_matches!(
        orchestrator.execute_batch(batch.id, None).await,
        Err(BatchError::InvalidState(_))
    );
}

#[tokio::test]
async fn unknown_batch_is_not_found() {
    let (_, _, orchestrator) = setup(ScriptedExecutor::new());
    assert_matches!(
        orchestrator.execute_batch(42, None).await,
        Err(BatchError::NotFound(42))
    );
    assert!(orchestrator.get_batch(42).await.unwrap().is_none());
}

/// A batch whose type has no executor is marked failed.
#[tokio::test]
async fn missing_executor_fails_the_batch() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = BatchOrchestrator::new(store.clone(), ExecutorRegistry::new(), OrchestratorSettings::default());
    let batch = orchestrator.create_batch(delete_request(1)).await.unwrap();

    assert_matches!(
        orchestrator.execute_batch(batch.id, None).await,
        Err(BatchError::UnknownBatchType(t)) if t == "delete"
    );
    let stored = store.find(batch.id).await.unwrap().unwrap();
    assert_eq!(stored.status().unwrap(), BatchStatus::Failed);
    assert!(stored.error_message.is_some());
}

/// Only paused batches can be abandoned.
#[tokio::test]
async fn abandon_requires_paused() {
    let (store, _, orchestrator) = setup(ScriptedExecutor::new());
    let batch = orchestrator.create_batch(delete_request(2)).await.unwrap();

    assert_matches!(
        orchestrator.abandon_batch(batch.id).await,
        Err(BatchError::InvalidState(_))
    );

    store.force_status(batch.id, BatchStatus::Paused);
    let abandoned = orchestrator.abandon_batch(batch.id).await.unwrap();
    assert_eq!(abandoned.status().unwrap(), BatchStatus::Cancelled);

    assert_matches!(
        orchestrator.execute_batch(batch.id, None).await,
        Err(BatchError::InvalidState(_))
    );
}

// ---------------------------------------------------------------------------
// Test: cancellation and resume
// ---------------------------------------------------------------------------

/// Cancellation during item 3 of 5 pauses after item 3; resuming runs only
/// items 4 and 5.
#[tokio::test]
async fn cancellation_pauses_and_resume_continues_after_cursor() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = Arc::new(BatchScheduler::new());
    let executor = Arc::new(ScriptedExecutor::new().cancelling_at(3, scheduler.clone()));
    let orchestrator = orchestrator_with(store.clone(), executor.clone(), scheduler);
    let batch = orchestrator.create_batch(delete_request(5)).await.unwrap();

    let paused = orchestrator.execute_batch(batch.id, None).await.unwrap();
    assert_eq!(paused.status, BatchStatus::Paused);
    assert_eq!(paused.counters.completed, 3);
    assert_eq!(paused.counters.last_processed_id, Some(3));
    let stored = store.find(batch.id).await.unwrap().unwrap();
    assert_eq!(stored.status().unwrap(), BatchStatus::Paused);
    assert!(stored.completed_at.is_none());

    let resumed = orchestrator.execute_batch(batch.id, None).await.unwrap();
    assert_eq!(resumed.status, BatchStatus::Completed);
    assert_eq!(resumed.counters.completed, 5);
    assert_eq!(executor.seen(), vec![1, 2, 3, 4, 5]);
}

/// A second execution while one is running is rejected as busy.
#[tokio::test]
async fn second_execution_is_busy() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let store = Arc::new(MemoryStore::new());
    let executor = Arc::new(ScriptedExecutor::new().gated(started.clone(), release.clone()));
    let orchestrator = Arc::new(orchestrator_with(
        store.clone(),
        executor,
        Arc::new(BatchScheduler::new()),
    ));
    let first = orchestrator.create_batch(delete_request(1)).await.unwrap();
    let second = orchestrator.create_batch(delete_request(1)).await.unwrap();

    let running = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.execute_batch(first.id, None).await })
    };
    started.notified().await;

    assert_eq!(orchestrator.active_batch_id(), Some(first.id));
    assert_matches!(
        orchestrator.execute_batch(second.id, None).await,
        Err(BatchError::Busy { active }) if active == first.id
    );
    let untouched = store.find(second.id).await.unwrap().unwrap();
    assert_eq!(untouched.status().unwrap(), BatchStatus::Pending);

    release.notify_one();
    let result = running.await.unwrap().unwrap();
    assert_eq!(result.status, BatchStatus::Completed);
    assert!(!orchestrator.has_active_batch());
}

/// Batches left in progress by a crash are paused on recovery and resume
/// strictly after their persisted cursor.
#[tokio::test]
async fn recovered_batch_resumes_after_checkpoint() {
    let (store, executor, orchestrator) = setup(ScriptedExecutor::new());
    let batch = orchestrator.create_batch(delete_request(4)).await.unwrap();
    store
        .save_checkpoint(
            batch.id,
            &BatchCheckpoint {
                completed_items: 2,
                failed_items: 0,
                last_processed_id: Some(2),
                error_summary: serde_json::json!([]),
            },
        )
        .await
        .unwrap();
    store.force_status(batch.id, BatchStatus::InProgress);

    assert_eq!(orchestrator.recover_interrupted().await.unwrap(), vec![batch.id]);
    let paused = orchestrator.list_batches(BatchStatus::Paused).await.unwrap();
    assert_eq!(paused.len(), 1);

    let result = orchestrator.execute_batch(batch.id, None).await.unwrap();
    assert_eq!(result.status, BatchStatus::Completed);
    assert_eq!(result.counters.completed, 4);
    assert_eq!(executor.seen(), vec![3, 4]);
}

// ---------------------------------------------------------------------------
// Test: infrastructure failures
// ---------------------------------------------------------------------------

/// A store failure aborts the run and marks the batch failed.
#[tokio::test]
async fn store_failure_marks_batch_failed() {
    let (store, executor, orchestrator) = setup(ScriptedExecutor::new());
    let batch = orchestrator.create_batch(delete_request(2)).await.unwrap();
    store.fail_at(FailurePoint::RemainingItems);

    assert_matches!(
        orchestrator.execute_batch(batch.id, None).await,
        Err(BatchError::Store(_))
    );

    let stored = store.find(batch.id).await.unwrap().unwrap();
    assert_eq!(stored.status().unwrap(), BatchStatus::Failed);
    assert!(stored.error_message.unwrap().contains("injected failure"));
    assert!(executor.seen().is_empty());
    assert!(!orchestrator.has_active_batch());
}

/// A failed checkpoint write keeps counters within the total.
#[tokio::test]
async fn checkpoint_failure_keeps_counters_consistent() {
    let (store, _, orchestrator) = setup(ScriptedExecutor::new());
    let batch = orchestrator.create_batch(delete_request(3)).await.unwrap();
    store.fail_at(FailurePoint::SaveCheckpoint);

    assert_matches!(
        orchestrator.execute_batch(batch.id, None).await,
        Err(BatchError::Store(_))
    );

    let stored = store.find(batch.id).await.unwrap().unwrap();
    assert_eq!(stored.status().unwrap(), BatchStatus::Failed);
    assert!(stored.completed_items + stored.failed_items <= stored.total_items);
    assert_eq!(stored.completed_items, 1);
}
