//! Derived-metadata refresh.
//!
//! Batch items move, rename, convert and delete files, which invalidates the
//! per-library aggregates (`file_count`, `total_size_bytes`). Rather than
//! recompute them inside the per-item loop, the orchestrator publishes
//! `batch.item_succeeded` events carrying the affected `library_id`; the
//! [`DerivedMetadataWorker`] collects them and refreshes each dirty library
//! once, when the batch finishes or on a periodic tick.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bindery_core::types::DbId;
use bindery_db::repositories::LibraryRepo;
use bindery_db::DbPool;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::bus::{PlatformEvent, EVENT_BATCH_FINISHED, EVENT_BATCH_ITEM_SUCCEEDED};

/// How often dirty libraries are flushed while a batch is still running.
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Refresher seam
// ---------------------------------------------------------------------------

/// Recomputes the derived statistics of one library.
#[async_trait]
pub trait LibraryStatsRefresher: Send + Sync {
    async fn refresh(&self, library_id: DbId) -> Result<(), sqlx::Error>;
}

/// Postgres-backed refresher.
pub struct PgLibraryStats {
    pool: DbPool,
}

impl PgLibraryStats {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LibraryStatsRefresher for PgLibraryStats {
    async fn refresh(&self, library_id: DbId) -> Result<(), sqlx::Error> {
        match LibraryRepo::refresh_stats(&self.pool, library_id).await? {
            Some(library) => tracing::debug!(
                library_id,
                file_count = library.file_count,
                total_size_bytes = library.total_size_bytes,
                "Library stats refreshed"
            ),
            None => tracing::debug!(library_id, "Library vanished before stats refresh"),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DerivedMetadataWorker
// ---------------------------------------------------------------------------

/// Background service that keeps library aggregates in step with batch work.
pub struct DerivedMetadataWorker {
    refresher: Arc<dyn LibraryStatsRefresher>,
    flush_interval: Duration,
}

impl DerivedMetadataWorker {
    pub fn new(refresher: Arc<dyn LibraryStatsRefresher>) -> Self {
        Self {
            refresher,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Run the worker loop until cancelled or the bus is dropped.
    ///
    /// Pending libraries are flushed one final time before returning.
    pub async fn run(&self, mut rx: broadcast::Receiver<PlatformEvent>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.flush_interval);
        let mut dirty = BTreeSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Derived metadata worker cancelled");
                    break;
                }
                received = rx.recv() => match received {
                    Ok(event) => {
                        if self.observe(&event, &mut dirty) {
                            self.flush(&mut dirty).await;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Derived metadata worker lagged behind the event bus");
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("Event bus closed, derived metadata worker stopping");
                        break;
                    }
                },
                _ = interval.tick() => {
                    self.flush(&mut dirty).await;
                }
            }
        }

        self.flush(&mut dirty).await;
    }

    /// Record the event; returns true when dirty libraries should be flushed now.
    fn observe(&self, event: &PlatformEvent, dirty: &mut BTreeSet<DbId>) -> bool {
        match event.event_type.as_str() {
            EVENT_BATCH_ITEM_SUCCEEDED => {
                if let Some(library_id) = event.library_id() {
                    dirty.insert(library_id);
                }
                false
            }
            EVENT_BATCH_FINISHED => {
                if let Some(library_id) = event.library_id() {
                    dirty.insert(library_id);
                }
                true
            }
            _ => false,
        }
    }

    async fn flush(&self, dirty: &mut BTreeSet<DbId>) {
        if dirty.is_empty() {
            return;
        }
        let pending = std::mem::take(dirty);
        let count = pending.len();
        for library_id in pending {
            if let Err(e) = self.refresher.refresh(library_id).await {
                tracing::error!(library_id, error = %e, "Failed to refresh library stats");
            }
        }
        tracing::debug!(count, "Flushed derived library metadata");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
