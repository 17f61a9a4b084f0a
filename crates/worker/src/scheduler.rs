//! Single-flight guard for batch execution.
//!
//! A [`BatchScheduler`] admits at most one executing batch at a time. The
//! slot holds the batch id and the [`CancellationToken`] of that execution;
//! it is released when the returned [`ActiveBatch`] guard drops.

use std::sync::{Mutex, MutexGuard, PoisonError};

use bindery_core::types::DbId;
use tokio_util::sync::CancellationToken;

use crate::error::BatchError;

#[derive(Debug)]
struct Slot {
    batch_id: DbId,
    cancel: CancellationToken,
}

/// Owner of the active-batch slot.
#[derive(Debug, Default)]
pub struct BatchScheduler {
    slot: Mutex<Option<Slot>>,
}

impl BatchScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Slot>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot for `batch_id`, or fail with [`BatchError::Busy`].
    pub fn try_acquire(&self, batch_id: DbId) -> Result<ActiveBatch<'_>, BatchError> {
        let mut slot = self.slot();
        if let Some(active) = slot.as_ref() {
            return Err(BatchError::Busy {
                active: active.batch_id,
            });
        }
        let cancel = CancellationToken::new();
        *slot = Some(Slot {
            batch_id,
            cancel: cancel.clone(),
        });
        Ok(ActiveBatch {
            scheduler: self,
            batch_id,
            cancel,
        })
    }

    /// Ask the executing batch to pause after its current item.
    ///
    /// Returns `false` when nothing is executing.
    pub fn request_cancellation(&self) -> bool {
        match self.slot().as_ref() {
            Some(active) => {
                tracing::info!(batch_id = active.batch_id, "Cancellation requested");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn has_active_batch(&self) -> bool {
        self.slot().is_some()
    }

    pub fn active_batch_id(&self) -> Option<DbId> {
        self.slot().as_ref().map(|active| active.batch_id)
    }
}

/// Guard for the claimed slot.
#[derive(Debug)]
pub struct ActiveBatch<'a> {
    scheduler: &'a BatchScheduler,
    batch_id: DbId,
    cancel: CancellationToken,
}

impl ActiveBatch<'_> {
    pub fn batch_id(&self) -> DbId {
        self.batch_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for ActiveBatch<'_> {
    fn drop(&mut self) {
        let mut slot = self.scheduler.slot();
        if slot.as_ref().is_some_and(|active| active.batch_id == self.batch_id) {
            *slot = None;
        }
    }
}
