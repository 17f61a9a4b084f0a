//! Batch operation models and DTOs.
//!
//! Maps to the `batch_operations` and `batch_statuses` tables introduced in
//! migration 000002.

use bindery_core::batch::{BatchCounters, BatchStatus, BatchType, ErrorSummaryEntry};
use bindery_core::error::CoreError;
use bindery_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `batch_operations` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BatchOperation {
    pub id: DbId,
    pub batch_type: String,
    pub status_id: i16,
    pub library_id: Option<DbId>,
    pub total_items: i32,
    pub completed_items: i32,
    pub failed_items: i32,
    pub last_processed_id: Option<DbId>,
    pub error_summary: serde_json::Value,
    pub parameters: serde_json::Value,
    pub error_message: Option<String>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl BatchOperation {
    /// Resolve the stored status id.
    pub fn status(&self) -> Result<BatchStatus, CoreError> {
        BatchStatus::from_id(self.status_id)
    }

    /// Resolve the stored type string.
    pub fn kind(&self) -> Result<BatchType, CoreError> {
        BatchType::from_str_value(&self.batch_type)
    }

    /// Decode the persisted error summary. Malformed JSON yields an empty list.
    pub fn error_entries(&self) -> Vec<ErrorSummaryEntry> {
        serde_json::from_value(self.error_summary.clone()).unwrap_or_default()
    }

    /// Counters to resume from.
    pub fn counters(&self) -> BatchCounters {
        BatchCounters {
            total: self.total_items,
            completed: self.completed_items,
            failed: self.failed_items,
            last_processed_id: self.last_processed_id,
            errors: self.error_entries(),
        }
    }
}

/// DTO for inserting a new batch operation in `pending`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBatchOperation {
    pub batch_type: String,
    pub library_id: Option<DbId>,
    pub total_items: i32,
    pub parameters: serde_json::Value,
}

/// Progress snapshot written back while a batch executes.
#[derive(Debug, Clone)]
pub struct BatchCheckpoint {
    pub completed_items: i32,
    pub failed_items: i32,
    pub last_processed_id: Option<DbId>,
    pub error_summary: serde_json::Value,
}

impl From<&BatchCounters> for BatchCheckpoint {
    fn from(counters: &BatchCounters) -> Self {
        Self {
            completed_items: counters.completed,
            failed_items: counters.failed,
            last_processed_id: counters.last_processed_id,
            error_summary: serde_json::to_value(&counters.errors)
                .unwrap_or_else(|_| serde_json::Value::Array(Vec::new())),
        }
    }
}
