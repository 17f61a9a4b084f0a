//! Batch operation vocabulary and state machine rules.
//!
//! Provides the batch type and status enums, the transition table that the
//! orchestrator drives, progress arithmetic, and the in-memory counters that
//! are checkpointed to the store. Everything here is pure; persistence lives
//! in `bindery_db` and execution in `bindery_worker`.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::operation::OperationKind;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of work items accepted by a single batch.
pub const MAX_BATCH_ITEMS: usize = 10_000;

/// Valid batch type strings (stored in DB).
pub const TYPE_CONVERT: &str = "convert";
pub const TYPE_RENAME: &str = "rename";
pub const TYPE_MOVE: &str = "move";
pub const TYPE_DELETE: &str = "delete";
pub const TYPE_METADATA_UPDATE: &str = "metadata_update";
pub const TYPE_TEMPLATE_RENAME: &str = "template_rename";
pub const TYPE_RESTORE_ORIGINAL: &str = "restore_original";

/// All valid batch type strings.
pub const VALID_BATCH_TYPES: &[&str] = &[
    TYPE_CONVERT,
    TYPE_RENAME,
    TYPE_MOVE,
    TYPE_DELETE,
    TYPE_METADATA_UPDATE,
    TYPE_TEMPLATE_RENAME,
    TYPE_RESTORE_ORIGINAL,
];

// ---------------------------------------------------------------------------
// BatchType
// ---------------------------------------------------------------------------

/// Kind of bulk job. Each type has exactly one item executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    Convert,
    Rename,
    Move,
    Delete,
    MetadataUpdate,
    TemplateRename,
    RestoreOriginal,
}

impl BatchType {
    /// Convert from a database string value.
    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        match s {
            TYPE_CONVERT => Ok(Self::Convert),
            TYPE_RENAME => Ok(Self::Rename),
            TYPE_MOVE => Ok(Self::Move),
            TYPE_DELETE => Ok(Self::Delete),
            TYPE_METADATA_UPDATE => Ok(Self::MetadataUpdate),
            TYPE_TEMPLATE_RENAME => Ok(Self::TemplateRename),
            TYPE_RESTORE_ORIGINAL => Ok(Self::RestoreOriginal),
            _ => Err(CoreError::Validation(format!(
                "Invalid batch type '{s}'. Must be one of: {}",
                VALID_BATCH_TYPES.join(", ")
            ))),
        }
    }

    /// Convert to the database string value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Convert => TYPE_CONVERT,
            Self::Rename => TYPE_RENAME,
            Self::Move => TYPE_MOVE,
            Self::Delete => TYPE_DELETE,
            Self::MetadataUpdate => TYPE_METADATA_UPDATE,
            Self::TemplateRename => TYPE_TEMPLATE_RENAME,
            Self::RestoreOriginal => TYPE_RESTORE_ORIGINAL,
        }
    }

    /// Library-wide batch types must be scoped to a library.
    pub fn requires_library(&self) -> bool {
        matches!(self, Self::Convert)
    }

    /// Types gated by the global "renaming enabled" feature flag.
    pub fn is_renaming(&self) -> bool {
        matches!(self, Self::Rename | Self::TemplateRename)
    }

    /// The operation log kind each item of this batch type must carry.
    ///
    /// Returns `None` for conversion, whose items are catalog files rather
    /// than pre-created operation log rows.
    pub fn item_operation(&self) -> Option<OperationKind> {
        match self {
            Self::Convert => None,
            Self::Rename | Self::TemplateRename => Some(OperationKind::Rename),
            Self::Move => Some(OperationKind::Move),
            Self::Delete => Some(OperationKind::Delete),
            Self::MetadataUpdate => Some(OperationKind::MetadataUpdate),
            Self::RestoreOriginal => Some(OperationKind::Restore),
        }
    }
}

impl std::fmt::Display for BatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// BatchStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a batch.
///
/// Discriminants match the seed order of the `batch_statuses` lookup table.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending = 1,
    InProgress = 2,
    Paused = 3,
    Completed = 4,
    Failed = 5,
    Cancelled = 6,
}

impl BatchStatus {
    /// Return the database status ID.
    pub fn id(self) -> i16 {
        self as i16
    }

    /// Resolve a database status ID.
    pub fn from_id(id: i16) -> Result<Self, CoreError> {
        match id {
            1 => Ok(Self::Pending),
            2 => Ok(Self::InProgress),
            3 => Ok(Self::Paused),
            4 => Ok(Self::Completed),
            5 => Ok(Self::Failed),
            6 => Ok(Self::Cancelled),
            other => Err(CoreError::Validation(format!(
                "Unknown batch status id {other}"
            ))),
        }
    }

    /// Lookup-table name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled batches never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Apply a transition, returning the resulting status.
    pub fn apply(self, transition: BatchTransition) -> Result<Self, InvalidTransition> {
        use BatchStatus::*;
        use BatchTransition as T;

        let next = match (self, transition) {
            (Pending | Paused, T::Start) => InProgress,
            (InProgress, T::Finish { completed, total }) => final_status(completed, total),
            (InProgress, T::Fail) => Failed,
            (InProgress, T::Pause) => Paused,
            (InProgress, T::Recover) => Paused,
            (Paused, T::Abandon) => Cancelled,
            (from, transition) => return Err(InvalidTransition { from, transition }),
        };
        Ok(next)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that move a batch between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchTransition {
    /// Start a pending batch or resume a paused one.
    Start,
    /// Every item was processed.
    Finish { completed: i32, total: i32 },
    /// An infrastructure failure aborted the run.
    Fail,
    /// Cancellation was observed between items.
    Pause,
    /// The process restarted while the batch was in progress.
    Recover,
    /// The caller discarded a paused batch.
    Abandon,
}

impl BatchTransition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "execute",
            Self::Finish { .. } => "finish",
            Self::Fail => "fail",
            Self::Pause => "pause",
            Self::Recover => "recover",
            Self::Abandon => "abandon",
        }
    }
}

/// A transition that the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {} a batch that is {from}", .transition.name())]
pub struct InvalidTransition {
    pub from: BatchStatus,
    pub transition: BatchTransition,
}

/// Terminal status of a batch whose items were all processed.
///
/// At least one success completes the batch. A non-empty batch with no
/// successes fails. An empty batch completes.
pub fn final_status(completed: i32, total: i32) -> BatchStatus {
    if completed > 0 || total == 0 {
        BatchStatus::Completed
    } else {
        BatchStatus::Failed
    }
}

/// Percentage of processed items, `0.0` for an empty batch.
pub fn progress_percent(completed: i32, failed: i32, total: i32) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    f64::from(completed + failed) / f64::from(total) * 100.0
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// One failed item as recorded in a batch's error summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummaryEntry {
    pub item_id: DbId,
    pub filename: String,
    pub error: String,
}

/// Running counters of an executing batch.
///
/// Loaded from the persisted record on start/resume and checkpointed back
/// to the store as items complete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchCounters {
    pub total: i32,
    pub completed: i32,
    pub failed: i32,
    pub last_processed_id: Option<DbId>,
    pub errors: Vec<ErrorSummaryEntry>,
}

impl BatchCounters {
    /// Number of items handled so far, successful or not.
    pub fn processed(&self) -> i32 {
        self.completed + self.failed
    }

    /// Whether every item of the batch has been handled.
    pub fn is_exhausted(&self) -> bool {
        self.processed() >= self.total
    }

    pub fn record_success(&mut self, item_id: DbId) {
        self.completed += 1;
        self.last_processed_id = Some(item_id);
    }

    pub fn record_failure(&mut self, item_id: DbId, filename: &str, error: &str) {
        self.failed += 1;
        self.last_processed_id = Some(item_id);
        self.errors.push(ErrorSummaryEntry {
            item_id,
            filename: filename.to_string(),
            error: error.to_string(),
        });
    }

    pub fn progress_percent(&self) -> f64 {
        progress_percent(self.completed, self.failed, self.total)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate that an item count is within allowed bounds.
pub fn validate_item_count(count: usize) -> Result<(), CoreError> {
    if count > MAX_BATCH_ITEMS {
        return Err(CoreError::Validation(format!(
            "Batch of {count} items exceeds maximum of {MAX_BATCH_ITEMS}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
