//! Error taxonomy of the batch engine.
//!
//! - [`BatchError`]: returned by orchestrator operations. Validation and
//!   feature-flag errors persist nothing; `Store` and `UnknownBatchType`
//!   abort a run after the batch was marked failed.
//! - [`ItemFailure`]: one item could not be processed. Counted and recorded
//!   in the error summary, never aborts the batch.
//! - [`StoreError`]: the batch store could not be read or written.

use bindery_core::batch::InvalidTransition;
use bindery_core::error::CoreError;
use bindery_core::types::DbId;
use bindery_pipeline::{ArchiveError, CatalogError, ConversionError};

/// Error type for batch store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(#[from] CoreError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Error type for orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("batch {0} not found")]
    NotFound(DbId),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("batch {active} is already executing")]
    Busy { active: DbId },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("feature disabled: {0}")]
    FeatureDisabled(String),

    #[error("no executor for batch type '{0}'")]
    UnknownBatchType(String),

    #[error("batch store error: {0}")]
    Store(#[from] StoreError),
}

impl From<InvalidTransition> for BatchError {
    fn from(e: InvalidTransition) -> Self {
        BatchError::InvalidState(e.to_string())
    }
}

impl From<CoreError> for BatchError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Validation(msg) => BatchError::Validation(msg),
        }
    }
}

/// Why a single item failed.
#[derive(Debug, thiserror::Error)]
pub enum ItemFailure {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("source file not found: {0}")]
    SourceMissing(String),

    #[error("destination already exists: {0}")]
    DestinationExists(String),

    #[error("invalid item: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("executor panicked: {0}")]
    Panicked(String),
}
