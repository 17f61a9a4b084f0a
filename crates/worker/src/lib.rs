//! Batch job engine.
//!
//! The [`orchestrator::BatchOrchestrator`] drives durable, resumable bulk
//! file operations. Each batch type is handled by an item executor from
//! [`executors`]; progress is persisted through a [`store::BatchStore`].

pub mod config;
pub mod error;
pub mod executors;
pub mod orchestrator;
pub mod progress;
pub mod scheduler;
pub mod store;

pub use error::{BatchError, ItemFailure, StoreError};
pub use orchestrator::{
    BatchOrchestrator, BatchProgress, BatchResult, NewBatchRequest, OrchestratorSettings,
};
pub use progress::{ProgressSink, ProgressUpdate};
pub use scheduler::BatchScheduler;
