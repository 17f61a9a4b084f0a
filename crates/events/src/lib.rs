//! Bindery event bus and derived-metadata worker.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PlatformEvent`]: the domain event envelope published by the batch
//!   orchestrator after mutations.
//! - [`DerivedMetadataWorker`]: background consumer that refreshes library
//!   statistics after batch items change files.

pub mod bus;
pub mod derived;

pub use bus::{EventBus, PlatformEvent};
pub use derived::{DerivedMetadataWorker, LibraryStatsRefresher, PgLibraryStats};
