//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod batch_operation_repo;
pub mod collection_item_repo;
pub mod library_file_repo;
pub mod library_repo;
pub mod operation_log_repo;

pub use batch_operation_repo::BatchOperationRepo;
pub use collection_item_repo::CollectionItemRepo;
pub use library_file_repo::LibraryFileRepo;
pub use library_repo::LibraryRepo;
pub use operation_log_repo::OperationLogRepo;
