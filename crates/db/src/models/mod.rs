//! Domain model structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - A `Deserialize` create DTO for inserts

pub mod batch_operation;
pub mod collection_item;
pub mod library;
pub mod library_file;
pub mod operation_log;
