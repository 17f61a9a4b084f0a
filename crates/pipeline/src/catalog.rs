//! File catalog seam.
//!
//! The pipeline and the item executors keep the catalog in step with the
//! filesystem through [`FileCatalog`]. [`PgFileCatalog`] is the production
//! implementation over the `bindery-db` repositories.

use std::path::Path;

use async_trait::async_trait;
use bindery_core::types::DbId;
use bindery_db::models::library_file::{CreateLibraryFile, LibraryFile};
use bindery_db::models::operation_log::CreateOperationLog;
use bindery_db::repositories::{LibraryFileRepo, OperationLogRepo};
use bindery_db::DbPool;
use serde::{Deserialize, Serialize};

/// Error type for catalog access.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// The part of a catalog record the engine reads.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    pub id: DbId,
    pub library_id: DbId,
    pub path: String,
    pub size_bytes: i64,
    pub metadata: serde_json::Value,
}

impl From<LibraryFile> for CatalogRecord {
    fn from(file: LibraryFile) -> Self {
        Self {
            id: file.id,
            library_id: file.library_id,
            path: file.path,
            size_bytes: file.size_bytes,
            metadata: file.metadata,
        }
    }
}

/// What a catalog record needs to be registered again after its file is
/// put back, e.g. when a trashed delete is restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub library_id: DbId,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl From<&CatalogRecord> for CatalogSnapshot {
    fn from(record: &CatalogRecord) -> Self {
        Self {
            library_id: record.library_id,
            metadata: record.metadata.clone(),
        }
    }
}

/// Catalog operations used while mutating files.
#[async_trait]
pub trait FileCatalog: Send + Sync {
    /// The record referencing an absolute path, if any.
    async fn find_by_path(&self, path: &str) -> Result<Option<CatalogRecord>, CatalogError>;

    /// Point a record at its new location. Filename and extension are
    /// derived from `new_path`.
    async fn relocate(&self, id: DbId, new_path: &str, size_bytes: i64) -> Result<(), CatalogError>;

    /// Record that the file was moved into quarantine.
    async fn quarantine(&self, id: DbId, quarantine_path: &str, reason: &str) -> Result<(), CatalogError>;

    /// Drop a record whose file is gone. Returns `true` if one was removed.
    async fn remove(&self, id: DbId) -> Result<bool, CatalogError>;

    /// Register a file at `path` from a snapshot, returning the new id.
    async fn register(
        &self,
        snapshot: &CatalogSnapshot,
        path: &str,
        size_bytes: i64,
    ) -> Result<DbId, CatalogError>;

    /// Merge fields into the record's metadata.
    async fn write_metadata(&self, id: DbId, fields: &serde_json::Value) -> Result<(), CatalogError>;

    /// Append an operation log row, returning its id.
    async fn record_operation(&self, log: CreateOperationLog) -> Result<DbId, CatalogError>;
}

/// Filename and lowercase extension of a path.
pub fn path_parts(path: &str) -> (String, String) {
    let path = Path::new(path);
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    (filename, extension)
}

// ---------------------------------------------------------------------------
// PgFileCatalog
// ---------------------------------------------------------------------------

/// Postgres-backed catalog.
#[derive(Clone)]
pub struct PgFileCatalog {
    pool: DbPool,
}

impl PgFileCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileCatalog for PgFileCatalog {
    async fn find_by_path(&self, path: &str) -> Result<Option<CatalogRecord>, CatalogError> {
        Ok(LibraryFileRepo::find_by_path(&self.pool, path)
            .await?
            .map(CatalogRecord::from))
    }

    async fn relocate(&self, id: DbId, new_path: &str, size_bytes: i64) -> Result<(), CatalogError> {
        let (filename, extension) = path_parts(new_path);
        LibraryFileRepo::relocate(&self.pool, id, new_path, &filename, &extension, size_bytes).await?;
        Ok(())
    }

    async fn quarantine(&self, id: DbId, quarantine_path: &str, reason: &str) -> Result<(), CatalogError> {
        LibraryFileRepo::quarantine(&self.pool, id, quarantine_path, reason).await?;
        Ok(())
    }

    async fn remove(&self, id: DbId) -> Result<bool, CatalogError> {
        Ok(LibraryFileRepo::delete(&self.pool, id).await?)
    }

    async fn register(
        &self,
        snapshot: &CatalogSnapshot,
        path: &str,
        size_bytes: i64,
    ) -> Result<DbId, CatalogError> {
        let (filename, extension) = path_parts(path);
        let file = LibraryFileRepo::create(
            &self.pool,
            &CreateLibraryFile {
                library_id: snapshot.library_id,
                path: path.to_string(),
                filename,
                extension,
                size_bytes,
            },
        )
        .await?;
        if snapshot.metadata.as_object().is_some_and(|m| !m.is_empty()) {
            LibraryFileRepo::merge_metadata(&self.pool, file.id, &snapshot.metadata).await?;
        }
        Ok(file.id)
    }

    async fn write_metadata(&self, id: DbId, fields: &serde_json::Value) -> Result<(), CatalogError> {
        LibraryFileRepo::merge_metadata(&self.pool, id, fields).await?;
        Ok(())
    }

    async fn record_operation(&self, log: CreateOperationLog) -> Result<DbId, CatalogError> {
        Ok(OperationLogRepo::create(&self.pool, &log).await?.id)
    }
}
