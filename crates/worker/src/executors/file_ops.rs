//! Rename, move, restore and delete.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bindery_core::operation::CATALOG_RECORD_KEY;
use bindery_db::models::operation_log::OperationLog;
use bindery_pipeline::conversion::move_file;
use bindery_pipeline::{CatalogSnapshot, FileCatalog};

use super::{expect_log, BatchContext, ItemExecutor, ItemSuccess};
use crate::error::ItemFailure;
use crate::store::WorkItem;

/// Metadata key under which a trashed file's location is recorded.
pub const TRASH_PATH_KEY: &str = "trash_path";

/// Where a deleted file was moved to, if it went to the trash.
pub fn trash_path(log: &OperationLog) -> Option<&str> {
    log.metadata.get(TRASH_PATH_KEY).and_then(|v| v.as_str())
}

/// Record snapshot carried by a restore item, if any.
fn catalog_snapshot(log: &OperationLog) -> Result<Option<CatalogSnapshot>, ItemFailure> {
    log.metadata
        .get(CATALOG_RECORD_KEY)
        .map(|value| serde_json::from_value(value.clone()))
        .transpose()
        .map_err(|e| ItemFailure::Invalid(format!("item {} has a malformed catalog record: {e}", log.id)))
}

async fn ensure_source(path: &Path) -> Result<(), ItemFailure> {
    if !tokio::fs::try_exists(path).await? {
        return Err(ItemFailure::SourceMissing(path.display().to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// MoveExecutor
// ---------------------------------------------------------------------------

/// Moves `source_path` to `destination_path` and mirrors the new path into
/// the catalog. Serves rename, template rename, move and restore batches.
///
/// A file without a catalog record whose item carries a record snapshot
/// (a restored trashed delete) is registered again at its destination.
pub struct MoveExecutor {
    catalog: Arc<dyn FileCatalog>,
}

impl MoveExecutor {
    pub fn new(catalog: Arc<dyn FileCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl ItemExecutor for MoveExecutor {
    async fn run(&self, ctx: &BatchContext, item: &WorkItem) -> Result<ItemSuccess, ItemFailure> {
        let log = expect_log(item)?;
        let source = Path::new(&log.source_path);
        let destination = log
            .destination_path
            .as_deref()
            .map(Path::new)
            .ok_or_else(|| ItemFailure::Invalid(format!("item {} has no destination", log.id)))?;

        ensure_source(source).await?;
        if tokio::fs::try_exists(destination).await? {
            return Err(ItemFailure::DestinationExists(destination.display().to_string()));
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        move_file(source, destination).await?;

        let size = tokio::fs::metadata(destination).await?.len() as i64;
        let new_path = destination.to_string_lossy();
        let library_id = match self.catalog.find_by_path(&log.source_path).await? {
            Some(record) => {
                self.catalog.relocate(record.id, &new_path, size).await?;
                Some(record.library_id)
            }
            None => match catalog_snapshot(log)? {
                Some(snapshot) => {
                    let id = self.catalog.register(&snapshot, &new_path, size).await?;
                    tracing::debug!(item_id = log.id, file_id = id, "Catalog record re-registered");
                    Some(snapshot.library_id)
                }
                None => None,
            },
        };

        tracing::debug!(
            batch_id = ctx.batch_id,
            item_id = log.id,
            from = %source.display(),
            to = %destination.display(),
            "File moved"
        );

        Ok(ItemSuccess {
            library_id,
            reversible: true,
            metadata: None,
        })
    }
}

// ---------------------------------------------------------------------------
// DeleteExecutor
// ---------------------------------------------------------------------------

/// Deletes a file and its catalog record.
///
/// With a trash directory the file is moved there and the operation is
/// reversible; the removed record is snapshotted into the log metadata so
/// a restore can register it again. Without one the file is removed for good.
pub struct DeleteExecutor {
    catalog: Arc<dyn FileCatalog>,
    trash_dir: Option<PathBuf>,
}

impl DeleteExecutor {
    pub fn new(catalog: Arc<dyn FileCatalog>, trash_dir: Option<PathBuf>) -> Self {
        Self { catalog, trash_dir }
    }
}

#[async_trait]
impl ItemExecutor for DeleteExecutor {
    async fn run(&self, ctx: &BatchContext, item: &WorkItem) -> Result<ItemSuccess, ItemFailure> {
        let log = expect_log(item)?;
        let source = Path::new(&log.source_path);
        ensure_source(source).await?;

        let record = self.catalog.find_by_path(&log.source_path).await?;

        let success = match &self.trash_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                let target = dir.join(format!("{}-{}", log.id, log.filename()));
                move_file(source, &target).await?;

                let mut metadata = log.metadata.clone();
                if !metadata.is_object() {
                    metadata = serde_json::json!({});
                }
                metadata[TRASH_PATH_KEY] = serde_json::Value::String(target.to_string_lossy().into_owned());
                if let Some(record) = &record {
                    metadata[CATALOG_RECORD_KEY] = serde_json::to_value(CatalogSnapshot::from(record))
                        .map_err(|e| ItemFailure::Invalid(format!("catalog snapshot: {e}")))?;
                }
                ItemSuccess {
                    library_id: None,
                    reversible: true,
                    metadata: Some(metadata),
                }
            }
            None => {
                tokio::fs::remove_file(source).await?;
                ItemSuccess::default()
            }
        };

        if let Some(record) = &record {
            self.catalog.remove(record.id).await?;
        }

        tracing::debug!(
            batch_id = ctx.batch_id,
            item_id = log.id,
            path = %source.display(),
            trashed = success.reversible,
            "File deleted"
        );

        Ok(ItemSuccess {
            library_id: record.map(|r| r.library_id),
            ..success
        })
    }
}
