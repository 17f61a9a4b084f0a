use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bindery_pipeline::comic_info::{known_fields, write_comic_info};
use bindery_pipeline::FileCatalog;

use super::{expect_log, BatchContext, ItemExecutor, ItemSuccess};
use crate::error::ItemFailure;
use crate::store::WorkItem;

/// Rewrites the embedded `ComicInfo.xml` of an archive and mirrors the
/// fields into its catalog record.
///
/// The fields come from the item's operation log metadata.
pub struct MetadataExecutor {
    catalog: Arc<dyn FileCatalog>,
}

impl MetadataExecutor {
    pub fn new(catalog: Arc<dyn FileCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl ItemExecutor for MetadataExecutor {
    async fn run(&self, ctx: &BatchContext, item: &WorkItem) -> Result<ItemSuccess, ItemFailure> {
        let log = expect_log(item)?;
        let fields = log
            .metadata
            .as_object()
            .map(known_fields)
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ItemFailure::Invalid(format!("item {} has no metadata fields", log.id)))?;

        let path = PathBuf::from(&log.source_path);
        if !tokio::fs::try_exists(&path).await? {
            return Err(ItemFailure::SourceMissing(log.source_path.clone()));
        }
        write_comic_info(path, fields.clone()).await?;

        let record = self.catalog.find_by_path(&log.source_path).await?;
        if let Some(record) = &record {
            self.catalog
                .write_metadata(record.id, &serde_json::Value::Object(fields.clone()))
                .await?;
        }

        tracing::debug!(
            batch_id = ctx.batch_id,
            item_id = log.id,
            fields = fields.len(),
            "Archive metadata rewritten"
        );

        Ok(ItemSuccess {
            library_id: record.map(|r| r.library_id),
            reversible: false,
            metadata: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use assert_matches::assert_matches;
    use bindery_core::batch::BatchType;
    use bindery_db::models::operation_log::OperationLog;
    use chrono::Utc;
    use std::io::{Read, Write};

    fn item(path: &std::path::Path, metadata: serde_json::Value) -> WorkItem {
        WorkItem::Log(OperationLog {
            id: 1,
            batch_id: Some(1),
            operation: "metadata_update".into(),
            source_path: path.to_string_lossy().into_owned(),
            destination_path: None,
            status: "pending".into(),
            reversible: false,
            metadata,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    fn ctx() -> BatchContext {
        BatchContext {
            batch_id: 1,
            batch_type: BatchType::MetadataUpdate,
            library_id: None,
            parameters: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn writes_comic_info_and_catalog_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.cbz");
        {
            let mut writer = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
            writer
                .start_file("001.jpg", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"page").unwrap();
            writer.finish().unwrap();
        }
        let store = Arc::new(MemoryStore::new());
        let file_id = store.add_file(4, &path.to_string_lossy());

        let success = MetadataExecutor::new(store.clone())
            .run(&ctx(), &item(&path, serde_json::json!({"series": "Saga", "number": 1})))
            .await
            .unwrap();

        assert_eq!(success.library_id, Some(4));
        assert_eq!(store.file(file_id).unwrap().metadata["series"], "Saga");

        let mut archive = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
        let mut xml = String::new();
        archive
            .by_name("ComicInfo.xml")
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        assert!(xml.contains("<Series>Saga</Series>"));
    }

    #[tokio::test]
    async fn item_without_known_fields_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.cbz");

        let result = MetadataExecutor::new(Arc::new(MemoryStore::new()))
            .run(&ctx(), &item(&path, serde_json::json!({"rating": 5})))
            .await;

        assert_matches!(result, Err(ItemFailure::Invalid(_)));
    }
}
