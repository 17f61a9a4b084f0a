//! Validated CBR -> CBZ conversion.
//!
//! [`ConversionPipeline::convert`] runs the following gates in order; a
//! failure at any gate aborts the conversion with the original untouched:
//!
//! 1. Precondition: the destination must not exist unless `overwrite`.
//! 2. Source validation: every source entry must read back. A corrupt source
//!    is quarantined when requested and the catalog knows the file.
//! 3. Extraction into a fresh scratch directory.
//! 4. Rebuild into a separate temp directory next to the destination.
//! 5. Destination validation of the rebuilt archive.
//! 6. Content equivalence: the output holds at least as many page images.
//! 7. Atomic commit by rename.
//! 8. Origin deletion, only after the commit and only when requested.
//! 9. Catalog sync of path, size and extension.
//! 10. Cleanup: both temp directories are dropped on every path.
//!
//! Every invocation writes an audit row to the operation log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bindery_core::archive_format::{converted_path, ArchiveFormat};
use bindery_core::operation::{OperationKind, OperationStatus};
use bindery_core::types::DbId;
use bindery_db::models::operation_log::CreateOperationLog;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::archive::{ArchiveBackend, ArchiveError};
use crate::catalog::{CatalogError, FileCatalog};

const EXTRACT_PREFIX: &str = "bindery-extract-";
const BUILD_PREFIX: &str = ".bindery-build-";

/// Per-batch conversion switches, stored in the batch `parameters`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOptions {
    /// Remove the source after a successful commit.
    #[serde(default = "default_delete_original")]
    pub delete_original: bool,
    /// Replace an existing destination.
    #[serde(default)]
    pub overwrite: bool,
    /// Move corrupt sources into the quarantine directory.
    #[serde(default)]
    pub quarantine: bool,
}

fn default_delete_original() -> bool {
    true
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            delete_original: true,
            overwrite: false,
            quarantine: false,
        }
    }
}

/// Result of a committed conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutcome {
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub original_size: u64,
    pub new_size: u64,
    pub image_count: usize,
    pub original_deleted: bool,
    /// Catalog record that now points at the destination.
    pub catalog_id: Option<DbId>,
    pub library_id: Option<DbId>,
}

/// Error type for a single conversion.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("source file not found: {0}")]
    SourceMissing(String),

    #[error("not a CBR archive: {0}")]
    UnsupportedSource(String),

    #[error("destination already exists: {0}")]
    DestinationExists(String),

    #[error("source archive is corrupt: {reason}")]
    CorruptSource {
        reason: String,
        quarantined_to: Option<String>,
    },

    #[error("extraction failed: {0}")]
    Extraction(ArchiveError),

    #[error("rebuild failed: {0}")]
    Build(ArchiveError),

    #[error("rebuilt archive is invalid: {0}")]
    InvalidOutput(String),

    #[error("content loss: source has {source_images} images, rebuilt archive has {output_images}")]
    ContentLoss {
        source_images: usize,
        output_images: usize,
    },

    #[error("commit failed: {0}")]
    Commit(std::io::Error),

    #[error("catalog sync failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// ConversionPipeline
// ---------------------------------------------------------------------------

/// Converts one archive at a time; holds no per-conversion state.
pub struct ConversionPipeline {
    backend: Arc<dyn ArchiveBackend>,
    catalog: Arc<dyn FileCatalog>,
    scratch_dir: Option<PathBuf>,
    quarantine_dir: Option<PathBuf>,
}

impl ConversionPipeline {
    pub fn new(backend: Arc<dyn ArchiveBackend>, catalog: Arc<dyn FileCatalog>) -> Self {
        Self {
            backend,
            catalog,
            scratch_dir: None,
            quarantine_dir: None,
        }
    }

    /// Parent directory for extraction temp dirs (system temp otherwise).
    pub fn with_scratch_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.scratch_dir = dir;
        self
    }

    /// Holding area for corrupt sources; quarantine is skipped without one.
    pub fn with_quarantine_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.quarantine_dir = dir;
        self
    }

    /// Convert `source` to a `.cbz` next to it.
    pub async fn convert(
        &self,
        source: &Path,
        options: &ConversionOptions,
        batch_id: Option<DbId>,
    ) -> Result<ConversionOutcome, ConversionError> {
        let destination = converted_path(source, ArchiveFormat::Cbz);
        let original_size = tokio::fs::metadata(source).await.map(|m| m.len()).ok();

        let result = self.run(source, &destination, options).await;

        match &result {
            Ok(outcome) => tracing::info!(
                path = %source.display(),
                destination = %destination.display(),
                images = outcome.image_count,
                original_deleted = outcome.original_deleted,
                "Archive converted"
            ),
            Err(e) => tracing::warn!(path = %source.display(), error = %e, "Archive conversion failed"),
        }

        self.audit(batch_id, source, &destination, original_size, &result)
            .await;
        result
    }

    async fn run(
        &self,
        source: &Path,
        destination: &Path,
        options: &ConversionOptions,
    ) -> Result<ConversionOutcome, ConversionError> {
        // 1. Precondition.
        let original_size = match tokio::fs::metadata(source).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConversionError::SourceMissing(source.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if ArchiveFormat::from_path(source) != Some(ArchiveFormat::Cbr) {
            return Err(ConversionError::UnsupportedSource(source.display().to_string()));
        }
        let destination_exists = tokio::fs::try_exists(destination).await?;
        if destination_exists && !options.overwrite {
            return Err(ConversionError::DestinationExists(
                destination.display().to_string(),
            ));
        }

        // 2. Source validation.
        let source_listing = self.backend.list_and_validate(source).await;
        if !source_listing.valid {
            let reason = source_listing
                .error
                .unwrap_or_else(|| "archive could not be read".to_string());
            let quarantined_to = if options.quarantine {
                self.quarantine(source, &reason).await?
            } else {
                None
            };
            return Err(ConversionError::CorruptSource {
                reason,
                quarantined_to,
            });
        }
        let source_images = source_listing.image_count();

        // 3. Extraction.
        let extract_dir = self.extraction_dir()?;
        self.backend
            .extract(source, extract_dir.path())
            .await
            .map_err(ConversionError::Extraction)?;

        // 4. Rebuild, on the destination's volume so the commit is a rename.
        let build_dir = build_dir_for(destination)?;
        let file_name = destination
            .file_name()
            .ok_or_else(|| ConversionError::UnsupportedSource(source.display().to_string()))?;
        let built = build_dir.path().join(file_name);
        self.backend
            .build(extract_dir.path(), &built)
            .await
            .map_err(ConversionError::Build)?;

        // 5. Destination validation.
        let output_listing = self.backend.list_and_validate(&built).await;
        if !output_listing.valid {
            return Err(ConversionError::InvalidOutput(
                output_listing
                    .error
                    .unwrap_or_else(|| "archive could not be read".to_string()),
            ));
        }

        // 6. Content equivalence.
        let output_images = output_listing.image_count();
        if output_images < source_images {
            return Err(ConversionError::ContentLoss {
                source_images,
                output_images,
            });
        }

        // 7. Atomic commit.
        if destination_exists {
            tokio::fs::remove_file(destination)
                .await
                .map_err(ConversionError::Commit)?;
        }
        tokio::fs::rename(&built, destination)
            .await
            .map_err(ConversionError::Commit)?;
        let new_size = tokio::fs::metadata(destination).await?.len();

        // 8. Origin deletion.
        let original_deleted = if options.delete_original {
            match tokio::fs::remove_file(source).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(path = %source.display(), error = %e, "Converted but could not delete original");
                    false
                }
            }
        } else {
            false
        };

        // 9. Catalog sync.
        let source_str = source.to_string_lossy();
        let record = self.catalog.find_by_path(&source_str).await?;
        if let Some(record) = &record {
            self.catalog
                .relocate(record.id, &destination.to_string_lossy(), new_size as i64)
                .await?;
        }

        // 10. `extract_dir` and `build_dir` drop here.
        Ok(ConversionOutcome {
            source_path: source.to_path_buf(),
            destination_path: destination.to_path_buf(),
            original_size,
            new_size,
            image_count: output_images,
            original_deleted,
            catalog_id: record.as_ref().map(|r| r.id),
            library_id: record.as_ref().map(|r| r.library_id),
        })
    }

    fn extraction_dir(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(EXTRACT_PREFIX);
        match &self.scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
    }

    /// Move a corrupt source into quarantine. Returns the new path, or
    /// `None` when there is no quarantine dir or no catalog record.
    async fn quarantine(&self, source: &Path, reason: &str) -> Result<Option<String>, ConversionError> {
        let Some(dir) = &self.quarantine_dir else {
            tracing::warn!(path = %source.display(), "Quarantine requested but no quarantine directory configured");
            return Ok(None);
        };
        let Some(record) = self.catalog.find_by_path(&source.to_string_lossy()).await? else {
            tracing::warn!(path = %source.display(), "Quarantine requested for an uncatalogued file");
            return Ok(None);
        };

        tokio::fs::create_dir_all(dir).await?;
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| record.id.to_string());
        let mut target = dir.join(&file_name);
        if tokio::fs::try_exists(&target).await? {
            target = dir.join(format!("{}-{file_name}", record.id));
        }
        move_file(source, &target).await?;

        let target = target.to_string_lossy().into_owned();
        self.catalog.quarantine(record.id, &target, reason).await?;
        tracing::info!(file_id = record.id, quarantine_path = %target, reason, "Corrupt archive quarantined");
        Ok(Some(target))
    }

    async fn audit(
        &self,
        batch_id: Option<DbId>,
        source: &Path,
        destination: &Path,
        original_size: Option<u64>,
        result: &Result<ConversionOutcome, ConversionError>,
    ) {
        let (status, new_size, original_deleted, error) = match result {
            Ok(outcome) => (OperationStatus::Success, Some(outcome.new_size), outcome.original_deleted, None),
            Err(e) => (OperationStatus::Failed, None, false, Some(e.to_string())),
        };
        let log = CreateOperationLog {
            batch_id,
            operation: OperationKind::Convert.as_str().to_string(),
            source_path: source.to_string_lossy().into_owned(),
            destination_path: Some(destination.to_string_lossy().into_owned()),
            status: status.as_str().to_string(),
            reversible: false,
            metadata: serde_json::json!({
                "source_format": ArchiveFormat::Cbr.extension(),
                "target_format": ArchiveFormat::Cbz.extension(),
                "original_size": original_size,
                "new_size": new_size,
                "original_deleted": original_deleted,
            }),
            error,
        };
        if let Err(e) = self.catalog.record_operation(log).await {
            tracing::error!(path = %source.display(), error = %e, "Failed to write conversion audit log");
        }
    }
}

fn build_dir_for(destination: &Path) -> std::io::Result<TempDir> {
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tempfile::Builder::new().prefix(BUILD_PREFIX).tempdir_in(parent)
}

/// Rename, falling back to copy + remove across volumes.
pub async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Err(rename_err) = tokio::fs::rename(from, to).await {
        if tokio::fs::copy(from, to).await.is_err() {
            return Err(rename_err);
        }
        tokio::fs::remove_file(from).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::write_zip;
    use crate::archive::{ArchiveListing, BuildSummary, ExtractSummary, LocalArchiveBackend};
    use crate::catalog::{CatalogRecord, CatalogSnapshot};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCatalog {
        records: Mutex<Vec<CatalogRecord>>,
        logs: Mutex<Vec<CreateOperationLog>>,
        quarantined: Mutex<Vec<(DbId, String)>>,
    }

    impl RecordingCatalog {
        fn with_file(path: &Path) -> Self {
            let catalog = Self::default();
            catalog.records.lock().unwrap().push(CatalogRecord {
                id: 11,
                library_id: 1,
                path: path.to_string_lossy().into_owned(),
                size_bytes: 0,
                metadata: serde_json::json!({}),
            });
            catalog
        }
    }

    #[async_trait]
    impl FileCatalog for RecordingCatalog {
        async fn find_by_path(&self, path: &str) -> Result<Option<CatalogRecord>, CatalogError> {
            Ok(self.records.lock().unwrap().iter().find(|r| r.path == path).cloned())
        }

        async fn relocate(&self, id: DbId, new_path: &str, size_bytes: i64) -> Result<(), CatalogError> {
            for record in self.records.lock().unwrap().iter_mut().filter(|r| r.id == id) {
                record.path = new_path.to_string();
                record.size_bytes = size_bytes;
            }
            Ok(())
        }

        async fn quarantine(&self, id: DbId, quarantine_path: &str, _reason: &str) -> Result<(), CatalogError> {
            self.quarantined.lock().unwrap().push((id, quarantine_path.to_string()));
            Ok(())
        }

        async fn remove(&self, _id: DbId) -> Result<bool, CatalogError> {
            Ok(false)
        }

        async fn register(
            &self,
            _snapshot: &CatalogSnapshot,
            _path: &str,
            _size_bytes: i64,
        ) -> Result<DbId, CatalogError> {
            Err(CatalogError::Unavailable("registration not expected".into()))
        }

        async fn write_metadata(&self, _id: DbId, _fields: &serde_json::Value) -> Result<(), CatalogError> {
            Ok(())
        }

        async fn record_operation(&self, log: CreateOperationLog) -> Result<DbId, CatalogError> {
            let mut logs = self.logs.lock().unwrap();
            logs.push(log);
            Ok(logs.len() as DbId)
        }
    }

    /// Drops the last extracted page before building.
    struct LossyBackend(LocalArchiveBackend);

    #[async_trait]
    impl ArchiveBackend for LossyBackend {
        async fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<ExtractSummary, ArchiveError> {
            let summary = self.0.extract(archive, dest_dir).await?;
            std::fs::remove_file(dest_dir.join("002.jpg"))?;
            Ok(ExtractSummary {
                file_count: summary.file_count - 1,
            })
        }

        async fn build(&self, src_dir: &Path, output: &Path) -> Result<BuildSummary, ArchiveError> {
            self.0.build(src_dir, output).await
        }

        async fn list_and_validate(&self, archive: &Path) -> ArchiveListing {
            self.0.list_and_validate(archive).await
        }
    }

    fn pipeline(catalog: Arc<RecordingCatalog>) -> ConversionPipeline {
        ConversionPipeline::new(Arc::new(LocalArchiveBackend::default()), catalog)
    }

    fn temp_entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn converts_zip_based_cbr_and_syncs_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Saga 001.cbr");
        write_zip(
            &source,
            &[("001.jpg", b"one"), ("002.jpg", b"two"), ("ComicInfo.xml", b"<ComicInfo/>")],
        );
        let catalog = Arc::new(RecordingCatalog::with_file(&source));

        let outcome = pipeline(catalog.clone())
            .convert(&source, &ConversionOptions::default(), Some(5))
            .await
            .unwrap();

        let destination = dir.path().join("Saga 001.cbz");
        assert_eq!(outcome.destination_path, destination);
        assert_eq!(outcome.image_count, 2);
        assert!(outcome.original_deleted);
        assert_eq!(outcome.catalog_id, Some(11));
        assert!(destination.exists());
        assert!(!source.exists());
        assert_eq!(temp_entries(dir.path()), vec!["Saga 001.cbz".to_string()]);

        let records = catalog.records.lock().unwrap();
        assert_eq!(records[0].path, destination.to_string_lossy());
        assert_eq!(records[0].size_bytes, outcome.new_size as i64);

        let logs = catalog.logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, "success");
        assert_eq!(logs[0].batch_id, Some(5));
        assert_eq!(logs[0].metadata["original_deleted"], true);
    }

    #[tokio::test]
    async fn existing_destination_fails_before_any_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();
        let source = dir.path().join("a.cbr");
        write_zip(&source, &[("001.jpg", b"one")]);
        std::fs::write(dir.path().join("a.cbz"), b"already here").unwrap();
        let catalog = Arc::new(RecordingCatalog::default());

        let result = pipeline(catalog.clone())
            .with_scratch_dir(Some(scratch.clone()))
            .convert(&source, &ConversionOptions::default(), None)
            .await;

        assert_matches!(result, Err(ConversionError::DestinationExists(_)));
        assert!(temp_entries(&scratch).is_empty());
        let mut names = temp_entries(dir.path());
        names.sort();
        assert_eq!(names, vec!["a.cbr", "a.cbz", "scratch"]);
        assert_eq!(catalog.logs.lock().unwrap()[0].status, "failed");
    }

    #[tokio::test]
    async fn overwrite_replaces_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.cbr");
        write_zip(&source, &[("001.jpg", b"one")]);
        std::fs::write(dir.path().join("a.cbz"), b"stale").unwrap();
        let options = ConversionOptions {
            overwrite: true,
            delete_original: false,
            ..ConversionOptions::default()
        };

        let outcome = pipeline(Arc::new(RecordingCatalog::default()))
            .convert(&source, &options, None)
            .await
            .unwrap();

        assert!(!outcome.original_deleted);
        assert!(source.exists());
        assert_ne!(std::fs::read(dir.path().join("a.cbz")).unwrap(), b"stale");
    }

    #[tokio::test]
    async fn corrupt_source_is_quarantined_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let quarantine = dir.path().join("quarantine");
        let source = dir.path().join("broken.cbr");
        std::fs::write(&source, b"definitely not an archive").unwrap();
        let catalog = Arc::new(RecordingCatalog::with_file(&source));
        let options = ConversionOptions {
            quarantine: true,
            ..ConversionOptions::default()
        };

        let result = pipeline(catalog.clone())
            .with_quarantine_dir(Some(quarantine.clone()))
            .convert(&source, &options, None)
            .await;

        let moved = quarantine.join("broken.cbr");
        assert_matches!(
            result,
            Err(ConversionError::CorruptSource { quarantined_to: Some(ref path), .. })
                if *path == moved.to_string_lossy()
        );
        assert!(!source.exists());
        assert!(moved.exists());
        assert_eq!(catalog.quarantined.lock().unwrap()[0].0, 11);
    }

    #[tokio::test]
    async fn corrupt_source_without_quarantine_is_left_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.cbr");
        std::fs::write(&source, b"garbage").unwrap();

        let result = pipeline(Arc::new(RecordingCatalog::with_file(&source)))
            .convert(&source, &ConversionOptions::default(), None)
            .await;

        assert_matches!(result, Err(ConversionError::CorruptSource { quarantined_to: None, .. }));
        assert!(source.exists());
    }

    #[tokio::test]
    async fn content_loss_leaves_source_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("book.cbr");
        write_zip(&source, &[("001.jpg", b"one"), ("002.jpg", b"two")]);
        let original_size = std::fs::metadata(&source).unwrap().len();
        let catalog = Arc::new(RecordingCatalog::with_file(&source));

        let result = ConversionPipeline::new(
            Arc::new(LossyBackend(LocalArchiveBackend::default())),
            catalog.clone(),
        )
        .convert(&source, &ConversionOptions::default(), None)
        .await;

        assert_matches!(
            result,
            Err(ConversionError::ContentLoss {
                source_images: 2,
                output_images: 1
            })
        );
        assert_eq!(std::fs::metadata(&source).unwrap().len(), original_size);
        assert!(!dir.path().join("book.cbz").exists());
        assert_eq!(temp_entries(dir.path()), vec!["book.cbr".to_string()]);
        assert_eq!(catalog.records.lock().unwrap()[0].path, source.to_string_lossy());
    }

    #[tokio::test]
    async fn cbz_sources_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("book.cbz");
        write_zip(&source, &[("001.jpg", b"one")]);

        let result = pipeline(Arc::new(RecordingCatalog::default()))
            .convert(&source, &ConversionOptions::default(), None)
            .await;

        assert_matches!(result, Err(ConversionError::UnsupportedSource(_)));
    }

    #[test]
    fn options_default_to_deleting_the_original() {
        let options: ConversionOptions = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(options, ConversionOptions::default());
        assert!(options.delete_original);
    }
}
