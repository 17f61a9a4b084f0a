//! Archive transform backend.
//!
//! [`LocalArchiveBackend`] handles ZIP containers in-process with the `zip`
//! crate and delegates RAR containers to the `unrar` command-line tool. The
//! container is detected from the file signature, not the extension, so a
//! `.cbr` that is really a ZIP is handled in-process.
//!
//! Output archives are always ZIP with stored (uncompressed) entries: comic
//! pages are already-compressed images.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bindery_core::archive_format::count_image_entries;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Default name of the RAR tool looked up on `PATH`.
pub const DEFAULT_UNRAR_BIN: &str = "unrar";

/// Error type for archive operations.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("unrar binary not found: {0}")]
    ToolNotFound(io::Error),

    #[error("unrar execution failed (exit code {exit_code:?}): {stderr}")]
    ToolFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("unrecognised archive signature: {0}")]
    UnknownFormat(String),

    #[error("archive entry escapes the extraction directory: {0}")]
    UnsafeEntry(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("archive task failed: {0}")]
    Task(String),
}

/// Result of an extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Regular files written into the destination directory.
    pub file_count: usize,
}

/// Result of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSummary {
    /// Regular files stored in the archive.
    pub file_count: usize,
    /// Size in bytes of the written archive.
    pub size: u64,
}

/// Listing of an archive whose every entry could be read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveListing {
    pub valid: bool,
    /// File entry names (directories excluded).
    pub entries: Vec<String>,
    pub error: Option<String>,
}

impl ArchiveListing {
    pub fn valid(entries: Vec<String>) -> Self {
        Self {
            valid: true,
            entries,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            entries: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Number of page images in the listing.
    pub fn image_count(&self) -> usize {
        count_image_entries(&self.entries)
    }
}

/// The operations the conversion pipeline needs from an archiver.
#[async_trait]
pub trait ArchiveBackend: Send + Sync {
    /// Extract every entry of `archive` into `dest_dir`.
    async fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<ExtractSummary, ArchiveError>;

    /// Build a ZIP archive at `output` from the contents of `src_dir`.
    async fn build(&self, src_dir: &Path, output: &Path) -> Result<BuildSummary, ArchiveError>;

    /// Open the archive and read every entry. Never fails; problems are
    /// reported through [`ArchiveListing::error`].
    async fn list_and_validate(&self, archive: &Path) -> ArchiveListing;
}

// ---------------------------------------------------------------------------
// Container detection
// ---------------------------------------------------------------------------

/// Physical container of an archive file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Zip,
    Rar,
}

const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_ARCHIVE: &[u8] = b"PK\x05\x06";
const RAR_SIGNATURE: &[u8] = b"Rar!\x1a\x07";

/// Detect the container from the leading bytes of the file.
pub fn sniff_container(path: &Path) -> Result<Container, ArchiveError> {
    let mut header = [0u8; 8];
    let mut file = File::open(path)?;
    let read = file.read(&mut header)?;
    let header = &header[..read];

    if header.starts_with(ZIP_LOCAL_HEADER) || header.starts_with(ZIP_EMPTY_ARCHIVE) {
        Ok(Container::Zip)
    } else if header.starts_with(RAR_SIGNATURE) {
        Ok(Container::Rar)
    } else {
        Err(ArchiveError::UnknownFormat(path.display().to_string()))
    }
}

// ---------------------------------------------------------------------------
// LocalArchiveBackend
// ---------------------------------------------------------------------------

/// Archive backend working on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalArchiveBackend {
    unrar_bin: PathBuf,
}

impl LocalArchiveBackend {
    pub fn new(unrar_bin: impl Into<PathBuf>) -> Self {
        Self {
            unrar_bin: unrar_bin.into(),
        }
    }

    async fn detect(&self, archive: &Path) -> Result<Container, ArchiveError> {
        let path = archive.to_path_buf();
        blocking(move || sniff_container(&path)).await
    }

    /// Run `unrar` with the given arguments, returning stdout.
    async fn unrar(&self, args: &[&str], archive: &Path, dest: Option<&Path>) -> Result<String, ArchiveError> {
        let mut command = tokio::process::Command::new(&self.unrar_bin);
        // -p- never prompts for a password; -y assumes yes on all queries.
        command.args(args).args(["-p-", "-y"]).arg(archive);
        if let Some(dest) = dest {
            // unrar treats the destination as a directory only with a trailing separator.
            let mut dir = dest.as_os_str().to_owned();
            dir.push(std::path::MAIN_SEPARATOR_STR);
            command.arg(dir);
        }

        let output = command.output().await.map_err(ArchiveError::ToolNotFound)?;

        if !output.status.success() {
            return Err(ArchiveError::ToolFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn rar_listing(&self, archive: &Path) -> Result<Vec<String>, ArchiveError> {
        // `t` decompresses every entry and checks its CRC.
        self.unrar(&["t"], archive, None).await?;
        let bare = self.unrar(&["lb"], archive, None).await?;
        Ok(bare
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| line.replace('\\', "/"))
            .collect())
    }
}

impl Default for LocalArchiveBackend {
    fn default() -> Self {
        Self::new(DEFAULT_UNRAR_BIN)
    }
}

#[async_trait]
impl ArchiveBackend for LocalArchiveBackend {
    async fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<ExtractSummary, ArchiveError> {
        match self.detect(archive).await? {
            Container::Zip => {
                let archive = archive.to_path_buf();
                let dest = dest_dir.to_path_buf();
                let file_count = blocking(move || zip_extract(&archive, &dest)).await?;
                Ok(ExtractSummary { file_count })
            }
            Container::Rar => {
                tokio::fs::create_dir_all(dest_dir).await?;
                self.unrar(&["x", "-o+"], archive, Some(dest_dir)).await?;
                let dest = dest_dir.to_path_buf();
                let file_count = blocking(move || count_extracted(&dest)).await?;
                Ok(ExtractSummary { file_count })
            }
        }
    }

    async fn build(&self, src_dir: &Path, output: &Path) -> Result<BuildSummary, ArchiveError> {
        let src = src_dir.to_path_buf();
        let out = output.to_path_buf();
        blocking(move || zip_build(&src, &out)).await
    }

    async fn list_and_validate(&self, archive: &Path) -> ArchiveListing {
        let result = match self.detect(archive).await {
            Ok(Container::Zip) => {
                let path = archive.to_path_buf();
                blocking(move || zip_listing(&path)).await
            }
            Ok(Container::Rar) => self.rar_listing(archive).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(entries) => ArchiveListing::valid(entries),
            Err(e) => {
                tracing::debug!(path = %archive.display(), error = %e, "Archive failed validation");
                ArchiveListing::invalid(e.to_string())
            }
        }
    }
}

/// Run blocking archive work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, ArchiveError>
where
    F: FnOnce() -> Result<T, ArchiveError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ArchiveError::Task(e.to_string()))?
}

// ---------------------------------------------------------------------------
// ZIP (synchronous)
// ---------------------------------------------------------------------------

/// List file entries, reading each one fully so the CRC is verified.
fn zip_listing(path: &Path) -> Result<Vec<String>, ArchiveError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let mut entries = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())?;
        entries.push(entry.name().to_string());
    }

    Ok(entries)
}

fn zip_extract(path: &Path, dest: &Path) -> Result<usize, ArchiveError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    std::fs::create_dir_all(dest)?;
    let mut file_count = 0;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafeEntry(entry.name().to_string()))?;
        let target = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        file_count += 1;
    }

    Ok(file_count)
}

fn zip_build(src_dir: &Path, output: &Path) -> Result<BuildSummary, ArchiveError> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored);
    let mut writer = ZipWriter::new(File::create(output)?);
    let mut file_count = 0;

    for entry in WalkDir::new(src_dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|e| ArchiveError::Task(e.to_string()))?;
        let name = entry_name(relative);

        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, options)?;
            let mut input = File::open(entry.path())?;
            io::copy(&mut input, &mut writer)?;
            file_count += 1;
        }
    }

    writer.finish()?;
    let size = std::fs::metadata(output)?.len();
    Ok(BuildSummary { file_count, size })
}

/// Archive entry name for a relative path, always `/`-separated.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Count extracted files, rejecting anything that resolved outside `dest`.
fn count_extracted(dest: &Path) -> Result<usize, ArchiveError> {
    let root = dest.canonicalize()?;
    let mut file_count = 0;
    for entry in WalkDir::new(dest).min_depth(1) {
        let entry = entry?;
        if !entry.path().canonicalize()?.starts_with(&root) {
            return Err(ArchiveError::UnsafeEntry(entry.path().display().to_string()));
        }
        if entry.file_type().is_file() {
            file_count += 1;
        }
    }
    Ok(file_count)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
