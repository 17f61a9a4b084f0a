//! Archive conversion pipeline.
//!
//! - [`archive`]: the archive transform backend (ZIP in-process, RAR through
//!   the `unrar` binary).
//! - [`conversion`]: the validated CBR -> CBZ conversion protocol.
//! - [`catalog`]: the file catalog seam the pipeline keeps in sync.
//! - [`comic_info`]: embedded `ComicInfo.xml` rendering and rewriting.

pub mod archive;
pub mod catalog;
pub mod comic_info;
pub mod conversion;

pub use archive::{ArchiveBackend, ArchiveError, LocalArchiveBackend};
pub use catalog::{CatalogError, CatalogRecord, CatalogSnapshot, FileCatalog, PgFileCatalog};
pub use conversion::{ConversionError, ConversionOptions, ConversionOutcome, ConversionPipeline};
