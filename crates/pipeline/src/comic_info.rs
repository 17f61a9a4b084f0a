//! Embedded `ComicInfo.xml` metadata.
//!
//! Metadata updates arrive as a flat JSON object with snake_case keys
//! (`series`, `number`, `language_iso`, ...). Known keys are rendered as
//! ComicInfo elements in schema order; unknown keys and nulls are skipped.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bindery_core::archive_format::COMIC_INFO_ENTRY;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::archive::{sniff_container, ArchiveError, Container};

/// JSON key -> ComicInfo element, in ComicInfo schema order.
const ELEMENTS: &[(&str, &str)] = &[
    ("title", "Title"),
    ("series", "Series"),
    ("number", "Number"),
    ("count", "Count"),
    ("volume", "Volume"),
    ("summary", "Summary"),
    ("notes", "Notes"),
    ("year", "Year"),
    ("month", "Month"),
    ("day", "Day"),
    ("writer", "Writer"),
    ("penciller", "Penciller"),
    ("inker", "Inker"),
    ("colorist", "Colorist"),
    ("letterer", "Letterer"),
    ("cover_artist", "CoverArtist"),
    ("editor", "Editor"),
    ("publisher", "Publisher"),
    ("imprint", "Imprint"),
    ("genre", "Genre"),
    ("tags", "Tags"),
    ("web", "Web"),
    ("page_count", "PageCount"),
    ("language_iso", "LanguageISO"),
    ("format", "Format"),
    ("manga", "Manga"),
    ("age_rating", "AgeRating"),
];

/// Escape text for use in XML element content.
pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn element_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(element_text).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        other => Some(other.to_string()),
    }
}

/// The metadata fields that map onto ComicInfo elements.
pub fn known_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    ELEMENTS
        .iter()
        .filter_map(|(key, _)| {
            let value = fields.get(*key)?;
            (!value.is_null()).then(|| (key.to_string(), value.clone()))
        })
        .collect()
}

/// Render a complete `ComicInfo.xml` document.
pub fn render_comic_info(fields: &Map<String, Value>) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <ComicInfo xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" \
         xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\n",
    );
    for (key, element) in ELEMENTS {
        if let Some(text) = fields.get(*key).and_then(element_text) {
            xml.push_str(&format!("  <{element}>{}</{element}>\n", escape_xml(&text)));
        }
    }
    xml.push_str("</ComicInfo>\n");
    xml
}

/// Replace the `ComicInfo.xml` entry of a ZIP-based archive.
///
/// The new archive is assembled in a temporary file in the same directory
/// and renamed over the original, so readers never see a partial archive.
/// Other entries are copied without recompression.
pub fn rewrite_comic_info(archive_path: &Path, xml: &str) -> Result<(), ArchiveError> {
    if sniff_container(archive_path)? == Container::Rar {
        return Err(ArchiveError::Unsupported(
            "metadata cannot be written into RAR archives".to_string(),
        ));
    }
    let dir = archive_path
        .parent()
        .ok_or_else(|| ArchiveError::Io(io::Error::other("archive path has no parent")))?;

    let mut source = ZipArchive::new(File::open(archive_path)?)?;
    let temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = ZipWriter::new(temp.as_file());
        for index in 0..source.len() {
            let entry = source.by_index(index)?;
            if entry.name().eq_ignore_ascii_case(COMIC_INFO_ENTRY) {
                continue;
            }
            writer.raw_copy_file(entry)?;
        }
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file(COMIC_INFO_ENTRY, options)?;
        writer.write_all(xml.as_bytes())?;
        writer.finish()?;
    }
    temp.persist(archive_path).map_err(|e| ArchiveError::Io(e.error))?;
    Ok(())
}

/// Async wrapper around [`rewrite_comic_info`].
pub async fn write_comic_info(archive_path: PathBuf, fields: Map<String, Value>) -> Result<(), ArchiveError> {
    tokio::task::spawn_blocking(move || {
        let xml = render_comic_info(&fields);
        rewrite_comic_info(&archive_path, &xml)
    })
    .await
    .map_err(|e| ArchiveError::Task(e.to_string()))?
}
