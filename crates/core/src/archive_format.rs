//! Comic archive formats and entry classification.
//!
//! The conversion pipeline turns RAR-based `.cbr` archives into ZIP-based
//! `.cbz` archives. Content equivalence between the two is judged by the
//! number of image entries, so the image classification lives here where
//! both the pipeline and its tests can share it.

use std::path::{Path, PathBuf};

/// Image extensions counted as page content.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "avif", "jxl", "tif", "tiff",
];

/// Embedded metadata sidecar written by most comic tools.
pub const COMIC_INFO_ENTRY: &str = "ComicInfo.xml";

/// Archive container format of a library file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// ZIP container (`.cbz`).
    Cbz,
    /// RAR container (`.cbr`).
    Cbr,
}

impl ArchiveFormat {
    /// Detect the format from a path's extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "cbz" | "zip" => Some(Self::Cbz),
            "cbr" | "rar" => Some(Self::Cbr),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Cbz => "cbz",
            Self::Cbr => "cbr",
        }
    }
}

/// Whether an archive entry name is a page image.
///
/// Directories, hidden files and resource forks (`__MACOSX/`) are not pages
/// even when they carry an image extension.
pub fn is_image_entry(name: &str) -> bool {
    if name.ends_with('/') || name.ends_with('\\') {
        return false;
    }
    let normalized = name.replace('\\', "/");
    if normalized.split('/').any(|part| part == "__MACOSX") {
        return false;
    }
    let file_name = normalized.rsplit('/').next().unwrap_or_default();
    if file_name.starts_with('.') {
        return false;
    }
    match file_name.rsplit_once('.') {
        Some((_, ext)) => IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Count the page images among a list of entry names.
pub fn count_image_entries<S: AsRef<str>>(entries: &[S]) -> usize {
    entries.iter().filter(|e| is_image_entry(e.as_ref())).count()
}

/// Destination path of a conversion: same directory and stem, new extension.
pub fn converted_path(source: &Path, target: ArchiveFormat) -> PathBuf {
    source.with_extension(target.extension())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_format_case_insensitively() {
        assert_eq!(
            ArchiveFormat::from_path(Path::new("/lib/Saga 001.CBR")),
            Some(ArchiveFormat::Cbr)
        );
        assert_eq!(
            ArchiveFormat::from_path(Path::new("a.cbz")),
            Some(ArchiveFormat::Cbz)
        );
        assert_eq!(ArchiveFormat::from_path(Path::new("a.pdf")), None);
        assert_eq!(ArchiveFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn classifies_image_entries() {
        assert!(is_image_entry("001.jpg"));
        assert!(is_image_entry("chapter 1/002.PNG"));
        assert!(is_image_entry("pages\\003.webp"));
        assert!(!is_image_entry("ComicInfo.xml"));
        assert!(!is_image_entry("pages/"));
        assert!(!is_image_entry("__MACOSX/._001.jpg"));
        assert!(!is_image_entry(".thumb.jpg"));
        assert!(!is_image_entry("README"));
    }

    #[test]
    fn counts_only_pages() {
        let entries = ["001.jpg", "002.jpg", "ComicInfo.xml", "scans/", "003.png"];
        assert_eq!(count_image_entries(&entries), 3);
    }

    #[test]
    fn converted_path_swaps_extension() {
        assert_eq!(
            converted_path(Path::new("/lib/Saga 001.cbr"), ArchiveFormat::Cbz),
            PathBuf::from("/lib/Saga 001.cbz")
        );
    }
}
