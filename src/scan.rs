//! Document discovery.
//!
//! Turns the paths given on the command line into documents. A path may be
//! a file or a directory; directories are walked recursively. Files are
//! grouped by directory and stem, so `Dune.epub` and `Dune.kepub` next to each
//! other form one document with two formats:
//!
//! ```text
//! books/
//! ├── Dune.epub                 ┐ one document, formats EPUB + KEPUB
//! ├── Dune.kepub                ┘
//! ├── Dune.optimized.epub       # earlier output, ignored
//! ├── docshrink-a8Xk2q.epub     # interrupted run, ignored
//! ├── comics/
//! │   └── Akira.cbz             # one document, format CBZ
//! └── notes.txt                 # not a container extension, ignored
//! ```
//!
//! Format labels are the upper-cased extension. Only extensions of
//! ZIP-structured document formats are picked up; whether a file really is a
//! ZIP archive is decided later by the container rewriter.

use crate::container::TEMP_PREFIX;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Extensions of ZIP-structured document formats.
pub const DOCUMENT_EXTENSIONS: &[&str] = &[
    "epub", "kepub", "oebzip", "cbz", "docx", "xlsx", "pptx", "odt", "ods", "odp", "zip",
];

/// Stem suffix of files this tool wrote.
pub const OUTPUT_MARKER: &str = ".optimized";

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Path not found: {0}")]
    NotFound(PathBuf),
}

/// One document: every format found for a stem in one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSource {
    pub dir: PathBuf,
    pub stem: String,
    /// Format label (`EPUB`, `CBZ`, ...) to source path.
    pub formats: BTreeMap<String, PathBuf>,
}

/// Format label for a path, if it has a document extension.
pub fn format_label(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    DOCUMENT_EXTENSIONS
        .contains(&ext.as_str())
        .then(|| ext.to_ascii_uppercase())
}

/// Earlier outputs and leftovers of an interrupted run.
fn is_output(stem: &str) -> bool {
    stem.ends_with(OUTPUT_MARKER) || stem.starts_with(TEMP_PREFIX)
}

/// Discover documents under `paths`, sorted by directory then stem.
pub fn discover_documents(paths: &[PathBuf]) -> Result<Vec<DocumentSource>, ScanError> {
    let mut groups: BTreeMap<(PathBuf, String), BTreeMap<String, PathBuf>> = BTreeMap::new();

    for root in paths {
        if !root.exists() {
            return Err(ScanError::NotFound(root.clone()));
        }
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let (Some(label), Some(stem)) = (
                format_label(path),
                path.file_stem().and_then(|s| s.to_str()),
            ) else {
                continue;
            };
            if is_output(stem) {
                continue;
            }
            let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
            groups
                .entry((dir, stem.to_string()))
                .or_default()
                .insert(label, path.to_path_buf());
        }
    }

    Ok(groups
        .into_iter()
        .map(|((dir, stem), formats)| DocumentSource { dir, stem, formats })
        .collect())
}
