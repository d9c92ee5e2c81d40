//! Document metadata and the embedder that writes it into finished containers.
//!
//! The container rewriter treats metadata as opaque: it hands a
//! [`DocumentMetadata`] to a [`MetadataEmbedder`] once per finished container
//! and only logs a failure. Everything format-specific lives behind that trait.
//!
//! ## EPUB family
//!
//! [`OpfMetadataEmbedder`] handles `EPUB`, `KEPUB` and `OEBZIP` containers.
//! The package document is located through `META-INF/container.xml`, its
//! Dublin Core elements are rewritten in place, and the container is written
//! again with every other entry raw-copied (no recompression).
//!
//! | Field | Element | When |
//! |---|---|---|
//! | title | `dc:title` | always |
//! | authors | `dc:creator`, one per author | when non-empty |
//! | language | `dc:language` | when set |
//!
//! Elements are edited by splicing byte ranges reported by `roxmltree`, so
//! the rest of the package document is preserved exactly.

use roxmltree::{Document, Node, ParsingOptions};
use std::fs::File;
use std::io::{Read, Write};
use std::ops::Range;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
const CONTAINER_XML: &str = "META-INF/container.xml";

/// Format labels whose containers carry an OPF package document.
const OPF_LABELS: &[&str] = &["EPUB", "KEPUB", "OEBZIP"];

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("package document not found: {0}")]
    MissingPackage(String),
    #[error("metadata embedding not supported for {0}")]
    UnsupportedFormat(String),
}

/// Metadata to embed into an optimized document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub title: String,
    pub authors: Vec<String>,
    pub language: Option<String>,
}

impl DocumentMetadata {
    pub fn with_title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// The same metadata with the title marked as optimized.
    pub fn annotated(&self) -> Self {
        Self {
            title: format!("{} [optimized]", self.title),
            ..self.clone()
        }
    }
}

/// Writes document metadata into a finished container of a named format.
pub trait MetadataEmbedder: Sync {
    fn embed(
        &self,
        path: &Path,
        format_label: &str,
        metadata: &DocumentMetadata,
    ) -> Result<(), EmbedError>;
}

/// Resolve a metadata field from multiple sources.
///
/// Returns the first non-None, non-blank value, trimmed.
pub fn resolve(sources: &[Option<&str>]) -> Option<String> {
    sources
        .iter()
        .filter_map(|opt| opt.map(str::trim))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Embedder for OPF-based containers (EPUB, KEPUB, OEBZIP).
#[derive(Debug, Clone, Copy, Default)]
pub struct OpfMetadataEmbedder;

impl OpfMetadataEmbedder {
    pub fn new() -> Self {
        Self
    }

    pub fn supports(format_label: &str) -> bool {
        OPF_LABELS
            .iter()
            .any(|label| label.eq_ignore_ascii_case(format_label))
    }
}

impl MetadataEmbedder for OpfMetadataEmbedder {
    fn embed(
        &self,
        path: &Path,
        format_label: &str,
        metadata: &DocumentMetadata,
    ) -> Result<(), EmbedError> {
        if !Self::supports(format_label) {
            return Err(EmbedError::UnsupportedFormat(format_label.to_string()));
        }

        let mut archive = ZipArchive::new(File::open(path)?)?;
        let opf_path = package_path(&mut archive)?;
        let opf = read_entry(&mut archive, &opf_path)?;
        let updated = update_package(&opf, metadata)?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = ZipWriter::new(tmp.as_file_mut());
            for i in 0..archive.len() {
                let entry = archive.by_index_raw(i)?;
                if entry.name() != opf_path {
                    writer.raw_copy_file(entry)?;
                    continue;
                }
                let mut options =
                    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
                if let Some(modified) = entry.last_modified() {
                    options = options.last_modified_time(modified);
                }
                writer.start_file(opf_path.as_str(), options)?;
                writer.write_all(updated.as_bytes())?;
            }
            writer.finish()?;
        }
        drop(archive);
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Best-effort title read from an EPUB-family container.
pub fn read_opf_title(path: &Path) -> Option<String> {
    let mut archive = ZipArchive::new(File::open(path).ok()?).ok()?;
    let opf_path = package_path(&mut archive).ok()?;
    let opf = read_entry(&mut archive, &opf_path).ok()?;
    let doc = parse(&opf).ok()?;
    let title = doc
        .descendants()
        .find(|n| is_dc(n, "title"))
        .and_then(|n| n.text());
    resolve(&[title])
}

fn parse(text: &str) -> Result<Document<'_>, roxmltree::Error> {
    Document::parse_with_options(
        text,
        ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        },
    )
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<String, EmbedError> {
    let mut entry = archive.by_name(name)?;
    let mut text = String::new();
    entry.read_to_string(&mut text)?;
    Ok(text)
}

/// Path of the package document named by `META-INF/container.xml`.
fn package_path<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<String, EmbedError> {
    let container = read_entry(archive, CONTAINER_XML)
        .map_err(|_| EmbedError::MissingPackage(CONTAINER_XML.to_string()))?;
    let doc = parse(&container)?;
    doc.descendants()
        .filter(|n| n.tag_name().name() == "rootfile")
        .find_map(|n| n.attribute("full-path"))
        .map(str::to_string)
        .ok_or_else(|| EmbedError::MissingPackage("no rootfile in container.xml".to_string()))
}

fn is_dc(node: &Node, local: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local
        && node.tag_name().namespace() == Some(DC_NS)
}

/// Rewrite the Dublin Core fields of a package document.
fn update_package(opf: &str, metadata: &DocumentMetadata) -> Result<String, EmbedError> {
    let doc = parse(opf)?;
    let meta_node = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "metadata")
        .ok_or_else(|| EmbedError::MissingPackage("no <metadata> in package document".into()))?;

    // An empty `<metadata/>` has nowhere to insert into; open it up first.
    let range = meta_node.range();
    if let Some(open) = opf[range.clone()].strip_suffix("/>") {
        let name = qualified_name(opf, range.clone());
        let expanded = format!(
            "{}{}></{name}>{}",
            &opf[..range.start],
            open.trim_end(),
            &opf[range.end..]
        );
        return update_package(&expanded, metadata);
    }

    let mut edits = Vec::new();
    set_elements(opf, meta_node, "title", &[metadata.title.as_str()], &mut edits);
    if !metadata.authors.is_empty() {
        let authors: Vec<&str> = metadata.authors.iter().map(String::as_str).collect();
        set_elements(opf, meta_node, "creator", &authors, &mut edits);
    }
    if let Some(language) = &metadata.language {
        set_elements(opf, meta_node, "language", &[language.as_str()], &mut edits);
    }

    Ok(apply_edits(opf, edits))
}

/// Queue edits that leave exactly `values.len()` `dc:<local>` elements.
///
/// The first existing element keeps its start tag and attributes and takes
/// the first value; further values follow it as new elements and any other
/// existing ones are removed. With none present they are appended to
/// `<metadata>`.
fn set_elements(
    opf: &str,
    meta_node: Node,
    local: &str,
    values: &[&str],
    edits: &mut Vec<(Range<usize>, String)>,
) {
    let existing: Vec<Node> = meta_node.children().filter(|n| is_dc(n, local)).collect();

    let qualified = match existing.first() {
        Some(node) => qualified_name(opf, node.range()).to_string(),
        None => match meta_node.lookup_prefix(DC_NS) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
            _ => format!("dc:{local} xmlns:dc=\"{DC_NS}\""),
        },
    };
    let close = qualified.split_whitespace().next().unwrap_or(local);
    let render = |v: &str| format!("<{qualified}>{}</{close}>", escape_xml(v));

    let Some((first, rest)) = existing.split_first() else {
        let rendered: Vec<String> = values.iter().map(|v| render(*v)).collect();
        let end = meta_node.range().end;
        let close_at = opf[..end].rfind("</").unwrap_or(end);
        edits.push((close_at..close_at, format!("  {}\n  ", rendered.join("\n    "))));
        return;
    };

    let range = first.range();
    let element = &opf[range.clone()];
    let (head, tail) = values.split_first().map_or((None, values), |(h, t)| (Some(h), t));
    let following: String = tail.iter().map(|v| format!("\n    {}", render(*v))).collect();
    match (head, element.find('>'), element.rfind("</")) {
        (Some(value), Some(open_end), Some(close_start)) if !element[..open_end].ends_with('/') => {
            let inner = range.start + open_end + 1..range.start + close_start;
            edits.push((inner, escape_xml(value)));
            edits.push((range.end..range.end, following));
        }
        (Some(value), ..) => edits.push((range, format!("{}{following}", render(*value)))),
        (None, ..) => edits.push((range, String::new())),
    }
    for node in rest {
        edits.push((node.range(), String::new()));
    }
}

/// The tag name as written in the source, prefix included.
fn qualified_name(text: &str, element: Range<usize>) -> &str {
    let tag = &text[element.start + 1..element.end];
    let end = tag
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(tag.len());
    &tag[..end]
}

fn apply_edits(text: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by_key(|(range, _)| std::cmp::Reverse(range.start));
    let mut out = text.to_string();
    for (range, replacement) in edits {
        out.replace_range(range, &replacement);
    }
    out
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
