//! Container rewriting: one ZIP-structured document in, one optimized copy out.
//!
//! [`ContainerRewriter::rewrite`] streams every member of the source archive
//! into a fresh temporary archive, in archive order:
//!
//! | Member | Written as |
//! |---|---|
//! | `mimetype` (the reserved entry) | verbatim, Stored |
//! | directory | directory |
//! | classified as an image | [`transcode`] output (original bytes on failure), Deflated |
//! | anything else | verbatim, Deflated |
//!
//! Each member keeps its modification time and unix mode. A member whose name
//! was already written is dropped with a warning. Once every member
//! is written the metadata embedder runs on the finished file; an embedding
//! failure is logged and otherwise ignored.
//!
//! ## Ownership of the output
//!
//! The destination is a [`NamedTempFile`]. Any error or cancellation drops it,
//! which deletes the partial file. Only a completed rewrite keeps the file
//! and hands its path to the caller in [`RewriteOutcome::Completed`].

use crate::imaging::{ImageBackend, ImageKind, ParameterBundle, classify, get_dimensions, transcode};
use crate::metadata::{DocumentMetadata, MetadataEmbedder};
use crate::progress::{CancelFlag, ProgressContext, ProgressEvent, report};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Name of the type-declaration entry that is never transformed.
pub const RESERVED_ENTRY: &str = "mimetype";

/// File name prefix of in-progress outputs.
pub const TEMP_PREFIX: &str = "docshrink-";

/// Most bytes reserved up front from a member's declared size.
const PREALLOC_LIMIT: u64 = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Size of one container before and after optimization, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStats {
    pub original_size: u64,
    pub new_size: u64,
}

impl JobStats {
    /// Percentage saved; `0.0` for an empty original.
    pub fn reduction_percent(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        (self.original_size as f64 - self.new_size as f64) / self.original_size as f64 * 100.0
    }
}

impl std::ops::Add for JobStats {
    type Output = JobStats;

    fn add(self, other: JobStats) -> JobStats {
        JobStats {
            original_size: self.original_size + other.original_size,
            new_size: self.new_size + other.new_size,
        }
    }
}

impl std::iter::Sum for JobStats {
    fn sum<I: Iterator<Item = JobStats>>(iter: I) -> JobStats {
        iter.fold(JobStats::default(), |acc, s| acc + s)
    }
}

/// A finished rewrite. The caller owns `output` from here on.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRewrite {
    pub output: PathBuf,
    pub stats: JobStats,
    /// Image members re-encoded successfully.
    pub images_optimized: usize,
    /// Image members written back unchanged after a failed transcode.
    pub images_kept: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RewriteOutcome {
    Completed(CompletedRewrite),
    /// The source is missing or not a ZIP container; nothing was written.
    Skipped { reason: String },
    /// The cancel flag was raised between members; the partial file is gone.
    Cancelled,
}

/// Rewrites containers with one backend, embedder and progress channel.
pub struct ContainerRewriter<'a, B: ImageBackend> {
    backend: &'a B,
    embedder: &'a dyn MetadataEmbedder,
    progress: Option<&'a Sender<ProgressEvent>>,
    cancel: Option<&'a CancelFlag>,
    temp_dir: Option<&'a Path>,
}

impl<'a, B: ImageBackend> ContainerRewriter<'a, B> {
    pub fn new(backend: &'a B, embedder: &'a dyn MetadataEmbedder) -> Self {
        Self {
            backend,
            embedder,
            progress: None,
            cancel: None,
            temp_dir: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<&'a Sender<ProgressEvent>>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: Option<&'a CancelFlag>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Create temporary outputs in `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: &'a Path) -> Self {
        self.temp_dir = Some(dir);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancelFlag::is_cancelled)
    }

    fn temp_output(&self, format_label: &str) -> io::Result<NamedTempFile> {
        let suffix = format!(".{}", format_label.to_lowercase());
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX).suffix(&suffix);
        match self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    }

    /// Rewrite one container.
    ///
    /// Returns `Err` only for container-level failures (unreadable member,
    /// write error); the partial output has already been removed by then.
    pub fn rewrite(
        &self,
        source: &Path,
        format_label: &str,
        params: &ParameterBundle,
        metadata: &DocumentMetadata,
        context: ProgressContext,
    ) -> Result<RewriteOutcome, RewriteError> {
        let mut archive = match File::open(source) {
            Ok(file) => match ZipArchive::new(file) {
                Ok(archive) => archive,
                Err(e) => {
                    return Ok(RewriteOutcome::Skipped {
                        reason: format!("not a ZIP container: {e}"),
                    });
                }
            },
            Err(e) => {
                return Ok(RewriteOutcome::Skipped {
                    reason: format!("cannot open {}: {e}", source.display()),
                });
            }
        };
        let original_size = fs::metadata(source)?.len();

        let mut tmp = self.temp_output(format_label)?;
        let total = archive.len();
        let mut images_optimized = 0;
        let mut images_kept = 0;
        let mut written: HashSet<String> = HashSet::with_capacity(total);

        {
            let mut writer = ZipWriter::new(BufWriter::new(tmp.as_file_mut()));

            for index in 0..total {
                if self.is_cancelled() {
                    info!("[{format_label}] cancelled after {index} of {total} members");
                    return Ok(RewriteOutcome::Cancelled);
                }

                let mut entry = archive.by_index(index)?;
                let name = entry.name().to_string();
                report(
                    self.progress,
                    context.member_fraction(index, total),
                    format!("Processing {format_label}: {name}"),
                );

                let mut options =
                    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
                if let Some(modified) = entry.last_modified() {
                    options = options.last_modified_time(modified);
                }
                if let Some(mode) = entry.unix_mode() {
                    options = options.unix_permissions(mode);
                }

                if !written.insert(name.clone()) {
                    warn!("[{format_label}] dropping duplicate member {name}");
                    continue;
                }

                if entry.is_dir() {
                    writer.add_directory(name, options)?;
                    continue;
                }

                let declared = entry.size();
                let data = read_member(&mut entry, declared)?;
                drop(entry);

                let (data, options) = if name == RESERVED_ENTRY {
                    (data, options.compression_method(CompressionMethod::Stored))
                } else if let Some(kind) = classify(&data) {
                    debug!("[{format_label}] {name}: {kind} image, {} bytes", data.len());
                    let result = transcode(self.backend, &data, params);
                    if result.succeeded {
                        images_optimized += 1;
                    } else {
                        images_kept += 1;
                    }
                    (result.bytes, options)
                } else {
                    (data, options)
                };

                let options = options.large_file(data.len() as u64 >= u32::MAX as u64);
                writer.start_file(name, options)?;
                writer.write_all(&data)?;
            }

            writer.finish()?.flush()?;
        }
        drop(archive);

        report(
            self.progress,
            context.completed_fraction(),
            format!("Embedding metadata into {format_label}..."),
        );
        if let Err(e) = self.embedder.embed(tmp.path(), format_label, metadata) {
            warn!("Could not embed metadata into {format_label}: {e}");
        }

        let new_size = fs::metadata(tmp.path())?.len();
        let stats = JobStats {
            original_size,
            new_size,
        };
        info!(
            "[{format_label}] {:.1}KB -> {:.1}KB (Reduced {:.1}%)",
            original_size as f64 / 1024.0,
            new_size as f64 / 1024.0,
            stats.reduction_percent()
        );

        let (_, output) = tmp.keep().map_err(|e| e.error)?;
        Ok(RewriteOutcome::Completed(CompletedRewrite {
            output,
            stats,
            images_optimized,
            images_kept,
        }))
    }
}

/// Read a member in full. `declared` comes from the archive and may lie.
fn read_member(entry: &mut impl Read, declared: u64) -> io::Result<Vec<u8>> {
    let mut data = Vec::with_capacity(declared.min(PREALLOC_LIMIT) as usize);
    entry.read_to_end(&mut data)?;
    Ok(data)
}

/// One archive member as seen by [`inspect_members`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub name: String,
    pub kind: Option<ImageKind>,
    pub dimensions: Option<(u32, u32)>,
}

/// Classify every file member of a container without rewriting it.
///
/// The reserved entry is listed but never sniffed.
pub fn inspect_members<B: ImageBackend>(
    backend: &B,
    source: &Path,
) -> Result<Vec<MemberInfo>, RewriteError> {
    let mut archive = ZipArchive::new(File::open(source)?)?;
    let mut members = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name == RESERVED_ENTRY {
            members.push(MemberInfo {
                name,
                kind: None,
                dimensions: None,
            });
            continue;
        }
        let declared = entry.size();
        let data = read_member(&mut entry, declared)?;
        let kind = classify(&data);
        let dimensions = kind.and_then(|_| get_dimensions(backend, &data));
        members.push(MemberInfo {
            name,
            kind,
            dimensions,
        });
    }
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MOCK_PREFIX, MockBackend};
    use crate::imaging::{Quality, RustBackend};
    use crate::metadata::{EmbedError, OpfMetadataEmbedder, read_opf_title};
    use crate::test_helpers::{jpeg_bytes, read_container, write_container, write_epub};
    use std::sync::mpsc;
    use tempfile::TempDir;

    /// Embedder that always fails, to prove failures are not fatal.
    struct FailingEmbedder;

    impl MetadataEmbedder for FailingEmbedder {
        fn embed(&self, _: &Path, label: &str, _: &DocumentMetadata) -> Result<(), EmbedError> {
            Err(EmbedError::UnsupportedFormat(label.to_string()))
        }
    }

    fn completed(outcome: RewriteOutcome) -> CompletedRewrite {
        match outcome {
            RewriteOutcome::Completed(done) => done,
            other => panic!("expected a completed rewrite, got {other:?}"),
        }
    }

    fn temp_entries(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn non_image_members_round_trip_exactly() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("doc.zip");
        write_container(
            &source,
            &[
                ("mimetype", b"application/epub+zip".to_vec()),
                ("META-INF/container.xml", b"<container/>".to_vec()),
                ("OEBPS/chapter.xhtml", b"<html>hello</html>".repeat(40)),
                ("OEBPS/tiny.bin", vec![0xFF, 0xD8]),
            ],
        );
        let backend = MockBackend::new();
        let out_dir = TempDir::new().unwrap();

        let done = completed(
            ContainerRewriter::new(&backend, &FailingEmbedder)
                .with_temp_dir(out_dir.path())
                .rewrite(
                    &source,
                    "ZIP",
                    &ParameterBundle::default(),
                    &DocumentMetadata::default(),
                    ProgressContext::single(),
                )
                .unwrap(),
        );

        let before = read_container(&source);
        let after = read_container(&done.output);
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.data, b.data);
        }
        assert_eq!(after[0].compression, CompressionMethod::Stored);
        assert!(after[1..]
            .iter()
            .all(|e| e.compression == CompressionMethod::Deflated));
        assert_eq!(backend.transcode_count(), 0);
    }

    #[test]
    fn reserved_entry_is_never_sniffed() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("doc.epub");
        let fake_image = jpeg_bytes(8, 8);
        write_container(&source, &[("mimetype", fake_image.clone())]);
        let backend = MockBackend::new();

        let done = completed(
            ContainerRewriter::new(&backend, &FailingEmbedder)
                .with_temp_dir(tmp.path())
                .rewrite(
                    &source,
                    "EPUB",
                    &ParameterBundle::default(),
                    &DocumentMetadata::default(),
                    ProgressContext::single(),
                )
                .unwrap(),
        );

        assert_eq!(backend.transcode_count(), 0);
        assert_eq!(read_container(&done.output)[0].data, fake_image);
    }

    #[test]
    fn three_member_epub_scenario() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("book.epub");
        let jpeg = jpeg_bytes(160, 120);
        let text = vec![b'a'; 500];
        write_container(
            &source,
            &[
                ("mimetype", b"application/epub+zip".to_vec()),
                ("OEBPS/cover.jpg", jpeg.clone()),
                ("OEBPS/notes.txt", text.clone()),
            ],
        );
        let (tx, rx) = mpsc::channel();
        let params = ParameterBundle {
            quality: Quality::new(50),
            ..Default::default()
        };

        let done = completed(
            ContainerRewriter::new(&RustBackend::new(), &FailingEmbedder)
                .with_progress(Some(&tx))
                .with_temp_dir(tmp.path())
                .rewrite(
                    &source,
                    "EPUB",
                    &params,
                    &DocumentMetadata::default(),
                    ProgressContext::single(),
                )
                .unwrap(),
        );
        drop(tx);

        let entries = read_container(&done.output);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "mimetype");
        assert_eq!(entries[0].data, b"application/epub+zip");
        assert_eq!(entries[0].compression, CompressionMethod::Stored);
        assert_eq!(classify(&entries[1].data), Some(ImageKind::Jpeg));
        assert_ne!(entries[1].data, jpeg);
        assert_eq!(entries[2].data, text);
        assert_eq!(done.images_optimized, 1);
        assert_eq!(done.images_kept, 0);

        let fractions: Vec<f64> = rx.iter().map(|e| e.fraction).collect();
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]), "{fractions:?}");
        assert_eq!(fractions.last(), Some(&1.0));
    }

    #[test]
    fn progress_is_scaled_into_the_format_slot() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("doc.cbz");
        write_container(
            &source,
            &[("a.txt", b"a".to_vec()), ("b.txt", b"b".to_vec())],
        );
        let (tx, rx) = mpsc::channel();
        let context = ProgressContext {
            format_index: 1,
            total_formats: 2,
        };

        ContainerRewriter::new(&MockBackend::new(), &FailingEmbedder)
            .with_progress(Some(&tx))
            .with_temp_dir(tmp.path())
            .rewrite(
                &source,
                "CBZ",
                &ParameterBundle::default(),
                &DocumentMetadata::default(),
                context,
            )
            .unwrap();
        drop(tx);

        let events: Vec<ProgressEvent> = rx.iter().collect();
        let fractions: Vec<f64> = events.iter().map(|e| e.fraction).collect();
        assert_eq!(fractions, vec![0.5, 0.75, 1.0]);
        assert_eq!(events[0].message, "Processing CBZ: a.txt");
        assert_eq!(events[2].message, "Embedding metadata into CBZ...");
    }

    #[test]
    fn failed_transcodes_keep_original_bytes() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("doc.cbz");
        let jpeg = jpeg_bytes(16, 16);
        write_container(&source, &[("page1.jpg", jpeg.clone())]);
        let backend = MockBackend::failing("broken encoder");

        let done = completed(
            ContainerRewriter::new(&backend, &FailingEmbedder)
                .with_temp_dir(tmp.path())
                .rewrite(
                    &source,
                    "CBZ",
                    &ParameterBundle::default(),
                    &DocumentMetadata::default(),
                    ProgressContext::single(),
                )
                .unwrap(),
        );

        assert_eq!(read_container(&done.output)[0].data, jpeg);
        assert_eq!(done.images_optimized, 0);
        assert_eq!(done.images_kept, 1);
    }

    #[test]
    fn image_members_go_through_the_backend() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("doc.cbz");
        let jpeg = jpeg_bytes(16, 16);
        write_container(&source, &[("page1.jpg", jpeg.clone())]);
        let backend = MockBackend::new();

        let done = completed(
            ContainerRewriter::new(&backend, &FailingEmbedder)
                .with_temp_dir(tmp.path())
                .rewrite(
                    &source,
                    "CBZ",
                    &ParameterBundle::default(),
                    &DocumentMetadata::default(),
                    ProgressContext::single(),
                )
                .unwrap(),
        );

        let data = &read_container(&done.output)[0].data;
        assert!(data.starts_with(MOCK_PREFIX));
        assert_eq!(&data[MOCK_PREFIX.len()..], jpeg.as_slice());
    }

    #[test]
    fn cancellation_after_first_image_stops_the_rewrite() {
        let tmp = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let source = tmp.path().join("comic.cbz");
        write_container(
            &source,
            &[
                ("p1.jpg", jpeg_bytes(8, 8)),
                ("p2.jpg", jpeg_bytes(8, 8)),
                ("p3.jpg", jpeg_bytes(8, 8)),
            ],
        );
        let cancel = CancelFlag::new();
        let backend = MockBackend::cancelling_after(1, cancel.clone());

        let outcome = ContainerRewriter::new(&backend, &FailingEmbedder)
            .with_cancel(Some(&cancel))
            .with_temp_dir(out_dir.path())
            .rewrite(
                &source,
                "CBZ",
                &ParameterBundle::default(),
                &DocumentMetadata::default(),
                ProgressContext::single(),
            )
            .unwrap();

        assert_eq!(outcome, RewriteOutcome::Cancelled);
        assert_eq!(backend.transcode_count(), 1);
        assert_eq!(temp_entries(out_dir.path()), 0);
    }

    #[test]
    fn missing_source_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let outcome = ContainerRewriter::new(&MockBackend::new(), &FailingEmbedder)
            .with_temp_dir(tmp.path())
            .rewrite(
                &tmp.path().join("nope.epub"),
                "EPUB",
                &ParameterBundle::default(),
                &DocumentMetadata::default(),
                ProgressContext::single(),
            )
            .unwrap();
        assert!(matches!(outcome, RewriteOutcome::Skipped { .. }));
        assert_eq!(temp_entries(tmp.path()), 0);
    }

    #[test]
    fn non_zip_source_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let source = tmp.path().join("book.epub");
        fs::write(&source, b"plain text pretending to be an epub").unwrap();

        let outcome = ContainerRewriter::new(&MockBackend::new(), &FailingEmbedder)
            .with_temp_dir(out_dir.path())
            .rewrite(
                &source,
                "EPUB",
                &ParameterBundle::default(),
                &DocumentMetadata::default(),
                ProgressContext::single(),
            )
            .unwrap();
        assert!(matches!(outcome, RewriteOutcome::Skipped { .. }));
        assert_eq!(temp_entries(out_dir.path()), 0);
    }

    #[test]
    fn corrupt_member_is_an_error_and_removes_partial_output() {
        let tmp = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let source = tmp.path().join("doc.cbz");
        write_container(
            &source,
            &[
                ("mimetype", b"application/x-cbz".to_vec()),
                ("note.txt", b"kept".to_vec()),
            ],
        );
        // The stored mimetype bytes appear verbatim; flipping one breaks its CRC.
        let mut bytes = fs::read(&source).unwrap();
        let at = bytes
            .windows(b"application/x-cbz".len())
            .position(|w| w == b"application/x-cbz")
            .unwrap();
        bytes[at] ^= 0xFF;
        fs::write(&source, bytes).unwrap();

        let result = ContainerRewriter::new(&MockBackend::new(), &FailingEmbedder)
            .with_temp_dir(out_dir.path())
            .rewrite(
                &source,
                "CBZ",
                &ParameterBundle::default(),
                &DocumentMetadata::default(),
                ProgressContext::single(),
            );

        assert!(result.is_err());
        assert_eq!(temp_entries(out_dir.path()), 0);
    }

    /// A single empty Stored member whose zip64 extra field claims `declared` bytes.
    fn archive_with_declared_size(name: &str, declared: u64) -> Vec<u8> {
        let name = name.as_bytes();
        let mut zip64 = Vec::new();
        zip64.extend_from_slice(&0x0001u16.to_le_bytes());
        zip64.extend_from_slice(&16u16.to_le_bytes());
        zip64.extend_from_slice(&declared.to_le_bytes());
        zip64.extend_from_slice(&0u64.to_le_bytes());

        let mut out = Vec::new();
        // Local file header.
        out.extend_from_slice(&0x04034b50u32.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0x21u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(zip64.len() as u16).to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&zip64);

        let cd_offset = out.len() as u32;
        out.extend_from_slice(&0x02014b50u32.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0x21u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(zip64.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&zip64);
        let cd_size = out.len() as u32 - cd_offset;

        out.extend_from_slice(&0x06054b50u32.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    #[test]
    fn oversized_declared_member_does_not_abort_the_rewrite() {
        let tmp = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let source = tmp.path().join("doc.cbz");
        fs::write(&source, archive_with_declared_size("page.bin", 1 << 63)).unwrap();

        let result = ContainerRewriter::new(&MockBackend::new(), &FailingEmbedder)
            .with_temp_dir(out_dir.path())
            .rewrite(
                &source,
                "CBZ",
                &ParameterBundle::default(),
                &DocumentMetadata::default(),
                ProgressContext::single(),
            );

        match result {
            Ok(RewriteOutcome::Completed(done)) => {
                let entries = read_container(&done.output);
                assert_eq!(entries.len(), 1);
                assert!(entries[0].data.is_empty());
            }
            _ => assert_eq!(temp_entries(out_dir.path()), 0),
        }
    }

    #[test]
    fn inspect_tolerates_oversized_declared_member() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("doc.cbz");
        fs::write(&source, archive_with_declared_size("page.bin", 1 << 63)).unwrap();

        if let Ok(members) = inspect_members(&MockBackend::new(), &source) {
            assert_eq!(members.len(), 1);
            assert_eq!(members[0].kind, None);
        }
    }

    #[test]
    fn duplicate_member_names_are_written_once() {
        let tmp = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let source = tmp.path().join("doc.cbz");
        {
            let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            let mut writer = ZipWriter::new(File::create(&source).unwrap());
            writer.start_file("a.txt", stored).unwrap();
            writer.write_all(b"first").unwrap();
            writer.start_file("b.txt", stored).unwrap();
            writer.write_all(b"second").unwrap();
            writer.finish().unwrap();
        }
        // Names are not covered by the CRC, so renaming in place keeps the archive valid.
        let mut bytes = fs::read(&source).unwrap();
        let positions: Vec<usize> = bytes
            .windows(5)
            .enumerate()
            .filter(|(_, w)| *w == b"b.txt")
            .map(|(i, _)| i)
            .collect();
        for at in positions {
            bytes[at] = b'a';
        }
        fs::write(&source, bytes).unwrap();

        let done = completed(
            ContainerRewriter::new(&MockBackend::new(), &FailingEmbedder)
                .with_temp_dir(out_dir.path())
                .rewrite(
                    &source,
                    "CBZ",
                    &ParameterBundle::default(),
                    &DocumentMetadata::default(),
                    ProgressContext::single(),
                )
                .unwrap(),
        );

        let entries = read_container(&done.output);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");
        assert!(entries[0].data == b"first" || entries[0].data == b"second");
    }

    #[test]
    fn preallocation_is_capped() {
        let data = read_member(&mut &b"abc"[..], u64::MAX).unwrap();
        assert_eq!(data, b"abc");
        assert!(data.capacity() as u64 <= PREALLOC_LIMIT);
    }

    #[test]
    fn directories_are_preserved() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("doc.zip");
        {
            let mut writer = ZipWriter::new(File::create(&source).unwrap());
            writer
                .add_directory("images/", SimpleFileOptions::default())
                .unwrap();
            writer
                .start_file("images/readme.txt", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"hi").unwrap();
            writer.finish().unwrap();
        }

        let done = completed(
            ContainerRewriter::new(&MockBackend::new(), &FailingEmbedder)
                .with_temp_dir(tmp.path())
                .rewrite(
                    &source,
                    "ZIP",
                    &ParameterBundle::default(),
                    &DocumentMetadata::default(),
                    ProgressContext::single(),
                )
                .unwrap(),
        );

        let mut archive = ZipArchive::new(File::open(&done.output).unwrap()).unwrap();
        assert!(archive.by_index(0).unwrap().is_dir());
        assert_eq!(archive.by_index(1).unwrap().name(), "images/readme.txt");
    }

    #[test]
    fn metadata_is_embedded_into_the_output() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("book.epub");
        write_epub(&source, &[("OEBPS/cover.jpg", jpeg_bytes(32, 32))]);
        let backend = MockBackend::new();

        let done = completed(
            ContainerRewriter::new(&backend, &OpfMetadataEmbedder::new())
                .with_temp_dir(tmp.path())
                .rewrite(
                    &source,
                    "EPUB",
                    &ParameterBundle::default(),
                    &DocumentMetadata::with_title("Original Title [optimized]"),
                    ProgressContext::single(),
                )
                .unwrap(),
        );

        assert_eq!(
            read_opf_title(&done.output).as_deref(),
            Some("Original Title [optimized]")
        );
        assert_eq!(read_opf_title(&source).as_deref(), Some("Original Title"));
        assert_eq!(backend.transcode_count(), 1);
    }

    #[test]
    fn stats_report_sizes() {
        let stats = JobStats {
            original_size: 1000,
            new_size: 250,
        };
        assert_eq!(stats.reduction_percent(), 75.0);
        assert_eq!(JobStats::default().reduction_percent(), 0.0);
        let total: JobStats = [stats, stats].into_iter().sum();
        assert_eq!(total.original_size, 2000);
    }

    #[test]
    fn inspect_lists_images_with_dimensions() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("comic.cbz");
        write_container(
            &source,
            &[
                ("mimetype", b"application/x-cbz".to_vec()),
                ("p1.jpg", jpeg_bytes(40, 20)),
                ("notes.txt", b"hello world, not an image".to_vec()),
            ],
        );

        let members = inspect_members(&RustBackend::new(), &source).unwrap();
        assert_eq!(members.len(), 3);
        assert_eq!(members[0].kind, None);
        assert_eq!(members[1].kind, Some(ImageKind::Jpeg));
        assert_eq!(members[1].dimensions, Some((40, 20)));
        assert_eq!(members[2].kind, None);
    }

    #[test]
    fn inspect_non_zip_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("fake.cbz");
        fs::write(&source, b"plain text").unwrap();
        assert!(inspect_members(&RustBackend::new(), &source).is_err());
    }
}
