//! Per-document orchestration over the container rewriter.
//!
//! A document is one logical item with one or more formats (an `.epub` and a
//! `.kepub` of the same book, say). [`optimize_document`] rewrites each
//! format in label order, one at a time, and collects what succeeded:
//!
//! - a missing or non-ZIP source is logged and omitted,
//! - a container-level error is logged and omitted,
//! - cancellation stops before the next format and marks the result,
//! - whatever happens, the last event sent is `(1.0, "File processing completed.")`.
//!
//! Running many documents concurrently is the caller's business; nothing in
//! here spawns threads.

use crate::container::{CompletedRewrite, ContainerRewriter, JobStats, RewriteOutcome};
use crate::imaging::{ImageBackend, ParameterBundle};
use crate::metadata::{DocumentMetadata, MetadataEmbedder};
use crate::progress::{CancelFlag, ProgressContext, ProgressEvent, report};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use tracing::{error, info, warn};

/// Message of the terminal progress event.
pub const COMPLETED_MESSAGE: &str = "File processing completed.";

/// One document: its formats, the metadata to embed and the job parameters.
#[derive(Debug, Clone)]
pub struct DocumentJob {
    /// Format label (`EPUB`, `CBZ`, ...) to source path.
    pub formats: BTreeMap<String, PathBuf>,
    pub metadata: DocumentMetadata,
    pub params: ParameterBundle,
}

/// What one document produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    /// Completed formats only; skipped and failed ones are absent.
    pub outputs: BTreeMap<String, CompletedRewrite>,
    /// Carried through from the job parameters for the caller's post-processing.
    pub keep_import_timestamp: bool,
    pub cancelled: bool,
}

impl BatchResult {
    pub fn total_stats(&self) -> JobStats {
        self.outputs.values().map(|done| done.stats).sum()
    }

    /// Reduction over all completed formats, or `None` if none completed.
    pub fn reduction_percent(&self) -> Option<f64> {
        (!self.outputs.is_empty()).then(|| self.total_stats().reduction_percent())
    }
}

/// Shared collaborators for optimizing documents.
pub struct BatchContext<'a, B: ImageBackend> {
    pub backend: &'a B,
    pub embedder: &'a dyn MetadataEmbedder,
    pub progress: Option<&'a Sender<ProgressEvent>>,
    pub cancel: &'a CancelFlag,
    /// Where temporary outputs are created; system temp dir when `None`.
    pub temp_dir: Option<&'a Path>,
}

/// Rewrite every format of one document.
pub fn optimize_document<B: ImageBackend>(job: &DocumentJob, ctx: &BatchContext<'_, B>) -> BatchResult {
    let mut rewriter = ContainerRewriter::new(ctx.backend, ctx.embedder)
        .with_progress(ctx.progress)
        .with_cancel(Some(ctx.cancel));
    if let Some(dir) = ctx.temp_dir {
        rewriter = rewriter.with_temp_dir(dir);
    }

    let mut result = BatchResult {
        keep_import_timestamp: job.params.keep_import_timestamp,
        ..BatchResult::default()
    };
    let total_formats = job.formats.len();

    for (format_index, (label, source)) in job.formats.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            result.cancelled = true;
            break;
        }

        let context = ProgressContext {
            format_index,
            total_formats,
        };
        match rewriter.rewrite(source, label, &job.params, &job.metadata, context) {
            Ok(RewriteOutcome::Completed(done)) => {
                result.outputs.insert(label.clone(), done);
            }
            Ok(RewriteOutcome::Skipped { reason }) => {
                warn!("Skipping {label} ({}): {reason}", source.display());
            }
            Ok(RewriteOutcome::Cancelled) => {
                result.cancelled = true;
                break;
            }
            Err(e) => {
                error!("Error {label}: {e}");
            }
        }
    }

    if result.cancelled {
        info!(
            "\"{}\" cancelled with {} of {total_formats} formats done",
            job.metadata.title,
            result.outputs.len()
        );
    }
    report(ctx.progress, 1.0, COMPLETED_MESSAGE);
    result
}
