//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Progress
//!
//! One line per [`ProgressEvent`], percentage first:
//!
//! ```text
//! [ 33%] Processing EPUB: OEBPS/images/cover.jpg
//! [ 50%] Embedding metadata into EPUB...
//! [100%] File processing completed.
//! ```
//!
//! ## Report
//!
//! ```text
//! Optimized 2 documents.
//!
//! Change details:
//! • Dune [optimized]: Reduced 62.8%
//!     EPUB: 812.4KB -> 301.9KB → books/Dune.optimized.epub
//! • Notes [optimized]: failed
//! ```
//!
//! ## Sniff
//!
//! ```text
//! cover.jpg: jpeg 1600x2400
//! chapter1.xhtml: not an image
//! ```
//!
//! With `--json` the same records are printed as one JSON array.
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>` or `String`)
//! for testability and a `print_*` wrapper that writes to stdout. Format
//! functions do no I/O.

use crate::batch::BatchResult;
use crate::imaging::ImageKind;
use crate::progress::ProgressEvent;
use serde::Serialize;

/// Bytes as kilobytes with one decimal.
pub fn format_kb(bytes: u64) -> String {
    format!("{:.1}KB", bytes as f64 / 1024.0)
}

/// Format a single progress event as one display line.
pub fn format_progress_event(event: &ProgressEvent) -> String {
    let percent = (event.fraction.clamp(0.0, 1.0) * 100.0).round() as u32;
    format!("[{percent:>3}%] {}", event.message)
}

/// Format the final report for a run.
///
/// `documents` pairs each document's display title with its result. A
/// document counts as optimized when at least one of its formats completed.
pub fn format_optimize_report(documents: &[(String, BatchResult)]) -> Vec<String> {
    let optimized = documents
        .iter()
        .filter(|(_, result)| !result.outputs.is_empty())
        .count();
    let noun = if optimized == 1 { "document" } else { "documents" };

    let mut lines = vec![format!("Optimized {optimized} {noun}.")];
    if documents.is_empty() {
        return lines;
    }

    lines.push(String::new());
    lines.push("Change details:".to_string());
    for (title, result) in documents {
        match result.reduction_percent() {
            Some(reduction) => lines.push(format!("• {title}: Reduced {reduction:.1}%")),
            None if result.cancelled => lines.push(format!("• {title}: cancelled")),
            None => lines.push(format!("• {title}: failed")),
        }
        for (label, done) in &result.outputs {
            lines.push(format!(
                "    {label}: {} -> {} → {}",
                format_kb(done.stats.original_size),
                format_kb(done.stats.new_size),
                done.output.display()
            ));
        }
    }
    lines
}

/// Print the final report to stdout.
pub fn print_optimize_report(documents: &[(String, BatchResult)]) {
    for line in format_optimize_report(documents) {
        println!("{}", line);
    }
}

/// What `sniff` found out about one file or archive member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SniffRecord {
    pub name: String,
    pub kind: Option<ImageKind>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl SniffRecord {
    pub fn new(name: impl Into<String>, kind: Option<ImageKind>, dims: Option<(u32, u32)>) -> Self {
        Self {
            name: name.into(),
            kind,
            width: dims.map(|(w, _)| w),
            height: dims.map(|(_, h)| h),
        }
    }
}

/// Format one sniff result.
pub fn format_sniff_line(record: &SniffRecord) -> String {
    let name = &record.name;
    match (record.kind, record.width.zip(record.height)) {
        (Some(kind), Some((w, h))) => format!("{name}: {kind} {w}x{h}"),
        (Some(kind), None) => format!("{name}: {kind}"),
        (None, _) => format!("{name}: not an image"),
    }
}

/// Format sniff results as a pretty-printed JSON array.
pub fn format_sniff_json(records: &[SniffRecord]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(records)
}
