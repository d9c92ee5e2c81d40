//! # docshrink
//!
//! Shrinks ZIP-structured documents (EPUB, KEPUB, CBZ, DOCX, ODT, ...) by
//! resizing and re-encoding the raster images inside them. Everything that is
//! not an image is copied through untouched, so the result opens in the same
//! readers as the source.
//!
//! # Architecture
//!
//! ```text
//! paths ──scan──▶ documents ──batch──▶ formats ──container──▶ members ──imaging──▶ bytes
//!                                                    │
//!                                                    └──metadata──▶ title, authors
//! ```
//!
//! A document is processed one format at a time and one member at a time.
//! Parallelism lives one level up: the CLI hands whole documents to a rayon
//! pool, and every worker reports into the same progress channel.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Walks input paths and groups files into documents by directory and stem |
//! | [`batch`] | Runs every format of one document through the container rewriter |
//! | [`container`] | Streams one ZIP archive into an optimized copy, member by member |
//! | [`imaging`] | Magic-byte sniffing, resize and per-format encoding in pure Rust |
//! | [`metadata`] | Document metadata and the OPF embedder for the EPUB family |
//! | [`progress`] | Progress events, per-format fraction scaling, cancellation flag |
//! | [`config`] | `docshrink.toml` loading, validation and merging |
//! | [`output`] | CLI output formatting for progress lines, reports and sniff results |
//!
//! # Design Decisions
//!
//! ## Transcoding Never Fails a Document
//!
//! A member that looks like an image but cannot be decoded or encoded is
//! written back with its original bytes. Only container-level problems
//! (unreadable archive, write errors) fail a format, and a failed format never
//! stops the other formats of the same document.
//!
//! ## The `mimetype` Entry
//!
//! EPUB and OpenDocument readers expect `mimetype` to be stored uncompressed.
//! It is copied verbatim with the Stored method and is never sniffed.
//!
//! ## Temporary Outputs
//!
//! Every rewrite writes into a `tempfile::NamedTempFile`. Errors and
//! cancellation drop it, which removes the partial file. The caller gets a
//! path only for a completed rewrite and decides where it ends up.

pub mod batch;
pub mod config;
pub mod container;
pub mod imaging;
pub mod metadata;
pub mod output;
pub mod progress;
pub mod scan;

#[cfg(test)]
pub(crate) mod test_helpers;
