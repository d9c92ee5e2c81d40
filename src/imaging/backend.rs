//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations the container
//! rewriter needs from an image codec stack: identify and transcode. Both
//! work on in-memory buffers, since container members are never unpacked
//! to disk.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend). Backend errors are
//! ordinary `Result`s here; turning them into a pass-through of the original
//! bytes is the job of [`transcode`](super::operations::transcode).

use super::encode::EncodeError;
use super::params::ParameterBundle;
use super::sniff::ImageKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Failed to encode {kind}: {source}")]
    Encode {
        kind: ImageKind,
        #[source]
        source: EncodeError,
    },
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
///
/// `Sync` so one backend can serve documents processed on several rayon
/// workers at once.
pub trait ImageBackend: Sync {
    /// Decode just enough of the buffer to report its dimensions.
    fn identify(&self, data: &[u8]) -> Result<Dimensions, BackendError>;

    /// Decode, resize, normalize and re-encode one image.
    fn transcode(&self, data: &[u8], params: &ParameterBundle) -> Result<Vec<u8>, BackendError>;
}
