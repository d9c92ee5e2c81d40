//! High-level image operations.
//!
//! These functions sit between the container rewriter and the backend. They
//! own the "never fail" policy: backend errors are logged and turned into a
//! pass-through of the original bytes.

use super::backend::ImageBackend;
use super::params::ParameterBundle;
use tracing::{debug, warn};

/// Outcome of transcoding one image.
///
/// On failure `bytes` is the untouched input; callers write it either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeResult {
    pub bytes: Vec<u8>,
    pub succeeded: bool,
}

impl TranscodeResult {
    fn passthrough(data: &[u8]) -> Self {
        Self {
            bytes: data.to_vec(),
            succeeded: false,
        }
    }
}

/// Transcode one image, falling back to the original bytes on any error.
pub fn transcode(
    backend: &impl ImageBackend,
    data: &[u8],
    params: &ParameterBundle,
) -> TranscodeResult {
    match backend.transcode(data, params) {
        Ok(bytes) => {
            debug!(before = data.len(), after = bytes.len(), "transcoded image");
            TranscodeResult {
                bytes,
                succeeded: true,
            }
        }
        Err(e) => {
            warn!("Failed to optimize image, keeping original: {e}");
            TranscodeResult::passthrough(data)
        }
    }
}

/// Get image dimensions using the backend.
pub fn get_dimensions(backend: &impl ImageBackend, data: &[u8]) -> Option<(u32, u32)> {
    backend
        .identify(data)
        .ok()
        .map(|dims| (dims.width, dims.height))
}
