//! Pure Rust image processing backend.
//!
//! Everything works on in-memory buffers and is statically linked.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (all but AVIF) | `image::ImageReader` with content-guessed format |
//! | Decode (AVIF) | `avif-parse` (container) + `rav1d` (AV1 decode) + BT.601 YUV→RGB |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Encode | per-kind table in [`encode`](super::encode) |

use super::avif::{decode_avif, identify_avif};
use super::backend::{BackendError, Dimensions, ImageBackend};
use super::calculations::calculate_constrained_dimensions;
use super::encode::{EncodeOptions, encode_with_fallback};
use super::params::ParameterBundle;
use super::sniff::{ImageKind, classify};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn reader(data: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, BackendError> {
    Ok(ImageReader::new(Cursor::new(data)).with_guessed_format()?)
}

/// Decode a buffer, reporting the source encoding when it can be named.
fn decode(data: &[u8]) -> Result<(DynamicImage, Option<ImageKind>), BackendError> {
    if classify(data) == Some(ImageKind::Avif) {
        return Ok((decode_avif(data)?, Some(ImageKind::Avif)));
    }

    let reader = reader(data)?;
    let source = reader.format().and_then(ImageKind::from_image_format);
    let img = reader
        .decode()
        .map_err(|e| BackendError::Decode(e.to_string()))?;
    Ok((img, source))
}

/// Drop the alpha channel when the target encoding cannot store one.
fn normalize_color(img: DynamicImage, target: ImageKind) -> DynamicImage {
    if !target.supports_alpha() && img.color().has_alpha() {
        DynamicImage::ImageRgb8(img.to_rgb8())
    } else {
        img
    }
}

impl ImageBackend for RustBackend {
    fn identify(&self, data: &[u8]) -> Result<Dimensions, BackendError> {
        if classify(data) == Some(ImageKind::Avif) {
            return identify_avif(data);
        }
        let (width, height) = reader(data)?
            .into_dimensions()
            .map_err(|e| BackendError::Decode(format!("Failed to read dimensions: {e}")))?;
        Ok(Dimensions { width, height })
    }

    fn transcode(&self, data: &[u8], params: &ParameterBundle) -> Result<Vec<u8>, BackendError> {
        let (img, source) = decode(data)?;
        let target = params.target_format.resolve(source);

        let img = match params
            .max_dimension
            .and_then(|limit| calculate_constrained_dimensions((img.width(), img.height()), limit))
        {
            Some((width, height)) => img.resize_exact(width, height, FilterType::Lanczos3),
            None => img,
        };

        let img = normalize_color(img, target);
        let opts = EncodeOptions::for_kind(target, params.quality);
        encode_with_fallback(&img, target, &opts)
            .map_err(|source| BackendError::Encode { kind: target, source })
    }
}
