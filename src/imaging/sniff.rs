//! Content-based image classification.
//!
//! Container members carry file names and sometimes declared media types, but
//! neither is trusted: a `.jpg` entry may hold a PNG, and an extensionless
//! entry may be an image. [`classify`] looks only at the leading bytes.
//!
//! Signatures are checked in a fixed order and the first match wins:
//!
//! | Kind | Signature |
//! |---|---|
//! | JPEG | `FF D8 FF` |
//! | PNG | `89 50 4E 47 0D 0A 1A 0A` |
//! | WebP | `RIFF` + 4-byte size (not validated) + `WEBP` |
//! | GIF | `GIF87a` / `GIF89a` |
//! | BMP | `BM` |
//! | TIFF | `II 2A 00` / `MM 00 2A` |
//! | ICO / CUR | `00 00 01 00` / `00 00 02 00` |
//! | AVIF | `ftypavif` / `ftypavis` at offset 4 |
//! | QOI | `qoif` |
//! | HDR | `#?RADIANCE` / `0A 20 20 20` |
//! | OpenEXR | `76 2F 31 01` |
//! | DDS | `DDS ` |
//! | farbfeld | `farbfeld` |
//! | PNM | `P1`..`P6` followed by `\n` |
//!
//! TGA has no leading magic, so it is never reported here even though the
//! transcoder can decode and encode it.

use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum buffer length [`classify`] will look at.
pub const MIN_SNIFF_LEN: usize = 12;

/// A raster image encoding known to the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Jpeg,
    Png,
    WebP,
    Gif,
    Bmp,
    Tiff,
    Ico,
    Avif,
    Qoi,
    Hdr,
    OpenExr,
    Dds,
    Farbfeld,
    Pnm,
    Tga,
}

impl ImageKind {
    pub fn name(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpeg",
            ImageKind::Png => "png",
            ImageKind::WebP => "webp",
            ImageKind::Gif => "gif",
            ImageKind::Bmp => "bmp",
            ImageKind::Tiff => "tiff",
            ImageKind::Ico => "ico",
            ImageKind::Avif => "avif",
            ImageKind::Qoi => "qoi",
            ImageKind::Hdr => "hdr",
            ImageKind::OpenExr => "openexr",
            ImageKind::Dds => "dds",
            ImageKind::Farbfeld => "farbfeld",
            ImageKind::Pnm => "pnm",
            ImageKind::Tga => "tga",
        }
    }

    /// Whether the encoding can store an alpha channel.
    ///
    /// Images headed for a kind that cannot are flattened to RGB first.
    pub fn supports_alpha(self) -> bool {
        !matches!(self, ImageKind::Jpeg | ImageKind::Bmp)
    }

    /// The matching `image` crate format, used for decoding and for the
    /// encoders that take no options.
    pub fn image_format(self) -> ImageFormat {
        match self {
            ImageKind::Jpeg => ImageFormat::Jpeg,
            ImageKind::Png => ImageFormat::Png,
            ImageKind::WebP => ImageFormat::WebP,
            ImageKind::Gif => ImageFormat::Gif,
            ImageKind::Bmp => ImageFormat::Bmp,
            ImageKind::Tiff => ImageFormat::Tiff,
            ImageKind::Ico => ImageFormat::Ico,
            ImageKind::Avif => ImageFormat::Avif,
            ImageKind::Qoi => ImageFormat::Qoi,
            ImageKind::Hdr => ImageFormat::Hdr,
            ImageKind::OpenExr => ImageFormat::OpenExr,
            ImageKind::Dds => ImageFormat::Dds,
            ImageKind::Farbfeld => ImageFormat::Farbfeld,
            ImageKind::Pnm => ImageFormat::Pnm,
            ImageKind::Tga => ImageFormat::Tga,
        }
    }

    /// Reverse of [`image_format`](Self::image_format), for formats the
    /// decoder reports.
    pub fn from_image_format(format: ImageFormat) -> Option<Self> {
        Some(match format {
            ImageFormat::Jpeg => ImageKind::Jpeg,
            ImageFormat::Png => ImageKind::Png,
            ImageFormat::WebP => ImageKind::WebP,
            ImageFormat::Gif => ImageKind::Gif,
            ImageFormat::Bmp => ImageKind::Bmp,
            ImageFormat::Tiff => ImageKind::Tiff,
            ImageFormat::Ico => ImageKind::Ico,
            ImageFormat::Avif => ImageKind::Avif,
            ImageFormat::Qoi => ImageKind::Qoi,
            ImageFormat::Hdr => ImageKind::Hdr,
            ImageFormat::OpenExr => ImageKind::OpenExr,
            ImageFormat::Dds => ImageKind::Dds,
            ImageFormat::Farbfeld => ImageKind::Farbfeld,
            ImageFormat::Pnm => ImageKind::Pnm,
            ImageFormat::Tga => ImageKind::Tga,
            _ => return None,
        })
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classify a buffer by its magic bytes.
///
/// Returns `None` for buffers shorter than [`MIN_SNIFF_LEN`] and for
/// anything without a recognized signature.
pub fn classify(data: &[u8]) -> Option<ImageKind> {
    if data.len() < MIN_SNIFF_LEN {
        return None;
    }

    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(ImageKind::Jpeg);
    }
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some(ImageKind::Png);
    }
    if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some(ImageKind::WebP);
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some(ImageKind::Gif);
    }

    if data.starts_with(b"BM") {
        return Some(ImageKind::Bmp);
    }
    if data.starts_with(b"II\x2a\x00") || data.starts_with(b"MM\x00\x2a") {
        return Some(ImageKind::Tiff);
    }
    if matches!(&data[..4], b"\x00\x00\x01\x00" | b"\x00\x00\x02\x00") {
        return Some(ImageKind::Ico);
    }

    if matches!(&data[4..12], b"ftypavif" | b"ftypavis") {
        return Some(ImageKind::Avif);
    }
    if data.starts_with(b"qoif") {
        return Some(ImageKind::Qoi);
    }
    if data.starts_with(b"#?RADIANCE") || data.starts_with(b"\x0a\x20\x20\x20") {
        return Some(ImageKind::Hdr);
    }
    if data.starts_with(&[0x76, 0x2F, 0x31, 0x01]) {
        return Some(ImageKind::OpenExr);
    }

    if data.starts_with(b"DDS ") {
        return Some(ImageKind::Dds);
    }
    if data.starts_with(b"farbfeld") {
        return Some(ImageKind::Farbfeld);
    }
    if data[0] == b'P' && (b'1'..=b'6').contains(&data[1]) && data[2] == b'\n' {
        return Some(ImageKind::Pnm);
    }

    None
}
