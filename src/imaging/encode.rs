//! Per-format encoder options and the encoders that honor them.
//!
//! [`EncodeOptions::for_kind`] is the single table that decides how each
//! [`ImageKind`] is written:
//!
//! | Kind | Options | Encoder |
//! |---|---|---|
//! | JPEG | quality Q, progressive, 4:2:0, optimized Huffman tables | `jpeg-encoder` |
//! | WebP | quality Q, method 6 | `webp` (libwebp, lossy) |
//! | PNG | best compression | `image` PNG encoder |
//! | TIFF | LZW | `tiff` |
//! | GIF | interlaced, single frame | `gif` |
//! | everything else | encoder defaults | `image` |
//!
//! Every encoder declares which options it understands. Handing one an
//! option it cannot honor fails with [`EncodeError::UnsupportedParameter`];
//! [`encode_with_fallback`] answers that one error by encoding again with
//! [`EncodeOptions::plain`].
//!
//! The table never produces an option its own encoder rejects, so for
//! options built by [`EncodeOptions::for_kind`] the retry is unreachable. It
//! only catches hand-built options, such as JPEG options handed to the PNG
//! encoder.

use super::params::Quality;
use super::sniff::ImageKind;
use image::codecs::avif::AvifEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::{ColorType, DynamicImage};
use std::borrow::Cow;
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

/// JPEG quality used when no quality option is given.
const DEFAULT_JPEG_QUALITY: u8 = 75;
/// AVIF encoder speed (1 = slowest/best, 10 = fastest) when a quality is given.
const AVIF_SPEED: u8 = 6;
/// NeuQuant speed for GIF palette generation (1 = best, 30 = fastest).
const GIF_QUANT_SPEED: i32 = 10;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("{kind} encoder does not support the '{option}' option")]
    UnsupportedParameter {
        kind: ImageKind,
        option: &'static str,
    },
    #[error("{width}x{height} exceeds the {kind} size limit")]
    TooLarge {
        kind: ImageKind,
        width: u32,
        height: u32,
    },
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("JPEG encoder: {0}")]
    Jpeg(#[from] jpeg_encoder::EncodingError),
    #[error("WebP encoder: {0}")]
    WebP(String),
    #[error("TIFF encoder: {0}")]
    Tiff(#[from] tiff::TiffError),
    #[error("GIF encoder: {0}")]
    Gif(#[from] gif::EncodingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaSubsampling {
    Yuv420,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Maximum deflate level (PNG).
    Best,
    Lzw,
}

/// Optional encoder settings. `Default` is the same as [`plain`](Self::plain).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    pub quality: Option<Quality>,
    pub progressive: bool,
    pub subsampling: Option<ChromaSubsampling>,
    /// WebP `method`, 0 (fast) to 6 (smallest output).
    pub effort: Option<u8>,
    pub compression: Option<Compression>,
    pub interlace: bool,
    /// Spend extra encoder time on smaller output where the encoder can.
    /// A hint: encoders without such a knob ignore it.
    pub optimize: bool,
}

impl EncodeOptions {
    /// No optional parameters at all: the target format's encoder defaults.
    pub fn plain() -> Self {
        Self::default()
    }

    /// The encoder options used for `kind` at the given quality.
    pub fn for_kind(kind: ImageKind, quality: Quality) -> Self {
        let base = Self {
            optimize: true,
            ..Self::default()
        };
        match kind {
            ImageKind::Jpeg => Self {
                quality: Some(quality),
                progressive: true,
                subsampling: Some(ChromaSubsampling::Yuv420),
                ..base
            },
            ImageKind::WebP => Self {
                quality: Some(quality),
                effort: Some(6),
                ..base
            },
            ImageKind::Png => Self {
                compression: Some(Compression::Best),
                ..base
            },
            ImageKind::Tiff => Self {
                compression: Some(Compression::Lzw),
                ..base
            },
            ImageKind::Gif => Self {
                interlace: true,
                ..base
            },
            _ => base,
        }
    }

    /// The first option `kind`'s encoder cannot honor, if any.
    pub fn unsupported_by(&self, kind: ImageKind) -> Option<&'static str> {
        let quality_ok = matches!(kind, ImageKind::Jpeg | ImageKind::WebP | ImageKind::Avif);
        let compression_ok = match self.compression {
            None => true,
            Some(Compression::Best) => kind == ImageKind::Png,
            Some(Compression::Lzw) => kind == ImageKind::Tiff,
        };

        if self.quality.is_some() && !quality_ok {
            Some("quality")
        } else if self.progressive && kind != ImageKind::Jpeg {
            Some("progressive")
        } else if self.subsampling.is_some() && kind != ImageKind::Jpeg {
            Some("subsampling")
        } else if self.effort.is_some() && kind != ImageKind::WebP {
            Some("effort")
        } else if !compression_ok {
            Some("compression")
        } else if self.interlace && kind != ImageKind::Gif {
            Some("interlace")
        } else {
            None
        }
    }
}

/// Encode `img` as `kind` with exactly the given options.
pub fn encode(
    img: &DynamicImage,
    kind: ImageKind,
    opts: &EncodeOptions,
) -> Result<Vec<u8>, EncodeError> {
    if let Some(option) = opts.unsupported_by(kind) {
        return Err(EncodeError::UnsupportedParameter { kind, option });
    }

    match kind {
        ImageKind::Jpeg => encode_jpeg(img, opts),
        ImageKind::WebP => encode_webp(img, opts),
        ImageKind::Png => encode_png(img, opts),
        ImageKind::Tiff if opts.compression == Some(Compression::Lzw) => encode_tiff_lzw(img),
        ImageKind::Gif if opts.interlace => encode_gif_interlaced(img),
        ImageKind::Avif => encode_avif(img, opts),
        _ => encode_default(img, kind),
    }
}

/// Encode with the given options, retrying once with
/// [`EncodeOptions::plain`] if the encoder rejects one of them.
///
/// Never retries for options from [`EncodeOptions::for_kind`].
pub fn encode_with_fallback(
    img: &DynamicImage,
    kind: ImageKind,
    opts: &EncodeOptions,
) -> Result<Vec<u8>, EncodeError> {
    match encode(img, kind, opts) {
        Err(EncodeError::UnsupportedParameter { option, .. }) => {
            debug!(%kind, option, "encoder rejected option, retrying with defaults");
            encode(img, kind, &EncodeOptions::plain())
        }
        other => other,
    }
}

fn dims_u16(img: &DynamicImage, kind: ImageKind) -> Result<(u16, u16), EncodeError> {
    let (width, height) = (img.width(), img.height());
    match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(EncodeError::TooLarge {
            kind,
            width,
            height,
        }),
    }
}

fn is_grayscale(color: ColorType) -> bool {
    matches!(color, ColorType::L8 | ColorType::L16)
}

fn encode_jpeg(img: &DynamicImage, opts: &EncodeOptions) -> Result<Vec<u8>, EncodeError> {
    let (width, height) = dims_u16(img, ImageKind::Jpeg)?;
    let quality = opts
        .quality
        .map(|q| q.value() as u8)
        .unwrap_or(DEFAULT_JPEG_QUALITY);

    let mut out = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut out, quality);
    encoder.set_progressive(opts.progressive);
    encoder.set_optimized_huffman_tables(opts.optimize);
    if opts.subsampling == Some(ChromaSubsampling::Yuv420) {
        encoder.set_sampling_factor(jpeg_encoder::SamplingFactor::R_4_2_0);
    }

    if is_grayscale(img.color()) {
        let luma = img.to_luma8();
        encoder.encode(luma.as_raw(), width, height, jpeg_encoder::ColorType::Luma)?;
    } else {
        let rgb = img.to_rgb8();
        encoder.encode(rgb.as_raw(), width, height, jpeg_encoder::ColorType::Rgb)?;
    }
    Ok(out)
}

fn encode_webp(img: &DynamicImage, opts: &EncodeOptions) -> Result<Vec<u8>, EncodeError> {
    let mut config = webp::WebPConfig::new()
        .map_err(|_| EncodeError::WebP("failed to create WebPConfig".into()))?;
    if let Some(quality) = opts.quality {
        config.quality = quality.value() as f32;
    }
    if let Some(effort) = opts.effort {
        config.method = effort as i32;
    }

    let (width, height) = (img.width(), img.height());
    let encoded = if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        webp::Encoder::from_rgba(rgba.as_raw(), width, height).encode_advanced(&config)
    } else {
        let rgb = img.to_rgb8();
        webp::Encoder::from_rgb(rgb.as_raw(), width, height).encode_advanced(&config)
    };
    let memory = encoded.map_err(|e| EncodeError::WebP(format!("{e:?}")))?;

    Ok(memory.to_vec())
}

fn encode_png(img: &DynamicImage, opts: &EncodeOptions) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    let encoder = match opts.compression {
        Some(Compression::Best) => {
            PngEncoder::new_with_quality(&mut out, CompressionType::Best, PngFilter::Adaptive)
        }
        _ => PngEncoder::new(&mut out),
    };
    to_8bit(img).write_with_encoder(encoder)?;
    Ok(out)
}

fn encode_tiff_lzw(img: &DynamicImage) -> Result<Vec<u8>, EncodeError> {
    use tiff::encoder::{TiffEncoder, colortype, compression::Lzw};

    let (width, height) = (img.width(), img.height());
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor)?;
        if is_grayscale(img.color()) {
            let luma = img.to_luma8();
            encoder.write_image_with_compression::<colortype::Gray8, _>(
                width,
                height,
                Lzw,
                luma.as_raw(),
            )?;
        } else if img.color().has_alpha() {
            let rgba = img.to_rgba8();
            encoder.write_image_with_compression::<colortype::RGBA8, _>(
                width,
                height,
                Lzw,
                rgba.as_raw(),
            )?;
        } else {
            let rgb = img.to_rgb8();
            encoder.write_image_with_compression::<colortype::RGB8, _>(
                width,
                height,
                Lzw,
                rgb.as_raw(),
            )?;
        }
    }
    Ok(cursor.into_inner())
}

fn encode_gif_interlaced(img: &DynamicImage) -> Result<Vec<u8>, EncodeError> {
    let (width, height) = dims_u16(img, ImageKind::Gif)?;
    let mut pixels = img.to_rgba8().into_raw();
    let mut frame = gif::Frame::from_rgba_speed(width, height, &mut pixels, GIF_QUANT_SPEED);
    frame.interlaced = true;

    let mut out = Vec::new();
    {
        // The trailer is written when the encoder drops.
        let mut encoder = gif::Encoder::new(&mut out, width, height, &[])?;
        encoder.write_frame(&frame)?;
    }
    Ok(out)
}

fn encode_avif(img: &DynamicImage, opts: &EncodeOptions) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    let encoder = match opts.quality {
        Some(q) => AvifEncoder::new_with_speed_quality(&mut out, AVIF_SPEED, q.value() as u8),
        None => AvifEncoder::new(&mut out),
    };
    to_8bit(img).write_with_encoder(encoder)?;
    Ok(out)
}

fn encode_default(img: &DynamicImage, kind: ImageKind) -> Result<Vec<u8>, EncodeError> {
    let pixels = match kind {
        ImageKind::Hdr => Cow::Owned(DynamicImage::ImageRgb32F(img.to_rgb32f())),
        ImageKind::OpenExr if img.color().has_alpha() => {
            Cow::Owned(DynamicImage::ImageRgba32F(img.to_rgba32f()))
        }
        ImageKind::OpenExr => Cow::Owned(DynamicImage::ImageRgb32F(img.to_rgb32f())),
        ImageKind::Farbfeld => Cow::Owned(DynamicImage::ImageRgba16(img.to_rgba16())),
        _ => to_8bit(img),
    };

    let mut cursor = Cursor::new(Vec::new());
    pixels.write_to(&mut cursor, kind.image_format())?;
    Ok(cursor.into_inner())
}

/// Most encoders only take 8-bit samples; narrow anything wider.
fn to_8bit(img: &DynamicImage) -> Cow<'_, DynamicImage> {
    match img.color() {
        ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => Cow::Borrowed(img),
        ColorType::L16 => Cow::Owned(DynamicImage::ImageLuma8(img.to_luma8())),
        ColorType::La16 => Cow::Owned(DynamicImage::ImageLumaA8(img.to_luma_alpha8())),
        color if color.has_alpha() => Cow::Owned(DynamicImage::ImageRgba8(img.to_rgba8())),
        _ => Cow::Owned(DynamicImage::ImageRgb8(img.to_rgb8())),
    }
}
