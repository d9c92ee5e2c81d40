//! Parameter types for image transcoding.
//!
//! These structs describe *what* to do to every image of a job, not *how* to
//! do it. A [`ParameterBundle`] is built once by the caller (CLI flags over a
//! config file, or any other front end) and passed by value into the core;
//! nothing below it reads ambient configuration.
//!
//! ## Types
//!
//! - [`Quality`]: lossy encoding quality (1-100, default 100), clamped on construction.
//! - [`TargetFormat`]: keep the source encoding or convert to a fixed one.
//! - [`ParameterBundle`]: size limit, quality and target format for one job.

use super::sniff::ImageKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(100)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown image format '{0}' (expected original, jpeg, png, webp, avif, bmp, tiff, gif, qoi, tga or ico)")]
pub struct ParseFormatError(pub String);

/// Output encoding for transcoded images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    /// Re-encode in whatever encoding the source image uses.
    #[default]
    Original,
    #[serde(alias = "jpg")]
    Jpeg,
    Png,
    #[serde(rename = "webp")]
    WebP,
    Avif,
    Bmp,
    #[serde(alias = "tif")]
    Tiff,
    Gif,
    Qoi,
    Tga,
    Ico,
}

impl TargetFormat {
    /// The fixed kind this target names, or `None` for [`TargetFormat::Original`].
    pub fn kind(self) -> Option<ImageKind> {
        match self {
            TargetFormat::Original => None,
            TargetFormat::Jpeg => Some(ImageKind::Jpeg),
            TargetFormat::Png => Some(ImageKind::Png),
            TargetFormat::WebP => Some(ImageKind::WebP),
            TargetFormat::Avif => Some(ImageKind::Avif),
            TargetFormat::Bmp => Some(ImageKind::Bmp),
            TargetFormat::Tiff => Some(ImageKind::Tiff),
            TargetFormat::Gif => Some(ImageKind::Gif),
            TargetFormat::Qoi => Some(ImageKind::Qoi),
            TargetFormat::Tga => Some(ImageKind::Tga),
            TargetFormat::Ico => Some(ImageKind::Ico),
        }
    }

    /// Pick the encoding for one image.
    ///
    /// A fixed target always wins. `Original` keeps the decoded source
    /// encoding, falling back to JPEG when the decoder could not name it.
    pub fn resolve(self, source: Option<ImageKind>) -> ImageKind {
        self.kind().or(source).unwrap_or(ImageKind::Jpeg)
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => f.write_str(kind.name()),
            None => f.write_str("original"),
        }
    }
}

impl FromStr for TargetFormat {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "original" => TargetFormat::Original,
            "jpeg" | "jpg" => TargetFormat::Jpeg,
            "png" => TargetFormat::Png,
            "webp" => TargetFormat::WebP,
            "avif" => TargetFormat::Avif,
            "bmp" => TargetFormat::Bmp,
            "tiff" | "tif" => TargetFormat::Tiff,
            "gif" => TargetFormat::Gif,
            "qoi" => TargetFormat::Qoi,
            "tga" => TargetFormat::Tga,
            "ico" => TargetFormat::Ico,
            _ => return Err(ParseFormatError(s.to_string())),
        })
    }
}

/// Immutable per-job transcode settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParameterBundle {
    /// Size limit in pixels on the constrained axis; `None` disables resizing.
    pub max_dimension: Option<u32>,
    pub quality: Quality,
    pub target_format: TargetFormat,
    /// Carried through to the caller's post-processing; the core ignores it.
    pub keep_import_timestamp: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_100() {
        assert_eq!(Quality::default().value(), 100);
    }

    #[test]
    fn bundle_default_never_resizes() {
        let params = ParameterBundle::default();
        assert_eq!(params.max_dimension, None);
        assert_eq!(params.quality.value(), 100);
        assert_eq!(params.target_format, TargetFormat::Original);
    }

    #[test]
    fn parse_target_format_case_insensitive() {
        assert_eq!("Original".parse(), Ok(TargetFormat::Original));
        assert_eq!("JPG".parse(), Ok(TargetFormat::Jpeg));
        assert_eq!("WebP".parse(), Ok(TargetFormat::WebP));
        assert_eq!(" tif ".parse(), Ok(TargetFormat::Tiff));
        assert!("heic".parse::<TargetFormat>().is_err());
    }

    #[test]
    fn resolve_prefers_fixed_target() {
        assert_eq!(
            TargetFormat::Png.resolve(Some(ImageKind::Jpeg)),
            ImageKind::Png
        );
    }

    #[test]
    fn resolve_original_keeps_source() {
        assert_eq!(
            TargetFormat::Original.resolve(Some(ImageKind::Gif)),
            ImageKind::Gif
        );
    }

    #[test]
    fn resolve_original_unknown_source_falls_back_to_jpeg() {
        assert_eq!(TargetFormat::Original.resolve(None), ImageKind::Jpeg);
    }

    #[test]
    fn display_matches_parse() {
        for name in ["original", "jpeg", "png", "webp", "tiff", "qoi"] {
            let format: TargetFormat = name.parse().unwrap();
            assert_eq!(format.to_string(), name);
        }
    }

    #[test]
    fn deserialize_aliases() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: TargetFormat,
        }
        let w: Wrapper = toml::from_str("format = \"jpg\"").unwrap();
        assert_eq!(w.format, TargetFormat::Jpeg);
        let w: Wrapper = toml::from_str("format = \"webp\"").unwrap();
        assert_eq!(w.format, TargetFormat::WebP);
    }
}
