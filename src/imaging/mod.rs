//! Image processing in pure Rust, in memory.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Classify** | magic-byte table in [`sniff`] |
//! | **Identify** | `image::ImageReader::into_dimensions`, `avif-parse` for AVIF |
//! | **Decode** | `image` decoders, `rav1d` for AVIF |
//! | **Resize** | Lanczos3, shorter axis constrained, never upscales |
//! | **Encode** | `jpeg-encoder`, `webp`, `tiff`, `gif`, `image` |
//!
//! The module is split into:
//! - **Sniff**: [`classify`] and the closed [`ImageKind`] enum
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: [`ParameterBundle`] and its parts
//! - **Encode**: The per-kind encoder option table and fallback retry
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: [`transcode`], which never fails

mod avif;
pub mod backend;
mod calculations;
pub mod encode;
pub mod operations;
mod params;
pub mod rust_backend;
pub mod sniff;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::calculate_constrained_dimensions;
pub use operations::{TranscodeResult, get_dimensions, transcode};
pub use params::{ParameterBundle, ParseFormatError, Quality, TargetFormat};
pub use rust_backend::RustBackend;
pub use sniff::{ImageKind, MIN_SNIFF_LEN, classify};
