//! Optimizer configuration.
//!
//! Handles loading, validating, and merging `docshrink.toml`. Stock defaults
//! are overridden by a user config file, and CLI flags override both. The
//! result is turned into a [`ParameterBundle`] once and passed down by value;
//! nothing below the CLI reads configuration.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [optimize]
//! resize = true             # Set to false to never resize
//! max_size = 1080           # Limit on the shorter side, in pixels
//! quality = 85              # Lossy encoding quality (1-100)
//! format = "original"       # original, jpeg, png, webp, avif, bmp, tiff, gif, qoi, tga, ico
//! keep_import_time = true   # Outputs inherit the source modification time
//!
//! [processing]
//! max_processes = 4         # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse. Override just the values you want:
//!
//! ```toml
//! [optimize]
//! quality = 70
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{ParameterBundle, Quality, TargetFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Config file looked up in the working directory when `--config` is absent.
pub const CONFIG_FILE_NAME: &str = "docshrink.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Optimizer configuration loaded from `docshrink.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    /// Image transcoding settings.
    pub optimize: OptimizeConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl OptimizerConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.optimize.quality) {
            return Err(ConfigError::Validation(
                "optimize.quality must be 1-100".into(),
            ));
        }
        if self.optimize.max_size == 0 {
            return Err(ConfigError::Validation(
                "optimize.max_size must be greater than 0".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// The per-job parameters for the core.
    pub fn to_parameters(&self) -> ParameterBundle {
        let opt = &self.optimize;
        ParameterBundle {
            max_dimension: opt.resize.then_some(opt.max_size),
            quality: Quality::new(opt.quality),
            target_format: opt.format,
            keep_import_timestamp: opt.keep_import_time,
        }
    }
}

/// Image transcoding settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizeConfig {
    /// Whether to downscale images at all.
    pub resize: bool,
    /// Limit in pixels on the shorter side of each image.
    pub max_size: u32,
    /// Lossy encoding quality (1-100).
    pub quality: u32,
    /// Output encoding for every image.
    pub format: TargetFormat,
    /// Whether outputs inherit the source file's modification time.
    pub keep_import_time: bool,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            resize: true,
            max_size: 1080,
            quality: 85,
            format: TargetFormat::Original,
            keep_import_time: true,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of documents optimized in parallel.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(OptimizerConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<OptimizerConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: OptimizerConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from a file.
///
/// A missing file yields the stock defaults; a file that exists but does not
/// parse or validate is an error.
pub fn load_config(path: &Path) -> Result<OptimizerConfig, ConfigError> {
    if !path.exists() {
        return resolve_config(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    resolve_config(Some(value))
}

/// Returns a fully-commented stock `docshrink.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# docshrink Configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# docshrink reads ./docshrink.toml unless --config points elsewhere.
# Command-line flags override anything set here.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Image optimization
# ---------------------------------------------------------------------------
[optimize]
# Downscale large images. Set to false to keep every image's dimensions.
resize = true

# Limit in pixels on the shorter side of each image (width for portrait,
# height for landscape). Smaller images are never enlarged.
max_size = 1080

# Lossy encoding quality (1 = smallest, 100 = best). PNG ignores it.
quality = 85

# Output encoding for every image:
#   original, jpeg, png, webp, avif, bmp, tiff, gif, qoi, tga, ico
# "original" keeps each image's own encoding.
format = "original"

# Give each optimized document the modification time of its source.
keep_import_time = true

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum documents optimized in parallel.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
