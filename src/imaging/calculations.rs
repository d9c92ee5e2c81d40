//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Calculate the output size for a size limit on the constrained axis.
///
/// The constrained axis is the *shorter* one: width for portrait images,
/// height for landscape and square ones. When that axis exceeds `limit`,
/// both axes are scaled by `limit / axis`; the other axis is recomputed from
/// the same ratio. Both results are truncated toward zero.
///
/// # Arguments
/// * `original` - Source dimensions (width, height)
/// * `limit` - Maximum size of the constrained axis in pixels
///
/// # Returns
/// * `Some((width, height))` - New dimensions when a downscale is needed
/// * `None` - The image already fits; never upscales
///
/// # Examples
/// ```
/// # use docshrink::imaging::calculate_constrained_dimensions;
/// // Portrait: width is constrained
/// assert_eq!(calculate_constrained_dimensions((2000, 3000), 1000), Some((1000, 1500)));
///
/// // Landscape: height is constrained
/// assert_eq!(calculate_constrained_dimensions((3000, 2000), 1000), Some((1500, 1000)));
///
/// // Already within the limit
/// assert_eq!(calculate_constrained_dimensions((800, 600), 1000), None);
/// ```
pub fn calculate_constrained_dimensions(original: (u32, u32), limit: u32) -> Option<(u32, u32)> {
    let (w, h) = (original.0 as f64, original.1 as f64);
    let limit_f = limit as f64;

    let (new_w, new_h) = if w < h {
        // Portrait: width is the constrained axis
        if w <= limit_f {
            return None;
        }
        (limit_f, h * (limit_f / w))
    } else {
        // Landscape or square: height is the constrained axis
        if h <= limit_f {
            return None;
        }
        (w * (limit_f / h), limit_f)
    };

    Some(((new_w as u32).max(1), (new_h as u32).max(1)))
}
