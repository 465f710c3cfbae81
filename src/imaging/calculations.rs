//! Pure calculation functions for crop geometry and the responsive width series.
//!
//! All functions here are pure and testable without any I/O or images.

use crate::error::ValidationError;
use crate::types::{Alignment, CropPosition};

/// Crop box for a breakpoint with no explicit crop data.
///
/// The box keeps `aspect` and is bounded by the narrower of `max_width` and
/// the source width, and by the source height. The width-derived candidate
/// (full height, width from the ratio) wins whenever it fits.
///
/// # Examples
/// ```
/// # use image_library::imaging::auto_crop_dimensions;
/// // 1200x800 source, 1:1, max width 300 → 300x300
/// assert_eq!(auto_crop_dimensions((1200, 800), Some(300), (1, 1)), (300, 300));
///
/// // 1200x800 source, 1:1, no max width → 800x800
/// assert_eq!(auto_crop_dimensions((1200, 800), None, (1, 1)), (800, 800));
/// ```
pub fn auto_crop_dimensions(
    source: (u32, u32),
    max_width: Option<u32>,
    aspect: (u32, u32),
) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (h, v) = aspect;
    let bound_w = max_width.map_or(src_w, |m| m.min(src_w));
    let bound_h = src_h;

    let possible_w = bound_h as f64 * h as f64 / v as f64;
    let possible_h = bound_w as f64 * v as f64 / h as f64;

    if possible_w <= bound_w as f64 {
        ((possible_w.round() as u32).max(1), bound_h)
    } else {
        (bound_w, (possible_h.round() as u32).clamp(1, bound_h.max(1)))
    }
}

/// Top-left corner of a `crop`-sized box placed at `position` inside `source`.
pub fn anchor_offset(source: (u32, u32), crop: (u32, u32), position: CropPosition) -> (u32, u32) {
    let place = |outer: u32, inner: u32, alignment: Alignment| {
        let slack = outer.saturating_sub(inner);
        match alignment {
            Alignment::Start => 0,
            Alignment::Middle => slack / 2,
            Alignment::End => slack,
        }
    };
    (
        place(source.0, crop.0, position.horizontal()),
        place(source.1, crop.1, position.vertical()),
    )
}

/// Clamp an exact crop rectangle to the source extents.
///
/// Returns `(x, y, width, height)`, or `None` when nothing of the rectangle
/// lies inside the source.
pub fn clamp_exact_crop(
    source: (u32, u32),
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> Option<(u32, u32, u32, u32)> {
    let (src_w, src_h) = source;
    if x >= src_w || y >= src_h || width == 0 || height == 0 {
        return None;
    }
    Some((x, y, width.min(src_w - x), height.min(src_h - y)))
}

/// Shrink `dims` to at most `max_width` wide, keeping proportions. Never upscales.
pub fn fit_width(dims: (u32, u32), max_width: u32) -> (u32, u32) {
    let (w, h) = dims;
    if w <= max_width || max_width == 0 {
        return dims;
    }
    let scaled_h = (h as f64 * max_width as f64 / w as f64).round() as u32;
    (max_width, scaled_h.max(1))
}

/// Smallest width the series may go down to for one breakpoint.
///
/// Without a configured max width the breakpoint's own min width applies;
/// with one, the context's min width (or zero). Either way the global floor
/// caps it from above.
pub fn responsive_min_width(
    breakpoint_min_width: u32,
    context_min_width: Option<u32>,
    context_max_width: Option<u32>,
    global_min_width: u32,
) -> u32 {
    let local = match context_max_width {
        None => breakpoint_min_width,
        Some(_) => context_min_width.unwrap_or(0),
    };
    local.min(global_min_width)
}

/// Tuning knobs for [`responsive_widths`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WidthSeriesConfig {
    /// Multiplier applied to the predicted file size each step, in (0, 1).
    pub size_step_multiplier: f64,
    /// Minimum distance from the last accepted width.
    pub width_difference_threshold: u32,
    pub min_width: u32,
}

/// Widths for the responsive variants of a `dims` image of `size` bytes.
///
/// Each step shrinks the predicted file size by the multiplier and converts
/// it back to a width through the image's bytes-per-pixel, so consecutive
/// variants differ by roughly equal byte steps. Widths are strictly
/// decreasing, below the source width, and at least the threshold apart.
pub fn responsive_widths(
    dims: (u32, u32),
    size: u64,
    config: &WidthSeriesConfig,
) -> Result<Vec<u32>, ValidationError> {
    let (width, height) = dims;
    let area = width as u64 * height as u64;
    if size == 0 || area == 0 {
        return Err(ValidationError::UndefinedPixelPrice {
            width,
            height,
            size,
        });
    }

    let m = config.size_step_multiplier;
    if !(m > 0.0 && m < 1.0) {
        return Ok(Vec::new());
    }

    let ratio = height as f64 / width as f64;
    let pixel_price = size as f64 / area as f64;

    let mut widths = Vec::new();
    let mut predicted = size as f64;
    let mut previous = width;
    let mut last_accepted = width;

    loop {
        predicted *= m;
        let candidate = ((predicted / pixel_price) / ratio).sqrt().floor() as u32;

        if candidate == 0 || candidate < config.min_width || candidate >= previous {
            break;
        }
        previous = candidate;

        if last_accepted - candidate < config.width_difference_threshold {
            continue;
        }
        widths.push(candidate);
        last_accepted = candidate;
    }

    Ok(widths)
}
