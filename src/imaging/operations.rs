//! High-level image operations.
//!
//! These functions combine calculations with backend execution. They take a
//! resolved context (or a conversion definition), compute parameters, and call
//! the backend. Nothing here touches storage: inputs and outputs are buffers.

use super::backend::{BackendError, ImageBackend};
use super::calculations::{
    WidthSeriesConfig, auto_crop_dimensions, clamp_exact_crop, responsive_min_width, responsive_widths,
};
use super::params::{CropOp, DeriveParams, Effect, EncodedImage, OutputFormat, Quality, ResizeParams};
use crate::context::ResolvedBreakpoint;
use crate::conversion::ConversionDefinition;
use crate::error::ValidationError;
use crate::types::{CropData, CropPosition};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OperationError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, OperationError>;

/// Get image dimensions using the backend.
pub fn get_dimensions(
    backend: &(impl ImageBackend + ?Sized),
    source: &[u8],
) -> Result<(u32, u32)> {
    let dims = backend.identify(source)?.dimensions;
    Ok((dims.width, dims.height))
}

/// Primary format first, then a WebP sibling when wanted and distinct.
pub fn output_formats(primary: OutputFormat, with_webp: bool) -> Vec<OutputFormat> {
    let mut formats = vec![primary];
    if with_webp && primary != OutputFormat::WebP {
        formats.push(OutputFormat::WebP);
    }
    formats
}

/// What a breakpoint crop task will ask the backend for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointPlan {
    pub crop: CropOp,
    pub max_width: Option<u32>,
    pub effects: Vec<Effect>,
}

/// Plan the crop → fit → effects pipeline for one breakpoint.
///
/// Explicit crop data wins: with both offsets it is an exact cut, otherwise
/// it is cut around the breakpoint's anchor. Without crop data the box is
/// derived from the aspect ratio (no aspect ratio keeps the full frame).
/// An exact cut that misses the source entirely is rejected.
pub fn plan_breakpoint(
    source: (u32, u32),
    crop_data: Option<CropData>,
    resolved: &ResolvedBreakpoint,
) -> Result<BreakpointPlan> {
    let crop = match crop_data {
        Some(data) => match data.offset() {
            Some((x, y)) => {
                if clamp_exact_crop(source, x, y, data.width, data.height).is_none() {
                    return Err(ValidationError::CropOutsideImage {
                        x,
                        y,
                        width: source.0,
                        height: source.1,
                    }
                    .into());
                }
                CropOp::Exact {
                    x,
                    y,
                    width: data.width,
                    height: data.height,
                }
            }
            None => CropOp::Anchored {
                width: data.width,
                height: data.height,
                position: resolved.crop_position,
            },
        },
        None => match resolved.aspect_ratio {
            Some(ratio) => {
                let (width, height) =
                    auto_crop_dimensions(source, resolved.max_width, ratio.as_tuple());
                CropOp::Anchored {
                    width,
                    height,
                    position: resolved.crop_position,
                }
            }
            None => CropOp::None,
        },
    };

    let mut effects = Vec::new();
    if let Some(blur) = resolved.blur {
        effects.push(Effect::Blur(blur));
    }
    if resolved.greyscale {
        effects.push(Effect::Greyscale);
    }
    if resolved.sepia {
        effects.push(Effect::Sepia);
    }

    Ok(BreakpointPlan {
        crop,
        max_width: resolved.max_width,
        effects,
    })
}

/// Produce the breakpoint crop (and its WebP sibling when enabled).
pub fn derive_breakpoint(
    backend: &(impl ImageBackend + ?Sized),
    source: &[u8],
    primary: OutputFormat,
    crop_data: Option<CropData>,
    resolved: &ResolvedBreakpoint,
    quality: Quality,
) -> Result<Vec<EncodedImage>> {
    let dims = get_dimensions(backend, source)?;
    let plan = plan_breakpoint(dims, crop_data, resolved)?;
    let outputs = backend.derive(&DeriveParams {
        source,
        crop: plan.crop,
        max_width: plan.max_width,
        effects: plan.effects,
        formats: output_formats(primary, resolved.generate_webp),
        quality,
    })?;
    Ok(outputs)
}

/// Global knobs for the width series, taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponsiveSettings {
    pub size_step_multiplier: f64,
    pub width_difference_threshold: u32,
    pub min_width: u32,
}

impl Default for ResponsiveSettings {
    fn default() -> Self {
        Self {
            size_step_multiplier: 0.7,
            width_difference_threshold: 100,
            min_width: 100,
        }
    }
}

/// Widths to derive from a breakpoint crop of `dims` and `size` bytes.
pub fn plan_responsive_widths(
    dims: (u32, u32),
    size: u64,
    resolved: &ResolvedBreakpoint,
    settings: &ResponsiveSettings,
) -> std::result::Result<Vec<u32>, ValidationError> {
    let min_width = responsive_min_width(
        resolved.breakpoint.min_width,
        resolved.min_width,
        resolved.max_width,
        settings.min_width,
    );
    responsive_widths(
        dims,
        size,
        &WidthSeriesConfig {
            size_step_multiplier: settings.size_step_multiplier,
            width_difference_threshold: settings.width_difference_threshold,
            min_width,
        },
    )
}

/// One accepted width and its encoded files.
#[derive(Debug, Clone)]
pub struct ResponsiveVariant {
    pub width: u32,
    pub outputs: Vec<EncodedImage>,
}

/// Derive every width of the series from the breakpoint crop.
///
/// The crop is only fitted, never re-cropped, so each variant keeps its
/// proportions.
pub fn derive_responsive_variants(
    backend: &(impl ImageBackend + ?Sized),
    crop: &[u8],
    primary: OutputFormat,
    resolved: &ResolvedBreakpoint,
    settings: &ResponsiveSettings,
    quality: Quality,
) -> Result<Vec<ResponsiveVariant>> {
    let dims = get_dimensions(backend, crop)?;
    let widths = plan_responsive_widths(dims, crop.len() as u64, resolved, settings)?;
    let formats = output_formats(primary, resolved.generate_webp);

    widths
        .into_iter()
        .map(|width| {
            let outputs = backend.resize(&ResizeParams {
                source: crop,
                width,
                formats: formats.clone(),
                quality,
            })?;
            Ok(ResponsiveVariant { width, outputs })
        })
        .collect()
}

/// Plan a conversion: centre crop to the resolved box, then its effects.
pub fn plan_conversion(source: (u32, u32), definition: &ConversionDefinition) -> BreakpointPlan {
    let (target_w, target_h) = definition.resolve_dimensions(source);
    let (crop_w, crop_h) =
        auto_crop_dimensions(source, None, (target_w.max(1), target_h.max(1)));

    let fx = definition.effects;
    let mut effects = Vec::new();
    if fx.blur > 0 {
        effects.push(Effect::Blur(fx.blur));
    }
    if fx.pixelate > 0 {
        effects.push(Effect::Pixelate(fx.pixelate));
    }
    if fx.greyscale {
        effects.push(Effect::Greyscale);
    }
    if fx.sepia {
        effects.push(Effect::Sepia);
    }
    if fx.sharpen > 0 {
        effects.push(Effect::Sharpen(fx.sharpen));
    }

    BreakpointPlan {
        crop: CropOp::Anchored {
            width: crop_w,
            height: crop_h,
            position: CropPosition::Center,
        },
        max_width: Some(target_w),
        effects,
    }
}

/// Produce a conversion file (and its WebP sibling when enabled).
pub fn derive_conversion(
    backend: &(impl ImageBackend + ?Sized),
    source: &[u8],
    primary: OutputFormat,
    definition: &ConversionDefinition,
    with_webp: bool,
    quality: Quality,
) -> Result<Vec<EncodedImage>> {
    let dims = get_dimensions(backend, source)?;
    let plan = plan_conversion(dims, definition);
    Ok(backend.derive(&DeriveParams {
        source,
        crop: plan.crop,
        max_width: plan.max_width,
        effects: plan.effects,
        formats: output_formats(primary, with_webp),
        quality,
    })?)
}
