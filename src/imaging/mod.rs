//! Derivation engine: pure Rust, on the `image` crate.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::guess_format` + header dimensions |
//! | **Breakpoint crop** | `crop_imm` + Lanczos3 fit + effects |
//! | **Width series** | size-step calculation + Lanczos3 fit |
//! | **Conversion** | centre crop + fit + effects |
//! | **Encode** | JPEG (quality), PNG, lossless WebP |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for crop geometry and width series (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: High-level functions combining calculations + backend

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, Identified, ImageBackend};
pub use calculations::{
    WidthSeriesConfig, anchor_offset, auto_crop_dimensions, fit_width, responsive_min_width,
    responsive_widths,
};
pub use operations::{
    OperationError, ResponsiveSettings, ResponsiveVariant, derive_breakpoint, derive_conversion,
    derive_responsive_variants, output_formats,
};
pub use params::{CropOp, DeriveParams, Effect, EncodedImage, OutputFormat, Quality, ResizeParams};
pub use rust_backend::RustBackend;
