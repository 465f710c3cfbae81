//! Error taxonomy shared across the pipeline.
//!
//! Each concern owns its own enum (storage, records, queue and config errors
//! live next to their code). The two defined here cross module boundaries:
//!
//! - [`ConfigurationError`]: invalid breakpoint sets, context setters and
//!   conversion definitions. Raised at configuration time, never defaulted.
//! - [`ValidationError`]: bad input: unsupported uploads, oversize files,
//!   degenerate dimensions. Raised before anything is persisted.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("{field} for breakpoint '{breakpoint}' is not defined for ImageContext with key '{context}'")]
    MissingBreakpointValue {
        field: &'static str,
        breakpoint: String,
        context: String,
    },
    #[error("unknown breakpoint '{breakpoint}' for ImageContext with key '{context}'")]
    UnknownBreakpoint { breakpoint: String, context: String },
    #[error("{field} value for breakpoint '{breakpoint}' must be between 0 and 100 for ImageContext with key '{context}' (got {value})")]
    OutOfRange {
        field: &'static str,
        breakpoint: String,
        context: String,
        value: u32,
    },
    #[error("breakpoints '{first}' and '{second}' share min width {min_width}")]
    DuplicateMinWidth {
        first: String,
        second: String,
        min_width: u32,
    },
    #[error("breakpoint key '{0}' is defined more than once")]
    DuplicateBreakpoint(String),
    #[error("breakpoints '{first}' and '{second}' both write files named '{slug}'")]
    DuplicateSlug {
        first: String,
        second: String,
        slug: String,
    },
    #[error("breakpoint '{0}' must have a min width greater than zero")]
    ZeroMinWidth(String),
    #[error("at least one breakpoint must be configured")]
    NoBreakpoints,
    #[error("invalid aspect ratio '{0}': expected \"H:V\" with both parts greater than zero")]
    InvalidAspectRatio(String),
    #[error("invalid crop position '{0}'")]
    InvalidCropPosition(String),
    #[error("invalid conversion '{name}': {reason}")]
    InvalidConversion { name: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("the file type {0} is not supported")]
    UnsupportedMimeType(String),
    #[error("the file could not be decoded as an image: {0}")]
    Undecodable(String),
    #[error("the file size {size} is too large, the maximum file size is {max} bytes")]
    FileTooLarge { size: u64, max: u64 },
    #[error("image dimensions {width}x{height} are degenerate")]
    DegenerateDimensions { width: u32, height: u32 },
    #[error("crop offset ({x}, {y}) lies outside the {width}x{height} image")]
    CropOutsideImage { x: u32, y: u32, width: u32, height: u32 },
    #[error("pixel price is undefined for a {width}x{height} image of {size} bytes")]
    UndefinedPixelPrice { width: u32, height: u32, size: u64 },
}
