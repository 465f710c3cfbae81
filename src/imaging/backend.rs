//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the four operations every backend must
//! support: identify, reencode, derive, and resize. All of them work on
//! in-memory buffers; reading and writing blobs is the caller's job.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate and statically linked into the binary.

use super::params::{DeriveParams, EncodedImage, OutputFormat, Quality, ResizeParams};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Unsupported image format")]
    UnsupportedFormat,
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Failed to encode {format:?}: {message}")]
    Encode {
        format: OutputFormat,
        message: String,
    },
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Header-level facts about an encoded image, read without a full decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identified {
    pub dimensions: Dimensions,
    /// `None` when the container is recognised but not writable by us.
    pub format: Option<OutputFormat>,
}

/// Trait for image processing backends.
///
/// Every backend must implement all four operations so the rest of the
/// codebase is backend-agnostic. `Send + Sync` because batch tasks share one
/// backend across rayon workers.
pub trait ImageBackend: Send + Sync {
    /// Sniff format and dimensions.
    fn identify(&self, source: &[u8]) -> Result<Identified, BackendError>;

    /// Decode and encode again in `format`, dropping embedded metadata.
    fn reencode(
        &self,
        source: &[u8],
        format: OutputFormat,
        quality: Quality,
    ) -> Result<EncodedImage, BackendError>;

    /// Crop, fit, apply effects, encode. One output per requested format.
    fn derive(&self, params: &DeriveParams<'_>) -> Result<Vec<EncodedImage>, BackendError>;

    /// Aspect-preserving downscale. One output per requested format.
    fn resize(&self, params: &ResizeParams<'_>) -> Result<Vec<EncodedImage>, BackendError>;
}
