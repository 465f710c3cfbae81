//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the high-level [`operations`](super::operations) module
//! (which decides which files a task produces) and the
//! [`backend`](super::backend) (which does the pixel work). Backends can be
//! swapped (e.g. a recording mock in tests) without touching the planning.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`OutputFormat`]: Encodable formats and their extensions / mime types.
//! - [`CropOp`]: Exact, anchored, or no crop.
//! - [`Effect`]: One visual effect; a derivation applies a list in order.
//! - [`DeriveParams`]: Crop, fit, effects, then encode to one or more formats.
//! - [`ResizeParams`]: Aspect-preserving downscale to a width, then encode.

use crate::types::CropPosition;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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
        Self(90)
    }
}

/// Formats the pipeline can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
}

impl OutputFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::WebP => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
        }
    }
}

/// How to cut the source before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropOp {
    /// Keep the whole frame.
    None,
    /// Cut `width × height` at a pixel offset.
    Exact {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    /// Cut `width × height` around an anchor.
    Anchored {
        width: u32,
        height: u32,
        position: CropPosition,
    },
}

/// A single visual effect. Numeric amounts are 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Blur(u32),
    Pixelate(u32),
    Greyscale,
    Sepia,
    Sharpen(u32),
}

/// Crop → fit → effects → encode.
#[derive(Debug, Clone, PartialEq)]
pub struct DeriveParams<'a> {
    pub source: &'a [u8],
    pub crop: CropOp,
    /// Downscale (never upscale) to at most this width after cropping.
    pub max_width: Option<u32>,
    pub effects: Vec<Effect>,
    /// One output per format, in this order.
    pub formats: Vec<OutputFormat>,
    pub quality: Quality,
}

/// Aspect-preserving downscale to `width`, encoded to each format.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeParams<'a> {
    pub source: &'a [u8],
    pub width: u32,
    pub formats: Vec<OutputFormat>,
    pub quality: Quality,
}

/// An encoded output file held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
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
    fn quality_default_is_90() {
        assert_eq!(Quality::default().value(), 90);
    }

    #[test]
    fn output_format_from_extension_is_case_insensitive() {
        assert_eq!(OutputFormat::from_extension("JPEG"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::from_extension("webp"), Some(OutputFormat::WebP));
        assert_eq!(OutputFormat::from_extension("gif"), None);
    }

    #[test]
    fn output_format_mime_round_trips() {
        for format in [OutputFormat::Jpeg, OutputFormat::Png, OutputFormat::WebP] {
            assert_eq!(OutputFormat::from_mime(format.mime_type()), Some(format));
        }
    }
}
