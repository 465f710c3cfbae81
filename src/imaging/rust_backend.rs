//! Pure Rust image processing backend on the `image` crate.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Sniff / identify | `image::guess_format` + `ImageReader::into_dimensions` |
//! | Decode (JPEG, PNG, WebP) | `image::load_from_memory` |
//! | Crop | `DynamicImage::crop_imm` |
//! | Fit / resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Blur | `DynamicImage::blur` (sigma = amount / 5) |
//! | Pixelate | `Nearest` down-then-up resize by the block size |
//! | Greyscale | `DynamicImage::grayscale` |
//! | Sepia | luma + warm tint, per pixel |
//! | Sharpen | `DynamicImage::unsharpen` |
//! | Encode → JPEG | `JpegEncoder::new_with_quality` |
//! | Encode → PNG | `PngEncoder` |
//! | Encode → WebP | `WebPEncoder::new_lossless` |
//!
//! Every step is deterministic, so re-running a derivation with the same
//! inputs produces byte-identical output.

use super::backend::{BackendError, Dimensions, Identified, ImageBackend};
use super::calculations::{anchor_offset, clamp_exact_crop, fit_width};
use super::params::{
    CropOp, DeriveParams, Effect, EncodedImage, OutputFormat, Quality, ResizeParams,
};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader, Rgba};
use std::io::Cursor;

/// Warm tint added to the luma channel for sepia.
const SEPIA_TINT: [u8; 3] = [100, 50, 0];

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn writable_format(format: ImageFormat) -> Option<OutputFormat> {
    match format {
        ImageFormat::Jpeg => Some(OutputFormat::Jpeg),
        ImageFormat::Png => Some(OutputFormat::Png),
        ImageFormat::WebP => Some(OutputFormat::WebP),
        _ => None,
    }
}

/// Decode an in-memory image.
fn load_image(source: &[u8]) -> Result<DynamicImage, BackendError> {
    image::load_from_memory(source).map_err(|e| BackendError::Decode(e.to_string()))
}

fn crop(img: DynamicImage, op: CropOp) -> DynamicImage {
    let source = img.dimensions();
    match op {
        CropOp::None => img,
        CropOp::Exact {
            x,
            y,
            width,
            height,
        } => match clamp_exact_crop(source, x, y, width, height) {
            Some((x, y, w, h)) => img.crop_imm(x, y, w, h),
            None => img,
        },
        CropOp::Anchored {
            width,
            height,
            position,
        } => {
            let w = width.min(source.0).max(1);
            let h = height.min(source.1).max(1);
            let (x, y) = anchor_offset(source, (w, h), position);
            img.crop_imm(x, y, w, h)
        }
    }
}

fn fit(img: DynamicImage, max_width: u32) -> DynamicImage {
    let dims = img.dimensions();
    let (w, h) = fit_width(dims, max_width);
    if (w, h) == dims {
        img
    } else {
        img.resize_exact(w, h, FilterType::Lanczos3)
    }
}

fn pixelate(img: &DynamicImage, block: u32) -> DynamicImage {
    if block <= 1 {
        return img.clone();
    }
    let (w, h) = img.dimensions();
    let small_w = (w / block).max(1);
    let small_h = (h / block).max(1);
    img.resize_exact(small_w, small_h, FilterType::Nearest)
        .resize_exact(w, h, FilterType::Nearest)
}

fn sepia(img: &DynamicImage) -> DynamicImage {
    let mut rgba = img.to_rgba8();
    for Rgba([r, g, b, _]) in rgba.pixels_mut() {
        let luma = 0.299 * *r as f32 + 0.587 * *g as f32 + 0.114 * *b as f32;
        let tone = |tint: u8| (luma + tint as f32).round().clamp(0.0, 255.0) as u8;
        *r = tone(SEPIA_TINT[0]);
        *g = tone(SEPIA_TINT[1]);
        *b = tone(SEPIA_TINT[2]);
    }
    DynamicImage::ImageRgba8(rgba)
}

fn apply_effect(img: DynamicImage, effect: Effect) -> DynamicImage {
    match effect {
        Effect::Blur(0) | Effect::Pixelate(0) | Effect::Sharpen(0) => img,
        Effect::Blur(amount) => img.blur(amount as f32 / 5.0),
        Effect::Pixelate(amount) => pixelate(&img, amount),
        Effect::Greyscale => img.grayscale(),
        Effect::Sepia => sepia(&img),
        Effect::Sharpen(amount) => img.unsharpen(amount as f32 / 20.0, 0),
    }
}

fn encode(
    img: &DynamicImage,
    format: OutputFormat,
    quality: Quality,
) -> Result<EncodedImage, BackendError> {
    let encode_error = |e: image::ImageError| BackendError::Encode {
        format,
        message: e.to_string(),
    };
    let mut bytes = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut bytes, quality.value() as u8);
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(encode_error)?;
        }
        OutputFormat::Png => {
            let encoder = PngEncoder::new(&mut bytes);
            DynamicImage::ImageRgba8(img.to_rgba8())
                .write_with_encoder(encoder)
                .map_err(encode_error)?;
        }
        OutputFormat::WebP => {
            let encoder = WebPEncoder::new_lossless(&mut bytes);
            let pixels = if img.color().has_alpha() {
                DynamicImage::ImageRgba8(img.to_rgba8())
            } else {
                DynamicImage::ImageRgb8(img.to_rgb8())
            };
            pixels.write_with_encoder(encoder).map_err(encode_error)?;
        }
    }
    let (width, height) = img.dimensions();
    Ok(EncodedImage {
        format,
        width,
        height,
        bytes,
    })
}

fn encode_all(
    img: &DynamicImage,
    formats: &[OutputFormat],
    quality: Quality,
) -> Result<Vec<EncodedImage>, BackendError> {
    formats.iter().map(|f| encode(img, *f, quality)).collect()
}

impl ImageBackend for RustBackend {
    fn identify(&self, source: &[u8]) -> Result<Identified, BackendError> {
        let format = image::guess_format(source).map_err(|_| BackendError::UnsupportedFormat)?;
        let (width, height) = ImageReader::with_format(Cursor::new(source), format)
            .into_dimensions()
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(Identified {
            dimensions: Dimensions { width, height },
            format: writable_format(format),
        })
    }

    fn reencode(
        &self,
        source: &[u8],
        format: OutputFormat,
        quality: Quality,
    ) -> Result<EncodedImage, BackendError> {
        let img = load_image(source)?;
        encode(&img, format, quality)
    }

    fn derive(&self, params: &DeriveParams<'_>) -> Result<Vec<EncodedImage>, BackendError> {
        let img = load_image(params.source)?;
        let mut img = crop(img, params.crop);
        if let Some(max_width) = params.max_width {
            img = fit(img, max_width);
        }
        for effect in &params.effects {
            img = apply_effect(img, *effect);
        }
        encode_all(&img, &params.formats, params.quality)
    }

    fn resize(&self, params: &ResizeParams<'_>) -> Result<Vec<EncodedImage>, BackendError> {
        let img = fit(load_image(params.source)?, params.width);
        encode_all(&img, &params.formats, params.quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{jpeg_bytes, png_bytes};
    use crate::types::CropPosition;

    fn derive(source: &[u8], crop: CropOp, max_width: Option<u32>) -> Vec<EncodedImage> {
        RustBackend::new()
            .derive(&DeriveParams {
                source,
                crop,
                max_width,
                effects: Vec::new(),
                formats: vec![OutputFormat::Jpeg, OutputFormat::WebP],
                quality: Quality::new(85),
            })
            .unwrap()
    }

    fn decoded_dims(bytes: &[u8]) -> (u32, u32) {
        image::load_from_memory(bytes).unwrap().dimensions()
    }

    #[test]
    fn identify_synthetic_jpeg() {
        let backend = RustBackend::new();
        let id = backend.identify(&jpeg_bytes(200, 150)).unwrap();
        assert_eq!(id.dimensions, Dimensions { width: 200, height: 150 });
        assert_eq!(id.format, Some(OutputFormat::Jpeg));
    }

    #[test]
    fn identify_png() {
        let id = RustBackend::new().identify(&png_bytes(20, 10)).unwrap();
        assert_eq!(id.format, Some(OutputFormat::Png));
    }

    #[test]
    fn identify_garbage_errors() {
        let result = RustBackend::new().identify(b"definitely not an image");
        assert!(matches!(result, Err(BackendError::UnsupportedFormat)));
    }

    #[test]
    fn reencode_keeps_dimensions() {
        let out = RustBackend::new()
            .reencode(&jpeg_bytes(64, 48), OutputFormat::Jpeg, Quality::default())
            .unwrap();
        assert_eq!((out.width, out.height), (64, 48));
        assert_eq!(decoded_dims(&out.bytes), (64, 48));
    }

    #[test]
    fn exact_crop_produces_requested_size() {
        let outputs = derive(
            &jpeg_bytes(400, 300),
            CropOp::Exact {
                x: 50,
                y: 20,
                width: 120,
                height: 90,
            },
            None,
        );
        for out in &outputs {
            assert_eq!(decoded_dims(&out.bytes), (120, 90));
        }
    }

    #[test]
    fn exact_crop_bounded_by_source() {
        let outputs = derive(
            &jpeg_bytes(100, 100),
            CropOp::Exact {
                x: 80,
                y: 0,
                width: 50,
                height: 50,
            },
            None,
        );
        assert_eq!(decoded_dims(&outputs[0].bytes), (20, 50));
    }

    #[test]
    fn anchored_crop_then_fit() {
        let outputs = derive(
            &jpeg_bytes(1200, 800),
            CropOp::Anchored {
                width: 800,
                height: 800,
                position: CropPosition::Center,
            },
            Some(300),
        );
        assert_eq!((outputs[0].width, outputs[0].height), (300, 300));
        assert_eq!(outputs[1].format, OutputFormat::WebP);
        assert_eq!(decoded_dims(&outputs[1].bytes), (300, 300));
    }

    #[test]
    fn derive_is_deterministic() {
        let source = jpeg_bytes(320, 200);
        let run = || {
            RustBackend::new()
                .derive(&DeriveParams {
                    source: &source,
                    crop: CropOp::Anchored {
                        width: 200,
                        height: 200,
                        position: CropPosition::TopRight,
                    },
                    max_width: Some(150),
                    effects: vec![Effect::Blur(10), Effect::Greyscale, Effect::Sepia],
                    formats: vec![OutputFormat::Jpeg],
                    quality: Quality::default(),
                })
                .unwrap()
        };
        assert_eq!(run()[0].bytes, run()[0].bytes);
    }

    #[test]
    fn greyscale_makes_channels_equal() {
        let img = apply_effect(load_image(&png_bytes(8, 8)).unwrap(), Effect::Greyscale);
        let rgb = img.to_rgb8();
        for px in rgb.pixels() {
            assert_eq!(px[0], px[1]);
            assert_eq!(px[1], px[2]);
        }
    }

    #[test]
    fn sepia_tints_warm() {
        let img = sepia(&load_image(&png_bytes(4, 4)).unwrap());
        for px in img.to_rgb8().pixels() {
            assert!(px[0] >= px[1] && px[1] >= px[2]);
        }
    }

    #[test]
    fn pixelate_keeps_dimensions() {
        let img = apply_effect(load_image(&png_bytes(40, 30)).unwrap(), Effect::Pixelate(10));
        assert_eq!(img.dimensions(), (40, 30));
    }

    #[test]
    fn resize_fits_width_and_keeps_ratio() {
        let outputs = RustBackend::new()
            .resize(&ResizeParams {
                source: &jpeg_bytes(400, 200),
                width: 100,
                formats: vec![OutputFormat::Jpeg],
                quality: Quality::default(),
            })
            .unwrap();
        assert_eq!(decoded_dims(&outputs[0].bytes), (100, 50));
    }

    #[test]
    fn derive_undecodable_source_errors() {
        let result = RustBackend::new().derive(&DeriveParams {
            source: b"nope",
            crop: CropOp::None,
            max_width: None,
            effects: Vec::new(),
            formats: vec![OutputFormat::Jpeg],
            quality: Quality::default(),
        });
        assert!(matches!(result, Err(BackendError::Decode(_))));
    }
}
