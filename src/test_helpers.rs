//! Shared test utilities for the image-library test suite.
//!
//! Provides synthetic image fixtures (generated in code, no fixture files),
//! a disk-backed library in a temp directory, and lookup helpers that panic
//! with a readable message on miss.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let (tmp, library) = temp_library([hero_context()]);
//! let source = library.upload("photo.jpg", &jpeg_bytes(1200, 800), UploadAttributes::default()).unwrap();
//! assert_blob_dims(&library, &source.original_path(library.layout()), (1200, 800));
//! ```

use image::{DynamicImage, GenericImageView, ImageEncoder, RgbImage};
use tempfile::TempDir;

use crate::breakpoint::Breakpoints;
use crate::config::LibraryConfig;
use crate::context::{BreakpointRange, ImageContext};
use crate::library::ImageLibrary;
use crate::types::AspectRatio;

// =========================================================================
// Image fixtures
// =========================================================================

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

/// A valid JPEG with a gradient so resizes change the byte size.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = gradient(width, height);
    let mut bytes = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 90)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
    bytes
}

/// A valid PNG with the same gradient.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = gradient(width, height);
    let mut bytes = Vec::new();
    image::codecs::png::PngEncoder::new(&mut bytes)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
    bytes
}

/// Decode and return pixel dimensions.
pub fn decoded_dims(bytes: &[u8]) -> (u32, u32) {
    let img: DynamicImage = image::load_from_memory(bytes).unwrap();
    img.dimensions()
}

// =========================================================================
// Library setup
// =========================================================================

/// `hero`: square crops everywhere, max width 300 at `sm`.
pub fn hero_context() -> ImageContext {
    ImageContext::new("hero", &Breakpoints::default())
        .aspect_ratio(AspectRatio::square())
        .max_width_in(BreakpointRange::only("sm"), 300)
        .unwrap()
}

/// A library over a fresh temp directory with `contexts` registered.
///
/// Keep the returned `TempDir` alive for the duration of the test.
pub fn temp_library(contexts: impl IntoIterator<Item = ImageContext>) -> (TempDir, ImageLibrary) {
    let tmp = TempDir::new().unwrap();
    let library = ImageLibrary::local(LibraryConfig::default(), tmp.path()).unwrap();
    library.contexts().register_all(contexts);
    (tmp, library)
}

// =========================================================================
// Blob assertions: panic with a clear message on miss
// =========================================================================

/// Read a blob from the library's default disk. Panics if missing.
pub fn read_blob(library: &ImageLibrary, path: &str) -> Vec<u8> {
    let disk = library.disks().default_disk().unwrap();
    disk.get(path).unwrap_or_else(|e| {
        let files = disk.all_files("").unwrap_or_default();
        panic!("blob '{path}' not readable ({e}). Present: {files:?}")
    })
}

/// Assert a stored image decodes to `dims`.
pub fn assert_blob_dims(library: &ImageLibrary, path: &str, dims: (u32, u32)) {
    assert_eq!(decoded_dims(&read_blob(library, path)), dims, "dimensions of '{path}'");
}
