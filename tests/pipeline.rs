//! End-to-end tests through the public API: upload, attach, update, delete,
//! against a library rooted in a temp directory.

use image::{GenericImageView, ImageEncoder, RgbImage};
use image_library::config::{ConfigError, load_config};
use image_library::context::{BreakpointRange, ImageContext};
use image_library::error::ConfigurationError;
use image_library::library::{AttachAttributes, ImageLibrary, UploadAttributes};
use image_library::records::OwnerRef;
use image_library::regenerate::{AssetState, Regeneration};
use image_library::storage::BlobStore;
use image_library::types::{AspectRatio, CropData};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8])
    });
    let mut bytes = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 90)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
    bytes
}

fn dims(bytes: &[u8]) -> (u32, u32) {
    image::load_from_memory(bytes).unwrap().dimensions()
}

/// Library with a `hero` context: 1:1 everywhere, 300px wide at `sm`.
fn library() -> (TempDir, ImageLibrary) {
    let tmp = TempDir::new().unwrap();
    let library = ImageLibrary::local(load_config(&tmp.path().join("none.toml")).unwrap(), tmp.path())
        .unwrap();
    let hero = ImageContext::new("hero", library.breakpoints())
        .aspect_ratio(AspectRatio::square())
        .max_width_in(BreakpointRange::only("sm"), 300)
        .unwrap();
    library.contexts().register(hero);
    (tmp, library)
}

fn hero() -> AttachAttributes {
    AttachAttributes {
        context: "hero".into(),
        ..AttachAttributes::default()
    }
}

fn owner() -> OwnerRef {
    OwnerRef::new("article", "7", "cover")
}

#[test]
fn upload_attach_produces_square_small_crop_with_webp() {
    let (_tmp, library) = library();
    let source = library
        .upload("landscape.jpg", &jpeg(1200, 800), UploadAttributes::default())
        .unwrap();
    let image = library.attach(&source, owner(), hero()).unwrap();
    assert_eq!(library.asset_state(&image), AssetState::Ready);

    let disk = library.disks().default_disk().unwrap();
    let dir = library
        .layout()
        .derived_dir(&source.uuid.to_string(), &image.uuid.to_string());

    let crop = disk.get(&format!("{dir}/sm.jpg")).unwrap();
    assert_eq!(dims(&crop), (300, 300));
    let webp = disk.get(&format!("{dir}/sm.webp")).unwrap();
    assert_eq!(dims(&webp), (300, 300));

    // every breakpoint has its crop
    for bp in library.breakpoints().keys() {
        assert!(disk.exists(&format!("{dir}/{bp}.jpg")).unwrap(), "{bp}");
    }

    // width variants are narrower than their crop and strictly decreasing
    let paths = library
        .responsive_paths_for_breakpoint(&image, "md", None)
        .unwrap();
    assert!(paths[0].ends_with("/md.jpg"));
    let widths: Vec<u32> = paths[1..]
        .iter()
        .map(|p| dims(&disk.get(p).unwrap()).0)
        .collect();
    assert!(widths.windows(2).all(|w| w[0] > w[1]), "{widths:?}");
    assert!(widths.iter().all(|w| *w < 800));
}

#[test]
fn per_breakpoint_map_missing_md_names_breakpoint_and_context() {
    let (_tmp, library) = library();
    let ratios: BTreeMap<String, AspectRatio> = ["sm", "lg", "xl", "2xl"]
        .into_iter()
        .map(|bp| (bp.to_string(), AspectRatio::square()))
        .collect();

    let err = ImageContext::new("gallery", library.breakpoints())
        .aspect_ratios(&ratios)
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigurationError::MissingBreakpointValue { ref breakpoint, ref context, .. }
            if breakpoint == "md" && context == "gallery"
    ));
    let message = err.to_string();
    assert!(message.contains("'md'"), "{message}");
    assert!(message.contains("'gallery'"), "{message}");
}

#[test]
fn config_file_context_missing_md_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("image-library.toml");
    std::fs::write(
        &path,
        r#"
[[contexts]]
key = "gallery"
aspect_ratio = { sm = "1:1", lg = "4:3", xl = "16:9", "2xl" = "16:9" }
"#,
    )
    .unwrap();

    let err = load_config(&path).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Configuration(ConfigurationError::MissingBreakpointValue { .. })
    ));
    let message = err.to_string();
    assert!(message.contains("md") && message.contains("gallery"), "{message}");
}

#[test]
fn crop_update_regenerates_and_sort_order_update_does_not() {
    let (_tmp, library) = library();
    let source = library
        .upload("p.jpg", &jpeg(1200, 800), UploadAttributes::default())
        .unwrap();
    let image = library.attach(&source, owner(), hero()).unwrap();

    let (_, regeneration) = library
        .update_image(&image.uuid, |i| i.sort_order = 3)
        .unwrap();
    assert_eq!(regeneration, Regeneration::Skipped);

    let (_, regeneration) = library
        .update_image(&image.uuid, |i| {
            i.crop_data
                .insert("lg".into(), Some(CropData::at(640, 360, 100, 50)));
        })
        .unwrap();
    assert!(regeneration.was_dispatched());

    let disk = library.disks().default_disk().unwrap();
    let dir = library
        .layout()
        .derived_dir(&source.uuid.to_string(), &image.uuid.to_string());
    assert_eq!(dims(&disk.get(&format!("{dir}/lg.jpg")).unwrap()), (640, 360));
}

#[test]
fn deleting_source_removes_every_file_below_it() {
    let (_tmp, library) = library();
    let source = library
        .upload("p.jpg", &jpeg(900, 600), UploadAttributes::default())
        .unwrap();
    library.attach(&source, owner(), hero()).unwrap();
    library
        .attach(&source, OwnerRef::new("article", "8", "cover"), hero())
        .unwrap();

    let disk = library.disks().default_disk().unwrap();
    let root = library.layout().source_dir(&source.uuid.to_string());
    assert!(disk.all_files(&root).unwrap().len() > 2);

    library.delete_source(&source.uuid).unwrap();

    assert!(disk.all_files(&root).unwrap().is_empty());
    assert!(library.sources().unwrap().is_empty());
    assert!(library.images().unwrap().is_empty());
}

#[test]
fn records_survive_reopening_the_library() {
    let tmp = TempDir::new().unwrap();
    let config = load_config(&tmp.path().join("none.toml")).unwrap();
    let uuid = {
        let library = ImageLibrary::local(config.clone(), tmp.path()).unwrap();
        library
            .upload("p.jpg", &jpeg(100, 80), UploadAttributes::default())
            .unwrap()
            .uuid
    };

    let reopened = ImageLibrary::local(config, tmp.path()).unwrap();
    let source = reopened.source(&uuid).unwrap();
    assert_eq!((source.width, source.height), (100, 80));
    assert!(tmp.path().join("records.json").exists());
}
