//! Derivation worker: executes queued tasks against records and disks.
//!
//! Each task loads what it needs by id, runs the pure imaging operations and
//! writes the results through the blob store:
//!
//! | Task | Reads | Writes |
//! |---|---|---|
//! | Crop breakpoint | `original.{ext}` | `{bp}.{ext}`, `{bp}.webp` |
//! | Width series | `{bp}.{ext}` | `{bp}_w{N}.{ext}`, `{bp}_w{N}.webp` |
//! | Conversion | `original.{ext}` | `{slug}.{ext}`, `{slug}.webp` |
//!
//! Files of one output are written primary first. A failure after the primary
//! was written leaves it in place; the next run for the same breakpoint
//! overwrites it.
//!
//! A crop task first removes the breakpoint's previous width variants, so a
//! changed crop never leaves stale widths behind for `srcset`.

use crate::conversion::ConversionRegistry;
use crate::context::{ContextDefaults, ContextRegistry, ResolvedBreakpoint};
use crate::imaging::{
    EncodedImage, ImageBackend, OutputFormat, Quality, ResponsiveSettings, derive_breakpoint,
    derive_conversion, derive_responsive_variants,
};
use crate::naming::{PathLayout, belongs_to_breakpoint, parse_width};
use crate::queue::{Task, TaskError, TaskRunner};
use crate::records::{ConversionRecord, DerivedImage, RecordId, RecordStore, SourceImage};
use crate::storage::{BlobStore, Disks};
use std::sync::Arc;

/// Settings shared by every task.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub layout: PathLayout,
    pub defaults: ContextDefaults,
    pub responsive: ResponsiveSettings,
    pub quality: Quality,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            layout: PathLayout::new("image-library"),
            defaults: ContextDefaults::default(),
            responsive: ResponsiveSettings::default(),
            quality: Quality::default(),
        }
    }
}

/// The extension a derived file is stored under: the source's own extension
/// for its format, the format's canonical one otherwise.
pub fn file_extension(source: &SourceImage, format: OutputFormat) -> String {
    if source.format() == Some(format) {
        source.extension.clone()
    } else {
        format.extension().to_string()
    }
}

pub struct DerivationWorker {
    records: Arc<dyn RecordStore>,
    disks: Disks,
    contexts: Arc<ContextRegistry>,
    conversions: Arc<ConversionRegistry>,
    backend: Arc<dyn ImageBackend>,
    settings: WorkerSettings,
}

/// A derived image with everything needed to derive one of its breakpoints.
struct BreakpointJob {
    image: DerivedImage,
    source: SourceImage,
    resolved: ResolvedBreakpoint,
    primary: OutputFormat,
    disk: Arc<dyn BlobStore>,
}

impl DerivationWorker {
    pub fn new(
        records: Arc<dyn RecordStore>,
        disks: Disks,
        contexts: Arc<ContextRegistry>,
        conversions: Arc<ConversionRegistry>,
        backend: Arc<dyn ImageBackend>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            records,
            disks,
            contexts,
            conversions,
            backend,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    fn primary_format(source: &SourceImage) -> Result<OutputFormat, TaskError> {
        source
            .format()
            .ok_or_else(|| TaskError::UnsupportedFormat(source.extension.clone()))
    }

    fn load_job(&self, image_id: RecordId, breakpoint: &str) -> Result<BreakpointJob, TaskError> {
        let image = self.records.image(image_id)?;
        let source = self.records.source(image.source_image_id)?;
        let context = self
            .contexts
            .get(&image.context)
            .ok_or_else(|| TaskError::UnknownContext(image.context.clone()))?;
        let resolved = context
            .resolve(breakpoint, &self.settings.defaults)
            .ok_or_else(|| TaskError::UnknownBreakpoint {
                context: image.context.clone(),
                breakpoint: breakpoint.to_string(),
            })?;
        let primary = Self::primary_format(&source)?;
        let disk = self.disks.get(image.disk_or(&source))?;
        Ok(BreakpointJob {
            image,
            source,
            resolved,
            primary,
            disk,
        })
    }

    fn crop_path(&self, job: &BreakpointJob, format: OutputFormat) -> String {
        self.settings.layout.breakpoint(
            &job.source.uuid_str(),
            &job.image.uuid_str(),
            &job.resolved.breakpoint.slug(),
            &file_extension(&job.source, format),
        )
    }

    /// Crop, fit and apply effects for one breakpoint.
    pub fn crop_breakpoint(&self, image_id: RecordId, breakpoint: &str) -> Result<(), TaskError> {
        let job = self.load_job(image_id, breakpoint)?;
        let original = job.source.original_path(&self.settings.layout);
        let source_bytes = self.disks.get(&job.source.disk)?.get(&original)?;

        self.remove_width_variants(&job)?;

        let crop_data = job.image.crop_data.get(breakpoint).copied().flatten();
        let outputs = derive_breakpoint(
            self.backend.as_ref(),
            &source_bytes,
            job.primary,
            crop_data,
            &job.resolved,
            self.settings.quality,
        )?;
        for output in &outputs {
            job.disk.put(&self.crop_path(&job, output.format), &output.bytes)?;
        }
        tracing::debug!(
            derived = %job.image.uuid,
            breakpoint,
            width = outputs.first().map(|o| o.width).unwrap_or(0),
            "breakpoint crop written"
        );
        Ok(())
    }

    fn remove_width_variants(&self, job: &BreakpointJob) -> Result<(), TaskError> {
        let dir = self
            .settings
            .layout
            .derived_dir(&job.source.uuid_str(), &job.image.uuid_str());
        let slug = job.resolved.breakpoint.slug();
        for path in job.disk.files(&dir)? {
            let stale = parse_width(&path).is_some()
                && [job.primary, OutputFormat::WebP].iter().any(|format| {
                    belongs_to_breakpoint(&path, &slug, &file_extension(&job.source, *format))
                });
            if stale {
                job.disk.delete(&path)?;
            }
        }
        Ok(())
    }

    /// Derive the width series from the breakpoint crop written earlier.
    pub fn responsive_widths(&self, image_id: RecordId, breakpoint: &str) -> Result<(), TaskError> {
        let job = self.load_job(image_id, breakpoint)?;
        if !job.resolved.generate_responsive_versions {
            tracing::debug!(derived = %job.image.uuid, breakpoint, "responsive versions disabled");
            return Ok(());
        }

        let crop = job.disk.get(&self.crop_path(&job, job.primary))?;
        let variants = derive_responsive_variants(
            self.backend.as_ref(),
            &crop,
            job.primary,
            &job.resolved,
            &self.settings.responsive,
            self.settings.quality,
        )?;

        let (source_uuid, image_uuid) = (job.source.uuid_str(), job.image.uuid_str());
        let slug = job.resolved.breakpoint.slug();
        for variant in &variants {
            for output in &variant.outputs {
                let path = self.settings.layout.responsive(
                    &source_uuid,
                    &image_uuid,
                    &slug,
                    variant.width,
                    &file_extension(&job.source, output.format),
                );
                job.disk.put(&path, &output.bytes)?;
            }
        }
        tracing::debug!(
            derived = %job.image.uuid,
            breakpoint,
            widths = ?variants.iter().map(|v| v.width).collect::<Vec<_>>(),
            "width series written"
        );
        Ok(())
    }

    /// Generate one named conversion and record its definition hash.
    pub fn conversion(&self, source_id: RecordId, name: &str) -> Result<(), TaskError> {
        let definition = self
            .conversions
            .get(name)
            .ok_or_else(|| TaskError::UnknownConversion(name.to_string()))?;
        let source = self.records.source(source_id)?;
        let primary = Self::primary_format(&source)?;
        let disk = self.disks.get(&source.disk)?;
        let source_bytes = disk.get(&source.original_path(&self.settings.layout))?;

        let outputs = derive_conversion(
            self.backend.as_ref(),
            &source_bytes,
            primary,
            &definition,
            self.settings.defaults.generate_webp,
            self.settings.quality,
        )?;
        let slug = definition.slug();
        for output in &outputs {
            let path = self.settings.layout.conversion(
                &source.uuid_str(),
                &slug,
                &file_extension(&source, output.format),
            );
            disk.put(&path, &output.bytes)?;
        }

        let (width, height) = outputs
            .first()
            .map(|o: &EncodedImage| (o.width, o.height))
            .unwrap_or_default();
        let record = ConversionRecord {
            hash: definition.definition_hash(),
            width,
            height,
        };
        self.records.modify_source(source_id, &mut |s| {
            s.conversions.insert(name.to_string(), record.clone());
        })?;
        tracing::debug!(source = %source.uuid, conversion = name, "conversion written");
        Ok(())
    }
}

impl TaskRunner for DerivationWorker {
    fn run(&self, task: &Task) -> Result<(), TaskError> {
        match task {
            Task::CropBreakpoint { image, breakpoint } => self.crop_breakpoint(*image, breakpoint),
            Task::ResponsiveWidths { image, breakpoint } => {
                self.responsive_widths(*image, breakpoint)
            }
            Task::Conversion { source, name } => self.conversion(*source, name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::Breakpoints;
    use crate::context::ImageContext;
    use crate::conversion::ConversionDefinition;
    use crate::imaging::Dimensions;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::records::{ManifestStore, OwnerRef};
    use crate::storage::LocalDisk;
    use crate::storage::tests::FlakyDisk;
    use crate::types::{AspectRatio, uniform_crop_data};
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Fixture {
        _tmp: TempDir,
        worker: DerivationWorker,
        backend: Arc<MockBackend>,
        disk: Arc<dyn BlobStore>,
        source: SourceImage,
        image: DerivedImage,
    }

    fn fixture_with(backend: MockBackend, disk_marker: Option<&str>) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let local = LocalDisk::new("public", tmp.path(), "/storage");
        let disk: Arc<dyn BlobStore> = match disk_marker {
            Some(marker) => Arc::new(FlakyDisk::new(local, marker)),
            None => Arc::new(local),
        };
        let disks = Disks::new("public").with(disk.clone());

        let records = Arc::new(ManifestStore::in_memory());
        let breakpoints = Breakpoints::default();
        let source = records
            .insert_source(SourceImage {
                id: 0,
                uuid: Uuid::new_v4(),
                disk: "public".into(),
                name: "photo".into(),
                extension: "jpg".into(),
                mime_type: "image/jpeg".into(),
                width: 1200,
                height: 800,
                size: 16,
                alt_text: BTreeMap::new(),
                custom_properties: BTreeMap::new(),
                conversions: BTreeMap::new(),
            })
            .unwrap();
        let image = records
            .insert_image(DerivedImage {
                id: 0,
                uuid: Uuid::new_v4(),
                owner: OwnerRef::new("post", "1", "images"),
                source_image_id: source.id,
                context: "hero".into(),
                context_configuration_hash: String::new(),
                sort_order: 0,
                disk: None,
                crop_data: uniform_crop_data(&breakpoints, None),
                alt_text: BTreeMap::new(),
                custom_properties: BTreeMap::new(),
            })
            .unwrap();

        let settings = WorkerSettings::default();
        disk.put(&source.original_path(&settings.layout), &[0; 16]).unwrap();

        let contexts = Arc::new(ContextRegistry::new());
        contexts.register(
            ImageContext::new("hero", &breakpoints)
                .aspect_ratio(AspectRatio::square())
                .max_width(300),
        );
        let conversions = Arc::new(ConversionRegistry::new());
        conversions
            .register(ConversionDefinition::new("thumb", AspectRatio::square()).default_width(100))
            .unwrap();

        let backend = Arc::new(backend);
        let worker = DerivationWorker::new(
            records,
            disks,
            contexts,
            conversions,
            backend.clone(),
            settings,
        );
        Fixture {
            _tmp: tmp,
            worker,
            backend,
            disk,
            source,
            image,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            MockBackend::with_dimensions(vec![Dimensions {
                width: 1200,
                height: 800,
            }]),
            None,
        )
    }

    fn derived_path(f: &Fixture, name: &str) -> String {
        format!(
            "image-library/{}/{}/{}",
            f.source.uuid, f.image.uuid, name
        )
    }

    // =========================================================================
    // Crop task
    // =========================================================================

    #[test]
    fn crop_writes_primary_and_webp() {
        let f = fixture();
        f.worker.crop_breakpoint(f.image.id, "sm").unwrap();

        assert!(f.disk.exists(&derived_path(&f, "sm.jpg")).unwrap());
        assert!(f.disk.exists(&derived_path(&f, "sm.webp")).unwrap());
        assert!(f
            .backend
            .get_operations()
            .iter()
            .any(|op| matches!(op, RecordedOp::Derive { max_width: Some(300), .. })));
    }

    #[test]
    fn crop_removes_stale_width_variants() {
        let f = fixture();
        f.disk.put(&derived_path(&f, "sm_w250.jpg"), b"old").unwrap();
        f.disk.put(&derived_path(&f, "sm_w250.webp"), b"old").unwrap();
        f.disk.put(&derived_path(&f, "md_w250.jpg"), b"keep").unwrap();

        f.worker.crop_breakpoint(f.image.id, "sm").unwrap();

        assert!(!f.disk.exists(&derived_path(&f, "sm_w250.jpg")).unwrap());
        assert!(!f.disk.exists(&derived_path(&f, "sm_w250.webp")).unwrap());
        assert!(f.disk.exists(&derived_path(&f, "md_w250.jpg")).unwrap());
    }

    #[test]
    fn crop_missing_original_fails() {
        let f = fixture();
        f.disk
            .delete(&f.source.original_path(&f.worker.settings().layout))
            .unwrap();
        let err = f.worker.crop_breakpoint(f.image.id, "sm").unwrap_err();
        assert!(matches!(err, TaskError::Storage(_)));
    }

    #[test]
    fn crop_unknown_breakpoint_fails() {
        let f = fixture();
        let err = f.worker.crop_breakpoint(f.image.id, "xxl").unwrap_err();
        assert!(matches!(err, TaskError::UnknownBreakpoint { .. }));
    }

    #[test]
    fn webp_failure_leaves_primary_in_place() {
        let f = fixture_with(
            MockBackend::with_dimensions(vec![Dimensions {
                width: 1200,
                height: 800,
            }]),
            Some(".webp"),
        );
        let err = f.worker.crop_breakpoint(f.image.id, "sm").unwrap_err();
        assert!(matches!(err, TaskError::Storage(_)));
        assert!(f.disk.exists(&derived_path(&f, "sm.jpg")).unwrap());
        assert!(!f.disk.exists(&derived_path(&f, "sm.webp")).unwrap());
    }

    // =========================================================================
    // Width series task
    // =========================================================================

    #[test]
    fn widths_require_crop_first() {
        let f = fixture();
        let err = f.worker.responsive_widths(f.image.id, "sm").unwrap_err();
        assert!(matches!(err, TaskError::Storage(_)));
    }

    #[test]
    fn widths_written_with_suffix() {
        let f = fixture_with(
            MockBackend::with_dimensions(vec![Dimensions {
                width: 1000,
                height: 1000,
            }]),
            None,
        );
        f.disk
            .put(&derived_path(&f, "xl.jpg"), &vec![0u8; 250_000])
            .unwrap();
        f.worker.responsive_widths(f.image.id, "xl").unwrap();

        let files = f.disk.all_files("").unwrap();
        let widths: Vec<u32> = files
            .iter()
            .filter(|p| p.ends_with(".jpg"))
            .filter_map(|p| parse_width(p))
            .collect();
        assert!(!widths.is_empty());
        assert!(widths.iter().all(|w| *w < 1000));
        assert_eq!(
            files.iter().filter(|p| p.ends_with(".webp")).count(),
            widths.len()
        );
    }

    // =========================================================================
    // Conversion task
    // =========================================================================

    #[test]
    fn conversion_written_and_recorded() {
        let f = fixture();
        f.worker.conversion(f.source.id, "thumb").unwrap();

        let base = format!("image-library/{}", f.source.uuid);
        assert!(f.disk.exists(&format!("{base}/thumb.jpg")).unwrap());
        assert!(f.disk.exists(&format!("{base}/thumb.webp")).unwrap());

        let stored = f.worker.records.source(f.source.id).unwrap();
        let record = &stored.conversions["thumb"];
        assert_eq!(record.width, 100);
        assert!(!record.hash.is_empty());
    }

    #[test]
    fn unknown_conversion_fails() {
        let f = fixture();
        let err = f.worker.conversion(f.source.id, "missing").unwrap_err();
        assert!(matches!(err, TaskError::UnknownConversion(_)));
    }

    #[test]
    fn runner_dispatches_by_task() {
        let f = fixture();
        f.worker
            .run(&Task::CropBreakpoint {
                image: f.image.id,
                breakpoint: "md".into(),
            })
            .unwrap();
        assert!(f.disk.exists(&derived_path(&f, "md.jpg")).unwrap());
    }

    #[test]
    fn file_extension_keeps_source_spelling() {
        let f = fixture();
        let mut source = f.source.clone();
        source.extension = "jpeg".into();
        assert_eq!(file_extension(&source, OutputFormat::Jpeg), "jpeg");
        assert_eq!(file_extension(&source, OutputFormat::WebP), "webp");
    }
}
