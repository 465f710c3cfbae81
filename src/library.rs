//! The image library: records, files and regeneration behind one API.
//!
//! [`ImageLibrary`] wraps the record store and makes the lifecycle calls into
//! the [`RegenerationController`] itself:
//!
//! | Operation | Record change | Files |
//! |---|---|---|
//! | [`upload`](ImageLibrary::upload) | source created | `original.{ext}`, conversions |
//! | [`attach`](ImageLibrary::attach) | derived image created | full derivation chain |
//! | [`update_image`](ImageLibrary::update_image) | derived image saved | chain when crop or hash changed |
//! | [`delete_image`](ImageLibrary::delete_image) | derived image removed | its tree |
//! | [`delete_source`](ImageLibrary::delete_source) | source and its images removed | the whole source tree |
//!
//! URL accessors only read metadata and list files; nothing is decoded.

use crate::breakpoint::Breakpoints;
use crate::config::{ConfigError, LibraryConfig, effective_threads};
use crate::context::{ContextRegistry, ImageContext};
use crate::conversion::{ConversionRegistry, conversion_slug};
use crate::error::{ConfigurationError, ValidationError};
use crate::imaging::{BackendError, ImageBackend, OutputFormat, RustBackend};
use crate::naming::{PathLayout, belongs_to_breakpoint, parse_width, split_extension};
use crate::process::{DerivationWorker, WorkerSettings, file_extension};
use crate::queue::{
    Chain, ChainOutcome, DeferredQueue, SyncQueue, Task, TaskError, TaskQueue, TaskRunner,
};
use crate::records::{
    DerivedImage, ManifestStore, OwnerRef, RecordError, RecordStore, SourceImage,
};
use crate::regenerate::{AssetState, Regeneration, RegenerationController};
use crate::storage::{BlobStore, Disks, LocalDisk, StorageError};
use crate::types::{CropDataMap, normalize_crop_data};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("context '{0}' is not registered")]
    UnknownContext(String),
    #[error("unknown breakpoint '{0}'")]
    UnknownBreakpoint(String),
    #[error("generating files for image {image} failed: {reason}")]
    Generation { image: Uuid, reason: String },
}

pub type Result<T> = std::result::Result<T, LibraryError>;

/// Why a chain did not complete. `None` for completed and pending chains.
fn chain_failure(outcome: &ChainOutcome) -> Option<String> {
    match outcome {
        ChainOutcome::Completed | ChainOutcome::Pending => None,
        ChainOutcome::Cancelled { stage } => Some(format!("stage {} cancelled", stage + 1)),
        ChainOutcome::Failed { failures, .. } => Some(
            failures
                .iter()
                .map(|f| format!("{}: {}", f.task, f.message))
                .collect::<Vec<_>>()
                .join("; "),
        ),
    }
}

/// Optional fields of a new source image.
#[derive(Debug, Clone, Default)]
pub struct UploadAttributes {
    /// Defaults to the file stem.
    pub name: Option<String>,
    /// Defaults to `defaults.disk`.
    pub disk: Option<String>,
    pub alt_text: BTreeMap<String, String>,
    pub custom_properties: BTreeMap<String, serde_json::Value>,
}

/// How many images a relation slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Relation {
    /// At most one image: attaching replaces the current one.
    One,
    /// Any number, unless the context disallows multiple.
    #[default]
    Many,
}

#[derive(Debug, Clone, Default)]
pub struct AttachAttributes {
    pub context: String,
    pub relation: Relation,
    /// Missing breakpoints are filled with `None`.
    pub crop_data: CropDataMap,
    /// Defaults to the source image's disk.
    pub disk: Option<String>,
    pub alt_text: BTreeMap<String, String>,
    pub custom_properties: BTreeMap<String, serde_json::Value>,
}

/// One `<source>` of a `<picture>` element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PictureSource {
    pub breakpoint: String,
    pub media: Option<String>,
    pub srcset: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionStatus {
    /// Generated from the current definition already.
    Skipped,
    Generated,
    Queued,
    Failed(String),
}

pub struct ImageLibrary {
    config: LibraryConfig,
    breakpoints: Breakpoints,
    layout: PathLayout,
    contexts: Arc<ContextRegistry>,
    conversions: Arc<ConversionRegistry>,
    disks: Disks,
    records: Arc<dyn RecordStore>,
    backend: Arc<dyn ImageBackend>,
    worker: Arc<DerivationWorker>,
    queue: Arc<dyn TaskQueue>,
    deferred: Option<Arc<DeferredQueue>>,
    controller: RegenerationController,
}

impl ImageLibrary {
    pub fn new(
        config: LibraryConfig,
        disks: Disks,
        records: Arc<dyn RecordStore>,
        backend: Arc<dyn ImageBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let breakpoints = config.breakpoint_set()?;
        let layout = PathLayout::new(&config.paths.base);

        let contexts = Arc::new(ContextRegistry::new());
        contexts.register_all(config.build_contexts()?);
        let conversions = Arc::new(ConversionRegistry::new());
        for definition in &config.conversions {
            conversions.register(definition.clone())?;
        }

        let worker = Arc::new(DerivationWorker::new(
            records.clone(),
            disks.clone(),
            contexts.clone(),
            conversions.clone(),
            backend.clone(),
            WorkerSettings {
                layout: layout.clone(),
                defaults: config.context_defaults(),
                responsive: config.responsive_settings(),
                quality: config.quality(),
            },
        ));

        let threads = effective_threads(&config.processing);
        let runner: Arc<dyn TaskRunner> = worker.clone();
        let mut deferred = None;
        let queue: Arc<dyn TaskQueue> = if config.queue.is_sync() {
            Arc::new(SyncQueue::new(runner, threads)?)
        } else {
            let pending = Arc::new(DeferredQueue::new(runner, threads)?);
            deferred = Some(pending.clone());
            pending
        };

        let controller = RegenerationController::new(
            queue.clone(),
            disks.clone(),
            layout.clone(),
            breakpoints.clone(),
            config.routing(),
        );

        Ok(Self {
            config,
            breakpoints,
            layout,
            contexts,
            conversions,
            disks,
            records,
            backend,
            worker,
            queue,
            deferred,
            controller,
        })
    }

    /// A library over local disks below `root`, with records persisted in
    /// `{root}/records.json`.
    pub fn local(config: LibraryConfig, root: &Path) -> Result<Self> {
        let mut disks = Disks::new(config.defaults.disk.clone());
        for (name, disk) in &config.disks {
            let mut local = LocalDisk::new(name.clone(), root.join(&disk.root), &disk.url);
            if let Some(key) = &disk.signing_key {
                local = local.with_signing_key(key.clone());
            }
            disks.insert(Arc::new(local));
        }
        let records = Arc::new(ManifestStore::open(&root.join("records.json"))?);
        Self::new(config, disks, records, Arc::new(RustBackend::new()))
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    pub fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    pub fn layout(&self) -> &PathLayout {
        &self.layout
    }

    pub fn contexts(&self) -> &ContextRegistry {
        &self.contexts
    }

    pub fn conversions(&self) -> &ConversionRegistry {
        &self.conversions
    }

    pub fn disks(&self) -> &Disks {
        &self.disks
    }

    pub fn records(&self) -> &dyn RecordStore {
        self.records.as_ref()
    }

    pub fn asset_state(&self, image: &DerivedImage) -> AssetState {
        self.controller.state(image.id)
    }

    fn context(&self, key: &str) -> Result<Arc<ImageContext>> {
        self.contexts
            .get(key)
            .ok_or_else(|| LibraryError::UnknownContext(key.to_string()))
    }

    // =========================================================================
    // Source images
    // =========================================================================

    /// Validate, re-encode and store an upload as a new source image.
    ///
    /// Nothing is persisted when validation fails. When storing the original
    /// fails, the record and the source directory are removed again.
    pub fn upload(
        &self,
        file_name: &str,
        bytes: &[u8],
        attributes: UploadAttributes,
    ) -> Result<SourceImage> {
        let max = self.config.uploads.max_file_size;
        let size = bytes.len() as u64;
        if size > max {
            return Err(ValidationError::FileTooLarge { size, max }.into());
        }

        let identified = self.backend.identify(bytes).map_err(|e| match e {
            BackendError::UnsupportedFormat => {
                ValidationError::UnsupportedMimeType("application/octet-stream".to_string())
            }
            other => ValidationError::Undecodable(other.to_string()),
        })?;
        let format = identified.format.ok_or_else(|| {
            ValidationError::Undecodable("format cannot be written back".to_string())
        })?;
        let mime_type = format.mime_type();
        if !self.config.uploads.mime_types.iter().any(|m| m == mime_type) {
            return Err(ValidationError::UnsupportedMimeType(mime_type.to_string()).into());
        }
        let dims = identified.dimensions;
        if dims.width == 0 || dims.height == 0 {
            return Err(ValidationError::DegenerateDimensions {
                width: dims.width,
                height: dims.height,
            }
            .into());
        }

        let optimized = self
            .backend
            .reencode(bytes, format, self.config.quality())
            .map_err(|e| ValidationError::Undecodable(e.to_string()))?;

        let (stem, ext) = split_extension(file_name);
        let extension = ext
            .map(str::to_ascii_lowercase)
            .filter(|e| OutputFormat::from_extension(e) == Some(format))
            .unwrap_or_else(|| format.extension().to_string());
        let disk_name = attributes
            .disk
            .unwrap_or_else(|| self.disks.default_name().to_string());
        let disk = self.disks.get(&disk_name)?;

        let source = self.records.insert_source(SourceImage {
            id: 0,
            uuid: Uuid::new_v4(),
            disk: disk_name,
            name: attributes.name.unwrap_or_else(|| stem.to_string()),
            extension,
            mime_type: mime_type.to_string(),
            width: dims.width,
            height: dims.height,
            size: optimized.bytes.len() as u64,
            alt_text: attributes.alt_text,
            custom_properties: attributes.custom_properties,
            conversions: BTreeMap::new(),
        })?;

        if let Err(e) = disk.put(&source.original_path(&self.layout), &optimized.bytes) {
            self.rollback_source(&source, disk.as_ref());
            return Err(e.into());
        }
        tracing::info!(source = %source.uuid, name = %source.name, "upload stored");

        for (name, status) in self.generate_conversions(&source, false)? {
            if let ConversionStatus::Failed(message) = status {
                tracing::error!(source = %source.uuid, conversion = %name, %message, "conversion failed");
            }
        }
        Ok(self.records.source(source.id)?)
    }

    fn rollback_source(&self, source: &SourceImage, disk: &dyn BlobStore) {
        if let Err(e) = self.records.delete_source(source.id) {
            tracing::error!(source = %source.uuid, error = %e, "rollback: record not removed");
        }
        if let Err(e) = disk.delete_tree(&source.directory(&self.layout)) {
            tracing::error!(source = %source.uuid, error = %e, "rollback: files not removed");
        }
        tracing::warn!(source = %source.uuid, "upload rolled back");
    }

    pub fn source(&self, uuid: &Uuid) -> Result<SourceImage> {
        Ok(self.records.source_by_uuid(uuid)?)
    }

    pub fn sources(&self) -> Result<Vec<SourceImage>> {
        Ok(self.records.sources()?)
    }

    /// Delete a source image, every image derived from it and all their files.
    pub fn delete_source(&self, uuid: &Uuid) -> Result<()> {
        let source = self.records.source_by_uuid(uuid)?;
        for image in self.records.images_for_source(source.id)? {
            self.controller.on_deleted(&image, &source)?;
        }
        self.records.delete_source(source.id)?;
        self.disks
            .get(&source.disk)?
            .delete_tree(&source.directory(&self.layout))?;
        tracing::info!(source = %source.uuid, "source deleted");
        Ok(())
    }

    // =========================================================================
    // Derived images
    // =========================================================================

    /// Attach `source` to `owner` under a context and generate its files.
    pub fn attach(
        &self,
        source: &SourceImage,
        owner: OwnerRef,
        attributes: AttachAttributes,
    ) -> Result<DerivedImage> {
        let context = self.context(&attributes.context)?;
        if let Some(disk) = &attributes.disk {
            self.disks.get(disk)?;
        }

        let existing = self.records.images_for_owner(&owner)?;
        let (replaced, kept): (Vec<DerivedImage>, Vec<DerivedImage>) =
            existing.into_iter().partition(|image| match attributes.relation {
                Relation::One => true,
                Relation::Many => {
                    !context.get_allows_multiple() && image.context == context.key()
                }
            });
        let sort_order = kept
            .iter()
            .filter(|i| i.context == context.key())
            .map(|i| i.sort_order + 1)
            .max()
            .unwrap_or(0);

        let image = self.records.insert_image(DerivedImage {
            id: 0,
            uuid: Uuid::new_v4(),
            owner,
            source_image_id: source.id,
            context: context.key().to_string(),
            context_configuration_hash: context.configuration_hash(),
            sort_order,
            disk: attributes.disk,
            crop_data: normalize_crop_data(&self.breakpoints, &attributes.crop_data),
            alt_text: attributes.alt_text,
            custom_properties: attributes.custom_properties,
        })?;
        tracing::info!(derived = %image.uuid, source = %source.uuid, context = %image.context, "image attached");

        let failure = match self.controller.on_created(&image, source) {
            Ok(Regeneration::Dispatched(outcome)) => chain_failure(&outcome)
                .map(|reason| LibraryError::Generation {
                    image: image.uuid,
                    reason,
                }),
            Ok(Regeneration::Skipped) => None,
            Err(e) => Some(e.into()),
        };
        if let Some(err) = failure {
            self.rollback_image(&image, source);
            return Err(err);
        }

        // the slot is only vacated once the new image exists
        for old in &replaced {
            self.delete_image(&old.uuid)?;
        }
        Ok(image)
    }

    fn rollback_image(&self, image: &DerivedImage, source: &SourceImage) {
        if let Err(e) = self.records.delete_image(image.id) {
            tracing::error!(derived = %image.uuid, error = %e, "rollback: record not removed");
        }
        if let Err(e) = self.controller.on_deleted(image, source) {
            tracing::error!(derived = %image.uuid, error = %e, "rollback: files not removed");
        }
        tracing::warn!(derived = %image.uuid, "attach rolled back");
    }

    pub fn image(&self, uuid: &Uuid) -> Result<DerivedImage> {
        Ok(self.records.image_by_uuid(uuid)?)
    }

    pub fn images(&self) -> Result<Vec<DerivedImage>> {
        Ok(self.records.images()?)
    }

    /// Apply `change`, refresh the context hash and save. Regenerates when
    /// the crop data or the context configuration changed.
    pub fn update_image(
        &self,
        uuid: &Uuid,
        change: impl FnOnce(&mut DerivedImage),
    ) -> Result<(DerivedImage, Regeneration)> {
        let before = self.records.image_by_uuid(uuid)?;
        let mut after = before.clone();
        change(&mut after);
        after.id = before.id;
        after.uuid = before.uuid;

        let context = self.context(&after.context)?;
        after.crop_data = normalize_crop_data(&self.breakpoints, &after.crop_data);
        after.context_configuration_hash = context.configuration_hash();

        let changed = after.changed_fields(&before);
        if changed.is_empty() {
            return Ok((after, Regeneration::Skipped));
        }
        self.records.update_image(&after)?;
        let regeneration = self.controller.on_updated(&after, &changed);
        Ok((after, regeneration))
    }

    /// Re-save every derived image so configuration drift regenerates.
    pub fn sync_contexts(&self) -> Result<Vec<(DerivedImage, Regeneration)>> {
        self.records
            .images()?
            .iter()
            .map(|image| self.update_image(&image.uuid, |_| {}))
            .collect()
    }

    /// Rebuild the given images (all when `uuids` is empty) regardless of
    /// changes. `purge` deletes their files first.
    pub fn regenerate(
        &self,
        uuids: &[Uuid],
        purge: bool,
    ) -> Result<Vec<(DerivedImage, Regeneration)>> {
        let images = if uuids.is_empty() {
            self.records.images()?
        } else {
            uuids
                .iter()
                .map(|uuid| self.records.image_by_uuid(uuid))
                .collect::<std::result::Result<_, _>>()?
        };
        images
            .into_iter()
            .map(|image| -> Result<(DerivedImage, Regeneration)> {
                let source = self.records.source(image.source_image_id)?;
                let regeneration = self.controller.force(&image, &source, purge)?;
                Ok((image, regeneration))
            })
            .collect()
    }

    pub fn delete_image(&self, uuid: &Uuid) -> Result<()> {
        let image = self.records.image_by_uuid(uuid)?;
        let source = self.records.source(image.source_image_id)?;
        self.records.delete_image(image.id)?;
        self.controller.on_deleted(&image, &source)?;
        Ok(())
    }

    /// Drain chains held by a deferred queue. Empty for a sync queue.
    pub fn run_pending(&self) -> Vec<(Chain, ChainOutcome)> {
        let Some(deferred) = &self.deferred else {
            return Vec::new();
        };
        let results = deferred.run_all();
        for (chain, outcome) in &results {
            let image = chain
                .stages
                .iter()
                .flat_map(|batch| batch.tasks.iter())
                .find_map(|task| match task {
                    Task::CropBreakpoint { image, .. } | Task::ResponsiveWidths { image, .. } => {
                        Some(*image)
                    }
                    Task::Conversion { .. } => None,
                });
            if let Some(image) = image {
                self.controller.finish(image, outcome);
            }
        }
        results
    }

    // =========================================================================
    // URLs
    // =========================================================================

    /// Public URL of `path` on `disk`, signed when the disk's temporary URL
    /// policy is enabled. Every URL accessor goes through here.
    fn disk_url(&self, disk: &dyn BlobStore, path: &str) -> Result<String> {
        let policy = self.config.temporary_url_policy(disk.name());
        if policy.enabled {
            Ok(disk.temporary_url(path, policy.ttl())?)
        } else {
            Ok(disk.url(path))
        }
    }

    /// URL of the original.
    pub fn source_url(&self, source: &SourceImage) -> Result<String> {
        let disk = self.disks.get(&source.disk)?;
        self.disk_url(disk.as_ref(), &source.original_path(&self.layout))
    }

    fn slug_for(&self, breakpoint: &str) -> Result<String> {
        self.breakpoints
            .get(breakpoint)
            .map(|bp| bp.slug())
            .ok_or_else(|| LibraryError::UnknownBreakpoint(breakpoint.to_string()))
    }

    /// URL of the breakpoint crop. `extension` defaults to the source's.
    pub fn url_for_breakpoint(
        &self,
        image: &DerivedImage,
        breakpoint: &str,
        extension: Option<&str>,
    ) -> Result<String> {
        let source = self.records.source(image.source_image_id)?;
        let slug = self.slug_for(breakpoint)?;
        let path = self.layout.breakpoint(
            &source.uuid_str(),
            &image.uuid_str(),
            &slug,
            extension.unwrap_or(&source.extension),
        );
        let disk = self.disks.get(image.disk_or(&source))?;
        self.disk_url(disk.as_ref(), &path)
    }

    /// Stored files of one breakpoint with `extension`: the crop first, then
    /// the width series from wide to narrow.
    pub fn responsive_paths_for_breakpoint(
        &self,
        image: &DerivedImage,
        breakpoint: &str,
        extension: Option<&str>,
    ) -> Result<Vec<String>> {
        let source = self.records.source(image.source_image_id)?;
        let slug = self.slug_for(breakpoint)?;
        let extension = extension.unwrap_or(&source.extension);
        let disk = self.disks.get(image.disk_or(&source))?;
        let mut paths: Vec<String> = disk
            .files(&self.layout.derived_dir(&source.uuid_str(), &image.uuid_str()))?
            .into_iter()
            .filter(|path| belongs_to_breakpoint(path, &slug, extension))
            .collect();
        paths.sort_by_key(|path| std::cmp::Reverse(parse_width(path).unwrap_or(u32::MAX)));
        Ok(paths)
    }

    /// `srcset` value for one breakpoint.
    ///
    /// Width variants report the width in their name; the crop itself
    /// reports the context's max width, or the source width without one.
    /// With responsive versions disabled it is the plain crop URL.
    pub fn srcset_for_breakpoint(
        &self,
        image: &DerivedImage,
        breakpoint: &str,
        extension: Option<&str>,
    ) -> Result<String> {
        let context = self.context(&image.context)?;
        if !context.generates_responsive_versions(self.config.generate.responsive_versions) {
            return self.url_for_breakpoint(image, breakpoint, extension);
        }
        let source = self.records.source(image.source_image_id)?;
        let disk = self.disks.get(image.disk_or(&source))?;
        let fallback = context.max_width_for(breakpoint).unwrap_or(source.width);
        let entries = self
            .responsive_paths_for_breakpoint(image, breakpoint, extension)?
            .iter()
            .map(|path| {
                let width = parse_width(path).unwrap_or(fallback);
                Ok(format!("{} {}w", self.disk_url(disk.as_ref(), path)?, width))
            })
            .collect::<Result<Vec<String>>>()?;
        Ok(entries.join(", "))
    }

    /// `<source>` data per breakpoint, a WebP source ahead of each primary
    /// one when WebP generation is on.
    pub fn picture_sources(&self, image: &DerivedImage) -> Result<Vec<PictureSource>> {
        let context = self.context(&image.context)?;
        let source = self.records.source(image.source_image_id)?;
        let with_webp = context.generates_webp(self.config.generate.webp)
            && source.format() != Some(OutputFormat::WebP);

        let mut sources = Vec::new();
        for bp in self.breakpoints.sorted() {
            let mut conditions = Vec::new();
            if !self.breakpoints.is_first(&bp.key) {
                conditions.push(format!("(min-width: {}px)", bp.min_width));
            }
            if let Some(max) = self.breakpoints.max_width(&bp.key) {
                conditions.push(format!("(max-width: {max}px)"));
            }
            let media = (!conditions.is_empty()).then(|| conditions.join(" and "));

            if with_webp {
                let webp = OutputFormat::WebP;
                sources.push(PictureSource {
                    breakpoint: bp.key.clone(),
                    media: media.clone(),
                    srcset: self.srcset_for_breakpoint(
                        image,
                        &bp.key,
                        Some(&file_extension(&source, webp)),
                    )?,
                    mime_type: webp.mime_type().to_string(),
                });
            }
            sources.push(PictureSource {
                breakpoint: bp.key.clone(),
                media,
                srcset: self.srcset_for_breakpoint(image, &bp.key, None)?,
                mime_type: source.mime_type.clone(),
            });
        }
        Ok(sources)
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    /// Generate every registered conversion that is missing or outdated
    /// (all of them with `force`). `create_sync` ones run inline.
    pub fn generate_conversions(
        &self,
        source: &SourceImage,
        force: bool,
    ) -> Result<Vec<(String, ConversionStatus)>> {
        let mut results = Vec::new();
        for definition in self.conversions.all() {
            let name = definition.name.clone();
            let current = source
                .conversions
                .get(&name)
                .is_some_and(|record| record.hash == definition.definition_hash());
            let status = if current && !force {
                ConversionStatus::Skipped
            } else if definition.create_sync {
                match self.worker.conversion(source.id, &name) {
                    Ok(()) => ConversionStatus::Generated,
                    Err(e) => ConversionStatus::Failed(e.to_string()),
                }
            } else {
                let task = Task::Conversion {
                    source: source.id,
                    name: name.clone(),
                };
                match self.queue.enqueue(task, self.config.routing()) {
                    ChainOutcome::Completed => ConversionStatus::Generated,
                    ChainOutcome::Pending => ConversionStatus::Queued,
                    ChainOutcome::Failed { failures, .. } => ConversionStatus::Failed(
                        failures
                            .into_iter()
                            .map(|f| f.message)
                            .collect::<Vec<_>>()
                            .join("; "),
                    ),
                    ChainOutcome::Cancelled { .. } => {
                        ConversionStatus::Failed("cancelled".to_string())
                    }
                }
            };
            results.push((name, status));
        }
        Ok(results)
    }

    /// URL of a generated conversion, `None` when it was never generated.
    pub fn conversion_url(&self, source: &SourceImage, name: &str) -> Result<Option<String>> {
        if !source.conversions.contains_key(name) {
            return Ok(None);
        }
        let path = self
            .layout
            .conversion(&source.uuid_str(), &conversion_slug(name), &source.extension);
        let disk = self.disks.get(&source.disk)?;
        Ok(Some(self.disk_url(disk.as_ref(), &path)?))
    }

    /// Remove files and bookkeeping of conversions no longer registered.
    /// Returns the removed names.
    pub fn delete_deprecated_conversions(&self, source: &SourceImage) -> Result<Vec<String>> {
        let disk = self.disks.get(&source.disk)?;
        let deprecated: Vec<String> = source
            .conversions
            .keys()
            .filter(|name| self.conversions.get(name).is_none())
            .cloned()
            .collect();

        for name in &deprecated {
            let slug = conversion_slug(name);
            for extension in [source.extension.as_str(), OutputFormat::WebP.extension()] {
                disk.delete(&self.layout.conversion(&source.uuid_str(), &slug, extension))?;
            }
            tracing::info!(source = %source.uuid, conversion = %name, "deprecated conversion deleted");
        }
        if !deprecated.is_empty() {
            self.records.modify_source(source.id, &mut |s| {
                s.conversions.retain(|name, _| !deprecated.contains(name));
            })?;
        }
        Ok(deprecated)
    }
}
