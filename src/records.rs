//! Source and derived image records, and the store that persists them.
//!
//! A [`SourceImage`] is the immutable original upload. A [`DerivedImage`]
//! attaches a source to an owning record under a context; its files are
//! generated by the pipeline. The source owns its derived images: deleting a
//! source cascades.
//!
//! [`RecordStore`] is the persistence seam. [`ManifestStore`] keeps every
//! record in memory and, when given a path, rewrites a JSON manifest after
//! each mutation (`records.json` for the CLI).

use crate::imaging::OutputFormat;
use crate::naming::PathLayout;
use crate::types::CropDataMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Version of the records manifest format.
const MANIFEST_VERSION: u32 = 1;

pub type RecordId = u64;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("failed to persist records to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("records manifest {path} is unreadable: {message}")]
    Corrupt { path: PathBuf, message: String },
}

/// Generated conversion bookkeeping on a source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRecord {
    /// Definition hash the files were generated from.
    pub hash: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceImage {
    pub id: RecordId,
    pub uuid: Uuid,
    pub disk: String,
    pub name: String,
    /// Lowercase, without the dot.
    pub extension: String,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    /// Locale → text.
    #[serde(default)]
    pub alt_text: BTreeMap<String, String>,
    #[serde(default)]
    pub custom_properties: BTreeMap<String, serde_json::Value>,
    /// Conversion name → what was generated.
    #[serde(default)]
    pub conversions: BTreeMap<String, ConversionRecord>,
}

impl SourceImage {
    pub fn uuid_str(&self) -> String {
        self.uuid.to_string()
    }

    pub fn original_path(&self, layout: &PathLayout) -> String {
        layout.original(&self.uuid_str(), &self.extension)
    }

    pub fn directory(&self, layout: &PathLayout) -> String {
        layout.source_dir(&self.uuid_str())
    }

    /// Format derived files are written in.
    pub fn format(&self) -> Option<OutputFormat> {
        OutputFormat::from_extension(&self.extension)
            .or_else(|| OutputFormat::from_mime(&self.mime_type))
    }

    pub fn alt_text_for(&self, locale: &str) -> Option<&str> {
        self.alt_text.get(locale).map(String::as_str)
    }
}

/// The owning record and the relation slot an image is attached under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub owner_type: String,
    pub owner_id: String,
    pub relation: String,
}

impl OwnerRef {
    pub fn new(
        owner_type: impl Into<String>,
        owner_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            owner_type: owner_type.into(),
            owner_id: owner_id.into(),
            relation: relation.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedImage {
    pub id: RecordId,
    pub uuid: Uuid,
    pub owner: OwnerRef,
    pub source_image_id: RecordId,
    pub context: String,
    pub context_configuration_hash: String,
    pub sort_order: u32,
    /// `None` inherits the source image's disk.
    #[serde(default)]
    pub disk: Option<String>,
    pub crop_data: CropDataMap,
    #[serde(default)]
    pub alt_text: BTreeMap<String, String>,
    #[serde(default)]
    pub custom_properties: BTreeMap<String, serde_json::Value>,
}

impl DerivedImage {
    pub fn uuid_str(&self) -> String {
        self.uuid.to_string()
    }

    pub fn disk_or<'a>(&'a self, source: &'a SourceImage) -> &'a str {
        self.disk.as_deref().unwrap_or(&source.disk)
    }

    /// Names of the fields that differ from `before`.
    pub fn changed_fields(&self, before: &DerivedImage) -> Vec<&'static str> {
        let mut changed = Vec::new();
        let mut check = |name: &'static str, differs: bool| {
            if differs {
                changed.push(name);
            }
        };
        check("owner", self.owner != before.owner);
        check("source_image_id", self.source_image_id != before.source_image_id);
        check("context", self.context != before.context);
        check(
            "context_configuration_hash",
            self.context_configuration_hash != before.context_configuration_hash,
        );
        check("sort_order", self.sort_order != before.sort_order);
        check("disk", self.disk != before.disk);
        check("crop_data", self.crop_data != before.crop_data);
        check("alt_text", self.alt_text != before.alt_text);
        check(
            "custom_properties",
            self.custom_properties != before.custom_properties,
        );
        changed
    }
}

/// Persistence seam for records.
///
/// `insert_*` assigns the id; the passed id is ignored.
pub trait RecordStore: Send + Sync {
    fn insert_source(&self, source: SourceImage) -> Result<SourceImage, RecordError>;
    fn update_source(&self, source: &SourceImage) -> Result<(), RecordError>;
    /// Apply `change` to the stored source under the store's lock.
    fn modify_source(
        &self,
        id: RecordId,
        change: &mut dyn FnMut(&mut SourceImage),
    ) -> Result<SourceImage, RecordError>;
    fn source(&self, id: RecordId) -> Result<SourceImage, RecordError>;
    fn source_by_uuid(&self, uuid: &Uuid) -> Result<SourceImage, RecordError>;
    fn sources(&self) -> Result<Vec<SourceImage>, RecordError>;
    fn delete_source(&self, id: RecordId) -> Result<(), RecordError>;

    fn insert_image(&self, image: DerivedImage) -> Result<DerivedImage, RecordError>;
    fn update_image(&self, image: &DerivedImage) -> Result<(), RecordError>;
    fn image(&self, id: RecordId) -> Result<DerivedImage, RecordError>;
    fn image_by_uuid(&self, uuid: &Uuid) -> Result<DerivedImage, RecordError>;
    fn images(&self) -> Result<Vec<DerivedImage>, RecordError>;
    fn delete_image(&self, id: RecordId) -> Result<(), RecordError>;

    fn images_for_source(&self, source_id: RecordId) -> Result<Vec<DerivedImage>, RecordError> {
        Ok(self
            .images()?
            .into_iter()
            .filter(|i| i.source_image_id == source_id)
            .collect())
    }

    /// Images in one relation slot, in `sort_order`.
    fn images_for_owner(&self, owner: &OwnerRef) -> Result<Vec<DerivedImage>, RecordError> {
        let mut images: Vec<DerivedImage> = self
            .images()?
            .into_iter()
            .filter(|i| &i.owner == owner)
            .collect();
        images.sort_by_key(|i| (i.sort_order, i.id));
        Ok(images)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordSet {
    version: u32,
    next_id: RecordId,
    sources: BTreeMap<RecordId, SourceImage>,
    images: BTreeMap<RecordId, DerivedImage>,
}

impl RecordSet {
    fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION,
            next_id: 1,
            sources: BTreeMap::new(),
            images: BTreeMap::new(),
        }
    }

    fn allocate(&mut self) -> RecordId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// In-memory record store with optional JSON persistence.
pub struct ManifestStore {
    records: Mutex<RecordSet>,
    path: Option<PathBuf>,
}

impl ManifestStore {
    /// Memory only.
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(RecordSet::empty()),
            path: None,
        }
    }

    /// Load `path` (empty when the file does not exist yet) and save back to
    /// it after every mutation.
    pub fn open(path: &Path) -> Result<Self, RecordError> {
        let records = match std::fs::read_to_string(path) {
            Ok(content) => {
                let set: RecordSet =
                    serde_json::from_str(&content).map_err(|e| RecordError::Corrupt {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    })?;
                if set.version != MANIFEST_VERSION {
                    return Err(RecordError::Corrupt {
                        path: path.to_path_buf(),
                        message: format!("unsupported version {}", set.version),
                    });
                }
                set
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RecordSet::empty(),
            Err(source) => {
                return Err(RecordError::Persist {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Ok(Self {
            records: Mutex::new(records),
            path: Some(path.to_path_buf()),
        })
    }

    fn save(&self, records: &RecordSet) -> Result<(), RecordError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let persist = |source| RecordError::Persist {
            path: path.clone(),
            source,
        };
        let json = serde_json::to_string_pretty(records).map_err(|e| persist(e.into()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(persist)?;
        }
        std::fs::write(path, json).map_err(persist)
    }

    /// Run `f` on a copy of the locked set. The copy replaces the set only
    /// once it is persisted, so a failed write leaves memory unchanged.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut RecordSet) -> Result<T, RecordError>,
    ) -> Result<T, RecordError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut staged = records.clone();
        let value = f(&mut staged)?;
        self.save(&staged)?;
        *records = staged;
        Ok(value)
    }

    fn read<T>(&self, f: impl FnOnce(&RecordSet) -> T) -> T {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        f(&records)
    }
}

fn not_found(kind: &'static str, id: impl ToString) -> RecordError {
    RecordError::NotFound {
        kind,
        id: id.to_string(),
    }
}

impl RecordStore for ManifestStore {
    fn insert_source(&self, mut source: SourceImage) -> Result<SourceImage, RecordError> {
        self.mutate(|set| {
            source.id = set.allocate();
            set.sources.insert(source.id, source.clone());
            Ok(source)
        })
    }

    fn update_source(&self, source: &SourceImage) -> Result<(), RecordError> {
        self.mutate(|set| match set.sources.get_mut(&source.id) {
            Some(existing) => {
                *existing = source.clone();
                Ok(())
            }
            None => Err(not_found("source image", source.id)),
        })
    }

    fn modify_source(
        &self,
        id: RecordId,
        change: &mut dyn FnMut(&mut SourceImage),
    ) -> Result<SourceImage, RecordError> {
        self.mutate(|set| match set.sources.get_mut(&id) {
            Some(existing) => {
                change(existing);
                Ok(existing.clone())
            }
            None => Err(not_found("source image", id)),
        })
    }

    fn source(&self, id: RecordId) -> Result<SourceImage, RecordError> {
        self.read(|set| set.sources.get(&id).cloned())
            .ok_or_else(|| not_found("source image", id))
    }

    fn source_by_uuid(&self, uuid: &Uuid) -> Result<SourceImage, RecordError> {
        self.read(|set| set.sources.values().find(|s| &s.uuid == uuid).cloned())
            .ok_or_else(|| not_found("source image", uuid))
    }

    fn sources(&self) -> Result<Vec<SourceImage>, RecordError> {
        Ok(self.read(|set| set.sources.values().cloned().collect()))
    }

    /// Removes the source and every derived image referencing it.
    fn delete_source(&self, id: RecordId) -> Result<(), RecordError> {
        self.mutate(|set| {
            set.sources
                .remove(&id)
                .ok_or_else(|| not_found("source image", id))?;
            set.images.retain(|_, image| image.source_image_id != id);
            Ok(())
        })
    }

    fn insert_image(&self, mut image: DerivedImage) -> Result<DerivedImage, RecordError> {
        self.mutate(|set| {
            if !set.sources.contains_key(&image.source_image_id) {
                return Err(not_found("source image", image.source_image_id));
            }
            image.id = set.allocate();
            set.images.insert(image.id, image.clone());
            Ok(image)
        })
    }

    fn update_image(&self, image: &DerivedImage) -> Result<(), RecordError> {
        self.mutate(|set| match set.images.get_mut(&image.id) {
            Some(existing) => {
                *existing = image.clone();
                Ok(())
            }
            None => Err(not_found("image", image.id)),
        })
    }

    fn image(&self, id: RecordId) -> Result<DerivedImage, RecordError> {
        self.read(|set| set.images.get(&id).cloned())
            .ok_or_else(|| not_found("image", id))
    }

    fn image_by_uuid(&self, uuid: &Uuid) -> Result<DerivedImage, RecordError> {
        self.read(|set| set.images.values().find(|i| &i.uuid == uuid).cloned())
            .ok_or_else(|| not_found("image", uuid))
    }

    fn images(&self) -> Result<Vec<DerivedImage>, RecordError> {
        Ok(self.read(|set| set.images.values().cloned().collect()))
    }

    fn delete_image(&self, id: RecordId) -> Result<(), RecordError> {
        self.mutate(|set| {
            set.images
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| not_found("image", id))
        })
    }
}
