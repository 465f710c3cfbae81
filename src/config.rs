//! Library configuration module.
//!
//! Handles loading, validating, and merging `image-library.toml`. User files
//! are sparse: they are merged on top of the stock defaults, so only the
//! values being changed need to be written down.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [[breakpoints]]              # sm 640, md 768, lg 1024, xl 1280, 2xl 1536
//! key = "sm"
//! min_width = 640
//! label = "Small"
//!
//! [defaults]
//! crop_position = "center"     # one of the nine anchors
//! disk = "public"              # disk for new uploads
//!
//! [defaults.temporary_url.default]
//! enabled = false              # sign source URLs instead of serving them
//! expiration_minutes = 5
//!
//! [generate]
//! webp = true                  # WebP sibling next to every derived file
//! responsive_versions = true   # width series per breakpoint
//!
//! [paths]
//! base = "image-library"       # prefix of every stored path
//!
//! [queue]
//! connection = "sync"          # "sync" runs chains immediately, anything else defers
//! queue = "default"
//!
//! [responsive_images]
//! width_difference_threshold = 100
//! size_step_multiplier = 0.7
//! min_width = 100
//!
//! [uploads]
//! max_file_size = "10MB"       # bytes, or a B/KB/MB/GB/TB string
//! mime_types = ["image/jpeg", "image/png", "image/webp"]
//!
//! [encoding]
//! quality = 90
//!
//! [processing]
//! max_processes = 4            # omit for auto = CPU cores
//!
//! [disks.public]
//! root = "storage/public"
//! url = "/storage"
//! ```
//!
//! Contexts and conversions can be declared as `[[contexts]]` and
//! `[[conversions]]` tables; see [`stock_config_toml`].
//!
//! Unknown keys are rejected to catch typos early.

use crate::breakpoint::{Breakpoint, Breakpoints, default_breakpoints};
use crate::context::{ContextDefaults, ImageContext};
use crate::conversion::ConversionDefinition;
use crate::error::ConfigurationError;
use crate::imaging::{Quality, ResponsiveSettings};
use crate::queue::Routing;
use crate::types::{AspectRatio, CropPosition};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Library configuration loaded from `image-library.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LibraryConfig {
    pub breakpoints: Vec<Breakpoint>,
    pub defaults: DefaultsConfig,
    pub generate: GenerateConfig,
    pub paths: PathsConfig,
    pub queue: QueueConfig,
    pub responsive_images: ResponsiveImagesConfig,
    pub uploads: UploadsConfig,
    pub encoding: EncodingConfig,
    pub processing: ProcessingConfig,
    pub disks: BTreeMap<String, DiskConfig>,
    pub contexts: Vec<ContextConfig>,
    pub conversions: Vec<ConversionDefinition>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            breakpoints: default_breakpoints(),
            defaults: DefaultsConfig::default(),
            generate: GenerateConfig::default(),
            paths: PathsConfig::default(),
            queue: QueueConfig::default(),
            responsive_images: ResponsiveImagesConfig::default(),
            uploads: UploadsConfig::default(),
            encoding: EncodingConfig::default(),
            processing: ProcessingConfig::default(),
            disks: BTreeMap::from([("public".to_string(), DiskConfig::default())]),
            contexts: Vec::new(),
            conversions: Vec::new(),
        }
    }
}

impl LibraryConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let breakpoints = self.breakpoint_set()?;

        let multiplier = self.responsive_images.size_step_multiplier;
        if !(multiplier > 0.0 && multiplier < 1.0) {
            return Err(ConfigError::Validation(
                "responsive_images.size_step_multiplier must lie between 0 and 1".into(),
            ));
        }
        if !(1..=100).contains(&self.encoding.quality) {
            return Err(ConfigError::Validation(
                "encoding.quality must be 1-100".into(),
            ));
        }
        if !self.disks.contains_key(&self.defaults.disk) {
            return Err(ConfigError::Validation(format!(
                "defaults.disk '{}' has no [disks.{}] table",
                self.defaults.disk, self.defaults.disk
            )));
        }
        if self.uploads.mime_types.is_empty() {
            return Err(ConfigError::Validation(
                "uploads.mime_types must not be empty".into(),
            ));
        }
        for context in &self.contexts {
            context.build(&breakpoints)?;
        }
        for conversion in &self.conversions {
            conversion.validate()?;
        }
        Ok(())
    }

    pub fn breakpoint_set(&self) -> Result<Breakpoints, ConfigurationError> {
        Breakpoints::new(self.breakpoints.clone())
    }

    pub fn context_defaults(&self) -> ContextDefaults {
        ContextDefaults {
            crop_position: self.defaults.crop_position,
            generate_webp: self.generate.webp,
            generate_responsive_versions: self.generate.responsive_versions,
        }
    }

    pub fn responsive_settings(&self) -> ResponsiveSettings {
        ResponsiveSettings {
            size_step_multiplier: self.responsive_images.size_step_multiplier,
            width_difference_threshold: self.responsive_images.width_difference_threshold,
            min_width: self.responsive_images.min_width,
        }
    }

    pub fn quality(&self) -> Quality {
        Quality::new(self.encoding.quality)
    }

    pub fn routing(&self) -> Routing {
        Routing {
            connection: self.queue.connection.clone(),
            queue: self.queue.queue.clone(),
        }
    }

    /// Every configured context, built against the configured breakpoints.
    pub fn build_contexts(&self) -> Result<Vec<ImageContext>, ConfigurationError> {
        let breakpoints = self.breakpoint_set()?;
        self.contexts.iter().map(|c| c.build(&breakpoints)).collect()
    }

    /// Temporary URL policy for `disk`, falling back to the `default` entry.
    pub fn temporary_url_policy(&self, disk: &str) -> TemporaryUrlPolicy {
        self.defaults
            .temporary_url
            .get(disk)
            .or_else(|| self.defaults.temporary_url.get("default"))
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultsConfig {
    pub crop_position: CropPosition,
    pub disk: String,
    /// Keyed by disk name, plus `default`.
    pub temporary_url: BTreeMap<String, TemporaryUrlPolicy>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            crop_position: CropPosition::Center,
            disk: "public".to_string(),
            temporary_url: BTreeMap::from([(
                "default".to_string(),
                TemporaryUrlPolicy::default(),
            )]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemporaryUrlPolicy {
    pub enabled: bool,
    pub expiration_minutes: u64,
}

impl Default for TemporaryUrlPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            expiration_minutes: 5,
        }
    }
}

impl TemporaryUrlPolicy {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.expiration_minutes * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerateConfig {
    pub webp: bool,
    pub responsive_versions: bool,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            webp: true,
            responsive_versions: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub base: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base: "image-library".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub connection: String,
    pub queue: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            connection: "sync".to_string(),
            queue: "default".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn is_sync(&self) -> bool {
        self.connection == "sync"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResponsiveImagesConfig {
    /// Minimum distance in pixels between two accepted widths.
    pub width_difference_threshold: u32,
    /// Factor the predicted file size shrinks by per step.
    pub size_step_multiplier: f64,
    /// Upper bound on the smallest generated width.
    pub min_width: u32,
}

impl Default for ResponsiveImagesConfig {
    fn default() -> Self {
        Self {
            width_difference_threshold: 100,
            size_step_multiplier: 0.7,
            min_width: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    /// Maximum upload size in bytes.
    #[serde(deserialize_with = "deserialize_file_size")]
    pub max_file_size: u64,
    pub mime_types: Vec<String>,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            mime_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
        }
    }
}

/// Parse `"10MB"`-style sizes. Units are binary (`KB` = 1024 bytes).
pub fn parse_file_size(value: &str) -> Result<u64, ConfigError> {
    let value = value.trim().to_uppercase();
    let invalid = || ConfigError::Validation(format!("invalid uploads.max_file_size value '{value}'"));
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits.parse().map_err(|_| invalid())?;
    let factor: u64 = match unit.trim() {
        "B" => 1,
        "KB" => 1024,
        "MB" => 1024 * 1024,
        "GB" => 1024 * 1024 * 1024,
        "TB" => 1024 * 1024 * 1024 * 1024,
        _ => return Err(invalid()),
    };
    amount.checked_mul(factor).ok_or_else(invalid)
}

fn deserialize_file_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Bytes(u64),
        Text(String),
    }
    match Size::deserialize(deserializer)? {
        Size::Bytes(bytes) => Ok(bytes),
        Size::Text(text) => parse_file_size(&text).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodingConfig {
    /// JPEG encoding quality (1 = worst, 100 = best).
    pub quality: u32,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self { quality: 90 }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel derivation workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// A local disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiskConfig {
    /// Directory relative to the library root (absolute paths are kept).
    pub root: String,
    /// Public URL prefix.
    pub url: String,
    /// Enables temporary (signed) URLs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            root: "storage/public".to_string(),
            url: "/storage".to_string(),
            signing_key: None,
        }
    }
}

/// One value for every breakpoint, or a value per breakpoint key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerBreakpoint<T> {
    Uniform(T),
    Each(BTreeMap<String, T>),
}

/// A declarative context, same semantics as the [`ImageContext`] builder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextConfig {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<PerBreakpoint<AspectRatio>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_width: Option<PerBreakpoint<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<PerBreakpoint<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_position: Option<PerBreakpoint<CropPosition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blur: Option<PerBreakpoint<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greyscale: Option<PerBreakpoint<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sepia: Option<PerBreakpoint<bool>>,
    #[serde(default)]
    pub allows_multiple: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_webp: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_responsive_versions: Option<bool>,
}

impl ContextConfig {
    pub fn build(&self, breakpoints: &Breakpoints) -> Result<ImageContext, ConfigurationError> {
        let mut context =
            ImageContext::new(self.key.clone(), breakpoints).allows_multiple(self.allows_multiple);
        if let Some(label) = &self.label {
            context = context.label(label.clone());
        }
        if let Some(value) = &self.aspect_ratio {
            context = match value {
                PerBreakpoint::Uniform(v) => context.aspect_ratio(*v),
                PerBreakpoint::Each(map) => context.aspect_ratios(map)?,
            };
        }
        if let Some(value) = &self.min_width {
            context = match value {
                PerBreakpoint::Uniform(v) => context.min_width(*v),
                PerBreakpoint::Each(map) => context.min_widths(map)?,
            };
        }
        if let Some(value) = &self.max_width {
            context = match value {
                PerBreakpoint::Uniform(v) => context.max_width(*v),
                PerBreakpoint::Each(map) => context.max_widths(map)?,
            };
        }
        if let Some(value) = &self.crop_position {
            context = match value {
                PerBreakpoint::Uniform(v) => context.crop_position(*v),
                PerBreakpoint::Each(map) => context.crop_positions(map)?,
            };
        }
        if let Some(value) = &self.blur {
            context = match value {
                PerBreakpoint::Uniform(v) => context.blur(*v)?,
                PerBreakpoint::Each(map) => context.blurs(map)?,
            };
        }
        if let Some(value) = &self.greyscale {
            context = match value {
                PerBreakpoint::Uniform(v) => context.greyscale(*v),
                PerBreakpoint::Each(map) => context.greyscales(map)?,
            };
        }
        if let Some(value) = &self.sepia {
            context = match value {
                PerBreakpoint::Uniform(v) => context.sepia(*v),
                PerBreakpoint::Each(map) => context.sepias(map)?,
            };
        }
        if let Some(webp) = self.generate_webp {
            context = context.generate_webp(webp);
        }
        if let Some(responsive) = self.generate_responsive_versions {
            context = context.generate_responsive_versions(responsive);
        }
        Ok(context)
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(LibraryConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely, so a user
///   `[[breakpoints]]` list replaces the stock one.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, then deserialize and
/// validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<LibraryConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: LibraryConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load a config file, merged over the stock defaults.
///
/// A missing file yields the defaults. A file that exists but contains
/// invalid TOML or unknown keys is an error.
pub fn load_config(path: &Path) -> Result<LibraryConfig, ConfigError> {
    if !path.exists() {
        return resolve_config(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    resolve_config(Some(value))
}

/// Returns a fully-commented stock `image-library.toml` with all keys and
/// explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Image Library Configuration
# ===========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Breakpoints
# ---------------------------------------------------------------------------
# Viewport thresholds, each producing its own crop. A [[breakpoints]] list
# replaces the defaults entirely. Min widths must be unique and non-zero.
[[breakpoints]]
key = "sm"
min_width = 640
label = "Small"

[[breakpoints]]
key = "md"
min_width = 768
label = "Medium"

[[breakpoints]]
key = "lg"
min_width = 1024
label = "Large"

[[breakpoints]]
key = "xl"
min_width = 1280
label = "Extra large"

[[breakpoints]]
key = "2xl"
min_width = 1536
label = "Extra extra large"

# ---------------------------------------------------------------------------
# Defaults
# ---------------------------------------------------------------------------
[defaults]
# Anchor for automatic crops when a context does not set one:
# top-left, top, top-right, left, center, right, bottom-left, bottom, bottom-right
crop_position = "center"

# Disk new uploads are stored on.
disk = "public"

# Serve source URLs as signed, expiring links. Per-disk entries
# ([defaults.temporary_url.<disk>]) override the default entry.
[defaults.temporary_url.default]
enabled = false
expiration_minutes = 5

# ---------------------------------------------------------------------------
# Generation
# ---------------------------------------------------------------------------
[generate]
# Write a WebP copy next to every derived file. Contexts may override.
webp = true

# Derive a series of smaller widths per breakpoint for srcset.
responsive_versions = true

[paths]
# Prefix of every stored path: {base}/{source_uuid}/...
base = "image-library"

# ---------------------------------------------------------------------------
# Queue
# ---------------------------------------------------------------------------
[queue]
# "sync" runs derivation chains immediately. Any other connection stores
# them until drained.
connection = "sync"
queue = "default"

# ---------------------------------------------------------------------------
# Width series
# ---------------------------------------------------------------------------
[responsive_images]
# Widths closer than this to the previous one are skipped.
width_difference_threshold = 100

# Predicted file size shrinks by this factor per step (between 0 and 1).
size_step_multiplier = 0.7

# Upper bound on the smallest width generated.
min_width = 100

# ---------------------------------------------------------------------------
# Uploads
# ---------------------------------------------------------------------------
[uploads]
# Integer bytes or a string with a B/KB/MB/GB/TB unit.
max_file_size = "10MB"
mime_types = ["image/jpeg", "image/png", "image/webp"]

[encoding]
# JPEG quality (1 = worst, 100 = best).
quality = 90

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel derivation workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# ---------------------------------------------------------------------------
# Disks
# ---------------------------------------------------------------------------
[disks.public]
# Directory relative to the library root.
root = "storage/public"
# Public URL prefix.
url = "/storage"
# Secret for temporary URLs.
# signing_key = "change-me"

# ---------------------------------------------------------------------------
# Contexts
# ---------------------------------------------------------------------------
# Each value is either uniform or a table with one entry per breakpoint:
#   aspect_ratio = { sm = "1:1", md = "4:3", lg = "16:9", xl = "16:9", 2xl = "16:9" }
#
# [[contexts]]
# key = "hero"
# label = "Hero"
# aspect_ratio = "16:9"
# max_width = 1280
# crop_position = "center"
# blur = 0
# greyscale = false
# sepia = false
# allows_multiple = false
# generate_webp = true
# generate_responsive_versions = true

# ---------------------------------------------------------------------------
# Conversions
# ---------------------------------------------------------------------------
# Breakpoint-independent derivations stored next to the original.
#
# [[conversions]]
# name = "thumbnail"
# aspect_ratio = "1:1"
# default_width = 300
# effects = { blur = 0, pixelate = 0, greyscale = false, sepia = false, sharpen = 0 }
# create_sync = false
"##
}
