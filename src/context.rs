//! Image contexts: per-usage-site derivation settings.
//!
//! A context ("hero", "avatar", "gallery_thumb") says, per breakpoint, which
//! aspect ratio to crop to, how wide the result may get, where to anchor
//! automatic crops, and which visual effects to apply. Contexts are built
//! once at startup and registered in a [`ContextRegistry`] that is passed
//! explicitly to whoever needs it.
//!
//! ## Range setters
//!
//! Every per-breakpoint field can be written five ways:
//!
//! | Call | Breakpoints written |
//! |---|---|
//! | `max_width(v)` | all |
//! | `max_widths(map)` | all, one value each; every breakpoint must be present |
//! | `max_width_in(BreakpointRange::Only("md"), v)` | `md` |
//! | `max_width_in(BreakpointRange::From("md"), v)` | `md` and everything wider |
//! | `max_width_in(BreakpointRange::To("md"), v)` | `md` and everything narrower |
//! | `max_width_in(BreakpointRange::Between("sm", "lg"), v)` | `sm` through `lg` inclusive |
//!
//! `Between` with its ends reversed is applied to the same inclusive span.
//!
//! ## Configuration hash
//!
//! [`ImageContext::configuration_hash`] is a SHA-256 over the sorted-key JSON
//! form of the whole configuration. It is persisted on every derived image,
//! so it must only change when the configuration does.

use crate::breakpoint::{Breakpoint, Breakpoints};
use crate::error::ConfigurationError;
use crate::types::{AspectRatio, CropPosition};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Which breakpoints a setter writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointRange {
    All,
    Only(String),
    From(String),
    To(String),
    Between(String, String),
}

impl BreakpointRange {
    pub fn only(key: impl Into<String>) -> Self {
        Self::Only(key.into())
    }

    pub fn from(key: impl Into<String>) -> Self {
        Self::From(key.into())
    }

    pub fn to(key: impl Into<String>) -> Self {
        Self::To(key.into())
    }

    pub fn between(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self::Between(start.into(), end.into())
    }

    /// Resolve to the affected breakpoint keys, in sorted order.
    fn keys<'a>(
        &self,
        breakpoints: &'a Breakpoints,
        context: &str,
    ) -> Result<Vec<&'a str>, ConfigurationError> {
        let index = |key: &str| {
            breakpoints
                .position(key)
                .ok_or_else(|| ConfigurationError::UnknownBreakpoint {
                    breakpoint: key.to_string(),
                    context: context.to_string(),
                })
        };
        let sorted = breakpoints.sorted();
        let span = match self {
            BreakpointRange::All => 0..sorted.len(),
            BreakpointRange::Only(key) => {
                let i = index(key)?;
                i..i + 1
            }
            BreakpointRange::From(key) => index(key)?..sorted.len(),
            BreakpointRange::To(key) => 0..index(key)? + 1,
            BreakpointRange::Between(start, end) => {
                let (a, b) = (index(start)?, index(end)?);
                a.min(b)..a.max(b) + 1
            }
        };
        Ok(sorted[span].iter().map(|b| b.key.as_str()).collect())
    }
}

/// Fallbacks applied when a context leaves a value unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextDefaults {
    pub crop_position: CropPosition,
    pub generate_webp: bool,
    pub generate_responsive_versions: bool,
}

impl Default for ContextDefaults {
    fn default() -> Self {
        Self {
            crop_position: CropPosition::Center,
            generate_webp: true,
            generate_responsive_versions: true,
        }
    }
}

/// Everything the engine needs for one breakpoint, with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBreakpoint {
    pub breakpoint: Breakpoint,
    pub aspect_ratio: Option<AspectRatio>,
    pub min_width: Option<u32>,
    pub max_width: Option<u32>,
    pub crop_position: CropPosition,
    pub blur: Option<u32>,
    pub greyscale: bool,
    pub sepia: bool,
    pub generate_webp: bool,
    pub generate_responsive_versions: bool,
}

/// Named per-breakpoint derivation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageContext {
    key: String,
    label: Option<String>,
    breakpoints: Breakpoints,
    aspect_ratio: BTreeMap<String, AspectRatio>,
    min_width: BTreeMap<String, u32>,
    max_width: BTreeMap<String, u32>,
    crop_position: BTreeMap<String, CropPosition>,
    blur: BTreeMap<String, u32>,
    greyscale: BTreeMap<String, bool>,
    sepia: BTreeMap<String, bool>,
    allows_multiple: bool,
    generate_webp: Option<bool>,
    generate_responsive_versions: Option<bool>,
}

/// Serialized form fed into the configuration hash.
#[derive(Serialize)]
struct HashInput<'a> {
    key: &'a str,
    label: &'a Option<String>,
    aspect_ratio: &'a BTreeMap<String, AspectRatio>,
    min_width: &'a BTreeMap<String, u32>,
    max_width: &'a BTreeMap<String, u32>,
    crop_position: &'a BTreeMap<String, CropPosition>,
    blur: &'a BTreeMap<String, u32>,
    greyscale: &'a BTreeMap<String, bool>,
    sepia: &'a BTreeMap<String, bool>,
    allows_multiple: bool,
    generate_webp: Option<bool>,
    generate_responsive_versions: Option<bool>,
}

fn assign<T: Clone>(
    target: &mut BTreeMap<String, T>,
    keys: &[&str],
    value: T,
) {
    for key in keys {
        target.insert((*key).to_string(), value.clone());
    }
}

impl ImageContext {
    pub fn new(key: impl Into<String>, breakpoints: &Breakpoints) -> Self {
        Self {
            key: key.into(),
            label: None,
            breakpoints: breakpoints.clone(),
            aspect_ratio: BTreeMap::new(),
            min_width: BTreeMap::new(),
            max_width: BTreeMap::new(),
            crop_position: BTreeMap::new(),
            blur: BTreeMap::new(),
            greyscale: BTreeMap::new(),
            sepia: BTreeMap::new(),
            allows_multiple: false,
            generate_webp: None,
            generate_responsive_versions: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Explicit label, or the key title-cased (`hero_banner` → `Hero Banner`).
    pub fn display_label(&self) -> String {
        match &self.label {
            Some(label) if !label.trim().is_empty() => label.clone(),
            _ => self
                .key
                .split('_')
                .filter(|w| !w.is_empty())
                .map(|w| {
                    let mut chars = w.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<String>>()
                .join(" "),
        }
    }

    fn range_keys(&self, range: &BreakpointRange) -> Result<Vec<String>, ConfigurationError> {
        Ok(range
            .keys(&self.breakpoints, &self.key)?
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Strict per-breakpoint map: every registered breakpoint must be present.
    fn each<T: Clone>(
        &self,
        field: &'static str,
        values: &BTreeMap<String, T>,
    ) -> Result<BTreeMap<String, T>, ConfigurationError> {
        self.breakpoints
            .keys()
            .map(|key| {
                values
                    .get(key)
                    .map(|v| (key.to_string(), v.clone()))
                    .ok_or_else(|| ConfigurationError::MissingBreakpointValue {
                        field,
                        breakpoint: key.to_string(),
                        context: self.key.clone(),
                    })
            })
            .collect()
    }

    fn check_effect(
        &self,
        field: &'static str,
        breakpoint: &str,
        value: u32,
    ) -> Result<(), ConfigurationError> {
        if value > 100 {
            return Err(ConfigurationError::OutOfRange {
                field,
                breakpoint: breakpoint.to_string(),
                context: self.key.clone(),
                value,
            });
        }
        Ok(())
    }

    fn all_keys(&self) -> Vec<String> {
        self.breakpoints.keys().map(str::to_string).collect()
    }

    // -------------------------------------------------------------------------
    // Aspect ratio
    // -------------------------------------------------------------------------

    pub fn aspect_ratio(mut self, value: AspectRatio) -> Self {
        let keys = self.all_keys();
        assign(&mut self.aspect_ratio, &as_strs(&keys), value);
        self
    }

    pub fn aspect_ratios(
        mut self,
        values: &BTreeMap<String, AspectRatio>,
    ) -> Result<Self, ConfigurationError> {
        self.aspect_ratio = self.each("Aspect ratio", values)?;
        Ok(self)
    }

    pub fn aspect_ratio_in(
        mut self,
        range: BreakpointRange,
        value: AspectRatio,
    ) -> Result<Self, ConfigurationError> {
        let keys = self.range_keys(&range)?;
        assign(&mut self.aspect_ratio, &as_strs(&keys), value);
        Ok(self)
    }

    pub fn aspect_ratio_for(&self, breakpoint: &str) -> Option<AspectRatio> {
        self.aspect_ratio.get(breakpoint).copied()
    }

    // -------------------------------------------------------------------------
    // Min width
    // -------------------------------------------------------------------------

    pub fn min_width(mut self, value: u32) -> Self {
        let keys = self.all_keys();
        assign(&mut self.min_width, &as_strs(&keys), value);
        self
    }

    pub fn min_widths(mut self, values: &BTreeMap<String, u32>) -> Result<Self, ConfigurationError> {
        self.min_width = self.each("Min width", values)?;
        Ok(self)
    }

    pub fn min_width_in(
        mut self,
        range: BreakpointRange,
        value: u32,
    ) -> Result<Self, ConfigurationError> {
        let keys = self.range_keys(&range)?;
        assign(&mut self.min_width, &as_strs(&keys), value);
        Ok(self)
    }

    pub fn min_width_for(&self, breakpoint: &str) -> Option<u32> {
        self.min_width.get(breakpoint).copied()
    }

    // -------------------------------------------------------------------------
    // Max width
    // -------------------------------------------------------------------------

    pub fn max_width(mut self, value: u32) -> Self {
        let keys = self.all_keys();
        assign(&mut self.max_width, &as_strs(&keys), value);
        self
    }

    pub fn max_widths(mut self, values: &BTreeMap<String, u32>) -> Result<Self, ConfigurationError> {
        self.max_width = self.each("Max width", values)?;
        Ok(self)
    }

    pub fn max_width_in(
        mut self,
        range: BreakpointRange,
        value: u32,
    ) -> Result<Self, ConfigurationError> {
        let keys = self.range_keys(&range)?;
        assign(&mut self.max_width, &as_strs(&keys), value);
        Ok(self)
    }

    pub fn max_width_for(&self, breakpoint: &str) -> Option<u32> {
        self.max_width.get(breakpoint).copied()
    }

    // -------------------------------------------------------------------------
    // Crop position
    // -------------------------------------------------------------------------

    pub fn crop_position(mut self, value: CropPosition) -> Self {
        let keys = self.all_keys();
        assign(&mut self.crop_position, &as_strs(&keys), value);
        self
    }

    pub fn crop_positions(
        mut self,
        values: &BTreeMap<String, CropPosition>,
    ) -> Result<Self, ConfigurationError> {
        self.crop_position = self.each("Crop position", values)?;
        Ok(self)
    }

    pub fn crop_position_in(
        mut self,
        range: BreakpointRange,
        value: CropPosition,
    ) -> Result<Self, ConfigurationError> {
        let keys = self.range_keys(&range)?;
        assign(&mut self.crop_position, &as_strs(&keys), value);
        Ok(self)
    }

    /// The anchor for `breakpoint`, or `default` when unset.
    pub fn crop_position_for(&self, breakpoint: &str, default: CropPosition) -> CropPosition {
        self.crop_position
            .get(breakpoint)
            .copied()
            .unwrap_or(default)
    }

    // -------------------------------------------------------------------------
    // Blur (0-100)
    // -------------------------------------------------------------------------

    pub fn blur(self, value: u32) -> Result<Self, ConfigurationError> {
        self.blur_in(BreakpointRange::All, value)
    }

    pub fn blurs(mut self, values: &BTreeMap<String, u32>) -> Result<Self, ConfigurationError> {
        let values = self.each("Blur", values)?;
        for (key, value) in &values {
            self.check_effect("Blur", key, *value)?;
        }
        self.blur = values;
        Ok(self)
    }

    pub fn blur_in(
        mut self,
        range: BreakpointRange,
        value: u32,
    ) -> Result<Self, ConfigurationError> {
        let keys = self.range_keys(&range)?;
        let reported = match &range {
            BreakpointRange::All => keys.first().cloned().unwrap_or_default(),
            _ => keys.join(", "),
        };
        self.check_effect("Blur", &reported, value)?;
        assign(&mut self.blur, &as_strs(&keys), value);
        Ok(self)
    }

    pub fn blur_for(&self, breakpoint: &str) -> Option<u32> {
        self.blur.get(breakpoint).copied()
    }

    // -------------------------------------------------------------------------
    // Greyscale / sepia
    // -------------------------------------------------------------------------

    pub fn greyscale(mut self, value: bool) -> Self {
        let keys = self.all_keys();
        assign(&mut self.greyscale, &as_strs(&keys), value);
        self
    }

    pub fn greyscales(mut self, values: &BTreeMap<String, bool>) -> Result<Self, ConfigurationError> {
        self.greyscale = self.each("Greyscale", values)?;
        Ok(self)
    }

    pub fn greyscale_in(
        mut self,
        range: BreakpointRange,
        value: bool,
    ) -> Result<Self, ConfigurationError> {
        let keys = self.range_keys(&range)?;
        assign(&mut self.greyscale, &as_strs(&keys), value);
        Ok(self)
    }

    pub fn greyscale_for(&self, breakpoint: &str) -> Option<bool> {
        self.greyscale.get(breakpoint).copied()
    }

    pub fn sepia(mut self, value: bool) -> Self {
        let keys = self.all_keys();
        assign(&mut self.sepia, &as_strs(&keys), value);
        self
    }

    pub fn sepias(mut self, values: &BTreeMap<String, bool>) -> Result<Self, ConfigurationError> {
        self.sepia = self.each("Sepia", values)?;
        Ok(self)
    }

    pub fn sepia_in(
        mut self,
        range: BreakpointRange,
        value: bool,
    ) -> Result<Self, ConfigurationError> {
        let keys = self.range_keys(&range)?;
        assign(&mut self.sepia, &as_strs(&keys), value);
        Ok(self)
    }

    pub fn sepia_for(&self, breakpoint: &str) -> Option<bool> {
        self.sepia.get(breakpoint).copied()
    }

    // -------------------------------------------------------------------------
    // Flags
    // -------------------------------------------------------------------------

    pub fn allows_multiple(mut self, value: bool) -> Self {
        self.allows_multiple = value;
        self
    }

    pub fn get_allows_multiple(&self) -> bool {
        self.allows_multiple
    }

    pub fn generate_webp(mut self, value: bool) -> Self {
        self.generate_webp = Some(value);
        self
    }

    /// Explicit setting, or `default` when the context leaves it open.
    pub fn generates_webp(&self, default: bool) -> bool {
        self.generate_webp.unwrap_or(default)
    }

    pub fn generate_responsive_versions(mut self, value: bool) -> Self {
        self.generate_responsive_versions = Some(value);
        self
    }

    pub fn generates_responsive_versions(&self, default: bool) -> bool {
        self.generate_responsive_versions.unwrap_or(default)
    }

    // -------------------------------------------------------------------------
    // Resolution and hashing
    // -------------------------------------------------------------------------

    /// Resolve every setting for `breakpoint`, applying `defaults`.
    ///
    /// Returns `None` when the breakpoint is not part of this context's set.
    pub fn resolve(
        &self,
        breakpoint: &str,
        defaults: &ContextDefaults,
    ) -> Option<ResolvedBreakpoint> {
        let bp = self.breakpoints.get(breakpoint)?;
        Some(ResolvedBreakpoint {
            breakpoint: bp.clone(),
            aspect_ratio: self.aspect_ratio_for(breakpoint),
            min_width: self.min_width_for(breakpoint),
            max_width: self.max_width_for(breakpoint),
            crop_position: self.crop_position_for(breakpoint, defaults.crop_position),
            blur: self.blur_for(breakpoint),
            greyscale: self.greyscale_for(breakpoint).unwrap_or(false),
            sepia: self.sepia_for(breakpoint).unwrap_or(false),
            generate_webp: self.generates_webp(defaults.generate_webp),
            generate_responsive_versions: self
                .generates_responsive_versions(defaults.generate_responsive_versions),
        })
    }

    /// Stable hex SHA-256 of the full configuration.
    pub fn configuration_hash(&self) -> String {
        let input = HashInput {
            key: &self.key,
            label: &self.label,
            aspect_ratio: &self.aspect_ratio,
            min_width: &self.min_width,
            max_width: &self.max_width,
            crop_position: &self.crop_position,
            blur: &self.blur,
            greyscale: &self.greyscale,
            sepia: &self.sepia,
            allows_multiple: self.allows_multiple,
            generate_webp: self.generate_webp,
            generate_responsive_versions: self.generate_responsive_versions,
        };
        // BTreeMap fields serialize in key order, so the JSON is canonical.
        let json = serde_json::to_vec(&input)
            .expect("context state is plain data with string keys and always serializes");
        format!("{:x}", Sha256::digest(&json))
    }
}

fn as_strs(keys: &[String]) -> Vec<&str> {
    keys.iter().map(String::as_str).collect()
}

/// Process-wide lookup of contexts by key, shared explicitly.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    contexts: RwLock<BTreeMap<String, Arc<ImageContext>>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a context, replacing any previous one with the same key.
    pub fn register(&self, context: ImageContext) {
        let mut contexts = self.contexts.write().unwrap_or_else(|e| e.into_inner());
        contexts.insert(context.key.clone(), Arc::new(context));
    }

    pub fn register_all(&self, contexts: impl IntoIterator<Item = ImageContext>) {
        for context in contexts {
            self.register(context);
        }
    }

    pub fn remove(&self, key: &str) -> Option<Arc<ImageContext>> {
        let mut contexts = self.contexts.write().unwrap_or_else(|e| e.into_inner());
        contexts.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<Arc<ImageContext>> {
        if key.trim().is_empty() {
            return None;
        }
        let contexts = self.contexts.read().unwrap_or_else(|e| e.into_inner());
        contexts.get(key).cloned()
    }

    pub fn all(&self) -> Vec<Arc<ImageContext>> {
        let contexts = self.contexts.read().unwrap_or_else(|e| e.into_inner());
        contexts.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ar(h: u32, v: u32) -> AspectRatio {
        AspectRatio::new(h, v).unwrap()
    }

    fn ctx() -> ImageContext {
        ImageContext::new("hero_banner", &Breakpoints::default())
    }

    // =========================================================================
    // Range setters
    // =========================================================================

    #[test]
    fn uniform_sets_every_breakpoint() {
        let c = ctx().max_width(500);
        for key in ["sm", "md", "lg", "xl", "2xl"] {
            assert_eq!(c.max_width_for(key), Some(500));
        }
    }

    #[test]
    fn only_sets_one_breakpoint() {
        let c = ctx()
            .max_width_in(BreakpointRange::only("lg"), 900)
            .unwrap();
        assert_eq!(c.max_width_for("lg"), Some(900));
        assert_eq!(c.max_width_for("md"), None);
        assert_eq!(c.max_width_for("xl"), None);
    }

    #[test]
    fn from_sets_breakpoint_and_wider() {
        let c = ctx()
            .aspect_ratio(ar(1, 1))
            .aspect_ratio_in(BreakpointRange::from("lg"), ar(16, 9))
            .unwrap();
        assert_eq!(c.aspect_ratio_for("md"), Some(ar(1, 1)));
        assert_eq!(c.aspect_ratio_for("lg"), Some(ar(16, 9)));
        assert_eq!(c.aspect_ratio_for("2xl"), Some(ar(16, 9)));
    }

    #[test]
    fn to_sets_breakpoint_and_narrower() {
        let c = ctx()
            .min_width_in(BreakpointRange::to("md"), 320)
            .unwrap();
        assert_eq!(c.min_width_for("sm"), Some(320));
        assert_eq!(c.min_width_for("md"), Some(320));
        assert_eq!(c.min_width_for("lg"), None);
    }

    #[test]
    fn between_is_inclusive() {
        let c = ctx()
            .crop_position_in(BreakpointRange::between("md", "xl"), CropPosition::Top)
            .unwrap();
        assert_eq!(c.crop_position_for("sm", CropPosition::Center), CropPosition::Center);
        assert_eq!(c.crop_position_for("md", CropPosition::Center), CropPosition::Top);
        assert_eq!(c.crop_position_for("lg", CropPosition::Center), CropPosition::Top);
        assert_eq!(c.crop_position_for("xl", CropPosition::Center), CropPosition::Top);
        assert_eq!(c.crop_position_for("2xl", CropPosition::Center), CropPosition::Center);
    }

    #[test]
    fn between_reversed_applies_same_span() {
        let forward = ctx()
            .greyscale_in(BreakpointRange::between("sm", "lg"), true)
            .unwrap();
        let reversed = ctx()
            .greyscale_in(BreakpointRange::between("lg", "sm"), true)
            .unwrap();
        assert_eq!(forward, reversed);
        assert_eq!(reversed.greyscale_for("md"), Some(true));
        assert_eq!(reversed.greyscale_for("xl"), None);
    }

    #[test]
    fn unknown_breakpoint_in_range_fails() {
        let err = ctx()
            .sepia_in(BreakpointRange::only("xxl"), true)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownBreakpoint { .. }));
    }

    #[test]
    fn per_breakpoint_map_requires_every_breakpoint() {
        let mut map = BTreeMap::new();
        for key in ["sm", "lg", "xl", "2xl"] {
            map.insert(key.to_string(), ar(4, 3));
        }
        let err = ctx().aspect_ratios(&map).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'md'"), "{msg}");
        assert!(msg.contains("'hero_banner'"), "{msg}");
    }

    #[test]
    fn per_breakpoint_map_replaces_whole_field() {
        let map: BTreeMap<String, u32> = ["sm", "md", "lg", "xl", "2xl"]
            .iter()
            .enumerate()
            .map(|(i, k)| (k.to_string(), 100 * (i as u32 + 1)))
            .collect();
        let c = ctx().max_width(1).max_widths(&map).unwrap();
        assert_eq!(c.max_width_for("sm"), Some(100));
        assert_eq!(c.max_width_for("2xl"), Some(500));
    }

    #[test]
    fn repeated_only_is_idempotent() {
        let once = ctx()
            .max_width(400)
            .max_width_in(BreakpointRange::only("md"), 700)
            .unwrap();
        let twice = once
            .clone()
            .max_width_in(BreakpointRange::only("md"), 700)
            .unwrap();
        assert_eq!(once, twice);
    }

    // =========================================================================
    // Effect validation
    // =========================================================================

    #[test]
    fn blur_out_of_range_rejected() {
        let err = ctx().blur(101).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::OutOfRange { value: 101, .. }
        ));
        assert!(ctx().blur(100).is_ok());
        assert!(ctx().blur(0).is_ok());
    }

    #[test]
    fn blur_range_error_names_breakpoint() {
        let err = ctx()
            .blur_in(BreakpointRange::only("lg"), 250)
            .unwrap_err();
        assert!(err.to_string().contains("'lg'"));
    }

    #[test]
    fn blur_map_validates_each_value() {
        let mut map: BTreeMap<String, u32> = ["sm", "md", "lg", "xl", "2xl"]
            .iter()
            .map(|k| (k.to_string(), 10))
            .collect();
        map.insert("xl".into(), 300);
        let err = ctx().blurs(&map).unwrap_err();
        assert!(err.to_string().contains("'xl'"));
    }

    // =========================================================================
    // Defaults and resolution
    // =========================================================================

    #[test]
    fn crop_position_falls_back_to_default() {
        let c = ctx();
        assert_eq!(c.crop_position_for("md", CropPosition::Bottom), CropPosition::Bottom);
    }

    #[test]
    fn tri_state_flags_fall_back() {
        let c = ctx();
        assert!(c.generates_webp(true));
        assert!(!c.generates_webp(false));
        let c = c.generate_webp(false).generate_responsive_versions(true);
        assert!(!c.generates_webp(true));
        assert!(c.generates_responsive_versions(false));
    }

    #[test]
    fn resolve_applies_defaults() {
        let c = ctx()
            .aspect_ratio(ar(1, 1))
            .max_width_in(BreakpointRange::only("sm"), 300)
            .unwrap();
        let defaults = ContextDefaults {
            crop_position: CropPosition::Top,
            generate_webp: false,
            generate_responsive_versions: true,
        };
        let r = c.resolve("sm", &defaults).unwrap();
        assert_eq!(r.breakpoint.min_width, 640);
        assert_eq!(r.max_width, Some(300));
        assert_eq!(r.crop_position, CropPosition::Top);
        assert!(!r.generate_webp);
        assert!(!r.greyscale);
        assert_eq!(r.blur, None);
        assert!(c.resolve("nope", &defaults).is_none());
    }

    #[test]
    fn display_label_title_cases_key() {
        assert_eq!(ctx().display_label(), "Hero Banner");
        assert_eq!(ctx().label("Banner").display_label(), "Banner");
    }

    // =========================================================================
    // Configuration hash
    // =========================================================================

    fn built() -> ImageContext {
        ctx()
            .aspect_ratio(ar(16, 9))
            .max_width_in(BreakpointRange::to("md"), 768)
            .unwrap()
            .blur(5)
            .unwrap()
            .allows_multiple(true)
    }

    #[test]
    fn hash_is_stable_for_identical_builds() {
        assert_eq!(built().configuration_hash(), built().configuration_hash());
        assert_eq!(built().configuration_hash().len(), 64);
    }

    #[test]
    fn hash_changes_with_any_single_value() {
        let base = built().configuration_hash();
        let variants = vec![
            built().aspect_ratio_in(BreakpointRange::only("xl"), ar(4, 3)).unwrap(),
            built().max_width_in(BreakpointRange::only("sm"), 767).unwrap(),
            built().min_width_in(BreakpointRange::only("lg"), 10).unwrap(),
            built().crop_position_in(BreakpointRange::only("2xl"), CropPosition::Left).unwrap(),
            built().blur_in(BreakpointRange::only("md"), 6).unwrap(),
            built().greyscale_in(BreakpointRange::only("sm"), true).unwrap(),
            built().sepia_in(BreakpointRange::only("sm"), true).unwrap(),
            built().allows_multiple(false),
            built().generate_webp(true),
            built().generate_responsive_versions(false),
            built().label("Other"),
        ];
        for variant in variants {
            assert_ne!(variant.configuration_hash(), base);
        }
    }

    // =========================================================================
    // Registry
    // =========================================================================

    #[test]
    fn registry_register_get_remove() {
        let registry = ContextRegistry::new();
        registry.register_all([ctx(), ImageContext::new("avatar", &Breakpoints::default())]);
        assert!(registry.get("hero_banner").is_some());
        assert_eq!(registry.all().len(), 2);
        assert!(registry.get("").is_none());

        registry.remove("avatar");
        assert!(registry.get("avatar").is_none());
    }

    #[test]
    fn registry_register_replaces_same_key() {
        let registry = ContextRegistry::new();
        registry.register(ctx());
        registry.register(ctx().max_width(10));
        assert_eq!(registry.all().len(), 1);
        assert_eq!(
            registry.get("hero_banner").unwrap().max_width_for("sm"),
            Some(10)
        );
    }
}
