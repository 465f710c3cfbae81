//! Conversion definitions: named, breakpoint-independent derivations of a
//! source image ("thumbnail", "og:image").
//!
//! A conversion is generated once per source image and lives next to the
//! original as `{base}/{source_uuid}/{slug}.{ext}`. Each source image keeps the
//! [`ConversionDefinition::definition_hash`] it was generated from, so an
//! unchanged definition is skipped and an edited one is regenerated.

use crate::breakpoint::slugify;
use crate::error::ConfigurationError;
use crate::types::AspectRatio;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Visual effects applied by a conversion, in field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Effects {
    pub blur: u32,
    pub pixelate: u32,
    pub greyscale: bool,
    pub sepia: bool,
    pub sharpen: u32,
}

impl Effects {
    pub fn validate(&self, name: &str) -> Result<(), ConfigurationError> {
        for (effect, amount) in [
            ("blur", self.blur),
            ("pixelate", self.pixelate),
            ("sharpen", self.sharpen),
        ] {
            if amount > 100 {
                return Err(ConfigurationError::InvalidConversion {
                    name: name.to_string(),
                    reason: format!("{effect} amount must be between 0 and 100 (got {amount})"),
                });
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// File name stem of a conversion: `og:image` → `og-image`.
pub fn conversion_slug(name: &str) -> String {
    slugify(&name.replace(':', "-"))
}

/// A named conversion recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversionDefinition {
    pub name: String,
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub default_width: Option<u32>,
    #[serde(default)]
    pub default_height: Option<u32>,
    #[serde(default)]
    pub effects: Effects,
    /// Generate inline instead of through the task queue.
    #[serde(default)]
    pub create_sync: bool,
}

impl ConversionDefinition {
    pub fn new(name: impl Into<String>, aspect_ratio: AspectRatio) -> Self {
        Self {
            name: name.into(),
            aspect_ratio,
            default_width: None,
            default_height: None,
            effects: Effects::default(),
            create_sync: false,
        }
    }

    pub fn default_width(mut self, width: u32) -> Self {
        self.default_width = Some(width);
        self
    }

    pub fn default_height(mut self, height: u32) -> Self {
        self.default_height = Some(height);
        self
    }

    pub fn effects(mut self, effects: Effects) -> Self {
        self.effects = effects;
        self
    }

    pub fn create_sync(mut self, create_sync: bool) -> Self {
        self.create_sync = create_sync;
        self
    }

    pub fn slug(&self) -> String {
        conversion_slug(&self.name)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidConversion {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        let slug = self.slug();
        if slug.is_empty() {
            return Err(invalid("name must contain at least one letter or digit"));
        }
        if slug == "original" {
            return Err(invalid("'original' is reserved for the source file"));
        }
        if self.default_width == Some(0) || self.default_height == Some(0) {
            return Err(invalid("default dimensions must be greater than zero"));
        }
        self.effects.validate(&self.name)
    }

    /// Stable hex SHA-256 of everything that affects the generated pixels.
    pub fn definition_hash(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(&json))
    }

    /// Output dimensions for a source of `source` size.
    ///
    /// With no defaults, the largest box of this aspect ratio that fits inside
    /// the source. With one default, the other follows from the aspect ratio.
    pub fn resolve_dimensions(&self, source: (u32, u32)) -> (u32, u32) {
        let (h, v) = self.aspect_ratio.as_tuple();
        let from_width = |w: u32| ((w as f64 * v as f64 / h as f64).round() as u32).max(1);
        let from_height = |ht: u32| ((ht as f64 * h as f64 / v as f64).round() as u32).max(1);

        match (self.default_width, self.default_height) {
            (Some(w), Some(ht)) => (w, ht),
            (Some(w), None) => (w, from_width(w)),
            (None, Some(ht)) => (from_height(ht), ht),
            (None, None) => {
                let (sw, sh) = source;
                let width_for_full_height = from_height(sh);
                if width_for_full_height <= sw {
                    (width_for_full_height, sh)
                } else {
                    (sw, from_width(sw).min(sh))
                }
            }
        }
    }
}

/// Registered conversion definitions, keyed by name.
#[derive(Debug, Default)]
pub struct ConversionRegistry {
    definitions: RwLock<BTreeMap<String, Arc<ConversionDefinition>>>,
}

impl ConversionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register, replacing a definition with the same name.
    pub fn register(&self, definition: ConversionDefinition) -> Result<(), ConfigurationError> {
        definition.validate()?;
        let mut definitions = self.definitions.write().unwrap_or_else(|e| e.into_inner());
        definitions.insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ConversionDefinition>> {
        let mut definitions = self.definitions.write().unwrap_or_else(|e| e.into_inner());
        definitions.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ConversionDefinition>> {
        let definitions = self.definitions.read().unwrap_or_else(|e| e.into_inner());
        definitions.get(name).cloned()
    }

    pub fn all(&self) -> Vec<Arc<ConversionDefinition>> {
        let definitions = self.definitions.read().unwrap_or_else(|e| e.into_inner());
        definitions.values().cloned().collect()
    }
}
