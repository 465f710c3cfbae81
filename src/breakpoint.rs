//! Breakpoint registry.
//!
//! A breakpoint is a named viewport threshold (`sm` = 640px and up). The set
//! is closed and validated once at startup: keys are unique, min widths are
//! unique and non-zero, and the list is kept in ascending `min_width` order so
//! every range operation can work with positions in that order.
//!
//! ```text
//! sm  640 ─ 767
//! md  768 ─ 1023
//! lg 1024 ─ 1279
//! xl 1280 ─ 1535
//! 2xl 1536 ─ ∞
//! ```

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};

/// A named viewport-width threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Breakpoint {
    pub key: String,
    pub min_width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Breakpoint {
    pub fn new(key: impl Into<String>, min_width: u32) -> Self {
        Self {
            key: key.into(),
            min_width,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Display label, falling back to the key.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.key)
    }

    /// File-name-safe form of the key: lowercase ASCII alphanumerics with
    /// runs of anything else collapsed to a single `-`.
    pub fn slug(&self) -> String {
        slugify(&self.key)
    }
}

/// Lowercase, alphanumerics only, other runs collapsed to `-`, trimmed.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// The validated, ordered breakpoint set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoints {
    sorted: Vec<Breakpoint>,
}

impl Breakpoints {
    /// Validate and sort a breakpoint list.
    pub fn new(mut breakpoints: Vec<Breakpoint>) -> Result<Self, ConfigurationError> {
        if breakpoints.is_empty() {
            return Err(ConfigurationError::NoBreakpoints);
        }
        breakpoints.sort_by_key(|b| b.min_width);

        for (i, bp) in breakpoints.iter().enumerate() {
            if bp.min_width == 0 {
                return Err(ConfigurationError::ZeroMinWidth(bp.key.clone()));
            }
            if breakpoints[..i].iter().any(|other| other.key == bp.key) {
                return Err(ConfigurationError::DuplicateBreakpoint(bp.key.clone()));
            }
            let slug = bp.slug();
            if let Some(other) = breakpoints[..i].iter().find(|other| other.slug() == slug) {
                return Err(ConfigurationError::DuplicateSlug {
                    first: other.key.clone(),
                    second: bp.key.clone(),
                    slug,
                });
            }
            if i > 0 && breakpoints[i - 1].min_width == bp.min_width {
                return Err(ConfigurationError::DuplicateMinWidth {
                    first: breakpoints[i - 1].key.clone(),
                    second: bp.key.clone(),
                    min_width: bp.min_width,
                });
            }
        }

        Ok(Self {
            sorted: breakpoints,
        })
    }

    /// Breakpoints in ascending `min_width` order.
    pub fn sorted(&self) -> &[Breakpoint] {
        &self.sorted
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.sorted.iter().map(|b| b.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Breakpoint> {
        self.sorted.iter().find(|b| b.key == key)
    }

    /// Position of `key` in sorted order.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.sorted.iter().position(|b| b.key == key)
    }

    /// Upper bound of the breakpoint: the next breakpoint's min width minus
    /// one, or `None` for the last (unbounded) breakpoint.
    pub fn max_width(&self, key: &str) -> Option<u32> {
        let i = self.position(key)?;
        self.sorted.get(i + 1).map(|next| next.min_width - 1)
    }

    pub fn is_first(&self, key: &str) -> bool {
        self.position(key) == Some(0)
    }
}

impl Default for Breakpoints {
    /// The Tailwind-style set used when nothing is configured.
    fn default() -> Self {
        Self {
            sorted: default_breakpoints(),
        }
    }
}

pub fn default_breakpoints() -> Vec<Breakpoint> {
    vec![
        Breakpoint::new("sm", 640).with_label("Small"),
        Breakpoint::new("md", 768).with_label("Medium"),
        Breakpoint::new("lg", 1024).with_label("Large"),
        Breakpoint::new("xl", 1280).with_label("Extra large"),
        Breakpoint::new("2xl", 1536).with_label("Extra extra large"),
    ]
}
