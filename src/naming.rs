//! Storage path layout for originals, breakpoint crops and their variants.
//!
//! The layout is part of the persisted format and must not drift:
//!
//! ```text
//! {base}/{source_uuid}/original.{ext}                          source upload
//! {base}/{source_uuid}/{conversion_slug}.{ext}                 conversion
//! {base}/{source_uuid}/{derived_uuid}/{breakpoint_slug}.{ext}  breakpoint crop
//! {base}/{source_uuid}/{derived_uuid}/{breakpoint_slug}_w{width}.{ext}
//! ```
//!
//! WebP siblings share the path with `.webp` in place of `.{ext}`.

/// Path builder rooted at the configured base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLayout {
    base: String,
}

impl PathLayout {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn join(&self, rest: &str) -> String {
        if self.base.is_empty() {
            rest.to_string()
        } else {
            format!("{}/{}", self.base, rest)
        }
    }

    /// Everything belonging to one source image, derived trees included.
    pub fn source_dir(&self, source_uuid: &str) -> String {
        self.join(source_uuid)
    }

    pub fn original(&self, source_uuid: &str, ext: &str) -> String {
        self.join(&format!("{source_uuid}/original.{ext}"))
    }

    pub fn conversion(&self, source_uuid: &str, conversion_slug: &str, ext: &str) -> String {
        self.join(&format!("{source_uuid}/{conversion_slug}.{ext}"))
    }

    pub fn derived_dir(&self, source_uuid: &str, derived_uuid: &str) -> String {
        self.join(&format!("{source_uuid}/{derived_uuid}"))
    }

    pub fn breakpoint(
        &self,
        source_uuid: &str,
        derived_uuid: &str,
        breakpoint_slug: &str,
        ext: &str,
    ) -> String {
        self.join(&format!("{source_uuid}/{derived_uuid}/{breakpoint_slug}.{ext}"))
    }

    pub fn responsive(
        &self,
        source_uuid: &str,
        derived_uuid: &str,
        breakpoint_slug: &str,
        width: u32,
        ext: &str,
    ) -> String {
        self.join(&format!(
            "{source_uuid}/{derived_uuid}/{breakpoint_slug}_w{width}.{ext}"
        ))
    }
}

/// The file name without directories.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Split `name.ext` into `("name", Some("ext"))`.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

/// Width encoded in a responsive variant's name (`sm_w640.jpg` → 640).
pub fn parse_width(path: &str) -> Option<u32> {
    let (stem, _) = split_extension(file_name(path));
    let (_, digits) = stem.rsplit_once("_w")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// True for `{slug}.{ext}` and `{slug}_w{N}.{ext}`.
pub fn belongs_to_breakpoint(path: &str, breakpoint_slug: &str, ext: &str) -> bool {
    let (stem, file_ext) = split_extension(file_name(path));
    if file_ext != Some(ext) {
        return false;
    }
    if stem == breakpoint_slug {
        return true;
    }
    stem.strip_prefix(breakpoint_slug)
        .and_then(|rest| rest.strip_prefix("_w"))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}
