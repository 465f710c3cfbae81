//! CLI output formatting for library commands.
//!
//! # Entity Display Contract
//!
//! Every entity prints as a header line followed by indented context lines:
//!
//! 1. **Header line**: positional index + name (+ optional detail)
//! 2. **Context lines**: indented `Disk:`, `Size:`, state, etc.
//!
//! # Output Format
//!
//! ## List
//!
//! ```text
//! 001 sunset (1200x800 image/jpeg)
//!     Source: 0f1c…/original.jpg
//!     Conversions: thumb
//!     001 hero → post:1 images
//!         State: ready
//!         Crop: md 200x100+0+0
//! ```
//!
//! ## Regenerate
//!
//! ```text
//! 9c2e… hero: dispatched (completed)
//! 1d44… avatar: skipped
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure.

use crate::library::{ConversionStatus, PictureSource};
use crate::queue::ChainOutcome;
use crate::records::{DerivedImage, SourceImage};
use crate::regenerate::{AssetState, Regeneration};

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte size with binary units.
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn outcome_label(outcome: &ChainOutcome) -> String {
    match outcome {
        ChainOutcome::Completed => "completed".to_string(),
        ChainOutcome::Pending => "queued".to_string(),
        ChainOutcome::Cancelled { stage } => format!("cancelled at stage {}", stage + 1),
        ChainOutcome::Failed { stage, failures } => {
            format!("failed at stage {} ({} tasks)", stage + 1, failures.len())
        }
    }
}

fn state_label(state: AssetState) -> &'static str {
    match state {
        AssetState::Absent => "absent",
        AssetState::Generating => "generating",
        AssetState::Ready => "ready",
    }
}

// ============================================================================
// Upload
// ============================================================================

pub fn format_upload_output(source: &SourceImage, original_path: &str) -> Vec<String> {
    let mut lines = vec![
        format!("Uploaded {} → {}", source.name, source.uuid),
        format!(
            "{}{}x{} {}, {}",
            indent(1),
            source.width,
            source.height,
            source.mime_type,
            format_size(source.size)
        ),
        format!("{}Stored: {}:{}", indent(1), source.disk, original_path),
    ];
    if !source.conversions.is_empty() {
        let names: Vec<&str> = source.conversions.keys().map(String::as_str).collect();
        lines.push(format!("{}Conversions: {}", indent(1), names.join(", ")));
    }
    lines
}

pub fn print_upload_output(source: &SourceImage, original_path: &str) {
    for line in format_upload_output(source, original_path) {
        println!("{}", line);
    }
}

// ============================================================================
// Attach
// ============================================================================

pub fn format_attach_output(image: &DerivedImage, state: AssetState) -> Vec<String> {
    vec![
        format!(
            "Attached {} as {} → {}:{} {}",
            image.uuid,
            image.context,
            image.owner.owner_type,
            image.owner.owner_id,
            image.owner.relation
        ),
        format!("{}State: {}", indent(1), state_label(state)),
    ]
}

pub fn print_attach_output(image: &DerivedImage, state: AssetState) {
    for line in format_attach_output(image, state) {
        println!("{}", line);
    }
}

// ============================================================================
// List
// ============================================================================

/// One source with the derived images attached to it.
pub struct SourceListing<'a> {
    pub source: &'a SourceImage,
    pub original_path: String,
    pub images: Vec<(&'a DerivedImage, AssetState)>,
}

pub fn format_list_output(listings: &[SourceListing<'_>]) -> Vec<String> {
    if listings.is_empty() {
        return vec!["No source images".to_string()];
    }
    let mut lines = Vec::new();
    for (i, listing) in listings.iter().enumerate() {
        let source = listing.source;
        lines.push(format!(
            "{} {} ({}x{} {})",
            format_index(i + 1),
            source.name,
            source.width,
            source.height,
            source.mime_type
        ));
        lines.push(format!("{}Source: {}", indent(1), listing.original_path));
        if !source.conversions.is_empty() {
            let names: Vec<&str> = source.conversions.keys().map(String::as_str).collect();
            lines.push(format!("{}Conversions: {}", indent(1), names.join(", ")));
        }
        for (j, (image, state)) in listing.images.iter().enumerate() {
            lines.push(format!(
                "{}{} {} → {}:{} {}",
                indent(1),
                format_index(j + 1),
                image.context,
                image.owner.owner_type,
                image.owner.owner_id,
                image.owner.relation
            ));
            lines.push(format!("{}State: {}", indent(2), state_label(*state)));
            for (breakpoint, crop) in &image.crop_data {
                let Some(crop) = crop else { continue };
                let offset = crop
                    .offset()
                    .map(|(x, y)| format!("+{x}+{y}"))
                    .unwrap_or_default();
                lines.push(format!(
                    "{}Crop: {} {}x{}{}",
                    indent(2),
                    breakpoint,
                    crop.width,
                    crop.height,
                    offset
                ));
            }
        }
    }
    lines
}

pub fn print_list_output(listings: &[SourceListing<'_>]) {
    for line in format_list_output(listings) {
        println!("{}", line);
    }
}

// ============================================================================
// Regenerate / sync
// ============================================================================

pub fn format_regeneration_output(results: &[(DerivedImage, Regeneration)]) -> Vec<String> {
    let mut lines: Vec<String> = results
        .iter()
        .map(|(image, regeneration)| match regeneration {
            Regeneration::Dispatched(outcome) => format!(
                "{} {}: dispatched ({})",
                image.uuid,
                image.context,
                outcome_label(outcome)
            ),
            Regeneration::Skipped => format!("{} {}: skipped", image.uuid, image.context),
        })
        .collect();
    let dispatched = results.iter().filter(|(_, r)| r.was_dispatched()).count();
    lines.push(format!(
        "Regenerated {} of {} images",
        dispatched,
        results.len()
    ));
    lines
}

pub fn print_regeneration_output(results: &[(DerivedImage, Regeneration)]) {
    for line in format_regeneration_output(results) {
        println!("{}", line);
    }
}

// ============================================================================
// Conversions
// ============================================================================

pub fn format_conversions_output(
    source: &SourceImage,
    statuses: &[(String, ConversionStatus)],
    removed: &[String],
) -> Vec<String> {
    let mut lines = vec![format!("{} ({})", source.name, source.uuid)];
    for (name, status) in statuses {
        let label = match status {
            ConversionStatus::Skipped => "up to date".to_string(),
            ConversionStatus::Generated => "generated".to_string(),
            ConversionStatus::Queued => "queued".to_string(),
            ConversionStatus::Failed(message) => format!("failed: {message}"),
        };
        lines.push(format!("{}{}: {}", indent(1), name, label));
    }
    for name in removed {
        lines.push(format!("{}{}: removed (no longer registered)", indent(1), name));
    }
    lines
}

pub fn print_conversions_output(
    source: &SourceImage,
    statuses: &[(String, ConversionStatus)],
    removed: &[String],
) {
    for line in format_conversions_output(source, statuses, removed) {
        println!("{}", line);
    }
}

// ============================================================================
// Srcset
// ============================================================================

/// `<picture>` sources as markup-ready lines.
pub fn format_picture_output(sources: &[PictureSource]) -> Vec<String> {
    sources
        .iter()
        .map(|source| match &source.media {
            Some(media) => format!(
                "<source media=\"{}\" type=\"{}\" srcset=\"{}\">",
                media, source.mime_type, source.srcset
            ),
            None => format!(
                "<source type=\"{}\" srcset=\"{}\">",
                source.mime_type, source.srcset
            ),
        })
        .collect()
}

pub fn print_picture_output(sources: &[PictureSource]) {
    for line in format_picture_output(sources) {
        println!("{}", line);
    }
}
