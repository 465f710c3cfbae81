//! # Image Library
//!
//! Responsive image derivation for web applications. An uploaded photo is
//! stored once as a *source image*. Every place the application shows it gets
//! a *derived image* bound to a named *context* ("hero", "avatar", "gallery")
//! that says how the photo is cropped and sized at each viewport breakpoint.
//!
//! # Architecture: Records, Files, Tasks
//!
//! ```text
//! upload   bytes     →  SourceImage record  +  {base}/{source}/original.{ext}
//! attach   source    →  DerivedImage record +  {base}/{source}/{derived}/{bp}.{ext}
//!                                              {base}/{source}/{derived}/{bp}_w{N}.{ext}
//! read     derived   →  URLs, srcset, <picture> sources
//! ```
//!
//! Records live in a [`records::RecordStore`], files on named
//! [`storage::BlobStore`] disks. The two are only kept in step by
//! [`regenerate::RegenerationController`], which turns lifecycle events into
//! task chains: one crop task per breakpoint, then one width-series task per
//! breakpoint. [`queue`] runs chains immediately on a rayon pool or holds them
//! until drained.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`breakpoint`] | Ordered viewport breakpoints and their derived ranges |
//! | [`context`] | Per-breakpoint crop, size and effect settings; configuration hash |
//! | [`conversion`] | Named whole-image recipes (thumbnails) and their registry |
//! | [`types`] | Aspect ratios, crop positions, crop data |
//! | [`imaging`] | Pixel work: identify, crop, fit, effects, encode |
//! | [`naming`] | Storage path layout and file name parsing |
//! | [`storage`] | Blob store trait, local disk, named disk set |
//! | [`records`] | Source/derived image records and the JSON manifest store |
//! | [`queue`] | Tasks, batches, chains; synchronous and deferred queues |
//! | [`process`] | The derivation worker that executes tasks |
//! | [`regenerate`] | Lifecycle transitions and asset state |
//! | [`library`] | The public facade tying everything together |
//! | [`config`] | `image-library.toml` loading, merging and validation |
//! | [`error`] | Configuration and upload validation errors |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Files Are Derived, Records Are Truth
//!
//! Everything under a derived image's directory can be deleted and rebuilt
//! from the record and the original. Regeneration never patches files in
//! place: a crop task rewrites its breakpoint and drops that breakpoint's
//! old width variants first, so a srcset never mixes generations.
//!
//! ## Configuration Hash Instead of Migrations
//!
//! A derived image stores a hash of its context's resolved settings. Editing
//! a context in config changes the hash; [`library::ImageLibrary::sync_contexts`]
//! compares and regenerates only what drifted.
//!
//! ## Pure-Rust Imaging
//!
//! The [`imaging`] module uses the `image` crate for decoding, Lanczos3
//! resampling and JPEG/PNG/WebP encoding. No system libraries, no external
//! processes.

pub mod breakpoint;
pub mod config;
pub mod context;
pub mod conversion;
pub mod error;
pub mod imaging;
pub mod library;
pub mod naming;
pub mod output;
pub mod process;
pub mod queue;
pub mod records;
pub mod regenerate;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
