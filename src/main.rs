use clap::{Parser, Subcommand};
use image_library::config;
use image_library::library::{AttachAttributes, ImageLibrary, Relation, UploadAttributes};
use image_library::output::{self, SourceListing};
use image_library::records::OwnerRef;
use image_library::types::{CropData, CropDataMap};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "image-library")]
#[command(about = "Breakpoint-aware responsive image derivation")]
#[command(long_about = "\
Breakpoint-aware responsive image derivation

Upload a photo once, attach it to records under named contexts, and get a
crop per breakpoint, a descending width series per crop and WebP siblings.

Storage layout (below each disk root):

  {paths.base}/
  └── {source-uuid}/
      ├── original.jpg             # Re-encoded upload
      ├── thumb.jpg                # Conversion
      └── {derived-uuid}/
          ├── sm.jpg               # Breakpoint crop
          ├── sm.webp              # WebP sibling
          ├── sm_w240.jpg          # Width series
          └── md.jpg

Records are kept in {root}/records.json. Contexts, conversions, breakpoints
and disks come from the config file.

Run 'image-library gen-config' to generate a documented image-library.toml.")]
#[command(version)]
struct Cli {
    /// Library root: disks and the record manifest live below it
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// Config file (default: {root}/image-library.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate and store an image as a new source image
    Upload {
        file: PathBuf,
        /// Display name (default: file stem)
        #[arg(long)]
        name: Option<String>,
        /// Target disk (default: defaults.disk)
        #[arg(long)]
        disk: Option<String>,
        /// Alt text as LOCALE=TEXT, repeatable
        #[arg(long = "alt", value_parser = parse_key_value)]
        alt_text: Vec<(String, String)>,
    },
    /// Attach a source image to an owner under a context
    Attach {
        source: Uuid,
        #[arg(long)]
        context: String,
        /// Owner as TYPE:ID
        #[arg(long, value_parser = parse_owner)]
        owner: (String, String),
        #[arg(long, default_value = "images")]
        relation: String,
        /// The relation holds one image: replace the current one
        #[arg(long)]
        single: bool,
        /// Crop as BREAKPOINT=WxH or BREAKPOINT=WxH+X+Y, repeatable
        #[arg(long = "crop", value_parser = parse_crop)]
        crops: Vec<(String, CropData)>,
        /// Alt text as LOCALE=TEXT, repeatable
        #[arg(long = "alt", value_parser = parse_key_value)]
        alt_text: Vec<(String, String)>,
    },
    /// Rebuild derived images whose crop or context changed (all with --force)
    Regenerate {
        /// Derived image, repeatable (default: every image)
        #[arg(long = "id")]
        ids: Vec<Uuid>,
        /// Rebuild even when nothing changed
        #[arg(long)]
        force: bool,
        /// Delete existing files before rebuilding (implies --force)
        #[arg(long)]
        purge: bool,
    },
    /// Regenerate images whose context configuration changed
    Sync,
    /// Generate missing or outdated conversions of a source image
    Conversions {
        source: Uuid,
        /// Regenerate even up-to-date conversions
        #[arg(long)]
        force: bool,
        /// Also delete conversions no longer in the config
        #[arg(long)]
        prune: bool,
    },
    /// Delete a derived image and its files
    DeleteImage { image: Uuid },
    /// Delete a source image, everything derived from it and all files
    DeleteSource { source: Uuid },
    /// List source images and their derived images
    List,
    /// Print <picture> sources, or one breakpoint's srcset
    Srcset {
        image: Uuid,
        #[arg(long)]
        breakpoint: Option<String>,
    },
    /// Print a stock image-library.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.root.join("image-library.toml"));
    let library_config = config::load_config(&config_path)?;
    let library = ImageLibrary::local(library_config, &cli.root)?;

    match cli.command {
        Command::Upload {
            file,
            name,
            disk,
            alt_text,
        } => {
            let bytes = std::fs::read(&file)?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let source = library.upload(
                &file_name,
                &bytes,
                UploadAttributes {
                    name,
                    disk,
                    alt_text: alt_text.into_iter().collect(),
                    ..UploadAttributes::default()
                },
            )?;
            drain(&library);
            output::print_upload_output(&source, &source.original_path(library.layout()));
        }
        Command::Attach {
            source,
            context,
            owner,
            relation,
            single,
            crops,
            alt_text,
        } => {
            let source = library.source(&source)?;
            let crop_data: CropDataMap = crops
                .into_iter()
                .map(|(breakpoint, crop)| (breakpoint, Some(crop)))
                .collect();
            let image = library.attach(
                &source,
                OwnerRef::new(owner.0, owner.1, relation),
                AttachAttributes {
                    context,
                    relation: if single { Relation::One } else { Relation::Many },
                    crop_data,
                    alt_text: alt_text.into_iter().collect(),
                    ..AttachAttributes::default()
                },
            )?;
            drain(&library);
            output::print_attach_output(&image, library.asset_state(&image));
        }
        Command::Regenerate { ids, force, purge } => {
            let results = if force || purge {
                library.regenerate(&ids, purge)?
            } else if ids.is_empty() {
                library.sync_contexts()?
            } else {
                ids.iter()
                    .map(|id| library.update_image(id, |_| {}))
                    .collect::<Result<Vec<_>, _>>()?
            };
            drain(&library);
            output::print_regeneration_output(&results);
        }
        Command::Sync => {
            let results = library.sync_contexts()?;
            drain(&library);
            output::print_regeneration_output(&results);
        }
        Command::Conversions {
            source,
            force,
            prune,
        } => {
            let source = library.source(&source)?;
            let removed = if prune {
                library.delete_deprecated_conversions(&source)?
            } else {
                Vec::new()
            };
            let statuses = library.generate_conversions(&source, force)?;
            drain(&library);
            output::print_conversions_output(&source, &statuses, &removed);
        }
        Command::DeleteImage { image } => {
            library.delete_image(&image)?;
            println!("Deleted image {image}");
        }
        Command::DeleteSource { source } => {
            library.delete_source(&source)?;
            println!("Deleted source {source} and everything derived from it");
        }
        Command::List => {
            let sources = library.sources()?;
            let images = library.images()?;
            let listings: Vec<SourceListing<'_>> = sources
                .iter()
                .map(|source| SourceListing {
                    source,
                    original_path: source.original_path(library.layout()),
                    images: images
                        .iter()
                        .filter(|image| image.source_image_id == source.id)
                        .map(|image| (image, library.asset_state(image)))
                        .collect(),
                })
                .collect();
            output::print_list_output(&listings);
        }
        Command::Srcset { image, breakpoint } => {
            let image = library.image(&image)?;
            match breakpoint {
                Some(bp) => println!("{}", library.srcset_for_breakpoint(&image, &bp, None)?),
                None => output::print_picture_output(&library.picture_sources(&image)?),
            }
        }
        Command::GenConfig => print!("{}", config::stock_config_toml()),
    }

    Ok(())
}

/// Run chains a deferred queue is holding. The CLI is its own worker.
fn drain(library: &ImageLibrary) {
    for (chain, outcome) in library.run_pending() {
        if !outcome.is_completed() {
            tracing::warn!(chain = %chain.id, ?outcome, "queued chain did not complete");
        }
    }
}

/// Log to stderr so command output on stdout stays parseable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn parse_key_value(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{value}'"))
}

fn parse_owner(value: &str) -> Result<(String, String), String> {
    value
        .split_once(':')
        .filter(|(t, id)| !t.is_empty() && !id.is_empty())
        .map(|(t, id)| (t.to_string(), id.to_string()))
        .ok_or_else(|| format!("expected TYPE:ID, got '{value}'"))
}

/// `md=200x100` or `md=200x100+10+20`.
fn parse_crop(value: &str) -> Result<(String, CropData), String> {
    let invalid = || format!("expected BREAKPOINT=WxH[+X+Y], got '{value}'");
    let (breakpoint, geometry) = value.split_once('=').ok_or_else(invalid)?;
    let mut parts = geometry.split('+');
    let size = parts.next().ok_or_else(invalid)?;
    let (w, h) = size.split_once('x').ok_or_else(invalid)?;
    let number = |s: &str| s.parse::<u32>().map_err(|_| invalid());
    let (width, height) = (number(w)?, number(h)?);
    let offsets: Vec<&str> = parts.collect();
    let crop = match offsets.as_slice() {
        [] => CropData::new(width, height),
        [x, y] => CropData::at(width, height, number(x)?, number(y)?),
        _ => return Err(invalid()),
    };
    Ok((breakpoint.to_string(), crop))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_without_offsets() {
        let (bp, crop) = parse_crop("md=200x100").unwrap();
        assert_eq!(bp, "md");
        assert_eq!(crop, CropData::new(200, 100));
    }

    #[test]
    fn crop_with_offsets() {
        let (_, crop) = parse_crop("2xl=640x480+10+20").unwrap();
        assert_eq!(crop, CropData::at(640, 480, 10, 20));
    }

    #[test]
    fn crop_rejects_malformed() {
        for bad in ["md", "md=200", "md=axb", "md=200x100+5", "md=200x100+1+2+3"] {
            assert!(parse_crop(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn owner_requires_both_parts() {
        assert_eq!(
            parse_owner("post:42").unwrap(),
            ("post".to_string(), "42".to_string())
        );
        assert!(parse_owner("post").is_err());
        assert!(parse_owner(":42").is_err());
    }

    #[test]
    fn cli_parses_attach() {
        let cli = Cli::try_parse_from([
            "image-library",
            "attach",
            "00000000-0000-0000-0000-000000000000",
            "--context",
            "hero",
            "--owner",
            "post:1",
            "--crop",
            "md=200x100",
            "--single",
        ])
        .unwrap();
        match cli.command {
            Command::Attach {
                context,
                single,
                crops,
                relation,
                ..
            } => {
                assert_eq!(context, "hero");
                assert!(single);
                assert_eq!(crops.len(), 1);
                assert_eq!(relation, "images");
            }
            _ => panic!("expected attach"),
        }
    }

    #[test]
    fn cli_parses_repeated_regenerate_ids() {
        let cli = Cli::try_parse_from([
            "image-library",
            "regenerate",
            "--id",
            "00000000-0000-0000-0000-000000000001",
            "--id",
            "00000000-0000-0000-0000-000000000002",
            "--purge",
        ])
        .unwrap();
        match cli.command {
            Command::Regenerate { ids, force, purge } => {
                assert_eq!(ids.len(), 2);
                assert!(!force);
                assert!(purge);
            }
            _ => panic!("expected regenerate"),
        }
    }
}
