//! # Videoclub CLI (`vclub`)
//!
//! The `vclub` binary drives the site build: it regenerates the derived
//! citation-graph artifacts from raw annotations and can enrich single
//! entities against the metadata API for inspection.
//!
//! ## Usage
//!
//! ```bash
//! vclub --config ./config/vclub.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vclub prepare` | Regenerate every derived artifact from raw annotations |
//! | `vclub enrich <kind>:<id>` | Fetch and print metadata for one entity |
//!
//! ## Examples
//!
//! ```bash
//! # Full rebuild of the derived data
//! vclub prepare --config ./config/vclub.toml
//!
//! # Counts only, no writes
//! vclub prepare --dry-run
//!
//! # Only the first 20 videos (debugging)
//! vclub prepare --limit 20
//!
//! # Poster and localized overview for The Matrix
//! TMDB_API_TOKEN=… vclub enrich movie:603 --overview
//!
//! # Profile photo for a person
//! TMDB_API_TOKEN=… vclub enrich person:1100
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use videoclub::config::{self, Config};
use videoclub::models::MediaType;
use videoclub::pipeline;
use videoclub::store::FsStore;
use videoclub::tmdb::Enricher;

/// Videoclub CLI — builds the "who cited which movies" data set.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/vclub.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "vclub",
    about = "Videoclub — citation-graph builder and metadata enricher",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vclub.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Regenerate all derived artifacts from raw annotations.
    ///
    /// Reads every `videos/{id}/` annotation directory, aggregates the
    /// citation graph, and overwrites the documents under the data prefix.
    /// Videos with missing annotation files are skipped with a warning;
    /// ambiguous source data aborts the run.
    Prepare {
        /// Show counts without writing any artifact.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of videos to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Fetch and print metadata for a single entity.
    ///
    /// Target format: `movie:<id>`, `tv:<id>`, or `person:<id>`.
    /// Requires the `TMDB_API_TOKEN` environment variable.
    Enrich {
        /// Entity specifier, e.g. `movie:603` or `person:1100`.
        target: String,

        /// Also fetch the overview text (with locale fallback).
        #[arg(long)]
        overview: bool,
    },
}

/// Parsed `<kind>:<id>` enrichment target.
enum EnrichTarget {
    Media(MediaType, i64),
    Person(i64),
}

impl FromStr for EnrichTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((kind, id)) = s.split_once(':') else {
            bail!("Invalid target '{}'. Expected <movie|tv|person>:<id>.", s);
        };
        let id: i64 = id
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid id '{}' in target '{}'.", id, s))?;
        match kind {
            "movie" => Ok(EnrichTarget::Media(MediaType::Movie, id)),
            "tv" => Ok(EnrichTarget::Media(MediaType::Tv, id)),
            "person" => Ok(EnrichTarget::Person(id)),
            other => bail!("Unknown entity kind '{}'. Must be movie, tv, or person.", other),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Prepare { dry_run, limit } => {
            let store = FsStore::new(&cfg.store.root);
            pipeline::run_prepare(&store, &cfg, dry_run, limit).await?;
        }
        Commands::Enrich { target, overview } => {
            run_enrich(&cfg, &target, overview).await?;
        }
    }

    Ok(())
}

async fn run_enrich(cfg: &Config, target: &str, with_overview: bool) -> Result<()> {
    let target: EnrichTarget = target.parse()?;
    let enricher = Enricher::from_env(cfg.tmdb.clone()).await?;

    match target {
        EnrichTarget::Media(media_type, id) => {
            println!("{} {}", media_type, id);
            let Some(details) = enricher.media_details(media_type, id).await? else {
                println!("  not found");
                return Ok(());
            };
            if let Some(title) = details["title"].as_str().or(details["name"].as_str()) {
                println!("  title: {}", title);
            }
            if let Some(date) = details["release_date"]
                .as_str()
                .or(details["first_air_date"].as_str())
            {
                println!("  released: {}", date);
            }
            match enricher.poster_url(media_type, id).await? {
                Some(poster) => println!(
                    "  poster: {} ({}x{})",
                    poster.url, poster.width, poster.height
                ),
                None => println!("  poster: none"),
            }
            if with_overview {
                match enricher.overview(media_type, id).await? {
                    Some(text) => println!("  overview: {}", text),
                    None => println!("  overview: none"),
                }
            }
        }
        EnrichTarget::Person(id) => {
            println!("person {}", id);
            let Some(details) = enricher.person_details(id).await? else {
                println!("  not found");
                return Ok(());
            };
            if let Some(name) = details["name"].as_str() {
                println!("  name: {}", name);
            }
            match enricher.profile_url(id).await? {
                Some(profile) => println!(
                    "  profile: {} ({}x{})",
                    profile.url, profile.width, profile.height
                ),
                None => println!("  profile: none"),
            }
        }
    }

    println!("ok");
    Ok(())
}
