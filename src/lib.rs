//! # Videoclub
//!
//! Build pipeline for a "which movies were cited in which videos" site.
//!
//! Videoclub turns raw per-video annotation records (who appears in a
//! video, which films and series they mention, with what confidence) into
//! the denormalized JSON documents a static frontend reads, and enriches
//! them with posters, profile photos, and localized overviews from the
//! TMDB metadata API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Blob store  │──▶│   Pipeline   │──▶│  Blob store  │
//! │ videos/{id}/ │   │ extract/merge│   │  data/*.json │
//! └──────────────┘   │  /transpose  │   └──────────────┘
//!                    └──────┬───────┘
//!                           │
//!                    ┌──────▼───────┐
//!                    │   Enricher   │
//!                    │ limit+retry  │
//!                    │   +cache     │
//!                    └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vclub prepare                       # regenerate all derived artifacts
//! vclub prepare --dry-run             # show counts without writing
//! vclub enrich movie:603 --overview   # poster + overview for one film
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Raw annotation and derived document types |
//! | [`dedup`] | Insertion-ordered, value-keyed sets |
//! | [`store`] | Blob store abstraction and local-directory backend |
//! | [`annotations`] | Reading raw per-video annotation records |
//! | [`pipeline`] | Three-stage citation-graph aggregation |
//! | [`limiter`] | Outbound request admission control |
//! | [`fetch`] | Retrying HTTP fetch with exponential backoff |
//! | [`cache`] | Process-lifetime metadata memoization |
//! | [`tmdb`] | Metadata enrichment client |

pub mod annotations;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod fetch;
pub mod limiter;
pub mod models;
pub mod pipeline;
pub mod store;
pub mod tmdb;
