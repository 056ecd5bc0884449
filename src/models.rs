//! Core data models for the citation graph.
//!
//! These types represent the raw per-video annotation records read from the
//! blob store and the derived, denormalized documents the pipeline writes
//! back out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dedup::DedupKey;

/// Kind of media entity, mirroring the metadata API's `media_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    /// Path segment used by the metadata API (`/movie/{id}`, `/tv/{id}`).
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MediaType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaType::Movie),
            "tv" => Ok(MediaType::Tv),
            other => anyhow::bail!("Unknown media type: '{}'. Must be movie or tv.", other),
        }
    }
}

/// A person (cast/crew) associated with a video.
///
/// Identity for deduplication is `id`. Records with a `None` id are never
/// merged with one another; each instance stays distinct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub id: Option<i64>,
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_path: Option<String>,
}

impl DedupKey for PersonRecord {
    fn dedup_key(&self) -> Option<String> {
        self.id.map(|id| id.to_string())
    }
}

/// A movie or TV show as annotated in a video.
///
/// Identity is the `(id, media_type)` pair; two records with the same pair
/// are the same entity even when display fields differ. Movies carry
/// `title`/`release_date`, series carry `name`/`first_air_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: Option<i64>,
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_air_date: Option<String>,
}

impl MediaRecord {
    /// Display title: `title` for movies, `name` for series.
    pub fn display_title(&self) -> Option<&str> {
        self.title.as_deref().or(self.name.as_deref())
    }
}

impl DedupKey for MediaRecord {
    fn dedup_key(&self) -> Option<String> {
        self.id.map(|id| format!("{}:{}", self.media_type, id))
    }
}

/// A point in a video's timeline, as produced by the annotation step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Timecode {
    #[serde(default)]
    pub seconds: i64,
    #[serde(default)]
    pub nanos: i64,
}

/// One detected mention of a media item within a video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionEntry {
    pub media_item: MediaRecord,
    #[serde(default)]
    pub start_time: Timecode,
    #[serde(default)]
    pub end_time: Timecode,
    pub confidence: f64,
}

/// Raw `…movies.json` annotation document for one video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaMentions {
    pub media_items_timestamps: Vec<MentionEntry>,
}

/// Raw `video.json` annotation document for one video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoAnnotation {
    pub video_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub personalities: Vec<PersonRecord>,
}

// ============ Derived documents ============

/// One citing person inside a [`MediaCitation`]: who cited the media, and
/// in which videos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonCitation {
    pub person: PersonRecord,
    pub videos: Vec<String>,
}

/// Media-centric derived view: for one media item, every person who cited
/// it, each with their video set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaCitation {
    pub media: MediaRecord,
    pub personalities: Vec<PersonCitation>,
}

/// Person-centric derived view: everything one person cited, and where.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonEntry {
    pub person: PersonRecord,
    pub media: Vec<MediaRecord>,
    pub videos: Vec<String>,
}

/// One video's citation inside a best-of list, with the citing person's
/// name and the first mention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestCitation {
    pub video_id: String,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One media item in a best-of list: at most one citation per video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestMediaEntry {
    pub media: MediaRecord,
    pub citations: Vec<BestCitation>,
}

/// Best-of document (`data/movie/best.json`, `data/tv/best.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestMediaList {
    pub media: Vec<BestMediaEntry>,
}

/// A media item with its confident mention windows inside one video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaWithTimestamps {
    pub media: MediaRecord,
    pub timestamps: Vec<MentionWindow>,
}

/// A single confident mention window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MentionWindow {
    pub start_time: i64,
    pub end_time: i64,
    pub confidence: f64,
}

/// Per-video derived document (`data/video/{id}.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoDetail {
    pub video_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub personalities: Vec<PersonRecord>,
    pub mentions: Vec<MediaWithTimestamps>,
}

/// Feed entry (`data/video.json`), newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSummary {
    pub video_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// Feed document wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFeed {
    pub feed: Vec<VideoSummary>,
}
