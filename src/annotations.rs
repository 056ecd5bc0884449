//! Reading raw per-video annotation records from the blob store.
//!
//! Each annotated video owns a directory under the raw prefix:
//!
//! ```text
//! videos/{video_id}/video.json      — personalities appearing in the video
//! videos/{video_id}/…movies.json    — detected media mentions with
//!                                     confidence scores and time ranges
//! ```
//!
//! A missing file means the video has not been (fully) annotated yet and is
//! skipped with a warning. Finding more than one `movies.json`-suffixed
//! object for a video is ambiguous source data and aborts the run — picking
//! one silently would corrupt the derived graph.

use anyhow::{Context, Result};
use thiserror::Error;

use crate::models::{MediaMentions, VideoAnnotation};
use crate::store::{read_json, BlobStore};

/// Source-data failures the pipeline must tell apart.
#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("multiple movies annotation files found for video {video_id} ({count})")]
    AmbiguousSource { video_id: String, count: usize },
}

/// Reads annotation records for one video at a time.
pub struct AnnotationReader<'a> {
    store: &'a dyn BlobStore,
    raw_prefix: String,
}

impl<'a> AnnotationReader<'a> {
    pub fn new(store: &'a dyn BlobStore, raw_prefix: &str) -> Self {
        Self {
            store,
            raw_prefix: raw_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// All video ids that have at least one object under their directory,
    /// in lexicographic key order.
    pub async fn list_video_ids(&self) -> Result<Vec<String>> {
        let prefix = format!("{}/", self.raw_prefix);
        let keys = self.store.list(&prefix).await?;
        let mut ids = Vec::new();
        for key in keys {
            let rest = &key[prefix.len()..];
            if let Some((id, _)) = rest.split_once('/') {
                if ids.last().map(String::as_str) != Some(id) {
                    ids.push(id.to_string());
                }
            }
        }
        Ok(ids)
    }

    /// Load `video.json` for a video. `Ok(None)` if it has not been written.
    pub async fn read_video(&self, video_id: &str) -> Result<Option<VideoAnnotation>> {
        let key = format!("{}/{}/video.json", self.raw_prefix, video_id);
        read_json(self.store, &key).await
    }

    /// Load the media-mentions document for a video.
    ///
    /// Exactly one `movies.json`-suffixed object is expected under the
    /// video's directory. Zero is a "no data" signal (`Ok(None)`); more
    /// than one is [`AnnotationError::AmbiguousSource`], which the caller
    /// must treat as fatal.
    pub async fn read_mentions(&self, video_id: &str) -> Result<Option<MediaMentions>> {
        let prefix = format!("{}/{}/", self.raw_prefix, video_id);
        let keys = self.store.list(&prefix).await?;
        let movies_keys: Vec<&String> = keys
            .iter()
            .filter(|k| k.ends_with("movies.json"))
            .collect();

        match movies_keys.len() {
            0 => Ok(None),
            1 => {
                let mentions = read_json(self.store, movies_keys[0])
                    .await
                    .with_context(|| format!("Invalid mentions document for video {}", video_id))?;
                Ok(mentions)
            }
            count => Err(AnnotationError::AmbiguousSource {
                video_id: video_id.to_string(),
                count,
            }
            .into()),
        }
    }
}
