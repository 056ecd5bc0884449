//! Metadata enrichment against the TMDB API.
//!
//! The [`Enricher`] composes the rate limiter, the retrying fetcher, and
//! the metadata cache: every lookup checks the cache first, and at most one
//! network call per `(entity, id, locale)` key happens per process run.
//!
//! Connecting fetches the API's `/configuration` document up front — image
//! URLs cannot be built without it, so an unreachable API at startup is a
//! hard error rather than a degraded run. After that, enrichment is best
//! effort: a confirmed-absent entity (4xx) caches as `None`, a transient
//! exhaustion degrades to `None` for this run without caching.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::cache::{CacheKey, EntityType, MetadataCache};
use crate::config::TmdbConfig;
use crate::fetch::{
    FetchOutcome, HttpTransport, ReqwestTransport, RetryingFetcher, Sleeper, TokioSleeper,
};
use crate::limiter::RateLimiter;
use crate::models::MediaType;

/// Image-serving configuration from the API's `/configuration` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    pub secure_base_url: String,
    pub poster_sizes: Vec<String>,
    pub profile_sizes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigurationDoc {
    images: ImageConfig,
}

/// A resolved image URL with its display dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageUrl {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// Find the size code (`w780`, `h632`, …) whose pixel count matches
/// exactly. A missing size is a configuration mismatch and a hard error:
/// silently picking a neighbor would ship wrongly-sized images.
fn size_code(sizes: &[String], pixels: u32) -> Result<&str> {
    sizes
        .iter()
        .find(|code| {
            code.get(1..)
                .and_then(|digits| digits.parse::<u32>().ok())
                == Some(pixels)
        })
        .map(String::as_str)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No image size matching {}px; API offers: {}",
                pixels,
                sizes.join(", ")
            )
        })
}

/// Cached, rate-limited, retrying metadata client.
pub struct Enricher {
    fetcher: RetryingFetcher,
    limiter: RateLimiter,
    cache: MetadataCache<Value>,
    images: ImageConfig,
    config: TmdbConfig,
    bearer: String,
}

impl Enricher {
    /// Connect with an injected transport and sleeper. Fetches the
    /// `/configuration` document eagerly and fails hard if it cannot be
    /// retrieved.
    pub async fn connect(
        config: TmdbConfig,
        bearer: String,
        transport: Arc<dyn HttpTransport>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        let fetcher = RetryingFetcher::new(transport, sleeper, config.retry_policy());
        let limiter = RateLimiter::new(config.max_concurrent);

        let url = format!("{}/configuration", config.base_url.trim_end_matches('/'));
        let outcome = limiter
            .run(fetcher.fetch_json(&url, Some(&bearer)))
            .await;
        let body = outcome.into_result("Metadata API configuration")?;
        let doc: ConfigurationDoc = serde_json::from_value(body)
            .context("Unexpected /configuration document shape")?;

        Ok(Self {
            fetcher,
            limiter,
            cache: MetadataCache::new(),
            images: doc.images,
            config,
            bearer,
        })
    }

    /// Connect with the production transport, reading the bearer token from
    /// the environment.
    pub async fn from_env(config: TmdbConfig) -> Result<Self> {
        let bearer = std::env::var(crate::config::TOKEN_ENV)
            .with_context(|| format!("{} environment variable not set", crate::config::TOKEN_ENV))?;
        let transport = Arc::new(ReqwestTransport::new(config.timeout())?);
        Self::connect(config, bearer, transport, Arc::new(TokioSleeper)).await
    }

    pub fn image_config(&self) -> &ImageConfig {
        &self.images
    }

    /// One cached details lookup. `Ok(None)` means the entity is absent or
    /// unreachable this run; only confirmed absence is cached.
    async fn details(&self, entity: EntityType, id: i64, locale: &str) -> Result<Option<Value>> {
        let key = CacheKey::new(entity, id, locale);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let url = format!(
            "{}/{}/{}?language={}",
            self.config.base_url.trim_end_matches('/'),
            entity.as_str(),
            id,
            locale
        );
        let outcome = self
            .limiter
            .run(self.fetcher.fetch_json(&url, Some(&self.bearer)))
            .await;

        match outcome {
            FetchOutcome::Success { body, .. } => {
                self.cache.insert(key, Some(body.clone()));
                Ok(Some(body))
            }
            FetchOutcome::Failed {
                status: Some(status),
                ..
            } if (400..500).contains(&status) && status != 429 => {
                self.cache.insert(key, None);
                Ok(None)
            }
            FetchOutcome::Failed { status, meta, .. } => {
                eprintln!(
                    "Warning: {} {} unreachable after {} retries (status {:?})",
                    entity.as_str(),
                    id,
                    meta.retries,
                    status
                );
                Ok(None)
            }
        }
    }

    /// Movie/series details in the primary locale.
    pub async fn media_details(&self, media_type: MediaType, id: i64) -> Result<Option<Value>> {
        self.details(media_type.into(), id, &self.config.language)
            .await
    }

    /// Person details in the primary locale.
    pub async fn person_details(&self, id: i64) -> Result<Option<Value>> {
        self.details(EntityType::Person, id, &self.config.language)
            .await
    }

    /// Poster URL for a media item, sized per config. `Ok(None)` when the
    /// entity is absent or has no poster.
    pub async fn poster_url(&self, media_type: MediaType, id: i64) -> Result<Option<ImageUrl>> {
        let Some(details) = self.media_details(media_type, id).await? else {
            return Ok(None);
        };
        let Some(path) = details["poster_path"].as_str() else {
            return Ok(None);
        };
        let size = size_code(&self.images.poster_sizes, self.config.poster_width)?;
        Ok(Some(ImageUrl {
            url: format!("{}{}{}", self.images.secure_base_url, size, path),
            width: self.config.poster_width,
            height: self.config.poster_height,
        }))
    }

    /// Profile photo URL for a person, sized per config.
    pub async fn profile_url(&self, person_id: i64) -> Result<Option<ImageUrl>> {
        let Some(details) = self.person_details(person_id).await? else {
            return Ok(None);
        };
        let Some(path) = details["profile_path"].as_str() else {
            return Ok(None);
        };
        let size = size_code(&self.images.profile_sizes, self.config.profile_height)?;
        Ok(Some(ImageUrl {
            url: format!("{}{}{}", self.images.secure_base_url, size, path),
            width: self.config.profile_width,
            height: self.config.profile_height,
        }))
    }

    /// Overview text in the primary locale, falling back to the fallback
    /// locale when the primary one is empty. The fallback is its own
    /// cached lookup.
    pub async fn overview(&self, media_type: MediaType, id: i64) -> Result<Option<String>> {
        if let Some(details) = self.media_details(media_type, id).await? {
            if let Some(text) = non_empty_overview(&details) {
                return Ok(Some(text));
            }
        } else {
            // Confirmed absent in the primary locale; the fallback locale
            // cannot resurrect the entity.
            return Ok(None);
        }

        let fallback = self
            .details(media_type.into(), id, &self.config.fallback_language)
            .await?;
        Ok(fallback.as_ref().and_then(non_empty_overview))
    }
}

fn non_empty_overview(details: &Value) -> Option<String> {
    details["overview"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
