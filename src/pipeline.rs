//! Citation-graph aggregation pipeline.
//!
//! Consumes every per-video annotation record and regenerates the derived
//! indices in three stages, each a pure function over the previous stage's
//! output:
//!
//! - **Stage A** — per video: keep mentions with confidence strictly above
//!   the threshold, deduplicate media, emit one `(person, video, media-set)`
//!   tuple per person appearing in the video.
//! - **Stage B** — merge tuples across videos by person identity, unioning
//!   media sets and accumulating video ids. The merge is associative and
//!   commutative over final set membership.
//! - **Stage C** — transpose into the media-centric view: for each unique
//!   media item, the persons whose merged media set contains it.
//!
//! The derived artifacts are whole-file JSON overwrites; the entire index
//! is regenerated from source on every run.

use anyhow::Result;

use crate::annotations::AnnotationReader;
use crate::config::Config;
use crate::dedup::{DedupKey, DedupSet};
use crate::models::{
    BestCitation, BestMediaEntry, BestMediaList, MediaCitation, MediaMentions, MediaRecord,
    MediaType, MediaWithTimestamps, MentionWindow, PersonCitation, PersonEntry, PersonRecord,
    VideoAnnotation, VideoDetail, VideoFeed, VideoSummary,
};
use crate::store::{write_json, BlobStore};

/// Mentions at or below this confidence are noise and never aggregated.
/// The boundary is strict: exactly 0.5 is excluded.
pub const CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Stage-A output: one person's confident media mentions in one video.
#[derive(Debug, Clone)]
pub struct PersonVideoMedia {
    pub person: PersonRecord,
    pub video_id: String,
    pub media: DedupSet<MediaRecord>,
}

/// Stage-B output: one person's merged citations across all videos.
#[derive(Debug, Clone)]
pub struct PersonAccumulator {
    pub person: PersonRecord,
    pub videos: DedupSet<String>,
    pub media: DedupSet<MediaRecord>,
}

/// Stage A. Yields nothing for videos with no personalities or no
/// confident mentions.
pub fn extract_video(
    annotation: &VideoAnnotation,
    mentions: &MediaMentions,
) -> Vec<PersonVideoMedia> {
    if annotation.personalities.is_empty() {
        return Vec::new();
    }

    let media: DedupSet<MediaRecord> = mentions
        .media_items_timestamps
        .iter()
        .filter(|entry| entry.confidence > CONFIDENCE_THRESHOLD)
        .map(|entry| entry.media_item.clone())
        .collect();
    if media.is_empty() {
        return Vec::new();
    }

    annotation
        .personalities
        .iter()
        .map(|person| PersonVideoMedia {
            person: person.clone(),
            video_id: annotation.video_id.clone(),
            media: media.clone(),
        })
        .collect()
}

/// Stage B. Tuples sharing a person id are folded together; persons without
/// an id never merge and stay as distinct accumulators.
pub fn merge_tuples(tuples: Vec<PersonVideoMedia>) -> Vec<PersonAccumulator> {
    let mut merged: Vec<PersonAccumulator> = Vec::new();
    let mut by_key: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for tuple in tuples {
        let slot = tuple
            .person
            .dedup_key()
            .and_then(|key| by_key.get(&key).copied());
        match slot {
            Some(idx) => {
                let acc = &mut merged[idx];
                acc.videos.insert(tuple.video_id);
                acc.media.extend_from(tuple.media);
            }
            None => {
                if let Some(key) = tuple.person.dedup_key() {
                    by_key.insert(key, merged.len());
                }
                let mut videos = DedupSet::new();
                videos.insert(tuple.video_id);
                merged.push(PersonAccumulator {
                    person: tuple.person,
                    videos,
                    media: tuple.media,
                });
            }
        }
    }

    merged
}

/// Global set of every media item cited anywhere, in Stage-A encounter order.
pub fn global_media(tuples: &[PersonVideoMedia]) -> DedupSet<MediaRecord> {
    let mut set = DedupSet::new();
    for tuple in tuples {
        for media in tuple.media.values() {
            set.insert(media.clone());
        }
    }
    set
}

/// Stage C. For each unique media item, the persons citing it with their
/// accumulated video sets. A person appears at most once per media item.
pub fn transpose(
    media: &DedupSet<MediaRecord>,
    merged: &[PersonAccumulator],
) -> Vec<MediaCitation> {
    media
        .values()
        .iter()
        .map(|item| {
            let personalities = merged
                .iter()
                .filter(|acc| match item.dedup_key() {
                    Some(key) => acc.media.contains_key(&key),
                    // Keyless media can only match by structural equality.
                    None => acc.media.values().iter().any(|m| m == item),
                })
                .map(|acc| PersonCitation {
                    person: acc.person.clone(),
                    videos: acc.videos.values().to_vec(),
                })
                .collect();
            MediaCitation {
                media: item.clone(),
                personalities,
            }
        })
        .collect()
}

/// Person-centric index straight from the merged accumulators.
pub fn person_entries(merged: &[PersonAccumulator]) -> Vec<PersonEntry> {
    merged
        .iter()
        .map(|acc| PersonEntry {
            person: acc.person.clone(),
            media: acc.media.values().to_vec(),
            videos: acc.videos.values().to_vec(),
        })
        .collect()
}

/// Per-video derived document: unique media with their confident mention
/// windows, in first-mention order.
///
/// Keyed media collect every confident window; keyless media stay
/// distinct, each mention keeping exactly its own window.
pub fn video_detail(annotation: &VideoAnnotation, mentions: &MediaMentions) -> VideoDetail {
    let mut media_with_timestamps: Vec<MediaWithTimestamps> = Vec::new();
    let mut slots: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for entry in &mentions.media_items_timestamps {
        if entry.confidence <= CONFIDENCE_THRESHOLD {
            continue;
        }
        let slot = match entry.media_item.dedup_key() {
            Some(key) => *slots.entry(key).or_insert_with(|| {
                media_with_timestamps.push(MediaWithTimestamps {
                    media: entry.media_item.clone(),
                    timestamps: Vec::new(),
                });
                media_with_timestamps.len() - 1
            }),
            None => {
                media_with_timestamps.push(MediaWithTimestamps {
                    media: entry.media_item.clone(),
                    timestamps: Vec::new(),
                });
                media_with_timestamps.len() - 1
            }
        };
        media_with_timestamps[slot].timestamps.push(MentionWindow {
            start_time: entry.start_time.seconds,
            end_time: entry.end_time.seconds,
            confidence: entry.confidence,
        });
    }

    VideoDetail {
        video_id: annotation.video_id.clone(),
        title: annotation.title.clone(),
        published_at: annotation.published_at,
        personalities: annotation.personalities.clone(),
        mentions: media_with_timestamps,
    }
}

/// Best-of list for one media type across all videos: one entry per keyed
/// media item, at most one citation per video (first mention wins), each
/// citation naming the video's first listed personality.
///
/// Videos without personalities contribute nothing, same as the
/// aggregation stages.
pub fn best_media(details: &[VideoDetail], media_type: MediaType) -> BestMediaList {
    let mut entries: Vec<BestMediaEntry> = Vec::new();
    let mut slots: std::collections::HashMap<i64, usize> = std::collections::HashMap::new();

    for detail in details {
        let Some(citer) = detail.personalities.first() else {
            continue;
        };
        for mention in &detail.mentions {
            if mention.media.media_type != media_type {
                continue;
            }
            let Some(id) = mention.media.id else {
                continue;
            };
            let slot = *slots.entry(id).or_insert_with(|| {
                entries.push(BestMediaEntry {
                    media: mention.media.clone(),
                    citations: Vec::new(),
                });
                entries.len() - 1
            });
            let entry = &mut entries[slot];
            if entry.citations.iter().any(|c| c.video_id == detail.video_id) {
                continue;
            }
            let Some(window) = mention.timestamps.first() else {
                continue;
            };
            entry.citations.push(BestCitation {
                video_id: detail.video_id.clone(),
                start_time: window.start_time,
                end_time: window.end_time,
                name: citer.name.clone(),
            });
        }
    }

    BestMediaList { media: entries }
}

/// Full regeneration run: read every annotated video, aggregate, write all
/// derived artifacts under the data prefix.
///
/// Missing annotation files skip their video with a warning; ambiguous
/// source data (several movies files for one video) aborts the run.
pub async fn run_prepare(
    store: &dyn BlobStore,
    config: &Config,
    dry_run: bool,
    limit: Option<usize>,
) -> Result<()> {
    let reader = AnnotationReader::new(store, &config.store.raw_prefix);
    let mut video_ids = reader.list_video_ids().await?;
    let total = video_ids.len();
    if let Some(lim) = limit {
        video_ids.truncate(lim);
    }

    let mut skipped = 0usize;
    let mut feed: Vec<VideoSummary> = Vec::new();
    let mut details: Vec<VideoDetail> = Vec::new();
    let mut tuples: Vec<PersonVideoMedia> = Vec::new();

    for video_id in &video_ids {
        let Some(annotation) = reader.read_video(video_id).await? else {
            eprintln!("Warning: missing video.json for video {}, skipping", video_id);
            skipped += 1;
            continue;
        };
        let Some(mentions) = reader.read_mentions(video_id).await? else {
            eprintln!("Warning: missing movies.json for video {}, skipping", video_id);
            skipped += 1;
            continue;
        };

        feed.push(VideoSummary {
            video_id: annotation.video_id.clone(),
            title: annotation.title.clone(),
            published_at: annotation.published_at,
        });
        details.push(video_detail(&annotation, &mentions));
        tuples.extend(extract_video(&annotation, &mentions));
    }

    // Newest first; undated videos sink to the end.
    feed.sort_by(|a, b| b.published_at.cmp(&a.published_at));

    let media = global_media(&tuples);
    let merged = merge_tuples(tuples);
    let citations = transpose(&media, &merged);
    let persons = person_entries(&merged);

    if dry_run {
        println!("prepare (dry-run)");
        println!("  videos found: {}", total);
        println!("  videos skipped: {}", skipped);
        println!("  unique media: {}", citations.len());
        println!("  persons: {}", persons.len());
        return Ok(());
    }

    let prefix = config.store.data_prefix.trim_end_matches('/');
    let mut written = 0usize;

    for detail in &details {
        write_json(
            store,
            &format!("{}/video/{}.json", prefix, detail.video_id),
            detail,
        )
        .await?;
        written += 1;
    }

    write_json(store, &format!("{}/video.json", prefix), &VideoFeed { feed }).await?;
    write_json(store, &format!("{}/media.json", prefix), &citations).await?;
    write_json(store, &format!("{}/person.json", prefix), &persons).await?;
    written += 3;

    write_json(
        store,
        &format!("{}/movie/best.json", prefix),
        &best_media(&details, MediaType::Movie),
    )
    .await?;
    write_json(
        store,
        &format!("{}/tv/best.json", prefix),
        &best_media(&details, MediaType::Tv),
    )
    .await?;
    written += 2;

    for citation in &citations {
        if let Some(id) = citation.media.id {
            let key = format!("{}/{}/{}.json", prefix, citation.media.media_type, id);
            write_json(store, &key, citation).await?;
            written += 1;
        }
    }
    for entry in &persons {
        if let Some(id) = entry.person.id {
            write_json(store, &format!("{}/person/{}.json", prefix, id), entry).await?;
            written += 1;
        }
    }

    println!("prepare");
    println!("  videos found: {}", total);
    println!("  videos aggregated: {}", details.len());
    println!("  videos skipped: {}", skipped);
    println!("  unique media: {}", citations.len());
    println!("  persons: {}", persons.len());
    println!("  artifacts written: {}", written);
    println!("ok");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaType, MentionEntry, Timecode};

    fn person(id: Option<i64>, name: &str) -> PersonRecord {
        PersonRecord {
            id,
            name: Some(name.to_string()),
            profile_path: None,
        }
    }

    fn movie(id: i64, title: &str) -> MediaRecord {
        MediaRecord {
            id: Some(id),
            media_type: MediaType::Movie,
            title: Some(title.to_string()),
            name: None,
            poster_path: None,
            release_date: None,
            first_air_date: None,
        }
    }

    fn mention(media: MediaRecord, confidence: f64) -> MentionEntry {
        MentionEntry {
            media_item: media,
            start_time: Timecode {
                seconds: 10,
                nanos: 0,
            },
            end_time: Timecode {
                seconds: 15,
                nanos: 0,
            },
            confidence,
        }
    }

    fn annotation(video_id: &str, personalities: Vec<PersonRecord>) -> VideoAnnotation {
        VideoAnnotation {
            video_id: video_id.to_string(),
            title: None,
            published_at: None,
            personalities,
        }
    }

    fn mentions(entries: Vec<MentionEntry>) -> MediaMentions {
        MediaMentions {
            media_items_timestamps: entries,
        }
    }

    #[test]
    fn confidence_boundary_is_strict() {
        let video = annotation("v1", vec![person(Some(7), "P1")]);
        let at_boundary = mentions(vec![mention(movie(42, "M1"), 0.5)]);
        assert!(extract_video(&video, &at_boundary).is_empty());

        let above = mentions(vec![mention(movie(42, "M1"), 0.51)]);
        let tuples = extract_video(&video, &above);
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].media.len(), 1);
    }

    #[test]
    fn videos_without_personalities_yield_nothing() {
        let video = annotation("v1", vec![]);
        let m = mentions(vec![mention(movie(42, "M1"), 0.9)]);
        assert!(extract_video(&video, &m).is_empty());
    }

    #[test]
    fn low_confidence_video_is_invisible() {
        // V1: P1 cites M1 at 0.9. V2: same pair at 0.3.
        let v1 = annotation("V1", vec![person(Some(7), "P1")]);
        let v2 = annotation("V2", vec![person(Some(7), "P1")]);
        let m1 = mentions(vec![mention(movie(42, "M1"), 0.9)]);
        let m2 = mentions(vec![mention(movie(42, "M1"), 0.3)]);

        let mut tuples = extract_video(&v1, &m1);
        tuples.extend(extract_video(&v2, &m2));

        let media = global_media(&tuples);
        let merged = merge_tuples(tuples);
        let citations = transpose(&media, &merged);

        assert_eq!(citations.len(), 1);
        let citation = &citations[0];
        assert_eq!(citation.media.id, Some(42));
        assert_eq!(citation.personalities.len(), 1);
        assert_eq!(citation.personalities[0].person.id, Some(7));
        assert_eq!(citation.personalities[0].videos, vec!["V1"]);
    }

    #[test]
    fn merge_is_order_independent() {
        let videos = vec![
            (
                annotation("v1", vec![person(Some(1), "A"), person(Some(2), "B")]),
                mentions(vec![
                    mention(movie(10, "M10"), 0.8),
                    mention(movie(11, "M11"), 0.95),
                ]),
            ),
            (
                annotation("v2", vec![person(Some(1), "A")]),
                mentions(vec![mention(movie(12, "M12"), 0.7)]),
            ),
            (
                annotation("v3", vec![person(Some(2), "B"), person(Some(3), "C")]),
                mentions(vec![mention(movie(10, "M10"), 0.6)]),
            ),
        ];

        let orderings: Vec<Vec<usize>> = vec![
            vec![0, 1, 2],
            vec![2, 1, 0],
            vec![1, 2, 0],
            vec![2, 0, 1],
        ];

        let mut results = Vec::new();
        for order in orderings {
            let mut tuples = Vec::new();
            for idx in order {
                let (video, m) = &videos[idx];
                tuples.extend(extract_video(video, m));
            }
            let media = global_media(&tuples);
            let merged = merge_tuples(tuples);
            let citations = transpose(&media, &merged);

            // Content as sorted (media id, person id, sorted videos) triples.
            let mut content: Vec<(i64, i64, Vec<String>)> = citations
                .iter()
                .flat_map(|c| {
                    c.personalities.iter().map(|p| {
                        let mut videos = p.videos.clone();
                        videos.sort();
                        (c.media.id.unwrap(), p.person.id.unwrap(), videos)
                    })
                })
                .collect();
            content.sort();
            results.push(content);
        }

        for result in &results[1..] {
            assert_eq!(result, &results[0]);
        }
    }

    #[test]
    fn no_duplicate_citer_per_media() {
        // P1 cites M1 in three videos.
        let mut tuples = Vec::new();
        for video_id in ["v1", "v2", "v3"] {
            let video = annotation(video_id, vec![person(Some(7), "P1")]);
            let m = mentions(vec![mention(movie(42, "M1"), 0.9)]);
            tuples.extend(extract_video(&video, &m));
        }
        let media = global_media(&tuples);
        let merged = merge_tuples(tuples);
        let citations = transpose(&media, &merged);

        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].personalities.len(), 1);
        assert_eq!(
            citations[0].personalities[0].videos,
            vec!["v1", "v2", "v3"]
        );
    }

    #[test]
    fn null_id_persons_never_merge() {
        let v1 = annotation("v1", vec![person(None, "Mystery")]);
        let v2 = annotation("v2", vec![person(None, "Mystery")]);
        let m = mentions(vec![mention(movie(42, "M1"), 0.9)]);

        let mut tuples = extract_video(&v1, &m);
        tuples.extend(extract_video(&v2, &m));
        let merged = merge_tuples(tuples);

        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn transpose_orders_by_first_encounter() {
        let v1 = annotation("v1", vec![person(Some(1), "A")]);
        let m1 = mentions(vec![
            mention(movie(20, "Second"), 0.9),
            mention(movie(10, "First"), 0.9),
        ]);
        let v2 = annotation("v2", vec![person(Some(2), "B")]);
        let m2 = mentions(vec![mention(movie(20, "Second"), 0.9)]);

        let mut tuples = extract_video(&v1, &m1);
        tuples.extend(extract_video(&v2, &m2));
        let media = global_media(&tuples);
        let merged = merge_tuples(tuples);
        let citations = transpose(&media, &merged);

        let ids: Vec<_> = citations.iter().map(|c| c.media.id.unwrap()).collect();
        assert_eq!(ids, vec![20, 10]);
        // Both A and B cite movie 20, in first-encounter person order.
        let names: Vec<_> = citations[0]
            .personalities
            .iter()
            .map(|p| p.person.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn keyless_mentions_keep_their_own_windows() {
        let video = annotation("v1", vec![person(Some(1), "A")]);
        let untitled = MediaRecord {
            id: None,
            media_type: MediaType::Movie,
            title: Some("Untitled".to_string()),
            name: None,
            poster_path: None,
            release_date: None,
            first_air_date: None,
        };
        let m = mentions(vec![
            mention(untitled.clone(), 0.9),
            MentionEntry {
                start_time: Timecode {
                    seconds: 200,
                    nanos: 0,
                },
                end_time: Timecode {
                    seconds: 210,
                    nanos: 0,
                },
                ..mention(untitled, 0.8)
            },
        ]);

        let detail = video_detail(&video, &m);
        // Two structurally identical keyless mentions stay distinct, one
        // window each.
        assert_eq!(detail.mentions.len(), 2);
        assert_eq!(detail.mentions[0].timestamps.len(), 1);
        assert_eq!(detail.mentions[0].timestamps[0].start_time, 10);
        assert_eq!(detail.mentions[1].timestamps.len(), 1);
        assert_eq!(detail.mentions[1].timestamps[0].start_time, 200);
    }

    #[test]
    fn best_media_dedups_per_video_with_citer_names() {
        let tv = MediaRecord {
            id: Some(99),
            media_type: MediaType::Tv,
            title: None,
            name: Some("Twin Peaks".to_string()),
            poster_path: None,
            release_date: None,
            first_air_date: None,
        };

        // v1: Alice cites movie 42 twice and the series once.
        let v1 = video_detail(
            &annotation("v1", vec![person(Some(7), "Alice"), person(Some(8), "Bob")]),
            &mentions(vec![
                mention(movie(42, "Heat"), 0.9),
                MentionEntry {
                    start_time: Timecode {
                        seconds: 300,
                        nanos: 0,
                    },
                    end_time: Timecode {
                        seconds: 310,
                        nanos: 0,
                    },
                    ..mention(movie(42, "Heat"), 0.8)
                },
                mention(tv.clone(), 0.8),
            ]),
        );
        // v2: Bob cites the same movie.
        let v2 = video_detail(
            &annotation("v2", vec![person(Some(8), "Bob")]),
            &mentions(vec![mention(movie(42, "Heat"), 0.7)]),
        );
        let details = vec![v1, v2];

        let best = best_media(&details, MediaType::Movie);
        assert_eq!(best.media.len(), 1);
        let heat = &best.media[0];
        assert_eq!(heat.media.id, Some(42));
        // One citation per video, first mention wins, first person named.
        assert_eq!(heat.citations.len(), 2);
        assert_eq!(heat.citations[0].video_id, "v1");
        assert_eq!(heat.citations[0].start_time, 10);
        assert_eq!(heat.citations[0].name.as_deref(), Some("Alice"));
        assert_eq!(heat.citations[1].video_id, "v2");
        assert_eq!(heat.citations[1].name.as_deref(), Some("Bob"));

        // The series lands in its own list.
        let series = best_media(&details, MediaType::Tv);
        assert_eq!(series.media.len(), 1);
        assert_eq!(series.media[0].media.id, Some(99));
    }

    #[test]
    fn best_media_skips_keyless_and_personless_sources() {
        let keyless = MediaRecord {
            id: None,
            media_type: MediaType::Movie,
            title: Some("Untitled".to_string()),
            name: None,
            poster_path: None,
            release_date: None,
            first_air_date: None,
        };
        let with_person = video_detail(
            &annotation("v1", vec![person(Some(7), "Alice")]),
            &mentions(vec![mention(keyless, 0.9)]),
        );
        let without_person = video_detail(
            &annotation("v2", vec![]),
            &mentions(vec![mention(movie(42, "Heat"), 0.9)]),
        );

        let best = best_media(&[with_person, without_person], MediaType::Movie);
        assert!(best.media.is_empty());
    }

    #[test]
    fn video_detail_aggregates_windows_per_media() {
        let video = annotation("v1", vec![person(Some(1), "A")]);
        let m = mentions(vec![
            mention(movie(42, "M1"), 0.9),
            MentionEntry {
                start_time: Timecode {
                    seconds: 100,
                    nanos: 0,
                },
                end_time: Timecode {
                    seconds: 110,
                    nanos: 0,
                },
                ..mention(movie(42, "M1"), 0.8)
            },
            mention(movie(42, "M1"), 0.2),
            mention(movie(43, "M2"), 0.7),
        ]);

        let detail = video_detail(&video, &m);
        assert_eq!(detail.mentions.len(), 2);
        let first = &detail.mentions[0];
        assert_eq!(first.media.id, Some(42));
        assert_eq!(first.timestamps.len(), 2);
        assert_eq!(first.timestamps[1].start_time, 100);
    }
}
