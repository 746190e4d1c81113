//! # Integration Tests for Moodmix
//!
//! End-to-end tests over a 20-track fixture catalog: the library pipeline
//! with a call-counting fake text service, the SQLite metadata cache, and
//! the `moodmix` binary itself.

use anyhow::Result;
use moodmix::catalog::Catalog;
use moodmix::error::RecommendError;
use moodmix::llm::{CompletionOptions, ServiceError, TextService, Unavailable};
use moodmix::metadata::{MetadataResolver, NoResolver};
use moodmix::pipeline::{RecommendRequest, RecommendResponse, Recommender};
use moodmix::selector::SelectionConfig;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const FIXTURE: &str = "\
uri,title,artist,tempo,energy,valence,danceability,acousticness,genres
spotify:track:fixture01,Slow Tide,Harbor Lights,72,0.21,0.45,0.40,0.85,ambient;lo-fi
spotify:track:fixture02,Paper Lanterns,Harbor Lights,78,0.25,0.55,0.50,0.80,lo-fi
spotify:track:fixture03,Window Rain,Mira Vale,84,0.30,0.40,0.45,0.90,ambient
spotify:track:fixture04,Late Tram,Mira Vale,90,0.35,0.50,0.55,0.70,jazz
spotify:track:fixture05,Blue Hour,Cedar and Smoke,95,0.38,0.35,0.50,0.75,jazz
spotify:track:fixture06,Low Sun,Cedar and Smoke,100,0.42,0.60,0.60,0.60,indie
spotify:track:fixture07,Drift,Oslo Nights,66,0.18,0.30,0.35,0.95,ambient|classical
spotify:track:fixture08,Soft Focus,Oslo Nights,88,0.28,0.52,0.48,0.82,lo-fi
spotify:track:fixture09,Northbound,Kestrel,105,0.48,0.58,0.62,0.40,indie;rock
spotify:track:fixture10,Signal Fire,Kestrel,112,0.55,0.62,0.66,0.30,rock
spotify:track:fixture11,Neon Alley,Vector Bloom,118,0.62,0.48,0.72,0.10,synthwave;electronic
spotify:track:fixture12,Night Runner,Vector Bloom,124,0.70,0.52,0.78,0.08,synthwave
spotify:track:fixture13,Pulse Line,Static Choir,128,0.78,0.64,0.84,0.05,electronic;house
spotify:track:fixture14,Overdrive,Static Choir,135,0.85,0.70,0.80,0.04,electronic
spotify:track:fixture15,Redline,Iron Bloom,150,0.92,0.40,0.60,0.02,metal
spotify:track:fixture16,Stampede,Iron Bloom,165,0.96,0.35,0.55,0.01,metal
spotify:track:fixture17,Sunday Porch,June Harper,82,0.33,0.78,0.58,0.88,folk
spotify:track:fixture18,Golden Field,June Harper,96,0.45,0.82,0.64,0.76,folk;pop
spotify:track:fixture19,,,76,0.24,0.50,0.42,0.86,lo-fi
spotify:track:fixture20,,,140,0.88,0.75,0.90,0.03,house
";

fn fixture_catalog() -> Arc<Catalog> {
    Arc::new(Catalog::from_reader(Cursor::new(FIXTURE)).expect("fixture catalog must load"))
}

/// Write the fixture to a temporary CSV file for binary tests.
fn fixture_file() -> Result<(TempDir, PathBuf)> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("tracks.csv");
    std::fs::write(&path, FIXTURE)?;
    Ok((temp_dir, path))
}

/// Text service that answers like a well-behaved model and counts calls.
struct FakeService {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeService {
    fn working() -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), fail: false })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), fail: true })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextService for FakeService {
    fn name(&self) -> &str {
        "fake"
    }

    fn complete_json(&self, _: &str, user: &str, _: &CompletionOptions) -> Result<Value, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ServiceError::Timeout);
        }

        if user.starts_with("Mood:") {
            Ok(json!({
                "valence": "neutral",
                "energy": "low",
                "tempo_bpm": [65, 100],
                "genres": ["ambient", "lo-fi"],
                "instruments": ["piano"],
                "setting": "home",
                "time_of_day": "evening",
                "weather": null,
                "movie_vibes": ["quiet drift"]
            }))
        } else {
            Ok(json!({ "rationale": "Soft, unhurried and warm, it settles into a low-energy evening." }))
        }
    }
}

fn recommender(service: Arc<FakeService>) -> Recommender {
    Recommender::new(fixture_catalog(), service, Arc::new(NoResolver), CompletionOptions::default())
}

fn unique_ids(response: &RecommendResponse) -> HashSet<&str> {
    response.recommendations.iter().map(|item| item.track_id.as_str()).collect()
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;

    #[test]
    fn test_chill_and_relaxed_returns_five_unique_tracks() {
        let service = FakeService::working();
        let response = recommender(service.clone())
            .recommend(&RecommendRequest::new("chill and relaxed", 5))
            .unwrap();

        assert_eq!(response.recommendations.len(), 5);
        assert_eq!(unique_ids(&response).len(), 5);
        for item in &response.recommendations {
            assert!((0.0..=1.0).contains(&item.score), "score {} out of range", item.score);
            assert!(item.links.spotify.as_deref().unwrap().starts_with("https://open.spotify.com/track/"));
        }

        assert!(!response.debug.fallback_used);
        assert_eq!(response.debug.rationale_fallbacks, 0);
        // one parse + one rationale per pick
        assert_eq!(service.calls(), 6);
    }

    #[test]
    fn test_empty_mood_is_rejected_without_external_calls() {
        let service = FakeService::working();
        let result = recommender(service.clone()).recommend(&RecommendRequest::new("", 5));

        assert!(matches!(result, Err(RecommendError::Validation(_))));
        assert_eq!(service.calls(), 0);
    }

    #[test]
    fn test_insufficient_catalog_is_rejected_without_external_calls() {
        let service = FakeService::working();
        let small = Catalog::from_tracks(fixture_catalog().all_tracks().iter().take(4).cloned());
        let recommender = Recommender::new(
            Arc::new(small),
            service.clone(),
            Arc::new(NoResolver),
            CompletionOptions::default(),
        );

        assert_eq!(
            recommender.recommend(&RecommendRequest::new("calm", 5)),
            Err(RecommendError::InsufficientCatalog { requested: 5, available: 4 })
        );
        assert_eq!(service.calls(), 0);
    }

    #[test]
    fn test_failing_service_still_yields_valid_tags_and_full_result() {
        let service = FakeService::failing();
        let response = recommender(service.clone())
            .recommend(&RecommendRequest::new("rainy night, melancholy piano", 6))
            .unwrap();

        let tags = &response.parsed_tags;
        assert!(response.debug.fallback_used);
        assert!(response.debug.raw_parse.is_none());
        assert!((-1.0..=1.0).contains(&tags.valence));
        assert!((0.0..=1.0).contains(&tags.energy));
        assert!(tags.tempo.bpm_min <= tags.tempo.bpm_max);

        assert_eq!(response.recommendations.len(), 6);
        assert_eq!(response.debug.rationale_fallbacks, 6);
        assert!(response.recommendations.iter().all(|item| !item.rationale.is_empty()));
        // the parse failure marks the service down for the rest of the request
        assert_eq!(service.calls(), 1);
    }

    #[test]
    fn test_exact_count_for_every_valid_n() {
        let recommender = recommender(FakeService::failing());
        for n in 1..=10 {
            let response = recommender.recommend(&RecommendRequest::new("upbeat party", n)).unwrap();
            assert_eq!(response.recommendations.len(), n);
            assert_eq!(unique_ids(&response).len(), n);
        }
    }

    #[test]
    fn test_adjacent_picks_respect_continuity_unless_relaxed() {
        let bounds = SelectionConfig::default();
        let catalog = fixture_catalog();
        let recommender = recommender(FakeService::failing());

        for mood in ["chill and relaxed", "hype workout", "sad rainy evening", "happy sunny road trip"] {
            let response = recommender.recommend(&RecommendRequest::new(mood, 10)).unwrap();
            let relaxed: HashSet<usize> = response.debug.relaxations.iter().map(|r| r.position).collect();

            for (index, pair) in response.recommendations.windows(2).enumerate() {
                if relaxed.contains(&(index + 1)) {
                    continue;
                }
                let a = &catalog.get(&pair[0].track_id).unwrap().features;
                let b = &catalog.get(&pair[1].track_id).unwrap().features;
                assert!((a.tempo - b.tempo).abs() <= bounds.max_tempo_delta, "{mood}: tempo jump at {index}");
                assert!((a.energy - b.energy).abs() <= bounds.max_energy_delta, "{mood}: energy jump at {index}");
            }
        }
    }

    #[test]
    fn test_previous_selection_anchors_continuity() {
        let recommender = recommender(FakeService::failing());
        let request = RecommendRequest {
            previous: vec!["spotify:track:fixture16".to_string()],
            ..RecommendRequest::new("chill and relaxed", 1)
        };
        let response = recommender.recommend(&request).unwrap();

        let first = recommender.catalog().get(&response.recommendations[0].track_id).unwrap();
        let anchor = recommender.catalog().get("spotify:track:fixture16").unwrap();
        let relaxed = !response.debug.relaxations.is_empty();
        assert!(relaxed || (first.features.tempo - anchor.features.tempo).abs() <= 25.0);
    }

    #[test]
    fn test_continued_set_shares_no_tracks_with_previous() {
        let recommender = recommender(FakeService::working());
        let first = recommender.recommend(&RecommendRequest::new("chill and relaxed", 5)).unwrap();
        let previous: Vec<String> = first.recommendations.iter().map(|item| item.track_id.clone()).collect();

        let next = recommender
            .recommend(&RecommendRequest { previous: previous.clone(), ..RecommendRequest::new("chill and relaxed", 5) })
            .unwrap();

        assert_eq!(next.recommendations.len(), 5);
        assert!(unique_ids(&next).iter().all(|id| !previous.iter().any(|p| p == id)));
    }

    #[test]
    fn test_keyword_fallback_serializes_identically() {
        let first = recommender(FakeService::failing())
            .recommend(&RecommendRequest::new("cozy rainy morning with piano and jazz", 3))
            .unwrap();
        let second = Recommender::new(fixture_catalog(), Arc::new(Unavailable), Arc::new(NoResolver), CompletionOptions::default())
            .recommend(&RecommendRequest::new("cozy rainy morning with piano and jazz", 3))
            .unwrap();

        assert_eq!(
            serde_json::to_string(&first.parsed_tags).unwrap(),
            serde_json::to_string(&second.parsed_tags).unwrap()
        );
        assert_eq!(first.recommendations, second.recommendations);
    }

    #[test]
    fn test_missing_metadata_substitutes_raw_id() {
        let recommender = recommender(FakeService::failing());
        let request = RecommendRequest {
            previous: vec!["spotify:track:fixture01".to_string()],
            ..RecommendRequest::new("lo-fi", 10)
        };
        let response = recommender.recommend(&request).unwrap();

        for item in &response.recommendations {
            if item.track_id.ends_with("fixture19") || item.track_id.ends_with("fixture20") {
                assert_eq!(item.title, item.track_id);
                assert!(response.debug.notes.iter().any(|n| n.contains(&item.track_id)));
            } else {
                assert_ne!(item.title, item.track_id);
            }
        }
    }
}

#[cfg(test)]
mod cache_tests {
    use super::*;
    use moodmix::db::MetadataCache;
    use moodmix::metadata::{CachedResolver, MetadataError, TrackInfo};

    struct Directory {
        calls: AtomicUsize,
    }

    impl MetadataResolver for Directory {
        fn name(&self) -> &str {
            "directory"
        }

        fn resolve(&self, track_id: &str) -> Result<TrackInfo, MetadataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TrackInfo { title: format!("Resolved {track_id}"), artist: "Unknown Ensemble".into() })
        }
    }

    #[test]
    fn test_cache_persists_between_resolvers() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("metadata.db");
        let directory = Arc::new(Directory { calls: AtomicUsize::new(0) });

        let first = CachedResolver::new(directory.clone(), MetadataCache::open(&db_path)?);
        first.resolve("spotify:track:fixture19").unwrap();

        let second = CachedResolver::new(directory.clone(), MetadataCache::open(&db_path)?);
        let info = second.resolve("spotify:track:fixture19").unwrap();

        assert_eq!(info.title, "Resolved spotify:track:fixture19");
        assert_eq!(directory.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_pipeline_fills_missing_names_from_resolver() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let directory = Arc::new(Directory { calls: AtomicUsize::new(0) });
        let resolver = Arc::new(CachedResolver::new(
            directory.clone(),
            MetadataCache::open(&temp_dir.path().join("metadata.db"))?,
        ));
        let recommender = Recommender::new(fixture_catalog(), Arc::new(Unavailable), resolver, CompletionOptions::default());

        let response = recommender.recommend(&RecommendRequest::new("lo-fi", 10)).unwrap();
        for item in &response.recommendations {
            assert_ne!(item.title, item.track_id);
        }
        // only the two unnamed fixture tracks can ever reach the resolver
        assert!(directory.calls.load(Ordering::SeqCst) <= 2);
        Ok(())
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use std::path::Path;
    use std::process::{Command, Output};

    fn moodmix(catalog: &Path, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_moodmix"))
            .arg("--offline")
            .arg("--catalog")
            .arg(catalog)
            .args(args)
            .env_remove("RUST_LOG")
            .output()
            .expect("Failed to run moodmix")
    }

    #[test]
    fn test_recommend_json_output() -> Result<()> {
        let (_dir, catalog) = fixture_file()?;
        let output = moodmix(&catalog, &["recommend", "--mood", "chill and relaxed", "-k", "5", "--json"]);

        assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
        let document: Value = serde_json::from_slice(&output.stdout)?;
        assert_eq!(document["recommendations"].as_array().map(Vec::len), Some(5));
        assert_eq!(document["debug"]["fallback_used"], true);
        assert!(document["parsed_tags"]["tempo"]["bpm_min"].is_u64());
        Ok(())
    }

    #[test]
    fn test_exit_codes() -> Result<()> {
        let (_dir, catalog) = fixture_file()?;

        let empty = moodmix(&catalog, &["recommend", "--mood", "  "]);
        assert_eq!(empty.status.code(), Some(2));

        let too_many = moodmix(&catalog, &["recommend", "--mood", "calm", "-k", "11"]);
        assert_eq!(too_many.status.code(), Some(2));

        let missing = moodmix(Path::new("/nonexistent/tracks.csv"), &["recommend", "--mood", "calm"]);
        assert_eq!(missing.status.code(), Some(1));
        Ok(())
    }

    #[test]
    fn test_insufficient_catalog_exit_code() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("tiny.csv");
        let tiny: String = FIXTURE.lines().take(4).map(|line| format!("{line}\n")).collect();
        std::fs::write(&path, tiny)?;

        let output = moodmix(&path, &["recommend", "--mood", "calm", "-k", "5"]);
        assert_eq!(output.status.code(), Some(3));
        Ok(())
    }

    #[test]
    fn test_parse_and_catalog_commands() -> Result<()> {
        let (_dir, catalog) = fixture_file()?;

        let parsed = moodmix(&catalog, &["parse", "--mood", "sad rainy evening"]);
        assert!(parsed.status.success());
        let tags: Value = serde_json::from_slice(&parsed.stdout)?;
        assert_eq!(tags["weather"], "rainy");
        assert_eq!(tags["time_of_day"], "evening");

        let summary = moodmix(&catalog, &["catalog"]);
        assert!(String::from_utf8_lossy(&summary.stdout).contains("Tracks: 20"));
        Ok(())
    }

    #[test]
    fn test_invalid_overrides_are_a_validation_error() -> Result<()> {
        let (_dir, catalog) = fixture_file()?;

        let unknown_field = moodmix(&catalog, &["recommend", "--mood", "calm", "--overrides", "{\"colour\":1}"]);
        assert_eq!(unknown_field.status.code(), Some(2));

        let malformed = moodmix(&catalog, &["parse", "--mood", "calm", "--overrides", "{not json"]);
        assert_eq!(malformed.status.code(), Some(2));
        Ok(())
    }
}
