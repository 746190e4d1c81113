//! # Pipeline Orchestrator
//!
//! One request, start to finish:
//!
//! ```text
//! validate → parse mood → score catalog → select → resolve metadata → rationale
//! ```
//!
//! Validation (including the catalog size check) happens before any external
//! service is contacted. After that nothing can fail: every external call has
//! a deterministic fallback, so the caller either gets a complete response or
//! a [`RecommendError`] describing a bad request.
//!
//! All text-service calls of one request share a single [`Deadline`]. Once
//! the service has failed during the parse it is not asked for rationales,
//! and once the metadata resolver is down the remaining lookups are skipped.

use crate::algorithm::{self, statistics, ScoreBreakdown, ScoredTrack, ScoringContext};
use crate::catalog::{Catalog, Track};
use crate::error::RecommendError;
use crate::llm::{CompletionOptions, Deadline, TextService};
use crate::metadata::{MetadataError, MetadataResolver};
use crate::mood::{MoodOverrides, MoodTags};
use crate::parser::{MoodParser, ParseOutcome};
use crate::rationale::{Rationale, RationaleGenerator};
use crate::selector::{self, Relaxation, SelectionConfig, MAX_TRACKS};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Longest accepted mood text, in characters.
pub const MAX_MOOD_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecommendRequest {
    pub mood_text: String,
    #[serde(default)]
    pub movie_vibe: Option<String>,
    pub n_tracks: usize,
    #[serde(default)]
    pub overrides: Option<MoodOverrides>,
    /// Ids of an earlier selection. None of them is picked again, and the
    /// last one anchors continuity.
    #[serde(default)]
    pub previous: Vec<String>,
}

impl RecommendRequest {
    pub fn new(mood_text: impl Into<String>, n_tracks: usize) -> Self {
        Self {
            mood_text: mood_text.into(),
            movie_vibe: None,
            n_tracks,
            overrides: None,
            previous: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendResponse {
    pub parsed_tags: MoodTags,
    pub recommendations: Vec<Recommendation>,
    pub debug: DebugInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub score: f64,
    pub rationale: String,
    pub breakdown: ScoreBreakdown,
    pub links: Links,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Links {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spotify: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DebugInfo {
    pub raw_parse: Option<Value>,
    pub fallback_used: bool,
    /// Number of rationales that came from the template.
    pub rationale_fallbacks: usize,
    pub relaxations: Vec<Relaxation>,
    pub notes: Vec<String>,
}

pub struct Recommender {
    catalog: Arc<Catalog>,
    parser: MoodParser,
    rationale: RationaleGenerator,
    resolver: Arc<dyn MetadataResolver>,
    scoring: ScoringContext,
    selection: SelectionConfig,
    request_timeout: Duration,
}

/// Continuity anchor and excluded ids from a validated request.
struct Continuation<'a> {
    anchor: Option<&'a Track>,
    excluded: HashSet<&'a str>,
}

impl Recommender {
    pub fn new(
        catalog: Arc<Catalog>,
        service: Arc<dyn TextService>,
        resolver: Arc<dyn MetadataResolver>,
        options: CompletionOptions,
    ) -> Self {
        Self {
            catalog,
            request_timeout: options.timeout,
            parser: MoodParser::new(Arc::clone(&service), options.clone()),
            rationale: RationaleGenerator::new(service, options),
            resolver,
            scoring: ScoringContext::default(),
            selection: SelectionConfig::default(),
        }
    }

    #[must_use]
    pub fn with_max_vibes(mut self, max_vibes: usize) -> Self {
        self.parser = self.parser.with_max_vibes(max_vibes);
        self
    }

    #[must_use]
    pub fn with_scoring(mut self, scoring: ScoringContext) -> Self {
        self.scoring = scoring;
        self
    }

    #[must_use]
    pub fn with_selection(mut self, selection: SelectionConfig) -> Self {
        self.selection = selection;
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Parse a mood on its own, without scoring or selection.
    ///
    /// # Errors
    ///
    /// [`RecommendError::Validation`] for empty or oversized mood text.
    pub fn parse(
        &self,
        mood_text: &str,
        movie_vibe: Option<&str>,
        overrides: Option<&MoodOverrides>,
    ) -> Result<ParseOutcome, RecommendError> {
        validate_mood(mood_text)?;
        Ok(self.parser.parse(mood_text.trim(), movie_vibe, overrides))
    }

    /// Run the full pipeline for one request.
    ///
    /// # Errors
    ///
    /// * [`RecommendError::Validation`] for malformed requests
    /// * [`RecommendError::InsufficientCatalog`] when the catalog, minus the
    ///   previous selection, is smaller than `n_tracks`
    pub fn recommend(&self, request: &RecommendRequest) -> Result<RecommendResponse, RecommendError> {
        let continuation = self.validate(request)?;
        let deadline = Deadline::after(self.request_timeout);

        let parsed = self.parser.parse_before(
            request.mood_text.trim(),
            request.movie_vibe.as_deref(),
            request.overrides.as_ref(),
            &deadline,
        );
        let tags = &parsed.tags;
        let mut notes = parsed.notes.clone();

        let ask_service = match &parsed.service_error {
            None => true,
            Some(err) => {
                debug!("Skipping text service for rationales: {err}");
                notes.push(format!("rationales from template: text service failed during parse ({err})"));
                false
            }
        };

        let mut scored = algorithm::score_catalog(&self.catalog, tags, &self.scoring);
        scored.retain(|entry| !continuation.excluded.contains(entry.track.id.as_str()));
        if let Some(stats) = statistics::analyze_score_distribution(&scored) {
            debug!(
                "Scored {} tracks: mean {:.3}, sd {:.3}, range {:.3}..{:.3}",
                stats.count, stats.mean, stats.std_deviation, stats.min, stats.max
            );
        }

        let selection = selector::select(&scored, request.n_tracks, continuation.anchor, &self.selection)?;

        let mut rationale_fallbacks = 0;
        let mut resolver_down = false;
        let recommendations: Vec<Recommendation> = selection
            .tracks
            .iter()
            .map(|entry| {
                let (title, artist) = self.display_names(entry.track, &mut resolver_down, &mut notes);
                let rationale = if ask_service {
                    self.rationale.generate_before(tags, entry, &title, &artist, &deadline)
                } else {
                    Rationale::template(tags, entry)
                };
                if rationale.fallback_used {
                    rationale_fallbacks += 1;
                }
                build_recommendation(entry, title, artist, rationale.text)
            })
            .collect();

        info!(
            "Recommended {} tracks (parse fallback: {}, rationale fallbacks: {}, relaxations: {})",
            recommendations.len(),
            parsed.fallback_used,
            rationale_fallbacks,
            selection.relaxations.len()
        );

        Ok(RecommendResponse {
            parsed_tags: parsed.tags.clone(),
            recommendations,
            debug: DebugInfo {
                raw_parse: parsed.raw.clone(),
                fallback_used: parsed.fallback_used,
                rationale_fallbacks,
                relaxations: selection.relaxations,
                notes,
            },
        })
    }

    /// Check the request and resolve its previous selection. Makes no
    /// external calls.
    fn validate(&self, request: &RecommendRequest) -> Result<Continuation<'_>, RecommendError> {
        validate_mood(&request.mood_text)?;

        if request.n_tracks == 0 || request.n_tracks > MAX_TRACKS {
            return Err(RecommendError::Validation(format!(
                "n_tracks must be between 1 and {MAX_TRACKS}, got {}",
                request.n_tracks
            )));
        }

        let mut continuation = Continuation { anchor: None, excluded: HashSet::new() };
        for id in &request.previous {
            let track = self
                .catalog
                .get(id)
                .map_err(|_| RecommendError::Validation(format!("unknown previous track id {id}")))?;
            continuation.excluded.insert(track.id.as_str());
            continuation.anchor = Some(track);
        }

        let available = self.catalog.len() - continuation.excluded.len();
        if available < request.n_tracks {
            return Err(RecommendError::InsufficientCatalog {
                requested: request.n_tracks,
                available,
            });
        }

        Ok(continuation)
    }

    /// Title and artist for display, resolving whatever the catalog lacks.
    /// Falls back to the raw id and records a note. After a service failure
    /// `resolver_down` is set and later lookups are skipped.
    fn display_names(&self, track: &Track, resolver_down: &mut bool, notes: &mut Vec<String>) -> (String, String) {
        if let (Some(title), Some(artist)) = (&track.title, &track.artist) {
            return (title.clone(), artist.clone());
        }

        let fallback = || {
            (
                track.title.clone().unwrap_or_else(|| track.id.clone()),
                track.artist.clone().unwrap_or_else(|| track.id.clone()),
            )
        };

        if *resolver_down {
            notes.push(format!("metadata for {}: skipped, resolver unavailable", track.id));
            return fallback();
        }

        match self.resolver.resolve(&track.id) {
            Ok(info) => (
                track.title.clone().unwrap_or(info.title),
                track.artist.clone().unwrap_or(info.artist),
            ),
            Err(err) => {
                match &err {
                    MetadataError::NotFound(_) => warn!("No metadata for {}", track.id),
                    MetadataError::Service(_) => {
                        debug!("Metadata lookup failed for {}: {err}", track.id);
                        *resolver_down = true;
                    }
                }
                notes.push(format!("metadata for {}: {err}", track.id));
                fallback()
            }
        }
    }
}

fn validate_mood(mood_text: &str) -> Result<(), RecommendError> {
    if mood_text.trim().is_empty() {
        return Err(RecommendError::Validation("mood text must not be empty".to_string()));
    }
    let length = mood_text.chars().count();
    if length > MAX_MOOD_CHARS {
        return Err(RecommendError::Validation(format!(
            "mood text is {length} characters, the limit is {MAX_MOOD_CHARS}"
        )));
    }
    Ok(())
}

fn build_recommendation(entry: &ScoredTrack<'_>, title: String, artist: String, rationale: String) -> Recommendation {
    Recommendation {
        track_id: entry.track.id.clone(),
        title,
        artist,
        score: entry.score,
        rationale,
        breakdown: entry.breakdown,
        links: Links {
            spotify: entry.track.spotify_url(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AudioFeatures;
    use crate::llm::{ServiceError, Unavailable};
    use crate::metadata::{NoResolver, TrackInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn catalog(size: usize) -> Arc<Catalog> {
        Arc::new(Catalog::from_tracks((0..size).map(|i| {
            let step = i as f64;
            Track::new(
                format!("t{i}"),
                AudioFeatures { tempo: 80.0 + step * 3.0, energy: 0.2 + step * 0.03, valence: 0.5, ..AudioFeatures::default() },
            )
        })))
    }

    fn offline(size: usize) -> Recommender {
        Recommender::new(catalog(size), Arc::new(Unavailable), Arc::new(NoResolver), CompletionOptions::default())
    }

    #[test]
    fn test_validation_errors() {
        let recommender = offline(12);

        for request in [
            RecommendRequest::new("   ", 3),
            RecommendRequest::new("calm", 0),
            RecommendRequest::new("calm", 11),
            RecommendRequest::new("x".repeat(MAX_MOOD_CHARS + 1), 3),
            RecommendRequest { previous: vec!["nope".into()], ..RecommendRequest::new("calm", 3) },
        ] {
            assert!(matches!(recommender.recommend(&request), Err(RecommendError::Validation(_))));
        }
    }

    #[test]
    fn test_insufficient_catalog() {
        assert_eq!(
            offline(3).recommend(&RecommendRequest::new("calm", 5)),
            Err(RecommendError::InsufficientCatalog { requested: 5, available: 3 })
        );
    }

    #[test]
    fn test_offline_run_substitutes_ids_and_uses_fallbacks() {
        let response = offline(12).recommend(&RecommendRequest::new("chill and relaxed", 4)).unwrap();

        assert_eq!(response.recommendations.len(), 4);
        assert!(response.debug.fallback_used);
        assert_eq!(response.debug.rationale_fallbacks, 4);
        for item in &response.recommendations {
            assert_eq!(item.title, item.track_id);
            assert_eq!(item.artist, item.track_id);
            assert!(!item.rationale.is_empty());
            assert!(item.links.spotify.is_none());
        }
        assert!(response.debug.notes.iter().any(|note| note.starts_with("metadata for")));
    }

    #[test]
    fn test_catalog_names_skip_resolver() {
        struct Panicking;
        impl MetadataResolver for Panicking {
            fn name(&self) -> &str {
                "panicking"
            }
            fn resolve(&self, _: &str) -> Result<TrackInfo, MetadataError> {
                panic!("resolver must not be called");
            }
        }

        let mut track = Track::new("named", AudioFeatures::default());
        track.title = Some("Song".into());
        track.artist = Some("Band".into());
        let recommender = Recommender::new(
            Arc::new(Catalog::from_tracks(vec![track])),
            Arc::new(Unavailable),
            Arc::new(Panicking),
            CompletionOptions::default(),
        );

        let response = recommender.recommend(&RecommendRequest::new("anything", 1)).unwrap();
        assert_eq!(response.recommendations[0].title, "Song");
        assert_eq!(response.recommendations[0].artist, "Band");
    }

    #[test]
    fn test_continued_set_never_repeats_previous_tracks() {
        let recommender = offline(12);
        let first = recommender.recommend(&RecommendRequest::new("chill and relaxed", 3)).unwrap();
        let previous: Vec<String> = first.recommendations.iter().map(|item| item.track_id.clone()).collect();

        let next = recommender
            .recommend(&RecommendRequest { previous: previous.clone(), ..RecommendRequest::new("chill and relaxed", 3) })
            .unwrap();

        assert_eq!(next.recommendations.len(), 3);
        for item in &next.recommendations {
            assert!(!previous.contains(&item.track_id), "{} repeated", item.track_id);
        }
    }

    #[test]
    fn test_previous_selection_shrinks_available_catalog() {
        let request = RecommendRequest {
            previous: vec!["t0".into(), "t1".into(), "t1".into()],
            ..RecommendRequest::new("calm", 3)
        };
        assert_eq!(
            offline(4).recommend(&request),
            Err(RecommendError::InsufficientCatalog { requested: 3, available: 2 })
        );
    }

    #[test]
    fn test_failed_service_is_asked_once_per_request() {
        struct Failing(AtomicUsize);
        impl TextService for Failing {
            fn name(&self) -> &str {
                "failing"
            }
            fn complete_json(&self, _: &str, _: &str, _: &CompletionOptions) -> Result<Value, ServiceError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Timeout)
            }
        }

        struct Down(AtomicUsize);
        impl MetadataResolver for Down {
            fn name(&self) -> &str {
                "down"
            }
            fn resolve(&self, _: &str) -> Result<TrackInfo, MetadataError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(MetadataError::Service(ServiceError::Timeout))
            }
        }

        let service = Arc::new(Failing(AtomicUsize::new(0)));
        let resolver = Arc::new(Down(AtomicUsize::new(0)));
        let recommender = Recommender::new(catalog(12), service.clone(), resolver.clone(), CompletionOptions::default());

        let response = recommender.recommend(&RecommendRequest::new("chill and relaxed", 10)).unwrap();

        assert_eq!(service.0.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.0.load(Ordering::SeqCst), 1);
        assert_eq!(response.debug.rationale_fallbacks, 10);
        assert!(response.debug.notes.iter().any(|note| note.starts_with("rationales from template")));
        assert!(response.recommendations.iter().all(|item| item.title == item.track_id));
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: RecommendRequest = serde_json::from_str(r#"{"mood_text": "calm", "n_tracks": 3}"#).unwrap();
        assert_eq!(request, RecommendRequest::new("calm", 3));
        assert!(serde_json::from_str::<RecommendRequest>(r#"{"mood_text": "calm", "n_tracks": 3, "k": 1}"#).is_err());
    }

    #[test]
    fn test_parse_validates_mood() {
        let recommender = offline(3);
        assert!(recommender.parse("", None, None).is_err());
        assert!(recommender.parse("rainy night", None, None).unwrap().fallback_used);
    }
}
