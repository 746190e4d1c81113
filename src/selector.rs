//! # Selector
//!
//! Turns a scored catalog into a short, listenable sequence. Candidates are
//! ranked by score (stable, so ties keep catalog order) and picked greedily,
//! skipping any candidate whose tempo or energy jumps too far from the track
//! before it.
//!
//! When no remaining candidate satisfies the continuity bound the selector
//! relaxes it for that one step: it takes the candidate with the smallest
//! normalized violation and records a [`Relaxation`]. Relaxing is the only
//! way an adjacent pair may exceed the bound.

use crate::algorithm::ScoredTrack;
use crate::catalog::Track;
use crate::error::RecommendError;
use log::{debug, warn};
use serde::Serialize;

/// Largest number of tracks a single request may ask for.
pub const MAX_TRACKS: usize = 10;

/// Continuity and diversity bounds.
#[derive(Debug, Clone)]
pub struct SelectionConfig {
    /// Largest tempo change between consecutive picks, in BPM.
    pub max_tempo_delta: f64,
    /// Largest energy change between consecutive picks.
    pub max_energy_delta: f64,
    /// Score window inside which a different artist is preferred.
    pub artist_tie_window: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_tempo_delta: 25.0,
            max_energy_delta: 0.25,
            artist_tie_window: 0.02,
        }
    }
}

/// One step where the continuity bound had to be exceeded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relaxation {
    /// Index of the relaxed pick in the selection.
    pub position: usize,
    pub track_id: String,
    pub tempo_delta: f64,
    pub energy_delta: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection<'a> {
    pub tracks: Vec<ScoredTrack<'a>>,
    pub relaxations: Vec<Relaxation>,
}

/// Pick `n` tracks from `scored`.
///
/// `previous` is the last track of an earlier selection; when given, the
/// first pick must connect smoothly to it.
///
/// # Errors
///
/// * [`RecommendError::Validation`] if `n` is 0
/// * [`RecommendError::InsufficientCatalog`] if fewer than `n` candidates exist
pub fn select<'a>(
    scored: &[ScoredTrack<'a>],
    n: usize,
    previous: Option<&Track>,
    config: &SelectionConfig,
) -> Result<Selection<'a>, RecommendError> {
    if n == 0 {
        return Err(RecommendError::Validation("track count must be at least 1".to_string()));
    }
    if scored.len() < n {
        return Err(RecommendError::InsufficientCatalog {
            requested: n,
            available: scored.len(),
        });
    }

    let mut remaining: Vec<&ScoredTrack<'a>> = scored.iter().collect();
    remaining.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut tracks: Vec<ScoredTrack<'a>> = Vec::with_capacity(n);
    let mut relaxations = Vec::new();
    let mut anchor: Option<&Track> = previous;

    while tracks.len() < n {
        let index = match anchor {
            None => 0,
            Some(last) => match pick_compliant(&remaining, last, config) {
                Some(index) => index,
                None => {
                    let index = least_violating(&remaining, last, config);
                    let candidate = remaining[index].track;
                    let relaxation = Relaxation {
                        position: tracks.len(),
                        track_id: candidate.id.clone(),
                        tempo_delta: (candidate.features.tempo - last.features.tempo).abs(),
                        energy_delta: (candidate.features.energy - last.features.energy).abs(),
                    };
                    warn!(
                        "Relaxing continuity at position {}: {} -> {} (tempo delta {:.1}, energy delta {:.2})",
                        relaxation.position, last.id, candidate.id, relaxation.tempo_delta, relaxation.energy_delta
                    );
                    relaxations.push(relaxation);
                    index
                }
            },
        };

        let chosen = remaining.remove(index);
        debug!("Selected {} (score {:.3})", chosen.track.id, chosen.score);
        anchor = Some(chosen.track);
        tracks.push(chosen.clone());
    }

    Ok(Selection { tracks, relaxations })
}

fn is_compliant(last: &Track, candidate: &Track, config: &SelectionConfig) -> bool {
    (candidate.features.tempo - last.features.tempo).abs() <= config.max_tempo_delta
        && (candidate.features.energy - last.features.energy).abs() <= config.max_energy_delta
}

/// Highest-ranked compliant candidate, swapped for a near-tied one by a
/// different artist when the leader would repeat the previous artist.
fn pick_compliant(remaining: &[&ScoredTrack<'_>], last: &Track, config: &SelectionConfig) -> Option<usize> {
    let mut compliant = remaining
        .iter()
        .enumerate()
        .filter(|(_, candidate)| is_compliant(last, candidate.track, config));

    let (best_index, best) = compliant.next()?;
    if !same_artist(last, best.track) {
        return Some(best_index);
    }

    let alternative = compliant
        .take_while(|(_, candidate)| best.score - candidate.score <= config.artist_tie_window)
        .find(|(_, candidate)| !same_artist(last, candidate.track))
        .map(|(index, _)| index);

    Some(alternative.unwrap_or(best_index))
}

/// Unknown artists never count as a repeat.
fn same_artist(a: &Track, b: &Track) -> bool {
    match (&a.artist, &b.artist) {
        (Some(x), Some(y)) => x.trim().eq_ignore_ascii_case(y.trim()),
        _ => false,
    }
}

fn violation(last: &Track, candidate: &Track, config: &SelectionConfig) -> f64 {
    let excess = |delta: f64, bound: f64| {
        if bound <= 0.0 {
            delta
        } else {
            (delta - bound).max(0.0) / bound
        }
    };
    let tempo = excess((candidate.features.tempo - last.features.tempo).abs(), config.max_tempo_delta);
    let energy = excess((candidate.features.energy - last.features.energy).abs(), config.max_energy_delta);
    tempo.max(energy)
}

/// Smallest violation wins; ties go to the higher-ranked candidate.
fn least_violating(remaining: &[&ScoredTrack<'_>], last: &Track, config: &SelectionConfig) -> usize {
    let mut best = (0, f64::INFINITY);
    for (index, candidate) in remaining.iter().enumerate() {
        let amount = violation(last, candidate.track, config);
        if amount < best.1 {
            best = (index, amount);
        }
    }
    best.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::ScoreBreakdown;
    use crate::catalog::AudioFeatures;
    use std::collections::HashSet;

    fn track(id: &str, tempo: f64, energy: f64, artist: Option<&str>) -> Track {
        let mut track = Track::new(id, AudioFeatures { tempo, energy, ..AudioFeatures::default() });
        track.artist = artist.map(str::to_string);
        track
    }

    fn scored<'a>(tracks: &'a [Track], scores: &[f64]) -> Vec<ScoredTrack<'a>> {
        tracks
            .iter()
            .zip(scores)
            .map(|(track, &score)| ScoredTrack {
                track,
                score,
                breakdown: ScoreBreakdown { tempo: score, energy: score, valence: score, overlap: None, context: None },
            })
            .collect()
    }

    fn ids(selection: &Selection<'_>) -> Vec<String> {
        selection.tracks.iter().map(|s| s.track.id.clone()).collect()
    }

    #[test]
    fn test_selects_exactly_n_unique_tracks() {
        let tracks: Vec<Track> = (0..20).map(|i| track(&format!("t{i}"), 90.0 + f64::from(i), 0.5, None)).collect();
        let scores: Vec<f64> = (0..20).map(|i| f64::from(i) / 20.0).collect();
        let selection = select(&scored(&tracks, &scores), 7, None, &SelectionConfig::default()).unwrap();

        let unique: HashSet<String> = ids(&selection).into_iter().collect();
        assert_eq!(selection.tracks.len(), 7);
        assert_eq!(unique.len(), 7);
        assert!(selection.relaxations.is_empty());
    }

    #[test]
    fn test_ties_keep_catalog_order() {
        let tracks: Vec<Track> = (0..5).map(|i| track(&format!("t{i}"), 100.0, 0.5, None)).collect();
        let selection = select(&scored(&tracks, &[0.5; 5]), 3, None, &SelectionConfig::default()).unwrap();
        assert_eq!(ids(&selection), vec!["t0", "t1", "t2"]);
    }

    #[test]
    fn test_skips_candidates_that_break_continuity() {
        let tracks = vec![
            track("a", 100.0, 0.5, None),
            track("jump", 170.0, 0.9, None),
            track("b", 110.0, 0.55, None),
        ];
        let selection = select(&scored(&tracks, &[0.9, 0.8, 0.7]), 2, None, &SelectionConfig::default()).unwrap();
        assert_eq!(ids(&selection), vec!["a", "b"]);
    }

    #[test]
    fn test_continuity_holds_except_recorded_relaxations() {
        let tracks: Vec<Track> = (0..20)
            .map(|i| track(&format!("t{i}"), 60.0 + f64::from(i * 7 % 20) * 8.0, f64::from(i % 5) / 5.0, None))
            .collect();
        let scores: Vec<f64> = (0..20).map(|i| 1.0 - f64::from(i) / 40.0).collect();
        let config = SelectionConfig::default();
        let selection = select(&scored(&tracks, &scores), 10, None, &config).unwrap();

        let relaxed: HashSet<usize> = selection.relaxations.iter().map(|r| r.position).collect();
        for (position, pair) in selection.tracks.windows(2).enumerate() {
            if relaxed.contains(&(position + 1)) {
                continue;
            }
            let (a, b) = (&pair[0].track.features, &pair[1].track.features);
            assert!((a.tempo - b.tempo).abs() <= config.max_tempo_delta);
            assert!((a.energy - b.energy).abs() <= config.max_energy_delta);
        }
    }

    #[test]
    fn test_relaxes_when_no_candidate_complies() {
        let tracks = vec![
            track("a", 80.0, 0.3, None),
            track("far", 200.0, 0.3, None),
            track("nearer", 140.0, 0.3, None),
        ];
        let selection = select(&scored(&tracks, &[0.9, 0.8, 0.7]), 2, None, &SelectionConfig::default()).unwrap();

        assert_eq!(ids(&selection), vec!["a", "nearer"]);
        assert_eq!(
            selection.relaxations,
            vec![Relaxation { position: 1, track_id: "nearer".into(), tempo_delta: 60.0, energy_delta: 0.0 }]
        );
    }

    #[test]
    fn test_previous_track_anchors_first_pick() {
        let previous = track("prev", 170.0, 0.9, None);
        let tracks = vec![track("slow", 80.0, 0.2, None), track("fast", 165.0, 0.85, None)];
        let selection =
            select(&scored(&tracks, &[0.9, 0.6]), 1, Some(&previous), &SelectionConfig::default()).unwrap();
        assert_eq!(ids(&selection), vec!["fast"]);
    }

    #[test]
    fn test_prefers_new_artist_within_tie_window() {
        let tracks = vec![
            track("a1", 100.0, 0.5, Some("Artist A")),
            track("a2", 100.0, 0.5, Some("artist a")),
            track("b1", 100.0, 0.5, Some("Artist B")),
        ];
        let selection = select(&scored(&tracks, &[0.90, 0.895, 0.89]), 2, None, &SelectionConfig::default()).unwrap();
        assert_eq!(ids(&selection), vec!["a1", "b1"]);
    }

    #[test]
    fn test_unknown_artists_are_not_repeats() {
        let tracks = vec![track("x", 100.0, 0.5, None), track("y", 100.0, 0.5, None), track("z", 100.0, 0.5, Some("Z"))];
        let selection = select(&scored(&tracks, &[0.9, 0.89, 0.88]), 2, None, &SelectionConfig::default()).unwrap();
        assert_eq!(ids(&selection), vec!["x", "y"]);
    }

    #[test]
    fn test_insufficient_catalog_and_zero() {
        let tracks = vec![track("a", 100.0, 0.5, None)];
        let candidates = scored(&tracks, &[0.5]);

        assert_eq!(
            select(&candidates, 2, None, &SelectionConfig::default()),
            Err(RecommendError::InsufficientCatalog { requested: 2, available: 1 })
        );
        assert!(matches!(select(&candidates, 0, None, &SelectionConfig::default()), Err(RecommendError::Validation(_))));
    }
}
