//! Track scoring against a parsed mood.
//!
//! Every score is a pure function of one [`Track`], one [`MoodTags`] and a
//! [`ScoringContext`]; nothing is cached and nothing external is consulted,
//! so identical inputs always produce identical scores.
//!
//! ## Components
//!
//! ```text
//! tempo    = 1                           if bpm in [bpm_min, bpm_max]
//!            exp(-distance / decay)      otherwise
//! energy   = 1 - |track.energy - mood.energy|
//! valence  = 1 - |track.valence - (mood.valence + 1) / 2|
//! overlap  = mean(genre match, instrument affinities)     (optional)
//! context  = mean(feature closeness implied by setting,
//!                 time of day and weather)                (optional)
//!
//! score    = Σ wᵢ·cᵢ / Σ wᵢ   over the components present
//! ```
//!
//! Optional components drop out when the mood gives them nothing to compare,
//! which keeps `score` in `[0, 1]` without penalizing sparse moods.

use crate::catalog::{AudioFeatures, Catalog, Track};
use crate::mood::{MoodTags, Setting, TimeOfDay, Weather};
use rayon::prelude::*;
use serde::Serialize;

/// Score given to a genre preference when the track carries no genre labels.
const UNKNOWN_GENRE_FIT: f64 = 0.5;

/// Tunable scoring parameters.
#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub weights: WeightConfig,
    /// BPM distance at which the tempo component has decayed to 1/e.
    pub tempo_decay_bpm: f64,
}

/// Relative component weights. They need not sum to 1.
#[derive(Debug, Clone, Copy)]
pub struct WeightConfig {
    pub tempo: f64,
    pub energy: f64,
    pub valence: f64,
    pub overlap: f64,
    pub context: f64,
}

impl Default for ScoringContext {
    fn default() -> Self {
        Self {
            weights: WeightConfig {
                tempo: 0.30,
                energy: 0.25,
                valence: 0.25,
                overlap: 0.12,
                context: 0.08,
            },
            tempo_decay_bpm: 15.0,
        }
    }
}

/// Per-component fit values, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub tempo: f64,
    pub energy: f64,
    pub valence: f64,
    pub overlap: Option<f64>,
    pub context: Option<f64>,
}

impl ScoreBreakdown {
    /// Components as `(name, value)` pairs, skipping absent ones.
    #[must_use]
    pub fn components(&self) -> Vec<(Component, f64)> {
        let mut parts = vec![
            (Component::Tempo, self.tempo),
            (Component::Energy, self.energy),
            (Component::Valence, self.valence),
        ];
        parts.extend(self.overlap.map(|value| (Component::Overlap, value)));
        parts.extend(self.context.map(|value| (Component::Context, value)));
        parts
    }
}

/// Names of the score components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Tempo,
    Energy,
    Valence,
    Overlap,
    Context,
}

/// A catalog track with its fit for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredTrack<'a> {
    pub track: &'a Track,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Score one track.
///
/// # Examples
///
/// ```
/// use moodmix::algorithm::{score_track, ScoringContext};
/// use moodmix::catalog::{AudioFeatures, Track};
/// use moodmix::mood::MoodTags;
///
/// let track = Track::new("t1", AudioFeatures { tempo: 110.0, ..AudioFeatures::default() });
/// let scored = score_track(&track, &MoodTags::default(), &ScoringContext::default());
/// assert!((0.0..=1.0).contains(&scored.score));
/// ```
#[must_use]
pub fn score_track<'a>(track: &'a Track, tags: &MoodTags, context: &ScoringContext) -> ScoredTrack<'a> {
    let breakdown = calculate_breakdown(track, tags, context);
    ScoredTrack {
        track,
        score: combine(&breakdown, &context.weights),
        breakdown,
    }
}

/// Score every catalog track, preserving catalog order.
#[must_use]
pub fn score_catalog<'a>(
    catalog: &'a Catalog,
    tags: &MoodTags,
    context: &ScoringContext,
) -> Vec<ScoredTrack<'a>> {
    catalog
        .all_tracks()
        .par_iter()
        .map(|track| score_track(track, tags, context))
        .collect()
}

#[must_use]
pub fn calculate_breakdown(track: &Track, tags: &MoodTags, context: &ScoringContext) -> ScoreBreakdown {
    let features = &track.features;
    ScoreBreakdown {
        tempo: tempo_fit(features.tempo, tags, context.tempo_decay_bpm),
        energy: closeness(features.energy, tags.energy),
        valence: closeness(features.valence, tags.valence_unit()),
        overlap: overlap_fit(track, tags),
        context: context_fit(features, tags),
    }
}

fn combine(breakdown: &ScoreBreakdown, weights: &WeightConfig) -> f64 {
    let mut weighted = weights.tempo * breakdown.tempo
        + weights.energy * breakdown.energy
        + weights.valence * breakdown.valence;
    let mut total = weights.tempo + weights.energy + weights.valence;

    if let Some(overlap) = breakdown.overlap {
        weighted += weights.overlap * overlap;
        total += weights.overlap;
    }
    if let Some(context) = breakdown.context {
        weighted += weights.context * context;
        total += weights.context;
    }

    if total <= 0.0 {
        return 0.0;
    }
    (weighted / total).clamp(0.0, 1.0)
}

#[inline]
fn closeness(value: f64, target: f64) -> f64 {
    (1.0 - (value - target).abs()).clamp(0.0, 1.0)
}

#[inline]
fn tempo_fit(bpm: f64, tags: &MoodTags, decay: f64) -> f64 {
    if tags.tempo.contains(bpm) {
        1.0
    } else if decay <= 0.0 {
        0.0
    } else {
        (-tags.tempo.distance(bpm) / decay).exp()
    }
}

fn overlap_fit(track: &Track, tags: &MoodTags) -> Option<f64> {
    let mut parts = Vec::new();

    if !tags.genres.is_empty() {
        let genre_fit = if track.genres.is_empty() {
            UNKNOWN_GENRE_FIT
        } else {
            let matched = tags
                .genres
                .iter()
                .filter(|wanted| track.genres.iter().any(|label| genres_match(wanted, label)))
                .count();
            matched as f64 / tags.genres.len() as f64
        };
        parts.push(genre_fit);
    }

    parts.extend(
        tags.instruments
            .iter()
            .filter_map(|instrument| instrument_affinity(instrument, &track.features)),
    );

    mean(&parts)
}

/// "lo-fi" matches "lo-fi hip hop" and vice versa.
fn genres_match(wanted: &str, label: &str) -> bool {
    let normalize = |s: &str| s.replace(&['-', '_'][..], " ");
    let (wanted, label) = (normalize(wanted), normalize(label));
    wanted == label || label.contains(&wanted) || wanted.contains(&label)
}

/// How well a track's audio features suggest a given instrument.
fn instrument_affinity(instrument: &str, features: &AudioFeatures) -> Option<f64> {
    const ACOUSTIC: &[&str] = &["piano", "acoustic", "guitar", "strings", "violin", "cello", "harp", "folk"];
    const ELECTRONIC: &[&str] = &["synth", "synthesizer", "electronic", "808", "drum machine", "pads"];
    const VOCAL: &[&str] = &["vocals", "vocal", "voice", "choir", "singing"];
    const RHYTHMIC: &[&str] = &["drums", "percussion", "beat", "beats", "bass"];
    const SPOKEN: &[&str] = &["rap", "spoken", "spoken word"];

    let has = |names: &[&str]| names.iter().any(|name| instrument.contains(name));

    if has(ELECTRONIC) {
        Some(1.0 - features.acousticness)
    } else if has(ACOUSTIC) {
        Some(features.acousticness)
    } else if has(SPOKEN) {
        Some(features.speechiness)
    } else if has(VOCAL) {
        Some(1.0 - features.instrumentalness)
    } else if has(RHYTHMIC) {
        Some(features.danceability)
    } else if instrument.contains("instrumental") {
        Some(features.instrumentalness)
    } else {
        None
    }
}

fn context_fit(features: &AudioFeatures, tags: &MoodTags) -> Option<f64> {
    if tags.has_no_context() {
        return None;
    }

    let loudness_unit = (features.loudness + 60.0) / 60.0;
    let mut pairs: Vec<(f64, f64)> = Vec::new();

    match tags.setting {
        Setting::Unspecified => {}
        Setting::Indoor => pairs.push((features.acousticness, 0.6)),
        Setting::Outdoor | Setting::Travel => pairs.push((features.danceability, 0.6)),
        Setting::Party => pairs.push((features.danceability, 0.85)),
        Setting::Work => {
            pairs.push((features.instrumentalness, 0.7));
            pairs.push((features.speechiness, 0.1));
        }
    }

    match tags.time_of_day {
        TimeOfDay::Any => {}
        TimeOfDay::Morning => pairs.push((features.acousticness, 0.6)),
        TimeOfDay::Afternoon => pairs.push((features.danceability, 0.6)),
        TimeOfDay::Evening => pairs.push((features.acousticness, 0.5)),
        TimeOfDay::Night => pairs.push((loudness_unit, 0.7)),
    }

    match tags.weather {
        Weather::Any => {}
        Weather::Sunny => pairs.push((features.danceability, 0.7)),
        Weather::Cloudy => pairs.push((features.acousticness, 0.55)),
        Weather::Rainy => pairs.push((features.acousticness, 0.7)),
        Weather::Snowy => pairs.push((features.acousticness, 0.75)),
        Weather::Stormy => pairs.push((loudness_unit, 0.85)),
    }

    let closeness_values: Vec<f64> = pairs
        .into_iter()
        .map(|(value, target)| closeness(value, target))
        .collect();
    mean(&closeness_values)
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Statistical summaries used for debug logging.
pub mod statistics {
    use super::ScoredTrack;

    /// Distribution of scores over one scoring pass.
    #[derive(Debug, Clone, PartialEq)]
    pub struct ScoreStatistics {
        pub mean: f64,
        pub std_deviation: f64,
        pub min: f64,
        pub max: f64,
        pub count: usize,
    }

    /// `None` for an empty slice.
    #[must_use]
    pub fn analyze_score_distribution(scored: &[ScoredTrack<'_>]) -> Option<ScoreStatistics> {
        if scored.is_empty() {
            return None;
        }
        let count = scored.len();
        let mean = scored.iter().map(|s| s.score).sum::<f64>() / count as f64;
        let variance = scored
            .iter()
            .map(|s| (s.score - mean).powi(2))
            .sum::<f64>()
            / count as f64;

        Some(ScoreStatistics {
            mean,
            std_deviation: variance.sqrt(),
            min: scored.iter().map(|s| s.score).fold(f64::INFINITY, f64::min),
            max: scored.iter().map(|s| s.score).fold(f64::NEG_INFINITY, f64::max),
            count,
        })
    }
}
