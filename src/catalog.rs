//! # Catalog Store
//!
//! Loads the local track dataset once, normalizes its numeric columns into
//! known ranges and indexes the result by track id. A [`Catalog`] is never
//! mutated after construction; share it between requests behind an `Arc`.
//!
//! ## Dataset Format
//!
//! A CSV file with a header row. Column names are matched case-insensitively.
//!
//! | column | required | notes |
//! |---|---|---|
//! | `uri` / `id` | yes | Spotify URI, open.spotify.com link or any opaque id |
//! | `tempo` | yes | BPM, clamped to 0..250 |
//! | `energy`, `valence`, `danceability` | yes | clamped to 0..1 |
//! | `acousticness`, `instrumentalness`, `liveness`, `speechiness` | no | clamped to 0..1 |
//! | `loudness` | no | dB, clamped to -60..0 |
//! | `title`, `artist` | no | resolved through [`crate::metadata`] when absent |
//! | `genres` | no | `;` or `|` separated labels |
//! | `duration_ms` / `duration (ms)` | no | |

use crate::error::{CatalogError, RecommendError};
use csv::StringRecord;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Tempo used when the dataset carries no usable tempo at all.
pub const DEFAULT_TEMPO: f64 = 120.0;
const MAX_TEMPO: f64 = 250.0;
const DEFAULT_UNIT: f64 = 0.5;
const DEFAULT_LOUDNESS: f64 = -10.0;

/// Numeric audio descriptors of a track, already normalized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AudioFeatures {
    pub tempo: f64,
    pub energy: f64,
    pub valence: f64,
    pub danceability: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    pub liveness: f64,
    pub speechiness: f64,
    pub loudness: f64,
}

impl Default for AudioFeatures {
    fn default() -> Self {
        Self {
            tempo: DEFAULT_TEMPO,
            energy: DEFAULT_UNIT,
            valence: DEFAULT_UNIT,
            danceability: DEFAULT_UNIT,
            acousticness: DEFAULT_UNIT,
            instrumentalness: 0.0,
            liveness: DEFAULT_UNIT,
            speechiness: DEFAULT_UNIT,
            loudness: DEFAULT_LOUDNESS,
        }
    }
}

impl AudioFeatures {
    /// Clamp every field into its known range. Non-finite values are replaced
    /// by the field default.
    #[must_use]
    pub fn clamped(self) -> Self {
        let defaults = Self::default();
        let bounded = |value: f64, fallback: f64, lo: f64, hi: f64| {
            if value.is_finite() { value.clamp(lo, hi) } else { fallback }
        };

        Self {
            tempo: bounded(self.tempo, defaults.tempo, 0.0, MAX_TEMPO),
            energy: bounded(self.energy, defaults.energy, 0.0, 1.0),
            valence: bounded(self.valence, defaults.valence, 0.0, 1.0),
            danceability: bounded(self.danceability, defaults.danceability, 0.0, 1.0),
            acousticness: bounded(self.acousticness, defaults.acousticness, 0.0, 1.0),
            instrumentalness: bounded(self.instrumentalness, defaults.instrumentalness, 0.0, 1.0),
            liveness: bounded(self.liveness, defaults.liveness, 0.0, 1.0),
            speechiness: bounded(self.speechiness, defaults.speechiness, 0.0, 1.0),
            loudness: bounded(self.loudness, defaults.loudness, -60.0, 0.0),
        }
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub id: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub features: AudioFeatures,
    /// Lower-cased genre labels, possibly empty.
    pub genres: Vec<String>,
    pub duration_ms: Option<u64>,
}

impl Track {
    /// Build a track with default features. Mostly useful for tests and
    /// benchmarks; loaded tracks come from [`Catalog::from_reader`].
    #[must_use]
    pub fn new(id: impl Into<String>, features: AudioFeatures) -> Self {
        Self {
            id: id.into(),
            title: None,
            artist: None,
            features,
            genres: Vec::new(),
            duration_ms: None,
        }
    }

    /// Public Spotify URL for this track, when the id identifies one.
    #[must_use]
    pub fn spotify_url(&self) -> Option<String> {
        spotify_track_id(&self.id).map(|id| format!("https://open.spotify.com/track/{id}"))
    }
}

/// Extract the Spotify track id from a `spotify:track:` URI, an
/// `open.spotify.com/track/` link, or a bare 22 character id.
#[must_use]
pub fn spotify_track_id(uri: &str) -> Option<&str> {
    let uri = uri.trim();
    let candidate = if let Some(rest) = uri.strip_prefix("spotify:track:") {
        rest
    } else if let Some(pos) = uri.find("open.spotify.com/track/") {
        let rest = &uri[pos + "open.spotify.com/track/".len()..];
        let end = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        &rest[..end]
    } else if uri.len() == 22 {
        uri
    } else {
        return None;
    };

    (!candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_alphanumeric()))
        .then_some(candidate)
}

/// The read-only track store.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tracks: Vec<Track>,
    index: HashMap<String, usize>,
    tempo_bounds: (f64, f64),
}

impl Catalog {
    /// Load and normalize the dataset at `path`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, is not valid CSV, or lacks one of
    /// the required columns.
    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        info!("Loading track catalog from {}", path.display());
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Load and normalize a dataset from any reader.
    ///
    /// # Errors
    ///
    /// See [`Catalog::from_path`].
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let columns = ColumnMap::resolve(&headers)?;

        let mut rows = Vec::new();
        for (line, record) in csv_reader.records().enumerate() {
            let record = record?;
            match columns.read_row(&record) {
                Some(row) => rows.push(row),
                // +2: header line and 1-based numbering
                None => warn!("Skipping catalog row {} with an empty id", line + 2),
            }
        }

        Ok(Self::from_raw_rows(rows))
    }

    /// Build a catalog from already-constructed tracks. Features are clamped,
    /// genre labels lower-cased and duplicate ids dropped (first one wins).
    #[must_use]
    pub fn from_tracks(tracks: impl IntoIterator<Item = Track>) -> Self {
        let mut catalog = Self::default();
        let mut tempo_lo = f64::INFINITY;
        let mut tempo_hi = f64::NEG_INFINITY;

        for mut track in tracks {
            if catalog.index.contains_key(&track.id) {
                warn!("Duplicate track id `{}` in catalog, keeping the first entry", track.id);
                continue;
            }
            track.features = track.features.clamped();
            track.genres = track
                .genres
                .iter()
                .map(|genre| genre.trim().to_lowercase())
                .filter(|genre| !genre.is_empty())
                .collect();

            tempo_lo = tempo_lo.min(track.features.tempo);
            tempo_hi = tempo_hi.max(track.features.tempo);
            catalog.index.insert(track.id.clone(), catalog.tracks.len());
            catalog.tracks.push(track);
        }

        catalog.tempo_bounds = if catalog.tracks.is_empty() {
            (DEFAULT_TEMPO, DEFAULT_TEMPO)
        } else {
            (tempo_lo, tempo_hi)
        };
        debug!(
            "Catalog indexed {} tracks, tempo range {:.1}-{:.1} BPM",
            catalog.tracks.len(),
            catalog.tempo_bounds.0,
            catalog.tempo_bounds.1
        );
        catalog
    }

    fn from_raw_rows(rows: Vec<RawRow>) -> Self {
        let mut present: Vec<f64> = rows.iter().filter_map(|row| row.tempo).collect();
        let fill_tempo = median(&mut present).unwrap_or(DEFAULT_TEMPO);

        Self::from_tracks(rows.into_iter().map(|row| row.into_track(fill_tempo)))
    }

    /// All tracks in insertion order.
    #[must_use]
    pub fn all_tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Look up a track by id.
    ///
    /// # Errors
    ///
    /// [`RecommendError::NotFound`] when the id is unknown.
    pub fn get(&self, id: &str) -> Result<&Track, RecommendError> {
        self.index
            .get(id)
            .map(|&position| &self.tracks[position])
            .ok_or_else(|| RecommendError::NotFound(id.to_string()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Lowest and highest tempo in the catalog.
    #[must_use]
    pub const fn tempo_bounds(&self) -> (f64, f64) {
        self.tempo_bounds
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Column positions resolved from the header row.
struct ColumnMap {
    id: usize,
    tempo: usize,
    energy: usize,
    valence: usize,
    danceability: usize,
    acousticness: Option<usize>,
    instrumentalness: Option<usize>,
    liveness: Option<usize>,
    speechiness: Option<usize>,
    loudness: Option<usize>,
    title: Option<usize>,
    artist: Option<usize>,
    genres: Option<usize>,
    duration_ms: Option<usize>,
}

impl ColumnMap {
    fn resolve(headers: &StringRecord) -> Result<Self, CatalogError> {
        let find = |names: &[&str]| {
            headers.iter().position(|header| {
                let header = header.trim().to_ascii_lowercase();
                names.iter().any(|name| header == *name)
            })
        };
        let require = |names: &[&str], label: &'static str| {
            find(names).ok_or(CatalogError::MissingColumn(label))
        };

        Ok(Self {
            id: require(&["uri", "id"], "uri")?,
            tempo: require(&["tempo"], "tempo")?,
            energy: require(&["energy"], "energy")?,
            valence: require(&["valence"], "valence")?,
            danceability: require(&["danceability"], "danceability")?,
            acousticness: find(&["acousticness"]),
            instrumentalness: find(&["instrumentalness"]),
            liveness: find(&["liveness"]),
            speechiness: find(&["speechiness"]),
            loudness: find(&["loudness"]),
            title: find(&["title", "name"]),
            artist: find(&["artist", "artists"]),
            genres: find(&["genres", "genre"]),
            duration_ms: find(&["duration_ms", "duration (ms)"]),
        })
    }

    fn read_row(&self, record: &StringRecord) -> Option<RawRow> {
        let text = |index: usize| record.get(index).map(str::trim).filter(|s| !s.is_empty());
        let optional_text = |index: Option<usize>| index.and_then(text).map(str::to_string);
        let number = |index: usize| text(index).and_then(|s| s.parse::<f64>().ok()).filter(|v| v.is_finite());
        let optional_number = |index: Option<usize>| index.and_then(number);

        let id = text(self.id)?.to_string();
        let genres = optional_text(self.genres)
            .map(|raw| {
                raw.split(|c: char| c == ';' || c == '|')
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Some(RawRow {
            id,
            title: optional_text(self.title),
            artist: optional_text(self.artist),
            tempo: number(self.tempo),
            energy: number(self.energy),
            valence: number(self.valence),
            danceability: number(self.danceability),
            acousticness: optional_number(self.acousticness),
            instrumentalness: optional_number(self.instrumentalness),
            liveness: optional_number(self.liveness),
            speechiness: optional_number(self.speechiness),
            loudness: optional_number(self.loudness),
            genres,
            duration_ms: optional_number(self.duration_ms)
                .filter(|ms| *ms >= 0.0)
                .map(|ms| ms.round() as u64),
        })
    }
}

/// A dataset row before defaults are applied.
struct RawRow {
    id: String,
    title: Option<String>,
    artist: Option<String>,
    tempo: Option<f64>,
    energy: Option<f64>,
    valence: Option<f64>,
    danceability: Option<f64>,
    acousticness: Option<f64>,
    instrumentalness: Option<f64>,
    liveness: Option<f64>,
    speechiness: Option<f64>,
    loudness: Option<f64>,
    genres: Vec<String>,
    duration_ms: Option<u64>,
}

impl RawRow {
    fn into_track(self, fill_tempo: f64) -> Track {
        let defaults = AudioFeatures::default();
        Track {
            id: self.id,
            title: self.title,
            artist: self.artist,
            features: AudioFeatures {
                tempo: self.tempo.unwrap_or(fill_tempo),
                energy: self.energy.unwrap_or(defaults.energy),
                valence: self.valence.unwrap_or(defaults.valence),
                danceability: self.danceability.unwrap_or(defaults.danceability),
                acousticness: self.acousticness.unwrap_or(defaults.acousticness),
                instrumentalness: self.instrumentalness.unwrap_or(defaults.instrumentalness),
                liveness: self.liveness.unwrap_or(defaults.liveness),
                speechiness: self.speechiness.unwrap_or(defaults.speechiness),
                loudness: self.loudness.unwrap_or(defaults.loudness),
            },
            genres: self.genres,
            duration_ms: self.duration_ms,
        }
    }
}
