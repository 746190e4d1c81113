//! Mood Parser: free text → [`MoodTags`].
//!
//! The text service is asked for a constrained JSON object. Whatever comes
//! back is untrusted: [`repair_tags`] validates it into a [`MoodTags`] or
//! rejects it with a [`SchemaError`]. Any service failure or schema failure
//! takes the deterministic [`keyword_parse`] branch, so a parse always
//! produces tags.

use crate::llm::{CompletionOptions, Deadline, ServiceError, TextService};
use crate::mood::{
    label_set, vibe_list, MoodOverrides, MoodTags, Setting, TempoRange, TimeOfDay, Weather,
    DEFAULT_MAX_VIBES, MAX_BPM,
};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

const SYSTEM_PROMPT: &str = "\
You turn a listener's mood description into compact JSON with exactly these fields:
valence (low/neutral/high), energy (low/medium/high), tempo_bpm ([min, max]),
genres (<=5), instruments (<=5), setting (indoor/outdoor/travel/party/work),
time_of_day (morning/afternoon/evening/night), weather (sunny/cloudy/rainy/snowy/stormy),
movie_vibes (<=5 short abstract noun phrases describing atmosphere).
Use null for anything the text does not imply. Never name films, soundtracks,
composers or songs. Return ONLY the JSON object.";

/// Why a service answer could not be turned into [`MoodTags`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    #[error("expected a JSON object")]
    NotAnObject,

    #[error("none of the mood fields were present")]
    NoRecognizedFields,
}

/// Result of one parse, with enough detail for the response's debug block.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub tags: MoodTags,
    /// Service payload, when one was received.
    pub raw: Option<Value>,
    pub fallback_used: bool,
    /// Set when the service itself failed, as opposed to a bad answer.
    pub service_error: Option<ServiceError>,
    pub notes: Vec<String>,
}

pub struct MoodParser {
    service: Arc<dyn TextService>,
    options: CompletionOptions,
    max_vibes: usize,
}

impl MoodParser {
    pub fn new(service: Arc<dyn TextService>, options: CompletionOptions) -> Self {
        Self {
            service,
            options,
            max_vibes: DEFAULT_MAX_VIBES,
        }
    }

    #[must_use]
    pub fn with_max_vibes(mut self, max_vibes: usize) -> Self {
        self.max_vibes = max_vibes;
        self
    }

    /// Parse `mood` (plus an optional movie-vibe reference) and lay any
    /// overrides on top.
    pub fn parse(
        &self,
        mood: &str,
        movie_vibe: Option<&str>,
        overrides: Option<&MoodOverrides>,
    ) -> ParseOutcome {
        self.parse_before(mood, movie_vibe, overrides, &Deadline::after(self.options.timeout))
    }

    /// Like [`MoodParser::parse`], but the service call only gets whatever
    /// is left of `deadline`.
    pub fn parse_before(
        &self,
        mood: &str,
        movie_vibe: Option<&str>,
        overrides: Option<&MoodOverrides>,
        deadline: &Deadline,
    ) -> ParseOutcome {
        let user_prompt = match movie_vibe {
            Some(vibe) if !vibe.trim().is_empty() => {
                format!("Mood: {mood}\nMovie vibe reference: {}", vibe.trim())
            }
            _ => format!("Mood: {mood}"),
        };

        let answer = match self.options.within(deadline) {
            Some(options) => self.service.complete_json(SYSTEM_PROMPT, &user_prompt, &options),
            None => Err(ServiceError::Timeout),
        };

        let mut outcome = match answer {
            Ok(value) => match repair_tags(&value, self.max_vibes) {
                Ok((tags, notes)) => {
                    debug!("Parsed mood via {} ({} repair notes)", self.service.name(), notes.len());
                    ParseOutcome {
                        tags,
                        raw: Some(value),
                        fallback_used: false,
                        service_error: None,
                        notes,
                    }
                }
                Err(err) => {
                    warn!("Discarding {} answer ({err}), using keyword parser", self.service.name());
                    self.fallback(mood, movie_vibe, Some(value), format!("schema: {err}"))
                }
            },
            Err(err) => {
                warn!("Text service {} failed ({err}), using keyword parser", self.service.name());
                let mut outcome = self.fallback(mood, movie_vibe, None, format_service_note(&err));
                outcome.service_error = Some(err);
                outcome
            }
        };

        if let Some(overrides) = overrides.filter(|o| !o.is_empty()) {
            outcome.tags = overrides.apply(&outcome.tags, self.max_vibes);
            outcome.notes.push("overrides applied".to_string());
        }

        outcome
    }

    fn fallback(&self, mood: &str, movie_vibe: Option<&str>, raw: Option<Value>, reason: String) -> ParseOutcome {
        ParseOutcome {
            tags: keyword_parse(mood, movie_vibe, self.max_vibes),
            raw,
            fallback_used: true,
            service_error: None,
            notes: vec![format!("mood parse fallback: {reason}")],
        }
    }
}

fn format_service_note(err: &ServiceError) -> String {
    match err {
        ServiceError::Unavailable => "text service unavailable".to_string(),
        other => format!("text service error: {other}"),
    }
}

/// Validate an untyped service answer into [`MoodTags`].
///
/// Out-of-range numbers are clamped, unrecognized enum labels fall back to
/// the default variant, and every such repair is reported in the returned
/// notes.
///
/// # Errors
///
/// [`SchemaError`] when `value` is not an object or carries none of the
/// expected fields.
pub fn repair_tags(value: &Value, max_vibes: usize) -> Result<(MoodTags, Vec<String>), SchemaError> {
    const FIELDS: &[&str] = &[
        "valence", "energy", "tempo_bpm", "genres", "instruments", "setting", "time_of_day",
        "weather", "movie_vibes",
    ];

    let object = value.as_object().ok_or(SchemaError::NotAnObject)?;
    if !FIELDS.iter().any(|field| object.get(*field).is_some_and(|v| !v.is_null())) {
        return Err(SchemaError::NoRecognizedFields);
    }

    let mut notes = Vec::new();
    let defaults = MoodTags::default();

    let valence = match object.get("valence") {
        None | Some(Value::Null) => defaults.valence,
        Some(raw) => parse_level(raw, valence_label).unwrap_or_else(|| {
            notes.push(format!("discarded valence {raw}"));
            defaults.valence
        }),
    };
    let energy = match object.get("energy") {
        None | Some(Value::Null) => defaults.energy,
        Some(raw) => parse_level(raw, energy_label).unwrap_or_else(|| {
            notes.push(format!("discarded energy {raw}"));
            defaults.energy
        }),
    };

    let tempo = match object.get("tempo_bpm") {
        None | Some(Value::Null) => TempoRange::for_energy(energy),
        Some(raw) => parse_tempo(raw).unwrap_or_else(|| {
            notes.push(format!("discarded tempo_bpm {raw}"));
            TempoRange::for_energy(energy)
        }),
    };

    let setting = repair_enum(object, "setting", Setting::from_label, &mut notes);
    let time_of_day = repair_enum(object, "time_of_day", TimeOfDay::from_label, &mut notes);
    let weather = repair_enum(object, "weather", Weather::from_label, &mut notes);

    let raw_vibes = string_list(object.get("movie_vibes"));
    let vibes = vibe_list(&raw_vibes, max_vibes);
    if vibes.len() < raw_vibes.len().min(max_vibes) {
        notes.push(format!(
            "dropped {} movie vibe descriptor(s)",
            raw_vibes.len().min(max_vibes) - vibes.len()
        ));
    }

    let tags = MoodTags {
        valence,
        energy,
        tempo,
        genres: label_set(string_list(object.get("genres"))),
        instruments: label_set(string_list(object.get("instruments"))),
        setting,
        time_of_day,
        weather,
        vibes,
    }
    .normalized(max_vibes);

    Ok((tags, notes))
}

fn parse_level(raw: &Value, label: fn(&str) -> Option<f64>) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .or_else(|| label(&s.trim().to_lowercase())),
        _ => None,
    }
}

fn valence_label(label: &str) -> Option<f64> {
    match label {
        "low" | "negative" | "sad" | "dark" => Some(-0.6),
        "neutral" | "medium" | "mid" | "mixed" => Some(0.0),
        "high" | "positive" | "happy" | "bright" => Some(0.6),
        _ => None,
    }
}

/// Midpoints of the low (0-0.4), medium (0.35-0.7) and high (0.65-1.0) bands.
fn energy_label(label: &str) -> Option<f64> {
    match label {
        "low" | "calm" => Some(0.2),
        "medium" | "mid" | "moderate" | "neutral" => Some(0.525),
        "high" | "intense" => Some(0.825),
        _ => None,
    }
}

fn parse_tempo(raw: &Value) -> Option<TempoRange> {
    // Capped at MAX_BPM so the offsets below stay in range.
    let bpm = |v: &Value| {
        v.as_f64()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n.round().min(f64::from(MAX_BPM)) as u32)
    };

    match raw {
        Value::Array(items) if items.len() == 2 => Some(TempoRange::new(bpm(&items[0])?, bpm(&items[1])?)),
        Value::Object(map) => {
            let lo = map.get("min").or_else(|| map.get("bpm_min")).and_then(bpm)?;
            let hi = map.get("max").or_else(|| map.get("bpm_max")).and_then(bpm)?;
            Some(TempoRange::new(lo, hi))
        }
        Value::Number(_) => {
            let center = bpm(raw)?;
            Some(TempoRange::new(center.saturating_sub(10), center.saturating_add(10)))
        }
        _ => None,
    }
}

fn repair_enum<T: Default>(
    object: &Map<String, Value>,
    field: &str,
    from_label: fn(&str) -> Option<T>,
    notes: &mut Vec<String>,
) -> T {
    match object.get(field) {
        None | Some(Value::Null) => T::default(),
        Some(Value::String(label)) if label.trim().is_empty() => T::default(),
        Some(Value::String(label)) => from_label(label).unwrap_or_else(|| {
            notes.push(format!("discarded {field} '{label}'"));
            T::default()
        }),
        Some(other) => {
            notes.push(format!("discarded {field} {other}"));
            T::default()
        }
    }
}

/// Accept either a JSON array of strings or one comma-separated string.
fn string_list(raw: Option<&Value>) -> Vec<String> {
    match raw {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s.split(',').map(|part| part.trim().to_string()).collect(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, Copy)]
enum TagEffect {
    Valence(f64),
    Energy(f64),
    Tempo(u32, u32),
    Genre(&'static str),
    Instrument(&'static str),
}

use TagEffect::{Energy, Genre, Instrument, Tempo, Valence};

/// Word → effect rules for the keyword parser. A word may appear on several
/// rows; every matching row applies.
const RULES: &[(&str, TagEffect)] = &[
    // valence
    ("happy", Valence(0.5)),
    ("joyful", Valence(0.6)),
    ("cheerful", Valence(0.5)),
    ("upbeat", Valence(0.4)),
    ("bright", Valence(0.3)),
    ("hopeful", Valence(0.3)),
    ("romantic", Valence(0.2)),
    ("uplifting", Valence(0.5)),
    ("sad", Valence(-0.6)),
    ("melancholy", Valence(-0.5)),
    ("melancholic", Valence(-0.5)),
    ("gloomy", Valence(-0.5)),
    ("dark", Valence(-0.4)),
    ("lonely", Valence(-0.5)),
    ("heartbroken", Valence(-0.7)),
    ("angry", Valence(-0.3)),
    ("moody", Valence(-0.2)),
    ("nostalgic", Valence(-0.1)),
    // energy
    ("chill", Energy(-0.25)),
    ("relaxed", Energy(-0.25)),
    ("relaxing", Energy(-0.25)),
    ("calm", Energy(-0.3)),
    ("peaceful", Energy(-0.3)),
    ("sleepy", Energy(-0.35)),
    ("mellow", Energy(-0.2)),
    ("cozy", Energy(-0.15)),
    ("lazy", Energy(-0.2)),
    ("tired", Energy(-0.25)),
    ("rain", Energy(-0.1)),
    ("rainy", Energy(-0.1)),
    ("focus", Energy(-0.1)),
    ("upbeat", Energy(0.2)),
    ("energetic", Energy(0.35)),
    ("excited", Energy(0.3)),
    ("hype", Energy(0.4)),
    ("pumped", Energy(0.4)),
    ("intense", Energy(0.3)),
    ("angry", Energy(0.25)),
    ("workout", Energy(0.35)),
    ("running", Energy(0.35)),
    ("dance", Energy(0.25)),
    ("party", Energy(0.3)),
    // tempo
    ("sleepy", Tempo(55, 80)),
    ("chill", Tempo(70, 100)),
    ("relaxed", Tempo(70, 100)),
    ("calm", Tempo(60, 95)),
    ("dance", Tempo(115, 130)),
    ("party", Tempo(115, 135)),
    ("hype", Tempo(125, 150)),
    ("workout", Tempo(125, 160)),
    ("running", Tempo(150, 180)),
    // genres
    ("jazz", Genre("jazz")),
    ("jazzy", Genre("jazz")),
    ("lofi", Genre("lo-fi")),
    ("lo-fi", Genre("lo-fi")),
    ("ambient", Genre("ambient")),
    ("classical", Genre("classical")),
    ("rock", Genre("rock")),
    ("metal", Genre("metal")),
    ("hiphop", Genre("hip hop")),
    ("hip-hop", Genre("hip hop")),
    ("rap", Genre("hip hop")),
    ("electronic", Genre("electronic")),
    ("edm", Genre("electronic")),
    ("house", Genre("house")),
    ("techno", Genre("techno")),
    ("folk", Genre("folk")),
    ("indie", Genre("indie")),
    ("pop", Genre("pop")),
    ("rnb", Genre("r&b")),
    ("soul", Genre("soul")),
    ("blues", Genre("blues")),
    ("country", Genre("country")),
    ("reggae", Genre("reggae")),
    ("synthwave", Genre("synthwave")),
    // instruments
    ("piano", Instrument("piano")),
    ("guitar", Instrument("guitar")),
    ("acoustic", Instrument("acoustic guitar")),
    ("strings", Instrument("strings")),
    ("violin", Instrument("violin")),
    ("cello", Instrument("cello")),
    ("synth", Instrument("synth")),
    ("synths", Instrument("synth")),
    ("drums", Instrument("drums")),
    ("sax", Instrument("saxophone")),
    ("saxophone", Instrument("saxophone")),
    ("trumpet", Instrument("trumpet")),
    ("vocals", Instrument("vocals")),
    ("bass", Instrument("bass")),
];

/// Deterministic rule-table parse used whenever the text service cannot be.
///
/// The same input always yields the same [`MoodTags`], down to the bytes of
/// its serialized form.
#[must_use]
pub fn keyword_parse(mood: &str, movie_vibe: Option<&str>, max_vibes: usize) -> MoodTags {
    let text = match movie_vibe {
        Some(vibe) => format!("{mood} {vibe}"),
        None => mood.to_string(),
    };
    let normalized: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { ' ' })
        .collect();
    let words: Vec<&str> = normalized.split_whitespace().collect();

    let mut tags = MoodTags::default();
    let mut tempo_ranges: Vec<(u32, u32)> = Vec::new();
    let mut genres: Vec<&str> = Vec::new();
    let mut instruments: Vec<&str> = Vec::new();

    for word in &words {
        for (_, effect) in RULES.iter().filter(|(key, _)| key == word) {
            match *effect {
                Valence(delta) => tags.valence += delta,
                Energy(delta) => tags.energy += delta,
                Tempo(lo, hi) => tempo_ranges.push((lo, hi)),
                Genre(genre) => genres.push(genre),
                Instrument(instrument) => instruments.push(instrument),
            }
        }
    }

    tags.energy = tags.energy.clamp(0.0, 1.0);
    tags.tempo = if tempo_ranges.is_empty() {
        TempoRange::for_energy(tags.energy)
    } else {
        let count = tempo_ranges.len() as u32;
        let lo = tempo_ranges.iter().map(|(lo, _)| lo).sum::<u32>() / count;
        let hi = tempo_ranges.iter().map(|(_, hi)| hi).sum::<u32>() / count;
        TempoRange::new(lo, hi)
    };
    tags.genres = label_set(genres);
    tags.instruments = label_set(instruments);

    let joined = words.join(" ");
    tags.setting = Setting::from_label(&joined).unwrap_or_default();
    tags.time_of_day = TimeOfDay::from_label(&joined).unwrap_or_default();
    tags.weather = Weather::from_label(&joined).unwrap_or_default();

    if let Some(vibe) = movie_vibe {
        tags.vibes = vibe_list(vibe.split(&[',', ';'][..]), max_vibes);
    }

    info!(
        "Keyword parse: valence {:.2}, energy {:.2}, tempo {}-{}",
        tags.valence, tags.energy, tags.tempo.bpm_min, tags.tempo.bpm_max
    );
    tags.normalized(max_vibes)
}
