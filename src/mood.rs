//! Structured mood representation.
//!
//! [`MoodTags`] is the preference vector every later stage works from. It is
//! built fresh per request, either from the text service's answer or from the
//! keyword fallback, and is not mutated afterwards: overrides produce a new
//! value through [`MoodOverrides::apply`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Lowest tempo bound a mood may ask for.
pub const MIN_BPM: u32 = 40;
/// Highest tempo bound a mood may ask for.
pub const MAX_BPM: u32 = 220;
/// Cap for the genre and instrument sets.
pub const MAX_LABELS: usize = 5;
/// Default cap for vibe descriptors.
pub const DEFAULT_MAX_VIBES: usize = 5;

const MAX_VIBE_CHARS: usize = 40;
const MAX_VIBE_WORDS: usize = 5;

/// Words that turn a descriptor into a claim about a concrete work.
const FACTUAL_WORDS: &[&str] = &[
    "soundtrack", "ost", "featured", "features", "composed", "composer", "directed",
    "director", "starring", "scored", "theme",
];
const FACTUAL_PHRASES: &[&str] = &["from the", "appears in", "used in", "played in", "is from"];

/// Inclusive BPM window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoRange {
    pub bpm_min: u32,
    pub bpm_max: u32,
}

impl TempoRange {
    /// Build a range, swapping reversed bounds and clamping both into
    /// [`MIN_BPM`]..=[`MAX_BPM`].
    #[must_use]
    pub fn new(a: u32, b: u32) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self {
            bpm_min: lo.clamp(MIN_BPM, MAX_BPM),
            bpm_max: hi.clamp(MIN_BPM, MAX_BPM),
        }
    }

    /// Tempo window implied by an energy level when nothing better is known.
    #[must_use]
    pub fn for_energy(energy: f64) -> Self {
        let energy = energy.clamp(0.0, 1.0);
        let center = 70.0 + 80.0 * energy;
        Self::new((center - 15.0).round() as u32, (center + 15.0).round() as u32)
    }

    #[must_use]
    pub fn contains(&self, bpm: f64) -> bool {
        bpm >= f64::from(self.bpm_min) && bpm <= f64::from(self.bpm_max)
    }

    /// Distance in BPM to the nearest bound, 0 inside the range.
    #[must_use]
    pub fn distance(&self, bpm: f64) -> f64 {
        if bpm < f64::from(self.bpm_min) {
            f64::from(self.bpm_min) - bpm
        } else if bpm > f64::from(self.bpm_max) {
            bpm - f64::from(self.bpm_max)
        } else {
            0.0
        }
    }
}

impl Default for TempoRange {
    fn default() -> Self {
        Self::new(90, 130)
    }
}

/// Match `label` against a synonym table. Exact matches win, then the first
/// table entry whose words all appear in the label in order.
fn match_synonyms<T: Copy>(label: &str, table: &[(&str, T)]) -> Option<T> {
    let label = label.trim().to_lowercase().replace(&['-', '_'][..], " ");
    if label.is_empty() {
        return None;
    }
    if let Some((_, value)) = table.iter().find(|(name, _)| *name == label) {
        return Some(*value);
    }

    let words: Vec<&str> = label.split_whitespace().collect();
    table
        .iter()
        .find(|(name, _)| {
            let needle: Vec<&str> = name.split_whitespace().collect();
            words.windows(needle.len()).any(|window| window == needle.as_slice())
        })
        .map(|(_, value)| *value)
}

/// Where the listening happens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setting {
    #[default]
    Unspecified,
    Indoor,
    Outdoor,
    Travel,
    Party,
    Work,
}

impl Setting {
    const SYNONYMS: &'static [(&'static str, Setting)] = &[
        ("indoor", Setting::Indoor),
        ("indoors", Setting::Indoor),
        ("inside", Setting::Indoor),
        ("home", Setting::Indoor),
        ("bedroom", Setting::Indoor),
        ("cafe", Setting::Indoor),
        ("outdoor", Setting::Outdoor),
        ("outdoors", Setting::Outdoor),
        ("outside", Setting::Outdoor),
        ("park", Setting::Outdoor),
        ("beach", Setting::Outdoor),
        ("hiking", Setting::Outdoor),
        ("travel", Setting::Travel),
        ("road trip", Setting::Travel),
        ("roadtrip", Setting::Travel),
        ("commute", Setting::Travel),
        ("drive", Setting::Travel),
        ("driving", Setting::Travel),
        ("train", Setting::Travel),
        ("flight", Setting::Travel),
        ("party", Setting::Party),
        ("club", Setting::Party),
        ("dance floor", Setting::Party),
        ("celebration", Setting::Party),
        ("work", Setting::Work),
        ("office", Setting::Work),
        ("study", Setting::Work),
        ("studying", Setting::Work),
        ("focus", Setting::Work),
        ("coding", Setting::Work),
    ];

    /// Lenient parse of free text; `None` for anything unrecognized.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match_synonyms(label, Self::SYNONYMS)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Indoor => "indoor",
            Self::Outdoor => "outdoor",
            Self::Travel => "travel",
            Self::Party => "party",
            Self::Work => "work",
        }
    }
}

/// Part of the day the mood belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    #[default]
    Any,
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    const SYNONYMS: &'static [(&'static str, TimeOfDay)] = &[
        ("morning", TimeOfDay::Morning),
        ("sunrise", TimeOfDay::Morning),
        ("dawn", TimeOfDay::Morning),
        ("breakfast", TimeOfDay::Morning),
        ("afternoon", TimeOfDay::Afternoon),
        ("midday", TimeOfDay::Afternoon),
        ("noon", TimeOfDay::Afternoon),
        ("evening", TimeOfDay::Evening),
        ("sunset", TimeOfDay::Evening),
        ("dusk", TimeOfDay::Evening),
        ("night", TimeOfDay::Night),
        ("late night", TimeOfDay::Night),
        ("nighttime", TimeOfDay::Night),
        ("midnight", TimeOfDay::Night),
        ("tonight", TimeOfDay::Night),
    ];

    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match_synonyms(label, Self::SYNONYMS)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Night => "night",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weather {
    #[default]
    Any,
    Sunny,
    Cloudy,
    Rainy,
    Snowy,
    Stormy,
}

impl Weather {
    const SYNONYMS: &'static [(&'static str, Weather)] = &[
        ("sunny", Weather::Sunny),
        ("sun", Weather::Sunny),
        ("sunshine", Weather::Sunny),
        ("clear", Weather::Sunny),
        ("cloudy", Weather::Cloudy),
        ("overcast", Weather::Cloudy),
        ("grey", Weather::Cloudy),
        ("gray", Weather::Cloudy),
        ("foggy", Weather::Cloudy),
        ("fog", Weather::Cloudy),
        ("rainy", Weather::Rainy),
        ("rain", Weather::Rainy),
        ("raining", Weather::Rainy),
        ("drizzle", Weather::Rainy),
        ("showers", Weather::Rainy),
        ("snowy", Weather::Snowy),
        ("snow", Weather::Snowy),
        ("snowing", Weather::Snowy),
        ("blizzard", Weather::Snowy),
        ("stormy", Weather::Stormy),
        ("storm", Weather::Stormy),
        ("thunder", Weather::Stormy),
        ("thunderstorm", Weather::Stormy),
    ];

    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match_synonyms(label, Self::SYNONYMS)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Sunny => "sunny",
            Self::Cloudy => "cloudy",
            Self::Rainy => "rainy",
            Self::Snowy => "snowy",
            Self::Stormy => "stormy",
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Weather {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed mood preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodTags {
    /// -1 (dark) ..= 1 (bright)
    pub valence: f64,
    /// 0 (still) ..= 1 (intense)
    pub energy: f64,
    pub tempo: TempoRange,
    pub genres: BTreeSet<String>,
    pub instruments: BTreeSet<String>,
    pub setting: Setting,
    pub time_of_day: TimeOfDay,
    pub weather: Weather,
    /// Abstract descriptors drawn from the movie-vibe reference.
    pub vibes: Vec<String>,
}

impl Default for MoodTags {
    fn default() -> Self {
        Self {
            valence: 0.0,
            energy: 0.5,
            tempo: TempoRange::default(),
            genres: BTreeSet::new(),
            instruments: BTreeSet::new(),
            setting: Setting::default(),
            time_of_day: TimeOfDay::default(),
            weather: Weather::default(),
            vibes: Vec::new(),
        }
    }
}

impl MoodTags {
    /// Re-establish every range invariant. Applied after construction from
    /// any untrusted source.
    #[must_use]
    pub fn normalized(self, max_vibes: usize) -> Self {
        let valence = if self.valence.is_finite() { self.valence.clamp(-1.0, 1.0) } else { 0.0 };
        let energy = if self.energy.is_finite() { self.energy.clamp(0.0, 1.0) } else { 0.5 };

        Self {
            valence,
            energy,
            tempo: TempoRange::new(self.tempo.bpm_min, self.tempo.bpm_max),
            genres: label_set(self.genres),
            instruments: label_set(self.instruments),
            vibes: vibe_list(self.vibes, max_vibes),
            ..self
        }
    }

    /// Valence mapped onto the 0..1 scale used by audio features.
    #[must_use]
    pub fn valence_unit(&self) -> f64 {
        (self.valence + 1.0) / 2.0
    }

    /// True when setting, time of day and weather are all unspecified.
    #[must_use]
    pub fn has_no_context(&self) -> bool {
        self.setting == Setting::Unspecified
            && self.time_of_day == TimeOfDay::Any
            && self.weather == Weather::Any
    }
}

/// Normalize labels and keep the first [`MAX_LABELS`] distinct ones in input
/// order.
pub fn label_set<I, S>(labels: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set = BTreeSet::new();
    for label in labels {
        if set.len() == MAX_LABELS {
            break;
        }
        let label = label.as_ref().split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        if !label.is_empty() {
            set.insert(label);
        }
    }
    set
}

/// Keep abstract descriptors only, lower-cased and de-duplicated.
pub fn vibe_list<I, S>(vibes: I, max_vibes: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut kept: Vec<String> = Vec::new();
    for vibe in vibes {
        if kept.len() >= max_vibes {
            break;
        }
        let vibe = vibe.as_ref().split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        if is_abstract_descriptor(&vibe) && !kept.contains(&vibe) {
            kept.push(vibe);
        }
    }
    kept
}

/// A short descriptor that makes no claim about a concrete work: no digits,
/// no quotes, no soundtrack vocabulary.
#[must_use]
pub fn is_abstract_descriptor(text: &str) -> bool {
    !text.is_empty()
        && text.chars().count() <= MAX_VIBE_CHARS
        && text.split_whitespace().count() <= MAX_VIBE_WORDS
        && !text.chars().any(|c| c.is_ascii_digit() || matches!(c, '"' | '“' | '”' | '\''))
        && !contains_factual_claim(text)
}

/// Detect soundtrack-fact vocabulary in free text.
#[must_use]
pub fn contains_factual_claim(text: &str) -> bool {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let joined = words.join(" ");

    words.iter().any(|word| FACTUAL_WORDS.contains(word))
        || FACTUAL_PHRASES.iter().any(|phrase| {
            joined == *phrase
                || joined.starts_with(&format!("{phrase} "))
                || joined.contains(&format!(" {phrase} "))
                || joined.ends_with(&format!(" {phrase}"))
        })
}

/// Caller-supplied partial [`MoodTags`]; every present field wins over the
/// parsed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoodOverrides {
    #[serde(default)]
    pub valence: Option<f64>,
    #[serde(default)]
    pub energy: Option<f64>,
    #[serde(default)]
    pub bpm_min: Option<u32>,
    #[serde(default)]
    pub bpm_max: Option<u32>,
    #[serde(default)]
    pub genres: Option<Vec<String>>,
    #[serde(default)]
    pub instruments: Option<Vec<String>>,
    #[serde(default)]
    pub setting: Option<Setting>,
    #[serde(default)]
    pub time_of_day: Option<TimeOfDay>,
    #[serde(default)]
    pub weather: Option<Weather>,
}

impl MoodOverrides {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Produce a new, normalized [`MoodTags`] with the overrides laid on top
    /// of `base`.
    #[must_use]
    pub fn apply(&self, base: &MoodTags, max_vibes: usize) -> MoodTags {
        let tempo = TempoRange::new(
            self.bpm_min.unwrap_or(base.tempo.bpm_min),
            self.bpm_max.unwrap_or(base.tempo.bpm_max),
        );

        MoodTags {
            valence: self.valence.unwrap_or(base.valence),
            energy: self.energy.unwrap_or(base.energy),
            tempo,
            genres: self.genres.as_ref().map_or_else(|| base.genres.clone(), label_set),
            instruments: self
                .instruments
                .as_ref()
                .map_or_else(|| base.instruments.clone(), label_set),
            setting: self.setting.unwrap_or(base.setting),
            time_of_day: self.time_of_day.unwrap_or(base.time_of_day),
            weather: self.weather.unwrap_or(base.weather),
            vibes: base.vibes.clone(),
        }
        .normalized(max_vibes)
    }
}
