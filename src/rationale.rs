//! Rationale Generator: one short explanation per selected track.
//!
//! The text service only ever sees the parsed tags, the component scores and
//! the display title/artist, so its answer has nothing else to lean on. The
//! answer is still checked: empty text or soundtrack claims fall through to
//! [`template_rationale`], which is built purely from the score breakdown.

use crate::algorithm::{Component, ScoredTrack};
use crate::llm::{CompletionOptions, Deadline, TextService};
use crate::mood::{contains_factual_claim, MoodTags, Setting, TimeOfDay, Weather};
use log::{debug, warn};
use serde_json::{json, Value};
use std::sync::Arc;

/// Word cap for a rationale.
pub const MAX_RATIONALE_WORDS: usize = 25;
/// Components at or above this fit count as "strong" in the template.
const STRONG_COMPONENT: f64 = 0.6;

const SYSTEM_PROMPT: &str = "\
You explain in one sentence why a track fits a listener's mood.
Use only the mood tags, component scores, title and artist you are given.
Do not mention films, soundtracks, composers, charts or any fact about the track.
Keep it under 25 words. Return ONLY JSON: {\"rationale\": \"...\"}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rationale {
    pub text: String,
    pub fallback_used: bool,
}

impl Rationale {
    /// Template text for `scored`, marked as a fallback.
    #[must_use]
    pub fn template(tags: &MoodTags, scored: &ScoredTrack<'_>) -> Self {
        Self {
            text: template_rationale(tags, scored),
            fallback_used: true,
        }
    }
}

pub struct RationaleGenerator {
    service: Arc<dyn TextService>,
    options: CompletionOptions,
}

impl RationaleGenerator {
    pub fn new(service: Arc<dyn TextService>, options: CompletionOptions) -> Self {
        Self { service, options }
    }

    pub fn generate(&self, tags: &MoodTags, scored: &ScoredTrack<'_>, title: &str, artist: &str) -> Rationale {
        self.generate_before(tags, scored, title, artist, &Deadline::after(self.options.timeout))
    }

    /// Like [`RationaleGenerator::generate`], but the service is only asked
    /// while `deadline` has time left.
    pub fn generate_before(
        &self,
        tags: &MoodTags,
        scored: &ScoredTrack<'_>,
        title: &str,
        artist: &str,
        deadline: &Deadline,
    ) -> Rationale {
        let Some(options) = self.options.within(deadline) else {
            debug!("Request deadline passed, template rationale for {}", scored.track.id);
            return Rationale::template(tags, scored);
        };

        let payload = json!({
            "title": title,
            "artist": artist,
            "mood_tags": tags,
            "score": scored.score,
            "components": scored.breakdown,
        });

        let answer = self
            .service
            .complete_json(SYSTEM_PROMPT, &payload.to_string(), &options)
            .map_err(|err| err.to_string())
            .and_then(|value| validate_rationale(&value));

        match answer {
            Ok(text) => {
                debug!("Rationale for {} via {}", scored.track.id, self.service.name());
                Rationale { text, fallback_used: false }
            }
            Err(reason) => {
                warn!("Template rationale for {}: {reason}", scored.track.id);
                Rationale::template(tags, scored)
            }
        }
    }
}

/// Accept `{"rationale": "..."}` with non-empty, claim-free text, cut to
/// [`MAX_RATIONALE_WORDS`] words.
fn validate_rationale(value: &Value) -> Result<String, String> {
    let text = value
        .get("rationale")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| "missing rationale text".to_string())?;

    if contains_factual_claim(text) {
        return Err("rationale makes a factual claim".to_string());
    }

    Ok(truncate_words(text, MAX_RATIONALE_WORDS))
}

fn truncate_words(text: &str, max_words: usize) -> String {
    text.split_whitespace().take(max_words).collect::<Vec<_>>().join(" ")
}

/// Deterministic explanation from the two strongest components at or above
/// 0.6, or the single strongest one when none qualifies.
#[must_use]
pub fn template_rationale(tags: &MoodTags, scored: &ScoredTrack<'_>) -> String {
    let mut components = scored.breakdown.components();
    components.sort_by(|a, b| b.1.total_cmp(&a.1));

    let strong: Vec<_> = components
        .iter()
        .filter(|(_, value)| *value >= STRONG_COMPONENT)
        .take(2)
        .collect();
    let chosen = if strong.is_empty() {
        components.iter().take(1).collect()
    } else {
        strong
    };

    let phrases: Vec<String> = chosen
        .iter()
        .map(|(component, value)| describe(*component, *value, tags, scored))
        .collect();

    let mut text = phrases.join(", ");
    if let Some(first) = text.get(..1) {
        text = first.to_uppercase() + &text[1..];
    }
    text
}

fn describe(component: Component, value: f64, tags: &MoodTags, scored: &ScoredTrack<'_>) -> String {
    let features = &scored.track.features;
    match component {
        Component::Tempo if value >= 1.0 => format!(
            "tempo of {:.0} BPM sits in the {}-{} BPM range",
            features.tempo, tags.tempo.bpm_min, tags.tempo.bpm_max
        ),
        Component::Tempo => format!(
            "tempo of {:.0} BPM near the {}-{} BPM range",
            features.tempo, tags.tempo.bpm_min, tags.tempo.bpm_max
        ),
        Component::Energy => format!("{} energy match", level(features.energy)),
        Component::Valence => {
            let feel = if features.valence >= 0.65 {
                "upbeat"
            } else if features.valence >= 0.35 {
                "balanced"
            } else {
                "moody"
            };
            format!("{feel} feel")
        }
        Component::Overlap => {
            let matched = tags
                .genres
                .iter()
                .find(|genre| scored.track.genres.iter().any(|label| label.contains(genre.as_str())));
            match matched {
                Some(genre) => format!("{genre} character"),
                None => "matching sound palette".to_string(),
            }
        }
        Component::Context => {
            let mut parts = Vec::new();
            if tags.weather != Weather::Any {
                parts.push(tags.weather.as_str());
            }
            if tags.time_of_day != TimeOfDay::Any {
                parts.push(tags.time_of_day.as_str());
            }
            if tags.setting != Setting::Unspecified {
                parts.push(tags.setting.as_str());
            }
            format!("suits a {} mood", parts.join(" "))
        }
    }
}

fn level(value: f64) -> &'static str {
    if value < 0.35 {
        "low"
    } else if value < 0.65 {
        "medium"
    } else {
        "high"
    }
}
