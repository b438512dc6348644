//! Sleep phase 1: consolidation.
//!
//! Works over the memory cells recorded since the last sleep: usage
//! patterns (type frequency, hourly activity peaks), emotion signatures,
//! outcome scores, and inferred presentation preferences.

use std::collections::BTreeMap;

use chrono::Timelike;
use serde::{Deserialize, Serialize};
use tracing::debug;

use noema_memory::MemCell;
use noema_memory::language::{
    CONFUSION_KEYWORDS, FRUSTRATION_KEYWORDS, SATISFACTION_KEYWORDS,
};

/// A recurring behaviour worth remembering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsagePattern {
    pub kind: String,
    pub detail: String,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Frustration,
    Satisfaction,
    Confusion,
}

impl Emotion {
    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Frustration => "frustration",
            Emotion::Satisfaction => "satisfaction",
            Emotion::Confusion => "confusion",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionSignature {
    pub emotion: Emotion,
    /// Aggregated intensity in [0.6, 0.8].
    pub intensity: f32,
    pub occurrences: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OutcomeScore {
    pub successes: usize,
    pub failures: usize,
    pub neutral: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferredPreference {
    pub kind: String,
    pub evidence: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Consolidation {
    pub interactions: usize,
    pub patterns: Vec<UsagePattern>,
    pub emotions: Vec<EmotionSignature>,
    pub outcomes: OutcomeScore,
    pub preferences: Vec<InferredPreference>,
}

/// Minimum repeats before a frequency counts as a pattern.
const PATTERN_MIN_FREQUENCY: usize = 3;

pub fn consolidate(cells: &[MemCell]) -> Consolidation {
    let mut result = Consolidation {
        interactions: cells.len(),
        ..Consolidation::default()
    };

    // Per-type frequency.
    let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
    for cell in cells {
        *by_type.entry(cell.memory_type.as_str()).or_default() += 1;
    }
    for (type_name, count) in by_type {
        if count >= PATTERN_MIN_FREQUENCY {
            result.patterns.push(UsagePattern {
                kind: "frequent_type".to_string(),
                detail: type_name.to_string(),
                count,
            });
        }
    }

    // Hourly activity buckets; peaks become patterns.
    let mut by_hour: BTreeMap<u32, usize> = BTreeMap::new();
    for cell in cells {
        *by_hour.entry(cell.created_at.hour()).or_default() += 1;
    }
    if let Some((&peak_hour, &peak_count)) = by_hour.iter().max_by_key(|(_, c)| **c) {
        if peak_count >= PATTERN_MIN_FREQUENCY {
            result.patterns.push(UsagePattern {
                kind: "active_hour".to_string(),
                detail: format!("{peak_hour:02}:00"),
                count: peak_count,
            });
        }
    }

    // Emotion signatures: keyword hits yield intensity 0.6–0.8, then
    // aggregate by emotion.
    let mut emotion_hits: BTreeMap<Emotion, (f32, usize)> = BTreeMap::new();
    for cell in cells {
        let lower = cell.content.to_lowercase();
        for (emotion, keywords) in [
            (Emotion::Frustration, FRUSTRATION_KEYWORDS),
            (Emotion::Satisfaction, SATISFACTION_KEYWORDS),
            (Emotion::Confusion, CONFUSION_KEYWORDS),
        ] {
            let hits = keywords.iter().filter(|k| lower.contains(*k)).count();
            if hits > 0 {
                let intensity = (0.6 + hits as f32 * 0.05).min(0.8);
                let entry = emotion_hits.entry(emotion).or_insert((0.0, 0));
                entry.0 += intensity;
                entry.1 += 1;
            }
        }
    }
    for (emotion, (intensity_sum, occurrences)) in emotion_hits {
        result.emotions.push(EmotionSignature {
            emotion,
            intensity: intensity_sum / occurrences as f32,
            occurrences,
        });
    }

    // Outcome scoring: explicit feedback first, sentiment heuristics after.
    for cell in cells {
        let lower = cell.content.to_lowercase();
        if explicit_success(&lower) {
            result.outcomes.successes += 1;
        } else if explicit_failure(&lower) {
            result.outcomes.failures += 1;
        } else if cell.sentiment > 0.3 {
            result.outcomes.successes += 1;
        } else if cell.sentiment < -0.3 {
            result.outcomes.failures += 1;
        } else {
            result.outcomes.neutral += 1;
        }
    }

    // Presentation preferences.
    let short_requests = cells
        .iter()
        .filter(|c| {
            let lower = c.content.to_lowercase();
            ["shorter", "more concise", "too long", "briefer", "tl;dr"]
                .iter()
                .any(|p| lower.contains(p))
        })
        .count();
    if short_requests > 0 {
        result.preferences.push(InferredPreference {
            kind: "shorter_responses".to_string(),
            evidence: short_requests,
        });
    }
    let example_requests = cells
        .iter()
        .filter(|c| {
            let lower = c.content.to_lowercase();
            ["show me code", "code example", "with an example", "sample code"]
                .iter()
                .any(|p| lower.contains(p))
        })
        .count();
    if example_requests > 0 {
        result.preferences.push(InferredPreference {
            kind: "code_examples".to_string(),
            evidence: example_requests,
        });
    }

    debug!(
        interactions = result.interactions,
        patterns = result.patterns.len(),
        emotions = result.emotions.len(),
        "consolidation complete"
    );
    result
}

fn explicit_success(lower: &str) -> bool {
    ["that worked", "works now", "perfect, thanks", "exactly what i wanted"]
        .iter()
        .any(|p| lower.contains(p))
}

fn explicit_failure(lower: &str) -> bool {
    ["that's wrong", "didn't work", "not what i asked", "still broken"]
        .iter()
        .any(|p| lower.contains(p))
}

// ── Tests ────────────────────────────────────────────────────────────────────
