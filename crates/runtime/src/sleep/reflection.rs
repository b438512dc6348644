//! Sleep phase 2: reflection — turning consolidation data into tagged
//! insight records with evidence, confidence, and the persona traits each
//! one could inform.

use serde::{Deserialize, Serialize};

use super::consolidation::{Consolidation, Emotion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Strength,
    Weakness,
    Opportunity,
    Pattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub summary: String,
    pub evidence: Vec<String>,
    pub confidence: f32,
    /// Persona traits this insight could inform.
    pub informs_traits: Vec<String>,
}

fn confidence_from_count(count: usize) -> f32 {
    (0.5 + count as f32 * 0.1).min(0.95)
}

pub fn reflect(consolidation: &Consolidation) -> Vec<Insight> {
    let mut insights = Vec::new();

    // Outcome balance → strength or weakness.
    let scored = consolidation.outcomes.successes + consolidation.outcomes.failures;
    if scored >= 3 {
        let success_share = consolidation.outcomes.successes as f32 / scored as f32;
        if success_share >= 0.7 {
            insights.push(Insight {
                kind: InsightKind::Strength,
                summary: format!(
                    "{} of {} scored interactions ended well",
                    consolidation.outcomes.successes, scored
                ),
                evidence: vec![format!("successes={}", consolidation.outcomes.successes)],
                confidence: confidence_from_count(consolidation.outcomes.successes),
                informs_traits: vec!["confidence".to_string(), "initiative".to_string()],
            });
        } else if success_share <= 0.4 {
            insights.push(Insight {
                kind: InsightKind::Weakness,
                summary: format!(
                    "{} of {} scored interactions went poorly",
                    consolidation.outcomes.failures, scored
                ),
                evidence: vec![format!("failures={}", consolidation.outcomes.failures)],
                confidence: confidence_from_count(consolidation.outcomes.failures),
                informs_traits: vec!["confidence".to_string()],
            });
        }
    }

    // Emotion signatures.
    for signature in &consolidation.emotions {
        match signature.emotion {
            Emotion::Frustration => insights.push(Insight {
                kind: InsightKind::Weakness,
                summary: format!(
                    "user showed frustration in {} interaction(s)",
                    signature.occurrences
                ),
                evidence: vec![format!("intensity={:.2}", signature.intensity)],
                confidence: confidence_from_count(signature.occurrences),
                informs_traits: vec!["patience".to_string(), "directness".to_string()],
            }),
            Emotion::Confusion => insights.push(Insight {
                kind: InsightKind::Opportunity,
                summary: format!(
                    "user was confused {} time(s) — explanations could be clearer",
                    signature.occurrences
                ),
                evidence: vec![format!("intensity={:.2}", signature.intensity)],
                confidence: confidence_from_count(signature.occurrences),
                informs_traits: vec!["verbosity".to_string(), "formality".to_string()],
            }),
            Emotion::Satisfaction => insights.push(Insight {
                kind: InsightKind::Strength,
                summary: format!(
                    "user expressed satisfaction {} time(s)",
                    signature.occurrences
                ),
                evidence: vec![format!("intensity={:.2}", signature.intensity)],
                confidence: confidence_from_count(signature.occurrences),
                informs_traits: vec!["warmth".to_string()],
            }),
        }
    }

    // Presentation preferences → opportunities.
    for preference in &consolidation.preferences {
        let (summary, traits) = match preference.kind.as_str() {
            "shorter_responses" => (
                format!("user asked for shorter replies {} time(s)", preference.evidence),
                vec!["verbosity".to_string()],
            ),
            "code_examples" => (
                format!("user asked for code examples {} time(s)", preference.evidence),
                vec!["initiative".to_string()],
            ),
            other => (format!("recurring preference: {other}"), vec![]),
        };
        insights.push(Insight {
            kind: InsightKind::Opportunity,
            summary,
            evidence: vec![format!("evidence={}", preference.evidence)],
            confidence: confidence_from_count(preference.evidence),
            informs_traits: traits,
        });
    }

    // Usage patterns stay patterns.
    for pattern in &consolidation.patterns {
        insights.push(Insight {
            kind: InsightKind::Pattern,
            summary: format!("{}: {} (×{})", pattern.kind, pattern.detail, pattern.count),
            evidence: vec![format!("count={}", pattern.count)],
            confidence: confidence_from_count(pattern.count),
            informs_traits: vec![],
        });
    }

    insights
}

// ── Tests ────────────────────────────────────────────────────────────────────
