//! Sleep phase 3: proposal generation.
//!
//! Actionable insights become persona-change proposals: trait adjustments
//! (+0.1 for reinforcing insights, −0.05 for corrective ones, clamped to
//! the configured per-cycle delta) and new learned patterns. Proposals
//! touching immutable traits are discarded; at most five survive per cycle,
//! sorted by confidence.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use noema_config::{LearnedPattern, Persona};

use super::reflection::{Insight, InsightKind};

pub const MAX_PROPOSALS_PER_CYCLE: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposalKind {
    TraitAdjust { trait_name: String, delta: f32 },
    NewPattern { pattern: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalRisk {
    Safe,
    Moderate,
    Significant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub kind: ProposalKind,
    pub rationale: String,
    pub confidence: f32,
    pub risk: ProposalRisk,
}

fn risk_of(kind: &ProposalKind) -> ProposalRisk {
    match kind {
        ProposalKind::NewPattern { .. } => ProposalRisk::Safe,
        ProposalKind::TraitAdjust { delta, .. } => {
            let magnitude = delta.abs();
            if magnitude <= 0.05 {
                ProposalRisk::Safe
            } else if magnitude <= 0.15 {
                ProposalRisk::Moderate
            } else {
                ProposalRisk::Significant
            }
        }
    }
}

pub fn generate(insights: &[Insight], persona: &Persona, max_delta: f32) -> Vec<Proposal> {
    let mut proposals = Vec::new();

    for insight in insights {
        match insight.kind {
            InsightKind::Strength => {
                for trait_name in &insight.informs_traits {
                    push_trait_proposal(&mut proposals, persona, trait_name, 0.1, max_delta, insight);
                }
            }
            InsightKind::Weakness | InsightKind::Opportunity => {
                for trait_name in &insight.informs_traits {
                    push_trait_proposal(
                        &mut proposals,
                        persona,
                        trait_name,
                        -0.05,
                        max_delta,
                        insight,
                    );
                }
            }
            InsightKind::Pattern => {
                proposals.push(Proposal {
                    kind: ProposalKind::NewPattern {
                        pattern: insight.summary.clone(),
                    },
                    rationale: insight.summary.clone(),
                    confidence: insight.confidence,
                    risk: ProposalRisk::Safe,
                });
            }
        }
    }

    proposals.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    proposals.truncate(MAX_PROPOSALS_PER_CYCLE);
    proposals
}

fn push_trait_proposal(
    proposals: &mut Vec<Proposal>,
    persona: &Persona,
    trait_name: &str,
    delta: f32,
    max_delta: f32,
    insight: &Insight,
) {
    if persona
        .boundaries
        .immutable_traits
        .iter()
        .any(|t| t == trait_name)
    {
        debug!(trait_name, "proposal touches immutable trait — discarded");
        return;
    }
    let clamped = delta.clamp(-max_delta, max_delta);
    let kind = ProposalKind::TraitAdjust {
        trait_name: trait_name.to_string(),
        delta: clamped,
    };
    let risk = risk_of(&kind);
    proposals.push(Proposal {
        kind,
        rationale: insight.summary.clone(),
        confidence: insight.confidence,
        risk,
    });
}

/// Apply one proposal to a persona in memory. The caller is responsible for
/// the timestamped backup and the save.
pub fn apply(persona: &mut Persona, proposal: &Proposal) -> anyhow::Result<()> {
    match &proposal.kind {
        ProposalKind::TraitAdjust { trait_name, delta } => {
            let current = persona.get_trait(trait_name).unwrap_or(0.5);
            persona.set_trait(trait_name, current + delta)?;
        }
        ProposalKind::NewPattern { pattern } => {
            persona.learned_patterns.push(LearnedPattern {
                pattern: pattern.clone(),
                confidence: proposal.confidence,
                source: "sleep".to_string(),
                applied_since: Utc::now(),
            });
        }
    }
    persona.version += 1;
    persona.last_updated = Utc::now();
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn insight(kind: InsightKind, traits: &[&str], confidence: f32) -> Insight {
        Insight {
            kind,
            summary: "test insight".to_string(),
            evidence: vec![],
            confidence,
            informs_traits: traits.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn strengths_raise_and_weaknesses_lower_traits() {
        let persona = Persona::default();
        let insights = vec![
            insight(InsightKind::Strength, &["warmth"], 0.9),
            insight(InsightKind::Weakness, &["patience"], 0.8),
        ];
        let proposals = generate(&insights, &persona, 0.1);
        assert_eq!(proposals.len(), 2);

        let raise = proposals
            .iter()
            .find_map(|p| match &p.kind {
                ProposalKind::TraitAdjust { trait_name, delta } if trait_name == "warmth" => {
                    Some(*delta)
                }
                _ => None,
            })
            .unwrap();
        assert!((raise - 0.1).abs() < 1e-6);

        let lower = proposals
            .iter()
            .find_map(|p| match &p.kind {
                ProposalKind::TraitAdjust { trait_name, delta } if trait_name == "patience" => {
                    Some(*delta)
                }
                _ => None,
            })
            .unwrap();
        assert!((lower + 0.05).abs() < 1e-6);
    }

    #[test]
    fn deltas_clamp_to_configured_maximum() {
        let persona = Persona::default();
        let insights = vec![insight(InsightKind::Strength, &["warmth"], 0.9)];
        let proposals = generate(&insights, &persona, 0.05);
        match &proposals[0].kind {
            ProposalKind::TraitAdjust { delta, .. } => assert!((delta - 0.05).abs() < 1e-6),
            _ => panic!("expected trait adjustment"),
        }
    }

    #[test]
    fn risk_classification_by_magnitude() {
        assert_eq!(
            risk_of(&ProposalKind::NewPattern {
                pattern: "x".to_string()
            }),
            ProposalRisk::Safe
        );
        assert_eq!(
            risk_of(&ProposalKind::TraitAdjust {
                trait_name: "warmth".to_string(),
                delta: -0.05
            }),
            ProposalRisk::Safe
        );
        assert_eq!(
            risk_of(&ProposalKind::TraitAdjust {
                trait_name: "warmth".to_string(),
                delta: 0.1
            }),
            ProposalRisk::Moderate
        );
        assert_eq!(
            risk_of(&ProposalKind::TraitAdjust {
                trait_name: "warmth".to_string(),
                delta: 0.2
            }),
            ProposalRisk::Significant
        );
    }

    #[test]
    fn immutable_traits_are_discarded() {
        let mut persona = Persona::default();
        persona.boundaries.immutable_traits = vec!["warmth".to_string()];
        let insights = vec![insight(InsightKind::Strength, &["warmth"], 0.9)];
        let proposals = generate(&insights, &persona, 0.1);
        assert!(proposals.is_empty());
    }

    #[test]
    fn at_most_five_proposals_sorted_by_confidence() {
        let persona = Persona::default();
        let insights: Vec<Insight> = (0..8)
            .map(|i| {
                let mut ins = insight(InsightKind::Pattern, &[], 0.5 + i as f32 * 0.05);
                ins.summary = format!("pattern {i}");
                ins
            })
            .collect();
        let proposals = generate(&insights, &persona, 0.1);
        assert_eq!(proposals.len(), MAX_PROPOSALS_PER_CYCLE);
        for pair in proposals.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }

    #[test]
    fn apply_adjusts_trait_and_bumps_version() -> anyhow::Result<()> {
        let mut persona = Persona::default();
        let proposal = Proposal {
            kind: ProposalKind::TraitAdjust {
                trait_name: "verbosity".to_string(),
                delta: -0.05,
            },
            rationale: "test".to_string(),
            confidence: 0.9,
            risk: ProposalRisk::Safe,
        };
        apply(&mut persona, &proposal)?;
        assert!((persona.get_trait("verbosity").unwrap() - 0.45).abs() < 1e-6);
        assert_eq!(persona.version, 2);

        let pattern = Proposal {
            kind: ProposalKind::NewPattern {
                pattern: "user works late".to_string(),
            },
            rationale: "test".to_string(),
            confidence: 0.7,
            risk: ProposalRisk::Safe,
        };
        apply(&mut persona, &pattern)?;
        assert_eq!(persona.learned_patterns.len(), 1);
        Ok(())
    }
}
