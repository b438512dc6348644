//! Strategic memory tiers.
//!
//! Principles, lessons, and goals carry a tier overlay that the sleep
//! worker's DMN phase promotes: tentative → candidate → proven → identity.
//! Promotion is monotone within a cycle; identity is terminal.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position in the promotion ladder. Ordered so "promotion only" can be
/// checked with `>=`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum StrategicTier {
    #[default]
    Tentative,
    Candidate,
    Proven,
    Identity,
}

impl StrategicTier {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategicTier::Tentative => "tentative",
            StrategicTier::Candidate => "candidate",
            StrategicTier::Proven => "proven",
            StrategicTier::Identity => "identity",
        }
    }

    pub fn parse(s: &str) -> Option<StrategicTier> {
        match s.trim().to_lowercase().as_str() {
            "tentative" => Some(StrategicTier::Tentative),
            "candidate" => Some(StrategicTier::Candidate),
            "proven" => Some(StrategicTier::Proven),
            "identity" => Some(StrategicTier::Identity),
            _ => None,
        }
    }
}

/// Minimal projection of a strategic cell plus its overlay counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategicMemory {
    pub id: Uuid,
    pub principle: String,
    pub tier: StrategicTier,
    pub apply_count: u64,
    pub success_rate: f32,
    pub source_sessions: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

/// The highest tier this memory currently qualifies for:
///
/// - candidate: applied ≥ 3 times
/// - proven: applied ≥ 10 times with success rate ≥ 0.80
/// - identity: applied ≥ 25 times, success rate ≥ 0.90, ≥ 5 distinct source
///   sessions, and at least 30 days old
///
/// The result never demotes: the memory's existing tier is the floor.
pub fn eligible_tier(memory: &StrategicMemory, now: DateTime<Utc>) -> StrategicTier {
    let age = now - memory.created_at;
    let mut eligible = StrategicTier::Tentative;
    if memory.apply_count >= 3 {
        eligible = StrategicTier::Candidate;
    }
    if memory.apply_count >= 10 && memory.success_rate >= 0.80 {
        eligible = StrategicTier::Proven;
    }
    if memory.apply_count >= 25
        && memory.success_rate >= 0.90
        && memory.source_sessions.len() >= 5
        && age >= Duration::days(30)
    {
        eligible = StrategicTier::Identity;
    }
    eligible.max(memory.tier)
}

// ── Tests ────────────────────────────────────────────────────────────────────
