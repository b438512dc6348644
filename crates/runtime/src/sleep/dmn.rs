//! Sleep phase 4: the default-mode-network worker.
//!
//! Lower priority, never fatal: aggregates routing outcomes into per-task
//! model rankings and walks strategic memories up the tier ladder. Every
//! error is accumulated in the report instead of aborting the cycle.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use noema_memory::{MemoryStore, StrategicTier, eligible_tier};
use noema_router::{OutcomeTracker, TaskType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRank {
    pub provider: String,
    pub model: String,
    pub success_rate: f32,
    pub avg_latency_ms: f64,
    pub samples: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierPromotion {
    pub cell_id: Uuid,
    pub from: StrategicTier,
    pub to: StrategicTier,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DmnReport {
    /// Task type → models ranked best-first.
    pub rankings: BTreeMap<String, Vec<ModelRank>>,
    pub promotions: Vec<TierPromotion>,
    pub errors: Vec<String>,
}

/// Rank models per task type: success rate descending, average latency
/// ascending as the tie-break. Entries under `min_samples` are excluded.
pub fn aggregate_outcomes(
    tracker: &OutcomeTracker,
    min_samples: u64,
) -> BTreeMap<String, Vec<ModelRank>> {
    let snapshot = tracker.snapshot();
    let mut by_task: BTreeMap<TaskType, Vec<ModelRank>> = BTreeMap::new();

    for (key, stats) in snapshot {
        if stats.sample_count < min_samples {
            continue;
        }
        by_task.entry(key.task_type).or_default().push(ModelRank {
            provider: key.provider,
            model: key.model,
            success_rate: stats.success_rate(),
            avg_latency_ms: stats.avg_latency_ms(),
            samples: stats.sample_count,
        });
    }

    let mut rankings = BTreeMap::new();
    for (task, mut ranks) in by_task {
        ranks.sort_by(|a, b| {
            b.success_rate
                .total_cmp(&a.success_rate)
                .then(a.avg_latency_ms.total_cmp(&b.avg_latency_ms))
        });
        rankings.insert(task.as_str().to_string(), ranks);
    }
    rankings
}

/// Walk every strategic memory and persist any tier it now qualifies for.
/// Identity is terminal; promotion is monotone within the cycle.
pub fn promote_tiers(store: &MemoryStore) -> anyhow::Result<Vec<TierPromotion>> {
    let now = Utc::now();
    let mut promotions = Vec::new();

    for mut memory in store.strategic_all()? {
        if memory.tier == StrategicTier::Identity {
            continue;
        }
        let target = eligible_tier(&memory, now);
        if target > memory.tier {
            let from = memory.tier;
            memory.tier = target;
            store.strategic_upsert(&memory)?;
            info!(
                id = %memory.id,
                from = from.as_str(),
                to = target.as_str(),
                "strategic memory promoted"
            );
            promotions.push(TierPromotion {
                cell_id: memory.id,
                from,
                to: target,
            });
        }
    }
    Ok(promotions)
}

/// Run both DMN steps; partial failures land in `errors`.
pub fn run_dmn(tracker: &OutcomeTracker, store: &MemoryStore, min_samples: u64) -> DmnReport {
    let mut report = DmnReport {
        rankings: aggregate_outcomes(tracker, min_samples),
        ..DmnReport::default()
    };

    match promote_tiers(store) {
        Ok(promotions) => report.promotions = promotions,
        Err(err) => {
            warn!(?err, "tier promotion failed (non-fatal)");
            report.errors.push(format!("tier promotion: {err}"));
        }
    }

    report
}

// ── Tests ────────────────────────────────────────────────────────────────────
