//! Routing-outcome tracking: per `(provider, model, task type)` success,
//! failure, and latency counters, consumed later by the sleep worker's
//! outcome-aggregation phase.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::TaskType;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutcomeKey {
    pub provider: String,
    pub model: String,
    pub task_type: TaskType,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OutcomeStats {
    pub success_count: u64,
    pub failure_count: u64,
    pub total_latency_ms: u64,
    pub sample_count: u64,
}

impl OutcomeStats {
    pub fn success_rate(&self) -> f32 {
        if self.sample_count == 0 {
            return 0.0;
        }
        self.success_count as f32 / self.sample_count as f32
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        self.total_latency_ms as f64 / self.sample_count as f64
    }
}

/// Thread-safe outcome accumulator. Reads hand out snapshot copies, never
/// references into the map.
#[derive(Debug, Default)]
pub struct OutcomeTracker {
    inner: RwLock<HashMap<OutcomeKey, OutcomeStats>>,
}

impl OutcomeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        provider: &str,
        model: &str,
        task_type: TaskType,
        success: bool,
        latency_ms: u64,
    ) {
        let key = OutcomeKey {
            provider: provider.to_string(),
            model: model.to_string(),
            task_type,
        };
        let mut inner = self.inner.write().expect("outcome tracker lock");
        let stats = inner.entry(key).or_default();
        if success {
            stats.success_count += 1;
        } else {
            stats.failure_count += 1;
        }
        stats.total_latency_ms += latency_ms;
        stats.sample_count += 1;
    }

    pub fn snapshot(&self) -> Vec<(OutcomeKey, OutcomeStats)> {
        self.inner
            .read()
            .expect("outcome tracker lock")
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self
            .inner
            .read()
            .expect("outcome tracker lock")
            .keys()
            .map(|k| k.task_type)
            .collect();
        types.sort_by_key(|t| t.as_str());
        types.dedup();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accumulates_per_key() {
        let tracker = OutcomeTracker::new();
        tracker.record("ollama", "llama3.1", TaskType::Debug, true, 120);
        tracker.record("ollama", "llama3.1", TaskType::Debug, false, 300);
        tracker.record("groq", "llama3.1", TaskType::Debug, true, 40);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.len(), 2);
        let (_, ollama) = snapshot
            .iter()
            .find(|(k, _)| k.provider == "ollama")
            .unwrap();
        assert_eq!(ollama.sample_count, 2);
        assert_eq!(ollama.success_count, 1);
        assert_eq!(ollama.failure_count, 1);
        assert_eq!(ollama.total_latency_ms, 420);
        assert!((ollama.success_rate() - 0.5).abs() < 1e-6);
        assert!((ollama.avg_latency_ms() - 210.0).abs() < 1e-9);
    }

    #[test]
    fn task_types_lists_distinct() {
        let tracker = OutcomeTracker::new();
        tracker.record("a", "m", TaskType::Debug, true, 1);
        tracker.record("b", "m", TaskType::Debug, true, 1);
        tracker.record("a", "m", TaskType::Review, true, 1);
        let types = tracker.task_types();
        assert_eq!(types.len(), 2);
        assert!(types.contains(&TaskType::Debug));
        assert!(types.contains(&TaskType::Review));
    }

    #[test]
    fn empty_stats_rates_are_zero() {
        let stats = OutcomeStats::default();
        assert_eq!(stats.success_rate(), 0.0);
        assert_eq!(stats.avg_latency_ms(), 0.0);
    }
}
