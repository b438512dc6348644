//! Two-stage intent router: a weighted regex fast path with an LLM slow
//! path behind it, plus short-circuit paths for explicit `@mentions` and
//! platform context. Produces a [`RoutingDecision`] carrying task type,
//! confidence, path, and risk.

use std::collections::BTreeMap;
use std::sync::{LazyLock, RwLock};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use noema_config::RouterConfig;

pub mod outcomes;
pub mod patterns;
pub mod risk;

pub use outcomes::{OutcomeKey, OutcomeStats, OutcomeTracker};
pub use risk::{DefaultRiskAssessor, RiskAssessor, RouteRisk};

// ── Task types ───────────────────────────────────────────────────────────────

/// The closed set of routing targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    General,
    CodeGeneration,
    Debug,
    Review,
    Planning,
    Infrastructure,
    Explain,
    Refactor,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::General => "general",
            TaskType::CodeGeneration => "code_generation",
            TaskType::Debug => "debug",
            TaskType::Review => "review",
            TaskType::Planning => "planning",
            TaskType::Infrastructure => "infrastructure",
            TaskType::Explain => "explain",
            TaskType::Refactor => "refactor",
        }
    }
}

/// Which stage produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutePath {
    Fast,
    Slow,
    Explicit,
    Context,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub task_type: TaskType,
    /// The input the downstream agent should act on (mention prefix stripped).
    pub input: String,
    pub confidence: f32,
    pub path: RoutePath,
    pub risk: RouteRisk,
    /// Specialist name when an explicit mention chose it.
    pub specialist: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

// ── Statistics ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterStats {
    pub total: u64,
    pub fast: u64,
    pub slow: u64,
    pub explicit: u64,
    pub context: u64,
    pub by_task: BTreeMap<String, u64>,
    pub ambiguous: u64,
    pub avg_confidence: f32,
}

// ── Slow path ────────────────────────────────────────────────────────────────

/// The LLM-backed slow classifier. Implementations return a single free-form
/// category label; the router maps it through the synonym table.
#[async_trait]
pub trait SlowClassifier: Send + Sync {
    async fn classify(&self, input: &str) -> Result<String>;
}

/// Fixed confidence assigned to accepted slow-path results.
const SLOW_PATH_CONFIDENCE: f32 = 0.85;

// ── Fast path internals ──────────────────────────────────────────────────────

static COMPILED_FAST: LazyLock<Vec<(TaskType, Vec<(Regex, f32)>)>> = LazyLock::new(|| {
    patterns::FAST_PATTERNS
        .iter()
        .map(|(task, table)| {
            let compiled = table
                .iter()
                .map(|(p, w)| (Regex::new(p).expect("fast pattern"), *w))
                .collect();
            (*task, compiled)
        })
        .collect()
});

struct FastResult {
    task_type: TaskType,
    confidence: f32,
    ambiguous: bool,
}

/// Weighted pattern scoring with the confidence adjustments:
/// single-type hit +0.25, multi-pattern best +0.1, close runner-up ×0.8.
fn classify_fast(input: &str) -> FastResult {
    let mut scores: Vec<(TaskType, f32, usize)> = Vec::new();
    let mut total = 0.0_f32;

    for (task, table) in COMPILED_FAST.iter() {
        let mut weight_sum = 0.0_f32;
        let mut matches = 0_usize;
        for (regex, weight) in table {
            if regex.is_match(input) {
                weight_sum += weight;
                matches += 1;
            }
        }
        if matches > 0 {
            total += weight_sum;
            scores.push((*task, weight_sum, matches));
        }
    }

    if scores.is_empty() {
        return FastResult {
            task_type: TaskType::General,
            confidence: 0.4,
            ambiguous: false,
        };
    }

    scores.sort_by(|a, b| b.1.total_cmp(&a.1));
    let (best_task, best_score, best_matches) = scores[0];
    let mut confidence = best_score / total;

    if scores.len() == 1 {
        confidence = (confidence + 0.25).min(1.0);
    }
    if best_matches >= 2 {
        confidence = (confidence + 0.1).min(1.0);
    }

    let mut ambiguous = false;
    if let Some((_, second_score, _)) = scores.get(1) {
        if *second_score >= best_score * 0.7 {
            confidence *= 0.8;
            ambiguous = true;
        }
    }

    FastResult {
        task_type: best_task,
        confidence,
        ambiguous,
    }
}

/// Parse `@name rest` shapes. Returns `(specialist, rest)` when the leading
/// token is a mention.
fn parse_mention(input: &str) -> Option<(&str, &str)> {
    let trimmed = input.trim_start();
    let rest = trimmed.strip_prefix('@')?;
    let end = rest
        .find(|c: char| c.is_whitespace())
        .unwrap_or(rest.len());
    let name = &rest[..end];
    if name.is_empty() {
        return None;
    }
    Some((name, rest[end..].trim_start()))
}

// ── Router ───────────────────────────────────────────────────────────────────

pub struct Router {
    fast_threshold: f32,
    slow_timeout: Duration,
    slow: Option<Box<dyn SlowClassifier>>,
    risk: Box<dyn RiskAssessor>,
    stats: RwLock<RouterStats>,
}

impl Router {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            fast_threshold: config.fast_confidence_threshold,
            slow_timeout: Duration::from_millis(config.slow_timeout_ms),
            slow: None,
            risk: Box::new(DefaultRiskAssessor),
            stats: RwLock::new(RouterStats::default()),
        }
    }

    pub fn with_slow_classifier(mut self, classifier: Box<dyn SlowClassifier>) -> Self {
        self.slow = Some(classifier);
        self
    }

    pub fn with_risk_assessor(mut self, assessor: Box<dyn RiskAssessor>) -> Self {
        self.risk = assessor;
        self
    }

    /// Classify one request. `platform` is the caller-supplied deployment
    /// descriptor; a non-empty value short-circuits to infrastructure.
    pub async fn route(&self, input: &str, platform: Option<&str>) -> RoutingDecision {
        let started_at = Utc::now();

        // Highest priority: explicit mention.
        if let Some((name, rest)) = parse_mention(input) {
            let known = patterns::MENTIONS
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name));
            if let Some((mention, task_type)) = known {
                let decision = self.finish(
                    *task_type,
                    rest.to_string(),
                    1.0,
                    RoutePath::Explicit,
                    Some(mention.to_string()),
                    started_at,
                    false,
                );
                return decision;
            }
        }

        // Platform context forces infrastructure.
        if platform.map(|p| !p.trim().is_empty()).unwrap_or(false) {
            return self.finish(
                TaskType::Infrastructure,
                input.to_string(),
                0.9,
                RoutePath::Context,
                None,
                started_at,
                false,
            );
        }

        // Fast path, then the slow path when confidence falls short.
        let fast = classify_fast(input);
        debug!(
            task = fast.task_type.as_str(),
            confidence = fast.confidence,
            ambiguous = fast.ambiguous,
            "fast-path classification"
        );

        if fast.confidence < self.fast_threshold {
            if let Some(slow) = &self.slow {
                match tokio::time::timeout(self.slow_timeout, slow.classify(input)).await {
                    Ok(Ok(label)) => {
                        if let Some(task_type) = patterns::resolve_synonym(&label) {
                            return self.finish(
                                task_type,
                                input.to_string(),
                                SLOW_PATH_CONFIDENCE,
                                RoutePath::Slow,
                                None,
                                started_at,
                                fast.ambiguous,
                            );
                        }
                        warn!(label, "slow path returned unknown label — using fast result");
                    }
                    Ok(Err(err)) => {
                        warn!(?err, "slow path failed — using fast result");
                    }
                    Err(_) => {
                        warn!(
                            timeout_ms = self.slow_timeout.as_millis() as u64,
                            "slow path timed out — using fast result"
                        );
                    }
                }
            }
        }

        self.finish(
            fast.task_type,
            input.to_string(),
            fast.confidence,
            RoutePath::Fast,
            None,
            started_at,
            fast.ambiguous,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        task_type: TaskType,
        input: String,
        confidence: f32,
        path: RoutePath,
        specialist: Option<String>,
        started_at: DateTime<Utc>,
        ambiguous: bool,
    ) -> RoutingDecision {
        let risk = self.risk.assess(&input, task_type);
        self.record_stats(task_type, path, confidence, ambiguous);
        RoutingDecision {
            task_type,
            input,
            confidence,
            path,
            risk,
            specialist,
            started_at,
            completed_at: Utc::now(),
        }
    }

    fn record_stats(&self, task_type: TaskType, path: RoutePath, confidence: f32, ambiguous: bool) {
        let mut stats = self.stats.write().expect("router stats lock");
        stats.total += 1;
        match path {
            RoutePath::Fast => stats.fast += 1,
            RoutePath::Slow => stats.slow += 1,
            RoutePath::Explicit => stats.explicit += 1,
            RoutePath::Context => stats.context += 1,
        }
        *stats.by_task.entry(task_type.as_str().to_string()).or_default() += 1;
        if ambiguous {
            stats.ambiguous += 1;
        }
        // Running mean over every decision.
        stats.avg_confidence += (confidence - stats.avg_confidence) / stats.total as f32;
    }

    /// Copy of the counters; never hands out references into the lock.
    pub fn stats(&self) -> RouterStats {
        self.stats.read().expect("router stats lock").clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.write().expect("router stats lock") = RouterStats::default();
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        Router::new(&RouterConfig::default())
    }

    #[tokio::test]
    async fn explicit_mention_wins_with_full_confidence() {
        let r = router();
        let decision = r.route("@debug fix this error", None).await;
        assert_eq!(decision.task_type, TaskType::Debug);
        assert_eq!(decision.path, RoutePath::Explicit);
        assert_eq!(decision.confidence, 1.0);
        assert_eq!(decision.input, "fix this error");
        assert_eq!(decision.risk, RouteRisk::Medium);
        assert_eq!(decision.specialist.as_deref(), Some("debug"));

        let stats = r.stats();
        assert_eq!(stats.total, 1, "stats updated exactly once");
        assert_eq!(stats.explicit, 1);
    }

    #[tokio::test]
    async fn unknown_mention_falls_through_to_classification() {
        let r = router();
        let decision = r.route("@nobody write a function to parse JSON", None).await;
        assert_ne!(decision.path, RoutePath::Explicit);
        assert_eq!(decision.task_type, TaskType::CodeGeneration);
    }

    #[tokio::test]
    async fn fast_path_classifies_code_generation() {
        let r = router();
        let decision = r.route("Write a function to parse JSON", None).await;
        assert_eq!(decision.task_type, TaskType::CodeGeneration);
        assert_eq!(decision.path, RoutePath::Fast);
        assert!(decision.confidence >= 0.6, "got {}", decision.confidence);
    }

    #[tokio::test]
    async fn no_pattern_hits_yield_general_at_0_4() {
        let r = router();
        let decision = r.route("hmm interesting weather lately", None).await;
        assert_eq!(decision.task_type, TaskType::General);
        assert!((decision.confidence - 0.4).abs() < 1e-6);
        assert_eq!(decision.path, RoutePath::Fast);
    }

    #[tokio::test]
    async fn platform_context_forces_infrastructure() {
        let r = router();
        let decision = r.route("restart the api", Some("k8s/prod-cluster")).await;
        assert_eq!(decision.task_type, TaskType::Infrastructure);
        assert_eq!(decision.path, RoutePath::Context);
        assert!((decision.confidence - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn explicit_mention_outranks_platform_context() {
        let r = router();
        let decision = r.route("@review this diff", Some("k8s")).await;
        assert_eq!(decision.path, RoutePath::Explicit);
        assert_eq!(decision.task_type, TaskType::Review);
    }

    struct FixedSlow(&'static str);

    #[async_trait]
    impl SlowClassifier for FixedSlow {
        async fn classify(&self, _input: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct HangingSlow;

    #[async_trait]
    impl SlowClassifier for HangingSlow {
        async fn classify(&self, _input: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("debug".to_string())
        }
    }

    #[tokio::test]
    async fn slow_path_resolves_synonyms_at_fixed_confidence() {
        let r = router().with_slow_classifier(Box::new(FixedSlow("debugging")));
        let decision = r.route("hmm interesting weather lately", None).await;
        assert_eq!(decision.task_type, TaskType::Debug);
        assert_eq!(decision.path, RoutePath::Slow);
        assert!((decision.confidence - 0.85).abs() < 1e-6);
    }

    #[tokio::test]
    async fn slow_path_unknown_label_falls_back_to_fast() {
        let r = router().with_slow_classifier(Box::new(FixedSlow("poetry")));
        let decision = r.route("hmm interesting weather lately", None).await;
        assert_eq!(decision.task_type, TaskType::General);
        assert_eq!(decision.path, RoutePath::Fast);
    }

    #[tokio::test]
    async fn slow_path_timeout_falls_back_to_fast() {
        let r = router().with_slow_classifier(Box::new(HangingSlow));
        let decision = r.route("hmm interesting weather lately", None).await;
        assert_eq!(decision.path, RoutePath::Fast);
        assert_eq!(decision.task_type, TaskType::General);
    }

    #[tokio::test]
    async fn confident_fast_result_skips_slow_path() {
        // The slow classifier would return "review"; a confident fast hit
        // must never consult it.
        let r = router().with_slow_classifier(Box::new(FixedSlow("review")));
        let decision = r.route("Write a function to parse JSON", None).await;
        assert_eq!(decision.task_type, TaskType::CodeGeneration);
        assert_eq!(decision.path, RoutePath::Fast);
    }

    #[tokio::test]
    async fn ambiguity_penalty_and_counter() {
        let r = router();
        // "review" and "fix" give two types equal weight — a close runner-up.
        let decision = r.route("review this fix", None).await;
        let stats = r.stats();
        assert_eq!(stats.ambiguous, 1);
        assert!(decision.confidence < 0.7, "got {}", decision.confidence);
    }

    #[tokio::test]
    async fn stats_track_paths_and_running_confidence() {
        let r = router();
        r.route("@debug x", None).await;
        r.route("Write a function to parse JSON", None).await;
        r.route("unclassifiable mumbling", None).await;

        let stats = r.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.explicit, 1);
        assert_eq!(stats.fast, 2);
        assert_eq!(stats.by_task.get("debug"), Some(&1));
        assert!(stats.avg_confidence > 0.0 && stats.avg_confidence <= 1.0);

        r.reset_stats();
        assert_eq!(r.stats().total, 0);
    }

    #[test]
    fn mention_parsing_shapes() {
        assert_eq!(parse_mention("@debug fix it"), Some(("debug", "fix it")));
        assert_eq!(parse_mention("@debug"), Some(("debug", "")));
        assert_eq!(parse_mention("no mention"), None);
        assert_eq!(parse_mention("@ spaced"), None);
    }

    #[test]
    fn task_type_serde_uses_snake_case() {
        let json = serde_json::to_string(&TaskType::CodeGeneration).unwrap();
        assert_eq!(json, "\"code_generation\"");
    }
}
