//! Pluggable risk assessment for routing decisions.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::TaskType;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RouteRisk {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RouteRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RouteRisk::Low => "low",
            RouteRisk::Medium => "medium",
            RouteRisk::High => "high",
            RouteRisk::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Maps `(input, task type)` to a risk level.
pub trait RiskAssessor: Send + Sync {
    fn assess(&self, input: &str, task_type: TaskType) -> RouteRisk;
}

static CRITICAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)rm\s+-[a-z]*rf?\s+/",
        r"(?i)\bdrop\s+table\b",
        r"(?i)\bfdisk\b",
        r"(?i)\bdd\s+if=",
        r"(?i)\b(curl|wget)\b[^|]*\|\s*(ba)?sh\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("router risk pattern"))
    .collect()
});

static PRODUCTION_TOKENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(production|prod|destroy)\b").expect("production tokens"));

/// Default rules: destructive patterns are critical regardless of task type;
/// infrastructure touching production is high; infrastructure otherwise and
/// code-changing tasks are medium; read-only tasks are low.
#[derive(Debug, Default)]
pub struct DefaultRiskAssessor;

impl RiskAssessor for DefaultRiskAssessor {
    fn assess(&self, input: &str, task_type: TaskType) -> RouteRisk {
        if CRITICAL_PATTERNS.iter().any(|r| r.is_match(input)) {
            return RouteRisk::Critical;
        }
        match task_type {
            TaskType::Infrastructure => {
                if PRODUCTION_TOKENS.is_match(input) {
                    RouteRisk::High
                } else {
                    RouteRisk::Medium
                }
            }
            TaskType::CodeGeneration | TaskType::Debug | TaskType::Refactor => RouteRisk::Medium,
            TaskType::Review | TaskType::Explain | TaskType::Planning | TaskType::General => {
                RouteRisk::Low
            }
        }
    }
}
