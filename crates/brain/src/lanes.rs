//! Lanes and lane selection.
//!
//! A lane is a named backend choice (engine + model + endpoint). Selection
//! estimates the complexity of the latest user content, maps it to an
//! ordered preference ladder, and takes the first lane whose circuit
//! breaker currently allows traffic.

use serde::{Deserialize, Serialize};

use noema_config::LaneConfig;

/// The closed set of supported engine kinds.
///
/// `Groq` speaks the OpenAI chat protocol against a different base URL;
/// `Vllm` is the local high-throughput server speaking the same protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Ollama,
    OpenAi,
    Anthropic,
    Groq,
    Vllm,
}

impl Engine {
    pub fn parse(s: &str) -> Option<Engine> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Some(Engine::Ollama),
            "openai" => Some(Engine::OpenAi),
            "anthropic" => Some(Engine::Anthropic),
            "groq" => Some(Engine::Groq),
            "vllm" => Some(Engine::Vllm),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Engine::Ollama => "ollama",
            Engine::OpenAi => "openai",
            Engine::Anthropic => "anthropic",
            Engine::Groq => "groq",
            Engine::Vllm => "vllm",
        }
    }

    /// Engines speaking the OpenAI chat-completions wire protocol.
    pub fn uses_openai_protocol(self) -> bool {
        matches!(self, Engine::OpenAi | Engine::Groq | Engine::Vllm)
    }

    /// Chat-style engines take role-segmented messages; completion-style
    /// engines take one joined prompt.
    pub fn is_chat_style(self) -> bool {
        !matches!(self, Engine::Ollama)
    }

    /// Engines with native incremental streaming (SSE or NDJSON).
    pub fn streams_natively(self) -> bool {
        matches!(self, Engine::Ollama | Engine::OpenAi | Engine::Groq | Engine::Vllm)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lane {
    pub name: String,
    pub engine: Engine,
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl Lane {
    /// Build from config; unknown engine names fail.
    pub fn from_config(config: &LaneConfig) -> Option<Lane> {
        Some(Lane {
            name: config.name.clone(),
            engine: Engine::parse(&config.engine)?,
            model: config.model.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

// ── Complexity estimation ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Low,
    Medium,
    High,
}

const COMPLEX_KEYWORDS: &[&str] = &[
    "architecture",
    "design",
    "refactor",
    "analyze",
    "optimize",
    "concurrency",
    "algorithm",
    "tradeoff",
    "migrate",
    "debug",
];

const SIMPLE_KEYWORDS: &[&str] = &[
    "hi",
    "hello",
    "thanks",
    "ok",
    "yes",
    "no",
    "joke",
    "weather",
    "remind",
];

/// Score the latest user content into [0, 1]: length bumps (+0.3 over 500
/// chars, +0.15 over 200) and ±0.1 per complex/simple keyword hit.
pub fn estimate_complexity(content: &str) -> f32 {
    let mut score = 0.3_f32;
    if content.len() > 500 {
        score += 0.3;
    } else if content.len() > 200 {
        score += 0.15;
    }
    let lower = content.to_lowercase();
    for keyword in COMPLEX_KEYWORDS {
        if contains_word(&lower, keyword) {
            score += 0.1;
        }
    }
    for keyword in SIMPLE_KEYWORDS {
        if contains_word(&lower, keyword) {
            score -= 0.1;
        }
    }
    score.clamp(0.0, 1.0)
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|t| t == word)
}

pub fn bucket(score: f32) -> Complexity {
    if score >= 0.6 {
        Complexity::High
    } else if score >= 0.35 {
        Complexity::Medium
    } else {
        Complexity::Low
    }
}

/// Ordered lane-name preferences per complexity bucket. `turbo` is the
/// conventional name of the local high-throughput lane.
pub fn preference_ladder(complexity: Complexity) -> &'static [&'static str] {
    match complexity {
        Complexity::High => &["turbo", "smart", "fast"],
        Complexity::Medium => &["turbo", "fast", "local"],
        Complexity::Low => &["local", "turbo", "fast"],
    }
}

/// Fixed failover order used when the high-throughput lane fails mid-request.
pub const FAILOVER_ORDER: &[&str] = &["fast", "local", "smart"];

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_names_round_trip() {
        for engine in [
            Engine::Ollama,
            Engine::OpenAi,
            Engine::Anthropic,
            Engine::Groq,
            Engine::Vllm,
        ] {
            assert_eq!(Engine::parse(engine.as_str()), Some(engine));
        }
        assert_eq!(Engine::parse("gpt"), None);
    }

    #[test]
    fn protocol_families() {
        assert!(Engine::Groq.uses_openai_protocol());
        assert!(Engine::Vllm.uses_openai_protocol());
        assert!(!Engine::Anthropic.uses_openai_protocol());
        assert!(!Engine::Ollama.is_chat_style());
        assert!(Engine::Anthropic.is_chat_style());
        assert!(!Engine::Anthropic.streams_natively());
    }

    #[test]
    fn lane_from_config_normalizes_endpoint() {
        let config = LaneConfig {
            name: "local".to_string(),
            engine: "ollama".to_string(),
            model: "llama3.1:8b".to_string(),
            endpoint: "http://localhost:11434/".to_string(),
            api_key: None,
        };
        let lane = Lane::from_config(&config).unwrap();
        assert_eq!(lane.endpoint, "http://localhost:11434");
        assert_eq!(lane.engine, Engine::Ollama);

        let bad = LaneConfig {
            engine: "hal9000".to_string(),
            ..config
        };
        assert!(Lane::from_config(&bad).is_none());
    }

    #[test]
    fn short_greetings_score_low() {
        let score = estimate_complexity("hi there");
        assert!(score < 0.35, "got {score}");
        assert_eq!(bucket(score), Complexity::Low);
    }

    #[test]
    fn long_architectural_questions_score_high() {
        let content = format!(
            "Can you analyze the architecture tradeoff here? {}",
            "context ".repeat(80)
        );
        let score = estimate_complexity(&content);
        assert!(score >= 0.6, "got {score}");
        assert_eq!(bucket(score), Complexity::High);
    }

    #[test]
    fn medium_length_neutral_content_is_medium() {
        let content = "word ".repeat(50); // ~250 chars, no keywords
        let score = estimate_complexity(&content);
        assert_eq!(bucket(score), Complexity::Medium);
    }

    #[test]
    fn ladders_match_complexity() {
        assert_eq!(preference_ladder(Complexity::High), &["turbo", "smart", "fast"]);
        assert_eq!(preference_ladder(Complexity::Medium), &["turbo", "fast", "local"]);
        assert_eq!(preference_ladder(Complexity::Low), &["local", "turbo", "fast"]);
    }
}
