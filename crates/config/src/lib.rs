use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod persona;
pub use persona::{Boundaries, CommunicationStyle, LearnedPattern, Persona, PersonaIdentity};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub user_name: String,
    pub workspace_path: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Noema".to_string(),
            user_name: String::new(),
            workspace_path: ".".to_string(),
        }
    }
}

/// One named backend choice: engine + model + endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    pub name: String,
    /// One of: `ollama`, `openai`, `anthropic`, `groq`, `vllm`.
    pub engine: String,
    pub model: String,
    pub endpoint: String,
    /// May be a literal key or a `${VAR_NAME}` placeholder expanded at use.
    pub api_key: Option<String>,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            engine: "ollama".to_string(),
            model: "llama3.1:8b".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    /// `embedded` runs the lanes in-process; `remote` proxies a brain server.
    pub mode: String,
    pub current_lane: String,
    pub auto_select: bool,
    pub remote_endpoint: String,
    pub remote_token: Option<String>,
    pub request_timeout_secs: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_success_threshold: u32,
    pub breaker_recovery_secs: u64,
    /// Declared last so the TOML array-of-tables serialises after scalars.
    pub lanes: Vec<LaneConfig>,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            mode: "embedded".to_string(),
            current_lane: "local".to_string(),
            auto_select: true,
            remote_endpoint: "http://localhost:8484".to_string(),
            remote_token: None,
            request_timeout_secs: 120,
            breaker_failure_threshold: 3,
            breaker_success_threshold: 1,
            breaker_recovery_secs: 60,
            lanes: vec![
                LaneConfig::default(),
                LaneConfig {
                    name: "fast".to_string(),
                    engine: "groq".to_string(),
                    model: "llama-3.1-8b-instant".to_string(),
                    endpoint: "https://api.groq.com/openai".to_string(),
                    api_key: Some("${GROQ_API_KEY}".to_string()),
                },
                LaneConfig {
                    name: "smart".to_string(),
                    engine: "anthropic".to_string(),
                    model: "claude-sonnet-4-20250514".to_string(),
                    endpoint: "https://api.anthropic.com".to_string(),
                    api_key: Some("${ANTHROPIC_API_KEY}".to_string()),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Fast-path decisions below this confidence fall through to the slow path.
    pub fast_confidence_threshold: f32,
    pub slow_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            fast_confidence_threshold: 0.7,
            slow_timeout_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub db_path: String,
    /// Inter-turn gap that starts a new episode.
    pub time_gap_minutes: i64,
    /// Cosine distance between turn embeddings that starts a new episode.
    pub semantic_distance_threshold: f32,
    /// Raw content longer than this gets a summary.
    pub summary_threshold_chars: usize,
    /// Preceding/following context captured from neighbour turns.
    pub context_window_chars: usize,
    pub classifier_cache_cap: usize,
    pub pattern_accept_threshold: f32,
    pub embedding_accept_threshold: f32,
    pub llm_fallback_threshold: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: ".noema/memory.db".to_string(),
            time_gap_minutes: 30,
            semantic_distance_threshold: 0.4,
            summary_threshold_chars: 500,
            context_window_chars: 200,
            classifier_cache_cap: 1024,
            pattern_accept_threshold: 0.7,
            embedding_accept_threshold: 0.6,
            llm_fallback_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Exact-match command blocklist, screened before any side effect.
    pub blocked_commands: Vec<String>,
    /// Regex blocklist, compiled once by the executor.
    pub blocked_patterns: Vec<String>,
    pub allow_sudo: bool,
    pub max_timeout_secs: u64,
    /// Risk at or above this level requires interactive confirmation.
    /// One of: `low`, `medium`, `high`, `critical`.
    pub confirm_threshold: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            blocked_commands: vec![
                "rm -rf /".to_string(),
                "rm -rf /*".to_string(),
                ":(){ :|:& };:".to_string(),
            ],
            blocked_patterns: vec![
                r"rm\s+-[a-z]*r[a-z]*f?\s+/\s*$".to_string(),
                r">\s*/dev/sd[a-z]".to_string(),
                r"dd\s+.*of=/dev/(sd|nvme|hd)".to_string(),
                r"mkfs(\.\w+)?\s".to_string(),
                r"curl\s+[^|]*\|\s*(ba)?sh".to_string(),
                r"wget\s+[^|]*\|\s*(ba)?sh".to_string(),
            ],
            allow_sudo: false,
            max_timeout_secs: 120,
            confirm_threshold: "high".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SleepConfig {
    /// One of: `off`, `supervised`, `auto`.
    pub mode: String,
    pub min_interactions: usize,
    pub idle_timeout_minutes: i64,
    pub max_cycle_minutes: u64,
    pub max_proposals: usize,
    pub max_trait_delta: f32,
    pub min_outcome_samples: u64,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            mode: "supervised".to_string(),
            min_interactions: 5,
            idle_timeout_minutes: 30,
            max_cycle_minutes: 10,
            max_proposals: 5,
            max_trait_delta: 0.1,
            min_outcome_samples: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub brain: BrainConfig,
    pub router: RouterConfig,
    pub memory: MemoryConfig,
    pub security: SecurityConfig,
    pub sleep: SleepConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn lane(&self, name: &str) -> Option<&LaneConfig> {
        self.brain.lanes.iter().find(|l| l.name == name)
    }

    pub fn lane_mut(&mut self, name: &str) -> Option<&mut LaneConfig> {
        self.brain.lanes.iter_mut().find(|l| l.name == name)
    }
}

/// Expand `${VAR_NAME}` placeholders against the process environment.
///
/// Expansion happens at the moment a key is used, not at config load, so
/// rotating an exported key takes effect without re-reading the file.
/// Unset variables expand to the empty string.
pub fn expand_env_placeholders(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if let Ok(v) = env::var(var) {
                    out.push_str(&v);
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated placeholder — keep it literal.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() -> Result<()> {
        let config = AppConfig::default();
        let rendered = toml::to_string_pretty(&config)?;
        let parsed: AppConfig = toml::from_str(&rendered)?;
        assert_eq!(parsed.brain.lanes.len(), config.brain.lanes.len());
        assert_eq!(parsed.security.confirm_threshold, "high");
        Ok(())
    }

    #[test]
    fn load_missing_file_yields_defaults() -> Result<()> {
        let config = AppConfig::load_from("/nonexistent/noema/config.toml")?;
        assert_eq!(config.brain.current_lane, "local");
        assert!(config.brain.auto_select);
        Ok(())
    }

    #[test]
    fn partial_toml_fills_remaining_defaults() -> Result<()> {
        let config: AppConfig = toml::from_str("[sleep]\nmode = \"auto\"\n")?;
        assert_eq!(config.sleep.mode, "auto");
        assert_eq!(config.sleep.min_interactions, 5);
        assert_eq!(config.security.max_timeout_secs, 120);
        Ok(())
    }

    #[test]
    fn save_and_reload() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        let mut config = AppConfig::default();
        config.brain.current_lane = "smart".to_string();
        config.save_to(&path)?;
        let loaded = AppConfig::load_from(&path)?;
        assert_eq!(loaded.brain.current_lane, "smart");
        Ok(())
    }

    #[test]
    fn lane_lookup_by_name() {
        let config = AppConfig::default();
        assert!(config.lane("local").is_some());
        assert!(config.lane("fast").is_some());
        assert!(config.lane("nope").is_none());
    }

    // ── expand_env_placeholders ────────────────────────────────────────────

    #[test]
    fn expands_set_variable() {
        // SAFETY: test-only env mutation; no concurrent reader of this var.
        unsafe { env::set_var("NOEMA_TEST_KEY_A", "sk-123") };
        assert_eq!(expand_env_placeholders("${NOEMA_TEST_KEY_A}"), "sk-123");
        assert_eq!(
            expand_env_placeholders("Bearer ${NOEMA_TEST_KEY_A}!"),
            "Bearer sk-123!"
        );
    }

    #[test]
    fn unset_variable_expands_empty() {
        assert_eq!(expand_env_placeholders("${NOEMA_DEFINITELY_UNSET_VAR}"), "");
    }

    #[test]
    fn literal_values_pass_through() {
        assert_eq!(expand_env_placeholders("sk-literal"), "sk-literal");
        assert_eq!(expand_env_placeholders(""), "");
    }

    #[test]
    fn unterminated_placeholder_kept_literal() {
        assert_eq!(expand_env_placeholders("${OOPS"), "${OOPS");
    }
}
