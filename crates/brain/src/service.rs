//! The Brain facade: lane selection, invocation, failover, streaming.

use std::sync::RwLock;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use noema_config::BrainConfig;

use crate::breaker::{BreakerConfig, BreakerRegistry, BreakerState};
use crate::engines::{self, EngineReply};
use crate::lanes::{Engine, FAILOVER_ORDER, Lane, bucket, estimate_complexity, preference_ladder};
use crate::protocol::parse_tool_calls;
use crate::remote::RemoteBrain;
use crate::types::{Chunk, ThinkRequest, ThinkResponse};
use crate::{BrainError, STREAM_CHANNEL_CAPACITY};

pub struct Brain {
    config: RwLock<BrainConfig>,
    client: reqwest::Client,
    breakers: BreakerRegistry,
    remote: Option<RemoteBrain>,
}

impl Brain {
    pub fn new(config: BrainConfig) -> Self {
        let breakers = BreakerRegistry::new(BreakerConfig::from_brain_config(&config));
        let remote = (config.mode == "remote").then(|| RemoteBrain::new(&config));
        Self {
            config: RwLock::new(config),
            client: reqwest::Client::new(),
            breakers,
            remote,
        }
    }

    // ── Configuration surface (slash commands resolve here) ───────────────

    pub fn config_snapshot(&self) -> BrainConfig {
        self.config.read().expect("brain config lock").clone()
    }

    pub fn lanes(&self) -> Vec<Lane> {
        self.config
            .read()
            .expect("brain config lock")
            .lanes
            .iter()
            .filter_map(Lane::from_config)
            .collect()
    }

    pub fn lane(&self, name: &str) -> Option<Lane> {
        self.lanes().into_iter().find(|l| l.name == name)
    }

    pub fn current_lane_name(&self) -> String {
        self.config.read().expect("brain config lock").current_lane.clone()
    }

    pub fn set_current_lane(&self, name: &str) -> Result<(), BrainError> {
        let mut config = self.config.write().expect("brain config lock");
        if !config.lanes.iter().any(|l| l.name == name) {
            return Err(BrainError::UnknownLane {
                lane: name.to_string(),
            });
        }
        info!(lane = name, "current lane switched");
        config.current_lane = name.to_string();
        Ok(())
    }

    pub fn auto_select(&self) -> bool {
        self.config.read().expect("brain config lock").auto_select
    }

    pub fn set_auto_select(&self, enabled: bool) {
        info!(enabled, "lane auto-selection toggled");
        self.config.write().expect("brain config lock").auto_select = enabled;
    }

    pub fn set_api_key(&self, lane: &str, key: &str) -> Result<(), BrainError> {
        let mut config = self.config.write().expect("brain config lock");
        let Some(lane_config) = config.lanes.iter_mut().find(|l| l.name == lane) else {
            return Err(BrainError::UnknownLane {
                lane: lane.to_string(),
            });
        };
        lane_config.api_key = Some(key.to_string());
        Ok(())
    }

    pub fn breaker_state(&self, lane: &str) -> BreakerState {
        self.breakers.get(lane).state()
    }

    // ── Lane selection ────────────────────────────────────────────────────

    /// Pick the lane for a request: the current lane when auto-selection is
    /// off, otherwise the first breaker-permitting lane on the complexity
    /// ladder, falling back to current.
    pub fn select_lane(&self, request: &ThinkRequest) -> Option<Lane> {
        let (auto, current) = {
            let config = self.config.read().expect("brain config lock");
            (config.auto_select, config.current_lane.clone())
        };

        if !auto {
            return self.lane(&current);
        }

        let complexity = estimate_complexity(request.latest_user_content());
        let ladder = preference_ladder(bucket(complexity));
        debug!(complexity, ?ladder, "lane ladder computed");

        for name in ladder {
            if let Some(lane) = self.lane(name) {
                if self.breakers.get(name).allow() {
                    return Some(lane);
                }
            }
        }
        self.lane(&current)
    }

    // ── Thinking ──────────────────────────────────────────────────────────

    #[instrument(skip(self, request), fields(user = %request.user_id))]
    pub async fn think(&self, request: &ThinkRequest) -> Result<ThinkResponse, BrainError> {
        if let Some(remote) = &self.remote {
            return remote.think(request).await;
        }

        let lane = self.select_lane(request).ok_or_else(|| BrainError::UnknownLane {
            lane: self.current_lane_name(),
        })?;

        match self.invoke_lane(&lane, request).await {
            Ok(reply) => Ok(build_response(reply)),
            Err(err) if lane.engine == Engine::Vllm => {
                warn!(lane = %lane.name, %err, "high-throughput lane failed — starting fallback traversal");
                self.failover(lane.engine, request, err).await
            }
            Err(err) => Err(err),
        }
    }

    /// Fallback traversal in the fixed order, skipping lanes running the
    /// failed engine kind and lanes whose breaker is open.
    async fn failover(
        &self,
        failed_engine: Engine,
        request: &ThinkRequest,
        first_error: BrainError,
    ) -> Result<ThinkResponse, BrainError> {
        let mut last_lane = "turbo".to_string();
        let mut last_error = first_error;

        for name in FAILOVER_ORDER {
            let Some(lane) = self.lane(name) else { continue };
            if lane.engine == failed_engine {
                continue;
            }
            if !self.breakers.get(name).allow() {
                debug!(lane = name, "fallback lane breaker open — skipping");
                continue;
            }
            match self.invoke_lane(&lane, request).await {
                Ok(reply) => {
                    info!(lane = name, "fallback lane answered");
                    return Ok(build_response(reply));
                }
                Err(err) => {
                    warn!(lane = name, %err, "fallback lane failed");
                    last_lane = name.to_string();
                    last_error = err;
                }
            }
        }

        Err(BrainError::AllLanesFailed {
            lane: last_lane,
            source: Box::new(last_error),
        })
    }

    /// One engine invocation under the configured timeout, with breaker
    /// bookkeeping on both edges.
    async fn invoke_lane(
        &self,
        lane: &Lane,
        request: &ThinkRequest,
    ) -> Result<EngineReply, BrainError> {
        let timeout_secs = self
            .config
            .read()
            .expect("brain config lock")
            .request_timeout_secs;
        let breaker = self.breakers.get(&lane.name);

        let outcome = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            engines::invoke(&self.client, lane, request),
        )
        .await
        .unwrap_or_else(|_| {
            Err(BrainError::Timeout {
                lane: lane.name.clone(),
                seconds: timeout_secs,
            })
        });

        match &outcome {
            Ok(_) => breaker.record_success(),
            Err(err) => {
                warn!(lane = %lane.name, %err, "lane invocation failed");
                breaker.record_failure();
            }
        }
        outcome
    }

    // ── Streaming ─────────────────────────────────────────────────────────

    /// Lazy chunk sequence over a bounded channel. One consumer task per
    /// call owns the response body; dropping the receiver cancels it via
    /// channel closure.
    pub fn think_stream(&self, request: ThinkRequest) -> mpsc::Receiver<Chunk> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        let Some(lane) = self.select_lane(&request) else {
            let tx_err = tx.clone();
            tokio::spawn(async move {
                let _ = tx_err.send(Chunk::error("no lane available")).await;
            });
            return rx;
        };

        let client = self.client.clone();
        let breaker = self.breakers.get(&lane.name);
        let timeout_secs = self
            .config
            .read()
            .expect("brain config lock")
            .request_timeout_secs;

        tokio::spawn(async move {
            let outcome = tokio::time::timeout(
                Duration::from_secs(timeout_secs),
                engines::invoke_stream(&client, &lane, &request, &tx),
            )
            .await
            .unwrap_or_else(|_| {
                Err(BrainError::Timeout {
                    lane: lane.name.clone(),
                    seconds: timeout_secs,
                })
            });

            match outcome {
                Ok(_) => {
                    breaker.record_success();
                    let _ = tx.send(Chunk::done()).await;
                }
                Err(err) => {
                    breaker.record_failure();
                    let _ = tx.send(Chunk::error(err.to_string())).await;
                }
            }
        });

        rx
    }
}

fn build_response(reply: EngineReply) -> ThinkResponse {
    let (content, tool_calls) = parse_tool_calls(&reply.content);
    ThinkResponse {
        content,
        tool_calls,
        reasoning: None,
        usage: reply.usage,
        done: true,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use noema_config::LaneConfig;

    use super::*;
    use crate::types::Turn;

    fn config_with_lanes() -> BrainConfig {
        let mut config = BrainConfig::default();
        config.lanes = vec![
            LaneConfig {
                name: "local".to_string(),
                engine: "ollama".to_string(),
                model: "llama3.1:8b".to_string(),
                endpoint: "http://localhost:11434".to_string(),
                api_key: None,
            },
            LaneConfig {
                name: "fast".to_string(),
                engine: "groq".to_string(),
                model: "llama-3.1-8b-instant".to_string(),
                endpoint: "https://api.groq.com/openai".to_string(),
                api_key: None,
            },
            LaneConfig {
                name: "smart".to_string(),
                engine: "anthropic".to_string(),
                model: "claude-sonnet-4-20250514".to_string(),
                endpoint: "https://api.anthropic.com".to_string(),
                api_key: None,
            },
            LaneConfig {
                name: "turbo".to_string(),
                engine: "vllm".to_string(),
                model: "qwen2.5-32b".to_string(),
                endpoint: "http://localhost:8000".to_string(),
                api_key: None,
            },
        ];
        config.current_lane = "local".to_string();
        config
    }

    fn request(content: &str) -> ThinkRequest {
        let mut request = ThinkRequest::new("u1");
        request.turns.push(Turn::user(content));
        request
    }

    #[test]
    fn auto_off_uses_current_lane() {
        let mut config = config_with_lanes();
        config.auto_select = false;
        config.current_lane = "smart".to_string();
        let brain = Brain::new(config);
        let lane = brain.select_lane(&request("hi")).unwrap();
        assert_eq!(lane.name, "smart");
    }

    #[test]
    fn low_complexity_prefers_local() {
        let brain = Brain::new(config_with_lanes());
        let lane = brain.select_lane(&request("hi")).unwrap();
        assert_eq!(lane.name, "local");
    }

    #[test]
    fn high_complexity_prefers_turbo() {
        let brain = Brain::new(config_with_lanes());
        let content = format!("analyze the architecture tradeoff {}", "ctx ".repeat(150));
        let lane = brain.select_lane(&request(&content)).unwrap();
        assert_eq!(lane.name, "turbo");
    }

    #[test]
    fn open_breaker_moves_selection_down_the_ladder() {
        let brain = Brain::new(config_with_lanes());
        // Trip the local breaker (default threshold 3).
        let breaker = brain.breakers.get("local");
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(brain.breaker_state("local"), BreakerState::Open);

        let lane = brain.select_lane(&request("hi")).unwrap();
        assert_eq!(lane.name, "turbo", "next preference on the low ladder");
    }

    #[test]
    fn all_breakers_open_falls_back_to_current() {
        let brain = Brain::new(config_with_lanes());
        for name in ["local", "fast", "smart", "turbo"] {
            let breaker = brain.breakers.get(name);
            breaker.record_failure();
            breaker.record_failure();
            breaker.record_failure();
        }
        let lane = brain.select_lane(&request("hi")).unwrap();
        assert_eq!(lane.name, "local", "current lane is the terminal fallback");
    }

    #[test]
    fn lane_switch_and_key_commands() {
        let brain = Brain::new(config_with_lanes());
        assert!(brain.set_current_lane("fast").is_ok());
        assert_eq!(brain.current_lane_name(), "fast");
        assert!(matches!(
            brain.set_current_lane("warp"),
            Err(BrainError::UnknownLane { .. })
        ));

        assert!(brain.set_api_key("fast", "${GROQ_API_KEY}").is_ok());
        assert!(brain.set_api_key("warp", "x").is_err());
        let snapshot = brain.config_snapshot();
        let fast = snapshot.lanes.iter().find(|l| l.name == "fast").unwrap();
        assert_eq!(fast.api_key.as_deref(), Some("${GROQ_API_KEY}"));

        brain.set_auto_select(false);
        assert!(!brain.auto_select());
    }

    #[test]
    fn response_building_extracts_tool_calls() {
        let reply = EngineReply {
            content: "On it. <tool>read_file</tool><params>{\"path\":\"a.txt\"}</params>"
                .to_string(),
            usage: Default::default(),
        };
        let response = build_response(reply);
        assert_eq!(response.content, "On it.");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "read_file");
        assert!(response.done);
    }
}
