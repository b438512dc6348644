//! Tool executor — validates, risk-gates, and runs tool calls on behalf of
//! the model.
//!
//! Execution contract, in order:
//!
//! 1. Resolve the tool by name.
//! 2. Structural validation (no side effects yet).
//! 3. Pre-flight security screen: exact blocklist, regex blocklist, sudo rule.
//! 4. Risk assessment; confirmation gate at or above the policy threshold.
//! 5. Dry-run short circuit.
//! 6. Inner execute under `min(requested timeout, policy max)`.
//! 7. Result populated with risk, duration, and side-effect metadata.
//!
//! Observable side effects are confined to step 6; any failure before it
//! leaves the system unchanged.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use noema_config::SecurityConfig;
use noema_tools::{RiskLevel, ToolCall, ToolRegistry};

// ── Security policy ──────────────────────────────────────────────────────────

/// Pre-flight rules applied to every tool invocation before any side effect.
#[derive(Debug)]
pub struct SecurityPolicy {
    pub blocked_commands: Vec<String>,
    blocked_patterns: Vec<Regex>,
    pub allow_sudo: bool,
    pub max_timeout: Duration,
    pub confirm_threshold: RiskLevel,
}

impl SecurityPolicy {
    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        let blocked_patterns = config
            .blocked_patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| anyhow!("invalid blocked pattern '{}': {}", p, e)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            blocked_commands: config.blocked_commands.clone(),
            blocked_patterns,
            allow_sudo: config.allow_sudo,
            max_timeout: Duration::from_secs(config.max_timeout_secs),
            confirm_threshold: RiskLevel::parse_lenient(&config.confirm_threshold),
        })
    }

    /// Screen a raw input value. Returns the matched rule when blocked.
    pub fn screen(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if let Some(cmd) = self.blocked_commands.iter().find(|c| c.trim() == trimmed) {
            return Some(format!("blocked command '{cmd}'"));
        }
        if let Some(pattern) = self.blocked_patterns.iter().find(|r| r.is_match(raw)) {
            return Some(format!("pattern '{}'", pattern.as_str()));
        }
        if !self.allow_sudo {
            let sudo = trimmed.starts_with("sudo ") || trimmed.contains("&& sudo ")
                || trimmed.contains("; sudo ") || trimmed.contains("| sudo ");
            if sudo {
                return Some("sudo is not permitted".to_string());
            }
        }
        None
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::from_config(&SecurityConfig::default()).expect("default security config compiles")
    }
}

// ── Confirmation flow ────────────────────────────────────────────────────────

/// A request sent to the user when a call meets the confirmation threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub tool_name: String,
    pub args: HashMap<String, String>,
    pub risk: RiskLevel,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmDecision {
    Approve,
    Deny,
}

/// Channel-based confirmation gate. The executor sends a `ConfirmRequest`
/// and the UI side answers through the oneshot.
pub type ConfirmSender = mpsc::Sender<(ConfirmRequest, oneshot::Sender<ConfirmDecision>)>;
pub type ConfirmReceiver = mpsc::Receiver<(ConfirmRequest, oneshot::Sender<ConfirmDecision>)>;

pub fn confirm_channel() -> (ConfirmSender, ConfirmReceiver) {
    mpsc::channel(16)
}

// ── Request / result ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub call: ToolCall,
    /// Produce a synthetic result instead of running the tool.
    pub dry_run: bool,
    /// Caller already holds user approval for this call.
    pub approved: bool,
    pub timeout: Option<Duration>,
}

impl ExecRequest {
    pub fn new(call: ToolCall) -> Self {
        Self {
            call,
            dry_run: false,
            approved: false,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub call_id: String,
    pub success: bool,
    pub output: String,
    pub error: String,
    pub risk: RiskLevel,
    pub duration_ms: u64,
    pub metadata: HashMap<String, String>,
}

impl ExecResult {
    fn terminal(call_id: &str, risk: RiskLevel, error: String) -> Self {
        Self {
            call_id: call_id.to_string(),
            success: false,
            output: String::new(),
            error,
            risk,
            duration_ms: 0,
            metadata: HashMap::new(),
        }
    }
}

// ── Statistics ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub blocked: u64,
    pub confirmations_requested: u64,
    pub total_duration_ms: u64,
}

// ── Executor ─────────────────────────────────────────────────────────────────

pub struct ToolExecutor {
    policy: SecurityPolicy,
    confirm_tx: Option<ConfirmSender>,
    stats: Mutex<ExecStats>,
}

impl ToolExecutor {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self {
            policy,
            confirm_tx: None,
            stats: Mutex::new(ExecStats::default()),
        }
    }

    /// Attach a confirmation channel for the interactive gate.
    pub fn with_confirmation(mut self, tx: ConfirmSender) -> Self {
        self.confirm_tx = Some(tx);
        self
    }

    /// Snapshot of the running counters.
    pub fn stats(&self) -> ExecStats {
        self.stats.lock().expect("exec stats lock").clone()
    }

    pub async fn execute(
        &self,
        registry: &ToolRegistry,
        request: &ExecRequest,
    ) -> Result<ExecResult> {
        let call = &request.call;
        self.stats.lock().expect("exec stats lock").total += 1;

        // 1. Resolve.
        let tool = registry
            .get(&call.name)
            .ok_or_else(|| anyhow!("unknown tool: {}", call.name))?;

        // 2. Structural validation, before any side effect.
        tool.validate(&call.input)?;

        // 3. Pre-flight security screen over the raw input values.
        for value in call.input.values() {
            if let Some(rule) = self.policy.screen(value) {
                warn!(tool = %call.name, rule = %rule, "input blocked by security policy");
                self.stats.lock().expect("exec stats lock").blocked += 1;
                return Ok(ExecResult::terminal(
                    &call.id,
                    RiskLevel::Critical,
                    format!("blocked by security policy: {rule}"),
                ));
            }
        }

        // 4. Risk assessment + confirmation gate.
        let risk = tool.assess_risk(&call.input);
        if risk >= self.policy.confirm_threshold && !request.approved {
            self.stats
                .lock()
                .expect("exec stats lock")
                .confirmations_requested += 1;
            let approved = self.request_confirmation(call, risk).await?;
            if !approved {
                info!(tool = %call.name, %risk, "execution cancelled by user");
                return Ok(ExecResult::terminal(
                    &call.id,
                    risk,
                    "operation cancelled by user".to_string(),
                ));
            }
        }

        // 5. Dry-run short circuit.
        if request.dry_run {
            return Ok(ExecResult {
                call_id: call.id.clone(),
                success: true,
                output: format!("[dry-run] would execute {} with {:?}", call.name, call.input),
                error: String::new(),
                risk,
                duration_ms: 0,
                metadata: HashMap::new(),
            });
        }

        // 6. Inner execute under the clamped timeout.
        let timeout = request
            .timeout
            .map(|t| t.min(self.policy.max_timeout))
            .unwrap_or(self.policy.max_timeout);
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, tool.run(&call.input)).await;
        let duration = started.elapsed();

        // 7. Populate the result.
        let result = match outcome {
            Ok(Ok(output)) => ExecResult {
                call_id: call.id.clone(),
                success: output.success,
                output: output.output,
                error: output.error,
                risk,
                duration_ms: duration.as_millis() as u64,
                metadata: output.metadata,
            },
            Ok(Err(err)) => ExecResult {
                call_id: call.id.clone(),
                success: false,
                output: String::new(),
                error: err.to_string(),
                risk,
                duration_ms: duration.as_millis() as u64,
                metadata: HashMap::new(),
            },
            Err(_) => ExecResult {
                call_id: call.id.clone(),
                success: false,
                output: String::new(),
                error: format!("tool timed out after {}s", timeout.as_secs()),
                risk,
                duration_ms: duration.as_millis() as u64,
                metadata: HashMap::new(),
            },
        };

        {
            let mut stats = self.stats.lock().expect("exec stats lock");
            if result.success {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
            stats.total_duration_ms += result.duration_ms;
        }

        info!(
            tool = %call.name,
            success = result.success,
            %risk,
            duration_ms = result.duration_ms,
            "tool executed"
        );
        Ok(result)
    }

    async fn request_confirmation(&self, call: &ToolCall, risk: RiskLevel) -> Result<bool> {
        let Some(tx) = &self.confirm_tx else {
            warn!(
                tool = %call.name,
                %risk,
                "confirmation required but no channel configured; denying"
            );
            return Ok(false);
        };

        let summary = match call.name.as_str() {
            "run_shell" => format!(
                "Execute shell command: {}",
                call.input.get("command").map(String::as_str).unwrap_or("(unknown)")
            ),
            "write_file" | "edit_file" => format!(
                "Modify file: {}",
                call.input.get("path").map(String::as_str).unwrap_or("(unknown)")
            ),
            other => format!("Execute tool: {other}"),
        };

        let request = ConfirmRequest {
            tool_name: call.name.clone(),
            args: call.input.clone(),
            risk,
            summary,
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send((request, reply_tx))
            .await
            .map_err(|_| anyhow!("confirmation channel closed"))?;
        let decision = reply_rx
            .await
            .map_err(|_| anyhow!("confirmation response channel dropped"))?;
        Ok(decision == ConfirmDecision::Approve)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
