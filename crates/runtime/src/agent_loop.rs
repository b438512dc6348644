//! The reason→act→observe controller.
//!
//! Each iteration sends the amended turn history to the brain, executes any
//! parsed tool calls through the executor (in parallel across independent
//! calls, with insertion order preserved in history), appends the structured
//! tool-role turns, and repeats until the model stops calling tools or the
//! call budget is exhausted.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use noema_brain::{Brain, ThinkRequest, ThinkResponse, Turn};
use noema_exec::{ExecRequest, ExecResult, ToolExecutor};
use noema_tools::{RiskLevel, ToolCall, ToolRegistry, ToolResult};

/// Default per-request tool-call budget.
pub const DEFAULT_CALL_BUDGET: usize = 10;

pub type ToolStartFn = Arc<dyn Fn(&ToolCall) + Send + Sync>;
pub type ToolCompleteFn = Arc<dyn Fn(&ExecResult) + Send + Sync>;
pub type StreamFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Pluggable observation hooks. Approval itself is the executor's
/// confirmation channel — synchronous with respect to the loop.
#[derive(Default, Clone)]
pub struct LoopHandlers {
    pub on_tool_start: Option<ToolStartFn>,
    pub on_tool_complete: Option<ToolCompleteFn>,
    pub on_response: Option<StreamFn>,
}

#[derive(Debug)]
pub struct LoopOutcome {
    /// Final assistant text.
    pub content: String,
    /// The full amended turn history, tool turns included.
    pub turns: Vec<Turn>,
    /// Every tool execution in dispatch order.
    pub executions: Vec<ExecResult>,
    pub rounds: usize,
}

pub struct AgentLoop {
    brain: Arc<Brain>,
    executor: Arc<ToolExecutor>,
    registry: Arc<ToolRegistry>,
    call_budget: usize,
    handlers: LoopHandlers,
}

impl AgentLoop {
    pub fn new(brain: Arc<Brain>, executor: Arc<ToolExecutor>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            brain,
            executor,
            registry,
            call_budget: DEFAULT_CALL_BUDGET,
            handlers: LoopHandlers::default(),
        }
    }

    pub fn with_call_budget(mut self, budget: usize) -> Self {
        self.call_budget = budget;
        self
    }

    pub fn with_handlers(mut self, handlers: LoopHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Run the loop to completion for one user request.
    #[instrument(skip(self, request), fields(user = %request.user_id))]
    pub async fn run(&self, mut request: ThinkRequest) -> Result<LoopOutcome> {
        let mut executions: Vec<ExecResult> = Vec::new();
        let mut budget = self.call_budget;
        let mut rounds = 0_usize;
        let mut final_content = String::new();

        loop {
            rounds += 1;
            debug!(rounds, budget, turns = request.turns.len(), "agent loop iteration");

            let response: ThinkResponse = self.brain.think(&request).await?;
            if let Some(on_response) = &self.handlers.on_response {
                on_response(&response.content);
            }

            if response.tool_calls.is_empty() {
                final_content = response.content;
                break;
            }

            // Record the assistant's move, calls included, before acting.
            let mut assistant = Turn::assistant(response.content.clone());
            assistant.tool_calls = response.tool_calls.clone();
            request.turns.push(assistant);

            let mut all_calls = response.tool_calls;
            let dropped: Vec<ToolCall> = all_calls.split_off(all_calls.len().min(budget));
            let calls = all_calls;
            let truncated = !dropped.is_empty();
            budget = budget.saturating_sub(calls.len());

            info!(count = calls.len(), budget, "model requested tool calls");
            let results = self.dispatch(&calls).await;

            for result in &results {
                request.turns.push(Turn::tool(ToolResult {
                    call_id: result.call_id.clone(),
                    success: result.success,
                    output: result.output.clone(),
                    error: result.error.clone(),
                }));
            }
            executions.extend(results);

            // Every surfaced call gets a result before the next model pass;
            // calls past the budget are explicitly rejected, never dropped.
            for call in &dropped {
                request.turns.push(Turn::tool(ToolResult {
                    call_id: call.id.clone(),
                    success: false,
                    output: String::new(),
                    error: "rejected by policy: tool-call budget exhausted".to_string(),
                }));
            }

            if budget == 0 || truncated {
                warn!(rounds, "tool-call budget exhausted — asking for a final answer");
                // One more model pass sees the results; its text is final
                // regardless of further call requests.
                let response = self.brain.think(&request).await?;
                if let Some(on_response) = &self.handlers.on_response {
                    on_response(&response.content);
                }
                final_content = response.content;
                break;
            }
        }

        // The loop can exhaust with tool output but no closing text.
        if final_content.is_empty() && !executions.is_empty() {
            final_content = executions
                .iter()
                .map(|e| {
                    let body = if e.success { &e.output } else { &e.error };
                    let excerpt: String = body.chars().take(500).collect();
                    format!("[{}]: {excerpt}", e.call_id)
                })
                .collect::<Vec<_>>()
                .join("\n\n");
        }

        Ok(LoopOutcome {
            content: final_content,
            turns: request.turns,
            executions,
            rounds,
        })
    }

    /// Execute a batch of calls in parallel; results come back in the
    /// batch's insertion order for history fidelity.
    async fn dispatch(&self, calls: &[ToolCall]) -> Vec<ExecResult> {
        if let Some(on_start) = &self.handlers.on_tool_start {
            for call in calls {
                on_start(call);
            }
        }

        let futures: Vec<_> = calls
            .iter()
            .map(|call| {
                let executor = Arc::clone(&self.executor);
                let registry = Arc::clone(&self.registry);
                let call = call.clone();
                async move {
                    let request = ExecRequest::new(call.clone());
                    match executor.execute(&registry, &request).await {
                        Ok(result) => result,
                        // Input errors (unknown tool, bad params) are surfaced
                        // to the model as failed results so it can react.
                        Err(err) => ExecResult {
                            call_id: call.id.clone(),
                            success: false,
                            output: String::new(),
                            error: err.to_string(),
                            risk: RiskLevel::None,
                            duration_ms: 0,
                            metadata: HashMap::new(),
                        },
                    }
                }
            })
            .collect();

        let results = futures::future::join_all(futures).await;

        if let Some(on_complete) = &self.handlers.on_tool_complete {
            for result in &results {
                on_complete(result);
            }
        }
        results
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
//
// The loop's brain side needs a live backend, so unit tests here cover the
// pure pieces; the loop itself is exercised end-to-end in integration
// environments with a local engine.
