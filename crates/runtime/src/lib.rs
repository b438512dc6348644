//! Runtime glue: the agent loop, the sleep worker, the slash-command
//! surface, and the [`AgentRuntime`] that wires routing, recall, tool
//! execution, and memory writes into one request flow.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use tracing::{info, instrument, warn};

use noema_brain::{Brain, ThinkRequest, Turn};
use noema_config::{AppConfig, Persona};
use noema_exec::{SecurityPolicy, ToolExecutor};
use noema_memory::{
    ConversationTurn, Extractor, MemoryStore, SearchOptions, SessionContext,
    SessionContextExtractor,
};
use noema_router::{OutcomeTracker, Router, RoutingDecision};
use noema_tools::{
    EditFileTool, GlobTool, GrepTool, ReadFileTool, RunShellTool, ToolRegistry, WebSearchTool,
    WriteFileTool,
};

pub mod agent_loop;
pub mod commands;
pub mod memory_tools;
pub mod sleep;

pub use agent_loop::{AgentLoop, DEFAULT_CALL_BUDGET, LoopHandlers, LoopOutcome};
pub use memory_tools::{RecallTool, RememberTool};
pub use sleep::{SleepOutcome, SleepReport, SleepWorker};

/// How many recalled memories ride along with each request.
const RECALL_LIMIT: usize = 6;

/// Build the default tool registry: file, shell, search, web, and the
/// memory-facing tools.
pub fn default_registry(workspace_root: PathBuf, store: Arc<MemoryStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    registry.register(Box::new(ReadFileTool {
        workspace_root: workspace_root.clone(),
    }));
    registry.register(Box::new(WriteFileTool {
        workspace_root: workspace_root.clone(),
    }));
    registry.register(Box::new(EditFileTool {
        workspace_root: workspace_root.clone(),
    }));
    registry.register(Box::new(RunShellTool {
        workspace_root: workspace_root.clone(),
    }));
    registry.register(Box::new(GlobTool {
        workspace_root: workspace_root.clone(),
    }));
    registry.register(Box::new(GrepTool { workspace_root }));
    registry.register(Box::new(WebSearchTool { api_key: None }));
    registry.register(Box::new(RememberTool {
        store: Arc::clone(&store),
    }));
    registry.register(Box::new(RecallTool { store }));
    registry
}

/// The assembled cognitive core: router → brain → executor → memory, plus
/// the sleep worker ticking in the background.
pub struct AgentRuntime {
    config: Mutex<AppConfig>,
    config_path: PathBuf,
    persona_path: PathBuf,
    brain: Arc<Brain>,
    router: Router,
    outcomes: Arc<OutcomeTracker>,
    executor: Arc<ToolExecutor>,
    registry: Arc<ToolRegistry>,
    store: Arc<MemoryStore>,
    extractor: Mutex<Extractor>,
    session_extractor: SessionContextExtractor,
    session: Mutex<SessionContext>,
    sleep: SleepWorker,
}

impl AgentRuntime {
    pub fn new(config: AppConfig, data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let config_path = data_dir.join("config.toml");
        let persona_path = data_dir.join("persona.yaml");

        let store = Arc::new(MemoryStore::open(data_dir.join("memory.db"))?);
        let workspace_root = PathBuf::from(&config.agent.workspace_path);
        let registry = Arc::new(default_registry(workspace_root, Arc::clone(&store)));
        let executor = Arc::new(ToolExecutor::new(SecurityPolicy::from_config(
            &config.security,
        )?));
        let brain = Arc::new(Brain::new(config.brain.clone()));
        let router = Router::new(&config.router);
        let sleep = SleepWorker::new(&config.sleep, &persona_path);
        let extractor = Mutex::new(Extractor::new(&config.memory));

        Ok(Self {
            config: Mutex::new(config),
            config_path,
            persona_path,
            brain,
            router,
            outcomes: Arc::new(OutcomeTracker::new()),
            executor,
            registry,
            store,
            extractor,
            session_extractor: SessionContextExtractor::new(),
            session: Mutex::new(SessionContext::default()),
            sleep,
        })
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn brain(&self) -> &Arc<Brain> {
        &self.brain
    }

    pub fn outcomes(&self) -> &Arc<OutcomeTracker> {
        &self.outcomes
    }

    /// Handle one user utterance end to end: slash commands short-circuit;
    /// everything else is routed, enriched with recalled memories, run
    /// through the agent loop, and written back to memory.
    #[instrument(skip(self, text), fields(user = user_id))]
    pub async fn handle_message(&self, user_id: &str, text: &str) -> Result<String> {
        if let Some(command) = commands::parse(text) {
            let mut config = self.config.lock().expect("config lock");
            return commands::execute(&command, &self.brain, &mut config, &self.config_path);
        }

        self.sleep.note_interaction();
        {
            let mut session = self.session.lock().expect("session lock");
            self.session_extractor.harvest(text, &mut session);
        }

        let decision = self.router.route(text, None).await;
        info!(
            task = decision.task_type.as_str(),
            path = ?decision.path,
            confidence = decision.confidence,
            risk = %decision.risk,
            "request routed"
        );

        let request = self.build_request(user_id, &decision)?;
        let lane = self.brain.select_lane(&request);

        let agent_loop = AgentLoop::new(
            Arc::clone(&self.brain),
            Arc::clone(&self.executor),
            Arc::clone(&self.registry),
        );

        let started = Instant::now();
        let outcome = agent_loop.run(request).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        if let Some(lane) = &lane {
            self.outcomes.record(
                lane.engine.as_str(),
                &lane.model,
                decision.task_type,
                outcome.is_ok(),
                latency_ms,
            );
        }

        let outcome = outcome?;
        self.write_exchange(&decision, &outcome.turns)?;
        Ok(outcome.content)
    }

    fn build_request(&self, user_id: &str, decision: &RoutingDecision) -> Result<ThinkRequest> {
        let mut request = ThinkRequest::new(user_id);
        request.persona = Some(Persona::load_from(&self.persona_path)?);
        request.tools = self.registry.list_specs();

        // Ephemeral session facts render as a short prefix memory.
        if let Some(prefix) = self.session.lock().expect("session lock").render_prefix() {
            request.memories.push(prefix);
        }

        // Hybrid recall over the long-term store; access bookkeeping on hits.
        let options = SearchOptions {
            limit: RECALL_LIMIT,
            ..SearchOptions::default()
        };
        match self.store.search(&decision.input, &options) {
            Ok(hits) => {
                for hit in hits {
                    if let Err(err) = self.store.record_access(hit.cell.id) {
                        warn!(?err, "access bookkeeping failed");
                    }
                    let text = hit.cell.summary.as_deref().unwrap_or(&hit.cell.content);
                    request
                        .memories
                        .push(format!("[{}] {}", hit.cell.memory_type.as_str(), text));
                }
            }
            Err(err) => warn!(?err, "memory recall failed — continuing without"),
        }

        request.turns.push(Turn::user(decision.input.clone()));
        Ok(request)
    }

    /// Run the extraction pipeline over the exchange and persist the cells.
    fn write_exchange(&self, decision: &RoutingDecision, turns: &[Turn]) -> Result<()> {
        let conversation: Vec<ConversationTurn> = turns
            .iter()
            .map(|turn| ConversationTurn {
                role: match turn.role {
                    noema_brain::Role::User => noema_memory::TurnRole::User,
                    noema_brain::Role::Assistant => noema_memory::TurnRole::Assistant,
                    noema_brain::Role::System => noema_memory::TurnRole::System,
                    noema_brain::Role::Tool => noema_memory::TurnRole::Tool,
                },
                content: turn.content.clone(),
                timestamp: turn.timestamp,
            })
            .collect();

        let cells = {
            let mut extractor = self.extractor.lock().expect("extractor lock");
            extractor.extract(&format!("task:{}", decision.task_type.as_str()), &conversation)
        };
        for mut cell in cells {
            self.store.create(&mut cell)?;
        }
        Ok(())
    }

    /// Attempt a sleep cycle; cheap to call from an idle timer.
    pub async fn maybe_sleep(&self) -> Result<SleepOutcome> {
        self.sleep.try_sleep(&self.store, &self.outcomes).await
    }

    /// Reset per-session state (session facts, episode detector).
    pub fn end_session(&self) {
        self.session.lock().expect("session lock").clear();
        self.extractor.lock().expect("extractor lock").reset_session();
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
