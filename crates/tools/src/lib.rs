use std::collections::HashMap;
use std::fmt;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ── Risk taxonomy ────────────────────────────────────────────────────────────

/// How dangerous an operation is. Ordered so thresholds can use `>=`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl RiskLevel {
    /// Parse a config-file risk name. Unknown names map to `High` so a typo
    /// in the confirmation threshold fails safe.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "none" => RiskLevel::None,
            "low" => RiskLevel::Low,
            "medium" => RiskLevel::Medium,
            "critical" => RiskLevel::Critical,
            _ => RiskLevel::High,
        }
    }
}

// ── Tool metadata ────────────────────────────────────────────────────────────

/// Describes a single parameter that a tool accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    pub description: String,
    pub required: bool,
    /// JSON-schema-ish type name: `string`, `number`, `boolean`.
    pub param_type: String,
    pub default: Option<String>,
}

impl ToolParam {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
            param_type: "string".to_string(),
            default: None,
        }
    }

    pub fn optional(name: &str, description: &str, default: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: false,
            param_type: "string".to_string(),
            default: Some(default.to_string()),
        }
    }
}

/// Static metadata about a tool, used by the LLM to decide which tool to call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ToolParam>,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Stable id assigned at parse time (`call_1`, `call_2`, …).
    pub id: String,
    pub name: String,
    pub input: HashMap<String, String>,
    /// Free-text rationale the model attached, if any.
    #[serde(default)]
    pub reason: String,
}

/// The structured result fed back to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub success: bool,
    pub output: String,
    #[serde(default)]
    pub error: String,
}

/// What a tool's `run` produces. The executor wraps this with risk and
/// timing before it becomes a [`ToolResult`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
    #[serde(default)]
    pub error: String,
    /// Side-effect accounting: bytes written, exit code, files matched…
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ToolOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            ..Self::default()
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

pub type ToolArgs = HashMap<String, String>;

// ── Tool trait and registry ──────────────────────────────────────────────────

/// Capability set every tool variant implements: name (via spec), structural
/// validation, risk assessment, execution.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Structural validation. Failures here abort before any side effect.
    /// The default checks that every required parameter is present and
    /// non-empty.
    fn validate(&self, args: &ToolArgs) -> Result<()> {
        for param in self.spec().params.iter().filter(|p| p.required) {
            match args.get(&param.name) {
                Some(v) if !v.trim().is_empty() => {}
                _ => bail!("missing required param: {}", param.name),
            }
        }
        Ok(())
    }

    /// Risk of executing with these arguments. Read-only tools return `None`.
    fn assess_risk(&self, args: &ToolArgs) -> RiskLevel;

    async fn run(&self, args: &ToolArgs) -> Result<ToolOutput>;
}

/// Central registry for all available tools. First registration of a name
/// wins on `get`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn list_specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.spec().name == name)
            .map(|t| t.as_ref())
    }
}

// ── Built-in tools ───────────────────────────────────────────────────────────

pub mod builtins;
pub use builtins::{
    EditFileTool, GlobTool, GrepTool, ReadFileTool, RunShellTool, WebSearchTool, WriteFileTool,
};

// ── Tests ────────────────────────────────────────────────────────────────────
