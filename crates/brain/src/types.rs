//! Request and response envelopes shared by every lane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use noema_config::Persona;
use noema_tools::{ToolCall, ToolResult, ToolSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One conversation turn. Tool calls ride on assistant turns; tool results
/// ride on tool turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn tool(result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: if result.success {
                result.output.clone()
            } else {
                format!("error: {}", result.error)
            },
            tool_calls: Vec::new(),
            tool_results: vec![result],
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stream: bool,
}

impl Default for GenOptions {
    fn default() -> Self {
        Self {
            max_tokens: Some(2048),
            temperature: None,
            stream: false,
        }
    }
}

/// The Brain's input envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkRequest {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<Persona>,
    pub turns: Vec<Turn>,
    /// Recalled memories, already rendered to text.
    #[serde(default)]
    pub memories: Vec<String>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub options: GenOptions,
}

impl ThinkRequest {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            persona: None,
            turns: Vec::new(),
            memories: Vec::new(),
            tools: Vec::new(),
            options: GenOptions::default(),
        }
    }

    /// The most recent user content, used for complexity estimation.
    pub fn latest_user_content(&self) -> &str {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The Brain's output envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkResponse {
    /// Response text with tool-call markup excised.
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub usage: TokenUsage,
    pub done: bool,
}

/// One streaming slice. An error terminates the sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chunk {
    pub delta: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub done: bool,
}

impl Chunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            error: None,
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            delta: String::new(),
            error: None,
            done: true,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            delta: String::new(),
            error: Some(message.into()),
            done: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_user_content_skips_assistant_turns() {
        let mut request = ThinkRequest::new("u1");
        request.turns.push(Turn::user("first"));
        request.turns.push(Turn::assistant("reply"));
        request.turns.push(Turn::user("second"));
        request.turns.push(Turn::assistant("another"));
        assert_eq!(request.latest_user_content(), "second");
    }

    #[test]
    fn latest_user_content_empty_without_user_turns() {
        let request = ThinkRequest::new("u1");
        assert_eq!(request.latest_user_content(), "");
    }

    #[test]
    fn tool_turn_carries_result_and_error_text() {
        let failed = Turn::tool(noema_tools::ToolResult {
            call_id: "call_1".to_string(),
            success: false,
            output: String::new(),
            error: "boom".to_string(),
        });
        assert_eq!(failed.role, Role::Tool);
        assert!(failed.content.contains("boom"));
        assert_eq!(failed.tool_results.len(), 1);
    }

    #[test]
    fn request_serde_round_trip() {
        let mut request = ThinkRequest::new("u1");
        request.turns.push(Turn::user("hello"));
        request.memories.push("user likes rust".to_string());
        let json = serde_json::to_string(&request).unwrap();
        let back: ThinkRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.user_id, "u1");
        assert_eq!(back.turns.len(), 1);
        assert_eq!(back.memories.len(), 1);
    }
}
