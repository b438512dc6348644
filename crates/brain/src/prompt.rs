//! Engine-aware prompt assembly.
//!
//! Chat-style engines get role-segmented messages: one system message
//! (persona or the built-in tool-use default, plus the tool-spec block and
//! recalled memories), then the conversation turns in order. Completion-style
//! engines get the same content joined with blank-line separators.
//!
//! Tool results appear either as dedicated `tool`-role messages or as
//! assistant-role messages beginning `[Tool Result …]:` — consumers must
//! understand both forms.

use noema_tools::ToolSpec;

use crate::types::{Role, ThinkRequest, Turn};

/// Built-in system prompt used when the request carries no persona.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a capable personal assistant. \
When a tool is needed, emit at most one call per reply using exactly this form: \
<tool>TOOL_NAME</tool><params>{\"param\": \"value\"}</params> — the params body \
must be a JSON object. After the tool result arrives, continue the task or give \
your final answer as plain text.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

/// Render the tool-spec block appended to the system message.
fn render_tool_specs(tools: &[ToolSpec]) -> String {
    let mut out = String::from("Available tools:\n");
    for tool in tools {
        out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        for param in &tool.params {
            let required = if param.required { "required" } else { "optional" };
            out.push_str(&format!(
                "    {} ({}, {}): {}\n",
                param.name, param.param_type, required, param.description
            ));
        }
    }
    out
}

fn render_memories(memories: &[String]) -> String {
    let mut out = String::from("Recalled memories:\n");
    for memory in memories {
        out.push_str(&format!("- {memory}\n"));
    }
    out
}

/// System message content: persona (or default), tool block, memory block.
fn system_content(request: &ThinkRequest) -> String {
    let mut system = match &request.persona {
        Some(persona) => format!("{}\n\n{}", persona.system_prompt(), DEFAULT_SYSTEM_PROMPT),
        None => DEFAULT_SYSTEM_PROMPT.to_string(),
    };
    if !request.tools.is_empty() {
        system.push_str("\n\n");
        system.push_str(&render_tool_specs(&request.tools));
    }
    if !request.memories.is_empty() {
        system.push_str("\n\n");
        system.push_str(&render_memories(&request.memories));
    }
    system
}

fn turn_to_message(turn: &Turn) -> WireMessage {
    match turn.role {
        Role::Tool => {
            let call_id = turn
                .tool_results
                .first()
                .map(|r| r.call_id.as_str())
                .unwrap_or("unknown");
            WireMessage {
                role: "tool".to_string(),
                content: format!("[Tool Result {call_id}]: {}", turn.content),
            }
        }
        role => WireMessage {
            role: role.as_str().to_string(),
            content: turn.content.clone(),
        },
    }
}

/// Role-segmented messages for chat-style engines.
pub fn assemble_chat(request: &ThinkRequest) -> Vec<WireMessage> {
    let mut messages = vec![WireMessage {
        role: "system".to_string(),
        content: system_content(request),
    }];
    messages.extend(request.turns.iter().map(turn_to_message));
    messages
}

/// One joined prompt for completion-style engines: the same content with
/// blank-line separators and role prefixes on the conversation turns.
pub fn assemble_completion(request: &ThinkRequest) -> String {
    let mut sections = vec![system_content(request)];
    for turn in &request.turns {
        let message = turn_to_message(turn);
        let prefix = match message.role.as_str() {
            "user" => "User",
            "assistant" => "Assistant",
            "tool" => "Tool",
            other => other,
        };
        sections.push(format!("{prefix}: {}", message.content));
    }
    sections.push("Assistant:".to_string());
    sections.join("\n\n")
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use noema_config::Persona;
    use noema_tools::{ToolParam, ToolResult};

    use super::*;
    use crate::types::Turn;

    fn request_with_tools() -> ThinkRequest {
        let mut request = ThinkRequest::new("u1");
        request.tools.push(ToolSpec {
            name: "read_file".to_string(),
            description: "Read a file".to_string(),
            params: vec![ToolParam::required("path", "File path")],
        });
        request.memories.push("user prefers short answers".to_string());
        request.turns.push(Turn::user("hello"));
        request
    }

    #[test]
    fn chat_assembly_puts_everything_in_system_message() {
        let request = request_with_tools();
        let messages = assemble_chat(&request);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("<tool>TOOL_NAME</tool>"));
        assert!(messages[0].content.contains("read_file"));
        assert!(messages[0].content.contains("user prefers short answers"));
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content, "hello");
    }

    #[test]
    fn persona_prompt_leads_the_system_message() {
        let mut request = request_with_tools();
        request.persona = Some(Persona::default());
        let messages = assemble_chat(&request);
        assert!(messages[0].content.starts_with("You are Noema"));
        assert!(messages[0].content.contains("<tool>TOOL_NAME</tool>"));
    }

    #[test]
    fn tool_turns_render_with_result_marker() {
        let mut request = ThinkRequest::new("u1");
        request.turns.push(Turn::tool(ToolResult {
            call_id: "call_1".to_string(),
            success: true,
            output: "file contents".to_string(),
            error: String::new(),
        }));
        let messages = assemble_chat(&request);
        assert_eq!(messages[1].role, "tool");
        assert!(messages[1].content.starts_with("[Tool Result call_1]:"));
        assert!(messages[1].content.contains("file contents"));
    }

    #[test]
    fn completion_assembly_joins_with_blank_lines() {
        let mut request = request_with_tools();
        request.turns.push(Turn::assistant("hi back"));
        let prompt = assemble_completion(&request);
        let sections: Vec<&str> = prompt.split("\n\n").collect();
        assert!(sections.len() >= 4);
        assert!(prompt.contains("User: hello"));
        assert!(prompt.contains("Assistant: hi back"));
        assert!(prompt.ends_with("Assistant:"));
    }

    #[test]
    fn empty_tool_and_memory_blocks_are_omitted() {
        let mut request = ThinkRequest::new("u1");
        request.turns.push(Turn::user("hello"));
        let messages = assemble_chat(&request);
        assert!(!messages[0].content.contains("Available tools"));
        assert!(!messages[0].content.contains("Recalled memories"));
    }
}
