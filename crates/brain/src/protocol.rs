//! The prompt-embedded tool-call wire protocol.
//!
//! Models emit calls as the literal tag pair
//! `<tool>NAME</tool><params>{…json object…}</params>`. Everything else in
//! a response is user-facing text. The parser excises matched call markup
//! and assigns sequential ids (`call_1`, `call_2`, …) per parse.

use std::collections::HashMap;

use tracing::warn;

use noema_tools::ToolCall;

const TOOL_OPEN: &str = "<tool>";
const TOOL_CLOSE: &str = "</tool>";
const PARAMS_OPEN: &str = "<params>";
const PARAMS_CLOSE: &str = "</params>";

/// Scan a model response for tool calls.
///
/// Returns the parsed calls in order plus the cleaned response text with
/// all matched tool-call substrings excised and surrounding whitespace
/// trimmed. A call with an invalid params body is dropped and scanning
/// resumes after its closing tag.
pub fn parse_tool_calls(response: &str) -> (String, Vec<ToolCall>) {
    let mut cleaned = String::with_capacity(response.len());
    let mut calls = Vec::new();
    let mut rest = response;

    while let Some(open) = rest.find(TOOL_OPEN) {
        let before = &rest[..open];
        let after_open = &rest[open + TOOL_OPEN.len()..];

        let Some(name_end) = after_open.find(TOOL_CLOSE) else {
            // Unterminated tag: everything from here on is plain text.
            break;
        };
        let name = after_open[..name_end].trim();
        let after_tool = &after_open[name_end + TOOL_CLOSE.len()..];

        // The params block must follow, allowing whitespace between tags.
        let after_ws = after_tool.trim_start();
        let (params_body, after_call) = match after_ws
            .strip_prefix(PARAMS_OPEN)
            .and_then(|inner| inner.find(PARAMS_CLOSE).map(|end| (&inner[..end], &inner[end + PARAMS_CLOSE.len()..])))
        {
            Some(parts) => parts,
            None => {
                // No params block: drop the tool tag, resume after it.
                warn!(tool = name, "tool call without params block dropped");
                cleaned.push_str(before);
                rest = after_tool;
                continue;
            }
        };

        match parse_params(params_body) {
            Some(input) if !name.is_empty() => {
                calls.push(ToolCall {
                    id: format!("call_{}", calls.len() + 1),
                    name: name.to_string(),
                    input,
                    reason: String::new(),
                });
                cleaned.push_str(before);
                rest = after_call;
            }
            _ => {
                warn!(tool = name, "tool call with invalid params dropped");
                cleaned.push_str(before);
                rest = after_call;
            }
        }
    }

    cleaned.push_str(rest);
    (cleaned.trim().to_string(), calls)
}

/// Params must be a JSON object; values are normalised to strings.
fn parse_params(body: &str) -> Option<HashMap<String, String>> {
    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    let object = value.as_object()?;
    Some(
        object
            .iter()
            .map(|(k, v)| {
                let rendered = match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                (k.clone(), rendered)
            })
            .collect(),
    )
}

/// Render a call back into its wire form. `parse(render(call))` yields the
/// same call for every legal call.
pub fn render_tool_call(call: &ToolCall) -> String {
    let params: serde_json::Map<String, serde_json::Value> = call
        .input
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    format!(
        "{TOOL_OPEN}{}{TOOL_CLOSE}{PARAMS_OPEN}{}{PARAMS_CLOSE}",
        call.name,
        serde_json::Value::Object(params)
    )
}

// ── Tests ────────────────────────────────────────────────────────────────────
