//! Alternative chat API adapter: `POST /v1/messages` with `x-api-key` auth.

use serde_json::json;
use tracing::debug;

use noema_config::expand_env_placeholders;

use super::EngineReply;
use crate::lanes::Lane;
use crate::prompt::assemble_chat;
use crate::types::{ThinkRequest, TokenUsage};
use crate::BrainError;

const API_VERSION: &str = "2023-06-01";

fn build_payload(lane: &Lane, request: &ThinkRequest) -> (String, serde_json::Value) {
    // This protocol takes the system prompt as a top-level field; the
    // messages array holds strictly alternating user/assistant content.
    let mut system = String::new();
    let mut messages: Vec<serde_json::Value> = Vec::new();
    for message in assemble_chat(request) {
        match message.role.as_str() {
            "system" => system = message.content,
            // Tool results ride as user messages so the alternation holds.
            "tool" => messages.push(json!({"role": "user", "content": message.content})),
            role => messages.push(json!({"role": role, "content": message.content})),
        }
    }

    let mut payload = json!({
        "model": lane.model,
        "messages": messages,
        "max_tokens": request.options.max_tokens.unwrap_or(2048),
    });
    if !system.is_empty() {
        payload["system"] = json!(system);
    }
    if let Some(temperature) = request.options.temperature {
        payload["temperature"] = json!(temperature);
    }
    (system, payload)
}

pub async fn messages(
    client: &reqwest::Client,
    lane: &Lane,
    request: &ThinkRequest,
) -> Result<EngineReply, BrainError> {
    let endpoint = format!("{}/v1/messages", lane.endpoint);
    let (_, payload) = build_payload(lane, request);

    let api_key = lane
        .api_key
        .as_deref()
        .map(expand_env_placeholders)
        .unwrap_or_default();

    let response = client
        .post(&endpoint)
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .json(&payload)
        .send()
        .await
        .map_err(|source| BrainError::Transport {
            lane: lane.name.clone(),
            source,
        })?;

    let status = response.status();
    let body: serde_json::Value =
        response.json().await.map_err(|source| BrainError::Transport {
            lane: lane.name.clone(),
            source,
        })?;

    if !status.is_success() {
        return Err(BrainError::Backend {
            lane: lane.name.clone(),
            status: status.as_u16(),
            message: body.to_string(),
        });
    }

    let content = body
        .get("content")
        .and_then(|c| c.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .filter(|c| !c.is_empty())
        .ok_or_else(|| BrainError::Decode {
            lane: lane.name.clone(),
            message: format!("response missing content[].text: {body}"),
        })?;

    debug!(lane = %lane.name, content_len = content.len(), "messages reply received");

    let usage = body.get("usage");
    let prompt_tokens = usage
        .and_then(|u| u.get("input_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    let completion_tokens = usage
        .and_then(|u| u.get("output_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

    Ok(EngineReply {
        content,
        usage: TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lanes::Engine;
    use crate::types::Turn;

    fn lane() -> Lane {
        Lane {
            name: "smart".to_string(),
            engine: Engine::Anthropic,
            model: "claude-sonnet-4-20250514".to_string(),
            endpoint: "https://api.anthropic.com".to_string(),
            api_key: Some("sk-test".to_string()),
        }
    }

    #[test]
    fn system_prompt_is_a_top_level_field() {
        let mut request = ThinkRequest::new("u1");
        request.turns.push(Turn::user("hello"));
        let (system, payload) = build_payload(&lane(), &request);
        assert!(!system.is_empty());
        assert!(payload["system"].as_str().is_some());
        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn max_tokens_is_always_present() {
        let mut request = ThinkRequest::new("u1");
        request.options.max_tokens = None;
        let (_, payload) = build_payload(&lane(), &request);
        assert_eq!(payload["max_tokens"], 2048);
    }

    #[test]
    fn tool_results_become_user_messages() {
        let mut request = ThinkRequest::new("u1");
        request.turns.push(Turn::tool(noema_tools::ToolResult {
            call_id: "call_1".to_string(),
            success: true,
            output: "done".to_string(),
            error: String::new(),
        }));
        let (_, payload) = build_payload(&lane(), &request);
        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "user");
        assert!(messages[0]["content"]
            .as_str()
            .unwrap()
            .contains("[Tool Result call_1]"));
    }
}
