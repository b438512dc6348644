//! OpenAI-protocol adapter: `POST /v1/chat/completions` with SSE streaming.
//! Shared by the cloud chat API, the fast cloud API, and the local
//! high-throughput server — they differ only in base URL and auth.

use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use noema_config::expand_env_placeholders;

use super::{EngineReply, LineBuffer};
use crate::lanes::Lane;
use crate::prompt::assemble_chat;
use crate::types::{Chunk, ThinkRequest, TokenUsage};
use crate::BrainError;

fn build_payload(lane: &Lane, request: &ThinkRequest, stream: bool) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = assemble_chat(request)
        .into_iter()
        .map(|m| {
            // The OpenAI protocol requires tool messages to reference a call;
            // our prompt-level protocol embeds results as assistant text.
            let role = if m.role == "tool" { "assistant" } else { m.role.as_str() };
            json!({"role": role, "content": m.content})
        })
        .collect();

    let mut payload = json!({
        "model": lane.model,
        "messages": messages,
        "stream": stream,
    });
    if let Some(temperature) = request.options.temperature {
        payload["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.options.max_tokens {
        payload["max_tokens"] = json!(max_tokens);
    }
    payload
}

fn apply_auth(builder: reqwest::RequestBuilder, lane: &Lane) -> reqwest::RequestBuilder {
    match &lane.api_key {
        Some(key) => {
            let expanded = expand_env_placeholders(key);
            if expanded.trim().is_empty() {
                builder
            } else {
                builder.bearer_auth(expanded)
            }
        }
        None => builder,
    }
}

pub async fn chat(
    client: &reqwest::Client,
    lane: &Lane,
    request: &ThinkRequest,
) -> Result<EngineReply, BrainError> {
    let endpoint = format!("{}/v1/chat/completions", lane.endpoint);
    let payload = build_payload(lane, request, false);

    let response = apply_auth(client.post(&endpoint), lane)
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
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .ok_or_else(|| BrainError::Decode {
            lane: lane.name.clone(),
            message: format!("response missing choices[0].message.content: {body}"),
        })?
        .to_string();

    debug!(lane = %lane.name, content_len = content.len(), "chat completion received");
    Ok(EngineReply {
        content,
        usage: parse_usage(&body),
    })
}

pub async fn chat_stream(
    client: &reqwest::Client,
    lane: &Lane,
    request: &ThinkRequest,
    tx: &mpsc::Sender<Chunk>,
) -> Result<EngineReply, BrainError> {
    let endpoint = format!("{}/v1/chat/completions", lane.endpoint);
    let payload = build_payload(lane, request, true);

    let mut response = apply_auth(client.post(&endpoint), lane)
        .json(&payload)
        .send()
        .await
        .map_err(|source| BrainError::Transport {
            lane: lane.name.clone(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BrainError::Backend {
            lane: lane.name.clone(),
            status: status.as_u16(),
            message: body,
        });
    }

    let mut full = String::new();
    let mut lines = LineBuffer::new();
    loop {
        let chunk = response
            .chunk()
            .await
            .map_err(|source| BrainError::Transport {
                lane: lane.name.clone(),
                source,
            })?;
        let Some(chunk) = chunk else { break };
        for line in lines.push(&chunk) {
            let line = line.trim();
            if line.is_empty() || line == "data: [DONE]" {
                continue;
            }
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            let Ok(json) = serde_json::from_str::<serde_json::Value>(data) else {
                continue;
            };
            if let Some(delta) = json
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|choice| choice.get("delta"))
                .and_then(|delta| delta.get("content"))
                .and_then(|content| content.as_str())
            {
                if !delta.is_empty() {
                    full.push_str(delta);
                    let _ = tx.send(Chunk::delta(delta)).await;
                }
            }
        }
    }

    Ok(EngineReply {
        content: full,
        usage: TokenUsage::default(),
    })
}

fn parse_usage(body: &serde_json::Value) -> TokenUsage {
    let usage = body.get("usage");
    TokenUsage {
        prompt_tokens: read_u32(usage, "prompt_tokens"),
        completion_tokens: read_u32(usage, "completion_tokens"),
        total_tokens: read_u32(usage, "total_tokens"),
    }
}

fn read_u32(value: Option<&serde_json::Value>, key: &str) -> u32 {
    value
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32
}

/// `GET /v1/models` on the high-throughput server.
pub async fn list_models(client: &reqwest::Client, lane: &Lane) -> Result<Vec<String>, BrainError> {
    let endpoint = format!("{}/v1/models", lane.endpoint);
    let body: serde_json::Value = apply_auth(client.get(&endpoint), lane)
        .send()
        .await
        .map_err(|source| BrainError::Transport {
            lane: lane.name.clone(),
            source,
        })?
        .json()
        .await
        .map_err(|source| BrainError::Transport {
            lane: lane.name.clone(),
            source,
        })?;
    Ok(body
        .get("data")
        .and_then(|d| d.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("id").and_then(|id| id.as_str()))
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default())
}

/// `GET /health` on the high-throughput server.
pub async fn health(client: &reqwest::Client, lane: &Lane) -> Result<bool, BrainError> {
    let endpoint = format!("{}/health", lane.endpoint);
    let response = client
        .get(&endpoint)
        .send()
        .await
        .map_err(|source| BrainError::Transport {
            lane: lane.name.clone(),
            source,
        })?;
    Ok(response.status().is_success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Turn;

    fn lane() -> Lane {
        Lane {
            name: "fast".to_string(),
            engine: crate::lanes::Engine::Groq,
            model: "llama-3.1-8b-instant".to_string(),
            endpoint: "https://api.groq.com/openai".to_string(),
            api_key: None,
        }
    }

    #[test]
    fn payload_carries_model_messages_and_options() {
        let mut request = ThinkRequest::new("u1");
        request.turns.push(Turn::user("hello"));
        request.options.temperature = Some(0.2);
        request.options.max_tokens = Some(512);

        let payload = build_payload(&lane(), &request, true);
        assert_eq!(payload["model"], "llama-3.1-8b-instant");
        assert_eq!(payload["stream"], true);
        assert_eq!(payload["temperature"], 0.2);
        assert_eq!(payload["max_tokens"], 512);
        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "hello");
    }

    #[test]
    fn tool_messages_are_downgraded_to_assistant() {
        let mut request = ThinkRequest::new("u1");
        request.turns.push(Turn::tool(noema_tools::ToolResult {
            call_id: "call_1".to_string(),
            success: true,
            output: "ok".to_string(),
            error: String::new(),
        }));
        let payload = build_payload(&lane(), &request, false);
        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages[1]["role"], "assistant");
        assert!(messages[1]["content"]
            .as_str()
            .unwrap()
            .starts_with("[Tool Result call_1]:"));
    }

    #[test]
    fn usage_parses_with_defaults() {
        let body = serde_json::json!({"usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}});
        let usage = parse_usage(&body);
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.total_tokens, 15);

        let empty = parse_usage(&serde_json::json!({}));
        assert_eq!(empty.total_tokens, 0);
    }
}
