//! Local completion engine adapter: `POST /api/generate` with NDJSON
//! streaming (`{response, done}` objects) and `GET /api/tags` for listing.

use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use super::{EngineReply, LineBuffer};
use crate::lanes::Lane;
use crate::prompt::assemble_completion;
use crate::types::{Chunk, ThinkRequest, TokenUsage};
use crate::BrainError;

fn build_payload(lane: &Lane, request: &ThinkRequest, stream: bool) -> serde_json::Value {
    let mut options = json!({});
    if let Some(temperature) = request.options.temperature {
        options["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.options.max_tokens {
        options["num_predict"] = json!(max_tokens);
    }
    json!({
        "model": lane.model,
        "prompt": assemble_completion(request),
        "stream": stream,
        "options": options,
    })
}

pub async fn generate(
    client: &reqwest::Client,
    lane: &Lane,
    request: &ThinkRequest,
) -> Result<EngineReply, BrainError> {
    let endpoint = format!("{}/api/generate", lane.endpoint);
    let payload = build_payload(lane, request, false);

    let response = client
        .post(&endpoint)
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
        .get("response")
        .and_then(|value| value.as_str())
        .ok_or_else(|| BrainError::Decode {
            lane: lane.name.clone(),
            message: format!("response missing text field: {body}"),
        })?
        .to_string();

    debug!(lane = %lane.name, content_len = content.len(), "generate reply received");
    Ok(EngineReply {
        content,
        usage: parse_usage(&body),
    })
}

pub async fn generate_stream(
    client: &reqwest::Client,
    lane: &Lane,
    request: &ThinkRequest,
    tx: &mpsc::Sender<Chunk>,
) -> Result<EngineReply, BrainError> {
    let endpoint = format!("{}/api/generate", lane.endpoint);
    let payload = build_payload(lane, request, true);

    let mut response = client
        .post(&endpoint)
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
    let mut usage = TokenUsage::default();
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
            if line.trim().is_empty() {
                continue;
            }
            let Ok(json) = serde_json::from_str::<serde_json::Value>(&line) else {
                continue;
            };
            if let Some(delta) = json.get("response").and_then(|v| v.as_str()) {
                if !delta.is_empty() {
                    full.push_str(delta);
                    let _ = tx.send(Chunk::delta(delta)).await;
                }
            }
            // The terminal object carries `done: true` plus eval counters.
            if json.get("done").and_then(|v| v.as_bool()).unwrap_or(false) {
                usage = parse_usage(&json);
            }
        }
    }

    Ok(EngineReply {
        content: full,
        usage,
    })
}

fn parse_usage(body: &serde_json::Value) -> TokenUsage {
    let prompt_tokens = body
        .get("prompt_eval_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    let completion_tokens = body.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
    }
}

/// `GET /api/tags` — locally installed model names.
pub async fn list_models(client: &reqwest::Client, lane: &Lane) -> Result<Vec<String>, BrainError> {
    let endpoint = format!("{}/api/tags", lane.endpoint);
    let body: serde_json::Value = client
        .get(&endpoint)
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
        .get("models")
        .and_then(|m| m.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("name").and_then(|n| n.as_str()))
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default())
}
