//! Remote-brain client: the whole facade proxied over a native HTTP
//! protocol (`/v1/think`, `/v1/memory`, `/v1/memory/search`, `/health`)
//! with bearer-token auth.

use serde_json::json;

use noema_config::{BrainConfig, expand_env_placeholders};

use crate::types::{ThinkRequest, ThinkResponse};
use crate::BrainError;

pub struct RemoteBrain {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl RemoteBrain {
    pub fn new(config: &BrainConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.remote_endpoint.trim_end_matches('/').to_string(),
            token: config.remote_token.clone(),
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => {
                let expanded = expand_env_placeholders(token);
                if expanded.trim().is_empty() {
                    builder
                } else {
                    builder.bearer_auth(expanded)
                }
            }
            None => builder,
        }
    }

    async fn post(&self, path: &str, payload: &serde_json::Value) -> Result<serde_json::Value, BrainError> {
        let url = format!("{}{path}", self.endpoint);
        let response = self
            .request(self.client.post(&url))
            .json(payload)
            .send()
            .await
            .map_err(|source| BrainError::Transport {
                lane: "remote".to_string(),
                source,
            })?;

        let status = response.status();
        let body: serde_json::Value =
            response.json().await.map_err(|source| BrainError::Transport {
                lane: "remote".to_string(),
                source,
            })?;

        if !status.is_success() {
            return Err(BrainError::Backend {
                lane: "remote".to_string(),
                status: status.as_u16(),
                message: body.to_string(),
            });
        }

        // An error field in the body overrides HTTP 200.
        if let Some(error) = body.get("error").and_then(|e| e.as_str()) {
            if !error.is_empty() {
                return Err(BrainError::Remote(error.to_string()));
            }
        }

        Ok(body)
    }

    pub async fn think(&self, request: &ThinkRequest) -> Result<ThinkResponse, BrainError> {
        let payload = serde_json::to_value(request).map_err(|e| BrainError::Decode {
            lane: "remote".to_string(),
            message: e.to_string(),
        })?;
        let body = self.post("/v1/think", &payload).await?;
        serde_json::from_value(body).map_err(|e| BrainError::Decode {
            lane: "remote".to_string(),
            message: e.to_string(),
        })
    }

    /// Marshal one memory record to the remote store.
    pub async fn store_memory(
        &self,
        record: &serde_json::Value,
    ) -> Result<serde_json::Value, BrainError> {
        self.post("/v1/memory", record).await
    }

    /// Query the remote memory store.
    pub async fn search_memory(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<serde_json::Value, BrainError> {
        self.post("/v1/memory/search", &json!({"query": query, "limit": limit}))
            .await
    }

    pub async fn health(&self) -> Result<bool, BrainError> {
        let url = format!("{}/health", self.endpoint);
        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(|source| BrainError::Transport {
                lane: "remote".to_string(),
                source,
            })?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_normalized() {
        let mut config = BrainConfig::default();
        config.remote_endpoint = "http://localhost:8484/".to_string();
        let remote = RemoteBrain::new(&config);
        assert_eq!(remote.endpoint, "http://localhost:8484");
    }
}
