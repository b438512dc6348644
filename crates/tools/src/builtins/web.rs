//! Web search tool.
//!
//! Uses the Brave Search API when a key is configured, otherwise falls back
//! to the DuckDuckGo Instant Answers API (no key required).

use anyhow::Result;
use async_trait::async_trait;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use crate::{RiskLevel, Tool, ToolArgs, ToolOutput, ToolParam, ToolSpec};

pub struct WebSearchTool {
    /// Optional Brave Search API key. Takes precedence over the
    /// `BRAVE_API_KEY` env var when both are set.
    pub api_key: Option<String>,
}

impl WebSearchTool {
    fn effective_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("BRAVE_API_KEY").ok().filter(|k| !k.trim().is_empty()))
    }

    async fn search_brave(&self, key: &str, query: &str, count: usize) -> Result<String> {
        let client = reqwest::Client::new();
        let response = client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", key)
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", &count.to_string())])
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            anyhow::bail!("brave search error ({status}): {body}");
        }

        let results = body
            .get("web")
            .and_then(|w| w.get("results"))
            .and_then(|r| r.as_array())
            .map(|items| {
                items
                    .iter()
                    .take(count)
                    .enumerate()
                    .map(|(i, item)| {
                        let title = item.get("title").and_then(|v| v.as_str()).unwrap_or("");
                        let url = item.get("url").and_then(|v| v.as_str()).unwrap_or("");
                        let desc = item
                            .get("description")
                            .and_then(|v| v.as_str())
                            .unwrap_or("");
                        format!("{}. {title}\n   {url}\n   {desc}", i + 1)
                    })
                    .collect::<Vec<_>>()
                    .join("\n\n")
            })
            .unwrap_or_default();

        if results.is_empty() {
            return Ok(format!("no results for '{query}'"));
        }
        Ok(results)
    }

    async fn search_duckduckgo(&self, query: &str) -> Result<String> {
        let encoded = utf8_percent_encode(query, NON_ALPHANUMERIC).to_string();
        let url = format!(
            "https://api.duckduckgo.com/?q={encoded}&format=json&no_html=1&skip_disambig=1"
        );
        let body: serde_json::Value = reqwest::Client::new().get(&url).send().await?.json().await?;

        let mut parts = Vec::new();
        if let Some(abstract_text) = body.get("AbstractText").and_then(|v| v.as_str()) {
            if !abstract_text.is_empty() {
                let source = body.get("AbstractURL").and_then(|v| v.as_str()).unwrap_or("");
                parts.push(format!("{abstract_text}\n   {source}"));
            }
        }
        if let Some(topics) = body.get("RelatedTopics").and_then(|v| v.as_array()) {
            for topic in topics.iter().take(5) {
                if let (Some(text), Some(url)) = (
                    topic.get("Text").and_then(|v| v.as_str()),
                    topic.get("FirstURL").and_then(|v| v.as_str()),
                ) {
                    parts.push(format!("- {text}\n  {url}"));
                }
            }
        }

        if parts.is_empty() {
            return Ok(format!("no results for '{query}'"));
        }
        Ok(parts.join("\n"))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "web_search".to_string(),
            description: "Search the web (Brave API when configured, DuckDuckGo otherwise)."
                .to_string(),
            params: vec![
                ToolParam::required("query", "Search query"),
                ToolParam::optional("count", "Number of results", "5"),
            ],
        }
    }

    fn assess_risk(&self, _args: &ToolArgs) -> RiskLevel {
        // Outbound network, but read-only.
        RiskLevel::Low
    }

    async fn run(&self, args: &ToolArgs) -> Result<ToolOutput> {
        let query = args
            .get("query")
            .ok_or_else(|| anyhow::anyhow!("missing required param: query"))?;
        let count: usize = args.get("count").and_then(|v| v.parse().ok()).unwrap_or(5);

        let rendered = match self.effective_key() {
            Some(key) => self.search_brave(&key, query, count).await?,
            None => self.search_duckduckgo(query).await?,
        };

        Ok(ToolOutput::ok(rendered))
    }
}
