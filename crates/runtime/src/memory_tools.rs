//! Memory-facing tools registered alongside the shell/file/search built-ins,
//! letting the model store and recall cells explicitly.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use noema_memory::{MemCell, MemoryStore, MemoryType, SearchOptions};
use noema_tools::{RiskLevel, Tool, ToolArgs, ToolOutput, ToolParam, ToolSpec};

pub struct RememberTool {
    pub store: Arc<MemoryStore>,
}

#[async_trait]
impl Tool for RememberTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "remember".to_string(),
            description: "Store a fact, preference, or lesson in long-term memory.".to_string(),
            params: vec![
                ToolParam::required("content", "What to remember"),
                ToolParam::optional(
                    "memory_type",
                    "One of the taxonomy names (fact, preference, lesson, …)",
                    "fact",
                ),
            ],
        }
    }

    fn assess_risk(&self, _args: &ToolArgs) -> RiskLevel {
        RiskLevel::None
    }

    async fn run(&self, args: &ToolArgs) -> Result<ToolOutput> {
        let content = args
            .get("content")
            .ok_or_else(|| anyhow::anyhow!("missing required param: content"))?;
        let memory_type = args
            .get("memory_type")
            .and_then(|t| MemoryType::parse(t))
            .unwrap_or(MemoryType::Fact);

        let mut cell = MemCell::new(content.clone(), memory_type);
        cell.source_id = "tool:remember".to_string();
        self.store.create(&mut cell)?;
        Ok(ToolOutput::ok(format!(
            "remembered as {} ({})",
            memory_type.as_str(),
            cell.id
        ))
        .with_meta("cell_id", cell.id))
    }
}

pub struct RecallTool {
    pub store: Arc<MemoryStore>,
}

#[async_trait]
impl Tool for RecallTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "recall".to_string(),
            description: "Search long-term memory for relevant entries.".to_string(),
            params: vec![
                ToolParam::required("query", "What to look for"),
                ToolParam::optional("limit", "Maximum results", "5"),
            ],
        }
    }

    fn assess_risk(&self, _args: &ToolArgs) -> RiskLevel {
        RiskLevel::None
    }

    async fn run(&self, args: &ToolArgs) -> Result<ToolOutput> {
        let query = args
            .get("query")
            .ok_or_else(|| anyhow::anyhow!("missing required param: query"))?;
        let limit: usize = args.get("limit").and_then(|v| v.parse().ok()).unwrap_or(5);

        let options = SearchOptions {
            limit,
            ..SearchOptions::default()
        };
        let hits = self.store.search(query, &options)?;
        if hits.is_empty() {
            return Ok(ToolOutput::ok(format!("no memories match '{query}'")));
        }

        let mut lines = Vec::with_capacity(hits.len());
        for hit in &hits {
            self.store.record_access(hit.cell.id)?;
            lines.push(format!(
                "- [{}] {}",
                hit.cell.memory_type.as_str(),
                hit.cell.summary.as_deref().unwrap_or(&hit.cell.content)
            ));
        }
        Ok(ToolOutput::ok(lines.join("\n")).with_meta("hits", hits.len()))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn remember_then_recall_round_trip() -> Result<()> {
        let store = store();
        let remember = RememberTool {
            store: Arc::clone(&store),
        };
        let mut args = ToolArgs::new();
        args.insert("content".to_string(), "user deploys on fridays".to_string());
        args.insert("memory_type".to_string(), "preference".to_string());
        let out = remember.run(&args).await?;
        assert!(out.success);
        assert!(out.metadata.contains_key("cell_id"));

        let recall = RecallTool {
            store: Arc::clone(&store),
        };
        let mut args = ToolArgs::new();
        args.insert("query".to_string(), "deploys fridays".to_string());
        let out = recall.run(&args).await?;
        assert!(out.success);
        assert!(out.output.contains("deploys on fridays"));
        assert!(out.output.contains("[preference]"));
        Ok(())
    }

    #[tokio::test]
    async fn recall_bumps_access_counters() -> Result<()> {
        let store = store();
        let mut cell = MemCell::new("the cache lives in redis", MemoryType::Fact);
        store.create(&mut cell)?;

        let recall = RecallTool {
            store: Arc::clone(&store),
        };
        let mut args = ToolArgs::new();
        args.insert("query".to_string(), "redis cache".to_string());
        recall.run(&args).await?;

        let loaded = store.get(cell.id)?.unwrap();
        assert_eq!(loaded.access_count, 1);
        assert!(loaded.last_access_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_memory_type_defaults_to_fact() -> Result<()> {
        let store = store();
        let remember = RememberTool {
            store: Arc::clone(&store),
        };
        let mut args = ToolArgs::new();
        args.insert("content".to_string(), "something".to_string());
        args.insert("memory_type".to_string(), "galaxy".to_string());
        let out = remember.run(&args).await?;
        assert!(out.output.contains("fact"));
        Ok(())
    }
}
