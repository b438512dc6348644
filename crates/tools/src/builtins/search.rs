//! Workspace search tools: glob matching and content grep.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use globset::GlobBuilder;
use ignore::WalkBuilder;
use regex::Regex;
use walkdir::WalkDir;

use crate::{RiskLevel, Tool, ToolArgs, ToolOutput, ToolParam, ToolSpec};

// ── glob ─────────────────────────────────────────────────────────────────────

pub struct GlobTool {
    pub workspace_root: PathBuf,
}

#[async_trait]
impl Tool for GlobTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "glob".to_string(),
            description: "Find files matching a glob pattern (e.g. `src/**/*.rs`).".to_string(),
            params: vec![
                ToolParam::required("pattern", "Glob pattern relative to the workspace root"),
                ToolParam::optional("max_results", "Maximum paths returned", "200"),
            ],
        }
    }

    fn assess_risk(&self, _args: &ToolArgs) -> RiskLevel {
        RiskLevel::None
    }

    async fn run(&self, args: &ToolArgs) -> Result<ToolOutput> {
        let pattern = args
            .get("pattern")
            .ok_or_else(|| anyhow::anyhow!("missing required param: pattern"))?;
        let max_results: usize = args
            .get("max_results")
            .and_then(|v| v.parse().ok())
            .unwrap_or(200);

        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| anyhow::anyhow!("invalid glob pattern '{}': {}", pattern, e))?
            .compile_matcher();

        let mut matched = Vec::new();
        for entry in WalkDir::new(&self.workspace_root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let rel = match entry.path().strip_prefix(&self.workspace_root) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if matcher.is_match(rel) {
                matched.push(rel.display().to_string());
                if matched.len() >= max_results {
                    break;
                }
            }
        }

        let count = matched.len();
        let listing = if matched.is_empty() {
            format!("no files match '{pattern}'")
        } else {
            matched.join("\n")
        };
        Ok(ToolOutput::ok(listing).with_meta("files_matched", count))
    }
}

// ── grep ─────────────────────────────────────────────────────────────────────

pub struct GrepTool {
    pub workspace_root: PathBuf,
}

#[async_trait]
impl Tool for GrepTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "grep".to_string(),
            description: "Search file contents for a regex pattern, honoring ignore files."
                .to_string(),
            params: vec![
                ToolParam::required("pattern", "Regular expression to search for"),
                ToolParam::optional("path", "Subdirectory to search", "."),
                ToolParam::optional("max_results", "Maximum matching lines returned", "100"),
            ],
        }
    }

    fn validate(&self, args: &ToolArgs) -> Result<()> {
        let pattern = args
            .get("pattern")
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing required param: pattern"))?;
        Regex::new(pattern).map_err(|e| anyhow::anyhow!("invalid regex '{}': {}", pattern, e))?;
        Ok(())
    }

    fn assess_risk(&self, _args: &ToolArgs) -> RiskLevel {
        RiskLevel::None
    }

    async fn run(&self, args: &ToolArgs) -> Result<ToolOutput> {
        let pattern = args
            .get("pattern")
            .ok_or_else(|| anyhow::anyhow!("missing required param: pattern"))?;
        let regex = Regex::new(pattern)?;
        let sub = args.get("path").map(String::as_str).unwrap_or(".");
        let max_results: usize = args
            .get("max_results")
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);

        let root = self.workspace_root.join(sub);
        let mut lines = Vec::new();
        'walk: for entry in WalkBuilder::new(&root)
            .hidden(true)
            .build()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        {
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue; // binary or unreadable
            };
            let rel = entry
                .path()
                .strip_prefix(&self.workspace_root)
                .unwrap_or(entry.path());
            for (idx, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    lines.push(format!("{}:{}: {}", rel.display(), idx + 1, line.trim_end()));
                    if lines.len() >= max_results {
                        break 'walk;
                    }
                }
            }
        }

        let count = lines.len();
        let listing = if lines.is_empty() {
            format!("no matches for '{pattern}'")
        } else {
            lines.join("\n")
        };
        Ok(ToolOutput::ok(listing).with_meta("lines_matched", count))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Result<tempfile::TempDir> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("src"))?;
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}\n")?;
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn add(a: i32) {}\n")?;
        std::fs::write(dir.path().join("README.md"), "# readme\n")?;
        Ok(dir)
    }

    #[tokio::test]
    async fn glob_matches_nested_files() -> Result<()> {
        let dir = setup()?;
        let tool = GlobTool {
            workspace_root: dir.path().to_path_buf(),
        };
        let mut args = ToolArgs::new();
        args.insert("pattern".to_string(), "src/*.rs".to_string());
        let out = tool.run(&args).await?;
        assert!(out.success);
        assert!(out.output.contains("src/main.rs"));
        assert!(out.output.contains("src/lib.rs"));
        assert_eq!(out.metadata.get("files_matched").map(String::as_str), Some("2"));
        Ok(())
    }

    #[tokio::test]
    async fn glob_reports_zero_matches() -> Result<()> {
        let dir = setup()?;
        let tool = GlobTool {
            workspace_root: dir.path().to_path_buf(),
        };
        let mut args = ToolArgs::new();
        args.insert("pattern".to_string(), "*.toml".to_string());
        let out = tool.run(&args).await?;
        assert!(out.success);
        assert!(out.output.contains("no files match"));
        Ok(())
    }

    #[tokio::test]
    async fn grep_finds_lines_with_location() -> Result<()> {
        let dir = setup()?;
        let tool = GrepTool {
            workspace_root: dir.path().to_path_buf(),
        };
        let mut args = ToolArgs::new();
        args.insert("pattern".to_string(), r"fn \w+".to_string());
        let out = tool.run(&args).await?;
        assert!(out.success);
        assert!(out.output.contains("src/main.rs:1:"));
        Ok(())
    }

    #[test]
    fn grep_validate_rejects_bad_regex() {
        let tool = GrepTool {
            workspace_root: PathBuf::from("."),
        };
        let mut args = ToolArgs::new();
        args.insert("pattern".to_string(), "(unclosed".to_string());
        assert!(tool.validate(&args).is_err());
    }
}
