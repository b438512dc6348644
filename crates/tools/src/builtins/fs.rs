//! File I/O tools: read, write, and targeted edit.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use async_trait::async_trait;

use super::{resolve_within_workspace, truncate_byte_boundary};
use crate::{RiskLevel, Tool, ToolArgs, ToolOutput, ToolParam, ToolSpec};

const SYSTEM_DIRS: &[&str] = &[
    "/etc", "/usr", "/bin", "/sbin", "/boot", "/sys", "/proc", "/lib", "/var",
];

const EXECUTABLE_EXTENSIONS: &[&str] = &["sh", "bash", "zsh", "py", "rb", "pl", "exe", "bat", "ps1"];

/// Risk of writing to `path`. System directories are critical, executable
/// extensions and dotfiles medium, overwriting an existing file low, fresh
/// files in ordinary locations none.
pub fn classify_write_risk(path: &str, exists: bool) -> RiskLevel {
    let p = Path::new(path);
    if SYSTEM_DIRS.iter().any(|d| path.starts_with(d)) {
        return RiskLevel::Critical;
    }
    let is_dotfile = p
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false);
    let is_executable = p
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| EXECUTABLE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false);
    if is_dotfile || is_executable {
        return RiskLevel::Medium;
    }
    if exists {
        return RiskLevel::Low;
    }
    RiskLevel::None
}

// ── read_file ────────────────────────────────────────────────────────────────

pub struct ReadFileTool {
    pub workspace_root: PathBuf,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file".to_string(),
            description: "Read the contents of a file within the workspace.".to_string(),
            params: vec![
                ToolParam::required("path", "Relative path from workspace root"),
                ToolParam::optional("max_bytes", "Maximum bytes to read", "65536"),
            ],
        }
    }

    fn assess_risk(&self, _args: &ToolArgs) -> RiskLevel {
        RiskLevel::None
    }

    async fn run(&self, args: &ToolArgs) -> Result<ToolOutput> {
        let rel_path = args
            .get("path")
            .ok_or_else(|| anyhow::anyhow!("missing required param: path"))?;
        let canonical = resolve_within_workspace(&self.workspace_root, rel_path)?;

        let max_bytes: usize = args
            .get("max_bytes")
            .and_then(|v| v.parse().ok())
            .unwrap_or(65536);

        let content = std::fs::read_to_string(&canonical)?;
        let bytes_read = content.len();
        let rendered = if content.len() > max_bytes {
            let end = truncate_byte_boundary(&content, max_bytes);
            format!("{}…[truncated at {} bytes]", &content[..end], max_bytes)
        } else {
            content
        };

        Ok(ToolOutput::ok(rendered).with_meta("bytes_read", bytes_read))
    }
}

// ── write_file ───────────────────────────────────────────────────────────────

pub struct WriteFileTool {
    pub workspace_root: PathBuf,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "write_file".to_string(),
            description: "Write content to a file within the workspace (creates or overwrites)."
                .to_string(),
            params: vec![
                ToolParam::required("path", "Relative path from workspace root"),
                ToolParam::required("content", "File content to write"),
            ],
        }
    }

    fn assess_risk(&self, args: &ToolArgs) -> RiskLevel {
        let path = match args.get("path") {
            Some(p) => p,
            None => return RiskLevel::None,
        };
        let exists = self.workspace_root.join(path).exists() || Path::new(path).exists();
        classify_write_risk(path, exists)
    }

    async fn run(&self, args: &ToolArgs) -> Result<ToolOutput> {
        let rel_path = args
            .get("path")
            .ok_or_else(|| anyhow::anyhow!("missing required param: path"))?;
        let content = args
            .get("content")
            .ok_or_else(|| anyhow::anyhow!("missing required param: content"))?;

        let full = self.workspace_root.join(rel_path);
        let root = self.workspace_root.canonicalize()?;

        // The target may not exist yet, so guard via its parent.
        if let Ok(canonical) = full.canonicalize() {
            if !canonical.starts_with(&root) {
                bail!("path escapes workspace boundary: {}", canonical.display());
            }
        } else {
            let parent = full.parent().ok_or_else(|| anyhow::anyhow!("invalid path"))?;
            std::fs::create_dir_all(parent)?;
            let parent_canonical = parent.canonicalize()?;
            if !parent_canonical.starts_with(&root) {
                bail!(
                    "parent escapes workspace boundary: {}",
                    parent_canonical.display()
                );
            }
        }

        let overwrote = full.exists();
        std::fs::write(&full, content)?;
        Ok(
            ToolOutput::ok(format!("wrote {} bytes to {}", content.len(), rel_path))
                .with_meta("bytes_written", content.len())
                .with_meta("overwrote", overwrote),
        )
    }
}

// ── edit_file ────────────────────────────────────────────────────────────────

/// Replace one exact occurrence of `old_string` with `new_string`.
/// Ambiguous (multiple) or absent matches fail without touching the file.
pub struct EditFileTool {
    pub workspace_root: PathBuf,
}

#[async_trait]
impl Tool for EditFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "edit_file".to_string(),
            description:
                "Replace an exact text fragment in a file. The fragment must occur exactly once."
                    .to_string(),
            params: vec![
                ToolParam::required("path", "Relative path from workspace root"),
                ToolParam::required("old_string", "Exact text to replace"),
                ToolParam::required("new_string", "Replacement text"),
            ],
        }
    }

    fn validate(&self, args: &ToolArgs) -> Result<()> {
        for required in ["path", "old_string"] {
            match args.get(required) {
                Some(v) if !v.is_empty() => {}
                _ => bail!("missing required param: {required}"),
            }
        }
        // new_string may legitimately be empty (deletion) but must be present.
        if !args.contains_key("new_string") {
            bail!("missing required param: new_string");
        }
        Ok(())
    }

    fn assess_risk(&self, args: &ToolArgs) -> RiskLevel {
        args.get("path")
            .map(|p| classify_write_risk(p, true))
            .unwrap_or(RiskLevel::None)
    }

    async fn run(&self, args: &ToolArgs) -> Result<ToolOutput> {
        let rel_path = args
            .get("path")
            .ok_or_else(|| anyhow::anyhow!("missing required param: path"))?;
        let old = args
            .get("old_string")
            .ok_or_else(|| anyhow::anyhow!("missing required param: old_string"))?;
        let new = args
            .get("new_string")
            .ok_or_else(|| anyhow::anyhow!("missing required param: new_string"))?;

        let canonical = resolve_within_workspace(&self.workspace_root, rel_path)?;
        let content = std::fs::read_to_string(&canonical)?;

        let occurrences = content.matches(old.as_str()).count();
        if occurrences == 0 {
            return Ok(ToolOutput::err(format!(
                "old_string not found in {rel_path}"
            )));
        }
        if occurrences > 1 {
            return Ok(ToolOutput::err(format!(
                "old_string occurs {occurrences} times in {rel_path}; must be unique"
            )));
        }

        let updated = content.replacen(old.as_str(), new, 1);
        std::fs::write(&canonical, &updated)?;
        Ok(ToolOutput::ok(format!("edited {rel_path}"))
            .with_meta("bytes_written", updated.len())
            .with_meta("replacements", 1))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_dir_writes_are_critical() {
        assert_eq!(classify_write_risk("/etc/passwd", true), RiskLevel::Critical);
        assert_eq!(classify_write_risk("/usr/bin/thing", false), RiskLevel::Critical);
    }

    #[test]
    fn executable_and_dotfile_writes_are_medium() {
        assert_eq!(classify_write_risk("scripts/install.sh", false), RiskLevel::Medium);
        assert_eq!(classify_write_risk(".bashrc", true), RiskLevel::Medium);
    }

    #[test]
    fn overwrite_is_low_fresh_file_none() {
        assert_eq!(classify_write_risk("notes.txt", true), RiskLevel::Low);
        assert_eq!(classify_write_risk("notes.txt", false), RiskLevel::None);
    }

    #[tokio::test]
    async fn read_write_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let write = WriteFileTool {
            workspace_root: dir.path().to_path_buf(),
        };
        let mut args = ToolArgs::new();
        args.insert("path".to_string(), "hello.txt".to_string());
        args.insert("content".to_string(), "Hello, world!".to_string());
        let out = write.run(&args).await?;
        assert!(out.success);
        assert_eq!(out.metadata.get("bytes_written").map(String::as_str), Some("13"));

        let read = ReadFileTool {
            workspace_root: dir.path().to_path_buf(),
        };
        let mut args = ToolArgs::new();
        args.insert("path".to_string(), "hello.txt".to_string());
        let out = read.run(&args).await?;
        assert!(out.success);
        assert_eq!(out.output, "Hello, world!");
        Ok(())
    }

    #[tokio::test]
    async fn edit_requires_unique_match() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("f.txt"), "aaa bbb aaa")?;
        let edit = EditFileTool {
            workspace_root: dir.path().to_path_buf(),
        };

        let mut args = ToolArgs::new();
        args.insert("path".to_string(), "f.txt".to_string());
        args.insert("old_string".to_string(), "aaa".to_string());
        args.insert("new_string".to_string(), "ccc".to_string());
        let out = edit.run(&args).await?;
        assert!(!out.success);
        assert!(out.error.contains("must be unique"));

        args.insert("old_string".to_string(), "bbb".to_string());
        let out = edit.run(&args).await?;
        assert!(out.success);
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt"))?, "aaa ccc aaa");
        Ok(())
    }

    #[tokio::test]
    async fn edit_missing_fragment_leaves_file_unchanged() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("f.txt"), "original")?;
        let edit = EditFileTool {
            workspace_root: dir.path().to_path_buf(),
        };
        let mut args = ToolArgs::new();
        args.insert("path".to_string(), "f.txt".to_string());
        args.insert("old_string".to_string(), "nope".to_string());
        args.insert("new_string".to_string(), "x".to_string());
        let out = edit.run(&args).await?;
        assert!(!out.success);
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt"))?, "original");
        Ok(())
    }

    #[test]
    fn edit_validate_allows_empty_new_string() {
        let edit = EditFileTool {
            workspace_root: PathBuf::from("."),
        };
        let mut args = ToolArgs::new();
        args.insert("path".to_string(), "f.txt".to_string());
        args.insert("old_string".to_string(), "x".to_string());
        args.insert("new_string".to_string(), String::new());
        assert!(edit.validate(&args).is_ok());
        args.remove("new_string");
        assert!(edit.validate(&args).is_err());
    }
}
