//! Built-in tool variants: shell, file I/O, search, web.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

mod fs;
mod search;
mod shell;
mod web;

pub use fs::{EditFileTool, ReadFileTool, WriteFileTool, classify_write_risk};
pub use search::{GlobTool, GrepTool};
pub use shell::{RunShellTool, assess_shell_risk};
pub use web::WebSearchTool;

/// Find the largest byte offset ≤ `max` that falls on a UTF-8 character
/// boundary.  Safe to use as `&s[..truncate_byte_boundary(s, max)]`.
pub(crate) fn truncate_byte_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// Resolve `target` against `workspace_root` and reject paths that escape it.
pub(crate) fn resolve_within_workspace(workspace_root: &Path, target: &str) -> Result<PathBuf> {
    let root = workspace_root.canonicalize()?;
    let joined = {
        let t = Path::new(target);
        if t.is_absolute() {
            t.to_path_buf()
        } else {
            root.join(t)
        }
    };
    let canonical = joined
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("cannot resolve path '{}': {}", target, e))?;
    if !canonical.starts_with(&root) {
        bail!("path escapes workspace boundary: {}", canonical.display());
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo";
        // 'é' is two bytes starting at offset 1; cutting at 2 must back up.
        assert_eq!(truncate_byte_boundary(s, 2), 1);
        assert_eq!(truncate_byte_boundary(s, 100), s.len());
    }

    #[test]
    fn workspace_guard_rejects_escape() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("safe"))?;
        assert!(resolve_within_workspace(dir.path(), "../").is_err());
        assert!(resolve_within_workspace(dir.path(), "safe").is_ok());
        Ok(())
    }
}
