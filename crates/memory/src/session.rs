//! Session-context extraction: a fast, pattern-only layer that harvests
//! ephemeral facts (locations, dates, kin, projects, preferences) from
//! single messages into a per-session bag. Nothing here is persisted; the
//! bag renders into a short prefix for the next prompt.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::language::SESSION_CONTEXT_PATTERNS;

static COMPILED: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    SESSION_CONTEXT_PATTERNS
        .iter()
        .map(|(category, pattern)| (*category, Regex::new(pattern).expect("session pattern")))
        .collect()
});

/// The per-session fact bag. Later harvests overwrite earlier ones within a
/// category slot.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    facts: BTreeMap<String, String>,
}

impl SessionContext {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn get(&self, category: &str) -> Option<&str> {
        self.facts.get(category).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.facts.clear();
    }

    /// Render the bag into a one-line prompt prefix, or `None` when empty.
    pub fn render_prefix(&self) -> Option<String> {
        if self.facts.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .facts
            .iter()
            .map(|(category, value)| format!("{category}: {value}"))
            .collect();
        Some(format!("[Session context — {}]", parts.join("; ")))
    }
}

#[derive(Debug, Default)]
pub struct SessionContextExtractor;

impl SessionContextExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Harvest facts from one message into the bag. Pure regex work,
    /// fast enough to run on every inbound message.
    pub fn harvest(&self, message: &str, bag: &mut SessionContext) {
        for (category, regex) in COMPILED.iter() {
            if let Some(captures) = regex.captures(message) {
                let value = captures
                    .get(1)
                    .map(|m| m.as_str())
                    .unwrap_or_else(|| captures.get(0).map(|m| m.as_str()).unwrap_or(""));
                let value = value.trim().trim_end_matches(['.', ',', '!', '?']);
                if !value.is_empty() {
                    bag.facts.insert(category.to_string(), value.to_string());
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
