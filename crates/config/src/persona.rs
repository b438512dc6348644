//! Persona file — the YAML document describing the agent's identity, trait
//! vector, and self-improvement boundaries.
//!
//! The persona is read by the brain (system-prompt assembly) and mutated only
//! by the sleep worker, which must call [`Persona::backup`] before every
//! write. Backups land in `history/<timestamp>.yaml` next to the persona file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaIdentity {
    pub name: String,
    pub role: String,
}

impl Default for PersonaIdentity {
    fn default() -> Self {
        Self {
            name: "Noema".to_string(),
            role: "personal assistant".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnedPattern {
    pub pattern: String,
    pub confidence: f32,
    pub source: String,
    pub applied_since: DateTime<Utc>,
}

impl Default for LearnedPattern {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            confidence: 0.0,
            source: String::new(),
            applied_since: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicationStyle {
    pub greeting: String,
    pub sign_off: String,
    pub uncertainty: String,
}

impl Default for CommunicationStyle {
    fn default() -> Self {
        Self {
            greeting: "Hey".to_string(),
            sign_off: String::new(),
            uncertainty: "I'm not sure, but".to_string(),
        }
    }
}

/// Hard limits on what the sleep worker may change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Boundaries {
    pub min_patience: f32,
    pub max_confidence: f32,
    pub immutable_traits: Vec<String>,
    pub max_trait_delta: f32,
    pub min_auto_confidence: f32,
    pub max_risky_proposals: usize,
    pub min_pattern_observations: usize,
}

impl Default for Boundaries {
    fn default() -> Self {
        Self {
            min_patience: 0.3,
            max_confidence: 0.9,
            immutable_traits: vec![],
            max_trait_delta: 0.1,
            min_auto_confidence: 0.8,
            max_risky_proposals: 2,
            min_pattern_observations: 3,
        }
    }
}

pub const TRAIT_NAMES: &[&str] = &[
    "warmth",
    "directness",
    "verbosity",
    "humor",
    "formality",
    "initiative",
    "confidence",
    "patience",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Persona {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    pub last_sleep_cycle: Option<DateTime<Utc>>,
    pub identity: PersonaIdentity,
    /// Trait name → strength in [0, 1]. The eight canonical traits are always
    /// present; extra keys survive round-trips untouched.
    pub traits: BTreeMap<String, f32>,
    pub preferences: BTreeMap<String, String>,
    pub learned_patterns: Vec<LearnedPattern>,
    pub communication_style: CommunicationStyle,
    pub boundaries: Boundaries,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            version: 1,
            last_updated: Utc::now(),
            last_sleep_cycle: None,
            identity: PersonaIdentity::default(),
            traits: TRAIT_NAMES.iter().map(|n| (n.to_string(), 0.5)).collect(),
            preferences: BTreeMap::new(),
            learned_patterns: Vec::new(),
            communication_style: CommunicationStyle::default(),
            boundaries: Boundaries::default(),
        }
    }
}

impl Persona {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading persona file {}", path.display()))?;
        let persona = serde_yaml::from_str(&raw)?;
        Ok(persona)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = serde_yaml::to_string(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Copy the current on-disk persona into `history/<timestamp>.yaml`.
    ///
    /// Must be called before every mutation. A missing persona file is not an
    /// error (nothing to back up).
    pub fn backup(path: impl AsRef<Path>) -> Result<Option<PathBuf>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let dir = path
            .parent()
            .map(|p| p.join("history"))
            .unwrap_or_else(|| PathBuf::from("history"));
        fs::create_dir_all(&dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let backup_path = dir.join(format!("{stamp}.yaml"));
        fs::copy(path, &backup_path)?;
        Ok(Some(backup_path))
    }

    pub fn get_trait(&self, name: &str) -> Option<f32> {
        self.traits.get(name).copied()
    }

    /// Set a trait, clamping against the boundary rules:
    /// values stay in [0, 1], `patience` never drops below `min_patience`,
    /// `confidence` never rises above `max_confidence`.
    /// Immutable traits are rejected.
    pub fn set_trait(&mut self, name: &str, value: f32) -> Result<()> {
        if self.boundaries.immutable_traits.iter().any(|t| t == name) {
            bail!("trait '{name}' is immutable");
        }
        let mut v = value.clamp(0.0, 1.0);
        if name == "patience" {
            v = v.max(self.boundaries.min_patience);
        }
        if name == "confidence" {
            v = v.min(self.boundaries.max_confidence);
        }
        self.traits.insert(name.to_string(), v);
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Render the persona as a system-prompt fragment.
    pub fn system_prompt(&self) -> String {
        let mut dominant: Vec<(&String, &f32)> =
            self.traits.iter().filter(|(_, v)| **v >= 0.6).collect();
        dominant.sort_by(|a, b| b.1.total_cmp(a.1));
        let trait_line = if dominant.is_empty() {
            String::new()
        } else {
            let names: Vec<&str> = dominant.iter().map(|(n, _)| n.as_str()).collect();
            format!(" Your prominent traits: {}.", names.join(", "))
        };
        let patterns = self
            .learned_patterns
            .iter()
            .map(|p| format!("- {}", p.pattern))
            .collect::<Vec<_>>()
            .join("\n");
        let pattern_block = if patterns.is_empty() {
            String::new()
        } else {
            format!("\nLearned patterns to apply:\n{patterns}")
        };
        format!(
            "You are {}, a {}.{}{}",
            self.identity.name, self.identity.role, trait_line, pattern_block
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_persona_has_all_eight_traits() {
        let p = Persona::default();
        for name in TRAIT_NAMES {
            assert!(p.traits.contains_key(*name), "missing trait {name}");
        }
    }

    #[test]
    fn yaml_round_trip_preserves_fields() -> Result<()> {
        let mut p = Persona::default();
        p.preferences
            .insert("code_style".to_string(), "terse".to_string());
        p.learned_patterns.push(LearnedPattern {
            pattern: "user prefers bullet lists".to_string(),
            confidence: 0.9,
            source: "sleep".to_string(),
            applied_since: Utc::now(),
        });
        let yaml = serde_yaml::to_string(&p)?;
        let back: Persona = serde_yaml::from_str(&yaml)?;
        assert_eq!(back.preferences["code_style"], "terse");
        assert_eq!(back.learned_patterns.len(), 1);
        assert_eq!(back.version, 1);
        Ok(())
    }

    #[test]
    fn set_trait_clamps_to_unit_interval() -> Result<()> {
        let mut p = Persona::default();
        p.set_trait("warmth", 1.7)?;
        assert_eq!(p.get_trait("warmth"), Some(1.0));
        p.set_trait("humor", -0.4)?;
        assert_eq!(p.get_trait("humor"), Some(0.0));
        Ok(())
    }

    #[test]
    fn patience_floor_and_confidence_ceiling_enforced() -> Result<()> {
        let mut p = Persona::default();
        p.set_trait("patience", 0.0)?;
        assert_eq!(p.get_trait("patience"), Some(p.boundaries.min_patience));
        p.set_trait("confidence", 1.0)?;
        assert_eq!(p.get_trait("confidence"), Some(p.boundaries.max_confidence));
        Ok(())
    }

    #[test]
    fn immutable_trait_rejected() {
        let mut p = Persona::default();
        p.boundaries.immutable_traits = vec!["warmth".to_string()];
        assert!(p.set_trait("warmth", 0.9).is_err());
        assert_eq!(p.get_trait("warmth"), Some(0.5));
    }

    #[test]
    fn backup_copies_current_file_into_history() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("persona.yaml");
        Persona::default().save_to(&path)?;
        let backup = Persona::backup(&path)?.expect("backup created");
        assert!(backup.exists());
        assert!(backup.parent().unwrap().ends_with("history"));
        Ok(())
    }

    #[test]
    fn backup_of_missing_file_is_none() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(Persona::backup(dir.path().join("persona.yaml"))?.is_none());
        Ok(())
    }

    #[test]
    fn load_missing_file_yields_default() -> Result<()> {
        let p = Persona::load_from("/nonexistent/persona.yaml")?;
        assert_eq!(p.identity.name, "Noema");
        Ok(())
    }

    #[test]
    fn system_prompt_names_dominant_traits() -> Result<()> {
        let mut p = Persona::default();
        p.set_trait("directness", 0.9)?;
        let prompt = p.system_prompt();
        assert!(prompt.contains("directness"));
        assert!(prompt.contains("Noema"));
        Ok(())
    }
}
