//! Three-tier memory classifier: regex, embedding, LLM — evaluated in that
//! order, short-circuiting at the configured thresholds.
//!
//! A content-hash cache short-circuits repeat classifications; eviction is a
//! full clear once the cache exceeds its cap.

use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};

use noema_config::MemoryConfig;

use crate::language::{CLASSIFIER_PATTERNS, TYPE_EXEMPLARS, classify_prompt};
use crate::schema::MemoryType;
use crate::{EmbedFn, LlmFn, cosine_similarity};

/// Which tier produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierTier {
    Pattern,
    Embedding,
    Llm,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub memory_type: MemoryType,
    pub confidence: f32,
    pub tier: ClassifierTier,
}

static COMPILED_PATTERNS: LazyLock<Vec<(Regex, MemoryType)>> = LazyLock::new(|| {
    CLASSIFIER_PATTERNS
        .iter()
        .flat_map(|(_, table)| table.iter())
        .map(|(pattern, t)| (Regex::new(pattern).expect("classifier pattern"), *t))
        .collect()
});

/// Shape of the JSON object the LLM tier must return.
#[derive(Debug, Deserialize)]
struct LlmVerdict {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    confidence: f32,
}

pub struct Classifier {
    embed_fn: Option<EmbedFn>,
    llm_fn: Option<LlmFn>,
    /// Exemplar embeddings, computed lazily on first embedding-tier use.
    exemplars: RwLock<Vec<(MemoryType, Vec<f32>)>>,
    cache: RwLock<HashMap<String, Classification>>,
    pattern_accept: f32,
    embedding_accept: f32,
    llm_fallback: f32,
    cache_cap: usize,
}

impl Classifier {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            embed_fn: None,
            llm_fn: None,
            exemplars: RwLock::new(Vec::new()),
            cache: RwLock::new(HashMap::new()),
            pattern_accept: config.pattern_accept_threshold,
            embedding_accept: config.embedding_accept_threshold,
            llm_fallback: config.llm_fallback_threshold,
            cache_cap: config.classifier_cache_cap,
        }
    }

    pub fn with_embedder(mut self, f: EmbedFn) -> Self {
        self.embed_fn = Some(f);
        self
    }

    pub fn with_llm(mut self, f: LlmFn) -> Self {
        self.llm_fn = Some(f);
        self
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().expect("classifier cache lock").len()
    }

    pub fn classify(&self, content: &str) -> Classification {
        let key = content_hash(content);
        if let Some(hit) = self.cache.read().expect("classifier cache lock").get(&key) {
            trace!(tier = ?hit.tier, "classifier cache hit");
            return *hit;
        }

        let result = self.classify_uncached(content);
        let mut cache = self.cache.write().expect("classifier cache lock");
        if cache.len() >= self.cache_cap {
            debug!(size = cache.len(), "classifier cache full — clearing");
            cache.clear();
        }
        cache.insert(key, result);
        result
    }

    fn classify_uncached(&self, content: &str) -> Classification {
        // Tier 1: regex. Instant and free; a confident hit is final.
        let pattern_result = self.classify_by_pattern(content);
        if pattern_result.confidence >= self.pattern_accept {
            return pattern_result;
        }

        // Tier 2: embedding similarity against cached exemplars.
        let mut best = pattern_result;
        if let Some(embedding_result) = self.classify_by_embedding(content) {
            if embedding_result.confidence >= self.embedding_accept {
                return embedding_result;
            }
            if embedding_result.confidence > best.confidence {
                best = embedding_result;
            }
        }

        // Tier 3: LLM, only when nothing above is even moderately sure.
        if best.confidence < self.llm_fallback {
            if let Some(llm_result) = self.classify_by_llm(content) {
                return llm_result;
            }
        }

        best
    }

    /// First matching pattern wins, in category priority order.
    /// Base confidence 0.6 scaled by match length, capped at 0.9.
    fn classify_by_pattern(&self, content: &str) -> Classification {
        for (regex, memory_type) in COMPILED_PATTERNS.iter() {
            if let Some(m) = regex.find(content) {
                let confidence = (0.6 + m.len() as f32 * 0.01).min(0.9);
                trace!(?memory_type, confidence, "pattern tier matched");
                return Classification {
                    memory_type: *memory_type,
                    confidence,
                    tier: ClassifierTier::Pattern,
                };
            }
        }
        Classification {
            memory_type: MemoryType::Interaction,
            confidence: 0.4,
            tier: ClassifierTier::Fallback,
        }
    }

    /// Cosine similarity of the content embedding against the exemplar set;
    /// best similarity remapped linearly into [0.5, 0.9].
    fn classify_by_embedding(&self, content: &str) -> Option<Classification> {
        let embed = self.embed_fn.as_ref()?;
        self.ensure_exemplars(embed);

        let content_vec = embed(content)?;
        let exemplars = self.exemplars.read().expect("exemplar lock");
        let (best_type, best_sim) = exemplars
            .iter()
            .map(|(t, v)| (*t, cosine_similarity(&content_vec, v)))
            .max_by(|a, b| a.1.total_cmp(&b.1))?;

        Some(Classification {
            memory_type: best_type,
            confidence: 0.5 + best_sim.clamp(0.0, 1.0) * 0.4,
            tier: ClassifierTier::Embedding,
        })
    }

    fn ensure_exemplars(&self, embed: &EmbedFn) {
        {
            if !self.exemplars.read().expect("exemplar lock").is_empty() {
                return;
            }
        }
        let computed: Vec<(MemoryType, Vec<f32>)> = TYPE_EXEMPLARS
            .iter()
            .filter_map(|(t, text)| embed(text).map(|v| (*t, v)))
            .collect();
        if !computed.is_empty() {
            *self.exemplars.write().expect("exemplar lock") = computed;
        }
    }

    /// Structured LLM fallback. The reply is accepted only when its `type`
    /// is a member of the closed taxonomy.
    fn classify_by_llm(&self, content: &str) -> Option<Classification> {
        let llm = self.llm_fn.as_ref()?;
        let reply = llm(&classify_prompt(content))?;
        let json_str = extract_json_object(&reply)?;
        let verdict: LlmVerdict = match serde_json::from_str(json_str) {
            Ok(v) => v,
            Err(err) => {
                warn!(?err, "LLM classifier reply was not valid JSON");
                return None;
            }
        };
        let memory_type = MemoryType::parse(&verdict.type_name)?;
        Some(Classification {
            memory_type,
            confidence: verdict.confidence.clamp(0.0, 1.0),
            tier: ClassifierTier::Llm,
        })
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Pull the first `{…}` object out of a possibly chatty model reply.
fn extract_json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(&MemoryConfig::default())
    }

    #[test]
    fn principle_statement_hits_strategic_pattern() {
        let c = classifier().classify("Always measure before optimizing the hot path");
        assert_eq!(c.memory_type, MemoryType::Principle);
        assert_eq!(c.tier, ClassifierTier::Pattern);
        assert!(c.confidence >= 0.6);
    }

    #[test]
    fn preference_beats_lower_priority_categories() {
        // Matches both a preference pattern and an episodic one; personal
        // category is evaluated first.
        let c = classifier().classify("I prefer the meeting notes in markdown");
        assert_eq!(c.memory_type, MemoryType::Preference);
    }

    #[test]
    fn unmatched_content_falls_back_to_interaction() {
        let c = classifier().classify("qwerty zxcvb");
        assert_eq!(c.memory_type, MemoryType::Interaction);
        assert_eq!(c.confidence, 0.4);
        assert_eq!(c.tier, ClassifierTier::Fallback);
    }

    #[test]
    fn confident_pattern_is_final_even_with_llm_wired() {
        // Invariant: a regex-tier result at or above the accept threshold is
        // never overridden by later tiers.
        let llm: LlmFn = Arc::new(|_prompt| {
            Some(r#"{"type": "mood", "confidence": 0.99}"#.to_string())
        });
        let c = classifier().with_llm(llm);
        let long_principle =
            "Always double check the destination branch before you force push anything anywhere";
        let result = c.classify(long_principle);
        assert_eq!(result.tier, ClassifierTier::Pattern);
        assert_eq!(result.memory_type, MemoryType::Principle);
        assert!(result.confidence >= 0.7);
    }

    #[test]
    fn llm_tier_fires_below_threshold_and_respects_closed_set() {
        let llm: LlmFn = Arc::new(|_prompt| {
            Some("Sure! {\"type\": \"fact\", \"confidence\": 0.8}".to_string())
        });
        let c = classifier().with_llm(llm);
        let result = c.classify("zzz qqq");
        assert_eq!(result.memory_type, MemoryType::Fact);
        assert_eq!(result.tier, ClassifierTier::Llm);

        let bad_llm: LlmFn = Arc::new(|_prompt| {
            Some(r#"{"type": "galaxy", "confidence": 0.9}"#.to_string())
        });
        let c = classifier().with_llm(bad_llm);
        let result = c.classify("zzz qqq");
        // Unknown type rejected; best prior tier wins.
        assert_eq!(result.memory_type, MemoryType::Interaction);
    }

    #[test]
    fn embedding_tier_remaps_similarity() {
        // Embedder returns a vector aligned with the "fact" exemplar position
        // by hashing text length parity — instead, use a constant vector so
        // every exemplar ties and the first max wins; we only check range.
        let embed: EmbedFn = Arc::new(|text: &str| {
            let mut v = vec![0.0_f32; 8];
            for (i, b) in text.bytes().enumerate() {
                v[i % 8] += b as f32;
            }
            Some(v)
        });
        let c = classifier().with_embedder(embed);
        let result = c.classify("zzz qqq");
        if result.tier == ClassifierTier::Embedding {
            assert!((0.5..=0.9).contains(&result.confidence));
        }
    }

    #[test]
    fn cache_short_circuits_and_clears_at_cap() {
        let mut config = MemoryConfig::default();
        config.classifier_cache_cap = 2;
        let c = Classifier::new(&config);

        c.classify("first entry");
        c.classify("second entry");
        assert_eq!(c.cache_len(), 2);

        // Third distinct entry exceeds the cap: full clear, then insert.
        c.classify("third entry");
        assert_eq!(c.cache_len(), 1);

        // Repeat classification is served from cache (no growth).
        c.classify("third entry");
        assert_eq!(c.cache_len(), 1);
    }

    #[test]
    fn extract_json_object_handles_chatty_replies() {
        assert_eq!(
            extract_json_object("Here you go: {\"type\":\"fact\"} hope that helps"),
            Some("{\"type\":\"fact\"}")
        );
        assert_eq!(extract_json_object("no json here"), None);
    }
}
