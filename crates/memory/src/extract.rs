//! Turn-sequence extractor: the pipeline that turns conversation turns into
//! memory cells.
//!
//! Per turn: boundary check (fresh episode id on boundary or first turn),
//! classification, entity extraction, importance scoring, summarisation of
//! long content, optional embedding, and neighbour context windows.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, instrument};

use noema_config::MemoryConfig;

use crate::boundary::EpisodeManager;
use crate::classify::Classifier;
use crate::language::{ENTITY_PATTERNS, NEGATIVE_WORDS, POSITIVE_WORDS};
use crate::schema::{MemCell, MemoryCategory, MemoryType};
use crate::{EmbedFn, LlmFn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
    System,
    Tool,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::System => "system",
            TurnRole::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

static COMPILED_ENTITY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ENTITY_PATTERNS
        .iter()
        .map(|p| Regex::new(p).expect("entity pattern"))
        .collect()
});

/// Extract entities via the pattern library: camel-case and snake-case
/// identifiers, path tokens, URLs, quoted short phrases. Deduplicated,
/// insertion-ordered.
pub fn extract_entities(content: &str) -> Vec<String> {
    let mut entities = Vec::new();
    for regex in COMPILED_ENTITY_PATTERNS.iter() {
        for m in regex.find_iter(content) {
            let token = m.as_str().trim_matches('"').to_string();
            if !entities.contains(&token) {
                entities.push(token);
            }
        }
    }
    entities
}

/// Key phrases: capitalized multi-word runs (product names, places).
pub fn extract_key_phrases(content: &str) -> Vec<String> {
    static PHRASE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\b[A-Z][a-z0-9]+(?: [A-Z][a-z0-9]+){1,3}\b").expect("phrase pattern")
    });
    let mut phrases = Vec::new();
    for m in PHRASE.find_iter(content) {
        let phrase = m.as_str().to_string();
        if !phrases.contains(&phrase) {
            phrases.push(phrase);
        }
    }
    phrases
}

/// Lexicon sentiment in [-1, 1]: (positive − negative) / total hits.
pub fn score_sentiment(content: &str) -> f32 {
    let lower = content.to_lowercase();
    let pos = POSITIVE_WORDS.iter().filter(|w| contains_word(&lower, w)).count() as f32;
    let neg = NEGATIVE_WORDS.iter().filter(|w| contains_word(&lower, w)).count() as f32;
    if pos + neg == 0.0 {
        return 0.0;
    }
    ((pos - neg) / (pos + neg)).clamp(-1.0, 1.0)
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.split(|c: char| !c.is_alphanumeric()).any(|t| t == word)
}

/// Importance: baseline 0.5, adjusted by type category, entity density,
/// content length (in chars), and event boundaries; clamped to [0, 1].
pub fn compute_importance(
    memory_type: MemoryType,
    entity_count: usize,
    content_chars: usize,
    event_boundary: bool,
) -> f32 {
    let mut score: f32 = 0.5;
    match memory_type.category() {
        MemoryCategory::Strategic => score += 0.3,
        MemoryCategory::Personal => score += 0.2,
        MemoryCategory::Semantic => {
            if memory_type == MemoryType::Procedure {
                score += 0.1;
            } else {
                score += 0.15;
            }
        }
        MemoryCategory::Episodic | MemoryCategory::Contextual => {}
    }
    if entity_count > 3 {
        score += 0.1;
    }
    if (100..2000).contains(&content_chars) {
        score += 0.05;
    }
    if event_boundary {
        score += 0.1;
    }
    score.clamp(0.0, 1.0)
}

// ── Extractor ────────────────────────────────────────────────────────────────

pub struct Extractor {
    classifier: Classifier,
    episodes: EpisodeManager,
    embed_fn: Option<EmbedFn>,
    summarize_fn: Option<LlmFn>,
    summary_threshold: usize,
    context_window: usize,
}

impl Extractor {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            classifier: Classifier::new(config),
            episodes: EpisodeManager::new(config),
            embed_fn: None,
            summarize_fn: None,
            summary_threshold: config.summary_threshold_chars,
            context_window: config.context_window_chars,
        }
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_embedder(mut self, f: EmbedFn) -> Self {
        self.embed_fn = Some(f);
        self
    }

    /// LLM summariser for content over the summary threshold. Without it,
    /// long content is truncated instead.
    pub fn with_summarizer(mut self, f: LlmFn) -> Self {
        self.summarize_fn = Some(f);
        self
    }

    /// Reset per-conversation state (boundary detector, current episode).
    pub fn reset_session(&mut self) {
        self.episodes.reset();
    }

    /// Run the full pipeline over an ordered turn sequence.
    #[instrument(skip(self, turns))]
    pub fn extract(&mut self, conversation_id: &str, turns: &[ConversationTurn]) -> Vec<MemCell> {
        let mut cells = Vec::with_capacity(turns.len());

        for (index, turn) in turns.iter().enumerate() {
            let embedding = self.embed_fn.as_ref().and_then(|f| f(&turn.content));

            let (episode_id, boundary) =
                self.episodes
                    .observe(&turn.content, turn.timestamp, embedding.as_deref());

            let classification = self.classifier.classify(&turn.content);
            let entities = extract_entities(&turn.content);
            let key_phrases = extract_key_phrases(&turn.content);
            let event_boundary = boundary.is_some();
            let content_chars = turn.content.chars().count();
            let importance = compute_importance(
                classification.memory_type,
                entities.len(),
                content_chars,
                event_boundary,
            );

            let summary = if content_chars > self.summary_threshold {
                Some(self.summarize(&turn.content))
            } else {
                None
            };

            let mut cell = MemCell::new(turn.content.clone(), classification.memory_type);
            cell.source_id = format!("{}:{}", turn.role.as_str(), index);
            cell.summary = summary;
            cell.embedding = embedding;
            cell.topics = key_phrases.iter().take(3).map(|p| p.to_lowercase()).collect();
            cell.entities = entities;
            cell.key_phrases = key_phrases;
            cell.sentiment = score_sentiment(&turn.content);
            cell.confidence = classification.confidence;
            cell.importance = importance;
            cell.episode_id = Some(episode_id);
            cell.event_boundary = event_boundary;
            cell.conversation_id = conversation_id.to_string();
            cell.turn_number = index as u32;
            cell.preceding_context = index
                .checked_sub(1)
                .and_then(|i| turns.get(i))
                .map(|t| tail_chars(&t.content, self.context_window))
                .unwrap_or_default();
            cell.following_context = turns
                .get(index + 1)
                .map(|t| head_chars(&t.content, self.context_window))
                .unwrap_or_default();

            debug!(
                memory_type = classification.memory_type.as_str(),
                confidence = classification.confidence,
                importance,
                boundary = boundary.map(|b| b.as_str()),
                "turn extracted"
            );
            cells.push(cell);
        }

        cells
    }

    fn summarize(&self, content: &str) -> String {
        if let Some(llm) = &self.summarize_fn {
            let prompt = format!(
                "Summarize the following in one or two sentences, keeping names and numbers:\n\n{content}"
            );
            if let Some(reply) = llm(&prompt) {
                let trimmed = reply.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
        format!("{}…", head_chars(content, 200))
    }
}

fn head_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn tail_chars(s: &str, n: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(n)).collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────
