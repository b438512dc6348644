//! Event-boundary detection and episode management.
//!
//! The detector is a small per-conversation state machine owned by the
//! episode manager; `reset` clears it cleanly at session boundaries.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use noema_config::MemoryConfig;

use crate::cosine_similarity;
use crate::language::{COMPLETION_SIGNALS, TRANSITION_PHRASES};

/// Why a boundary fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryReason {
    FirstTurn,
    TimeGap,
    TransitionPhrase,
    CompletionSignal,
    SemanticDistance,
}

impl BoundaryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BoundaryReason::FirstTurn => "first_turn",
            BoundaryReason::TimeGap => "time_gap",
            BoundaryReason::TransitionPhrase => "transition_phrase",
            BoundaryReason::CompletionSignal => "completion_signal",
            BoundaryReason::SemanticDistance => "semantic_distance",
        }
    }
}

/// Detector state: last timestamp, last content, last embedding.
#[derive(Debug, Default)]
pub struct BoundaryDetector {
    time_gap: Duration,
    semantic_threshold: f32,
    last_timestamp: Option<DateTime<Utc>>,
    last_content: Option<String>,
    last_embedding: Option<Vec<f32>>,
}

impl BoundaryDetector {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            time_gap: Duration::minutes(config.time_gap_minutes),
            semantic_threshold: config.semantic_distance_threshold,
            last_timestamp: None,
            last_content: None,
            last_embedding: None,
        }
    }

    pub fn reset(&mut self) {
        self.last_timestamp = None;
        self.last_content = None;
        self.last_embedding = None;
    }

    /// Check whether `content` at `timestamp` starts a new episode.
    /// State is updated regardless of the outcome.
    pub fn check(
        &mut self,
        content: &str,
        timestamp: DateTime<Utc>,
        embedding: Option<&[f32]>,
    ) -> Option<BoundaryReason> {
        let reason = self.evaluate(content, timestamp, embedding);
        self.last_timestamp = Some(timestamp);
        self.last_content = Some(content.to_string());
        self.last_embedding = embedding.map(|e| e.to_vec());
        if let Some(reason) = reason {
            debug!(reason = reason.as_str(), "event boundary");
        }
        reason
    }

    fn evaluate(
        &self,
        content: &str,
        timestamp: DateTime<Utc>,
        embedding: Option<&[f32]>,
    ) -> Option<BoundaryReason> {
        let Some(last_ts) = self.last_timestamp else {
            return Some(BoundaryReason::FirstTurn);
        };

        if timestamp - last_ts > self.time_gap {
            return Some(BoundaryReason::TimeGap);
        }

        if starts_with_transition(content) {
            return Some(BoundaryReason::TransitionPhrase);
        }

        if let Some(prev) = &self.last_content {
            if ends_with_completion(prev) {
                return Some(BoundaryReason::CompletionSignal);
            }
        }

        if let (Some(prev_emb), Some(curr_emb)) = (&self.last_embedding, embedding) {
            let distance = 1.0 - cosine_similarity(prev_emb, curr_emb);
            if distance > self.semantic_threshold {
                return Some(BoundaryReason::SemanticDistance);
            }
        }

        None
    }
}

/// A transition phrase opens the turn, or follows sentence punctuation.
fn starts_with_transition(content: &str) -> bool {
    let lower = content.trim_start().to_lowercase();
    for phrase in TRANSITION_PHRASES {
        if phrase_at(&lower, 0, phrase) {
            return true;
        }
        // "…sentence. anyway, new topic"
        let mut search = 0;
        while let Some(pos) = lower[search..].find(['.', '!', '?']) {
            let after = search + pos + 1;
            let rest = lower[after..].trim_start();
            let offset = after + (lower[after..].len() - rest.len());
            if phrase_at(&lower, offset, phrase) {
                return true;
            }
            search = after;
        }
    }
    false
}

/// `phrase` occurs at `offset` and ends at a word boundary.
fn phrase_at(lower: &str, offset: usize, phrase: &str) -> bool {
    let Some(rest) = lower.get(offset..) else {
        return false;
    };
    if !rest.starts_with(phrase) {
        return false;
    }
    match rest[phrase.len()..].chars().next() {
        None => true,
        Some(c) => !c.is_alphanumeric(),
    }
}

fn ends_with_completion(content: &str) -> bool {
    let lower = content
        .trim_end()
        .trim_end_matches(['.', '!', '?'])
        .to_lowercase();
    COMPLETION_SIGNALS.iter().any(|s| lower.ends_with(s))
}

// ── Episode manager ──────────────────────────────────────────────────────────

/// Wraps the detector to allocate episode ids: a boundary (or the very first
/// turn) starts a fresh id, shared by every turn until the next boundary.
#[derive(Debug)]
pub struct EpisodeManager {
    detector: BoundaryDetector,
    current_episode: Option<Uuid>,
}

impl EpisodeManager {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            detector: BoundaryDetector::new(config),
            current_episode: None,
        }
    }

    pub fn current_episode(&self) -> Option<Uuid> {
        self.current_episode
    }

    /// Observe a turn; returns the episode id it belongs to and the boundary
    /// reason when a new episode started.
    pub fn observe(
        &mut self,
        content: &str,
        timestamp: DateTime<Utc>,
        embedding: Option<&[f32]>,
    ) -> (Uuid, Option<BoundaryReason>) {
        let reason = self.detector.check(content, timestamp, embedding);
        if reason.is_some() || self.current_episode.is_none() {
            self.current_episode = Some(Uuid::new_v4());
        }
        (self.current_episode.expect("episode id set"), reason)
    }

    pub fn reset(&mut self) {
        self.detector.reset();
        self.current_episode = None;
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
