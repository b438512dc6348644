//! Structured long-term memory: atomic cells, a 15-type taxonomy,
//! boundary-detected episodes, strategic tiers, and hybrid recall.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Extractor (turns → cells)                                   │
//! │    ├── EpisodeManager / BoundaryDetector                     │
//! │    ├── Classifier (regex → embedding → LLM)                  │
//! │    └── entity / sentiment / importance analysis              │
//! │                                                              │
//! │  MemoryStore (SQLite: memcells + relations + FTS index)      │
//! │  Strategic overlay (tier, apply-count, success-rate)         │
//! │  SessionContext (ephemeral per-session facts, not persisted) │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

pub mod boundary;
pub mod classify;
pub mod extract;
pub mod language;
pub mod schema;
pub mod session;
pub mod store;
pub mod strategic;

pub use boundary::{BoundaryDetector, BoundaryReason, EpisodeManager};
pub use classify::{Classification, Classifier, ClassifierTier};
pub use extract::{ConversationTurn, Extractor, TurnRole, compute_importance};
pub use schema::{MemCell, MemoryCategory, MemoryType, MemoryScope, Relation, RelationType};
pub use session::{SessionContext, SessionContextExtractor};
pub use store::{MatchType, MemoryStore, SearchOptions, SearchResult};
pub use strategic::{StrategicMemory, StrategicTier, eligible_tier};

/// Optional synchronous embedding backend.
///
/// The closure accepts a text string and returns an embedding vector, or
/// `None` if the backend is unavailable.  Implementations are expected to
/// perform a blocking call to a local embedding endpoint.
pub type EmbedFn = Arc<dyn Fn(&str) -> Option<Vec<f32>> + Send + Sync>;

/// Optional synchronous LLM hook used by the classifier fallback tier and
/// the summarizer. Takes a prompt, returns the raw model reply.
pub type LlmFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Cosine similarity over two equal-length vectors, clamped to [0, 1].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(0.0, 1.0)
}
