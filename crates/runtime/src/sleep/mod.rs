//! The periodic offline consolidator: four phases in strict order, run
//! during idle windows under an exclusive flag and a hard time cap.

pub mod consolidation;
pub mod dmn;
pub mod proposals;
pub mod reflection;
pub mod worker;

pub use consolidation::{Consolidation, Emotion, EmotionSignature, consolidate};
pub use dmn::{DmnReport, ModelRank, TierPromotion, aggregate_outcomes, promote_tiers, run_dmn};
pub use proposals::{Proposal, ProposalKind, ProposalRisk};
pub use reflection::{Insight, InsightKind, reflect};
pub use worker::{SleepGate, SleepMode, SleepOutcome, SleepReport, SleepWorker};
