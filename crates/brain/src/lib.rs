//! The inference facade: one request-to-response service over N backend
//! lanes, with complexity-based lane selection, per-lane circuit breakers,
//! streaming, failover, and the prompt-embedded tool-call protocol.

use thiserror::Error;

pub mod breaker;
pub mod engines;
pub mod lanes;
pub mod prompt;
pub mod protocol;
pub mod remote;
pub mod service;
pub mod types;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker};
pub use lanes::{Complexity, Engine, Lane, estimate_complexity, preference_ladder};
pub use prompt::{DEFAULT_SYSTEM_PROMPT, WireMessage, assemble_chat, assemble_completion};
pub use protocol::{parse_tool_calls, render_tool_call};
pub use remote::RemoteBrain;
pub use service::Brain;
pub use types::{Chunk, GenOptions, Role, ThinkRequest, ThinkResponse, TokenUsage, Turn};

/// Streaming backpressure: the chunk channel is bounded at this capacity.
pub const STREAM_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Error)]
pub enum BrainError {
    #[error("lane '{lane}' backend error ({status}): {message}")]
    Backend {
        lane: String,
        status: u16,
        message: String,
    },

    #[error("request to lane '{lane}' failed: {source}")]
    Transport {
        lane: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to decode response from lane '{lane}': {message}")]
    Decode { lane: String, message: String },

    #[error("request timed out after {seconds}s on lane '{lane}'")]
    Timeout { lane: String, seconds: u64 },

    #[error("unknown lane '{lane}'")]
    UnknownLane { lane: String },

    #[error("all lanes failed; terminal failure on '{lane}': {source}")]
    AllLanesFailed {
        lane: String,
        #[source]
        source: Box<BrainError>,
    },

    #[error("remote brain error: {0}")]
    Remote(String),
}
