//! Backend engine adapters. Each speaks one wire protocol; the dispatcher
//! routes on the lane's engine kind.

use tokio::sync::mpsc;

use crate::lanes::{Engine, Lane};
use crate::types::{Chunk, ThinkRequest, TokenUsage};
use crate::BrainError;

pub mod anthropic;
pub mod ollama;
pub mod openai;

/// What a backend returns before tool-call parsing.
#[derive(Debug, Clone, Default)]
pub struct EngineReply {
    pub content: String,
    pub usage: TokenUsage,
}

/// Non-streaming dispatch.
pub async fn invoke(
    client: &reqwest::Client,
    lane: &Lane,
    request: &ThinkRequest,
) -> Result<EngineReply, BrainError> {
    match lane.engine {
        Engine::Ollama => ollama::generate(client, lane, request).await,
        Engine::Anthropic => anthropic::messages(client, lane, request).await,
        Engine::OpenAi | Engine::Groq | Engine::Vllm => openai::chat(client, lane, request).await,
    }
}

/// Streaming dispatch. Chunks flow through `tx`; the accumulated full text
/// is returned so the caller can parse tool calls from it. Engines without
/// native streaming produce a single chunk, then done.
pub async fn invoke_stream(
    client: &reqwest::Client,
    lane: &Lane,
    request: &ThinkRequest,
    tx: &mpsc::Sender<Chunk>,
) -> Result<EngineReply, BrainError> {
    match lane.engine {
        Engine::Ollama => ollama::generate_stream(client, lane, request, tx).await,
        Engine::OpenAi | Engine::Groq | Engine::Vllm => {
            openai::chat_stream(client, lane, request, tx).await
        }
        Engine::Anthropic => {
            let reply = anthropic::messages(client, lane, request).await?;
            let _ = tx.send(Chunk::delta(reply.content.clone())).await;
            Ok(reply)
        }
    }
}

/// Incremental line splitter for chunked bodies: bytes arrive in arbitrary
/// slices, lines come out whole.
pub(crate) struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    pub(crate) fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    /// Whatever is left once the body ends.
    pub(crate) fn finish(self) -> Option<String> {
        let rest = self.buffer.trim().to_string();
        (!rest.is_empty()).then_some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_reassembles_split_lines() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"data: {\"par").is_empty());
        let lines = buf.push(b"tial\"}\ndata: second\n");
        assert_eq!(lines, vec!["data: {\"partial\"}", "data: second"]);
        assert!(buf.finish().is_none());
    }

    #[test]
    fn line_buffer_flushes_trailing_fragment() {
        let mut buf = LineBuffer::new();
        buf.push(b"no newline yet");
        assert_eq!(buf.finish().as_deref(), Some("no newline yet"));
    }

    #[test]
    fn line_buffer_strips_carriage_returns() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"data: x\r\n");
        assert_eq!(lines, vec!["data: x"]);
    }
}
