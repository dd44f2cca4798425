//! Wire adapters: one per provider protocol family.
//!
//! An adapter owns both directions of protocol normalization: building a
//! provider-native request from a [`ChatRequest`], and parsing the provider's
//! response into normalized [`StreamEvent`]s. The session never branches on
//! wire format; adding a provider family means adding one adapter here.
//!
//! Stream parsing is push-based: the session feeds it the same byte chunks it
//! relays to the caller, so parsing can never delay or reorder the relay.

pub mod anthropic;
pub mod openai;

use crate::error::Result;
use crate::providers::WireFormat;
use crate::registry::ModelProfile;
use crate::types::{ChatRequest, FinalCompletion, StreamEvent};

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiAdapter;

/// A provider-native HTTP request, ready to send.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: serde_json::Value,
}

pub trait WireAdapter: Send + Sync {
    /// Pure transformation from the normalized request to the provider's
    /// native body and headers.
    fn build_request(&self, req: &ChatRequest, profile: &ModelProfile)
        -> Result<ProviderRequest>;

    /// Fresh incremental parser for one response stream. Parsers are
    /// restartable per call only, never resumable mid-stream.
    fn stream_parser(&self) -> Box<dyn StreamParser>;

    /// Parse a complete non-streaming response body.
    fn parse_final(&self, body: &[u8]) -> Result<FinalCompletion>;
}

/// Incremental stream parser. Robust to chunk boundaries splitting logical
/// lines, keep-alive comments, and malformed individual lines (skipped,
/// never fatal to the stream).
pub trait StreamParser: Send {
    fn push_chunk(&mut self, chunk: &[u8]) -> Vec<StreamEvent>;

    /// Flush once the transport closes.
    fn finish(&mut self) -> Vec<StreamEvent>;
}

/// Select the adapter for a model's wire format.
#[must_use]
pub fn adapter_for(format: WireFormat) -> &'static dyn WireAdapter {
    static OPENAI: OpenAiAdapter = OpenAiAdapter;
    static ANTHROPIC: AnthropicAdapter = AnthropicAdapter;
    match format {
        WireFormat::OpenAi => &OPENAI,
        WireFormat::Anthropic => &ANTHROPIC,
    }
}

/// Splits an SSE byte stream into complete lines across chunk boundaries.
#[derive(Debug, Default)]
pub(crate) struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let mut line: String = self.buffer.drain(..=pos).collect();
            line.pop(); // '\n'
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Whatever trailing partial line remains at transport close.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buffer);
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }
}

/// Strip the `data:` field prefix from an SSE line. Returns `None` for
/// field names we do not consume (`event:`, comments) and blank separators.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    let line = line.trim_end();
    if let Some(stripped) = line.strip_prefix("data:") {
        Some(stripped.trim_start())
    } else {
        None
    }
}

/// Merge caller passthrough params into a provider body, without letting
/// them clobber the keys the adapter owns.
pub(crate) fn merge_passthrough(
    body: &mut serde_json::Map<String, serde_json::Value>,
    extra: &std::collections::HashMap<String, serde_json::Value>,
    reserved: &[&str],
) {
    for (key, value) in extra {
        if !reserved.contains(&key.as_str()) {
            body.insert(key.clone(), value.clone());
        }
    }
}
