//! Normalized request and stream-event types.
//!
//! These are the gateway's internal currency: callers submit a [`ChatRequest`]
//! in the shape the platform SDK sends, wire adapters turn provider streams
//! into [`StreamEvent`]s, and the session consumes both. Provider-native
//! response bytes are relayed verbatim and never round-trip through these
//! types.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_stream() -> bool {
    true
}

/// A caller-supplied chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_stream")]
    pub stream: bool,
    /// Provider passthrough parameters (temperature, max_tokens, ...).
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl ChatRequest {
    /// Shape validation performed before any ledger or network interaction.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::validation("'model' is required"));
        }
        if self.messages.is_empty() {
            return Err(GatewayError::validation("'messages' must be non-empty"));
        }
        Ok(())
    }
}

/// A normalized unit parsed out of a provider response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A fragment of generated text, in provider arrival order.
    ContentDelta(String),
    /// Authoritative token usage reported by the provider. Overrides the
    /// estimator when present.
    UsageFinal {
        input_tokens: u64,
        output_tokens: u64,
    },
    /// Provider-reported error inside an otherwise healthy stream.
    Error(String),
    /// Clean end of stream (`[DONE]` sentinel or terminal stream event).
    Done,
}

/// Parsed result of a non-streaming provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalCompletion {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}
