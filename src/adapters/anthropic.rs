//! Adapter for the Anthropic Messages protocol family.
//!
//! The request side splits `system` messages out of the history and always
//! sets a `max_tokens` cap (the API requires one). The stream side carries
//! typed events and, unlike the OpenAI family, reports authoritative token
//! usage (`message_start` for input, `message_delta` for output) which is
//! surfaced as a `UsageFinal` event that overrides the estimator. There is no
//! `[DONE]` sentinel; `message_stop` and transport close end the stream.

use super::{merge_passthrough, sse_data, ProviderRequest, SseLineBuffer, StreamParser, WireAdapter};
use crate::error::{GatewayError, Result};
use crate::registry::ModelProfile;
use crate::types::{ChatRequest, FinalCompletion, Role, StreamEvent};
use serde::Deserialize;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Cap applied when the caller did not pass `max_tokens`.
const DEFAULT_MAX_TOKENS: u64 = 4096;

pub struct AnthropicAdapter;

impl WireAdapter for AnthropicAdapter {
    fn build_request(
        &self,
        req: &ChatRequest,
        profile: &ModelProfile,
    ) -> Result<ProviderRequest> {
        let api_key = profile.api_key.as_ref().ok_or_else(|| {
            GatewayError::unavailable(format!(
                "Provider '{}' has no API key configured",
                profile.provider_id
            ))
        })?;

        let system: Vec<&str> = req
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let messages: Vec<serde_json::Value> = req
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
            .collect();

        let max_tokens = req
            .extra
            .get("max_tokens")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let mut body = serde_json::Map::new();
        body.insert(
            "model".to_string(),
            serde_json::Value::String(profile.upstream_model.clone()),
        );
        body.insert("messages".to_string(), serde_json::Value::Array(messages));
        body.insert("max_tokens".to_string(), serde_json::json!(max_tokens));
        body.insert("stream".to_string(), serde_json::Value::Bool(req.stream));
        if !system.is_empty() {
            body.insert(
                "system".to_string(),
                serde_json::Value::String(system.join("\n\n")),
            );
        }
        merge_passthrough(
            &mut body,
            &req.extra,
            &["model", "messages", "stream", "system", "max_tokens"],
        );

        Ok(ProviderRequest {
            url: format!("{}/v1/messages", profile.base_url.trim_end_matches('/')),
            headers: vec![
                ("x-api-key", api_key.clone()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
                ("Content-Type", "application/json".to_string()),
            ],
            body: serde_json::Value::Object(body),
        })
    }

    fn stream_parser(&self) -> Box<dyn StreamParser> {
        Box::new(AnthropicStreamParser::default())
    }

    fn parse_final(&self, body: &[u8]) -> Result<FinalCompletion> {
        let parsed: MessagesResponse = serde_json::from_slice(body).map_err(|e| {
            GatewayError::upstream(None, format!("Unparseable messages body: {e}"))
        })?;

        let content = parsed
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(FinalCompletion {
            content,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }
}

#[derive(Debug, Default)]
pub struct AnthropicStreamParser {
    lines: SseLineBuffer,
    input_tokens: Option<u64>,
    done: bool,
}

impl AnthropicStreamParser {
    fn handle_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        if self.done {
            return;
        }
        let Some(data) = sse_data(line) else {
            return;
        };

        match serde_json::from_str::<WireEvent>(data) {
            Ok(WireEvent::MessageStart { message }) => {
                self.input_tokens = Some(message.usage.input_tokens);
            }
            Ok(WireEvent::ContentBlockDelta { delta }) => {
                if let BlockDelta::TextDelta { text } = delta {
                    if !text.is_empty() {
                        events.push(StreamEvent::ContentDelta(text));
                    }
                }
            }
            Ok(WireEvent::MessageDelta { usage }) => {
                if let Some(usage) = usage {
                    events.push(StreamEvent::UsageFinal {
                        input_tokens: self.input_tokens.unwrap_or(0),
                        output_tokens: usage.output_tokens,
                    });
                }
            }
            Ok(WireEvent::MessageStop) => {
                self.done = true;
                events.push(StreamEvent::Done);
            }
            Ok(WireEvent::ErrorEvent { error }) => {
                events.push(StreamEvent::Error(error.message));
            }
            Ok(WireEvent::Other) => {}
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable stream line");
            }
        }
    }
}

impl StreamParser for AnthropicStreamParser {
    fn push_chunk(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for line in self.lines.push(chunk) {
            self.handle_line(&line, &mut events);
        }
        events
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(line) = self.lines.finish() {
            self.handle_line(&line, &mut events);
        }
        events
    }
}

// Wire shapes, narrowed to the fields the gateway reads.

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: StartMessage },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: BlockDelta },
    #[serde(rename = "message_delta")]
    MessageDelta { usage: Option<DeltaUsage> },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(rename = "error")]
    ErrorEvent { error: WireError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    #[serde(default)]
    usage: StartUsage,
}

#[derive(Debug, Default, Deserialize)]
struct StartUsage {
    #[serde(default)]
    input_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum BlockDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: FinalUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct FinalUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}
