//! Adapter for the OpenAI Chat Completions protocol family.
//!
//! Covers every preset except Anthropic: flat `messages` (system included),
//! `data:`-prefixed SSE lines, and the `[DONE]` sentinel. The streaming path
//! of this protocol never reports token usage, so no `UsageFinal` event is
//! emitted and the session falls back to the estimator.

use super::{merge_passthrough, sse_data, ProviderRequest, SseLineBuffer, StreamParser, WireAdapter};
use crate::error::{GatewayError, Result};
use crate::registry::ModelProfile;
use crate::types::{ChatRequest, FinalCompletion, StreamEvent};
use serde::Deserialize;

pub struct OpenAiAdapter;

impl WireAdapter for OpenAiAdapter {
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

        let messages: Vec<serde_json::Value> = req
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
            .collect();

        let mut body = serde_json::Map::new();
        body.insert(
            "model".to_string(),
            serde_json::Value::String(profile.upstream_model.clone()),
        );
        body.insert("messages".to_string(), serde_json::Value::Array(messages));
        body.insert("stream".to_string(), serde_json::Value::Bool(req.stream));
        merge_passthrough(&mut body, &req.extra, &["model", "messages", "stream"]);

        Ok(ProviderRequest {
            url: format!(
                "{}/chat/completions",
                profile.base_url.trim_end_matches('/')
            ),
            headers: vec![
                ("Authorization", format!("Bearer {api_key}")),
                ("Content-Type", "application/json".to_string()),
            ],
            body: serde_json::Value::Object(body),
        })
    }

    fn stream_parser(&self) -> Box<dyn StreamParser> {
        Box::new(OpenAiStreamParser::default())
    }

    fn parse_final(&self, body: &[u8]) -> Result<FinalCompletion> {
        let parsed: ChatCompletion = serde_json::from_slice(body).map_err(|e| {
            GatewayError::upstream(None, format!("Unparseable completion body: {e}"))
        })?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let usage = parsed.usage.unwrap_or_default();

        Ok(FinalCompletion {
            content,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
    }
}

#[derive(Debug, Default)]
pub struct OpenAiStreamParser {
    lines: SseLineBuffer,
    done: bool,
}

impl OpenAiStreamParser {
    fn handle_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        if self.done {
            return;
        }
        let Some(data) = sse_data(line) else {
            return;
        };

        if data == "[DONE]" {
            self.done = true;
            events.push(StreamEvent::Done);
            return;
        }

        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => {
                if let Some(err) = chunk.error {
                    events.push(StreamEvent::Error(err.message));
                    return;
                }
                if let Some(text) = chunk
                    .choices
                    .first()
                    .and_then(|c| c.delta.content.as_deref())
                    .filter(|t| !t.is_empty())
                {
                    events.push(StreamEvent::ContentDelta(text.to_string()));
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable stream line");
            }
        }
    }
}

impl StreamParser for OpenAiStreamParser {
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

// Response shapes, narrowed to the fields the gateway reads. The full body
// is relayed to the caller untouched.

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}
