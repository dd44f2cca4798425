//! The per-request proxy session: admission control, dispatch, stream relay,
//! settlement, audit.
//!
//! A session moves through Admitted -> Dispatched -> Streaming -> Settling and
//! ends Completed or Failed. Admission is synchronous and side-effect free on
//! failure. Once a request crosses the provider boundary, every exit path
//! (clean completion, mid-stream transport error, caller disconnect) runs
//! settlement exactly once, so the caller is billed for what was produced and
//! never for what was not.
//!
//! The streaming relay is transparent: provider bytes are forwarded to the
//! caller exactly as they arrive, while a copy is fed to the wire adapter's
//! parser to accrue usage on the side.

use crate::adapters::{adapter_for, StreamParser, WireAdapter};
use crate::audit::{CallStatus, SharedAuditLog, UsageRecord};
use crate::config::GatewayConfig;
use crate::credits::Credits;
use crate::error::{GatewayError, Result};
use crate::estimate;
use crate::ledger::Ledger;
use crate::registry::{ModelProfile, ProviderRegistry};
use crate::types::{ChatRequest, StreamEvent};

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;
use std::sync::Arc;

/// Byte frames relayed verbatim to the caller.
pub type RelayStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send>>;

/// Process-wide immutable collaborators shared by every session. The ledger
/// is the only member with interior mutability.
pub struct Gateway {
    pub registry: ProviderRegistry,
    pub ledger: Ledger,
    pub audit: SharedAuditLog,
    pub client: reqwest::Client,
}

impl Gateway {
    pub fn new(
        config: &GatewayConfig,
        audit: SharedAuditLog,
        client: reqwest::Client,
    ) -> Result<Self> {
        Ok(Self {
            registry: ProviderRegistry::from_config(config)?,
            ledger: Ledger::new(config.initial_credits, config.safety_factor),
            audit,
            client,
        })
    }

    /// Admission control. Validates request shape, resolves the model, and
    /// checks funds against the estimated input cost. Fails without touching
    /// the ledger, writing a record, or issuing any upstream call.
    pub fn admit(&self, caller_id: &str, request: ChatRequest) -> Result<ProxySession> {
        request.validate()?;

        let profile = self
            .registry
            .resolve(&request.model)
            .ok_or_else(|| GatewayError::unknown_model(&request.model))?;

        if !profile.available() {
            return Err(GatewayError::unavailable(format!(
                "Model '{}' has no provider credential configured",
                profile.model_id
            )));
        }

        if !self.ledger.balance(caller_id).is_positive() {
            return Err(GatewayError::insufficient_credits("balance is empty"));
        }

        let estimated_input_tokens = estimate::estimate_messages(&request.messages);
        let estimated_cost =
            Credits::token_cost(estimated_input_tokens, profile.input_price_per_ktok);
        if !self.ledger.try_reserve(caller_id, estimated_cost) {
            return Err(GatewayError::insufficient_credits(format!(
                "balance cannot cover estimated cost {estimated_cost}"
            )));
        }

        tracing::debug!(
            caller = %caller_id,
            model = %profile.model_id,
            estimated_input_tokens,
            "Request admitted"
        );

        Ok(ProxySession {
            caller_id: caller_id.to_string(),
            request,
            profile,
            estimated_input_tokens,
        })
    }
}

/// Outcome of a non-streaming call, after billing has completed.
pub struct CompletedCall {
    /// The provider's native body, relayed unmodified.
    pub body: Bytes,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Credits,
}

/// Short-lived, single-use state for one admitted request.
#[derive(Debug)]
pub struct ProxySession {
    caller_id: String,
    request: ChatRequest,
    profile: Arc<ModelProfile>,
    estimated_input_tokens: u64,
}

impl ProxySession {
    /// Non-streaming path: call the provider, parse the final body, settle
    /// with authoritative usage, log, and return the body.
    pub async fn run_buffered(self, gateway: &Gateway) -> Result<CompletedCall> {
        let adapter = adapter_for(self.profile.wire_format);
        let response = self.dispatch(gateway, adapter).await?;

        let body = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                self.write_record(gateway, 0, 0, Credits::ZERO, CallStatus::Failed);
                return Err(GatewayError::upstream(
                    None,
                    format!("Failed to read provider response: {e}"),
                ));
            }
        };

        let parsed = match adapter.parse_final(&body) {
            Ok(p) => p,
            Err(e) => {
                self.write_record(gateway, 0, 0, Credits::ZERO, CallStatus::Failed);
                return Err(e);
            }
        };

        // Provider figures are authoritative; the estimator only covers a
        // provider that omits usage entirely.
        let input_tokens = if parsed.input_tokens > 0 {
            parsed.input_tokens
        } else {
            self.estimated_input_tokens
        };
        let output_tokens = if parsed.output_tokens > 0 {
            parsed.output_tokens
        } else {
            estimate::estimate_tokens(&parsed.content)
        };

        let cost = self.profile.cost(input_tokens, output_tokens);
        let balance = gateway.ledger.settle(&self.caller_id, cost);
        self.write_record(gateway, input_tokens, output_tokens, cost, CallStatus::Success);

        tracing::info!(
            caller = %self.caller_id,
            model = %self.profile.model_id,
            input_tokens,
            output_tokens,
            cost = %cost,
            balance = %balance,
            "Completed non-streaming call"
        );

        Ok(CompletedCall {
            body,
            input_tokens,
            output_tokens,
            cost,
        })
    }

    /// Streaming path: returns the relay once the provider has accepted the
    /// request. Settlement runs when the relay ends, on any path.
    pub async fn run_streaming(self, gateway: Arc<Gateway>) -> Result<RelayStream> {
        let adapter = adapter_for(self.profile.wire_format);
        let response = self.dispatch(gateway.as_ref(), adapter).await?;
        let parser = adapter.stream_parser();
        Ok(Box::pin(relay(self, gateway, parser, response.bytes_stream())))
    }

    async fn dispatch(
        &self,
        gateway: &Gateway,
        adapter: &dyn WireAdapter,
    ) -> Result<reqwest::Response> {
        let provider_req = adapter.build_request(&self.request, &self.profile)?;

        tracing::info!(
            caller = %self.caller_id,
            model = %self.profile.model_id,
            provider = %self.profile.provider_id,
            streaming = self.request.stream,
            "Dispatching to provider"
        );

        let mut builder = gateway.client.post(&provider_req.url);
        for (name, value) in &provider_req.headers {
            builder = builder.header(*name, value);
        }

        let response = match builder.json(&provider_req.body).send().await {
            Ok(r) => r,
            Err(e) => {
                self.write_record(gateway, 0, 0, Credits::ZERO, CallStatus::Failed);
                return Err(GatewayError::upstream(
                    None,
                    format!("Provider request failed: {e}"),
                ));
            }
        };

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status, "Provider rejected request");
            self.write_record(gateway, 0, 0, Credits::ZERO, CallStatus::Failed);
            return Err(GatewayError::upstream(
                Some(status),
                format!("Provider returned status {}: {}", status, truncate(&body, 300)),
            ));
        }

        Ok(response)
    }

    fn write_record(
        &self,
        gateway: &Gateway,
        input_tokens: u64,
        output_tokens: u64,
        cost: Credits,
        status: CallStatus,
    ) {
        gateway.audit.append(UsageRecord::new(
            &self.caller_id,
            &self.profile.provider_id,
            &self.profile.model_id,
            input_tokens,
            output_tokens,
            cost,
            status,
        ));
    }
}

/// Relay provider frames to the caller verbatim while accruing usage from a
/// parsed copy. The settlement guard inside the generator fires on normal
/// completion, on upstream transport errors, and (through its `Drop`) when
/// the caller disconnects and the stream is dropped mid-flight.
fn relay(
    session: ProxySession,
    gateway: Arc<Gateway>,
    mut parser: Box<dyn StreamParser>,
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static {
    async_stream::stream! {
        let mut settlement = Settlement::new(session, gateway);
        tokio::pin!(byte_stream);

        loop {
            match byte_stream.next().await {
                Some(Ok(chunk)) => {
                    for event in parser.push_chunk(&chunk) {
                        settlement.observe(&event);
                    }
                    yield Ok(chunk);
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Upstream transport error mid-stream");
                    settlement.transport_error();
                    break;
                }
                None => break,
            }
        }

        for event in parser.finish() {
            settlement.observe(&event);
        }
        settlement.finalize();
    }
}

/// Accrues usage during streaming and guarantees exactly one settlement.
struct Settlement {
    session: ProxySession,
    gateway: Arc<Gateway>,
    output_chars: usize,
    usage_final: Option<(u64, u64)>,
    saw_done: bool,
    saw_error: bool,
    settled: bool,
}

impl Settlement {
    fn new(session: ProxySession, gateway: Arc<Gateway>) -> Self {
        Self {
            session,
            gateway,
            output_chars: 0,
            usage_final: None,
            saw_done: false,
            saw_error: false,
            settled: false,
        }
    }

    fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ContentDelta(text) => {
                self.output_chars += text.chars().count();
            }
            StreamEvent::UsageFinal {
                input_tokens,
                output_tokens,
            } => {
                self.usage_final = Some((*input_tokens, *output_tokens));
            }
            StreamEvent::Done => self.saw_done = true,
            StreamEvent::Error(message) => {
                tracing::warn!(message = %message, "Provider stream error event");
                self.saw_error = true;
            }
        }
    }

    fn transport_error(&mut self) {
        self.saw_error = true;
    }

    fn finalize(mut self) {
        let status = if self.saw_done && !self.saw_error {
            CallStatus::Success
        } else {
            CallStatus::Failed
        };
        self.settle_now(status);
    }

    fn settle_now(&mut self, status: CallStatus) {
        if self.settled {
            return;
        }
        self.settled = true;

        // Authoritative usage wins over the estimator when the provider
        // reported it; otherwise bill the estimate of what was relayed.
        let (input_tokens, output_tokens) = match self.usage_final {
            Some((input, output)) => (
                if input > 0 {
                    input
                } else {
                    self.session.estimated_input_tokens
                },
                output,
            ),
            None => (
                self.session.estimated_input_tokens,
                estimate::estimate_chars(self.output_chars),
            ),
        };

        // Zero bytes produced (timeout, instant disconnect) settles to zero.
        let produced_nothing = self.usage_final.is_none() && self.output_chars == 0;
        let (input_tokens, output_tokens, cost) = if produced_nothing {
            (0, 0, Credits::ZERO)
        } else {
            (
                input_tokens,
                output_tokens,
                self.session.profile.cost(input_tokens, output_tokens),
            )
        };

        let balance = self.gateway.ledger.settle(&self.session.caller_id, cost);
        self.session
            .write_record(&self.gateway, input_tokens, output_tokens, cost, status);

        tracing::info!(
            caller = %self.session.caller_id,
            model = %self.session.profile.model_id,
            input_tokens,
            output_tokens,
            cost = %cost,
            balance = %balance,
            status = ?status,
            "Settled streaming call"
        );
    }
}

impl Drop for Settlement {
    fn drop(&mut self) {
        // Caller disconnect drops the relay before finalize() runs; tokens
        // already produced still get billed.
        if !self.settled {
            self.settle_now(CallStatus::Failed);
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
