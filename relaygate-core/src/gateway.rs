//! Per-request driver: convert, call upstream, translate, resolve, emit.

use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing_futures::Instrument;

use crate::decoder::{collect_text, decode_frame};
use crate::error::{BridgeError, CoreResult};
use crate::model::{
    MessagesRequest, MessagesResponse, Role, StopReason, UpstreamRequest, Usage, new_id,
};
use crate::normalizer::{count_tokens, estimate_tokens, to_upstream};
use crate::reassembler::ChunkReassembler;
use crate::recovery::RecoveryOrchestrator;
use crate::services::Services;
use crate::stream::ClientEvent;
use crate::telemetry::{self, CompletionLog};
use crate::translator::{StreamTranslator, build_blocks, resolve_trailing};

/// Where client events go, one at a time and in order.
///
/// A failed write means the client is gone; implementations report it as
/// `ClientDisconnected` and the request stops there.
#[async_trait]
pub trait EventSink: Send {
    async fn emit(&mut self, event: ClientEvent) -> CoreResult<()>;
}

#[async_trait]
impl EventSink for mpsc::Sender<ClientEvent> {
    async fn emit(&mut self, event: ClientEvent) -> CoreResult<()> {
        self.send(event)
            .await
            .map_err(|_| BridgeError::ClientDisconnected)
    }
}

#[async_trait]
impl EventSink for Vec<ClientEvent> {
    async fn emit(&mut self, event: ClientEvent) -> CoreResult<()> {
        self.push(event);
        Ok(())
    }
}

async fn emit_all<S: EventSink + ?Sized>(sink: &mut S, events: Vec<ClientEvent>) -> CoreResult<()> {
    for event in events {
        sink.emit(event).await?;
    }
    Ok(())
}

/// Telemetry `error_kind` for a failed request.
fn error_kind(e: &BridgeError) -> &'static str {
    match e {
        BridgeError::ClientDisconnected => "client",
        BridgeError::Validation(_) => "validation",
        BridgeError::RateLimited { .. }
        | BridgeError::UpstreamUnavailable { .. }
        | BridgeError::UpstreamError { .. } => "upstream",
        _ => "internal",
    }
}

/// A validated request, converted for the upstream.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub upstream: UpstreamRequest,
    pub upstream_model: String,
    pub input_tokens: u32,
}

/// What a finished streaming translation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationSummary {
    pub message_id: String,
    pub stop_reason: StopReason,
    pub blocks: usize,
    pub tool_calls: usize,
    pub recovered: bool,
    pub output_tokens: u32,
    /// Set when the upstream failed after the stream had started.
    pub upstream_error: Option<String>,
}

pub struct Gateway {
    services: Services,
    recovery: RecoveryOrchestrator,
}

impl Gateway {
    pub fn new(services: Services) -> Self {
        let recovery = RecoveryOrchestrator::new(services.executor.clone());
        Self { services, recovery }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Validate `req` and build the upstream envelope.
    pub fn prepare(&self, req: &MessagesRequest) -> CoreResult<Prepared> {
        if req.model.trim().is_empty() {
            return Err(BridgeError::Validation("model must not be empty".into()));
        }
        if req.messages.is_empty() {
            return Err(BridgeError::Validation("messages must not be empty".into()));
        }
        let upstream_model = self.services.models.map(&req.model);
        Ok(Prepared {
            upstream: to_upstream(req, &upstream_model),
            upstream_model,
            input_tokens: count_tokens(req),
        })
    }

    /// Validate, then stream the translated response into `sink`.
    pub async fn stream_messages<S: EventSink + ?Sized>(
        &self,
        req: &MessagesRequest,
        sink: &mut S,
    ) -> CoreResult<TranslationSummary> {
        let prepared = self.prepare(req)?;
        self.stream_prepared(req, &prepared, sink).await
    }

    /// Stream an already prepared request. Upstream failures become an
    /// `error` event inside a well-formed stream; only a sink failure is
    /// returned as an error.
    pub async fn stream_prepared<S: EventSink + ?Sized>(
        &self,
        req: &MessagesRequest,
        prepared: &Prepared,
        sink: &mut S,
    ) -> CoreResult<TranslationSummary> {
        let started = Instant::now();
        let span = tracing::info_span!(
            "messages",
            model = %req.model,
            upstream_model = %prepared.upstream_model,
            stream = true
        );
        let result = self
            .translate_stream(req, prepared, sink)
            .instrument(span)
            .await;

        let mut log = CompletionLog::new()
            .model(&req.model)
            .upstream_model(&prepared.upstream_model)
            .stream(true)
            .latency_ms(started.elapsed().as_millis() as u64);
        match &result {
            Ok(summary) => {
                tracing::info!(
                    message_id = %summary.message_id,
                    stop_reason = summary.stop_reason.as_str(),
                    blocks = summary.blocks,
                    recovered = summary.recovered,
                    "stream completed"
                );
                log = log
                    .message_id(&summary.message_id)
                    .stop_reason(summary.stop_reason.as_str())
                    .blocks(summary.blocks)
                    .tool_calls(summary.tool_calls)
                    .recovered(summary.recovered)
                    .tokens(Some(prepared.input_tokens), Some(summary.output_tokens))
                    .error_kind_opt(summary.upstream_error.as_ref().map(|_| "upstream"));
                if let Some(msg) = &summary.upstream_error {
                    log = log.error_message(msg);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "stream aborted");
                log = log.error_kind_opt(Some(error_kind(e))).error_message(&e.to_string());
            }
        }
        telemetry::emit_completion(log);
        result
    }

    async fn translate_stream<S: EventSink + ?Sized>(
        &self,
        req: &MessagesRequest,
        prepared: &Prepared,
        sink: &mut S,
    ) -> CoreResult<TranslationSummary> {
        let mut translator = StreamTranslator::new(req.model.clone(), prepared.input_tokens);
        emit_all(sink, translator.start()).await?;

        let mut reassembler = ChunkReassembler::new();
        let mut upstream_error = None;
        match self.services.source.open_stream(&prepared.upstream).await {
            Ok(mut chunks) => {
                while let Some(item) = chunks.next().await {
                    let chunk = match item {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            upstream_error = Some(e);
                            break;
                        }
                    };
                    for frame in reassembler.feed(&chunk) {
                        if let Some(event) = decode_frame(&frame).and_then(|e| translator.push_delta(&e)) {
                            sink.emit(event).await?;
                        }
                    }
                }
            }
            Err(e) => upstream_error = Some(e),
        }
        if let Some(tail) = reassembler.finish() {
            tracing::debug!(len = tail.len(), "discarding unterminated upstream tail");
        }
        if let Some(e) = &upstream_error {
            tracing::warn!(source = self.services.source.name(), error = %e, "upstream stream failed");
        }

        emit_all(sink, translator.close_text(upstream_error.as_ref())).await?;

        // Text cut off by a transport failure never drives command execution.
        let recovery = upstream_error.is_none().then_some(&self.recovery);
        let resolution = resolve_trailing(
            translator.accumulated_text(),
            self.services.parser.as_ref(),
            recovery,
        )
        .await;
        emit_all(sink, translator.push_blocks(&resolution.blocks)?).await?;

        let summary = TranslationSummary {
            message_id: translator.message_id().to_string(),
            stop_reason: translator.stop_reason(),
            blocks: 1 + resolution.blocks.len(),
            tool_calls: resolution.tool_calls,
            recovered: resolution.recovered,
            output_tokens: translator.output_tokens(),
            upstream_error: upstream_error.map(|e| e.to_string()),
        };
        emit_all(sink, translator.finish()).await?;
        Ok(summary)
    }

    /// Non-streaming request: the whole upstream body is resolved in one pass.
    pub async fn messages(&self, req: &MessagesRequest) -> CoreResult<MessagesResponse> {
        let started = Instant::now();
        let prepared = self.prepare(req)?;
        let span = tracing::info_span!(
            "messages",
            model = %req.model,
            upstream_model = %prepared.upstream_model,
            stream = false
        );
        let result = self.complete(req, &prepared).instrument(span).await;

        let mut log = CompletionLog::new()
            .model(&req.model)
            .upstream_model(&prepared.upstream_model)
            .stream(false)
            .latency_ms(started.elapsed().as_millis() as u64);
        match &result {
            Ok((resp, recovered, tool_calls)) => {
                tracing::info!(
                    message_id = %resp.id,
                    stop_reason = resp.stop_reason.as_str(),
                    blocks = resp.content.len(),
                    recovered = *recovered,
                    "completion finished"
                );
                log = log
                    .message_id(&resp.id)
                    .stop_reason(resp.stop_reason.as_str())
                    .blocks(resp.content.len())
                    .tool_calls(*tool_calls)
                    .recovered(*recovered)
                    .tokens(Some(resp.usage.input_tokens), Some(resp.usage.output_tokens));
            }
            Err(e) => {
                tracing::warn!(error = %e, "completion failed");
                log = log.error_kind_opt(Some(error_kind(e))).error_message(&e.to_string());
            }
        }
        telemetry::emit_completion(log);
        result.map(|(resp, _, _)| resp)
    }

    async fn complete(
        &self,
        req: &MessagesRequest,
        prepared: &Prepared,
    ) -> CoreResult<(MessagesResponse, bool, usize)> {
        let body = self.services.source.fetch(&prepared.upstream).await?;
        let text = collect_text(&body);
        let resolution = build_blocks(&text, self.services.parser.as_ref(), &self.recovery).await;
        let stop_reason = resolution.stop_reason();
        let resp = MessagesResponse {
            id: format!("msg_{}", new_id()),
            kind: "message".into(),
            role: Role::Assistant,
            content: resolution.blocks,
            model: req.model.clone(),
            stop_reason,
            stop_sequence: None,
            usage: Usage {
                input_tokens: prepared.input_tokens,
                output_tokens: estimate_tokens(&text),
            },
        };
        Ok((resp, resolution.recovered, resolution.tool_calls))
    }
}
