//! Streaming re-emitter and post-hoc block resolution.
//!
//! [`StreamTranslator`] is a pure state machine: it consumes decoded upstream
//! events and returns the client events to write, in order. It does no I/O;
//! the gateway drives it and hands the events to an `EventSink`.

use crate::decoder::UpstreamEvent;
use crate::error::{BridgeError, CoreResult};
use crate::model::{ContentBlock, Role, StopReason, Usage, new_id, stop_reason_for};
use crate::normalizer::estimate_tokens;
use crate::recovery::RecoveryOrchestrator;
use crate::stream::{ClientEvent, DeltaUsage, MessageDeltaBody, MessageStart};
use crate::tools::ToolCallParser;

/// Index of the live text block.
pub const TEXT_BLOCK: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslatorState {
    NotStarted,
    TextOpen,
    TextClosed,
    Finished,
}

#[derive(Debug)]
pub struct StreamTranslator {
    state: TranslatorState,
    message_id: String,
    model: String,
    input_tokens: u32,
    text: String,
    next_index: usize,
    tool_blocks: usize,
}

impl StreamTranslator {
    /// `model` is echoed back as requested by the client.
    pub fn new(model: impl Into<String>, input_tokens: u32) -> Self {
        Self {
            state: TranslatorState::NotStarted,
            message_id: format!("msg_{}", new_id()),
            model: model.into(),
            input_tokens,
            text: String::new(),
            next_index: TEXT_BLOCK,
            tool_blocks: 0,
        }
    }

    pub fn state(&self) -> TranslatorState {
        self.state
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Concatenation of every text delta accepted so far.
    pub fn accumulated_text(&self) -> &str {
        &self.text
    }

    pub fn stop_reason(&self) -> StopReason {
        if self.tool_blocks > 0 {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        }
    }

    pub fn output_tokens(&self) -> u32 {
        estimate_tokens(&self.text)
    }

    /// `message_start` followed by the start of text block 0.
    pub fn start(&mut self) -> Vec<ClientEvent> {
        if self.state != TranslatorState::NotStarted {
            return Vec::new();
        }
        self.state = TranslatorState::TextOpen;
        self.next_index = TEXT_BLOCK + 1;
        vec![
            ClientEvent::MessageStart {
                message: MessageStart {
                    id: self.message_id.clone(),
                    kind: "message",
                    role: Role::Assistant,
                    content: Vec::new(),
                    model: self.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage {
                        input_tokens: self.input_tokens,
                        output_tokens: 0,
                    },
                },
            },
            ClientEvent::text_start(TEXT_BLOCK),
        ]
    }

    /// One client delta per non-empty upstream text delta; anything else is ignored.
    pub fn push_delta(&mut self, event: &UpstreamEvent) -> Option<ClientEvent> {
        if self.state != TranslatorState::TextOpen {
            return None;
        }
        let delta = event.text_delta()?;
        self.text.push_str(delta);
        Some(ClientEvent::text_delta(TEXT_BLOCK, delta))
    }

    /// Close block 0, reporting `error` first when the upstream failed.
    pub fn close_text(&mut self, error: Option<&BridgeError>) -> Vec<ClientEvent> {
        let mut out = self.start();
        if self.state != TranslatorState::TextOpen {
            return out;
        }
        if let Some(err) = error {
            out.push(ClientEvent::error(err));
        }
        out.push(ClientEvent::ContentBlockStop { index: TEXT_BLOCK });
        self.state = TranslatorState::TextClosed;
        out
    }

    /// Emit complete blocks after the text block, at consecutive indices.
    pub fn push_blocks(&mut self, blocks: &[ContentBlock]) -> CoreResult<Vec<ClientEvent>> {
        if self.state == TranslatorState::Finished {
            return Ok(Vec::new());
        }
        let mut out = self.close_text(None);
        for block in blocks {
            let index = self.next_index;
            match block {
                ContentBlock::ToolUse { id, name, input } => {
                    out.push(ClientEvent::tool_start(index, id, name));
                    out.push(ClientEvent::input_json_delta(index, input)?);
                    self.tool_blocks += 1;
                }
                ContentBlock::Text { text } => {
                    out.push(ClientEvent::text_start(index));
                    out.push(ClientEvent::text_delta(index, text.as_str()));
                }
            }
            out.push(ClientEvent::ContentBlockStop { index });
            self.next_index += 1;
        }
        Ok(out)
    }

    /// `message_delta` then `message_stop`; closes block 0 if still open.
    /// After this every call returns nothing.
    pub fn finish(&mut self) -> Vec<ClientEvent> {
        if self.state == TranslatorState::Finished {
            return Vec::new();
        }
        let mut out = self.close_text(None);
        out.push(ClientEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: self.stop_reason(),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: self.output_tokens(),
            },
        });
        out.push(ClientEvent::MessageStop);
        self.state = TranslatorState::Finished;
        out
    }
}

/// Blocks decided after the text is complete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub blocks: Vec<ContentBlock>,
    pub tool_calls: usize,
    pub recovered: bool,
}

impl Resolution {
    pub fn stop_reason(&self) -> StopReason {
        stop_reason_for(&self.blocks)
    }
}

/// Blocks to append after an already streamed text block: the parsed tool
/// calls, or the recovery sequence when there are none. Passing `None` for
/// `recovery` restricts the result to parsed tool calls.
pub async fn resolve_trailing(
    text: &str,
    parser: &dyn ToolCallParser,
    recovery: Option<&RecoveryOrchestrator>,
) -> Resolution {
    let parsed = parser.parse(text);
    if !parsed.invocations.is_empty() {
        let tool_calls = parsed.invocations.len();
        return Resolution {
            blocks: parsed.invocations.into_iter().map(ContentBlock::tool_use).collect(),
            tool_calls,
            recovered: false,
        };
    }
    let Some(recovery) = recovery else {
        return Resolution::default();
    };
    match recovery.recover(text).await {
        Some(blocks) => Resolution {
            blocks,
            tool_calls: 1,
            recovered: true,
        },
        None => Resolution::default(),
    }
}

/// Full content of a non-streaming response.
///
/// Recovery blocks when recovery fired; otherwise the remaining text (if any)
/// followed by the parsed tool calls; a lone text block if that is empty.
pub async fn build_blocks(
    text: &str,
    parser: &dyn ToolCallParser,
    recovery: &RecoveryOrchestrator,
) -> Resolution {
    let parsed = parser.parse(text);
    if parsed.invocations.is_empty()
        && let Some(blocks) = recovery.recover(text).await
    {
        return Resolution {
            blocks,
            tool_calls: 1,
            recovered: true,
        };
    }

    let tool_calls = parsed.invocations.len();
    let mut blocks = Vec::with_capacity(tool_calls + 1);
    if !parsed.remaining_text.is_empty() {
        blocks.push(ContentBlock::text(parsed.remaining_text));
    }
    blocks.extend(parsed.invocations.into_iter().map(ContentBlock::tool_use));
    if blocks.is_empty() {
        blocks.push(ContentBlock::text(text));
    }
    Resolution {
        blocks,
        tool_calls,
        recovered: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode_frame;
    use crate::reassembler::ChunkReassembler;
    use crate::recovery::tests::FakeExecutor;
    use crate::stream::BlockDelta;
    use crate::tools::MarkupToolCallParser;
    use serde_json::json;

    fn text_event(delta: &str) -> UpstreamEvent {
        UpstreamEvent {
            kind: "text-delta".into(),
            delta: delta.into(),
        }
    }

    fn drive(chunks: &[&str]) -> (StreamTranslator, Vec<ClientEvent>) {
        let mut t = StreamTranslator::new("claude-3-5-sonnet", 7);
        let mut r = ChunkReassembler::new();
        let mut events = t.start();
        for c in chunks {
            for frame in r.feed(c) {
                if let Some(ev) = decode_frame(&frame).and_then(|e| t.push_delta(&e)) {
                    events.push(ev);
                }
            }
        }
        events.extend(t.close_text(None));
        events.extend(t.finish());
        (t, events)
    }

    fn block0_text(events: &[ClientEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::ContentBlockDelta {
                    index: 0,
                    delta: BlockDelta::TextDelta { text },
                } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn split_frame_yields_one_delta() {
        let (_, events) = drive(&["data: {\"type\":\"text-delta\",\"delta\":\"Hel", "lo\"}\n"]);
        let deltas: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ClientEvent::ContentBlockDelta { .. }))
            .collect();
        assert_eq!(deltas.len(), 1);
        assert_eq!(*deltas[0], ClientEvent::text_delta(0, "Hello"));
    }

    #[test]
    fn plain_text_stream_has_exact_event_order() {
        let (t, events) = drive(&[
            "data: {\"type\":\"text-delta\",\"delta\":\"Hi\"}\n",
            "data: {\"type\":\"text-delta\",\"delta\":\" there\"}\n",
        ]);
        let names: Vec<_> = events.iter().map(ClientEvent::name).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert_eq!(t.stop_reason(), StopReason::EndTurn);
        match &events[0] {
            ClientEvent::MessageStart { message } => {
                assert!(message.id.starts_with("msg_"));
                assert_eq!(message.id.len(), 4 + 16);
                assert_eq!(message.model, "claude-3-5-sonnet");
                assert_eq!(message.usage.input_tokens, 7);
            }
            other => panic!("expected message_start, got {other:?}"),
        }
    }

    #[test]
    fn deltas_concatenate_to_accumulated_text() {
        let (t, events) = drive(&[
            "data: {\"type\":\"text-delta\",\"delta\":\"a\"}\ndata: {\"ty",
            "pe\":\"reasoning-delta\",\"delta\":\"zz\"}\ngarbage\ndata: {\"type\":\"text-delta\",\"delta\":\"b\\nc\"}\n",
            "data: {\"type\":\"text-delta\",\"delta\":\"é\"}\ndata: {\"type\":\"text-delta\",\"delta\":\"never terminated\"}",
        ]);
        assert_eq!(t.accumulated_text(), "ab\ncé");
        assert_eq!(block0_text(&events), t.accumulated_text());
    }

    #[test]
    fn error_precedes_block_stop() {
        let mut t = StreamTranslator::new("m", 1);
        t.start();
        t.push_delta(&text_event("partial"));
        let err = BridgeError::UpstreamUnavailable {
            reason: "reset".into(),
        };
        let closing = t.close_text(Some(&err));
        assert_eq!(closing.len(), 2);
        match &closing[0] {
            ClientEvent::Error { error } => {
                assert_eq!(error.kind, "api_error");
                assert!(error.message.contains("reset"));
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(closing[1], ClientEvent::ContentBlockStop { index: 0 });
        let tail = t.finish();
        assert!(tail.last().is_some_and(ClientEvent::is_terminal));
    }

    #[test]
    fn tool_blocks_get_consecutive_indices_and_tool_use_stop() {
        let mut t = StreamTranslator::new("m", 1);
        let mut events = t.start();
        events.extend(t.push_delta(&text_event("x")));
        let mut input = serde_json::Map::new();
        input.insert("command".into(), json!("ls"));
        let blocks = vec![
            ContentBlock::ToolUse {
                id: "toolu_a".into(),
                name: "bash".into(),
                input: input.clone(),
            },
            ContentBlock::text("after"),
        ];
        events.extend(t.push_blocks(&blocks).unwrap());
        events.extend(t.finish());

        // Every block opens and closes once, with indices 0, 1, 2 in order.
        let starts: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ClientEvent::ContentBlockStart { .. }))
            .filter_map(ClientEvent::index)
            .collect();
        let stops: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ClientEvent::ContentBlockStop { .. }))
            .filter_map(ClientEvent::index)
            .collect();
        assert_eq!(starts, vec![0, 1, 2]);
        assert_eq!(stops, vec![0, 1, 2]);

        assert!(events.contains(&ClientEvent::ContentBlockDelta {
            index: 1,
            delta: BlockDelta::InputJsonDelta {
                partial_json: r#"{"command":"ls"}"#.into()
            },
        }));
        assert_eq!(t.stop_reason(), StopReason::ToolUse);
        match &events[events.len() - 2] {
            ClientEvent::MessageDelta { delta, .. } => {
                assert_eq!(delta.stop_reason, StopReason::ToolUse)
            }
            other => panic!("expected message_delta, got {other:?}"),
        }
    }

    #[test]
    fn finished_is_absorbing() {
        let mut t = StreamTranslator::new("m", 1);
        t.start();
        let end = t.finish();
        assert_eq!(end.len(), 3);
        assert_eq!(t.state(), TranslatorState::Finished);
        assert!(t.finish().is_empty());
        assert!(t.start().is_empty());
        assert!(t.close_text(None).is_empty());
        assert!(t.push_delta(&text_event("late")).is_none());
        assert!(t.push_blocks(&[ContentBlock::text("late")]).unwrap().is_empty());
    }

    #[test]
    fn finish_without_start_is_still_well_formed() {
        let mut t = StreamTranslator::new("m", 1);
        let names: Vec<_> = t.finish().iter().map(ClientEvent::name).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
    }

    #[tokio::test]
    async fn structured_calls_skip_recovery() {
        let exec = FakeExecutor::ok("unused");
        let recovery = RecoveryOrchestrator::new(exec.clone());
        let text = "I can't run it myself.\n\
                    <tool_call>{\"name\":\"bash\",\"input\":{\"command\":\"ls\"}}</tool_call>\n\
                    <tool_call>{\"name\":\"read_file\",\"input\":{\"path\":\"a\"}}</tool_call>";
        let res = build_blocks(text, &MarkupToolCallParser::new(), &recovery).await;
        assert_eq!(exec.call_count(), 0);
        assert!(!res.recovered);
        assert_eq!(res.tool_calls, 2);
        assert_eq!(res.blocks.len(), 3);
        assert_eq!(res.blocks[0], ContentBlock::text("I can't run it myself."));
        assert_eq!(res.blocks.iter().filter(|b| b.is_tool_use()).count(), 2);
        assert_eq!(res.stop_reason(), StopReason::ToolUse);

        let trailing = resolve_trailing(text, &MarkupToolCallParser::new(), Some(&recovery)).await;
        assert_eq!(trailing.blocks.len(), 2);
        assert!(trailing.blocks.iter().all(ContentBlock::is_tool_use));
        assert_eq!(exec.call_count(), 0);
    }

    #[tokio::test]
    async fn refusal_with_command_is_recovered() {
        let exec = FakeExecutor::ok("total 0");
        let recovery = RecoveryOrchestrator::new(exec.clone());
        let text = "I cannot execute that. Run: \n```bash\nls -la\n```";
        let res = build_blocks(text, &MarkupToolCallParser::new(), &recovery).await;
        assert!(res.recovered);
        assert_eq!(exec.call_count(), 1);
        assert_eq!(res.blocks.len(), 3);
        assert!(matches!(&res.blocks[1], ContentBlock::ToolUse { name, input, .. }
            if name == "bash" && input.get("command") == Some(&json!("ls -la"))));
        assert_eq!(res.stop_reason(), StopReason::ToolUse);
    }

    #[tokio::test]
    async fn plain_answer_is_one_text_block() {
        let exec = FakeExecutor::ok("");
        let recovery = RecoveryOrchestrator::new(exec.clone());
        let res = build_blocks("Paris.", &MarkupToolCallParser::new(), &recovery).await;
        assert_eq!(res.blocks, vec![ContentBlock::text("Paris.")]);
        assert_eq!(res.stop_reason(), StopReason::EndTurn);
        assert_eq!(exec.call_count(), 0);

        let trailing = resolve_trailing("Paris.", &MarkupToolCallParser::new(), Some(&recovery)).await;
        assert!(trailing.blocks.is_empty());
    }

    #[tokio::test]
    async fn trailing_without_recovery_only_parses() {
        let text = "I cannot execute that. Run: \n```bash\nls -la\n```";
        let res = resolve_trailing(text, &MarkupToolCallParser::new(), None).await;
        assert!(res.blocks.is_empty());
        assert!(!res.recovered);
    }

    #[tokio::test]
    async fn empty_text_still_yields_a_block() {
        let recovery = RecoveryOrchestrator::new(FakeExecutor::ok(""));
        let res = build_blocks("", &MarkupToolCallParser::new(), &recovery).await;
        assert_eq!(res.blocks, vec![ContentBlock::text("")]);
    }
}
