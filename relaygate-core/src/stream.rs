//! Client-facing streaming events and their SSE encoding.
//!
//! Contract:
//! - A stream opens with `MessageStart` followed by `ContentBlockStart` for index 0.
//! - Every block is `ContentBlockStart`, one or more `ContentBlockDelta`, `ContentBlockStop`.
//! - An optional `Error` precedes the stop of block 0 when the upstream failed mid-flight.
//! - The stream **must** end with `MessageDelta` then `MessageStop`; nothing follows.
//!
//! Events are serialized one at a time by [`encode_sse`]; the full response is never
//! materialized.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{BridgeError, CoreResult};
use crate::model::{ContentBlock, Role, StopReason, Usage};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        usage: DeltaUsage,
    },
    MessageStop,
    Error {
        error: ErrorBody,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageStart {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageDeltaBody {
    pub stop_reason: StopReason,
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeltaUsage {
    pub output_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl ClientEvent {
    /// SSE event name; identical to the `type` field of the payload.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::ContentBlockStart { .. } => "content_block_start",
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::ContentBlockStop { .. } => "content_block_stop",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageStop => "message_stop",
            Self::Error { .. } => "error",
        }
    }

    /// Returns true for the last event of a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageStop)
    }

    /// Block index carried by block lifecycle events.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::ContentBlockStart { index, .. }
            | Self::ContentBlockDelta { index, .. }
            | Self::ContentBlockStop { index } => Some(*index),
            _ => None,
        }
    }

    pub fn text_start(index: usize) -> Self {
        Self::ContentBlockStart {
            index,
            content_block: ContentBlock::text(""),
        }
    }

    /// Start event for a tool_use block; the input arrives later as a JSON delta.
    pub fn tool_start(index: usize, id: &str, name: &str) -> Self {
        Self::ContentBlockStart {
            index,
            content_block: ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input: Map::new(),
            },
        }
    }

    pub fn text_delta(index: usize, text: impl Into<String>) -> Self {
        Self::ContentBlockDelta {
            index,
            delta: BlockDelta::TextDelta { text: text.into() },
        }
    }

    pub fn input_json_delta(index: usize, input: &Map<String, Value>) -> CoreResult<Self> {
        let partial_json = serde_json::to_string(input).map_err(|e| BridgeError::Other(e.into()))?;
        Ok(Self::ContentBlockDelta {
            index,
            delta: BlockDelta::InputJsonDelta { partial_json },
        })
    }

    pub fn error(err: &BridgeError) -> Self {
        Self::Error {
            error: ErrorBody {
                kind: err.error_type().to_string(),
                message: err.to_string(),
            },
        }
    }
}

/// Encode one event as an SSE record: `event: <name>\ndata: <json>\n\n`.
pub fn encode_sse(event: &ClientEvent) -> CoreResult<String> {
    let data = serde_json::to_string(event).map_err(|e| BridgeError::Other(e.into()))?;
    Ok(format!("event: {}\ndata: {}\n\n", event.name(), data))
}
