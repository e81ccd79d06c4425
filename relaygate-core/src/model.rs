use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
        }
    }
}

// ===== Client-facing wire types (Messages API) =====

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MessagesRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    /// Either a plain string or a list of text blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

/// Message content is either a bare string or a list of typed blocks.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<InputBlock>),
}

impl MessageContent {
    /// Plain text of the content; text blocks are joined with `sep`, all other blocks are skipped.
    pub fn joined_text(&self, sep: &str) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    InputBlock::Text { text } => Some(text.as_str()),
                    InputBlock::ToolUse { .. } | InputBlock::ToolResult { .. } | InputBlock::Other => {
                        None
                    }
                })
                .collect::<Vec<_>>()
                .join(sep),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Map<String, Value>,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<MessageContent>,
        #[serde(default)]
        is_error: bool,
    },
    /// Images, documents and anything else the upstream cannot take.
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Map<String, Value>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// A tool_use block with a freshly generated id.
    pub fn tool_use(invocation: ToolInvocation) -> Self {
        Self::ToolUse {
            id: format!("toolu_{}", new_id()),
            name: invocation.name,
            input: invocation.input,
        }
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, Self::ToolUse { .. })
    }
}

/// A named tool call with structured arguments.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub input: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: StopReason,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

/// `end_turn` unless at least one block is a tool_use.
pub fn stop_reason_for(blocks: &[ContentBlock]) -> StopReason {
    if blocks.iter().any(ContentBlock::is_tool_use) {
        StopReason::ToolUse
    } else {
        StopReason::EndTurn
    }
}

// ===== Upstream wire types =====

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub context: Vec<UpstreamContext>,
    pub model: String,
    pub id: String,
    pub messages: Vec<UpstreamMessage>,
    pub trigger: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamContext {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub file_path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UpstreamMessage {
    pub parts: Vec<UpstreamPart>,
    pub id: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UpstreamPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl UpstreamMessage {
    pub fn text(role: Role, text: String) -> Self {
        Self {
            parts: vec![UpstreamPart {
                kind: "text".into(),
                text,
            }],
            id: new_id(),
            role,
        }
    }
}

/// 16 lowercase hex characters, unique per call.
pub fn new_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}
