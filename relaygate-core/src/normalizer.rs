use crate::model::{
    InputBlock, Message, MessageContent, MessagesRequest, Role, UpstreamContext, UpstreamMessage,
    UpstreamRequest, new_id,
};
use crate::tools::{render_tool_call, tool_prompt};
use unicode_normalization::UnicodeNormalization;

/// Trigger value the upstream expects on a fresh user turn.
pub const SUBMIT_TRIGGER: &str = "submit-message";

pub fn clean_text(s: &str) -> String {
    // Unicode NFC normalization + BOM strip + CRLF -> LF + trim
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        // Byte Order Mark
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

/// Flatten one message into the plain text the upstream understands.
///
/// Text blocks are kept, tool results become labelled sections and earlier
/// tool calls are rendered back into `<tool_call>` markup. Images and other
/// blocks are dropped.
pub fn message_text(content: &MessageContent) -> String {
    let blocks = match content {
        MessageContent::Text(s) => return clean_text(s),
        MessageContent::Blocks(blocks) => blocks,
    };
    let parts: Vec<String> = blocks
        .iter()
        .filter_map(|block| match block {
            InputBlock::Text { text } => Some(text.clone()),
            InputBlock::ToolUse { name, input, .. } => Some(render_tool_call(name, input)),
            InputBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let label = if *is_error { "Tool error" } else { "Tool result" };
                let body = content
                    .as_ref()
                    .map(|c| c.joined_text(""))
                    .unwrap_or_default();
                Some(format!("[{label} (ID: {tool_use_id})]\n{body}"))
            }
            InputBlock::Other => None,
        })
        .collect();
    clean_text(&parts.join("\n"))
}

fn system_text(req: &MessagesRequest) -> String {
    let base = req
        .system
        .as_ref()
        .map(|s| clean_text(&s.joined_text("\n")))
        .unwrap_or_default();
    let tools = tool_prompt(&req.tools);
    match (base.is_empty(), tools.is_empty()) {
        (_, true) => base,
        (true, false) => tools,
        (false, false) => format!("{base}\n\n{tools}"),
    }
}

/// Build the upstream request envelope for `req`.
///
/// `upstream_model` is the already mapped model name. Messages whose text is
/// empty after flattening are skipped.
pub fn to_upstream(req: &MessagesRequest, upstream_model: &str) -> UpstreamRequest {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    let system = system_text(req);
    if !system.is_empty() {
        messages.push(UpstreamMessage::text(Role::System, system));
    }
    messages.extend(req.messages.iter().filter_map(|Message { role, content }| {
        let text = message_text(content);
        (!text.is_empty()).then(|| UpstreamMessage::text(*role, text))
    }));

    UpstreamRequest {
        context: vec![UpstreamContext {
            kind: "file".into(),
            content: String::new(),
            file_path: "/docs/".into(),
        }],
        model: upstream_model.to_string(),
        id: new_id(),
        messages,
        trigger: SUBMIT_TRIGGER.into(),
    }
}

/// Rough token count: one token per four characters, never below one.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() / 4;
    u32::try_from(chars).unwrap_or(u32::MAX).max(1)
}

/// Input token estimate over the system prompt and the text of every message.
pub fn count_tokens(req: &MessagesRequest) -> u32 {
    let mut chars = req
        .system
        .as_ref()
        .map_or(0, |s| s.joined_text("\n").chars().count());
    chars += req
        .messages
        .iter()
        .map(|m| m.content.joined_text("\n").chars().count())
        .sum::<usize>();
    u32::try_from(chars / 4).unwrap_or(u32::MAX).max(1)
}
