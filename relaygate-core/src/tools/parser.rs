use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::model::ToolInvocation;

/// Result of scanning assistant text for structured tool calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedToolCalls {
    pub invocations: Vec<ToolInvocation>,
    /// Input text with every recognized call removed.
    pub remaining_text: String,
}

/// Extracts structured tool invocations from accumulated assistant text.
///
/// Implementations never fail: text without calls comes back unchanged with
/// an empty invocation list.
pub trait ToolCallParser: Send + Sync {
    fn parse(&self, text: &str) -> ParsedToolCalls;
}

static TOOL_CALL_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<tool_call>\s*(.*?)\s*</tool_call>").expect("tool_call regex"));

/// Keys that may carry the arguments object, in lookup order.
const ARGUMENT_KEYS: &[&str] = &["input", "arguments", "parameters"];

/// Parses `<tool_call>{"name": .., "input": {..}}</tool_call>` blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupToolCallParser;

impl MarkupToolCallParser {
    pub fn new() -> Self {
        Self
    }
}

impl ToolCallParser for MarkupToolCallParser {
    fn parse(&self, text: &str) -> ParsedToolCalls {
        let mut invocations = Vec::new();
        let mut remaining = String::with_capacity(text.len());
        let mut last = 0;

        for caps in TOOL_CALL_BLOCK.captures_iter(text) {
            let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            match parse_call_body(body.as_str()) {
                Some(invocation) => {
                    remaining.push_str(&text[last..whole.start()]);
                    last = whole.end();
                    invocations.push(invocation);
                }
                None => {
                    tracing::debug!(body_len = body.len(), "leaving malformed tool_call block in text");
                }
            }
        }
        remaining.push_str(&text[last..]);

        ParsedToolCalls {
            invocations,
            remaining_text: remaining.trim().to_string(),
        }
    }
}

fn strip_code_fence(body: &str) -> &str {
    let body = body.trim();
    let body = body
        .strip_prefix("```json")
        .or_else(|| body.strip_prefix("```"))
        .unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn parse_call_body(body: &str) -> Option<ToolInvocation> {
    let value: Value = serde_json::from_str(strip_code_fence(body)).ok()?;
    let obj = value.as_object()?;
    let name = obj.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let input = match ARGUMENT_KEYS.iter().find_map(|k| obj.get(*k)) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(m)) => m.clone(),
        // Some models send the arguments as a JSON-encoded string.
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s).ok()? {
            Value::Object(m) => m,
            _ => return None,
        },
        Some(_) => return None,
    };
    Some(ToolInvocation {
        name: name.to_string(),
        input,
    })
}
