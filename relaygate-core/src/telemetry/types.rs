use serde::Serialize;

/// One structured record per finished request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompletionLog {
    pub message_id: Option<String>,
    /// Model name as sent by the client.
    pub model: Option<String>,
    pub upstream_model: Option<String>,
    pub stream: bool,
    pub latency_ms: Option<u64>,

    pub stop_reason: Option<String>,
    pub blocks: usize,
    pub tool_calls: usize,
    /// True when the tool call was synthesized from a refusal.
    pub recovered: bool,

    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,

    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl CompletionLog {
    pub fn new() -> Self { Self::default() }
    pub fn message_id(mut self, v: &str) -> Self { self.message_id = Some(v.to_string()); self }
    pub fn model(mut self, v: &str) -> Self { self.model = Some(v.to_string()); self }
    pub fn upstream_model(mut self, v: &str) -> Self { self.upstream_model = Some(v.to_string()); self }
    pub fn stream(mut self, v: bool) -> Self { self.stream = v; self }
    pub fn latency_ms(mut self, v: u64) -> Self { self.latency_ms = Some(v); self }
    pub fn stop_reason(mut self, v: &str) -> Self { self.stop_reason = Some(v.to_string()); self }
    pub fn blocks(mut self, v: usize) -> Self { self.blocks = v; self }
    pub fn tool_calls(mut self, v: usize) -> Self { self.tool_calls = v; self }
    pub fn recovered(mut self, v: bool) -> Self { self.recovered = v; self }
    pub fn tokens(mut self, input: Option<u32>, output: Option<u32>) -> Self {
        self.input_tokens = input; self.output_tokens = output; self
    }
    pub fn error_kind_opt(mut self, v: Option<&str>) -> Self { self.error_kind = v.map(|s| s.to_string()); self }
    pub fn error_message(mut self, v: &str) -> Self { self.error_message = Some(v.to_string()); self }
}
