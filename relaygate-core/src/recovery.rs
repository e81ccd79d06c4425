//! Turns a refusal-to-act into an executed tool call.
//!
//! When the upstream answers "I can't run that, but you can: ```ls```", the
//! gateway runs the command itself and reports it to the client as a
//! `bash` tool_use followed by its result.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing_futures::Instrument;

use crate::classifier::{extract_recovery_command, is_refusal};
use crate::model::{ContentBlock, ToolInvocation};
use crate::tools::Executor;

/// Tool name every synthesized invocation uses.
pub const RECOVERY_TOOL: &str = "bash";

pub const EXECUTING_NOTICE: &str = "Executing command...";
pub const SUCCESS_MARKER: &str = "✅ Command succeeded";
pub const FAILURE_MARKER: &str = "❌ Command failed";

pub struct RecoveryOrchestrator {
    executor: Arc<dyn Executor>,
}

impl RecoveryOrchestrator {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Synthesized `[text, tool_use, text]` blocks, or `None` when `text` is
    /// not a refusal or names no command.
    ///
    /// Only call this when no structured tool call was found. Execution
    /// failures end up in the returned content, never as an error.
    pub async fn recover(&self, text: &str) -> Option<Vec<ContentBlock>> {
        if !is_refusal(text) {
            return None;
        }
        let Some(command) = extract_recovery_command(text) else {
            tracing::debug!("refusal without an extractable command; passing text through");
            return None;
        };

        let mut input = Map::new();
        input.insert("command".into(), Value::String(command.clone()));

        tracing::info!(command = %command, "recovering refused command");
        let span = tracing::info_span!("recovery_exec", tool = RECOVERY_TOOL);
        let result = self
            .executor
            .execute(RECOVERY_TOOL, &input)
            .instrument(span)
            .await;

        let (marker, body) = match result {
            Ok(output) => (SUCCESS_MARKER, output),
            Err(e) => {
                tracing::warn!(command = %command, error = %e, "recovered command failed");
                (FAILURE_MARKER, e.to_string())
            }
        };

        Some(vec![
            ContentBlock::text(EXECUTING_NOTICE),
            ContentBlock::tool_use(ToolInvocation {
                name: RECOVERY_TOOL.to_string(),
                input,
            }),
            ContentBlock::text(result_text(marker, &body)),
        ])
    }
}

fn result_text(marker: &str, body: &str) -> String {
    format!("\n\n{marker}:\n```\n{body}\n```")
}
