//! Tool-call plumbing: parsing structured calls out of text, rendering the
//! tool prompt, and executing tools locally.

pub mod executor;
pub mod parser;
pub mod prompt;

pub use executor::{Executor, ShellExecutor};
pub use parser::{MarkupToolCallParser, ParsedToolCalls, ToolCallParser};
pub use prompt::{render_tool_call, tool_prompt};
