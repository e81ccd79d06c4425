use serde_json::{Map, Value};

use crate::model::ToolDefinition;

/// System-prompt section describing the client's tools and the `<tool_call>`
/// markup the upstream must answer with. Empty when there are no tools.
pub fn tool_prompt(tools: &[ToolDefinition]) -> String {
    if tools.is_empty() {
        return String::new();
    }
    let mut out = String::from("You have access to the following tools:\n");
    for tool in tools {
        out.push_str("\n- ");
        out.push_str(&tool.name);
        if let Some(desc) = tool.description.as_deref().filter(|d| !d.trim().is_empty()) {
            out.push_str(": ");
            out.push_str(desc.trim());
        }
        if !tool.input_schema.is_null() {
            out.push_str("\n  input schema: ");
            out.push_str(&tool.input_schema.to_string());
        }
    }
    out.push_str(
        "\n\nTo call a tool, reply with a block of this exact form and nothing inside it but JSON:\n\
         <tool_call>{\"name\": \"<tool name>\", \"input\": {<arguments>}}</tool_call>\n\
         You may emit several blocks. Results arrive in the next user message.",
    );
    out
}

/// Render one call the way the upstream is asked to write it.
pub fn render_tool_call(name: &str, input: &Map<String, Value>) -> String {
    format!(
        "<tool_call>{{\"name\":{},\"input\":{}}}</tool_call>",
        Value::from(name),
        Value::Object(input.clone())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::parser::{MarkupToolCallParser, ToolCallParser};
    use serde_json::json;

    #[test]
    fn no_tools_no_prompt() {
        assert_eq!(tool_prompt(&[]), "");
    }

    #[test]
    fn lists_every_tool_with_schema() {
        let tools = vec![
            ToolDefinition {
                name: "bash".into(),
                description: Some("Run a shell command".into()),
                input_schema: json!({"type": "object", "properties": {"command": {"type": "string"}}}),
            },
            ToolDefinition {
                name: "noop".into(),
                description: None,
                input_schema: Value::Null,
            },
        ];
        let p = tool_prompt(&tools);
        assert!(p.contains("- bash: Run a shell command"));
        assert!(p.contains("\"command\""));
        assert!(p.contains("- noop"));
        assert!(p.contains("<tool_call>"));
    }

    #[test]
    fn rendered_call_parses_back() {
        let mut input = Map::new();
        input.insert("command".into(), json!("ls -la"));
        let rendered = render_tool_call("bash", &input);
        let parsed = MarkupToolCallParser::new().parse(&rendered);
        assert_eq!(parsed.invocations.len(), 1);
        assert_eq!(parsed.invocations[0].input, input);
    }
}
