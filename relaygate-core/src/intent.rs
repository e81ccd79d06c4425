//! Pattern-based guess at what a user asked for (create/read/edit/run).
//!
//! Auxiliary to the refusal classifier; nothing on the live recovery path
//! depends on it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::classifier::extract_recovery_command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentAction {
    CreateFile,
    ReadFile,
    EditFile,
    RunCommand,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Intent {
    pub action: Option<IntentAction>,
    pub file_path: Option<String>,
    pub content: Option<String>,
    pub command: Option<String>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("intent pattern"))
        .collect()
}

// Later categories override earlier ones, so run beats edit beats read beats create.
static ACTION_PATTERNS: Lazy<Vec<(IntentAction, Vec<Regex>)>> = Lazy::new(|| {
    vec![
        (
            IntentAction::CreateFile,
            compile(&[r"创建.*?文件", r"create.*?file", r"写入.*?文件", r"write.*?to", r"帮我创建", r"新建"]),
        ),
        (
            IntentAction::ReadFile,
            compile(&[r"读取.*?文件", r"read.*?file", r"查看.*?文件", r"看.*?内容", r"cat\s+"]),
        ),
        (
            IntentAction::EditFile,
            compile(&[r"修改.*?文件", r"编辑", r"edit.*?file", r"modify", r"update.*?file"]),
        ),
        (
            IntentAction::RunCommand,
            compile(&[r"执行.*?命令", r"run.*?command", r"运行", r"execute"]),
        ),
    ]
});

static PATH_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r#"['"](/[^'"]+)['"]"#,
        r#"['"]([^'"]+\.\w+)['"]"#,
        r"(\S+\.\w{1,5})\b",
    ])
});

static CONTENT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r#"(?i)内容[是为:：\s]+['"]?(.+?)['"]?\s*$"#,
        r#"(?i)content[:\s]+['"]?(.+?)['"]?\s*$"#,
        r#"['"]([^'"]+)['"]"#,
    ])
});

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(text).and_then(|c| c.get(1)))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntentParser;

impl IntentParser {
    pub fn new() -> Self {
        Self
    }

    /// Guess the intent behind `messages`, joined with spaces.
    ///
    /// Actions match against the lowercased text; path and content keep the
    /// original case. Any field may stay `None`.
    pub fn parse<S: AsRef<str>>(&self, messages: &[S]) -> Intent {
        let joined = messages
            .iter()
            .map(|m| m.as_ref())
            .collect::<Vec<_>>()
            .join(" ");
        let lower = joined.to_lowercase();

        let action = ACTION_PATTERNS
            .iter()
            .filter(|(_, patterns)| patterns.iter().any(|re| re.is_match(&lower)))
            .map(|(action, _)| *action)
            .last();

        let command = match action {
            Some(IntentAction::RunCommand) => extract_recovery_command(&joined),
            _ => None,
        };

        Intent {
            action,
            file_path: first_capture(&PATH_PATTERNS, &joined),
            content: first_capture(&CONTENT_PATTERNS, &joined),
            command,
        }
    }
}
