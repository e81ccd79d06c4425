//! Heuristic classification of assistant text.
//!
//! Everything here is pattern based and deliberately imprecise: refusal
//! detection is a plain substring test, so text that merely quotes a refusal
//! phrase is classified as a refusal too. Absence of a match is `None`/`false`,
//! never an error.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::intent::{IntentAction, IntentParser};

/// Lowercase phrases signalling that the assistant declined to act itself.
const REFUSAL_PHRASES: &[&str] = &[
    "无法直接",
    "无法执行",
    "不能执行",
    "受到了限制",
    "没有权限",
    "无法帮你",
    "cannot directly",
    "cannot execute",
    "can't execute",
    "i cannot run",
    "unable to",
    "don't have access",
    "i can't",
    "我不能",
    "我无法",
    "请在你的终端",
    "请在本地",
    "你需要在",
    "你可以运行",
    "run this in your terminal",
    "in your terminal",
];

static FENCED_SHELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:bash|sh)?\s*\n([^`]+)\n```").expect("fenced shell regex"));

static SHELL_VERB_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:cat|echo|mkdir|touch|rm|cp|mv|ls|cd|pwd)(?:[ \t]+[^\n]*)?$")
        .expect("shell verb regex")
});

static REDIRECTION_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*\S+[ \t]+>[ \t]+\S+").expect("redirection regex"));

/// Everything the classifier can say about one piece of text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub is_refusal: bool,
    pub suggested_command: Option<String>,
    pub guessed_path: Option<String>,
    pub guessed_content: Option<String>,
    pub guessed_action: Option<IntentAction>,
}

/// True if `text` contains any refusal phrase, case-insensitively.
/// Typographic apostrophes match their ASCII form.
pub fn is_refusal(text: &str) -> bool {
    let lower = text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'");
    REFUSAL_PHRASES.iter().any(|p| lower.contains(p))
}

/// Best-effort shell command suggested by `text`.
///
/// Tried in order: the first fenced `bash`/`sh`/untagged code block, the
/// first line starting with a common shell verb, the first `a > b` line.
pub fn extract_recovery_command(text: &str) -> Option<String> {
    if let Some(body) = FENCED_SHELL.captures(text).and_then(|c| c.get(1)) {
        let cmd = body.as_str().trim();
        if !cmd.is_empty() {
            return Some(cmd.to_string());
        }
    }
    [&*SHELL_VERB_LINE, &*REDIRECTION_LINE]
        .into_iter()
        .find_map(|re| re.find(text))
        .map(|m| m.as_str().trim().to_string())
        .filter(|cmd| !cmd.is_empty())
}

/// Run every heuristic over the same text.
pub fn classify(text: &str) -> Classification {
    let intent = IntentParser::new().parse(&[text]);
    Classification {
        is_refusal: is_refusal(text),
        suggested_command: extract_recovery_command(text),
        guessed_path: intent.file_path,
        guessed_content: intent.content,
        guessed_action: intent.action,
    }
}
