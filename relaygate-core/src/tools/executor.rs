use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;

use crate::config::ExecutorCfg;
use crate::error::{BridgeError, CoreResult};

/// Runs a named tool with structured input and returns its textual output.
///
/// Callers invoke `execute` at most once per tool call; retries and timeouts
/// are the implementation's business.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, tool: &str, input: &Map<String, Value>) -> CoreResult<String>;
}

/// Executes `bash`/`shell`, `read_file` and `write_file` on the local host.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    enabled: bool,
    timeout: Duration,
    workdir: Option<PathBuf>,
    max_output_bytes: usize,
}

impl ShellExecutor {
    pub fn new(cfg: &ExecutorCfg) -> Self {
        Self {
            enabled: cfg.enabled,
            timeout: Duration::from_millis(cfg.timeout_ms),
            workdir: cfg.workdir.as_ref().map(PathBuf::from),
            max_output_bytes: cfg.max_output_bytes,
        }
    }

    async fn run_shell(&self, command: &str) -> CoreResult<String> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        tracing::debug!(command, "spawning shell command");
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                BridgeError::Execution(format!(
                    "command timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })??;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }
        let combined = truncate_bytes(combined.trim_end(), self.max_output_bytes);

        if output.status.success() {
            Ok(combined)
        } else {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            Err(BridgeError::Execution(format!("exit status {code}: {combined}")))
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match &self.workdir {
            Some(dir) if Path::new(path).is_relative() => dir.join(path),
            _ => PathBuf::from(path),
        }
    }

    async fn read_file(&self, path: &str) -> CoreResult<String> {
        let bytes = tokio::fs::read(self.resolve(path)).await?;
        Ok(truncate_bytes(&String::from_utf8_lossy(&bytes), self.max_output_bytes))
    }

    async fn write_file(&self, path: &str, content: &str) -> CoreResult<String> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        Ok(format!("wrote {} bytes to {}", content.len(), target.display()))
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn execute(&self, tool: &str, input: &Map<String, Value>) -> CoreResult<String> {
        if !self.enabled {
            return Err(BridgeError::Execution("tool execution is disabled".into()));
        }
        match tool {
            "bash" | "shell" => self.run_shell(required_str(input, "command")?).await,
            "read_file" => self.read_file(required_str(input, "path")?).await,
            "write_file" => {
                let path = required_str(input, "path")?;
                let content = input.get("content").and_then(Value::as_str).unwrap_or("");
                self.write_file(path, content).await
            }
            other => Err(BridgeError::Validation(format!("unknown tool '{other}'"))),
        }
    }
}

fn required_str<'a>(input: &'a Map<String, Value>, key: &str) -> CoreResult<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| BridgeError::Validation(format!("missing '{key}' argument")))
}

/// Cut `s` to at most `max` bytes on a char boundary, marking the cut.
fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[output truncated]", &s[..end])
}
