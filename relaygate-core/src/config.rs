use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerCfg {
    /// Socket address the HTTP server listens on.
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3010".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UpstreamCfg {
    #[serde(default = "default_upstream_base")]
    pub base_url: String,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    /// Name of the environment variable that contains the upstream API key, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Extra headers sent with every upstream request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for UpstreamCfg {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base(),
            chat_path: default_chat_path(),
            api_key_env: None,
            headers: BTreeMap::new(),
        }
    }
}

fn default_upstream_base() -> String {
    "http://127.0.0.1:8787".into()
}
fn default_chat_path() -> String {
    "/api/chat".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Whole-request timeout for buffered (non-streaming) calls (default 300000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Longest silence between two body reads (default 60000ms); the only
    /// timeout a streamed body is subject to once headers arrive
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    300_000
}
fn default_read_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ExecutorCfg {
    /// When false every execution fails with a "disabled" error.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_exec_timeout_ms")]
    pub timeout_ms: u64,
    /// Working directory for shell commands (None = process cwd).
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for ExecutorCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_exec_timeout_ms(),
            workdir: None,
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_exec_timeout_ms() -> u64 {
    30_000
}
fn default_max_output_bytes() -> usize {
    64 * 1024
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ModelRule {
    /// Regex applied to the lowercased client model name, e.g. `claude`
    pub pattern: String,
    /// Upstream model to use when this rule matches
    pub target: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ModelsCfg {
    #[serde(default = "default_model")]
    pub default: String,
    #[serde(default = "default_model_rules")]
    pub rules: Vec<ModelRule>,
}

impl Default for ModelsCfg {
    fn default() -> Self {
        Self {
            default: default_model(),
            rules: default_model_rules(),
        }
    }
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4.5".into()
}

fn default_model_rules() -> Vec<ModelRule> {
    [
        ("claude", "anthropic/claude-sonnet-4.5"),
        ("gpt", "openai/gpt-5-nano"),
        ("gemini", "google/gemini-2.5-flash"),
    ]
    .into_iter()
    .map(|(pattern, target)| ModelRule {
        pattern: pattern.into(),
        target: target.into(),
    })
    .collect()
}

/// Every section is optional; a missing section falls back to its defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerCfg,
    #[serde(default)]
    pub upstream: UpstreamCfg,
    /// HTTP client configuration (timeouts, pooling).
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub executor: ExecutorCfg,
    #[serde(default)]
    pub models: ModelsCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::BridgeError::from)?;
        let s =
            std::str::from_utf8(&bytes).map_err(|e| crate::error::BridgeError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::BridgeError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::BridgeError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::BridgeError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::BridgeError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }

    /// Full upstream chat URL.
    pub fn upstream_url(&self) -> String {
        format!(
            "{}{}",
            self.upstream.base_url.trim_end_matches('/'),
            self.upstream.chat_path
        )
    }
}
