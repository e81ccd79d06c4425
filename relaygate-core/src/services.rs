use std::sync::Arc;

use crate::config::Config;
use crate::error::CoreResult;
use crate::model_map::ModelMapper;
use crate::tools::{Executor, MarkupToolCallParser, ShellExecutor, ToolCallParser};
use crate::upstream::{HttpStreamSource, StreamSource};

/// Process-wide collaborators shared by every request.
/// Built once at startup and never mutated afterwards.
#[derive(Clone)]
pub struct Services {
    pub source: Arc<dyn StreamSource>,
    pub parser: Arc<dyn ToolCallParser>,
    pub executor: Arc<dyn Executor>,
    pub models: Arc<ModelMapper>,
}

impl Services {
    /// Wire the HTTP upstream, markup parser and shell executor from configuration.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let source = Arc::new(HttpStreamSource::from_config(cfg)?);
        let models = Arc::new(ModelMapper::new(&cfg.models)?);
        tracing::info!(
            upstream = %cfg.upstream_url(),
            executor_enabled = cfg.executor.enabled,
            rules = cfg.models.rules.len(),
            "services configured"
        );
        Ok(Self {
            source,
            parser: Arc::new(MarkupToolCallParser::new()),
            executor: Arc::new(ShellExecutor::new(&cfg.executor)),
            models,
        })
    }

    /// Same defaults as `from_config`, with a caller-supplied source.
    pub fn with_source(source: Arc<dyn StreamSource>, cfg: &Config) -> CoreResult<Self> {
        Ok(Self {
            source,
            parser: Arc::new(MarkupToolCallParser::new()),
            executor: Arc::new(ShellExecutor::new(&cfg.executor)),
            models: Arc::new(ModelMapper::new(&cfg.models)?),
        })
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelRule;
    use crate::upstream::ReplaySource;

    #[test]
    fn builds_from_default_config() {
        let services = Services::from_config(&Config::default()).unwrap();
        assert_eq!(services.source.name(), "http");
        assert_eq!(services.models.map("gpt-4o"), "openai/gpt-5-nano");
    }

    #[test]
    fn bad_model_rule_fails_startup() {
        let mut cfg = Config::default();
        cfg.models.rules.push(ModelRule {
            pattern: "[".into(),
            target: "x".into(),
        });
        assert!(Services::from_config(&cfg).is_err());
    }

    #[test]
    fn custom_source_is_kept() {
        let services =
            Services::with_source(Arc::new(ReplaySource::new(["x"])), &Config::default()).unwrap();
        assert_eq!(services.source.name(), "replay");
    }
}
