use regex::Regex;

use crate::config::{ModelRule, ModelsCfg};
use crate::error::{BridgeError, CoreResult};

/// Compiled mapping rule
#[derive(Debug)]
struct CompiledRule {
    regex: Regex,
    target: String,
}

/// Maps a client model name to the upstream model identifier.
#[derive(Debug)]
pub struct ModelMapper {
    rules: Vec<CompiledRule>,
    default_model: String,
}

impl ModelMapper {
    /// Build a mapper by compiling regexes from config.
    pub fn new(cfg: &ModelsCfg) -> CoreResult<Self> {
        let mut rules = Vec::new();
        for ModelRule { pattern, target } in &cfg.rules {
            let regex = Regex::new(&format!("(?i){pattern}")).map_err(|e| {
                BridgeError::Validation(format!("invalid model regex '{pattern}': {e}"))
            })?;
            rules.push(CompiledRule {
                regex,
                target: target.clone(),
            });
        }
        Ok(Self {
            rules,
            default_model: cfg.default.clone(),
        })
    }

    /// Lowercase `model`; names already in `vendor/model` form pass through,
    /// otherwise the first matching rule wins, else the default.
    pub fn map(&self, model: &str) -> String {
        let model = model.trim().to_lowercase();
        if model.contains('/') {
            return model;
        }
        self.rules
            .iter()
            .find(|r| r.regex.is_match(&model))
            .map_or_else(|| self.default_model.clone(), |r| r.target.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper(rules: &[(&str, &str)], default: &str) -> ModelMapper {
        ModelMapper::new(&ModelsCfg {
            default: default.into(),
            rules: rules
                .iter()
                .map(|(p, t)| ModelRule {
                    pattern: (*p).into(),
                    target: (*t).into(),
                })
                .collect(),
        })
        .unwrap()
    }

    #[test]
    fn builtin_rules() {
        let m = ModelMapper::new(&ModelsCfg::default()).unwrap();
        assert_eq!(m.map("claude-3-5-sonnet-20241022"), "anthropic/claude-sonnet-4.5");
        assert_eq!(m.map("GPT-4o"), "openai/gpt-5-nano");
        assert_eq!(m.map("gemini-pro"), "google/gemini-2.5-flash");
        assert_eq!(m.map("llama-3"), "anthropic/claude-sonnet-4.5");
    }

    #[test]
    fn slash_names_pass_through_lowercased() {
        let m = ModelMapper::new(&ModelsCfg::default()).unwrap();
        assert_eq!(m.map("OpenAI/GPT-4.1"), "openai/gpt-4.1");
    }

    #[test]
    fn first_rule_wins() {
        let m = mapper(&[("^claude-3", "a/old"), ("claude", "a/new")], "d/x");
        assert_eq!(m.map("claude-3-haiku"), "a/old");
        assert_eq!(m.map("claude-opus-4"), "a/new");
        assert_eq!(m.map("mistral"), "d/x");
    }

    #[test]
    fn invalid_regex_errors() {
        let err = ModelMapper::new(&ModelsCfg {
            default: "x".into(),
            rules: vec![ModelRule {
                pattern: "(".into(),
                target: "y".into(),
            }],
        })
        .unwrap_err();
        match err {
            BridgeError::Validation(msg) => assert!(msg.contains("invalid model regex")),
            other => panic!("expected Validation error, got {:?}", other),
        }
    }
}
