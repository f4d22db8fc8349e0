//! Agent configuration

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::generation::Templates;
use crate::value_objects::DEFAULT_DOMAIN;

/// Settings shared by every session of an [`Agent`](crate::session::Agent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Hand unmatched turns to a language model instead of refusing them
    pub use_model_delegation: bool,
    /// Domain stamped on messages that arrive without one
    pub default_domain: String,
    /// Earlier messages carried by a delegation
    pub history_window: usize,
    /// Reply when a message is filtered out or cannot be understood
    pub refusal_message: String,
    /// Replacement for a response the output filter rejects
    pub output_refusal_message: String,
    pub templates: Templates,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            use_model_delegation: false,
            default_domain: DEFAULT_DOMAIN.to_string(),
            history_window: 10,
            refusal_message: "Não posso responder essa sua mensagem".to_string(),
            output_refusal_message: "Opa, não posso responder essa mensagem".to_string(),
            templates: Templates::default(),
        }
    }
}

impl AgentConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid agent configuration")
    }

    /// Read a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading agent configuration {}", path.display()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("parsing agent configuration {}", path.display()))
    }

    pub fn with_model_delegation(mut self, enabled: bool) -> Self {
        self.use_model_delegation = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = AgentConfig::from_json_str(
            r#"{"use_model_delegation": true, "templates": {"farewell": "Tchau!"}}"#,
        )
        .unwrap();

        assert!(config.use_model_delegation);
        assert_eq!(config.history_window, 10);
        assert_eq!(config.default_domain, "transacional");
        assert_eq!(config.templates.farewell, "Tchau!");
        assert_eq!(config.templates.greeting, Templates::default().greeting);
    }

    #[test]
    fn test_load_reports_path() {
        let err = AgentConfig::load("/nonexistent/agent.json").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/agent.json"));
    }

    #[test]
    fn test_invalid_json() {
        assert!(AgentConfig::from_json_str("{\"history_window\": \"ten\"}").is_err());
    }
}
