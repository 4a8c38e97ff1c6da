//! Run configuration

use rlm_vm::{Error, Result, SandboxLimits};
use serde::{Deserialize, Serialize};

/// Fragment size the controller is told to use
pub const DEFAULT_CHUNK_SIZE: usize = 4000;

/// Configuration for one orchestrator
///
/// Models left as `None` fall back to the provider's default model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlmConfig {
    /// Model that writes the strategy program
    pub controller_model: Option<String>,
    /// Model that answers `ask_llm` calls
    pub worker_model: Option<String>,
    /// Fragment size in characters
    pub chunk_size: usize,
    pub controller_temperature: f32,
    pub worker_temperature: f32,
    pub controller_max_tokens: Option<usize>,
    pub worker_max_tokens: Option<usize>,
    pub limits: SandboxLimits,
}

impl Default for RlmConfig {
    fn default() -> Self {
        Self {
            controller_model: None,
            worker_model: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            controller_temperature: 0.1,
            worker_temperature: 0.0,
            controller_max_tokens: None,
            worker_max_tokens: None,
            limits: SandboxLimits::default(),
        }
    }
}

impl RlmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use one model for both roles
    pub fn with_model(self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.with_controller_model(model.clone()).with_worker_model(model)
    }

    pub fn with_controller_model(mut self, model: impl Into<String>) -> Self {
        self.controller_model = Some(model.into());
        self
    }

    pub fn with_worker_model(mut self, model: impl Into<String>) -> Self {
        self.worker_model = Some(model.into());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_controller_temperature(mut self, temperature: f32) -> Self {
        self.controller_temperature = temperature;
        self
    }

    pub fn with_worker_temperature(mut self, temperature: f32) -> Self {
        self.worker_temperature = temperature;
        self
    }

    pub fn with_limits(mut self, limits: SandboxLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::config_invalid("chunk size must be greater than zero")
                .with_context("field", "chunk_size"));
        }
        for (field, value) in [
            ("controller_temperature", self.controller_temperature),
            ("worker_temperature", self.worker_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(Error::config_invalid(format!("{} must be between 0 and 2", field))
                    .with_context("field", field)
                    .with_context("value", value.to_string()));
            }
        }
        for (field, model) in [
            ("controller_model", &self.controller_model),
            ("worker_model", &self.worker_model),
        ] {
            if model.as_deref().is_some_and(|m| m.trim().is_empty()) {
                return Err(Error::config_invalid(format!("{} must not be empty", field))
                    .with_context("field", field));
            }
        }
        self.limits.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlm_vm::ErrorKind;

    #[test]
    fn test_defaults() {
        let config = RlmConfig::default();
        assert_eq!(config.chunk_size, 4000);
        assert_eq!(config.worker_temperature, 0.0);
        assert_eq!(config.controller_temperature, 0.1);
        assert!(config.controller_model.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = RlmConfig::new()
            .with_model("qwen3:4b")
            .with_worker_model("smollm:1.7b")
            .with_chunk_size(2000);
        assert_eq!(config.controller_model.as_deref(), Some("qwen3:4b"));
        assert_eq!(config.worker_model.as_deref(), Some("smollm:1.7b"));
        assert_eq!(config.chunk_size, 2000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let err = RlmConfig::new().with_chunk_size(0).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(err.context_value("field"), Some("chunk_size"));

        let err = RlmConfig::new().with_worker_temperature(3.5).validate().unwrap_err();
        assert_eq!(err.context_value("field"), Some("worker_temperature"));

        assert!(RlmConfig::new().with_model(" ").validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: RlmConfig = serde_json::from_str(r#"{"chunk_size": 1000, "limits": {"max_steps": 10}}"#).unwrap();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.limits.max_steps, 10);
        assert_eq!(config.limits.max_delegations, SandboxLimits::default().max_delegations);
    }
}
