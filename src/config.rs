//! Exhaustive, statically-typed configuration (§6, §9).
//!
//! The host project this crate's conventions are drawn from reaches for a
//! dynamic, duck-typed config layer (`prefer`/`prefer_db`). That pattern is
//! explicitly redesigned here: every recognized option is a named, typed
//! field, unknown keys are rejected at load time, and there is no runtime
//! schema negotiation.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::ModelTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueuePolicy {
    Block,
    Reject,
    BlockWithTimeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    #[serde(default = "default_enqueue_policy")]
    pub enqueue_policy: EnqueuePolicy,
    #[serde(default)]
    pub enqueue_timeout_ms: Option<u64>,
    pub rate_limit_per_minute: u32,
    pub model_runtime_url: String,
    pub default_model_tier: ModelTier,
    pub tier_models: HashMap<String, String>,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub cache_max_entries: usize,
    pub cache_max_bytes: usize,
    pub cache_default_ttl_seconds: u64,
    pub health_probe_interval_ms: u64,
    pub health_failure_threshold: u32,
    pub max_document_bytes: usize,
    pub ocr_fallback_threshold_chars_per_page: usize,
    pub prompt_template_version: String,
    pub metrics_window_samples: usize,
}

fn default_enqueue_policy() -> EnqueuePolicy {
    EnqueuePolicy::Block
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut tier_models = HashMap::new();
        tier_models.insert("small".to_string(), "llama3.2:1b".to_string());
        tier_models.insert("balanced".to_string(), "llama3.1:8b".to_string());
        tier_models.insert("large".to_string(), "llama3.1:70b".to_string());

        Self {
            workers: 4,
            queue_capacity: 256,
            enqueue_policy: EnqueuePolicy::Block,
            enqueue_timeout_ms: None,
            rate_limit_per_minute: 60,
            model_runtime_url: "http://127.0.0.1:11434".to_string(),
            default_model_tier: ModelTier::Balanced,
            tier_models,
            request_timeout_ms: 30_000,
            max_retries: 3,
            retry_base_delay_ms: 250,
            retry_max_delay_ms: 10_000,
            cache_max_entries: 10_000,
            cache_max_bytes: 256 * 1024 * 1024,
            cache_default_ttl_seconds: 3600,
            health_probe_interval_ms: 5_000,
            health_failure_threshold: 3,
            max_document_bytes: 50 * 1024 * 1024,
            ocr_fallback_threshold_chars_per_page: 40,
            prompt_template_version: "1.0.0".to_string(),
            metrics_window_samples: 1_000,
        }
    }
}

impl PipelineConfig {
    /// Load and validate a config file, rejecting unknown keys and invalid values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: PipelineConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be positive".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_ms must be positive".into(),
            ));
        }
        if self.retry_base_delay_ms == 0 || self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(ConfigError::Invalid(
                "retry_base_delay_ms must be positive and <= retry_max_delay_ms".into(),
            ));
        }
        if url::Url::parse(&self.model_runtime_url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "model_runtime_url is not an absolute URL: {}",
                self.model_runtime_url
            )));
        }
        for tier in ["small", "balanced", "large"] {
            if !self.tier_models.contains_key(tier) {
                return Err(ConfigError::Invalid(format!(
                    "tier_models is missing an entry for tier {tier}"
                )));
            }
        }
        Ok(())
    }

    pub fn model_for_tier(&self, tier: ModelTier) -> &str {
        self.tier_models
            .get(tier.as_str())
            .map(|s| s.as_str())
            .unwrap_or("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_unknown_fields() {
        let toml_str = r#"
            workers = 4
            queue_capacity = 10
            rate_limit_per_minute = 60
            model_runtime_url = "http://localhost:11434"
            default_model_tier = "balanced"
            tier_models = {}
            request_timeout_ms = 1000
            max_retries = 3
            retry_base_delay_ms = 100
            retry_max_delay_ms = 1000
            cache_max_entries = 10
            cache_max_bytes = 1000
            cache_default_ttl_seconds = 60
            health_probe_interval_ms = 1000
            health_failure_threshold = 3
            max_document_bytes = 1000
            ocr_fallback_threshold_chars_per_page = 40
            prompt_template_version = "1.0.0"
            metrics_window_samples = 100
            totally_unknown_option = true
        "#;
        let result: Result<PipelineConfig, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_zero_workers() {
        let mut config = PipelineConfig::default();
        config.workers = 0;
        assert!(config.validate().is_err());
    }
}
