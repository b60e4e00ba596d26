//! Model Client (C3): single-endpoint client to the local LLM runtime.
//!
//! Transport is an Ollama-compatible `/api/generate` + `/api/tags` HTTP
//! surface behind a small `ModelRuntime` trait, generalized from a plain
//! HTTP client so a fake runtime can back integration tests without
//! network access.

mod backoff;
mod ollama;
mod schema;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use backoff::backoff_delay;
pub use ollama::OllamaRuntime;

use crate::error::ModelError;
use crate::model::ModelTier;

/// Response shape requested from the model.
#[derive(Debug, Clone)]
pub enum ResponseSchema {
    FreeForm,
    Structured(Value),
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub num_ctx: u32,
    pub num_predict: u32,
    pub stop: Vec<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            num_ctx: 4096,
            num_predict: 1024,
            stop: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawGeneration {
    pub text: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// Transport seam so the retry/repair logic in this module can be tested
/// against a fake runtime.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<RawGeneration, ModelError>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ModelError>;
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub loaded: bool,
}

pub struct ModelClientConfig {
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

/// Outcome of a single model invocation, ready to become an `AIResult`.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub raw_text: String,
    pub parsed: Value,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub latency: Duration,
}

/// Holds the runtime behind an `Arc` so the same instance can be shared with
/// the health gate's probe loop (which also needs an `Arc<R>`) without
/// requiring callers to pre-wrap it themselves.
pub struct ModelClient<R: ModelRuntime> {
    runtime: Arc<R>,
    config: ModelClientConfig,
}

impl<R: ModelRuntime> ModelClient<R> {
    pub fn new(runtime: R, config: ModelClientConfig) -> Self {
        Self {
            runtime: Arc::new(runtime),
            config,
        }
    }

    pub fn from_arc(runtime: Arc<R>, config: ModelClientConfig) -> Self {
        Self { runtime, config }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Sends `prompt` to `model`, retrying transient failures and attempting
    /// a single repair round-trip if structured parsing fails (§4.3).
    ///
    /// `timeout` is the per-request deadline chosen by the caller (the
    /// Performance Optimizer's `Decision.timeout`, §4.10) rather than the
    /// static `ModelClientConfig::request_timeout`, which only serves as a
    /// fallback for callers that have no adaptive timeout of their own.
    pub async fn generate(
        &self,
        model: &str,
        tier: ModelTier,
        prompt: &str,
        schema: &ResponseSchema,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, ModelError> {
        let _ = tier;
        let options = GenerateOptions::default();
        let started = Instant::now();

        let mut attempt = 0u32;
        let raw = loop {
            if cancel.is_cancelled() {
                return Err(ModelError::Unreachable("cancelled".to_string()));
            }

            let call = tokio::time::timeout(timeout, self.runtime.generate(model, prompt, &options))
                .await;

            let result = match call {
                Ok(inner) => inner,
                Err(_) => Err(ModelError::Timeout),
            };

            match result {
                Ok(raw) => break raw,
                Err(ModelError::Unavailable(reason)) => {
                    // Not retried: escalated to the health gate by the caller.
                    return Err(ModelError::Unavailable(reason));
                }
                Err(e @ (ModelError::Unreachable(_) | ModelError::Timeout)) => {
                    if attempt >= self.config.max_retries {
                        return Err(e);
                    }
                    let delay = backoff_delay(
                        attempt,
                        self.config.retry_base_delay,
                        self.config.retry_max_delay,
                    );
                    warn!(attempt, ?delay, error = %e, "retrying model call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let parsed = match schema {
            ResponseSchema::FreeForm => Value::String(raw.text.clone()),
            ResponseSchema::Structured(json_schema) => {
                match schema::extract_and_validate(&raw.text, json_schema) {
                    Ok(value) => value,
                    Err(_) => {
                        debug!("structured output invalid, attempting repair");
                        let repair_prompt = schema::repair_prompt(prompt, &raw.text);
                        let repaired = tokio::time::timeout(
                            timeout,
                            self.runtime.generate(model, &repair_prompt, &options),
                        )
                        .await
                        .map_err(|_| ModelError::Timeout)??;
                        schema::extract_and_validate(&repaired.text, json_schema).map_err(|e| {
                            ModelError::OutputInvalid(format!("repair attempt failed: {e}"))
                        })?
                    }
                }
            }
        };

        Ok(ModelResponse {
            raw_text: raw.text,
            parsed,
            tokens_in: raw.tokens_in,
            tokens_out: raw.tokens_out,
            latency: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyRuntime {
        calls: Arc<AtomicU32>,
        fail_first_n: u32,
    }

    #[async_trait]
    impl ModelRuntime for FlakyRuntime {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
            _options: &GenerateOptions,
        ) -> Result<RawGeneration, ModelError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                return Err(ModelError::Unreachable("connection refused".to_string()));
            }
            Ok(RawGeneration {
                text: "hello".to_string(),
                tokens_in: 10,
                tokens_out: 2,
            })
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>, ModelError> {
            Ok(vec![])
        }
    }

    fn test_config() -> ModelClientConfig {
        ModelClientConfig {
            request_timeout: Duration::from_millis(500),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let runtime = FlakyRuntime {
            calls: calls.clone(),
            fail_first_n: 2,
        };
        let client = ModelClient::new(runtime, test_config());
        let result = client
            .generate(
                "test-model",
                ModelTier::Balanced,
                "prompt",
                &ResponseSchema::FreeForm,
                Duration::from_millis(500),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.raw_text, "hello");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let runtime = FlakyRuntime {
            calls: calls.clone(),
            fail_first_n: 100,
        };
        let client = ModelClient::new(runtime, test_config());
        let err = client
            .generate(
                "test-model",
                ModelTier::Balanced,
                "prompt",
                &ResponseSchema::FreeForm,
                Duration::from_millis(500),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Unreachable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 4); // initial + 3 retries
    }

    #[tokio::test]
    async fn unavailable_is_not_retried() {
        struct AlwaysUnavailable;
        #[async_trait]
        impl ModelRuntime for AlwaysUnavailable {
            async fn generate(
                &self,
                _model: &str,
                _prompt: &str,
                _options: &GenerateOptions,
            ) -> Result<RawGeneration, ModelError> {
                Err(ModelError::Unavailable("model not loaded".to_string()))
            }
            async fn list_models(&self) -> Result<Vec<ModelInfo>, ModelError> {
                Ok(vec![])
            }
        }
        let client = ModelClient::new(AlwaysUnavailable, test_config());
        let err = client
            .generate(
                "test-model",
                ModelTier::Balanced,
                "prompt",
                &ResponseSchema::FreeForm,
                Duration::from_millis(500),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Unavailable(_)));
    }
}
