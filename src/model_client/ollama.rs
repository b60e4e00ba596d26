//! Ollama-compatible transport: `/api/generate` + `/api/tags` over
//! `reqwest`, generalized from the teacher's `LlmClient::call_ollama`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{GenerateOptions, ModelInfo, ModelRuntime, RawGeneration};
use crate::error::ModelError;

pub struct OllamaRuntime {
    base_url: String,
    client: Client,
}

impl OllamaRuntime {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_ctx: u32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagsModel>,
}

#[derive(Debug, Deserialize)]
struct TagsModel {
    name: String,
}

#[async_trait]
impl ModelRuntime for OllamaRuntime {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<RawGeneration, ModelError> {
        let request = OllamaRequest {
            model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: options.temperature,
                num_ctx: options.num_ctx,
                num_predict: options.num_predict,
                stop: options.stop.clone(),
            },
        };

        let url = format!("{}/api/generate", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ModelError::Unreachable(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ModelError::Unavailable(format!("model not loaded: {model}")));
        }
        if !resp.status().is_success() {
            return Err(ModelError::Unreachable(format!("http {}", resp.status())));
        }

        let body: OllamaResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::OutputInvalid(e.to_string()))?;

        Ok(RawGeneration {
            text: body.response,
            tokens_in: body.prompt_eval_count,
            tokens_out: body.eval_count,
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ModelError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ModelError::Unreachable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ModelError::Unreachable(format!("http {}", resp.status())));
        }

        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::OutputInvalid(e.to_string()))?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| ModelInfo {
                name: m.name,
                loaded: true,
            })
            .collect())
    }
}
