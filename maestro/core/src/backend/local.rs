//! Local Model Runtime Backend
//!
//! Adapter for locally hosted model runtimes speaking the Ollama generate
//! API. Registered under the `model_app` component type.
//!
//! # Config keys
//!
//! - `host` (default `localhost`)
//! - `port` (default `11434`)
//! - `gpu` (default true, local runtimes are the GPU-backed path)
//!
//! Local inference is billed at zero marginal cost, so the default cost
//! estimate of the handle contract already fits.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::traits::{BackendError, BackendHandle, CompletionRequest, CompletionResponse};
use crate::registry::RegistryError;
use crate::strategy::ComponentSpec;

/// Client for an Ollama-style local runtime
#[derive(Clone, Debug)]
pub struct ModelAppBackend {
    host: String,
    port: u16,
    gpu: bool,
    http_client: reqwest::Client,
}

impl ModelAppBackend {
    /// Create a backend for the given host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            gpu: true,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Construct from a component spec
    pub fn from_spec(spec: &ComponentSpec) -> Result<Self, RegistryError> {
        let host = spec.get_str("host").unwrap_or("localhost").to_string();
        let port = match spec.get_u64("port") {
            Some(p) => {
                u16::try_from(p).map_err(|_| RegistryError::InvalidComponentConfig {
                    type_name: spec.type_name.clone(),
                    reason: format!("port {p} out of range"),
                })?
            }
            None => 11434,
        };

        let mut backend = Self::new(host, port);
        backend.gpu = spec.get_bool("gpu").unwrap_or(true);
        Ok(backend)
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url())
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Build the full prompt including the system preamble
    fn build_prompt(request: &CompletionRequest) -> String {
        let mut full_prompt = String::new();
        if let Some(ref system) = request.options.system_prompt {
            full_prompt.push_str(system);
            full_prompt.push_str("\n\n");
        }
        full_prompt.push_str(&request.query_text);
        full_prompt
    }
}

#[async_trait]
impl BackendHandle for ModelAppBackend {
    fn kind(&self) -> &str {
        "model_app"
    }

    async fn invoke(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        let start = Instant::now();

        let mut body = serde_json::json!({
            "model": model,
            "prompt": Self::build_prompt(request),
            "stream": false,
        });

        let mut options = serde_json::Map::new();
        if let Some(temperature) = request.options.temperature {
            options.insert("temperature".to_string(), serde_json::json!(temperature));
        }
        if let Some(max_tokens) = request.options.max_tokens {
            options.insert("num_predict".to_string(), serde_json::json!(max_tokens));
        }
        if !options.is_empty() {
            body["options"] = serde_json::Value::Object(options);
        }

        let response = self
            .http_client
            .post(self.generate_url())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(if status == 404 {
                BackendError::UnknownModel(model.to_string())
            } else {
                BackendError::Http {
                    status,
                    message: text,
                }
            });
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidRequest(format!("unparseable response: {e}")))?;

        let content = payload
            .get("response")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                BackendError::InvalidRequest("response carried no completion text".to_string())
            })?
            .to_string();

        let tokens_used = payload
            .get("eval_count")
            .and_then(serde_json::Value::as_u64)
            .map(|t| t as u32);

        Ok(CompletionResponse {
            content,
            model: model.to_string(),
            tokens_used,
            duration_ms: Some(start.elapsed().as_millis() as u64),
        })
    }

    fn gpu_capable(&self) -> bool {
        self.gpu
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }
}
