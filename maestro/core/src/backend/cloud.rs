//! Cloud API Backend
//!
//! Adapter for OpenAI-compatible chat-completions endpoints. Registered
//! under the `cloud_api` component type.
//!
//! # Config keys
//!
//! - `base_url` (required): endpoint root, e.g. `https://api.openai.com`
//! - `api_key_env` (optional): environment variable holding the bearer key;
//!   the key itself never appears in strategy documents
//! - `gpu` (optional, default false): hardware capability flag
//! - `prompt_cost_per_1k` / `completion_cost_per_1k` (optional, USD):
//!   feed the cost estimate consulted by the spend ceiling

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::traits::{BackendError, BackendHandle, CompletionRequest, CompletionResponse};
use crate::registry::RegistryError;
use crate::strategy::ComponentSpec;

/// Assumed completion length when the request does not cap generation,
/// used only for cost estimation.
const DEFAULT_COMPLETION_TOKENS: u32 = 256;

/// OpenAI-compatible chat completions client
#[derive(Clone, Debug)]
pub struct CloudApiBackend {
    base_url: String,
    api_key: Option<String>,
    gpu: bool,
    prompt_cost_per_1k: f64,
    completion_cost_per_1k: f64,
    http_client: reqwest::Client,
}

impl CloudApiBackend {
    /// Create a backend for the given endpoint root
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            gpu: false,
            prompt_cost_per_1k: 0.0,
            completion_cost_per_1k: 0.0,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Set the bearer key
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Construct from a component spec
    ///
    /// Fails when `base_url` is missing or `api_key_env` names an unset
    /// environment variable, so bad credentials surface at load time.
    pub fn from_spec(spec: &ComponentSpec) -> Result<Self, RegistryError> {
        let base_url = spec.get_str("base_url").ok_or_else(|| {
            RegistryError::InvalidComponentConfig {
                type_name: spec.type_name.clone(),
                reason: "missing required key \"base_url\"".to_string(),
            }
        })?;

        let api_key = match spec.get_str("api_key_env") {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                RegistryError::InvalidComponentConfig {
                    type_name: spec.type_name.clone(),
                    reason: format!("environment variable \"{var}\" is not set"),
                }
            })?),
            None => None,
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            gpu: spec.get_bool("gpu").unwrap_or(false),
            prompt_cost_per_1k: spec.get_f64("prompt_cost_per_1k").unwrap_or(0.0),
            completion_cost_per_1k: spec.get_f64("completion_cost_per_1k").unwrap_or(0.0),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn build_body(&self, model: &str, request: &CompletionRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(ref system) = request.options.system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": request.query_text}));

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
        });

        if let Some(temperature) = request.options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = request.options.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(ref session) = request.options.session_id {
            body["user"] = serde_json::json!(session);
        }

        body
    }

    fn map_status(status: u16, model: &str, body: String) -> BackendError {
        match status {
            401 | 403 => BackendError::Auth(body),
            404 => BackendError::UnknownModel(model.to_string()),
            429 => BackendError::RateLimited(body),
            _ => BackendError::Http {
                status,
                message: body,
            },
        }
    }
}

#[async_trait]
impl BackendHandle for CloudApiBackend {
    fn kind(&self) -> &str {
        "cloud_api"
    }

    async fn invoke(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        let start = Instant::now();
        let body = self.build_body(model, request);

        let mut http_request = self.http_client.post(self.completions_url()).json(&body);
        if let Some(ref key) = self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, model, text));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidRequest(format!("unparseable response: {e}")))?;

        let content = payload
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.pointer("/message/content"))
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                BackendError::InvalidRequest("response carried no message content".to_string())
            })?
            .to_string();

        let tokens_used = payload
            .pointer("/usage/total_tokens")
            .and_then(serde_json::Value::as_u64)
            .map(|t| t as u32);

        Ok(CompletionResponse {
            content,
            model: model.to_string(),
            tokens_used,
            duration_ms: Some(start.elapsed().as_millis() as u64),
        })
    }

    fn estimate_cost_usd(&self, _model: &str, request: &CompletionRequest) -> f64 {
        // chars/4 is close enough for budget gating
        let prompt_tokens = (request.query_text.len()
            + request
                .options
                .system_prompt
                .as_deref()
                .map_or(0, str::len))
            / 4;
        let completion_tokens = request
            .options
            .max_tokens
            .unwrap_or(DEFAULT_COMPLETION_TOKENS);

        (prompt_tokens as f64 / 1000.0) * self.prompt_cost_per_1k
            + (f64::from(completion_tokens) / 1000.0) * self.completion_cost_per_1k
    }

    fn gpu_capable(&self) -> bool {
        self.gpu
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(format!("{}/v1/models", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }
}
