//! Backend Capability Contract
//!
//! Trait definitions for completion backends. This abstraction lets the
//! dispatcher work with heterogeneous providers (cloud APIs, local model
//! runtimes, host-registered engines) without changing routing logic.
//!
//! # Error Classification
//!
//! Every [`BackendError`] is classifiable as [`ErrorClass::Transient`]
//! (timeout, rate limit, connection failure) or [`ErrorClass::Permanent`]
//! (unknown model, rejected auth, malformed request). The classification
//! drives fallback continuation: both classes advance the plan, but the
//! distinction is preserved in the attempt trace so callers can tell a
//! degraded fleet from a misconfigured one.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Requests
// ============================================================================

/// Generation options carried by a request
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    /// Sampling temperature (provider default when absent)
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,

    /// System prompt prepended to the conversation
    pub system_prompt: Option<String>,

    /// Session identifier for log correlation
    pub session_id: Option<String>,

    /// Whole-request deadline in milliseconds
    pub timeout_ms: Option<u64>,
}

/// A completion request as seen by the routing engine
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionRequest {
    /// Unique request ID
    pub request_id: String,

    /// The prompt text to complete
    pub query_text: String,

    /// Free-form metadata tags consulted by routing rules
    /// (e.g. `domain=code`, `user_role=admin`)
    pub context: HashMap<String, String>,

    /// Generation options
    pub options: GenerationOptions,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            query_text: String::new(),
            context: HashMap::new(),
            options: GenerationOptions::default(),
        }
    }
}

impl CompletionRequest {
    /// Create a new request for the given prompt text
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            ..Default::default()
        }
    }

    /// Attach a context tag
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Set the sampling temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    /// Set the generation token cap
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.max_tokens = Some(max_tokens);
        self
    }

    /// Set the system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.options.system_prompt = Some(system.into());
        self
    }

    /// Set the session identifier
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.options.session_id = Some(session_id.into());
        self
    }

    /// Set the whole-request deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Whole-request deadline, if one was set
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.options.timeout_ms.map(Duration::from_millis)
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Response from a completion backend
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The response text
    pub content: String,

    /// Model that generated the response
    pub model: String,

    /// Tokens consumed, when the provider reports them
    pub tokens_used: Option<u32>,

    /// Generation time in milliseconds
    pub duration_ms: Option<u64>,
}

// ============================================================================
// Errors
// ============================================================================

/// Retry eligibility of a backend error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry-eligible on a different hop (timeout, rate limit, flaky link)
    Transient,
    /// Not retry-eligible against the same target (bad model, bad auth)
    Permanent,
}

/// Errors produced by backend invocations
#[derive(Debug, Error)]
pub enum BackendError {
    /// Invocation exceeded its time budget
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Provider rejected the request for rate or quota reasons
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Transport-level failure reaching the backend
    #[error("connection failed: {0}")]
    Connection(String),

    /// Backend returned a non-success HTTP status
    #[error("backend returned {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body or status text
        message: String,
    },

    /// Requested model is not served by this backend
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Credentials missing or rejected
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Request malformed for this backend
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl BackendError {
    /// Classify this error for fallback continuation
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) | Self::RateLimited(_) | Self::Connection(_) => ErrorClass::Transient,
            Self::Http { status, .. } => {
                if *status == 429 || *status >= 500 {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
            Self::UnknownModel(_) | Self::Auth(_) | Self::InvalidRequest(_) => {
                ErrorClass::Permanent
            }
        }
    }

    /// Whether a different hop may still succeed quickly
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured budget here
            Self::Timeout(0)
        } else {
            Self::Connection(err.to_string())
        }
    }
}

// ============================================================================
// Backend Handle
// ============================================================================

/// A runnable backend constructed from a component spec
///
/// Implementations handle provider-specific details (wire formats, auth).
/// The dispatcher only sees this contract.
#[async_trait]
pub trait BackendHandle: Send + Sync + std::fmt::Debug {
    /// Component type name this handle was built from (e.g. `cloud_api`)
    fn kind(&self) -> &str;

    /// Execute a completion request against the given model
    async fn invoke(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BackendError>;

    /// Estimated cost of serving this request, in USD
    ///
    /// Consulted by the cost-ceiling constraint before the call is made.
    fn estimate_cost_usd(&self, model: &str, request: &CompletionRequest) -> f64 {
        let _ = (model, request);
        0.0
    }

    /// Whether this backend runs on GPU-capable hardware
    fn gpu_capable(&self) -> bool {
        false
    }

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = CompletionRequest::new("Hello")
            .with_temperature(0.5)
            .with_max_tokens(100)
            .with_system("You are helpful")
            .with_tag("domain", "greeting")
            .with_timeout(Duration::from_secs(30));

        assert_eq!(request.query_text, "Hello");
        assert_eq!(request.options.temperature, Some(0.5));
        assert_eq!(request.options.max_tokens, Some(100));
        assert_eq!(
            request.options.system_prompt,
            Some("You are helpful".to_string())
        );
        assert_eq!(request.context.get("domain"), Some(&"greeting".to_string()));
        assert_eq!(request.timeout(), Some(Duration::from_secs(30)));
        assert!(!request.request_id.is_empty());
    }

    #[test]
    fn test_temperature_clamped() {
        let request = CompletionRequest::new("x").with_temperature(9.0);
        assert_eq!(request.options.temperature, Some(2.0));
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(BackendError::Timeout(5000).class(), ErrorClass::Transient);
        assert_eq!(
            BackendError::RateLimited("slow down".into()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            BackendError::Connection("refused".into()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            BackendError::UnknownModel("nope".into()).class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            BackendError::Auth("bad key".into()).class(),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn test_http_status_classification() {
        let server_side = BackendError::Http {
            status: 503,
            message: "overloaded".into(),
        };
        assert!(server_side.is_transient());

        let throttled = BackendError::Http {
            status: 429,
            message: "quota".into(),
        };
        assert!(throttled.is_transient());

        let client_side = BackendError::Http {
            status: 404,
            message: "no such model".into(),
        };
        assert!(!client_side.is_transient());
    }
}
