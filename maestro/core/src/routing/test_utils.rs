//! Routing Test Utilities
//!
//! Mock infrastructure for exercising routing and fallback behavior
//! without real backend calls. The [`MockBackend`] scripts per-model
//! outcomes and records every invocation so tests can verify which models
//! were attempted and in what order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{BackendError, BackendHandle, CompletionRequest, CompletionResponse};
use crate::registry::{ComponentRegistry, RegistryError};
use crate::strategy::{ComponentSpec, Strategy};

/// Scripted result for one model
#[derive(Clone, Debug)]
pub enum MockOutcome {
    /// Return a successful completion
    Succeed {
        /// Response text
        content: String,
    },
    /// Fail with a retry-eligible error
    Transient {
        /// Error text
        message: String,
    },
    /// Fail with a non-retry-eligible error
    Permanent {
        /// Error text
        message: String,
    },
    /// Sleep, then succeed
    DelayThenSucceed {
        /// Sleep duration before responding
        delay_ms: u64,
        /// Response text
        content: String,
    },
}

/// Mock backend with scripted per-model outcomes
#[derive(Debug)]
pub struct MockBackend {
    gpu: bool,
    cost_per_call: f64,
    outcomes: Mutex<HashMap<String, MockOutcome>>,
    invocations: Mutex<Vec<String>>,
}

impl MockBackend {
    /// Create a mock where every model succeeds
    #[must_use]
    pub fn new() -> Self {
        Self {
            gpu: false,
            cost_per_call: 0.0,
            outcomes: Mutex::new(HashMap::new()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Set the hardware capability flag
    #[must_use]
    pub fn with_gpu(mut self, gpu: bool) -> Self {
        self.gpu = gpu;
        self
    }

    /// Set the per-call cost estimate
    #[must_use]
    pub fn with_cost(mut self, cost_per_call: f64) -> Self {
        self.cost_per_call = cost_per_call;
        self
    }

    /// Script the outcome for a model
    pub fn set_outcome(&self, model: impl Into<String>, outcome: MockOutcome) {
        self.outcomes.lock().unwrap().insert(model.into(), outcome);
    }

    /// How many times a model was invoked
    #[must_use]
    pub fn invocation_count(&self, model: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.as_str() == model)
            .count()
    }

    /// Every invoked model, in call order
    #[must_use]
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendHandle for MockBackend {
    fn kind(&self) -> &str {
        "mock"
    }

    async fn invoke(
        &self,
        model: &str,
        _request: &CompletionRequest,
    ) -> Result<CompletionResponse, BackendError> {
        self.invocations.lock().unwrap().push(model.to_string());

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .get(model)
            .cloned()
            .unwrap_or(MockOutcome::Succeed {
                content: format!("reply from {model}"),
            });

        match outcome {
            MockOutcome::Succeed { content } => Ok(CompletionResponse {
                content,
                model: model.to_string(),
                tokens_used: Some(10),
                duration_ms: Some(1),
            }),
            MockOutcome::Transient { message } => Err(BackendError::Connection(message)),
            MockOutcome::Permanent { message } => Err(BackendError::UnknownModel(message)),
            MockOutcome::DelayThenSucceed { delay_ms, content } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(CompletionResponse {
                    content,
                    model: model.to_string(),
                    tokens_used: Some(10),
                    duration_ms: Some(delay_ms),
                })
            }
        }
    }

    fn estimate_cost_usd(&self, _model: &str, _request: &CompletionRequest) -> f64 {
        self.cost_per_call
    }

    fn gpu_capable(&self) -> bool {
        self.gpu
    }
}

/// Registry whose `mock` component type always yields the given backend
#[must_use]
pub fn mock_registry(backend: Arc<MockBackend>) -> ComponentRegistry {
    let registry = ComponentRegistry::new();
    registry.register(
        "mock",
        move |_spec: &ComponentSpec| -> Result<Arc<dyn BackendHandle>, RegistryError> {
            Ok(backend.clone() as Arc<dyn BackendHandle>)
        },
    );
    registry
}

/// Strategy whose chain is the given (role, model) pairs, every role backed
/// by the `mock` component type
#[must_use]
pub fn mock_strategy(name: &str, hops: &[(&str, &str)]) -> Strategy {
    let mut strategy = Strategy::new(name);
    for (role, model) in hops {
        if !strategy.components.contains_key(*role) {
            strategy = strategy.with_component(*role, ComponentSpec::new("mock"));
        }
        strategy = strategy.with_hop(*role, *model);
    }
    strategy
}
