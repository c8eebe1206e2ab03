//! Completion Backends
//!
//! The capability contract every backend implements, plus the built-in
//! adapters shipped with the engine:
//!
//! - [`CloudApiBackend`] (`cloud_api`): OpenAI-compatible chat completions
//! - [`ModelAppBackend`] (`model_app`): Ollama-style local runtime
//!
//! `fine_tuner` and `repository` are valid component types owned by host
//! processes that embed the engine; register factories for them next to
//! [`register_builtin_components`].

pub mod cloud;
pub mod local;
pub mod traits;

pub use cloud::CloudApiBackend;
pub use local::ModelAppBackend;
pub use traits::{
    BackendError, BackendHandle, CompletionRequest, CompletionResponse, ErrorClass,
    GenerationOptions,
};

use std::sync::Arc;

use crate::registry::ComponentRegistry;
use crate::strategy::ComponentSpec;

/// Register the built-in component factories
///
/// Invoked once at process startup, before strategies are loaded.
pub fn register_builtin_components(registry: &ComponentRegistry) {
    registry.register("cloud_api", |spec: &ComponentSpec| {
        CloudApiBackend::from_spec(spec).map(|b| Arc::new(b) as Arc<dyn BackendHandle>)
    });
    registry.register("model_app", |spec: &ComponentSpec| {
        ModelAppBackend::from_spec(spec).map(|b| Arc::new(b) as Arc<dyn BackendHandle>)
    });
}
