//! Component Registry
//!
//! Maps component type names (`cloud_api`, `model_app`, `fine_tuner`,
//! `repository`, ...) to factories that construct runnable backend handles
//! from typed configuration. The registry knows nothing about strategies;
//! strategy validation consumes it during load.
//!
//! Registration happens once at process startup per supported backend
//! family. Re-registering a type name overwrites the previous factory so
//! tests can install doubles.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::backend::BackendHandle;
use crate::strategy::ComponentSpec;

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced when constructing backend handles
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The spec names a type no factory was registered for
    #[error("unknown component type: {0}")]
    UnknownComponentType(String),

    /// The factory rejected the spec's config map
    #[error("invalid config for component type {type_name}: {reason}")]
    InvalidComponentConfig {
        /// Component type whose factory rejected the config
        type_name: String,
        /// Factory-provided explanation
        reason: String,
    },
}

// ============================================================================
// Factory
// ============================================================================

/// Constructs a backend handle from a component spec
///
/// Factories own config validation; the core never inspects the opaque
/// config map itself.
pub trait ComponentFactory: Send + Sync {
    /// Build a handle, or reject the spec's config
    fn create(&self, spec: &ComponentSpec) -> Result<Arc<dyn BackendHandle>, RegistryError>;
}

impl<F> ComponentFactory for F
where
    F: Fn(&ComponentSpec) -> Result<Arc<dyn BackendHandle>, RegistryError> + Send + Sync,
{
    fn create(&self, spec: &ComponentSpec) -> Result<Arc<dyn BackendHandle>, RegistryError> {
        self(spec)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry of component type factories
pub struct ComponentRegistry {
    factories: RwLock<HashMap<String, Arc<dyn ComponentFactory>>>,
}

impl ComponentRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register a factory for a component type
    ///
    /// Overwrites any existing registration for the same name.
    pub fn register(
        &self,
        type_name: impl Into<String>,
        factory: impl ComponentFactory + 'static,
    ) {
        let type_name = type_name.into();
        let mut factories = self.factories.write();
        if factories
            .insert(type_name.clone(), Arc::new(factory))
            .is_some()
        {
            tracing::warn!(component_type = %type_name, "Overwriting registered component factory");
        } else {
            tracing::debug!(component_type = %type_name, "Registered component factory");
        }
    }

    /// Construct a backend handle for the given spec
    pub fn create(&self, spec: &ComponentSpec) -> Result<Arc<dyn BackendHandle>, RegistryError> {
        let factory = {
            let factories = self.factories.read();
            factories
                .get(&spec.type_name)
                .cloned()
                .ok_or_else(|| RegistryError::UnknownComponentType(spec.type_name.clone()))?
        };
        factory.create(spec)
    }

    /// Whether a factory is registered for the given type name
    #[must_use]
    pub fn is_registered(&self, type_name: &str) -> bool {
        self.factories.read().contains_key(type_name)
    }

    /// Registered type names, unordered
    #[must_use]
    pub fn type_names(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, CompletionRequest, CompletionResponse};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct NullBackend;

    #[async_trait]
    impl BackendHandle for NullBackend {
        fn kind(&self) -> &str {
            "null"
        }

        async fn invoke(
            &self,
            model: &str,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, BackendError> {
            Ok(CompletionResponse {
                content: String::new(),
                model: model.to_string(),
                tokens_used: None,
                duration_ms: None,
            })
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let registry = ComponentRegistry::new();
        let spec = ComponentSpec::new("missing");

        let err = registry.create(&spec).unwrap_err();
        assert_eq!(
            err,
            RegistryError::UnknownComponentType("missing".to_string())
        );
    }

    fn null_factory(
        _spec: &ComponentSpec,
    ) -> Result<Arc<dyn BackendHandle>, RegistryError> {
        Ok(Arc::new(NullBackend) as Arc<dyn BackendHandle>)
    }

    #[test]
    fn test_register_and_create() {
        let registry = ComponentRegistry::new();
        registry.register("null", null_factory);

        assert!(registry.is_registered("null"));
        let handle = registry.create(&ComponentSpec::new("null")).unwrap();
        assert_eq!(handle.kind(), "null");
    }

    #[test]
    fn test_reregistration_overwrites() {
        let registry = ComponentRegistry::new();
        registry.register(
            "null",
            |_spec: &ComponentSpec| -> Result<Arc<dyn BackendHandle>, RegistryError> {
                Err(RegistryError::InvalidComponentConfig {
                    type_name: "null".to_string(),
                    reason: "first factory".to_string(),
                })
            },
        );
        registry.register("null", null_factory);

        assert!(registry.create(&ComponentSpec::new("null")).is_ok());
        assert_eq!(registry.type_names(), vec!["null".to_string()]);
    }

    #[test]
    fn test_factory_config_rejection() {
        let registry = ComponentRegistry::new();
        registry.register(
            "picky",
            |spec: &ComponentSpec| -> Result<Arc<dyn BackendHandle>, RegistryError> {
                spec.get_str("endpoint")
                    .map(|_| Arc::new(NullBackend) as Arc<dyn BackendHandle>)
                    .ok_or_else(|| RegistryError::InvalidComponentConfig {
                        type_name: "picky".to_string(),
                        reason: "missing endpoint".to_string(),
                    })
            },
        );

        let bare = ComponentSpec::new("picky");
        assert!(matches!(
            registry.create(&bare),
            Err(RegistryError::InvalidComponentConfig { .. })
        ));

        let configured = ComponentSpec::new("picky").with_value("endpoint", "http://localhost");
        assert!(registry.create(&configured).is_ok());
    }
}
