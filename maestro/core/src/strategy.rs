//! Strategy Model and Management
//!
//! A strategy is a named, versionable policy bundle: backend components,
//! ordered routing rules, an ordered fallback chain, and resource
//! constraints. Strategies are declarative data; the engine in
//! [`crate::routing`] interprets them.
//!
//! # Lifecycle
//!
//! Strategies load once at process start (or on an explicit reload signal)
//! into an immutable [`StrategyManager`] snapshot. A reload builds a wholly
//! new manager and swaps it into the [`StrategyStore`] atomically, so a
//! running dispatcher never observes a half-updated strategy. In-flight
//! requests keep the snapshot they started with.
//!
//! # Validation
//!
//! Structural problems (missing roles, unknown component types, empty
//! fallback chains, bad constraint values) are rejected at load time and
//! never reach the request path. One broken strategy does not prevent the
//! others from loading.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendHandle;
use crate::registry::{ComponentRegistry, RegistryError};

// ============================================================================
// Component Specs
// ============================================================================

/// Declarative description of one backend component
///
/// The `config` map is opaque to the core. The factory registered for
/// `type_name` validates it when the handle is constructed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Component type name, resolved through the registry
    #[serde(rename = "type")]
    pub type_name: String,

    /// Free-form configuration passed to the factory
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl ComponentSpec {
    /// Create a spec with an empty config map
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            config: serde_json::Map::new(),
        }
    }

    /// Add a config entry
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Fetch a string config entry
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(serde_json::Value::as_str)
    }

    /// Fetch a boolean config entry
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(serde_json::Value::as_bool)
    }

    /// Fetch an unsigned integer config entry
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(serde_json::Value::as_u64)
    }

    /// Fetch a float config entry
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.config.get(key).and_then(serde_json::Value::as_f64)
    }
}

// ============================================================================
// Routing Rules
// ============================================================================

/// Pattern half of a routing rule
///
/// Every pattern either matches a request or it does not; matching is a
/// pure function of the pattern and the request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RulePattern {
    /// Case-insensitive substring match against the query text
    Contains {
        /// Substring to look for
        needle: String,
    },

    /// Case-insensitive prefix match against the query text
    Prefix {
        /// Prefix to look for
        prefix: String,
    },

    /// Exact equality against a context tag
    ContextEquals {
        /// Tag key
        key: String,
        /// Required tag value
        value: String,
    },

    /// Context tag presence, regardless of value
    ContextHas {
        /// Tag key
        key: String,
    },

    /// Always matches (catch-all terminator)
    Any,
}

/// Target half of a routing rule
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteTarget {
    /// Component role to route to
    pub role: String,

    /// Model override; absent means the role's default model
    #[serde(default)]
    pub model: Option<String>,
}

/// One pattern-to-target mapping
///
/// Rules are evaluated in list order; the first match wins.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Matcher applied to the request
    pub pattern: RulePattern,

    /// Where matching requests go
    pub target: RouteTarget,
}

// ============================================================================
// Fallback Chain
// ============================================================================

/// One entry in a strategy's declared fallback chain
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FallbackHop {
    /// Component role to use
    pub role: String,

    /// Model identifier within that component
    pub model: String,

    /// Named preconditions that must all hold for this hop to be attempted
    #[serde(default)]
    pub conditions: Vec<String>,
}

// ============================================================================
// Constraints
// ============================================================================

/// Numeric and boolean limits checked before each hop attempt
///
/// Absent fields leave that dimension unconstrained.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintSet {
    /// Token budget per request (must be at least 1 when present)
    pub max_tokens_per_request: Option<u32>,

    /// Require GPU-capable backends
    pub requires_gpu: bool,

    /// Daily spend ceiling in USD
    pub max_daily_cost_usd: Option<f64>,

    /// Per-hop invoke time budget in milliseconds
    pub max_latency_ms: Option<u64>,
}

impl ConstraintSet {
    /// Whether every dimension is unconstrained
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.max_tokens_per_request.is_none()
            && !self.requires_gpu
            && self.max_daily_cost_usd.is_none()
            && self.max_latency_ms.is_none()
    }
}

// ============================================================================
// Strategy
// ============================================================================

/// A named policy bundle
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Strategy {
    /// Unique, stable identifier
    pub name: String,

    /// Human text, no behavior
    #[serde(default)]
    pub description: String,

    /// Logical role name to component spec
    #[serde(default)]
    pub components: HashMap<String, ComponentSpec>,

    /// Ordered routing rules, first match wins
    #[serde(default)]
    pub routing_rules: Vec<RoutingRule>,

    /// Ordered fallback chain, attempt order
    #[serde(default)]
    pub fallback_chain: Vec<FallbackHop>,

    /// Resource constraints
    #[serde(default)]
    pub constraints: ConstraintSet,
}

impl Strategy {
    /// Create an empty strategy with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            components: HashMap::new(),
            routing_rules: Vec::new(),
            fallback_chain: Vec::new(),
            constraints: ConstraintSet::default(),
        }
    }

    /// Add a component under a role name
    #[must_use]
    pub fn with_component(mut self, role: impl Into<String>, spec: ComponentSpec) -> Self {
        self.components.insert(role.into(), spec);
        self
    }

    /// Append a routing rule
    #[must_use]
    pub fn with_rule(mut self, pattern: RulePattern, target: RouteTarget) -> Self {
        self.routing_rules.push(RoutingRule { pattern, target });
        self
    }

    /// Append a fallback hop
    #[must_use]
    pub fn with_hop(mut self, role: impl Into<String>, model: impl Into<String>) -> Self {
        self.fallback_chain.push(FallbackHop {
            role: role.into(),
            model: model.into(),
            conditions: Vec::new(),
        });
        self
    }

    /// Append a fallback hop gated on named conditions
    #[must_use]
    pub fn with_conditional_hop(
        mut self,
        role: impl Into<String>,
        model: impl Into<String>,
        conditions: Vec<String>,
    ) -> Self {
        self.fallback_chain.push(FallbackHop {
            role: role.into(),
            model: model.into(),
            conditions,
        });
        self
    }

    /// Set the constraint set
    #[must_use]
    pub fn with_constraints(mut self, constraints: ConstraintSet) -> Self {
        self.constraints = constraints;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Structural problems that exclude a strategy at load time
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A rule target or fallback hop names a role missing from `components`
    #[error("strategy {strategy}: {referenced_by} references role \"{role}\" which is not declared in components")]
    MissingRole {
        /// Strategy being validated
        strategy: String,
        /// The missing role name
        role: String,
        /// Which part of the strategy referenced it
        referenced_by: &'static str,
    },

    /// A component names a type absent from the registry
    #[error("strategy {strategy}: component \"{role}\" has unknown type \"{type_name}\"")]
    UnknownComponentType {
        /// Strategy being validated
        strategy: String,
        /// Role whose spec failed
        role: String,
        /// The unregistered type name
        type_name: String,
    },

    /// A component factory rejected its config
    #[error("strategy {strategy}: component \"{role}\" rejected its config: {reason}")]
    InvalidComponentConfig {
        /// Strategy being validated
        strategy: String,
        /// Role whose spec failed
        role: String,
        /// Factory-provided explanation
        reason: String,
    },

    /// The fallback chain has no hops, so the strategy could never answer
    #[error("strategy {strategy}: empty fallback chain")]
    EmptyFallbackChain {
        /// Strategy being validated
        strategy: String,
    },

    /// A constraint field holds an unusable value
    #[error("strategy {strategy}: constraint {field}: {reason}")]
    InvalidConstraint {
        /// Strategy being validated
        strategy: String,
        /// Offending constraint field
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// A later document reused an already-loaded name
    #[error("duplicate strategy name: {0}")]
    DuplicateName(String),
}

fn validate_structure(strategy: &Strategy, errors: &mut Vec<ValidationError>) {
    if strategy.fallback_chain.is_empty() {
        errors.push(ValidationError::EmptyFallbackChain {
            strategy: strategy.name.clone(),
        });
    }

    for rule in &strategy.routing_rules {
        if !strategy.components.contains_key(&rule.target.role) {
            errors.push(ValidationError::MissingRole {
                strategy: strategy.name.clone(),
                role: rule.target.role.clone(),
                referenced_by: "routing rule",
            });
        }
    }

    for hop in &strategy.fallback_chain {
        if !strategy.components.contains_key(&hop.role) {
            errors.push(ValidationError::MissingRole {
                strategy: strategy.name.clone(),
                role: hop.role.clone(),
                referenced_by: "fallback hop",
            });
        }
    }

    if strategy.constraints.max_tokens_per_request == Some(0) {
        errors.push(ValidationError::InvalidConstraint {
            strategy: strategy.name.clone(),
            field: "max_tokens_per_request",
            reason: "must be at least 1".to_string(),
        });
    }

    if let Some(ceiling) = strategy.constraints.max_daily_cost_usd {
        if !ceiling.is_finite() || ceiling < 0.0 {
            errors.push(ValidationError::InvalidConstraint {
                strategy: strategy.name.clone(),
                field: "max_daily_cost_usd",
                reason: format!("must be a finite non-negative number, got {ceiling}"),
            });
        }
    }
}

// ============================================================================
// Loaded Strategies
// ============================================================================

/// A validated strategy with its backend handles already constructed
///
/// Handle construction happens at load time so configuration errors can
/// never surface on the request path.
pub struct LoadedStrategy {
    /// The declarative strategy
    pub strategy: Strategy,

    /// Role name to constructed handle
    handles: HashMap<String, Arc<dyn BackendHandle>>,
}

impl LoadedStrategy {
    /// Handle for a role, if the role is declared
    #[must_use]
    pub fn handle(&self, role: &str) -> Option<Arc<dyn BackendHandle>> {
        self.handles.get(role).cloned()
    }
}

/// Summary row for strategy listings
#[derive(Clone, Debug, Serialize)]
pub struct StrategySummary {
    /// Strategy name
    pub name: String,

    /// Human description
    pub description: String,

    /// Number of declared component roles
    pub role_count: usize,
}

// ============================================================================
// Strategy Manager
// ============================================================================

/// Immutable snapshot of the loaded strategy set
///
/// Safe for unsynchronized concurrent reads; never mutated after load.
pub struct StrategyManager {
    strategies: HashMap<String, Arc<LoadedStrategy>>,
}

impl StrategyManager {
    /// Create an empty manager
    #[must_use]
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Validate and load a set of strategy documents
    ///
    /// Every document is validated independently; failing documents are
    /// excluded and their errors reported, so a single bad strategy never
    /// prevents the others from loading.
    pub fn load(
        docs: Vec<Strategy>,
        registry: &ComponentRegistry,
    ) -> (Self, Vec<ValidationError>) {
        let mut strategies: HashMap<String, Arc<LoadedStrategy>> = HashMap::new();
        let mut errors = Vec::new();

        for strategy in docs {
            if strategies.contains_key(&strategy.name) {
                errors.push(ValidationError::DuplicateName(strategy.name.clone()));
                continue;
            }

            let mut doc_errors = Vec::new();
            validate_structure(&strategy, &mut doc_errors);

            let mut handles = HashMap::new();
            for (role, spec) in &strategy.components {
                match registry.create(spec) {
                    Ok(handle) => {
                        handles.insert(role.clone(), handle);
                    }
                    Err(RegistryError::UnknownComponentType(type_name)) => {
                        doc_errors.push(ValidationError::UnknownComponentType {
                            strategy: strategy.name.clone(),
                            role: role.clone(),
                            type_name,
                        });
                    }
                    Err(RegistryError::InvalidComponentConfig { reason, .. }) => {
                        doc_errors.push(ValidationError::InvalidComponentConfig {
                            strategy: strategy.name.clone(),
                            role: role.clone(),
                            reason,
                        });
                    }
                }
            }

            if doc_errors.is_empty() {
                tracing::info!(
                    strategy = %strategy.name,
                    roles = strategy.components.len(),
                    hops = strategy.fallback_chain.len(),
                    "Loaded strategy"
                );
                strategies.insert(
                    strategy.name.clone(),
                    Arc::new(LoadedStrategy { strategy, handles }),
                );
            } else {
                tracing::warn!(
                    strategy = %strategy.name,
                    errors = doc_errors.len(),
                    "Excluding invalid strategy"
                );
                errors.extend(doc_errors);
            }
        }

        (Self { strategies }, errors)
    }

    /// Look up a loaded strategy by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<LoadedStrategy>> {
        self.strategies.get(name).cloned()
    }

    /// Lazy view of strategy summaries
    pub fn list(&self) -> impl Iterator<Item = StrategySummary> + '_ {
        self.strategies.values().map(|loaded| StrategySummary {
            name: loaded.strategy.name.clone(),
            description: loaded.strategy.description.clone(),
            role_count: loaded.strategy.components.len(),
        })
    }

    /// Number of loaded strategies
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether no strategies loaded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

// ============================================================================
// Strategy Store
// ============================================================================

/// Shared handle to the current strategy snapshot
///
/// Hot reload builds a fresh [`StrategyManager`] and swaps it in here.
/// Readers clone the `Arc` once per request and keep that snapshot for the
/// request's lifetime, so a swap never tears an in-flight plan.
pub struct StrategyStore {
    current: RwLock<Arc<StrategyManager>>,
}

impl StrategyStore {
    /// Create a store around an initial snapshot
    #[must_use]
    pub fn new(manager: StrategyManager) -> Self {
        Self {
            current: RwLock::new(Arc::new(manager)),
        }
    }

    /// The current snapshot
    #[must_use]
    pub fn current(&self) -> Arc<StrategyManager> {
        self.current.read().clone()
    }

    /// Atomically replace the snapshot
    pub fn replace(&self, manager: StrategyManager) {
        let manager = Arc::new(manager);
        let count = manager.len();
        *self.current.write() = manager;
        tracing::info!(strategies = count, "Swapped strategy snapshot");
    }
}
