//! Maestro Core - Strategy-Driven Inference Routing
//!
//! This crate routes completion requests across a heterogeneous set of
//! inference backends (cloud LLM APIs, locally hosted model runtimes,
//! host-registered engines) according to declarative strategies. A
//! strategy bundles components, ordered routing rules, an ordered fallback
//! chain, and resource constraints; the dispatcher walks the resulting
//! plan sequentially and returns the first success or an aggregated
//! failure carrying the full attempt trace.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     Front Ends                             │
//! │        CLI / API surface / embedding host process          │
//! └──────────────────────────┬─────────────────────────────────┘
//!                            │ execute(strategy, request)
//! ┌──────────────────────────┼─────────────────────────────────┐
//! │                    MAESTRO CORE                            │
//! │  ┌───────────────────────┴─────────────────────────────┐   │
//! │  │                   Dispatcher                        │   │
//! │  │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌────────┐  │   │
//! │  │  │ Strategy │ │  Rules + │ │Conditions│ │  Cost  │  │   │
//! │  │  │ Snapshot │ │ Fallback │ │          │ │ Ledger │  │   │
//! │  │  └──────────┘ └──────────┘ └──────────┘ └────────┘  │   │
//! │  └──────────────────────┬──────────────────────────────┘   │
//! │                         │                                  │
//! │  ┌──────────────────────┴──────────────────────────────┐   │
//! │  │          Backend handles (via the registry)         │   │
//! │  │     cloud_api  │  model_app  │  host-registered     │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Dispatcher`]: the per-request orchestrator
//! - [`Strategy`] / [`StrategyManager`] / [`StrategyStore`]: the
//!   declarative model, its validated snapshot, and the hot-reload handle
//! - [`ComponentRegistry`]: component type name to backend factory
//! - [`BackendHandle`]: the capability contract adapters implement
//! - [`ExecutionAttempt`]: one row of the per-request attempt trace
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use maestro_core::{
//!     backend::register_builtin_components,
//!     config::load_strategies,
//!     CompletionRequest, ComponentRegistry, Dispatcher, StrategyManager, StrategyStore,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = ComponentRegistry::new();
//!     register_builtin_components(&registry);
//!
//!     let docs = load_strategies("strategies.toml".as_ref()).unwrap();
//!     let (manager, errors) = StrategyManager::load(docs, &registry);
//!     for error in &errors {
//!         eprintln!("{error}");
//!     }
//!
//!     let dispatcher = Dispatcher::new(Arc::new(StrategyStore::new(manager)));
//!     let result = dispatcher
//!         .execute("dev-primary", CompletionRequest::new("write a haiku"))
//!         .await
//!         .unwrap();
//!     println!("{}", result.response.content);
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`strategy`]: the declarative model, validation, snapshots
//! - [`registry`]: component type factories
//! - [`backend`]: the handle contract and built-in adapters
//! - [`routing`]: rules, conditions, constraints, planning, dispatch
//! - [`config`]: TOML strategy documents
//!
//! # Concurrency
//!
//! Requests execute concurrently with no shared mutable state beyond the
//! immutable strategy snapshot (safe for unsynchronized reads), the
//! condition flags, and the atomic cost ledger. Hops within a single
//! request run strictly sequentially.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod registry;
pub mod routing;
pub mod strategy;

// Re-exports for convenience
pub use backend::{
    register_builtin_components, BackendError, BackendHandle, CloudApiBackend, CompletionRequest,
    CompletionResponse, ErrorClass, GenerationOptions, ModelAppBackend,
};
pub use config::{default_strategies_path, load_strategies, load_strategies_str, ConfigError};
pub use registry::{ComponentFactory, ComponentRegistry, RegistryError};
pub use routing::{
    AttemptOutcome, ConditionRegistry, ConstraintEvaluator, ConstraintViolation, CostLedger,
    DispatchError, DispatchResponse, Dispatched, Dispatcher, ExecutionAttempt, ExecutionPlan,
    ExecutionTrace, FallbackPlanner, PlannedHop,
};
pub use strategy::{
    ComponentSpec, ConstraintSet, FallbackHop, LoadedStrategy, RoutingRule, RouteTarget,
    RulePattern, Strategy, StrategyManager, StrategyStore, StrategySummary, ValidationError,
};
