//! Strategy-Driven Request Routing
//!
//! The engine that turns a loaded strategy and an incoming request into a
//! served response or an aggregated failure.
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |    Dispatcher    |  <-- Entry point for all requests
//! +--------+---------+
//!          |
//!          v
//! +------------------+
//! |   rule matcher   |  <-- First matching rule picks the primary target
//! +--------+---------+
//!          |
//!          v
//! +------------------+
//! | fallback planner |  <-- Routed target + declared chain = execution plan
//! +--------+---------+
//!          |
//!          v
//! +------------------+
//! | conditions +     |  <-- Per-hop gating before any backend call
//! | constraints      |
//! +--------+---------+
//!          |
//!          v
//! +------------------+
//! | backend handles  |  <-- Sequential attempts, first success wins
//! +------------------+
//! ```
//!
//! # Design Principles
//!
//! 1. **Load-time validation**: configuration problems never surface on
//!    the request path
//! 2. **Sequential attempts**: hops within one request never run in
//!    parallel, so cost accounting stays honest
//! 3. **Recorded, not raised**: per-hop failures land in the attempt
//!    trace; only terminal states reach the caller

pub mod conditions;
pub mod constraints;
pub mod dispatcher;
pub mod fallback;
pub mod rules;

#[cfg(test)]
pub mod test_utils;

pub use conditions::ConditionRegistry;
pub use constraints::{ConstraintEvaluator, ConstraintViolation, CostLedger};
pub use dispatcher::{
    AttemptOutcome, DispatchError, DispatchResponse, Dispatched, Dispatcher, ExecutionAttempt,
    ExecutionTrace,
};
pub use fallback::{ExecutionPlan, FallbackPlanner, PlannedHop, DEFAULT_ROLE};
pub use rules::match_rules;
