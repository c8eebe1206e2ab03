//! Request Dispatch
//!
//! The per-request state machine. For a given strategy and request the
//! dispatcher consults the rule matcher for a primary target, expands the
//! fallback chain into an execution plan, gates each hop on preconditions
//! and constraints, and invokes backends strictly in order until one
//! succeeds or the plan runs out.
//!
//! ```text
//! Routing -> Attempting(hop 0) -> Succeeded
//!                 |        \
//!                 |         -> Attempting(hop 1) -> ... -> Exhausted
//!                 |
//!                 -> Cancelled (caller abort or global deadline)
//! ```
//!
//! Per-hop failures are never raised mid-plan; they are recorded into the
//! attempt trace and drive the transition to the next hop. Only the
//! terminal state produces a return value. The trace is returned on
//! success too, so callers can see "it took two fallbacks".

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::conditions::ConditionRegistry;
use super::constraints::{ConstraintEvaluator, ConstraintViolation, CostLedger};
use super::fallback::{FallbackPlanner, PlannedHop};
use super::rules::match_rules;
use crate::backend::{BackendError, BackendHandle, CompletionRequest, CompletionResponse};
use crate::strategy::StrategyStore;

// ============================================================================
// Attempt Trace
// ============================================================================

/// How one hop attempt ended
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The hop served the request
    Succeeded,

    /// The backend call failed
    BackendError {
        /// Whether the error was retry-eligible
        transient: bool,
        /// Error text
        message: String,
    },

    /// A constraint denied the attempt before any backend call
    ConstraintViolation {
        /// The first violated constraint
        violation: ConstraintViolation,
    },

    /// One or more preconditions did not hold, no backend call made
    PreconditionUnmet {
        /// The conditions that failed
        unmet: Vec<String>,
    },

    /// The request was aborted while this hop was in flight
    Cancelled,
}

impl AttemptOutcome {
    /// Short label for log lines and trace listings
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::BackendError { .. } => "backend_error",
            Self::ConstraintViolation { .. } => "constraint_violation",
            Self::PreconditionUnmet { .. } => "precondition_unmet",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Record of one hop attempt
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionAttempt {
    /// Component role attempted
    pub role: String,

    /// Model attempted
    pub model: String,

    /// When the attempt started
    pub started_at: DateTime<Utc>,

    /// How long the attempt took
    pub duration_ms: u64,

    /// How it ended
    pub outcome: AttemptOutcome,
}

/// Ordered attempts for one request
pub type ExecutionTrace = Vec<ExecutionAttempt>;

fn record(
    hop: &PlannedHop,
    started_at: DateTime<Utc>,
    started: std::time::Instant,
    outcome: AttemptOutcome,
) -> ExecutionAttempt {
    ExecutionAttempt {
        role: hop.role.clone(),
        model: hop.model.clone(),
        started_at,
        duration_ms: started.elapsed().as_millis() as u64,
        outcome,
    }
}

// ============================================================================
// Results
// ============================================================================

/// Response attribution for a served request
#[derive(Clone, Debug, Serialize)]
pub struct DispatchResponse {
    /// The completion text
    pub content: String,

    /// Role that served it
    pub role: String,

    /// Model that served it
    pub model: String,

    /// Tokens consumed, when reported
    pub tokens_used: Option<u32>,
}

/// Successful dispatch: the response plus the full attempt trace
#[derive(Clone, Debug, Serialize)]
pub struct Dispatched {
    /// The winning response
    pub response: DispatchResponse,

    /// Every attempt made, including the successful one
    pub trace: ExecutionTrace,
}

/// Terminal dispatch failures
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No loaded strategy has this name
    #[error("strategy not found: {0}")]
    StrategyNotFound(String),

    /// Every hop in the plan was attempted or skipped without a success
    #[error("all hops exhausted after {} attempts", .trace.len())]
    Exhausted {
        /// Every attempt made
        trace: ExecutionTrace,
    },

    /// The caller aborted, or the global deadline elapsed
    #[error("request cancelled after {} attempts", .trace.len())]
    Cancelled {
        /// Attempts made before the abort, including the aborted one
        trace: ExecutionTrace,
    },
}

impl DispatchError {
    /// The attempt trace, empty for lookup failures
    #[must_use]
    pub fn trace(&self) -> &[ExecutionAttempt] {
        match self {
            Self::StrategyNotFound(_) => &[],
            Self::Exhausted { trace } | Self::Cancelled { trace } => trace,
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// The request orchestrator
///
/// Holds no per-request state; the only mutable state shared across
/// concurrent requests is the strategy snapshot handle, the condition
/// flags, and the atomic cost ledger.
pub struct Dispatcher {
    store: Arc<StrategyStore>,
    planner: FallbackPlanner,
    conditions: Arc<ConditionRegistry>,
    evaluator: ConstraintEvaluator,
    ledger: Arc<CostLedger>,
}

impl Dispatcher {
    /// Create a dispatcher over a strategy store
    #[must_use]
    pub fn new(store: Arc<StrategyStore>) -> Self {
        Self {
            store,
            planner: FallbackPlanner::new(),
            conditions: Arc::new(ConditionRegistry::new()),
            evaluator: ConstraintEvaluator,
            ledger: Arc::new(CostLedger::new()),
        }
    }

    /// Replace the planner
    #[must_use]
    pub fn with_planner(mut self, planner: FallbackPlanner) -> Self {
        self.planner = planner;
        self
    }

    /// Share an externally owned condition registry
    #[must_use]
    pub fn with_conditions(mut self, conditions: Arc<ConditionRegistry>) -> Self {
        self.conditions = conditions;
        self
    }

    /// Share an externally owned cost ledger
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<CostLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    /// Condition registry consulted at attempt time
    #[must_use]
    pub fn conditions(&self) -> Arc<ConditionRegistry> {
        self.conditions.clone()
    }

    /// Spend ledger shared by all requests
    #[must_use]
    pub fn cost_ledger(&self) -> Arc<CostLedger> {
        self.ledger.clone()
    }

    /// Execute a request against a named strategy
    pub async fn execute(
        &self,
        strategy_name: &str,
        request: CompletionRequest,
    ) -> Result<Dispatched, DispatchError> {
        self.execute_cancellable(strategy_name, request, CancellationToken::new())
            .await
    }

    /// Execute with a caller-owned cancellation signal
    ///
    /// Cancellation aborts any in-flight hop and terminates the plan; it
    /// never continues to the next hop.
    pub async fn execute_cancellable(
        &self,
        strategy_name: &str,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<Dispatched, DispatchError> {
        // Pin this request to the current snapshot; a concurrent reload
        // must not retarget a plan mid-flight.
        let snapshot = self.store.current();
        let loaded = snapshot
            .get(strategy_name)
            .ok_or_else(|| DispatchError::StrategyNotFound(strategy_name.to_string()))?;
        let strategy = &loaded.strategy;

        let routed = match_rules(&strategy.routing_rules, &request);
        let plan = self.planner.plan(strategy, routed);
        tracing::debug!(
            request_id = %request.request_id,
            strategy = %strategy.name,
            hops = plan.len(),
            routed = routed.is_some(),
            "Built execution plan"
        );

        let deadline = request.timeout().map(|t| tokio::time::Instant::now() + t);
        let hop_budget = strategy.constraints.max_latency_ms.map(Duration::from_millis);

        let mut trace: ExecutionTrace = Vec::with_capacity(plan.len());

        for hop in &plan.hops {
            let started_at = Utc::now();
            let started = std::time::Instant::now();

            let unmet = self.conditions.unmet(&hop.conditions);
            if !unmet.is_empty() {
                tracing::debug!(
                    request_id = %request.request_id,
                    role = %hop.role,
                    model = %hop.model,
                    unmet = ?unmet,
                    "Skipping hop, preconditions unmet"
                );
                trace.push(record(
                    hop,
                    started_at,
                    started,
                    AttemptOutcome::PreconditionUnmet { unmet },
                ));
                continue;
            }

            let Some(handle) = loaded.handle(&hop.role) else {
                trace.push(record(
                    hop,
                    started_at,
                    started,
                    AttemptOutcome::BackendError {
                        transient: false,
                        message: format!("role \"{}\" has no constructed backend", hop.role),
                    },
                ));
                continue;
            };

            if let Err(violation) = self.evaluator.check(
                &strategy.constraints,
                &request,
                hop,
                handle.as_ref(),
                &self.ledger,
            ) {
                tracing::debug!(
                    request_id = %request.request_id,
                    role = %hop.role,
                    model = %hop.model,
                    violation = %violation,
                    "Skipping hop, constraint violated"
                );
                trace.push(record(
                    hop,
                    started_at,
                    started,
                    AttemptOutcome::ConstraintViolation { violation },
                ));
                continue;
            }

            let invocation = tokio::select! {
                () = cancel.cancelled() => None,
                () = wait_for_deadline(deadline) => None,
                result = invoke_with_budget(handle.as_ref(), &hop.model, &request, hop_budget) => {
                    Some(result)
                }
            };

            match invocation {
                None => {
                    trace.push(record(hop, started_at, started, AttemptOutcome::Cancelled));
                    tracing::info!(
                        request_id = %request.request_id,
                        role = %hop.role,
                        model = %hop.model,
                        "Request cancelled mid-plan"
                    );
                    return Err(DispatchError::Cancelled { trace });
                }
                Some(Ok(response)) => {
                    trace.push(record(hop, started_at, started, AttemptOutcome::Succeeded));
                    tracing::info!(
                        request_id = %request.request_id,
                        role = %hop.role,
                        model = %hop.model,
                        attempts = trace.len(),
                        "Request served"
                    );
                    return Ok(Dispatched {
                        response: DispatchResponse {
                            content: response.content,
                            role: hop.role.clone(),
                            model: hop.model.clone(),
                            tokens_used: response.tokens_used,
                        },
                        trace,
                    });
                }
                Some(Err(error)) => {
                    let transient = error.is_transient();
                    tracing::warn!(
                        request_id = %request.request_id,
                        role = %hop.role,
                        model = %hop.model,
                        transient,
                        error = %error,
                        "Hop failed"
                    );
                    trace.push(record(
                        hop,
                        started_at,
                        started,
                        AttemptOutcome::BackendError {
                            transient,
                            message: error.to_string(),
                        },
                    ));
                }
            }
        }

        tracing::warn!(
            request_id = %request.request_id,
            strategy = %strategy.name,
            attempts = trace.len(),
            "All hops exhausted"
        );
        Err(DispatchError::Exhausted { trace })
    }
}

async fn wait_for_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn invoke_with_budget(
    handle: &dyn BackendHandle,
    model: &str,
    request: &CompletionRequest,
    budget: Option<Duration>,
) -> Result<CompletionResponse, BackendError> {
    match budget {
        Some(limit) => match tokio::time::timeout(limit, handle.invoke(model, request)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(limit.as_millis() as u64)),
        },
        None => handle.invoke(model, request).await,
    }
}

// ============================================================================
// Tests
// ============================================================================
