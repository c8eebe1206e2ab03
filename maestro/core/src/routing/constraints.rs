//! Constraint Evaluation and Cost Accounting
//!
//! Decides whether a hop attempt is permitted under a strategy's
//! constraint set. Checks run in a fixed order so violation reporting is
//! deterministic: token budget, then hardware requirement, then cost
//! ceiling.
//!
//! # Cost Atomicity
//!
//! The cost check and the charge are one atomic step. [`CostLedger`]
//! stores spent micro-dollars in an `AtomicU64` and `try_charge` runs a
//! compare-exchange loop, so concurrent requests racing on the ceiling
//! cannot both slip past a boundary either would have been denied alone.
//! A charge is not refunded when the subsequent backend call fails.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;

use super::fallback::PlannedHop;
use crate::backend::{BackendHandle, CompletionRequest};
use crate::strategy::ConstraintSet;

// ============================================================================
// Cost Ledger
// ============================================================================

const MICROS_PER_USD: f64 = 1_000_000.0;

/// Running spend accumulator, shared across concurrent requests
///
/// Spend is stored as fixed-point micro-dollars so the ceiling comparison
/// and the increment happen in a single atomic update. The host resets the
/// ledger on its own day boundary.
pub struct CostLedger {
    spent_micros: AtomicU64,
}

impl CostLedger {
    /// Create a ledger with nothing spent
    #[must_use]
    pub fn new() -> Self {
        Self {
            spent_micros: AtomicU64::new(0),
        }
    }

    /// Total charged so far, in USD
    #[must_use]
    pub fn spent_usd(&self) -> f64 {
        self.spent_micros.load(Ordering::Relaxed) as f64 / MICROS_PER_USD
    }

    /// Charge `amount_usd` unless doing so would exceed `ceiling_usd`
    ///
    /// Check and increment are a single atomic step. Returns whether the
    /// charge was applied.
    pub fn try_charge(&self, amount_usd: f64, ceiling_usd: Option<f64>) -> bool {
        let amount = to_micros(amount_usd);

        let Some(ceiling_usd) = ceiling_usd else {
            self.spent_micros.fetch_add(amount, Ordering::SeqCst);
            return true;
        };
        let ceiling = to_micros(ceiling_usd);

        let mut current = self.spent_micros.load(Ordering::SeqCst);
        loop {
            let projected = current.saturating_add(amount);
            if projected > ceiling {
                return false;
            }
            match self.spent_micros.compare_exchange(
                current,
                projected,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Zero the ledger (day rollover)
    pub fn reset(&self) {
        self.spent_micros.store(0, Ordering::SeqCst);
    }
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn to_micros(usd: f64) -> u64 {
    if usd <= 0.0 || !usd.is_finite() {
        return 0;
    }
    (usd * MICROS_PER_USD).round() as u64
}

// ============================================================================
// Violations
// ============================================================================

/// A constraint that denied a hop attempt
#[derive(Clone, Debug, Error, Serialize)]
#[serde(tag = "constraint", rename_all = "snake_case")]
pub enum ConstraintViolation {
    /// Estimated token need exceeds the per-request budget
    #[error("token budget exceeded: need {requested}, limit {limit}")]
    TokenBudget {
        /// Estimated tokens for this request
        requested: u32,
        /// Configured per-request limit
        limit: u32,
    },

    /// Strategy requires GPU hardware this hop's backend lacks
    #[error("role \"{role}\" is not GPU capable but the strategy requires GPU")]
    GpuRequired {
        /// Role whose backend failed the hardware check
        role: String,
    },

    /// The estimated spend would cross the daily ceiling
    #[error("cost ceiling reached: projected {projected_usd:.4} USD over limit {limit_usd:.4} USD")]
    CostCeiling {
        /// Spend so far plus this hop's estimate
        projected_usd: f64,
        /// Configured ceiling
        limit_usd: f64,
    },
}

// ============================================================================
// Evaluator
// ============================================================================

/// Rough token estimate for budget gating: four characters per token plus
/// the requested generation cap.
#[must_use]
pub fn estimate_request_tokens(request: &CompletionRequest) -> u32 {
    let prompt_chars = request.query_text.len()
        + request
            .options
            .system_prompt
            .as_deref()
            .map_or(0, str::len);
    (prompt_chars / 4) as u32 + request.options.max_tokens.unwrap_or(0)
}

/// Applies a constraint set to one hop attempt
#[derive(Clone, Copy, Debug, Default)]
pub struct ConstraintEvaluator;

impl ConstraintEvaluator {
    /// Check a hop in fixed order: tokens, hardware, cost
    ///
    /// The cost check charges the ledger when it passes, so a hop that
    /// clears this method has already been billed for its estimate.
    pub fn check(
        &self,
        constraints: &ConstraintSet,
        request: &CompletionRequest,
        hop: &PlannedHop,
        handle: &dyn BackendHandle,
        ledger: &CostLedger,
    ) -> Result<(), ConstraintViolation> {
        if let Some(limit) = constraints.max_tokens_per_request {
            let requested = estimate_request_tokens(request);
            if requested > limit {
                return Err(ConstraintViolation::TokenBudget { requested, limit });
            }
        }

        if constraints.requires_gpu && !handle.gpu_capable() {
            return Err(ConstraintViolation::GpuRequired {
                role: hop.role.clone(),
            });
        }

        if let Some(ceiling) = constraints.max_daily_cost_usd {
            let estimate = handle.estimate_cost_usd(&hop.model, request);
            if !ledger.try_charge(estimate, Some(ceiling)) {
                return Err(ConstraintViolation::CostCeiling {
                    projected_usd: ledger.spent_usd() + estimate,
                    limit_usd: ceiling,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, CompletionResponse};
    use async_trait::async_trait;
    use std::sync::Arc;

    #[derive(Debug)]
    struct MeteredBackend {
        gpu: bool,
        cost: f64,
    }

    #[async_trait]
    impl BackendHandle for MeteredBackend {
        fn kind(&self) -> &str {
            "metered"
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

        fn estimate_cost_usd(&self, _model: &str, _request: &CompletionRequest) -> f64 {
            self.cost
        }

        fn gpu_capable(&self) -> bool {
            self.gpu
        }
    }

    fn hop(role: &str) -> PlannedHop {
        PlannedHop {
            role: role.to_string(),
            model: "m".to_string(),
            conditions: Vec::new(),
            routed: false,
        }
    }

    #[test]
    fn test_token_budget_checked_first() {
        let evaluator = ConstraintEvaluator;
        let ledger = CostLedger::new();
        // Every dimension would fail; the token violation must win.
        let constraints = ConstraintSet {
            max_tokens_per_request: Some(10),
            requires_gpu: true,
            max_daily_cost_usd: Some(0.0),
            max_latency_ms: None,
        };
        let backend = MeteredBackend {
            gpu: false,
            cost: 5.0,
        };
        let request = CompletionRequest::new("x").with_max_tokens(100);

        let violation = evaluator
            .check(&constraints, &request, &hop("cloud"), &backend, &ledger)
            .unwrap_err();
        assert!(matches!(
            violation,
            ConstraintViolation::TokenBudget { limit: 10, .. }
        ));
        // Nothing was charged on the denied path
        assert_eq!(ledger.spent_usd(), 0.0);
    }

    #[test]
    fn test_gpu_requirement() {
        let evaluator = ConstraintEvaluator;
        let ledger = CostLedger::new();
        let constraints = ConstraintSet {
            requires_gpu: true,
            ..Default::default()
        };
        let request = CompletionRequest::new("x");

        let cpu_only = MeteredBackend {
            gpu: false,
            cost: 0.0,
        };
        assert!(matches!(
            evaluator.check(&constraints, &request, &hop("cloud"), &cpu_only, &ledger),
            Err(ConstraintViolation::GpuRequired { role }) if role == "cloud"
        ));

        let gpu = MeteredBackend {
            gpu: true,
            cost: 0.0,
        };
        assert!(evaluator
            .check(&constraints, &request, &hop("local"), &gpu, &ledger)
            .is_ok());
    }

    #[test]
    fn test_cost_check_charges_on_success() {
        let evaluator = ConstraintEvaluator;
        let ledger = CostLedger::new();
        let constraints = ConstraintSet {
            max_daily_cost_usd: Some(1.0),
            ..Default::default()
        };
        let backend = MeteredBackend {
            gpu: false,
            cost: 0.4,
        };
        let request = CompletionRequest::new("x");

        assert!(evaluator
            .check(&constraints, &request, &hop("cloud"), &backend, &ledger)
            .is_ok());
        assert!(evaluator
            .check(&constraints, &request, &hop("cloud"), &backend, &ledger)
            .is_ok());
        assert!((ledger.spent_usd() - 0.8).abs() < 1e-9);

        // Third attempt would cross 1.0
        assert!(matches!(
            evaluator.check(&constraints, &request, &hop("cloud"), &backend, &ledger),
            Err(ConstraintViolation::CostCeiling { .. })
        ));
        assert!((ledger.spent_usd() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_unconstrained_passes_everything() {
        let evaluator = ConstraintEvaluator;
        let ledger = CostLedger::new();
        let backend = MeteredBackend {
            gpu: false,
            cost: 100.0,
        };
        let request = CompletionRequest::new("x".repeat(100_000)).with_max_tokens(1_000_000);

        assert!(evaluator
            .check(
                &ConstraintSet::default(),
                &request,
                &hop("cloud"),
                &backend,
                &ledger
            )
            .is_ok());
        // No ceiling means no charge is recorded either
        assert_eq!(ledger.spent_usd(), 0.0);
    }

    #[test]
    fn test_ledger_concurrent_ceiling() {
        // 16 threads each try to charge 1/4 of the ceiling; exactly 4 fit.
        let ledger = Arc::new(CostLedger::new());
        let admitted = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                let admitted = admitted.clone();
                std::thread::spawn(move || {
                    if ledger.try_charge(2.5, Some(10.0)) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 4);
        assert!((ledger.spent_usd() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_ledger_reset() {
        let ledger = CostLedger::new();
        assert!(ledger.try_charge(5.0, Some(10.0)));
        ledger.reset();
        assert_eq!(ledger.spent_usd(), 0.0);
        assert!(ledger.try_charge(10.0, Some(10.0)));
    }

    #[test]
    fn test_token_estimate() {
        let request = CompletionRequest::new("a".repeat(400)).with_max_tokens(50);
        assert_eq!(estimate_request_tokens(&request), 150);

        let bare = CompletionRequest::new("hi");
        assert_eq!(estimate_request_tokens(&bare), 0);
    }
}
