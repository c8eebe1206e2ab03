//! Fallback Planning
//!
//! Expands a strategy's declared fallback chain into the ordered execution
//! plan for one request:
//!
//! ```text
//! routed target (rules, or the "default" role)
//!         |
//!         v
//!    synthetic hop 0
//!         |
//!         v
//!    declared chain hop 1 .. hop N
//! ```
//!
//! The routed target always gets first try; the declared chain backs it
//! up. Hops that repeat an earlier (role, model) pair are removed so no
//! hop is attempted twice within a single request, and plans are capped at
//! a maximum depth.
//!
//! Precondition evaluation is deliberately not part of planning: the
//! dispatcher checks conditions at attempt time so the trace records every
//! skipped hop and flag flips between planning and attempting are
//! honoured.

use std::collections::HashSet;

use crate::strategy::{RouteTarget, Strategy};

/// Role name consulted when no routing rule matches
pub const DEFAULT_ROLE: &str = "default";

/// One entry in an execution plan
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedHop {
    /// Component role to use
    pub role: String,

    /// Model identifier within that component
    pub model: String,

    /// Named preconditions gating this hop
    pub conditions: Vec<String>,

    /// Whether this hop came from rule-based routing rather than the
    /// declared chain
    pub routed: bool,
}

/// Ordered attempt plan for one request
#[derive(Clone, Debug, Default)]
pub struct ExecutionPlan {
    /// Hops in attempt order
    pub hops: Vec<PlannedHop>,
}

impl ExecutionPlan {
    /// Number of hops in the plan
    #[must_use]
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Whether the plan has no hops
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }
}

/// Builds execution plans from strategies and routing decisions
pub struct FallbackPlanner {
    max_plan_depth: usize,
}

impl FallbackPlanner {
    /// Create a planner with the default depth cap
    #[must_use]
    pub fn new() -> Self {
        Self { max_plan_depth: 8 }
    }

    /// Create a planner with a custom depth cap
    #[must_use]
    pub fn with_max_depth(max_plan_depth: usize) -> Self {
        Self { max_plan_depth }
    }

    /// Expand a strategy into the attempt plan for one request
    ///
    /// `routed` is the rule-matched target, if any. When absent and the
    /// strategy declares a `"default"` role, that role becomes the routed
    /// target instead.
    #[must_use]
    pub fn plan(&self, strategy: &Strategy, routed: Option<&RouteTarget>) -> ExecutionPlan {
        let mut hops = Vec::with_capacity(strategy.fallback_chain.len() + 1);
        let mut seen: HashSet<(String, String)> = HashSet::new();

        let default_target;
        let routed = match routed {
            Some(target) => Some(target),
            None if strategy.components.contains_key(DEFAULT_ROLE) => {
                default_target = RouteTarget {
                    role: DEFAULT_ROLE.to_string(),
                    model: None,
                };
                Some(&default_target)
            }
            None => None,
        };

        if let Some(target) = routed {
            match self.resolve_model(strategy, target) {
                Some(model) => {
                    seen.insert((target.role.clone(), model.clone()));
                    hops.push(PlannedHop {
                        role: target.role.clone(),
                        model,
                        conditions: Vec::new(),
                        routed: true,
                    });
                }
                None => {
                    tracing::debug!(
                        strategy = %strategy.name,
                        role = %target.role,
                        "Dropping routed target with no resolvable model"
                    );
                }
            }
        }

        for hop in &strategy.fallback_chain {
            if !seen.insert((hop.role.clone(), hop.model.clone())) {
                continue;
            }
            hops.push(PlannedHop {
                role: hop.role.clone(),
                model: hop.model.clone(),
                conditions: hop.conditions.clone(),
                routed: false,
            });
        }

        if hops.len() > self.max_plan_depth {
            tracing::warn!(
                strategy = %strategy.name,
                planned = hops.len(),
                max = self.max_plan_depth,
                "Truncating execution plan"
            );
            hops.truncate(self.max_plan_depth);
        }

        ExecutionPlan { hops }
    }

    /// Model for a routed target: explicit override, then the component's
    /// `default_model` config key, then the first declared hop for the
    /// same role.
    fn resolve_model(&self, strategy: &Strategy, target: &RouteTarget) -> Option<String> {
        if let Some(ref model) = target.model {
            return Some(model.clone());
        }

        if let Some(model) = strategy
            .components
            .get(&target.role)
            .and_then(|spec| spec.get_str("default_model"))
        {
            return Some(model.to_string());
        }

        strategy
            .fallback_chain
            .iter()
            .find(|hop| hop.role == target.role)
            .map(|hop| hop.model.clone())
    }
}

impl Default for FallbackPlanner {
    fn default() -> Self {
        Self::new()
    }
}
