//! Routing Rule Evaluation
//!
//! Evaluates a strategy's ordered rule list against a request and yields
//! the first matching target. Matching is a pure function of the rules and
//! the request: no hidden state, same inputs, same answer.

use crate::backend::CompletionRequest;
use crate::strategy::{RoutingRule, RouteTarget, RulePattern};

impl RulePattern {
    /// Whether this pattern matches the request
    #[must_use]
    pub fn matches(&self, request: &CompletionRequest) -> bool {
        match self {
            Self::Contains { needle } => request
                .query_text
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            Self::Prefix { prefix } => request
                .query_text
                .to_lowercase()
                .starts_with(&prefix.to_lowercase()),
            Self::ContextEquals { key, value } => {
                request.context.get(key).map(String::as_str) == Some(value.as_str())
            }
            Self::ContextHas { key } => request.context.contains_key(key),
            Self::Any => true,
        }
    }
}

/// First matching target in list order, or `None` when no rule matches
///
/// Callers fall back to the strategy's default target when this returns
/// `None`: the `"default"` role if declared, else the head of the declared
/// fallback chain.
#[must_use]
pub fn match_rules<'a>(
    rules: &'a [RoutingRule],
    request: &CompletionRequest,
) -> Option<&'a RouteTarget> {
    rules
        .iter()
        .find(|rule| rule.pattern.matches(request))
        .map(|rule| &rule.target)
}
