//! Named Precondition Flags
//!
//! Fallback hops can be gated on named conditions (`api_healthy`, feature
//! flags). Host code (health probes, ops tooling) owns the flag values;
//! the dispatcher only reads them at attempt time.
//!
//! A condition that was never set counts as unmet, so a typo'd condition
//! name makes its hop skip visibly in the trace instead of silently
//! passing.

use std::collections::HashMap;

use dashmap::DashMap;

/// Concurrent registry of named boolean flags
pub struct ConditionRegistry {
    flags: DashMap<String, bool>,
}

impl ConditionRegistry {
    /// Create a registry with no flags set
    #[must_use]
    pub fn new() -> Self {
        Self {
            flags: DashMap::new(),
        }
    }

    /// Set a condition flag
    pub fn set(&self, name: impl Into<String>, value: bool) {
        let name = name.into();
        tracing::debug!(condition = %name, value, "Condition updated");
        self.flags.insert(name, value);
    }

    /// Remove a condition flag entirely
    pub fn clear(&self, name: &str) {
        self.flags.remove(name);
    }

    /// Whether a condition currently holds
    #[must_use]
    pub fn is_met(&self, name: &str) -> bool {
        self.flags.get(name).map(|entry| *entry).unwrap_or(false)
    }

    /// The subset of `conditions` that do not currently hold
    #[must_use]
    pub fn unmet(&self, conditions: &[String]) -> Vec<String> {
        conditions
            .iter()
            .filter(|name| !self.is_met(name))
            .cloned()
            .collect()
    }

    /// Snapshot of all flags, for diagnostics
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, bool> {
        self.flags
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

impl Default for ConditionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_condition_is_unmet() {
        let registry = ConditionRegistry::new();
        assert!(!registry.is_met("api_healthy"));
    }

    #[test]
    fn test_set_and_clear() {
        let registry = ConditionRegistry::new();

        registry.set("api_healthy", true);
        assert!(registry.is_met("api_healthy"));

        registry.set("api_healthy", false);
        assert!(!registry.is_met("api_healthy"));

        registry.set("api_healthy", true);
        registry.clear("api_healthy");
        assert!(!registry.is_met("api_healthy"));
    }

    #[test]
    fn test_unmet_subset() {
        let registry = ConditionRegistry::new();
        registry.set("api_healthy", true);
        registry.set("burst_allowed", false);

        let conditions = vec![
            "api_healthy".to_string(),
            "burst_allowed".to_string(),
            "never_set".to_string(),
        ];
        assert_eq!(
            registry.unmet(&conditions),
            vec!["burst_allowed".to_string(), "never_set".to_string()]
        );

        assert!(registry.unmet(&[]).is_empty());
    }
}
