//! TOML Strategy Document Support
//!
//! Loads strategy definitions from a TOML document into the in-memory
//! model in [`crate::strategy`]. The file holds one or more
//! `[[strategies]]` tables.
//!
//! # XDG Base Directory Compliance
//!
//! The default document lives at
//! `$XDG_CONFIG_HOME/maestro/strategies.toml` (typically
//! `~/.config/maestro/strategies.toml`).
//!
//! # Example Document
//!
//! ```toml
//! [[strategies]]
//! name = "dev-primary"
//! description = "Local first, cloud backup"
//!
//! [strategies.components.local]
//! type = "model_app"
//! config = { host = "localhost", port = 11434, default_model = "llama3" }
//!
//! [strategies.components.cloud]
//! type = "cloud_api"
//! config = { base_url = "https://api.openai.com", api_key_env = "OPENAI_API_KEY" }
//!
//! [[strategies.routing_rules]]
//! pattern = { kind = "contains", needle = "code" }
//! target = { role = "local" }
//!
//! [[strategies.fallback_chain]]
//! role = "local"
//! model = "llama3"
//!
//! [[strategies.fallback_chain]]
//! role = "cloud"
//! model = "gpt-x"
//! conditions = ["api_healthy"]
//!
//! [strategies.constraints]
//! max_tokens_per_request = 4096
//! max_daily_cost_usd = 10.0
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::strategy::Strategy;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading strategy documents
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the document
    #[error("Failed to read strategy document at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse strategy document: {0}")]
    ParseError(#[from] toml::de::Error),
}

// =============================================================================
// Document Structure
// =============================================================================

/// Top-level shape of a strategy document
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategiesFile {
    /// The strategy records
    pub strategies: Vec<Strategy>,
}

// =============================================================================
// Loading
// =============================================================================

/// Default document location under the XDG config directory
#[must_use]
pub fn default_strategies_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("maestro")
        .join("strategies.toml")
}

/// Parse strategy documents from a TOML string
pub fn load_strategies_str(contents: &str) -> Result<Vec<Strategy>, ConfigError> {
    let file: StrategiesFile = toml::from_str(contents)?;
    Ok(file.strategies)
}

/// Load strategy documents from a file
pub fn load_strategies(path: &Path) -> Result<Vec<Strategy>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    let strategies = load_strategies_str(&contents)?;
    tracing::info!(path = ?path, count = strategies.len(), "Loaded strategy documents");
    Ok(strategies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::RulePattern;
    use std::io::Write;

    const SAMPLE: &str = r#"
[[strategies]]
name = "dev-primary"
description = "Local first, cloud backup"

[strategies.components.local]
type = "model_app"
config = { host = "localhost", port = 11434, default_model = "llama3" }

[strategies.components.cloud]
type = "cloud_api"
config = { base_url = "https://api.example.com" }

[[strategies.routing_rules]]
pattern = { kind = "contains", needle = "code" }
target = { role = "local" }

[[strategies.routing_rules]]
pattern = { kind = "context_equals", key = "tier", value = "premium" }
target = { role = "cloud", model = "gpt-x-pro" }

[[strategies.fallback_chain]]
role = "local"
model = "llama3"

[[strategies.fallback_chain]]
role = "cloud"
model = "gpt-x"
conditions = ["api_healthy"]

[strategies.constraints]
max_tokens_per_request = 4096
requires_gpu = false
max_daily_cost_usd = 10.0

[[strategies]]
name = "cloud-only"

[strategies.components.cloud]
type = "cloud_api"
config = { base_url = "https://api.example.com" }

[[strategies.fallback_chain]]
role = "cloud"
model = "gpt-x"
"#;

    #[test]
    fn test_parse_full_document() {
        let strategies = load_strategies_str(SAMPLE).unwrap();
        assert_eq!(strategies.len(), 2);

        let dev = &strategies[0];
        assert_eq!(dev.name, "dev-primary");
        assert_eq!(dev.components.len(), 2);
        assert_eq!(dev.routing_rules.len(), 2);
        assert_eq!(dev.fallback_chain.len(), 2);
        assert_eq!(dev.constraints.max_tokens_per_request, Some(4096));
        assert_eq!(dev.constraints.max_daily_cost_usd, Some(10.0));

        assert!(matches!(
            &dev.routing_rules[0].pattern,
            RulePattern::Contains { needle } if needle == "code"
        ));
        assert_eq!(dev.routing_rules[1].target.model.as_deref(), Some("gpt-x-pro"));

        let local = dev.components.get("local").unwrap();
        assert_eq!(local.type_name, "model_app");
        assert_eq!(local.get_str("default_model"), Some("llama3"));
        assert_eq!(local.get_u64("port"), Some(11434));

        assert_eq!(
            dev.fallback_chain[1].conditions,
            vec!["api_healthy".to_string()]
        );

        let cloud_only = &strategies[1];
        assert!(cloud_only.routing_rules.is_empty());
        assert!(cloud_only.constraints.is_unconstrained());
    }

    #[test]
    fn test_parse_rejects_malformed_toml() {
        assert!(matches!(
            load_strategies_str("[[strategies]]\nname = "),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_empty_document() {
        assert!(load_strategies_str("").unwrap().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let strategies = load_strategies(file.path()).unwrap();
        assert_eq!(strategies.len(), 2);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_strategies(Path::new("/nonexistent/strategies.toml")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ReadError { path, .. } if path.to_string_lossy().contains("nonexistent")
        ));
    }
}
