//! Maestro CLI - Strategy-Driven Completions
//!
//! Thin front end over the routing engine: load strategy documents, pick a
//! strategy, dispatch one request, print the result.
//!
//! # Usage
//!
//! ```bash
//! # Complete a prompt with the default strategy
//! maestro "write a haiku about sockets"
//!
//! # Pick a strategy and tag the request for routing rules
//! maestro -s dev-primary --context domain=code "refactor this loop"
//!
//! # Machine-readable response plus attempt trace
//! maestro --json "summarize the release notes"
//!
//! # List loaded strategies
//! maestro --list
//!
//! # Verbose logging
//! RUST_LOG=debug maestro "hello"
//! ```
//!
//! # Exit Codes
//!
//! - `0`: served
//! - `2`: invalid configuration or strategy document
//! - `3`: strategy not found
//! - `4`: every hop failed
//! - `130`: interrupted or timed out

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use maestro_core::{
    register_builtin_components, CompletionRequest, ComponentRegistry, DispatchError, Dispatcher,
    Strategy, StrategyManager, StrategyStore,
};

const EXIT_OK: i32 = 0;
const EXIT_VALIDATION: i32 = 2;
const EXIT_NOT_FOUND: i32 = 3;
const EXIT_EXHAUSTED: i32 = 4;
const EXIT_CANCELLED: i32 = 130;

/// Maestro - strategy-driven completion routing
#[derive(Parser, Debug)]
#[command(name = "maestro")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Prompt text to complete
    #[arg(value_name = "PROMPT", required_unless_present = "list")]
    prompt: Option<String>,

    /// Strategy to route with
    #[arg(short, long, env = "MAESTRO_STRATEGY", default_value = "default")]
    strategy: String,

    /// Strategy document path
    #[arg(short, long, env = "MAESTRO_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Generation token cap
    #[arg(long)]
    max_tokens: Option<u32>,

    /// System prompt
    #[arg(long)]
    system: Option<String>,

    /// Session identifier for log correlation
    #[arg(long)]
    session: Option<String>,

    /// Context tag for routing rules, repeatable
    #[arg(long, value_name = "KEY=VALUE", value_parser = parse_key_val)]
    context: Vec<(String, String)>,

    /// Whole-request deadline in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Emit the response and trace as JSON
    #[arg(long)]
    json: bool,

    /// List loaded strategies instead of dispatching
    #[arg(long)]
    list: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "MAESTRO_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got \"{raw}\""))
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_documents(path: &Path) -> anyhow::Result<Vec<Strategy>> {
    maestro_core::load_strategies(path)
        .with_context(|| format!("loading strategy documents from {}", path.display()))
}

fn build_request(args: &Args, prompt: String) -> CompletionRequest {
    let mut request = CompletionRequest::new(prompt);
    if let Some(temperature) = args.temperature {
        request = request.with_temperature(temperature);
    }
    if let Some(max_tokens) = args.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }
    if let Some(ref system) = args.system {
        request = request.with_system(system.clone());
    }
    if let Some(ref session) = args.session {
        request = request.with_session(session.clone());
    }
    if let Some(timeout_ms) = args.timeout_ms {
        request = request.with_timeout(Duration::from_millis(timeout_ms));
    }
    for (key, value) in &args.context {
        request = request.with_tag(key.clone(), value.clone());
    }
    request
}

fn report_failure(err: &DispatchError, json: bool) {
    if json {
        let payload = serde_json::json!({
            "error": err.to_string(),
            "trace": err.trace(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).unwrap_or_default()
        );
    } else {
        error!(error = %err, "Dispatch failed");
        for (index, attempt) in err.trace().iter().enumerate() {
            eprintln!(
                "  #{} {}/{} {} ({}ms)",
                index + 1,
                attempt.role,
                attempt.model,
                attempt.outcome.label(),
                attempt.duration_ms
            );
        }
    }
}

async fn run(args: Args) -> i32 {
    let registry = ComponentRegistry::new();
    register_builtin_components(&registry);

    let path = args
        .config
        .clone()
        .unwrap_or_else(maestro_core::default_strategies_path);
    let docs = match load_documents(&path) {
        Ok(docs) => docs,
        Err(err) => {
            error!("{err:#}");
            return EXIT_VALIDATION;
        }
    };
    let doc_names: Vec<String> = docs.iter().map(|d| d.name.clone()).collect();

    let (manager, validation_errors) = StrategyManager::load(docs, &registry);
    for err in &validation_errors {
        error!(error = %err, "Invalid strategy");
    }

    if args.list {
        let mut summaries: Vec<_> = manager.list().collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        if args.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summaries).unwrap_or_default()
            );
        } else {
            for summary in summaries {
                println!(
                    "{}  ({} roles)  {}",
                    summary.name, summary.role_count, summary.description
                );
            }
        }
        return if validation_errors.is_empty() {
            EXIT_OK
        } else {
            EXIT_VALIDATION
        };
    }

    // The prompt is mandatory when not listing; clap enforces this.
    let Some(prompt) = args.prompt.clone() else {
        error!("A prompt is required");
        return EXIT_VALIDATION;
    };

    if manager.get(&args.strategy).is_none() {
        // Distinguish a strategy that was rejected from one never declared
        return if doc_names.iter().any(|name| name == &args.strategy) {
            error!(strategy = %args.strategy, "Strategy failed validation");
            EXIT_VALIDATION
        } else {
            error!(strategy = %args.strategy, "Strategy not found");
            EXIT_NOT_FOUND
        };
    }

    let dispatcher = Dispatcher::new(Arc::new(StrategyStore::new(manager)));
    let request = build_request(&args, prompt);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, aborting");
                cancel.cancel();
            }
        });
    }

    match dispatcher
        .execute_cancellable(&args.strategy, request, cancel)
        .await
    {
        Ok(result) => {
            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&result).unwrap_or_default()
                );
            } else {
                println!("{}", result.response.content);
                info!(
                    role = %result.response.role,
                    model = %result.response.model,
                    attempts = result.trace.len(),
                    "Served"
                );
            }
            EXIT_OK
        }
        Err(DispatchError::StrategyNotFound(name)) => {
            error!(strategy = %name, "Strategy not found");
            EXIT_NOT_FOUND
        }
        Err(err @ DispatchError::Exhausted { .. }) => {
            report_failure(&err, args.json);
            EXIT_EXHAUSTED
        }
        Err(err @ DispatchError::Cancelled { .. }) => {
            report_failure(&err, args.json);
            EXIT_CANCELLED
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log_level);
    std::process::exit(run(args).await);
}
