//! nlshell_core - natural-language shell backend
//!
//! Modules:
//! - command: Intent, Command and ExecutionResult shared by the pipeline
//! - rules: Ordered rule table (predicate + command template)
//! - interpreter: Phrase to resolved, escaped shell command
//! - executor: Subprocess execution with timeouts and process-group kill
//! - metrics: Background host metric sampler with atomic snapshots
//! - dispatcher: Request entry point producing uniform responses
//! - config: YAML configuration with environment overrides
//! - logging: tracing subscriber setup

pub mod command;
pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod interpreter;
pub mod logging;
pub mod metrics;
pub mod rules;

// Re-export key types for convenience
pub use command::{Action, Command, ExecutionResult, Intent};

pub use rules::{default_rules, Predicate, Rule, SlotDefault, SlotSpec, SlotTransform, Target};

pub use interpreter::{
    hints, looks_like_natural_language, normalize, shell_quote, tokenize, InterpretationError,
    Interpreter,
};

pub use executor::{
    execute, Executor, ExecutorConfig, SPAWN_FAILURE_EXIT_CODE, TIMEOUT_EXIT_CODE, WAIT_FAILURE_EXIT_CODE,
};

pub use metrics::{
    format_bytes, host_info, install_global, latest_metrics, CounterSource, HostInfo,
    MetricField, MetricSampler, MetricSnapshot, SamplerConfig, SamplerError, SysinfoSource,
};

pub use dispatcher::{make_id, Dispatcher, ErrorKind, LiteralLimits, RawRequest, Response};

pub use config::Config;

pub use logging::{init_logger, LogConfig, LogLevel};

/// Interpret a phrase with the built-in rule table
pub fn interpret(phrase: &str) -> Result<Command, InterpretationError> {
    Interpreter::new().interpret(phrase)
}
