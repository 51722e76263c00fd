//! Session dispatcher - the single entry point for every transport
//!
//! A request is either a phrase (interpreted into a command first) or a
//! literal shell line (only size-checked). Either way the outcome is a
//! [`Response`] with the same fields; failures never escape as errors.

use crate::command::{Command, ExecutionResult};
use crate::config::Config;
use crate::executor::Executor;
use crate::interpreter::{hints, looks_like_natural_language, InterpretationError, Interpreter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRequest {
    pub text: String,
    pub is_literal: bool,
}

impl RawRequest {
    pub fn phrase(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_literal: false,
        }
    }

    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_literal: true,
        }
    }

    /// Phrase or literal, guessed from the text
    pub fn auto(text: impl Into<String>) -> Self {
        let text = text.into();
        let is_literal = !looks_like_natural_language(&text);
        Self { text, is_literal }
    }
}

/// Why a request did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    NoMatch { phrase: String },
    MissingParameter { slot: String, phrase: String },
    /// A rule table or intent that cannot be rendered
    InvalidRule { reason: String, phrase: String },
    RejectedCommand { reason: String },
    ExecutionTimeout { timeout_ms: u64 },
    ExecutionFailure { exit_code: i32 },
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NoMatch { phrase } => write!(f, "Could not understand: '{}'", phrase),
            ErrorKind::MissingParameter { slot, phrase } => {
                write!(f, "'{}' needs a {} to work on", phrase, slot)
            }
            ErrorKind::InvalidRule { reason, .. } => write!(f, "Rule error: {}", reason),
            ErrorKind::RejectedCommand { reason } => write!(f, "Command rejected: {}", reason),
            ErrorKind::ExecutionTimeout { timeout_ms } => {
                write!(f, "Command timed out after {} ms", timeout_ms)
            }
            ErrorKind::ExecutionFailure { exit_code } => {
                write!(f, "Command exited with code {}", exit_code)
            }
        }
    }
}

impl ErrorKind {
    fn from_interpretation(error: InterpretationError, phrase: &str) -> Self {
        match error {
            InterpretationError::NoMatch { phrase } => ErrorKind::NoMatch { phrase },
            InterpretationError::MissingParameter { slot, .. } => ErrorKind::MissingParameter {
                slot,
                phrase: phrase.to_string(),
            },
            other => ErrorKind::InvalidRule {
                reason: other.to_string(),
                phrase: phrase.to_string(),
            },
        }
    }
}

/// Uniform envelope returned for every request. `result` and `error` are
/// always serialized, as null when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: String,
    /// True only when a command ran to completion with exit code 0
    pub ok: bool,
    pub resolved_command: String,
    pub result: Option<ExecutionResult>,
    pub error: Option<ErrorKind>,
    pub hints: Vec<String>,
}

impl Response {
    fn refused(request_id: String, error: ErrorKind, hints: Vec<String>) -> Self {
        Self {
            request_id,
            ok: false,
            resolved_command: String::new(),
            result: None,
            error: Some(error),
            hints,
        }
    }

    fn executed(request_id: String, command: &Command, result: ExecutionResult, timeout_ms: u64) -> Self {
        let error = if result.timed_out {
            Some(ErrorKind::ExecutionTimeout { timeout_ms })
        } else if result.exit_code != 0 {
            Some(ErrorKind::ExecutionFailure {
                exit_code: result.exit_code,
            })
        } else {
            None
        };
        Self {
            request_id,
            ok: error.is_none(),
            resolved_command: command.line.clone(),
            result: Some(result),
            error,
            hints: Vec::new(),
        }
    }
}

/// Size limits for literal commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiteralLimits {
    pub max_command_len: usize,
    pub max_args: usize,
}

impl Default for LiteralLimits {
    fn default() -> Self {
        Self {
            max_command_len: 4096,
            max_args: 256,
        }
    }
}

impl LiteralLimits {
    pub fn check(&self, text: &str) -> Result<(), String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err("command is empty".to_string());
        }
        if trimmed.len() > self.max_command_len {
            return Err(format!(
                "command is {} bytes, limit is {}",
                trimmed.len(),
                self.max_command_len
            ));
        }
        let args = trimmed.split_whitespace().count();
        if args > self.max_args {
            return Err(format!("command has {} arguments, limit is {}", args, self.max_args));
        }
        Ok(())
    }
}

/// Generate a unique request ID
pub fn make_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

/// Routes requests to the interpreter and executor. Holds no per-request
/// state, so one instance can serve concurrent requests.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    interpreter: Interpreter,
    executor: Executor,
    limits: LiteralLimits,
    working_dir: Option<PathBuf>,
}

impl Dispatcher {
    pub fn new(interpreter: Interpreter, executor: Executor, limits: LiteralLimits) -> Self {
        Self {
            interpreter,
            executor,
            limits,
            working_dir: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            interpreter: Interpreter::new(),
            executor: Executor::new(config.executor.clone()),
            limits: config.limits.clone(),
            working_dir: config.working_dir.clone(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub async fn handle(&self, input: RawRequest) -> Response {
        let request_id = make_id("req");
        debug!(request_id = %request_id, literal = input.is_literal, "handling request");

        let command = if input.is_literal {
            if let Err(reason) = self.limits.check(&input.text) {
                info!(request_id = %request_id, reason = %reason, "literal command rejected");
                return Response::refused(request_id, ErrorKind::RejectedCommand { reason }, Vec::new());
            }
            Command::new(input.text.trim())
        } else {
            match self.interpreter.interpret(&input.text) {
                Ok(command) => command,
                Err(e) => {
                    info!(request_id = %request_id, error = %e, "phrase not resolved");
                    let suggestions = match &e {
                        InterpretationError::NoMatch { .. } => hints(&input.text),
                        _ => Vec::new(),
                    };
                    let error = ErrorKind::from_interpretation(e, &input.text);
                    return Response::refused(request_id, error, suggestions);
                }
            }
        };

        let command = match &self.working_dir {
            Some(dir) => command.in_dir(dir.clone()),
            None => command,
        };
        let timeout_ms = self.executor.timeout_for(&command).as_millis() as u64;
        let result = self.executor.execute(&command).await;

        info!(
            request_id = %request_id,
            command = %command.line,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            timed_out = result.timed_out,
            "request finished"
        );
        Response::executed(request_id, &command, result, timeout_ms)
    }
}
