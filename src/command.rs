//! Request-scoped types shared by the interpreter, executor and dispatcher
//! - Action / Intent: what a phrase asked for
//! - Command: a fully resolved shell line ready to run
//! - ExecutionResult: what running it produced

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// What a phrase asks the shell to do
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Find,
    Inspect,
    Compress,
    Move,
    Copy,
    Remove,
    Unknown,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Find => "find",
            Action::Inspect => "inspect",
            Action::Compress => "compress",
            Action::Move => "move",
            Action::Copy => "copy",
            Action::Remove => "remove",
            Action::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured reading of a phrase.
///
/// `qualifiers` holds every slot the winning rule extracted, raw and unescaped.
/// An intent with `Action::Unknown` has no rule and must never be resolved
/// into a [`Command`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub action: Action,
    pub target: String,
    pub qualifiers: BTreeMap<String, String>,
    /// Name of the rule that produced this intent
    pub rule: Option<String>,
}

impl Intent {
    pub fn unknown() -> Self {
        Self {
            action: Action::Unknown,
            target: String::new(),
            qualifiers: BTreeMap::new(),
            rule: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.action == Action::Unknown
    }
}

/// A resolved, directly executable shell line.
///
/// The line is handed to the shell verbatim; nothing downstream re-escapes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub line: String,
    pub working_dir: Option<PathBuf>,
    #[serde(with = "opt_duration_ms", default)]
    pub timeout: Option<Duration>,
}

impl Command {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            working_dir: None,
            timeout: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Argument vector used to spawn the line through `shell`
    pub fn argv(&self, shell: &str) -> Vec<String> {
        vec![shell.to_string(), "-c".to_string(), self.line.clone()]
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

/// Outcome of running one Command. A non-zero exit code is a normal result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
