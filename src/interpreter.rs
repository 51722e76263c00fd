//! Phrase interpreter: free text -> resolved shell Command
//!
//! Pipeline: normalize, tokenize, walk the ordered rule table (first match
//! wins), extract slots, then render the winning template with every slot
//! value shell-quoted. This is the only place user text is escaped; the
//! executor runs whatever line it is given.
//!
//! The interpreter does no I/O and keeps no state between calls.

use crate::command::{Command, Intent};
use crate::rules::{default_rules, Rule, SlotCaptures, SlotDefault, SlotTransform, Target};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpretationError {
    #[error("no rule understood '{phrase}'")]
    NoMatch { phrase: String },
    #[error("rule '{rule}' needs a value for '{slot}'")]
    MissingParameter { slot: String, rule: String },
    #[error("template of rule '{rule}' has no value for placeholder '{placeholder}'")]
    UnresolvedPlaceholder { placeholder: String, rule: String },
    #[error("intent refers to unknown rule '{0}'")]
    UnknownRule(String),
}

const POLITE_PREFIXES: &[&str] = &[
    "please ",
    "can you ",
    "could you ",
    "would you ",
    "i want to ",
    "i need to ",
    "i'd like to ",
    "i would like to ",
];

/// Words that never count as a slot value on their own
const FILLER_WORDS: &[&str] = &[
    "a", "an", "the", "all", "my", "some", "any", "new", "these", "those", "of", "me",
];

const EXTENSIONS: &[(&str, &str)] = &[
    ("python", "py"),
    ("rust", "rs"),
    ("javascript", "js"),
    ("typescript", "ts"),
    ("markdown", "md"),
    ("text", "txt"),
    ("yaml", "yml"),
    ("shell", "sh"),
    ("bash", "sh"),
    ("golang", "go"),
    ("ruby", "rb"),
    ("c++", "cpp"),
    ("perl", "pl"),
    ("kotlin", "kt"),
    ("logs", "log"),
    ("image", "png"),
    ("images", "png"),
];

const VERB_HINTS: &[(&str, &str)] = &[
    ("show", "ls or cat"),
    ("find", "find or locate"),
    ("search", "grep or find"),
    ("install", "package installation is not supported here"),
    ("download", "wget or curl"),
    ("edit", "vim or nano"),
    ("go", "setting working_dir in the config; each request starts in a fresh shell"),
    ("navigate", "setting working_dir in the config; each request starts in a fresh shell"),
];

const NATURAL_INDICATORS: &[&str] = &[
    "create a", "make a", "show me", "list all", "go to", "what is", "what's", "how do",
    "how big", "can you", "could you", "please", "where am i", "who am i",
];

/// Shell commands whose presence as the first word marks a literal line
const KNOWN_COMMANDS: &[&str] = &[
    "ls", "cd", "pwd", "mkdir", "rmdir", "rm", "cp", "mv", "touch", "cat", "head", "tail",
    "less", "more", "find", "grep", "sed", "awk", "sort", "uniq", "wc", "diff", "chmod",
    "chown", "ln", "echo", "printf", "cut", "tr", "xargs", "tee", "ps", "top", "htop",
    "kill", "killall", "sudo", "whoami", "id", "uname", "hostname", "uptime", "df", "du",
    "free", "ping", "curl", "wget", "ssh", "scp", "rsync", "git", "docker", "kubectl",
    "tar", "gzip", "gunzip", "zip", "unzip", "man", "which", "env", "export", "date",
    "cargo", "npm", "python", "python3", "node", "sh", "bash",
];

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern must compile"));

/// Lowercase, collapse whitespace, drop polite prefixes and trailing `?`/`!`.
pub fn normalize(phrase: &str) -> String {
    prepare(phrase).to_lowercase()
}

/// Split a normalized phrase into words
pub fn tokenize(normalized: &str) -> Vec<&str> {
    normalized.split(' ').filter(|t| !t.is_empty()).collect()
}

/// Same steps as [`normalize`] but keeps the caller's casing, so slot values
/// such as `README.md` survive intact.
fn prepare(phrase: &str) -> String {
    let mut text = phrase.split_whitespace().collect::<Vec<_>>().join(" ");

    loop {
        let trimmed = text.trim_end_matches(|c: char| c == '?' || c == '!');
        let trimmed = strip_sentence_period(trimmed).trim_end();
        let mut next = trimmed.to_string();

        for prefix in POLITE_PREFIXES {
            let matches = next
                .get(..prefix.len())
                .map(|head| head.eq_ignore_ascii_case(prefix))
                .unwrap_or(false);
            if matches {
                next = next[prefix.len()..].trim_start().to_string();
            }
        }

        if next == text {
            return text;
        }
        text = next;
    }
}

/// Drop a sentence-ending period, but never one that belongs to a path (`.`, `..`)
fn strip_sentence_period(text: &str) -> &str {
    match text.strip_suffix('.') {
        Some(rest) if rest.ends_with(|c: char| c.is_alphanumeric()) => rest,
        _ => text,
    }
}

/// Quote a value for POSIX `sh`. Values made only of `[A-Za-z0-9_./,:=+@%-]`
/// pass through; anything else is wrapped in single quotes.
pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    if value.chars().all(is_shell_safe) {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | ',' | ':' | '=' | '+' | '@' | '%' | '-')
}

fn is_filler(value: &str) -> bool {
    let lower = value.to_lowercase();
    FILLER_WORDS.contains(&lower.as_str())
}

fn apply_transform(transform: &SlotTransform, raw: &str) -> String {
    match transform {
        SlotTransform::Verbatim => raw.to_string(),
        SlotTransform::Extension => {
            let lower = raw.to_lowercase();
            let bare = lower.trim_start_matches('*').trim_start_matches('.');
            EXTENSIONS
                .iter()
                .find(|(word, _)| *word == bare)
                .map(|(_, ext)| ext.to_string())
                .unwrap_or_else(|| bare.to_string())
        }
        SlotTransform::Location => match raw.to_lowercase().as_str() {
            "here" | "this" | "current" => ".".to_string(),
            _ => raw.to_string(),
        },
    }
}

/// Rule-based phrase interpreter over an ordered rule table
#[derive(Clone, Debug)]
pub struct Interpreter {
    rules: Vec<Rule>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
        }
    }

    /// Use a custom rule table; order is evaluation order
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// (rule name, example phrase) in evaluation order
    pub fn examples(&self) -> Vec<(&str, &str)> {
        self.rules
            .iter()
            .map(|r| (r.name.as_str(), r.example.as_str()))
            .collect()
    }

    /// Read a phrase into an Intent. Returns `Action::Unknown` when no rule fires.
    pub fn parse(&self, phrase: &str) -> Intent {
        let cased = prepare(phrase);
        let normalized = cased.to_lowercase();
        if normalized.is_empty() {
            return Intent::unknown();
        }
        let tokens = tokenize(&normalized);

        self.rules
            .iter()
            .find_map(|rule| {
                rule.predicate
                    .matches(&normalized, &tokens)
                    .map(|caps| build_intent(rule, caps, &cased, &normalized))
            })
            .unwrap_or_else(Intent::unknown)
    }

    /// Phrase to resolved Command
    pub fn interpret(&self, phrase: &str) -> Result<Command, InterpretationError> {
        let no_match = || InterpretationError::NoMatch {
            phrase: phrase.to_string(),
        };

        if phrase.trim().is_empty() {
            return Err(no_match());
        }

        let intent = self.parse(phrase);
        if intent.is_unknown() {
            return Err(no_match());
        }
        self.resolve(&intent)
    }

    /// Render the intent's rule template. Unknown intents cannot be resolved.
    pub fn resolve(&self, intent: &Intent) -> Result<Command, InterpretationError> {
        let name = match (&intent.rule, intent.is_unknown()) {
            (Some(name), false) => name,
            _ => {
                return Err(InterpretationError::NoMatch {
                    phrase: intent.target.clone(),
                })
            }
        };

        let rule = self
            .rules
            .iter()
            .find(|r| &r.name == name)
            .ok_or_else(|| InterpretationError::UnknownRule(name.clone()))?;

        for slot in rule.slots.iter().filter(|s| s.required) {
            let present = intent
                .qualifiers
                .get(&slot.name)
                .map(|v| !v.is_empty())
                .unwrap_or(false);
            if !present {
                return Err(InterpretationError::MissingParameter {
                    slot: slot.name.clone(),
                    rule: rule.name.clone(),
                });
            }
        }

        render(rule, &intent.qualifiers).map(Command::new)
    }
}

fn build_intent(rule: &Rule, captures: SlotCaptures, cased: &str, normalized: &str) -> Intent {
    let mut qualifiers = BTreeMap::new();
    // Capture offsets come from the lowercase text; they only line up with the
    // cased text when lowercasing kept every byte length.
    let source = if cased.len() == normalized.len() { cased } else { normalized };

    for spec in &rule.slots {
        let captured = captures
            .iter()
            .find(|(name, _)| name == &spec.name)
            .and_then(|(_, range)| source.get(range.clone()))
            .map(str::trim)
            .filter(|v| !v.is_empty() && !is_filler(v));

        let value = match (captured, &spec.default) {
            (Some(raw), _) => Some(apply_transform(&spec.transform, raw)),
            (None, SlotDefault::Literal(default)) => Some(default.clone()),
            (None, _) => None,
        };

        if let Some(value) = value.filter(|v| !v.is_empty()) {
            qualifiers.insert(spec.name.clone(), value);
        }
    }

    // Derived defaults read the final values of the slots above
    for spec in &rule.slots {
        if qualifiers.contains_key(&spec.name) {
            continue;
        }
        if let SlotDefault::Derived { from, prefix, suffix } = &spec.default {
            if let Some(base) = qualifiers.get(from) {
                let stem = match base.trim_end_matches('/') {
                    "" => base.as_str(),
                    stem => stem,
                };
                let derived = format!("{}{}{}", prefix, stem, suffix);
                qualifiers.insert(spec.name.clone(), derived);
            }
        }
    }

    let target = match &rule.target {
        Target::Slot(slot) => qualifiers.get(slot).cloned().unwrap_or_default(),
        Target::Fixed(target) => target.clone(),
    };

    Intent {
        action: rule.action,
        target,
        qualifiers,
        rule: Some(rule.name.clone()),
    }
}

fn render(rule: &Rule, qualifiers: &BTreeMap<String, String>) -> Result<String, InterpretationError> {
    let template = &rule.template;
    let mut line = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = qualifiers
            .get(name.as_str())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| InterpretationError::UnresolvedPlaceholder {
                placeholder: name.as_str().to_string(),
                rule: rule.name.clone(),
            })?;

        line.push_str(&template[last..whole.start()]);
        line.push_str(&shell_quote(value));
        last = whole.end();
    }
    line.push_str(&template[last..]);

    Ok(line)
}

/// Suggestions shown when nothing matched: file-like words and known verbs
pub fn hints(phrase: &str) -> Vec<String> {
    let normalized = normalize(phrase);
    let words = tokenize(&normalized);
    let mut hints: Vec<String> = Vec::new();

    for word in &words {
        let file_like = (word.contains('.') && word.len() > 1) || word.ends_with('/');
        if file_like {
            hints.push(format!("Did you mean: ls {0} or cat {0}?", word));
        }
    }
    for word in &words {
        if let Some((_, tip)) = VERB_HINTS.iter().find(|(verb, _)| verb == word) {
            hints.push(format!("For '{}', try: {}", word, tip));
        }
    }

    let mut seen = std::collections::HashSet::new();
    hints.retain(|h| seen.insert(h.clone()));
    hints
}

/// Guess whether console input is a phrase rather than a shell line
pub fn looks_like_natural_language(text: &str) -> bool {
    let lower = normalize(text);
    let words = tokenize(&lower);
    let Some(first) = words.first() else {
        return false;
    };

    if NATURAL_INDICATORS.iter().any(|i| lower.starts_with(i)) {
        return true;
    }
    if KNOWN_COMMANDS.contains(first) {
        return false;
    }
    words.len() > 2
}
