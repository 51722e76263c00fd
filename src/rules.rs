//! Rule table for the phrase interpreter
//!
//! A rule pairs a match predicate with a `{{slot}}` command template. Rules are
//! kept in a `Vec` and evaluated top to bottom; the first match wins, so the
//! order of [`default_rules`] is part of the interpreter's behaviour. Several
//! rules overlap on purpose ("create a backup" must hit `create_backup` before
//! the generic `create_named_directory`).

use crate::command::Action;
use regex::{Captures, Regex};
use std::ops::Range;

/// How a rule decides whether it applies to a normalized phrase
#[derive(Clone, Debug)]
pub enum Predicate {
    /// First token is one of `verbs` and a later token is one of `nouns`
    Keywords { verbs: Vec<String>, nouns: Vec<String> },
    /// Regex over the normalized phrase; named groups become slots
    Pattern(Regex),
}

/// Raw predicate hit: byte range of each captured slot in the normalized phrase
pub(crate) type SlotCaptures = Vec<(String, Range<usize>)>;

impl Predicate {
    pub fn keywords(verbs: &[&str], nouns: &[&str]) -> Self {
        Predicate::Keywords {
            verbs: verbs.iter().map(|s| s.to_string()).collect(),
            nouns: nouns.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Compile a pattern. Patterns are anchored at the start of the phrase.
    pub fn pattern(re: &str) -> Result<Self, regex::Error> {
        let anchored = if re.starts_with('^') {
            re.to_string()
        } else {
            format!("^{}", re)
        };
        Ok(Predicate::Pattern(Regex::new(&anchored)?))
    }

    pub(crate) fn matches(&self, normalized: &str, tokens: &[&str]) -> Option<SlotCaptures> {
        match self {
            Predicate::Keywords { verbs, nouns } => {
                let (first, rest) = tokens.split_first()?;
                if !verbs.iter().any(|v| v == first) {
                    return None;
                }
                if rest.iter().any(|t| nouns.iter().any(|n| n == t)) {
                    Some(Vec::new())
                } else {
                    None
                }
            }
            Predicate::Pattern(re) => re.captures(normalized).map(|caps| named_captures(re, &caps)),
        }
    }
}

fn named_captures(re: &Regex, caps: &Captures<'_>) -> SlotCaptures {
    re.capture_names()
        .flatten()
        .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.range())))
        .collect()
}

/// Post-processing applied to a captured slot value
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotTransform {
    Verbatim,
    /// Language or file-type word to a bare extension (`python` -> `py`)
    Extension,
    /// `here`, `this`, `current` -> `.`
    Location,
}

/// Value used when a slot was not captured
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotDefault {
    None,
    Literal(String),
    /// Built from another slot's final value: `prefix + value + suffix`
    Derived {
        from: String,
        prefix: String,
        suffix: String,
    },
}

#[derive(Clone, Debug)]
pub struct SlotSpec {
    pub name: String,
    pub required: bool,
    pub default: SlotDefault,
    pub transform: SlotTransform,
}

impl SlotSpec {
    pub fn required(name: &str) -> Self {
        Self {
            name: name.to_string(),
            required: true,
            default: SlotDefault::None,
            transform: SlotTransform::Verbatim,
        }
    }

    pub fn optional(name: &str, default: &str) -> Self {
        Self {
            name: name.to_string(),
            required: false,
            default: SlotDefault::Literal(default.to_string()),
            transform: SlotTransform::Verbatim,
        }
    }

    pub fn derived(name: &str, from: &str, prefix: &str, suffix: &str) -> Self {
        Self {
            name: name.to_string(),
            required: false,
            default: SlotDefault::Derived {
                from: from.to_string(),
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            },
            transform: SlotTransform::Verbatim,
        }
    }

    pub fn transform(mut self, transform: SlotTransform) -> Self {
        self.transform = transform;
        self
    }
}

/// What an intent's `target` is taken from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Slot(String),
    Fixed(String),
}

#[derive(Clone, Debug)]
pub struct Rule {
    pub name: String,
    pub action: Action,
    pub predicate: Predicate,
    /// Command template with `{{slot}}` placeholders
    pub template: String,
    pub slots: Vec<SlotSpec>,
    pub target: Target,
    /// A phrase this rule is expected to win; used for help output
    pub example: String,
}

impl Rule {
    pub fn new(name: &str, action: Action, predicate: Predicate, template: &str) -> Self {
        Self {
            name: name.to_string(),
            action,
            predicate,
            template: template.to_string(),
            slots: Vec::new(),
            target: Target::Fixed(String::new()),
            example: String::new(),
        }
    }

    pub fn slot(mut self, spec: SlotSpec) -> Self {
        self.slots.push(spec);
        self
    }

    pub fn target_slot(mut self, slot: &str) -> Self {
        self.target = Target::Slot(slot.to_string());
        self
    }

    pub fn fixed_target(mut self, target: &str) -> Self {
        self.target = Target::Fixed(target.to_string());
        self
    }

    pub fn example(mut self, phrase: &str) -> Self {
        self.example = phrase.to_string();
        self
    }
}

const INSPECT_VERBS: &[&str] = &["check", "show", "display", "report", "get"];

fn pattern(re: &str) -> Predicate {
    Predicate::pattern(re).expect("built-in rule pattern must compile")
}

/// Built-in rules in evaluation order
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "check_disk",
            Action::Inspect,
            Predicate::keywords(INSPECT_VERBS, &["disk", "disks", "storage"]),
            "df -h",
        )
        .fixed_target("disk")
        .example("check disk space"),
        Rule::new(
            "check_memory",
            Action::Inspect,
            Predicate::keywords(INSPECT_VERBS, &["memory", "ram"]),
            "free -h",
        )
        .fixed_target("memory")
        .example("show memory usage"),
        Rule::new(
            "check_cpu",
            Action::Inspect,
            Predicate::keywords(INSPECT_VERBS, &["cpu", "processor"]),
            "ps -eo pid,comm,%cpu --sort=-%cpu | head -n 11",
        )
        .fixed_target("cpu")
        .example("check cpu usage"),
        Rule::new(
            "list_processes",
            Action::Inspect,
            pattern(r"(?:show|list|display)\b(?: me)?\b(?: all)?\b(?: the)?\b(?: running)?\b processes\b"),
            "ps aux",
        )
        .fixed_target("processes")
        .example("show me running processes"),
        Rule::new(
            "top_processes",
            Action::Inspect,
            pattern(r"(?:show|list|display)\b(?: me)?\b(?: the)? top processes(?: |$)"),
            "top -b -n 1 | head -n 20",
        )
        .fixed_target("processes")
        .example("show me top processes"),
        Rule::new(
            "system_info",
            Action::Inspect,
            pattern(r"(?:(?:show|display|get)\b(?: me)?\b(?: the)? )?(?:system info|system information|systeminfo)(?: |$)"),
            "uname -a",
        )
        .fixed_target("system")
        .example("show me system info"),
        Rule::new(
            "where_am_i",
            Action::Inspect,
            pattern(r"(?:where am i|what directory am i in|current directory|print working directory)\b"),
            "pwd",
        )
        .fixed_target("cwd")
        .example("where am i"),
        Rule::new(
            "who_am_i",
            Action::Inspect,
            pattern(r"(?:who am i|current user|what user am i)\b"),
            "whoami",
        )
        .fixed_target("user")
        .example("who am i"),
        Rule::new(
            "current_time",
            Action::Inspect,
            pattern(r"(?:what time is it|what's the (?:time|date)|what is the (?:time|date)|current (?:date|time)|today's date)\b"),
            "date",
        )
        .fixed_target("clock")
        .example("what time is it"),
        Rule::new(
            "create_backup",
            Action::Create,
            pattern(r"(?:create|make)\b(?: a| an| the)?\b(?: new)?\b backup(?: |$)"),
            "mkdir -p -- backup",
        )
        .fixed_target("backup")
        .example("create a backup"),
        Rule::new(
            "create_file",
            Action::Create,
            pattern(r"(?:create|make|touch)\b(?: a| an| the)?\b(?: new)?\b file(?: called| named)?(?: (?P<name>\S+))?(?: |$)"),
            "touch -- {{name}}",
        )
        .slot(SlotSpec::required("name"))
        .target_slot("name")
        .example("create a new file called notes.txt"),
        Rule::new(
            "create_directory",
            Action::Create,
            pattern(r"(?:create|make)\b(?: a| an| the)?\b(?: new)?\b (?:folder|directory|dir)(?: called| named)?(?: (?P<name>\S+))?(?: |$)"),
            "mkdir -p -- {{name}}",
        )
        .slot(SlotSpec::required("name"))
        .target_slot("name")
        .example("make a new folder documents"),
        Rule::new(
            "create_named_file",
            Action::Create,
            pattern(r"(?:create|make|touch)\b(?: a| an| the)?\b(?: new)?\b (?P<name>\S+\.\w+)(?:\s|$)"),
            "touch -- {{name}}",
        )
        .slot(SlotSpec::required("name"))
        .target_slot("name")
        .example("create todo.md"),
        Rule::new(
            "create_named_directory",
            Action::Create,
            pattern(r"(?:create|make)\b(?: a| an| the)?\b(?: new)?\b(?: (?P<name>\S+))?"),
            "mkdir -p -- {{name}}",
        )
        .slot(SlotSpec::required("name"))
        .target_slot("name")
        .example("create a project"),
        Rule::new(
            "list_files",
            Action::Find,
            pattern(r"(?:list|show)\b(?: me)?\b(?: all)?\b(?: the)?\b (?:files|contents)(?: (?:in|inside)(?: the)?\b (?P<dir>\S+))?$"),
            "ls -la -- {{dir}}",
        )
        .slot(SlotSpec::optional("dir", ".").transform(SlotTransform::Location))
        .target_slot("dir")
        .example("list all files in src"),
        Rule::new(
            "find_by_name",
            Action::Find,
            pattern(r"(?:find|locate|search for)\b(?: a| the| all)?\b(?: files?)?\b (?:named|called) (?P<name>\S+)"),
            "find . -name {{name}}",
        )
        .slot(SlotSpec::required("name"))
        .target_slot("name")
        .example("find files named *.log"),
        Rule::new(
            "find_by_extension",
            Action::Find,
            pattern(r"(?:show|find|list|locate|search for)\b(?: me)?\b(?: all)?\b(?: the)?\b(?: (?P<extension>\S+))? files?\b"),
            "find . -type f -name {{pattern}}",
        )
        .slot(SlotSpec::required("extension").transform(SlotTransform::Extension))
        .slot(SlotSpec::derived("pattern", "extension", "*.", ""))
        .target_slot("extension")
        .example("show me python files"),
        Rule::new(
            "search_text",
            Action::Find,
            pattern(r"(?:search|grep|look)\b(?: for)?\b (?P<pattern>.+?)(?: in (?P<path>\S+))?$"),
            "grep -rn -- {{pattern}} {{path}}",
        )
        .slot(SlotSpec::required("pattern"))
        .slot(SlotSpec::optional("path", ".").transform(SlotTransform::Location))
        .target_slot("pattern")
        .example("search for todo in src"),
        Rule::new(
            "disk_usage_of",
            Action::Inspect,
            pattern(r"(?:how big is|size of|what is the size of|disk usage of)\b(?: the)?\b(?: (?P<target>\S+))?"),
            "du -sh -- {{target}}",
        )
        .slot(SlotSpec::required("target").transform(SlotTransform::Location))
        .target_slot("target")
        .example("how big is downloads"),
        Rule::new(
            "whats_in",
            Action::Inspect,
            pattern(r"(?:what's in|whats in|what is in)\b(?: the)?\b(?: (?P<dir>\S+))?"),
            "ls -la -- {{dir}}",
        )
        .slot(SlotSpec::required("dir").transform(SlotTransform::Location))
        .target_slot("dir")
        .example("what's in the current directory"),
        Rule::new(
            "remove_directory",
            Action::Remove,
            pattern(r"(?:delete|remove)\b(?: the)? (?:folder|directory|dir)(?: called| named)?(?: (?P<dir>\S+))?(?: |$)"),
            "rm -rf -- {{dir}}",
        )
        .slot(SlotSpec::required("dir"))
        .target_slot("dir")
        .example("remove the folder tmp"),
        Rule::new(
            "remove_file",
            Action::Remove,
            pattern(r"(?:delete|remove)\b(?: the)? file(?: called| named)?(?: (?P<file>\S+))?(?: |$)"),
            "rm -- {{file}}",
        )
        .slot(SlotSpec::required("file"))
        .target_slot("file")
        .example("delete the file old.txt"),
        Rule::new(
            "remove_path",
            Action::Remove,
            pattern(r"(?:delete|remove)\b(?: the)?(?: (?P<file>\S+))?"),
            "rm -- {{file}}",
        )
        .slot(SlotSpec::required("file"))
        .target_slot("file")
        .example("delete old.txt"),
        Rule::new(
            "view_file",
            Action::Inspect,
            pattern(r"(?:show|read|display|view|cat|open)\b(?: me)?\b(?: the)?\b(?: contents of)?\b(?: the)?(?: (?:file(?: |$))?(?P<file>\S+)?)?"),
            "cat -- {{file}}",
        )
        .slot(SlotSpec::required("file"))
        .target_slot("file")
        .example("show me the contents of config.txt"),
        Rule::new(
            "compress",
            Action::Compress,
            pattern(r"(?:compress|zip|archive|tar)\b(?: up)?\b(?: the)?(?: (?:(?:file|folder|directory)(?: |$))?(?P<target>\S+)?)?(?: (?:to|into|as) (?P<archive>\S+))?"),
            "tar -czf {{archive}} -- {{target}}",
        )
        .slot(SlotSpec::required("target"))
        .slot(SlotSpec::derived("archive", "target", "", ".tar.gz"))
        .target_slot("target")
        .example("compress the folder photos"),
        Rule::new(
            "extract",
            Action::Compress,
            pattern(r"(?:extract|unzip|decompress|uncompress|untar)\b(?: the)?(?: (?:(?:archive|file)(?: |$))?(?P<archive>\S+)?)?"),
            "tar -xzf {{archive}}",
        )
        .slot(SlotSpec::required("archive"))
        .target_slot("archive")
        .example("extract photos.tar.gz"),
        Rule::new(
            "move",
            Action::Move,
            pattern(r"(?:move|rename|mv)\b(?: the)?\b(?: file| folder| directory)?\b (?P<source>\S+) (?:to|into|as) (?P<dest>\S+)"),
            "mv -- {{source}} {{dest}}",
        )
        .slot(SlotSpec::required("source"))
        .slot(SlotSpec::required("dest"))
        .target_slot("source")
        .example("move data.csv to archive"),
        Rule::new(
            "copy",
            Action::Copy,
            pattern(r"(?:copy|cp|duplicate)\b(?: the)?\b(?: file| folder| directory)?\b (?P<source>\S+) (?:to|into|as) (?P<dest>\S+)"),
            "cp -r -- {{source}} {{dest}}",
        )
        .slot(SlotSpec::required("source"))
        .slot(SlotSpec::required("dest"))
        .target_slot("source")
        .example("copy file1.txt to backup.txt"),
    ]
}
