// tests/interpreter_props.rs
// Property tests: determinism and injection-safe slot substitution

use nlshell_core::command::Action;
use nlshell_core::interpreter::{shell_quote, Interpreter};
use nlshell_core::rules::{Predicate, Rule, SlotSpec};
use proptest::prelude::*;
use std::process::Command as StdCommand;

fn echo_interpreter() -> Interpreter {
    Interpreter::with_rules(vec![Rule::new(
        "say",
        Action::Inspect,
        Predicate::pattern(r"say (?P<text>.+)$").unwrap(),
        "printf %s {{text}}",
    )
    .slot(SlotSpec::required("text"))
    .target_slot("text")])
}

fn run_sh(line: &str) -> String {
    let output = StdCommand::new("/bin/sh").arg("-c").arg(line).output().unwrap();
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Words full of shell metacharacters, joined by single spaces and ending in
/// a letter so normalisation leaves them untouched.
fn hostile_text() -> impl Strategy<Value = String> {
    prop::collection::vec(r#"[a-z0-9;&|$`'"()<>*?~!#\\{}=-]{1,8}"#, 1..5)
        .prop_map(|words| format!("{}z", words.join(" ")))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn substituted_text_is_passed_as_one_literal_argument(text in hostile_text()) {
        let interpreter = echo_interpreter();
        let command = interpreter.interpret(&format!("say {}", text)).unwrap();
        prop_assert_eq!(run_sh(&command.line), text);
    }

    #[test]
    fn shell_quote_round_trips_through_sh(value in "[ -~]{1,24}") {
        let line = format!("printf %s {}", shell_quote(&value));
        prop_assert_eq!(run_sh(&line), value);
    }

    #[test]
    fn interpret_is_deterministic(phrase in "[a-z .?!/*-]{0,40}") {
        let interpreter = Interpreter::new();
        prop_assert_eq!(interpreter.interpret(&phrase), interpreter.interpret(&phrase));
        prop_assert_eq!(interpreter.parse(&phrase), Interpreter::new().parse(&phrase));
    }

    #[test]
    fn search_pattern_with_metacharacters_stays_one_argument(
        text in r#"q[a-z;&|$`'"()<> ]{0,12}[a-z]"#
    ) {
        let interpreter = Interpreter::new();
        let phrase = format!("search for {} in src", text);
        let command = interpreter.interpret(&phrase).unwrap();
        let normalized: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
        prop_assert_eq!(command.line, format!("grep -rn -- {} src", shell_quote(&normalized)));
    }
}
