// tests/executor_tests.rs
// Timeouts, forced termination of process trees, working directories

use nlshell_core::command::Command;
use nlshell_core::executor::{execute, Executor, ExecutorConfig, TIMEOUT_EXIT_CODE};
use std::time::{Duration, Instant};
use tempfile::tempdir;

const SLACK: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_returns_within_timeout_when_signals_are_ignored() {
    let started = Instant::now();
    let result = execute(&Command::new("trap '' TERM INT HUP; echo stubborn; sleep 30"), 300).await;

    assert!(result.timed_out);
    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    assert_eq!(result.stdout, "stubborn\n");
    assert!(started.elapsed() < Duration::from_millis(300) + SLACK);
}

#[tokio::test]
async fn test_timeout_kills_background_descendants() {
    let dir = tempdir().unwrap();
    let marker = dir.path().join("orphan-ran");
    let line = format!("(sleep 1; touch {}) & sleep 30", marker.display());

    let result = execute(&Command::new(line), 200).await;
    assert!(result.timed_out);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists(), "descendant survived the timeout");
}

#[tokio::test]
async fn test_background_job_holding_pipe_counts_as_running() {
    let started = Instant::now();
    let result = execute(&Command::new("sleep 30 & echo parent-done"), 300).await;

    assert!(result.timed_out);
    assert_eq!(result.stdout, "parent-done\n");
    assert!(started.elapsed() < Duration::from_millis(300) + SLACK);
}

#[tokio::test]
async fn test_runs_in_working_dir() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "here").unwrap();

    let result = Executor::default()
        .execute(&Command::new("ls && cat marker.txt").in_dir(dir.path()))
        .await;

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "marker.txt\nhere");
}

#[tokio::test]
async fn test_missing_working_dir_is_spawn_failure() {
    let dir = tempdir().unwrap();
    let result = Executor::default()
        .execute(&Command::new("true").in_dir(dir.path().join("gone")))
        .await;

    assert_eq!(result.exit_code, 127);
    assert!(!result.stderr.is_empty());
    assert!(!result.timed_out);
}

#[tokio::test]
async fn test_line_is_not_re_escaped() {
    let result = execute(&Command::new("printf '%s|%s' 'a b' \"$((2+3))\""), 5_000).await;
    assert_eq!(result.stdout, "a b|5");
}

#[tokio::test]
async fn test_stdin_is_closed() {
    let result = execute(&Command::new("cat; echo eof"), 2_000).await;
    assert!(!result.timed_out);
    assert_eq!(result.stdout, "eof\n");
}

#[tokio::test]
async fn test_duration_covers_run_time() {
    let result = execute(&Command::new("sleep 0.2"), 5_000).await;
    assert_eq!(result.exit_code, 0);
    assert!(result.duration_ms >= 200);
}

#[tokio::test]
async fn test_default_timeout_from_config() {
    let executor = Executor::new(ExecutorConfig {
        default_timeout_ms: 250,
        ..ExecutorConfig::default()
    });
    let result = executor.execute(&Command::new("sleep 10")).await;
    assert!(result.timed_out);

    let explicit = Command::new("sleep 0.1").with_timeout(Duration::from_secs(5));
    assert!(!executor.execute(&explicit).await.timed_out);
}
