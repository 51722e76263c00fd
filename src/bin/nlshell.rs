/*!
 * nlshell - Natural-language shell
 *
 * Turns short English requests into shell commands, runs them and reports
 * the result. Also exposes the host metric sampler.
 */

use anyhow::Result;
use clap::{Parser, Subcommand};
use nlshell_core::config::Config;
use nlshell_core::dispatcher::{Dispatcher, RawRequest, Response};
use nlshell_core::logging;
use nlshell_core::metrics::{
    format_bytes, host_info, install_global, latest_metrics, MetricSampler, MetricSnapshot,
};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "nlshell")]
#[command(about = "Natural-language shell - describe a task, get it run", long_about = None)]
struct Cli {
    /// Config file (default: $NLSHELL_CONFIG or ~/.config/nlshell/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON instead of human-readable output
    #[arg(short, long, global = true)]
    json: bool,

    /// Override the command timeout
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interpret a phrase and run the resulting command
    Ask {
        #[arg(required = true, num_args = 1..)]
        phrase: Vec<String>,
    },

    /// Show how a phrase would be interpreted without running it
    Explain {
        #[arg(required = true, num_args = 1..)]
        phrase: Vec<String>,
    },

    /// Run a literal shell command
    Run {
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Interactive console
    Repl,

    /// Sample host metrics
    Metrics {
        /// Number of snapshots to print
        #[arg(long, default_value_t = 1)]
        ticks: u32,

        /// Sampling interval (default from config)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Print static host information instead
        #[arg(long)]
        host: bool,
    },

    /// List the built-in rules with an example phrase each
    Rules,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match Config::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {:#}", e);
            std::process::exit(2);
        }
    };
    if let Some(timeout_ms) = cli.timeout_ms {
        config.executor.default_timeout_ms = timeout_ms;
    }
    if let Err(e) = logging::init_logger(&config.logging) {
        eprintln!("Config error: {:#}", e);
        std::process::exit(2);
    }

    match run(cli, config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli, config: Config) -> Result<i32> {
    let dispatcher = Dispatcher::from_config(&config);
    let json = cli.json;

    match cli.command {
        Commands::Ask { phrase } => {
            let response = dispatcher.handle(RawRequest::phrase(phrase.join(" "))).await;
            print_response(&response, json)?;
            Ok(exit_code(&response))
        }
        Commands::Explain { phrase } => explain(&dispatcher, &phrase.join(" "), json),
        Commands::Run { command } => {
            let response = dispatcher.handle(RawRequest::literal(command.join(" "))).await;
            print_response(&response, json)?;
            Ok(exit_code(&response))
        }
        Commands::Repl => repl(&dispatcher, &config, json).await,
        Commands::Metrics {
            ticks,
            interval_ms,
            host,
        } => {
            if host {
                print_json_or(&host_info(), json, |info| {
                    println!("Host:    {}", info.host_name.as_deref().unwrap_or("unknown"));
                    println!(
                        "OS:      {} {}",
                        info.os_name.as_deref().unwrap_or("unknown"),
                        info.os_version.as_deref().unwrap_or("")
                    );
                    println!("Kernel:  {}", info.kernel_version.as_deref().unwrap_or("unknown"));
                    println!("CPUs:    {}", info.cpu_count);
                    println!("Memory:  {}", format_bytes(info.total_memory));
                    println!("Uptime:  {}s", info.uptime_secs);
                })?;
                return Ok(0);
            }
            let interval = Duration::from_millis(interval_ms.unwrap_or(config.sampler.interval_ms));
            sample_metrics(&config, interval, ticks, json).await
        }
        Commands::Rules => {
            let rules: Vec<_> = dispatcher
                .interpreter()
                .rules()
                .iter()
                .map(|rule| json!({"name": rule.name, "action": rule.action, "example": rule.example}))
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&rules)?);
            } else {
                for rule in dispatcher.interpreter().rules() {
                    println!("{:<24} {:<9} e.g. \"{}\"", rule.name, rule.action.as_str(), rule.example);
                }
            }
            Ok(0)
        }
        Commands::Version => {
            println!("nlshell v{}", env!("CARGO_PKG_VERSION"));
            println!("Natural-language shell");
            Ok(0)
        }
    }
}

fn exit_code(response: &Response) -> i32 {
    if response.ok {
        0
    } else {
        1
    }
}

fn print_response(response: &Response, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    if !response.resolved_command.is_empty() {
        println!("$ {}", response.resolved_command);
    }
    if let Some(result) = &response.result {
        print!("{}", result.stdout);
        if !result.stderr.is_empty() {
            eprint!("{}", result.stderr);
        }
    }
    if let Some(error) = &response.error {
        eprintln!("{}", error);
    }
    for hint in &response.hints {
        eprintln!("hint: {}", hint);
    }
    Ok(())
}

fn print_json_or<T: serde::Serialize>(value: &T, json: bool, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

fn explain(dispatcher: &Dispatcher, phrase: &str, json: bool) -> Result<i32> {
    let interpreter = dispatcher.interpreter();
    let intent = interpreter.parse(phrase);
    let resolved = interpreter.interpret(phrase);
    let (command, error) = match &resolved {
        Ok(command) => (command.line.clone(), None),
        Err(e) => (String::new(), Some(e.to_string())),
    };

    if json {
        let report = json!({
            "phrase": phrase,
            "intent": intent,
            "resolved_command": command,
            "error": error,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Action:  {}", intent.action);
        if !intent.target.is_empty() {
            println!("Target:  {}", intent.target);
        }
        for (slot, value) in &intent.qualifiers {
            println!("  {} = {}", slot, value);
        }
        if let Some(rule) = &intent.rule {
            println!("Rule:    {}", rule);
        }
        match &error {
            None => println!("Command: {}", command),
            Some(e) => eprintln!("{}", e),
        }
    }
    Ok(if resolved.is_ok() { 0 } else { 1 })
}

async fn sample_metrics(config: &Config, interval: Duration, ticks: u32, json: bool) -> Result<i32> {
    let sampler = Arc::new(MetricSampler::system(&config.sampler));
    let _ = install_global(sampler.clone());
    let mut updates = sampler.subscribe();
    sampler.start(interval)?;

    for _ in 0..ticks.max(1) {
        if updates.changed().await.is_err() {
            break;
        }
        let snapshot = updates.borrow_and_update().clone();
        print_snapshot(&snapshot, json)?;
    }
    sampler.stop().await;
    Ok(0)
}

fn print_snapshot(snapshot: &MetricSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }
    let mut line = format!(
        "#{} cpu {:5.1}% | mem {:5.1}% of {} | disk r {} w {} | net tx {} rx {}",
        snapshot.tick,
        snapshot.cpu_percent,
        snapshot.memory.percent,
        format_bytes(snapshot.memory.total),
        format_bytes(snapshot.disk_io.read_bytes),
        format_bytes(snapshot.disk_io.write_bytes),
        format_bytes(snapshot.network_io.bytes_sent),
        format_bytes(snapshot.network_io.bytes_recv),
    );
    if !snapshot.stale.is_empty() {
        let stale: Vec<&str> = snapshot.stale.iter().map(|f| f.as_str()).collect();
        line.push_str(&format!(" (stale: {})", stale.join(", ")));
    }
    println!("{}", line);
    Ok(())
}

const REPL_HELP: &str = "\
Type a request in plain English, or a shell command.
  !<command>   run <command> literally
  :metrics     show the latest host metrics
  :help        show this help
  :quit        leave";

async fn repl(dispatcher: &Dispatcher, config: &Config, json: bool) -> Result<i32> {
    let sampler = Arc::new(MetricSampler::system(&config.sampler));
    let _ = install_global(sampler.clone());
    sampler.start(Duration::from_millis(config.sampler.interval_ms.max(1)))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("nlshell> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            ":quit" | ":q" | "exit" | "quit" => break,
            ":help" => {
                println!("{}", REPL_HELP);
                for (_, example) in dispatcher.interpreter().examples() {
                    println!("  e.g. {}", example);
                }
            }
            ":metrics" => match latest_metrics() {
                Some(snapshot) => print_snapshot(&snapshot, json)?,
                None => println!("metrics unavailable"),
            },
            _ => {
                let request = match line.strip_prefix('!') {
                    Some(literal) => RawRequest::literal(literal),
                    None => RawRequest::auto(line),
                };
                let response = dispatcher.handle(request).await;
                print_response(&response, json)?;
            }
        }
    }

    sampler.stop().await;
    Ok(0)
}
