//! `stackvisor` command-line front end.
//!
//! ```text
//! stackvisor -f audio-stack.toml plan
//! stackvisor -f audio-stack.toml up --deadline-ms 60000 --hold
//! stackvisor -f audio-stack.toml down
//! ```
//!
//! Logging goes through `tracing`: `RUST_LOG` filters (default `info`),
//! `STACKVISOR_LOG_FORMAT=json` switches to JSON lines.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stackvisor::{
    BringUpReport, LogWriter, StackBuilder, StackController, StackFile, Subscribe, TearDownReport,
};

#[derive(Debug, Parser)]
#[command(name = "stackvisor")]
#[command(about = "Dependency-ordered bring-up and recovery of a service stack")]
struct Cli {
    /// Stack definition file.
    #[arg(short, long, env = "STACKVISOR_FILE", default_value = "stackvisor.toml")]
    file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the stack file and print the bring-up plan.
    Plan,
    /// Bring the stack up and print the report.
    Up {
        /// Overall deadline; defaults to `bring_up_deadline_ms` from the file.
        #[arg(long)]
        deadline_ms: Option<u64>,
        /// Keep running until SIGINT / SIGTERM / SIGQUIT, then tear the stack down.
        #[arg(long)]
        hold: bool,
    },
    /// Stop every unit in reverse dependency order.
    Down {
        /// Overall deadline; defaults to `tear_down_deadline_ms` from the file.
        #[arg(long)]
        deadline_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let file = StackFile::load(&cli.file)
        .with_context(|| format!("loading {}", cli.file.display()))?;
    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let stack = StackBuilder::from_file(&file)?
        .with_subscribers(subscribers)
        .build()
        .context("invalid stack")?;

    let code = run(&stack, cli.command).await?;
    stack.shutdown().await;
    Ok(code)
}

async fn run(stack: &StackController, command: Command) -> Result<ExitCode> {
    match command {
        Command::Plan => {
            print!("{}", stack.plan());
            Ok(ExitCode::SUCCESS)
        }
        Command::Up { deadline_ms, hold } => {
            let report = match deadline_ms {
                Some(ms) => stack.bring_up_within(Duration::from_millis(ms)).await,
                None => stack.bring_up().await,
            };
            print_bring_up(&report);
            if !hold {
                return Ok(exit_code(report.is_healthy()));
            }

            let down = stack
                .hold_until_signal()
                .await
                .context("installing signal handlers")?;
            print_tear_down(&down);
            Ok(exit_code(report.is_healthy() && down.is_clean()))
        }
        Command::Down { deadline_ms } => {
            let report = match deadline_ms {
                Some(ms) => stack.tear_down_within(Duration::from_millis(ms)).await,
                None => stack.tear_down().await,
            };
            print_tear_down(&report);
            Ok(exit_code(report.is_clean()))
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("STACKVISOR_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

fn print_bring_up(report: &BringUpReport) {
    println!("{:<24} {:<9} {:>8} {:>10}  last failure", "unit", "state", "attempts", "elapsed");
    for unit in &report.units {
        println!(
            "{:<24} {:<9} {:>8} {:>9.1}s  {}",
            unit.name,
            unit.state,
            unit.attempts,
            unit.elapsed.as_secs_f64(),
            unit.last_failure.as_deref().unwrap_or("-"),
        );
    }
    for name in &report.rolled_back {
        println!("rolled back: {name}");
    }
    println!("{} in {:.1}s", report.summary(), report.elapsed.as_secs_f64());
}

fn print_tear_down(report: &TearDownReport) {
    println!("stopped: {}", report.visited.join(", "));
    for failure in &report.failures {
        println!("stop failed: {failure}");
    }
}

fn exit_code(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
