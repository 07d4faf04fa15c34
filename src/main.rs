//! TaskRouter CLI.
//!
//! Usage:
//!   taskrouter run "1+1" "Imprime hola mundo"   Run each task independently
//!   taskrouter chat                             One task per stdin line
//!   taskrouter tools                            List the grand agent's tools
//!   taskrouter setup                            Write router.toml interactively

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use taskrouter::config::{self, RouterConfig};
use taskrouter::types::{AgentResult, RunStatus};
use taskrouter::TaskRouter;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "taskrouter")]
#[command(version = "0.1.0")]
#[command(about = "Route natural-language tasks to code and dataset agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to router.toml [default: ~/.taskrouter/router.toml].
    #[arg(long)]
    config: Option<String>,

    /// Log level (debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one or more tasks, each as an independent run.
    Run {
        #[arg(required = true)]
        tasks: Vec<String>,

        /// Print each full result (output, status, transcript) as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Read tasks from stdin, one per line.
    Chat,

    /// List the tools the grand agent can choose from.
    Tools,

    /// Run the interactive setup wizard.
    Setup,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = config::resolve_config_path(cli.config.as_deref());

    if let Commands::Setup = cli.command {
        init_logging(cli.log_level.as_deref().unwrap_or("warn"));
        taskrouter::setup::run_setup_wizard(&config_path)?;
        return Ok(());
    }

    let cfg = load(&config_path)?;
    init_logging(cli.log_level.as_deref().unwrap_or(&cfg.log_level));

    let base_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let router = TaskRouter::from_config(&cfg, &base_dir)
        .await
        .context("Failed to assemble agents")?;

    match cli.command {
        Commands::Run { tasks, json } => cmd_run(&router, &tasks, json).await,
        Commands::Chat => cmd_chat(&router).await,
        Commands::Tools => cmd_tools(&router),
        Commands::Setup => Ok(()),
    }
}

fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

async fn cmd_run(router: &TaskRouter, tasks: &[String], json: bool) -> Result<()> {
    let cancel = cancel_on_ctrl_c();

    for task in tasks {
        if cancel.is_cancelled() {
            break;
        }
        if !json {
            println!("{} {}", ">>>".green().bold(), task);
        }
        let result = router.run_with_cancel(task, &cancel).await;
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("Failed to serialize result")?
            );
        } else {
            print_result(&result);
        }
    }
    Ok(())
}

async fn cmd_chat(router: &TaskRouter) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", "Enter a task per line. Ctrl+D to quit.".dimmed());
    while !cancel.is_cancelled() {
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let task = line.trim();
        if task.is_empty() {
            continue;
        }
        let result = router.run_with_cancel(task, &cancel).await;
        print_result(&result);
    }
    Ok(())
}

fn cmd_tools(router: &TaskRouter) -> Result<()> {
    println!();
    println!("{}", "=== Tools ===".bold());
    for (i, tool) in router.tools().iter().enumerate() {
        println!();
        println!("  {}. {}", i + 1, tool.name.bold());
        println!("     {}", collapse_whitespace(&tool.description).dimmed());
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load(config_path: &Path) -> Result<RouterConfig> {
    if !config_path.exists() {
        eprintln!(
            "{} No config at {}; using defaults with no datasets. Run `taskrouter setup` to create one.",
            "Note:".yellow().bold(),
            config_path.display()
        );
    }
    config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))
}

/// Token cancelled on the first Ctrl+C. The in-flight run stops after its
/// current cycle.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                eprintln!("\n{} Cancelling after the current step...", "<<<".red().bold());
                token.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });
    cancel
}

fn print_result(result: &AgentResult) {
    info!(
        "Run {} finished: {} ({} steps)",
        result.transcript.run_id,
        result.status,
        result.transcript.steps.len()
    );
    println!("{} {}", colorize_status(result.status), result.output);
}

fn colorize_status(status: RunStatus) -> String {
    let label = format!("[{}]", status);
    match status {
        RunStatus::Success => label.green().to_string(),
        RunStatus::IterationLimitExceeded | RunStatus::Cancelled => label.yellow().to_string(),
        RunStatus::ToolError | RunStatus::ParseError | RunStatus::ModelError => {
            label.red().to_string()
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
