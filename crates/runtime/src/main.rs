//! weft CLI
//!
//! Dispatch screen handlers, validate screen schemas and manage the offline
//! queue from the command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use weft_dispatcher::check_screen;
use weft_runtime::{ConsoleHost, Runtime, WeftConfig, init_tracing};

/// weft: run declarative screen actions against live endpoints.
#[derive(Parser, Debug)]
#[command(name = "weft", version, about)]
struct Cli {
    /// Configuration file.
    #[arg(long, short, env = "WEFT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dispatch a named handler from a screen schema.
    Run(RunArgs),
    /// Statically validate every handler of a screen schema.
    Check {
        /// Screen schema (JSON).
        screen: PathBuf,
    },
    /// Inspect or drive the offline queue.
    Queue(QueueArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Screen schema (JSON).
    screen: PathBuf,
    /// Handler name within the screen.
    handler: String,
    /// JSON event payload (string or @file path).
    #[arg(long, default_value = "{}")]
    payload: String,
    /// Directory receiving exported files.
    #[arg(long, default_value = ".")]
    download_dir: PathBuf,
}

#[derive(Args, Debug)]
struct QueueArgs {
    #[command(subcommand)]
    command: QueueCommand,
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
    /// List pending events.
    List,
    /// Replay pending events now.
    Replay,
    /// Drop every pending event.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => WeftConfig::load(path)?,
        None => WeftConfig::default(),
    };
    init_tracing(&config.logging);

    match cli.command {
        Command::Run(args) => run(config, &args, &cli.format).await,
        Command::Check { screen } => check(&config, &screen, &cli.format),
        Command::Queue(args) => queue(config, &args, &cli.format).await,
    }
}

fn parse_payload(raw: &str) -> anyhow::Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?,
        None => raw.to_owned(),
    };
    Ok(serde_json::from_str(&text)?)
}

async fn run(config: WeftConfig, args: &RunArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let payload = parse_payload(&args.payload)?;
    let runtime = Runtime::builder(config)
        .host(Arc::new(ConsoleHost::new(&args.download_dir)))
        .build()
        .await?;
    let screen = runtime.load_screen(&args.screen)?;
    let report = runtime
        .dispatcher()
        .dispatch_screen(&screen, &args.handler, payload)
        .await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("Invocation: {}", report.invocation_id);
            let phases: Vec<String> = report.phases.iter().map(|p| format!("{p:?}")).collect();
            println!("Phases:     {}", phases.join(" -> "));
            println!("Outcome:    {}", serde_json::to_string(&report.outcome)?);
        }
    }
    runtime.shutdown().await;
    Ok(())
}

fn check(config: &WeftConfig, screen: &Path, format: &OutputFormat) -> anyhow::Result<()> {
    let dispatcher_config = config.dispatcher_config();
    let registry = config.registry();
    let raw = std::fs::read_to_string(screen)
        .with_context(|| format!("reading {}", screen.display()))?;
    let schema = weft_core::Screen::from_json(&raw)?;
    let findings = check_screen(&schema, &registry, &dispatcher_config);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&findings)?),
        OutputFormat::Text => {
            if findings.is_empty() {
                println!("{} handlers OK", schema.handlers.len());
            }
            for finding in &findings {
                println!("  {}: {}", finding.handler, finding.message);
            }
        }
    }
    if findings.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} problem(s) found", findings.len())
    }
}

async fn queue(config: WeftConfig, args: &QueueArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let runtime = Runtime::builder(config).build().await?;
    let offline = Arc::clone(runtime.offline());

    match &args.command {
        QueueCommand::List => {
            let pending = offline.pending().await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&pending)?),
                OutputFormat::Text => {
                    println!("Pending: {}", pending.len());
                    for event in &pending {
                        println!(
                            "  {id} | {kind:?} | {ds} | {op}",
                            id = event.id,
                            kind = event.kind,
                            ds = event.ds_id,
                            op = event
                                .operation
                                .as_deref()
                                .or(event.method.map(|m| m.as_str()))
                                .unwrap_or("-"),
                        );
                    }
                }
            }
        }
        QueueCommand::Replay => {
            let report = offline.replay_queue().await?;
            match (report, format) {
                (None, _) => println!("Replay already in progress or queue disabled"),
                (Some(r), OutputFormat::Json) => println!(
                    "{}",
                    serde_json::json!({"succeeded": r.succeeded, "failed": r.failed})
                ),
                (Some(r), OutputFormat::Text) => {
                    println!("Replayed: {} succeeded, {} failed", r.succeeded, r.failed);
                }
            }
        }
        QueueCommand::Clear => {
            offline.clear_queue().await?;
            println!("Queue cleared");
        }
    }
    runtime.shutdown().await;
    Ok(())
}
