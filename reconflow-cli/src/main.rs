//! Operator command line for reconflow.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use reconflow::prelude::*;
use reconflow::transport::models::CleanupSchedule;

#[derive(Parser)]
#[command(name = "reconflow")]
#[command(about = "Run reconciliation pipeline steps on a remote backend", long_about = None)]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(short, long, global = true, env = "RECONFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Pipeline graph file (JSON); defaults to the completeness graph
    #[arg(short, long, global = true)]
    graph: Option<PathBuf>,

    /// Run parameters file (JSON)
    #[arg(short, long, global = true)]
    params: Option<PathBuf>,

    /// Backend base URL, overriding the configuration
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Business date of the run (YYYY-MM-DD), overriding the parameters
    #[arg(long, global = true)]
    date: Option<String>,

    /// Use the legacy polling loop
    #[arg(long, global = true)]
    legacy: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more nodes, in order
    Run {
        /// Nodes to run
        #[arg(required = true)]
        nodes: Vec<String>,
    },

    /// Run every node of the graph
    Pipeline,

    /// Show the graph in execution order
    Graph,

    /// Probe backend health
    Health,

    /// List the steps the backend can run
    Steps,

    /// Show backend task statistics
    Stats,

    /// List recent backend tasks
    Tasks {
        /// Maximum number of tasks
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Stop a remote task by process id
    Stop {
        /// Process id returned when the task started
        process_id: String,
    },

    /// Remove finished tasks on the backend now
    Cleanup,

    /// Show or change the daily cleanup schedule
    CleanupSchedule {
        /// Hour of day (0-23)
        #[arg(long, requires = "minute")]
        hour: Option<u8>,

        /// Minute (0-59)
        #[arg(long, requires = "hour")]
        minute: Option<u8>,

        /// IANA timezone
        #[arg(long, default_value = "UTC")]
        timezone: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    let orch = create_orchestrator(&cli)?;

    tokio::select! {
        result = execute(&cli, &orch) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted, stopping active tasks...");
            orch.shutdown().await;
            std::process::exit(130);
        }
    }
}

fn create_orchestrator(cli: &Cli) -> Result<NodeOrchestrator> {
    let mut config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(url) = &cli.base_url {
        config = config.with_base_url(url.clone());
    }
    if cli.legacy {
        config = config.with_mode(PollingMode::Legacy);
    }

    let graph = match &cli.graph {
        Some(path) => PipelineGraph::from_file(path).context("loading graph")?,
        None => PipelineGraph::completeness(),
    };

    let mut parameters = match &cli.params {
        Some(path) => RunParameters::from_file(path).context("loading run parameters")?,
        None => RunParameters::default(),
    };
    if let Some(date) = &cli.date {
        parameters = parameters.with_run_date(date.clone());
    }

    let orch = NodeOrchestrator::builder(config, graph)
        .with_parameters(parameters)
        .build()?;
    Ok(orch)
}

async fn execute(cli: &Cli, orch: &NodeOrchestrator) -> Result<()> {
    match &cli.command {
        Commands::Run { nodes } => {
            let printer = spawn_event_printer(orch);
            let mut failures = 0;
            for node in nodes {
                match orch.run(node.as_str()).await {
                    Ok(output) => {
                        println!("{node}: completed");
                        println!("{}", serde_json::to_string_pretty(output.value())?);
                    }
                    Err(e) => {
                        failures += 1;
                        println!("{node}: {} ({})", e.node_status(), e);
                    }
                }
            }
            printer.abort();
            if failures > 0 {
                anyhow::bail!("{failures} of {} nodes did not complete", nodes.len());
            }
        }

        Commands::Pipeline => {
            let printer = spawn_event_printer(orch);
            let summary = orch.run_pipeline().await;
            printer.abort();

            println!("\nPipeline finished in {:.0}ms", summary.duration_ms);
            for node in orch.graph().topological_order() {
                let status = summary.statuses.get(&node).copied().unwrap_or_default();
                let (node, status) = (node.as_str(), status.to_string());
                match summary.errors.get(node) {
                    Some(error) => println!("  {node:<36} {status:<10} {error}"),
                    None => println!("  {node:<36} {status}"),
                }
            }
            if !summary.success() {
                anyhow::bail!("{} nodes did not complete", summary.failed().len());
            }
        }

        Commands::Graph => {
            let graph = orch.graph();
            for node in graph.topological_order() {
                let deps: Vec<_> = graph.dependencies(&node).iter().map(NodeId::as_str).collect();
                if deps.is_empty() {
                    println!("{node}");
                } else {
                    println!("{node} <- {}", deps.join(", "));
                }
            }
        }

        Commands::Health => {
            let healthy = orch.health().await;
            let state = orch.health_state();
            println!(
                "{} (checked {})",
                if healthy { "healthy" } else { "unhealthy" },
                state.last_checked_at.map_or_else(|| "never".to_string(), |t| t.to_rfc3339()),
            );
            if !healthy {
                anyhow::bail!("backend at {} is unhealthy", orch.config().base_url);
            }
        }

        Commands::Steps => print_json(&orch.client().steps().await?)?,
        Commands::Stats => print_json(&orch.client().stats().await?)?,
        Commands::Tasks { limit } => print_json(&orch.client().tasks(*limit).await?)?,
        Commands::Stop { process_id } => print_json(&orch.client().stop(process_id).await?)?,
        Commands::Cleanup => print_json(&orch.client().cleanup_now().await?)?,

        Commands::CleanupSchedule { hour, minute, timezone } => {
            let info = match (hour, minute) {
                (Some(hour), Some(minute)) => {
                    let schedule = CleanupSchedule {
                        hour: *hour,
                        minute: *minute,
                        timezone: timezone.clone(),
                    };
                    orch.client().set_cleanup_schedule(&schedule).await?
                }
                _ => orch.client().cleanup_schedule().await?,
            };
            print_json(&info)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn spawn_event_printer(orch: &NodeOrchestrator) -> tokio::task::JoinHandle<()> {
    let mut events = orch.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let record = &event.record;
                    let status = record.display_status();
                    match (status, record.retry_attempt) {
                        (NodeStatus::Retrying, Some(retry)) => {
                            eprintln!("[{}] retrying (network retry {retry})", event.node_id);
                        }
                        (NodeStatus::Running, _) if record.attempts > 0 => eprintln!(
                            "[{}] running (check {}, remote {})",
                            event.node_id,
                            record.attempts,
                            record.remote_status.as_deref().unwrap_or("-"),
                        ),
                        _ => eprintln!("[{}] {status}", event.node_id),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
