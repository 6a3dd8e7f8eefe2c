use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use hri::config::Config;
use hri::core::TaskGraph;
use hri::orchestration::OrchestrationBuilder;
use hri::sim::{hri_agents, hri_tasks, ConsoleAgent, ListenMode, SimRobot};
use hri::{hlog, hlog_warn, Result};

/// Time the runtime gets to wind down detached workers and blocking reads.
const RUNTIME_SHUTDOWN: Duration = Duration::from_millis(500);

/// hri - perceive-think-act task orchestration
#[derive(Parser, Debug)]
#[command(name = "hri")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    HRI_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.hri/hri.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (defaults to ~/.hri/hri.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the simulated capture -> listen -> plan -> act loop
    Run {
        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,

        /// Instructions separated by ';' (reads stdin when omitted)
        #[arg(long)]
        script: Option<String>,

        /// Drain on the first task failure
        #[arg(long)]
        fail_fast: bool,
    },

    /// Validate the task graph and print its order and channel routes
    Graph {
        /// Schedule the instruction source as a continuous task
        #[arg(long)]
        continuous: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    hri::log::init_with_debug(cli.debug);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Run {
            cycles,
            script,
            fail_fast,
        } => run_loop(config, cycles, script, fail_fast),
        Command::Graph { continuous } => print_graph(continuous),
    }
}

fn run_loop(mut config: Config, cycles: Option<u64>, script: Option<String>, fail_fast: bool) -> Result<()> {
    if cycles.is_some() {
        config.max_cycles = cycles;
    }
    config.fail_fast |= fail_fast;

    let shutdown = CancellationToken::new();
    let (console, listen) = match &script {
        Some(script) => (
            Arc::new(ConsoleAgent::from_script("audio_agent", script)),
            ListenMode::PerCycle,
        ),
        None => {
            println!("Type instructions, one per line (ctrl-d or ctrl-c to stop).");
            (
                Arc::new(ConsoleAgent::stdin("audio_agent").with_shutdown(shutdown.clone())),
                ListenMode::Continuous,
            )
        }
    };
    let robot = Arc::new(SimRobot::new("robot").with_settle(Duration::from_millis(20)));

    hlog!(
        "Run command: cycles={:?}, scripted={}, fail_fast={}",
        config.max_cycles,
        script.is_some(),
        config.fail_fast
    );

    let mut orchestrator = OrchestrationBuilder::new()
        .agents(hri_agents(Arc::clone(&console), Arc::clone(&robot)))
        .tasks(hri_tasks(listen))
        .config(config)
        .cancel_on_drain(shutdown)
        .build()?;

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let stop = orchestrator.stop_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                hlog_warn!("ctrl-c received, stopping");
                stop.stop();
            }
        });

        let exhausted = Arc::clone(&console);
        orchestrator
            .run(move |_cycles: u64| exhausted.is_exhausted())
            .await
    })?;
    rt.shutdown_timeout(RUNTIME_SHUTDOWN);

    println!("{}", report.to_json()?);
    println!();
    println!("  Run:     {}", report.run_id.short());
    println!("  Cycles:  {}", report.cycles);
    println!("  Stopped: {}", report.stop_reason);
    println!("  Moves:   {}", robot.moves());
    println!("  Pose:    {:?}", robot.pose());
    Ok(())
}

fn print_graph(continuous: bool) -> Result<()> {
    let listen = if continuous {
        ListenMode::Continuous
    } else {
        ListenMode::PerCycle
    };
    let graph = TaskGraph::build(hri_tasks(listen), &Default::default())?;

    println!("Cycle order:");
    for (i, name) in graph.order_names().iter().enumerate() {
        println!("  {}. {}", i + 1, name);
    }
    let continuous: Vec<&str> = graph
        .continuous_tasks()
        .map(|i| graph.task(i).name.as_str())
        .collect();
    if !continuous.is_empty() {
        println!("Continuous: {}", continuous.join(", "));
    }
    println!();
    println!("Channels:");
    for route in graph.routes() {
        println!(
            "  {:<12} producer={:<14} consumers=[{}]{}",
            route.name,
            route.producer.as_deref().unwrap_or("-"),
            route.consumers.join(", "),
            route
                .queue_reader
                .as_deref()
                .map(|r| format!(" queue -> {}", r))
                .unwrap_or_default()
        );
    }
    Ok(())
}
