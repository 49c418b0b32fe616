// crates/flowcli/src/main.rs

mod script;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{ActionSpec, ActionsSpec, FlowEvent, FlowOutcome, FlowSpec, HookSpec, ScenarioDefinition};
use flowmachine::{FlowCatalog, Machine, MachineConfig};
use script::{parse_script, play, Ending};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow state machine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file
    Run {
        /// Path to scenario JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Control timeline, e.g. "suspend@50,resume@1050,emit:stop@3000,cancel@4000"
        #[arg(short, long)]
        script: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a scenario file
    Validate {
        /// Path to scenario JSON file
        file: PathBuf,
    },

    /// List available action types
    Actions,

    /// Create the demo scenario
    Init {
        /// Output file path
        #[arg(short, long, default_value = "scenario.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file, script, verbose } => {
            let default_level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new(default_level)),
                )
                .init();

            run_scenario(&file, script.as_deref()).await?;
        }

        Commands::Validate { file } => {
            validate_scenario(&file)?;
        }

        Commands::Actions => {
            list_actions();
        }

        Commands::Init { output } => {
            create_demo_scenario(&output)?;
        }
    }

    Ok(())
}

fn load_catalog(file: &Path) -> Result<FlowCatalog> {
    let registry = Arc::new(flowactions::standard_registry());
    FlowCatalog::load(file, registry).with_context(|| format!("cannot load {}", file.display()))
}

async fn run_scenario(file: &Path, script: Option<&str>) -> Result<()> {
    println!("🚀 Loading scenario from: {}", file.display());

    let steps = script.map(parse_script).transpose()?.unwrap_or_default();
    let catalog = load_catalog(file)?;
    let scenario = catalog.scenario();

    println!("📋 Scenario: {}", scenario.name);
    println!("   Flows: {}", scenario.flows.len());
    println!("   Entry: {}", scenario.entry);
    println!();

    let machine = Machine::with_config(MachineConfig::default());
    let mut events = machine.subscribe_events();

    let origin = Instant::now();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let ms = origin.elapsed().as_millis();
            match event {
                FlowEvent::Switched { flow, .. } => {
                    println!("[{:>5}ms] 🔀 Switched to {}", ms, flow);
                }
                FlowEvent::FlowLaunched { flow, .. } => {
                    println!("[{:>5}ms] ▶️  Flow {} launched", ms, flow);
                }
                FlowEvent::ActionStarted { action, .. } => {
                    println!("[{:>5}ms]   ⚡ Starting action: {}", ms, action);
                }
                FlowEvent::ActionSettled { action, duration_ms, .. } => {
                    println!("[{:>5}ms]   ✅ Action {} settled in {}ms", ms, action, duration_ms);
                }
                FlowEvent::ActionFailed { action, error, .. } => {
                    println!("[{:>5}ms]   ❌ Action {} failed: {}", ms, action, error);
                }
                FlowEvent::ActionDetached { action, .. } => {
                    println!("[{:>5}ms]   🪂 Action {} detached", ms, action);
                }
                FlowEvent::FlowFinished { flow, outcome, duration_ms, .. } => {
                    let mark = match outcome {
                        FlowOutcome::Completed => "✨",
                        FlowOutcome::Cancelled => "🛑",
                        FlowOutcome::Transitioned => "➡️ ",
                    };
                    println!("[{:>5}ms] {} Flow {} {:?} after {}ms", ms, mark, flow, outcome, duration_ms);
                }
                FlowEvent::Deferred { flow, .. } => {
                    println!("[{:>5}ms] ⏳ Switch to {} deferred until resume", ms, flow);
                }
                FlowEvent::Suspended { flow, .. } => {
                    println!("[{:>5}ms] ⏸️  Suspended {}", ms, flow);
                }
                FlowEvent::Resumed { flow, .. } => {
                    println!("[{:>5}ms] ⏯️  Resumed {}", ms, flow);
                }
                FlowEvent::Cancelled { flow, .. } => {
                    println!("[{:>5}ms] 🛑 Cancelled {}", ms, flow);
                }
                FlowEvent::Signalled { flow, signal, .. } => {
                    println!("[{:>5}ms] 📣 Signal {} sent to {}", ms, signal, flow);
                }
            }
        }
    });

    machine.switch_to(catalog.entry()?);
    let ending = play(&machine, &steps, origin).await;

    // Wait for events to finish printing
    sleep(Duration::from_millis(100)).await;
    event_task.abort();

    println!();
    println!("📊 Run Summary:");
    println!("   Final flow: {}", machine.current_state_name());
    println!("   Cancelled: {}", machine.is_cancelled());
    println!("   Elapsed: {}ms", origin.elapsed().as_millis());
    if ending == Ending::Suspended {
        println!("   ⏸️  Script ended with the machine suspended");
    }
    if machine.has_deferred() {
        println!("   ⚠️  A switch is still parked behind a suspended flow");
    }

    Ok(())
}

fn validate_scenario(file: &Path) -> Result<()> {
    println!("🔍 Validating scenario: {}", file.display());

    let catalog = load_catalog(file)?;
    let scenario = catalog.scenario();

    println!("✅ Scenario is valid:");
    println!("   Name: {}", scenario.name);
    println!("   Flows: {}", scenario.flows.len());
    println!("   Entry: {}", scenario.entry);

    let unreachable = catalog.unreachable_flows();
    if !unreachable.is_empty() {
        println!("⚠️  Unreachable from entry: {}", unreachable.join(", "));
    }

    Ok(())
}

fn list_actions() {
    println!("📦 Available Action Types:");
    println!();

    let registry = flowactions::standard_registry();

    for action_type in registry.list_action_types() {
        if let Some(metadata) = registry.get_metadata(&action_type) {
            println!("  • {} ({})", action_type, metadata.category);
            println!("    {}", metadata.description);
            for option in &metadata.options {
                let required = if option.required { " (required)" } else { "" };
                println!("      - {}{}: {}", option.name, required, option.description);
            }
        } else {
            println!("  • {}", action_type);
        }
    }
}

fn delay(ms: u64) -> ActionSpec {
    ActionSpec::new("time.delay")
        .with_name(format!("delay {}ms", ms))
        .with_config("delay_ms", ms)
}

fn create_demo_scenario(output: &Path) -> Result<()> {
    let mut scenario = ScenarioDefinition::new("Demo", "flow1");
    scenario.description =
        Some("Two delays in sequence, then two parallel sequences".to_string());

    scenario
        .add_flow(
            FlowSpec::new("flow1")
                .with_before(HookSpec::message("Start Flow1"))
                .with_actions(ActionsSpec::Sequence(vec![delay(400), delay(500)]))
                .with_after(HookSpec::message("Flow1 done").with_next("flow2")),
        )
        .add_flow(
            FlowSpec::new("flow2")
                .with_before(HookSpec::message("Start Flow2"))
                .with_actions(ActionsSpec::Parallel(vec![
                    vec![delay(1000), delay(1500)],
                    vec![delay(500), delay(2500)],
                ]))
                .with_after(HookSpec::message("Flow2 done"))
                .with_signal("restart", "flow1"),
        );

    scenario.save(output)?;

    println!("✨ Created demo scenario: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  flow run --file {} --script \"suspend@1000,resume@2000,emit:restart@3500,cancel@5000\"",
        output.display()
    );

    Ok(())
}
