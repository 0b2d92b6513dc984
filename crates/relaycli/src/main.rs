// crates/relaycli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relaycore::{Carrier, ExecutionEvent, NodeSpec, Workflow};
use relayruntime::{NodeRegistry, Runtime, RuntimeConfig, WorkflowBuilder};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Signal dataflow runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial task text for the start node
        #[arg(short, long)]
        input: Option<String>,

        /// Give up after this many seconds
        #[arg(short, long, default_value_t = 300)]
        timeout: u64,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node kinds
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    relaynodes::register_all(&mut registry);
    registry
}

fn load(file: &Path) -> Result<Workflow> {
    debug!(file = %file.display(), "loading workflow");
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let workflow = serde_json::from_str(&json)
        .with_context(|| format!("parsing {}", file.display()))?;
    Ok(workflow)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            timeout,
            verbose,
        } => {
            init_logging(verbose);
            run_workflow(&file, input, Duration::from_secs(timeout), verbose).await?;
        }

        Commands::Validate { file } => {
            init_logging(false);
            validate_workflow(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

async fn run_workflow(file: &Path, input: Option<String>, timeout: Duration, verbose: bool) -> Result<()> {
    let workflow = load(file)?;
    eprintln!("🚀 Workflow: {} ({} nodes)", workflow.name, workflow.nodes.len());

    let runtime = Runtime::with_config(RuntimeConfig::default().with_settings(&workflow.settings));
    let registry = registry();
    let handle = WorkflowBuilder::new(&registry).build(&workflow, &runtime)?;

    // Progress goes to stderr so stdout stays clean for writer nodes.
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::SignalReceived { node_id, node_type, .. } if verbose => {
                    eprintln!("  ⚡ {node_id} ({node_type}) received a signal");
                }
                ExecutionEvent::NodeCompleted { node_id, status, .. } if verbose => {
                    eprintln!("  ✅ {node_id} reported {status}");
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    eprintln!("  ❌ {node_id} failed: {error}");
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    relaycore::NodeEvent::Info { message } if verbose => {
                        eprintln!("     ℹ️  [{node_id}] {message}");
                    }
                    relaycore::NodeEvent::Warning { message } => {
                        eprintln!("     ⚠️  [{node_id}] {message}");
                    }
                    _ => {}
                },
                ExecutionEvent::WorkflowCompleted { .. } => break,
                _ => {}
            }
        }
    });

    let task = input.map(Carrier::from_text).unwrap_or_else(Carrier::empty);
    let outcome = handle.run(task, timeout).await;
    runtime.complete();
    let _ = event_task.await;

    let result = outcome?;
    eprintln!();
    eprintln!("📊 Finished in {}ms", result.duration_ms);
    let mut ids: Vec<_> = result.states.keys().collect();
    ids.sort();
    for id in ids {
        let state = &result.states[id];
        eprintln!(
            "   {id}: {} ({} reports, {} failures)",
            state.status, state.completed, state.failures
        );
    }

    if !result.is_success() {
        for (id, error) in result.failures() {
            eprintln!("💥 {id}: {error}");
        }
        anyhow::bail!("workflow '{}' had failing nodes", workflow.name);
    }
    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load(file)?;
    let registry = registry();
    let order = WorkflowBuilder::new(&registry).validate(&workflow)?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!("   Build order: {}", order.join(" → "));

    Ok(())
}

fn list_nodes() {
    println!("📦 Available node kinds:");
    println!();

    let registry = registry();
    for kind in registry.list_kinds() {
        let Some(metadata) = registry.get_metadata(&kind) else {
            println!("  • {kind}");
            continue;
        };
        println!("  • {} ({})", kind, metadata.category);
        println!("    {}", metadata.description);
        for field in &metadata.config {
            let marker = if field.required { "required" } else { "optional" };
            println!("      {} [{}]: {}", field.name, marker, field.description);
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = Workflow::new("Shout paragraphs", "read");
    workflow.description =
        Some("Reads stdin, uppercases every paragraph concurrently and prints the result".to_string());

    let read = workflow.add_node(NodeSpec::new("read", "reader").with_name("Read stdin"));
    let split = workflow.add_node(
        NodeSpec::new("shout", "partition")
            .with_name("Uppercase paragraphs")
            .with_config("strategy", "paragraph")
            .with_config("op", "upper"),
    );
    let write = workflow.add_node(NodeSpec::new("write", "writer").with_name("Print result"));

    workflow.connect(read, split.clone());
    workflow.connect(split, write);

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  echo 'hello' | relay run --file {}", output.display());

    Ok(())
}
