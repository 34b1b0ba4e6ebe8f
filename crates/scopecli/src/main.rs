// crates/scopecli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use scopecore::{EventSubprocessDefinition, ProcessInstanceId, ProcessModel, RuntimeEvent};
use scoperuntime::{
    EngineConfig, Execution, ExecutionFilter, ProcessDefinition, ProcessEngine, SubscriptionFilter,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "scope")]
#[command(about = "Scope runtime CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script of commands against a process model
    Run {
        /// Path to process model JSON file
        #[arg(short, long)]
        model: PathBuf,

        /// Path to script JSON file
        #[arg(short, long)]
        script: PathBuf,

        /// Engine configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a process model file
    Validate {
        /// Path to process model JSON file
        file: PathBuf,
    },

    /// Create an example process model
    Init {
        /// Output file path
        #[arg(short, long, default_value = "process.json")]
        output: PathBuf,
    },
}

/// A scripted run: steps are applied in order to one instance
#[derive(Debug, Deserialize)]
struct Script {
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Step {
    Start,
    /// Complete the open task at `node`
    Complete { node: String },
    /// Deliver a message, from the open task at `at` or correlated instance-wide
    Message {
        name: String,
        #[serde(default)]
        at: Option<String>,
    },
    Suspend,
    Activate,
    Cancel,
    Expect {
        #[serde(default)]
        executions: Option<usize>,
        #[serde(default)]
        subscriptions: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            model,
            script,
            config,
            verbose,
        } => {
            // Initialize logging
            if verbose {
                tracing_subscriber::fmt()
                    .with_max_level(tracing::Level::DEBUG)
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_max_level(tracing::Level::WARN)
                    .init();
            }

            run_script(&model, &script, config.as_deref()).await?;
        }

        Commands::Validate { file } => {
            validate_model(&file)?;
        }

        Commands::Init { output } => {
            create_example_model(&output)?;
        }
    }

    Ok(())
}

fn load_model(file: &Path) -> Result<ProcessModel> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("reading model {}", file.display()))?;
    let model: ProcessModel = serde_json::from_str(&json)?;
    Ok(model)
}

fn load_config(file: Option<&Path>) -> Result<EngineConfig> {
    let Some(file) = file else {
        return Ok(EngineConfig::default());
    };
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("reading config {}", file.display()))?;
    Ok(serde_json::from_str(&json)?)
}

async fn run_script(model_file: &Path, script_file: &Path, config: Option<&Path>) -> Result<()> {
    let model = load_model(model_file)?;
    let json = std::fs::read_to_string(script_file)
        .with_context(|| format!("reading script {}", script_file.display()))?;
    let script: Script = serde_json::from_str(&json)?;

    let engine = ProcessEngine::with_config(load_config(config)?);
    let definition = engine.deploy(&model).await?;
    println!(
        "Deployed '{}' v{} from {}",
        definition.key(),
        definition.version(),
        model_file.display()
    );

    let mut events = engine.subscribe_events();
    let mut instance: Option<ProcessInstanceId> = None;

    for (index, step) in script.steps.iter().enumerate() {
        println!();
        println!("[{}] {:?}", index + 1, step);

        match step {
            Step::Start => {
                instance = Some(engine.start_instance(definition.key()).await?);
            }
            Step::Complete { node } => {
                let task = open_task(&engine, current(instance)?, node).await?;
                engine.complete_leaf(task.id).await?;
            }
            Step::Message { name, at: Some(node) } => {
                let task = open_task(&engine, current(instance)?, node).await?;
                engine.message_event_received(name, task.id).await?;
            }
            Step::Message { name, at: None } => {
                engine.correlate_message(name, current(instance)?).await?;
            }
            Step::Suspend => engine.suspend_instance(current(instance)?).await?,
            Step::Activate => engine.activate_instance(current(instance)?).await?,
            Step::Cancel => engine.cancel_instance(current(instance)?).await?,
            Step::Expect {
                executions,
                subscriptions,
            } => {
                let id = current(instance)?;
                let actual_executions = engine
                    .count_executions(&ExecutionFilter {
                        process_instance_id: Some(id),
                        ..ExecutionFilter::default()
                    })
                    .await;
                let actual_subscriptions = engine
                    .count_subscriptions(&SubscriptionFilter {
                        process_instance_id: Some(id),
                        ..SubscriptionFilter::default()
                    })
                    .await;
                if executions.is_some_and(|n| n != actual_executions) {
                    bail!(
                        "expected {:?} executions, found {}",
                        executions,
                        actual_executions
                    );
                }
                if subscriptions.is_some_and(|n| n != actual_subscriptions) {
                    bail!(
                        "expected {:?} subscriptions, found {}",
                        subscriptions,
                        actual_subscriptions
                    );
                }
                println!("  ok");
            }
        }

        while let Ok(event) = events.try_recv() {
            print_event(&event);
        }
        if let Some(id) = instance {
            print_tree(&engine, id).await;
        }
    }

    Ok(())
}

fn current(instance: Option<ProcessInstanceId>) -> Result<ProcessInstanceId> {
    instance.context("no instance started; add a \"start\" step first")
}

async fn open_task(
    engine: &ProcessEngine,
    instance: ProcessInstanceId,
    node: &str,
) -> Result<Execution> {
    let filter = ExecutionFilter {
        process_instance_id: Some(instance),
        ..ExecutionFilter::tasks(Some(node))
    };
    match engine.single_execution(&filter).await {
        Some(task) => Ok(task),
        None => bail!("no single open task at '{}'", node),
    }
}

fn print_event(event: &RuntimeEvent) {
    match event {
        RuntimeEvent::InstanceStarted { instance_id, .. } => {
            println!("  started {}", instance_id);
        }
        RuntimeEvent::InstanceEnded { outcome, .. } => {
            println!("  instance ended ({:?})", outcome);
        }
        RuntimeEvent::EventSubprocessTriggered {
            activity,
            interrupting,
            ..
        } => {
            let mode = if *interrupting {
                "interrupting"
            } else {
                "non-interrupting"
            };
            println!("  triggered '{}' ({})", activity, mode);
        }
        RuntimeEvent::SubscriptionCreated { trigger, .. } => {
            println!("  + subscription {}", trigger);
        }
        RuntimeEvent::SubscriptionRemoved { trigger, .. } => {
            println!("  - subscription {}", trigger);
        }
        _ => {}
    }
}

async fn print_tree(engine: &ProcessEngine, instance: ProcessInstanceId) {
    let executions = engine
        .executions(&ExecutionFilter {
            process_instance_id: Some(instance),
            ..ExecutionFilter::default()
        })
        .await;
    if executions.is_empty() {
        println!("  (instance {} has ended)", instance);
        return;
    }

    let by_id: HashMap<_, _> = executions.iter().map(|e| (e.id, e)).collect();
    for execution in &executions {
        let mut depth = 0;
        let mut parent = execution.parent_id;
        while let Some(id) = parent {
            depth += 1;
            parent = by_id.get(&id).and_then(|p| p.parent_id);
        }
        println!(
            "  {}{} [{:?}, {:?}]",
            "  ".repeat(depth),
            execution.node,
            execution.role,
            execution.state
        );
    }

    let subscriptions = engine
        .subscriptions(&SubscriptionFilter {
            process_instance_id: Some(instance),
            ..SubscriptionFilter::default()
        })
        .await;
    for sub in subscriptions {
        println!("  ~ {} -> '{}'", sub.trigger, sub.activity);
    }
}

fn validate_model(file: &Path) -> Result<()> {
    println!("Validating process model: {}", file.display());

    let model = load_model(file)?;
    let definition = ProcessDefinition::compile(&model, 1)?;
    let event_sub_processes = model
        .nodes
        .iter()
        .filter(|n| n.kind.event_sub_process().is_some())
        .count();

    println!("Process model is valid:");
    println!("   Key: {}", definition.key());
    if let Some(name) = definition.name() {
        println!("   Name: {}", name);
    }
    println!("   Nodes: {}", model.nodes.len());
    println!("   Flows: {}", model.flows.len());
    println!("   Event sub-processes: {}", event_sub_processes);

    Ok(())
}

fn create_example_model(output: &Path) -> Result<()> {
    use scopecore::NodeSpec;

    let mut model = ProcessModel::new("process").with_name("Order with cancellation");
    model.chain([
        NodeSpec::start_event("theStart"),
        NodeSpec::user_task("task").with_name("Handle order"),
        NodeSpec::end_event("theEnd"),
    ]);
    model.add_node(
        NodeSpec::event_sub_process(
            "eventSubProcess",
            EventSubprocessDefinition::message("newMessage"),
        )
        .with_name("Cancellation"),
    );
    model.chain([
        NodeSpec::start_event("eventSubProcessStart").within("eventSubProcess"),
        NodeSpec::user_task("eventSubProcessTask").within("eventSubProcess"),
        NodeSpec::end_event("eventSubProcessEnd").within("eventSubProcess"),
    ]);

    let json = serde_json::to_string_pretty(&model)?;
    std::fs::write(output, json)?;

    println!("Created example process model: {}", output.display());
    println!();
    println!("Validate it with:");
    println!("  scope validate {}", output.display());

    Ok(())
}
