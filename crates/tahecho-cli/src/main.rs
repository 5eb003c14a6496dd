//! tahecho - conversational Jira assistant CLI

mod commands;
mod config;
mod executors;
mod jira;

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tahecho_agent::{
    CheckpointStore, EventSink, FileCheckpointStore, LanguageModel, MemoryCheckpointStore,
    Orchestrator, ProviderModel, TracingSink, WorkflowConfig, WorkflowEvent,
};
use tahecho_ai::{Model, Provider, providers::openai::OpenAIProvider};
use tracing_subscriber::EnvFilter;

/// tahecho - conversational Jira assistant
#[derive(Parser, Debug)]
#[command(name = "tahecho")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run in non-interactive mode with a single message
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Continue a conversation by id
    #[arg(short, long, conflicts_with = "ephemeral")]
    id: Option<String>,

    /// Run without a conversation id; nothing is loaded or saved
    #[arg(long)]
    ephemeral: bool,

    /// Model to use (default: gpt-4o)
    #[arg(short, long)]
    model: Option<String>,

    /// Print workflow steps to stderr as they run
    #[arg(long)]
    steps: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// List stored conversations
    #[arg(long)]
    conversations: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("tahecho=debug,tahecho_agent=debug,tahecho_ai=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn checkpoint_dir(cfg: &config::Config) -> PathBuf {
    cfg.checkpoint
        .dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(FileCheckpointStore::default_dir)
}

fn build_store(cfg: &config::Config) -> Arc<dyn CheckpointStore> {
    match cfg.checkpoint.backend.as_deref() {
        Some("memory") => Arc::new(MemoryCheckpointStore::new()),
        _ => Arc::new(FileCheckpointStore::new(checkpoint_dir(cfg))),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();
    let store = build_store(&cfg);

    // List conversations and exit
    if args.conversations {
        return list_conversations(store.as_ref(), &checkpoint_dir(&cfg)).await;
    }

    // Merge config with CLI args (CLI takes precedence)
    let provider = Provider::parse(cfg.provider.as_deref().unwrap_or("openai"));
    let model_id = args
        .model
        .or(cfg.model.clone())
        .unwrap_or_else(|| "gpt-4o".to_string());

    let mut model = Model::new(provider, model_id);
    if let Some(ref base_url) = cfg.base_url {
        model = model.with_base_url(base_url);
    }
    if let Some(max_tokens) = cfg.max_tokens {
        model.max_tokens = max_tokens;
    }

    let llm = match (provider.api_key_env_var(), cfg.get_api_key(provider)) {
        (_, Some(key)) => OpenAIProvider::new(key),
        (None, None) => OpenAIProvider::without_key(),
        (Some(var), None) => {
            eprintln!("Error: No API key found for {}", provider.name());
            eprintln!();
            eprintln!("Set your API key with: export {}=your-key", var);
            eprintln!("Or add it to config file: tahecho --init-config");
            std::process::exit(1);
        }
    };

    let language_model: Arc<dyn LanguageModel> =
        Arc::new(ProviderModel::new(Arc::new(llm), model.clone()));
    let registry = executors::build_registry(&cfg, Arc::clone(&language_model));

    let workflow_config = WorkflowConfig {
        temperature: cfg.temperature.unwrap_or(0.1),
        retention: cfg.retention.policy(),
    };

    let (sink, printer): (Arc<dyn EventSink>, _) = if args.steps {
        let (tx, rx) = tokio::sync::broadcast::channel(64);
        (Arc::new(tx), Some(tokio::spawn(print_steps(rx))))
    } else {
        (Arc::new(TracingSink), None)
    };

    let orchestrator =
        Orchestrator::new(workflow_config, language_model, registry, store).with_sink(sink);

    let conversation_id = if args.ephemeral {
        None
    } else {
        Some(args.id.unwrap_or_else(new_conversation_id))
    };

    if let Some(message) = args.command {
        let answer = orchestrator
            .run(&message, conversation_id.as_deref())
            .await;
        println!("{}", answer);
    } else {
        run_interactive(&orchestrator, &model, conversation_id, args.ephemeral).await?;
    }

    // Dropping the orchestrator closes the event channel
    drop(orchestrator);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    Ok(())
}

fn new_conversation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

async fn run_interactive(
    orchestrator: &Orchestrator,
    model: &Model,
    mut conversation_id: Option<String>,
    ephemeral: bool,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    // Show minimal startup info (only if TTY)
    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        match conversation_id {
            Some(ref id) => eprintln!("tahecho ({}) conversation: {}", model.id, id),
            None => eprintln!("tahecho ({}) ephemeral", model.id),
        }
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(result) = commands::execute_command(input) {
            match result {
                commands::CommandResult::NewConversation => {
                    if !ephemeral {
                        conversation_id = Some(new_conversation_id());
                    }
                    match conversation_id {
                        Some(ref id) => println!("Started conversation {}", id),
                        None => println!("Started a new ephemeral conversation."),
                    }
                }
                commands::CommandResult::ShowId => match conversation_id {
                    Some(ref id) => println!("{}", id),
                    None => println!("This conversation is not persisted."),
                },
                commands::CommandResult::Message(msg) => println!("{}", msg),
                commands::CommandResult::Exit => break,
                commands::CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}. Type /help for available commands.", cmd);
                }
            }
            continue;
        }

        let answer = orchestrator.run(input, conversation_id.as_deref()).await;
        println!("{}\n", answer);
    }

    Ok(())
}

async fn print_steps(mut rx: tokio::sync::broadcast::Receiver<WorkflowEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(line) = describe_event(&event) {
                    eprintln!("  · {}", line);
                }
            }
            Err(RecvError::Lagged(n)) => eprintln!("  · ({} events skipped)", n),
            Err(RecvError::Closed) => break,
        }
    }
}

fn describe_event(event: &WorkflowEvent) -> Option<String> {
    match event {
        WorkflowEvent::TurnStart { resumed: true, .. } => Some("resumed conversation".into()),
        WorkflowEvent::TurnStart { .. } | WorkflowEvent::StepStart { .. } => None,
        WorkflowEvent::StepEnd { step, output } => Some(format!("{}: {}", step.as_str(), output)),
        WorkflowEvent::Classified {
            task_type,
            reasoning,
            ..
        } => Some(format!("task: {} ({})", task_type, reasoning)),
        WorkflowEvent::ExecutorFinished { executor, is_error } => Some(format!(
            "{} {}",
            executor,
            if *is_error { "failed" } else { "finished" }
        )),
        WorkflowEvent::CheckpointFailed { operation, message } => {
            Some(format!("checkpoint {} failed: {}", operation, message))
        }
        WorkflowEvent::TurnEnd { .. } => None,
    }
}

async fn list_conversations(store: &dyn CheckpointStore, dir: &Path) -> anyhow::Result<()> {
    match store.list().await {
        Ok(conversations) => {
            if conversations.is_empty() {
                println!("No saved conversations found.");
                println!(
                    "Conversations are stored in: {}",
                    dir.display()
                );
            } else {
                println!("Saved conversations:\n");
                println!("{:<38} {:<20} {:<8}", "ID", "Updated", "Msgs");
                println!("{}", "-".repeat(68));
                for c in conversations {
                    let updated = chrono::DateTime::from_timestamp_millis(c.updated_at)
                        .map(|t| {
                            t.with_timezone(&chrono::Local)
                                .format("%Y-%m-%d %H:%M")
                                .to_string()
                        })
                        .unwrap_or_else(|| "unknown".to_string());
                    println!("{:<38} {:<20} {:<8}", c.conversation_id, updated, c.message_count);
                }
                println!("\nContinue with: tahecho --id <conversation-id>");
            }
        }
        Err(e) => {
            eprintln!("Error listing conversations: {}", e);
        }
    }
    Ok(())
}
