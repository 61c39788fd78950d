//! Stageflow CLI
//!
//! Quality-gated workflow orchestration from the command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stageflow::config::{self, TrackerKind};
use stageflow::hooks::{merged_output, HookContext, HookDispatcher, HookEvent};
use stageflow::session::{MemoryTracker, ScudTracker, SessionManager, SignalHandler, Tracker};
use stageflow::workflow::{
    CommandStageHandler, FileCheckpointStore, HeuristicEstimator, WorkflowExecutor,
    WorkflowStatus, WorkflowValidator,
};
use stageflow::{classify, CheckpointStore, Config, Error, Result};

#[derive(Parser)]
#[command(name = "stageflow")]
#[command(author, version, about = "Quality-gated workflow orchestration")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "STAGEFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a task description
    Classify {
        /// Task description
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a profile against a task description
    Validate {
        /// Profile name
        #[arg(long, short)]
        profile: String,

        /// Skip the check
        #[arg(long)]
        force: bool,

        /// Task description
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Run a workflow
    Run {
        /// Profile name
        #[arg(long, short)]
        profile: String,

        /// Run even if the profile looks wrong for the task
        #[arg(long)]
        force: bool,

        /// Session to record the run in
        #[arg(long)]
        session: Option<String>,

        /// Task description
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Resume a paused or interrupted workflow
    Resume {
        /// Workflow ID
        id: String,
    },

    /// Pause a workflow at its last checkpoint
    Pause {
        /// Workflow ID
        id: String,
    },

    /// Show workflow status
    Status {
        /// Workflow ID
        id: String,
    },

    /// List workflows
    List {
        /// Only Running and Paused workflows
        #[arg(long)]
        resumable: bool,
    },

    /// Session management
    Session {
        #[command(subcommand)]
        action: SessionCommands,
    },

    /// Hook management
    Hooks {
        #[command(subcommand)]
        action: HookCommands,
    },

    /// List workflow profiles
    Profiles,

    /// Initialize the state directory
    Init,

    /// Show current configuration
    Config,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Start a session and hydrate the tracker
    Start,

    /// End a session and pull tracker status
    End {
        /// Session ID
        id: String,
    },

    /// Submit a prompt and print the merged hook context
    Prompt {
        /// Session ID
        id: String,

        /// Prompt text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
}

#[derive(Subcommand)]
enum HookCommands {
    /// List active hooks per event
    List,

    /// Fire an event by hand
    Fire {
        /// Event name (e.g. PostToolUse)
        event: String,

        /// Tool name
        #[arg(long)]
        tool: Option<String>,

        /// Affected file (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,

        /// Prompt text
        #[arg(long)]
        prompt: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Classify { text, json } => {
            let result = classify(&text.join(" "));
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                match result.intent {
                    Some(intent) => println!("intent: {}", intent),
                    None => println!("intent: ambiguous"),
                }
                println!("confidence: {:.2}", result.confidence);
                println!("gap: {:.2}", result.gap);
            }
        }

        Commands::Validate {
            profile,
            force,
            text,
        } => {
            let validator = validator(&config);
            match validator.validate(&profile, &text.join(" "), force) {
                Some(warning) => println!("⚠ {}", warning),
                None => println!("Profile '{}' fits the task", profile),
            }
        }

        Commands::Run {
            profile,
            force,
            session,
            text,
        } => {
            let description = text.join(" ");
            if let Some(warning) = validator(&config).validate(&profile, &description, force) {
                println!("⚠ {}", warning);
            }

            let signals = SignalHandler::new(Arc::new(AtomicBool::new(false)));
            signals.install()?;

            let executor = executor(&config)?.with_interrupt(signals.interrupt_flag());
            let report = executor.run(&profile, &description).await?;

            if let Some(session_id) = session {
                let manager = session_manager(&config)?;
                manager.touch(&session_id, &report.instance.id)?;
            }

            println!("{}", report.summary());
            if report.instance.status == WorkflowStatus::Aborted {
                return Ok(ExitCode::from(2));
            }
        }

        Commands::Resume { id } => {
            let signals = SignalHandler::default();
            signals.install()?;

            let executor = executor(&config)?.with_interrupt(signals.interrupt_flag());
            let report = executor.resume(&id).await?;
            println!("{}", report.summary());
            if report.instance.status == WorkflowStatus::Aborted {
                return Ok(ExitCode::from(2));
            }
        }

        Commands::Pause { id } => {
            let instance = executor(&config)?.pause(&id)?;
            println!("{} {}", instance.id, instance.status);
        }

        Commands::Status { id } => {
            let instance = executor(&config)?.status(&id)?;
            let catalog = config.catalog();
            println!("{}", instance.summary(catalog.get(&instance.profile_name)));
        }

        Commands::List { resumable } => {
            let store = FileCheckpointStore::new(config.checkpoint_dir());
            let ids = if resumable {
                executor(&config)?.list_resumable()?
            } else {
                store.list(&[])?
            };

            for id in ids {
                match store.load(&id) {
                    Ok(instance) => println!(
                        "{} | {} | {} | {}",
                        instance.id,
                        instance.profile_name,
                        instance.status,
                        instance.updated_at.format("%Y-%m-%d %H:%M")
                    ),
                    Err(e) => warn!("Skipping {}: {}", id, e),
                }
            }
        }

        Commands::Session { action } => handle_session_command(action, &config).await?,

        Commands::Hooks { action } => handle_hook_command(action, &config).await?,

        Commands::Profiles => {
            for profile in config.catalog().iter() {
                let intents: Vec<&str> = profile.required_intents.iter().map(|i| i.name()).collect();
                println!(
                    "{:<14} {} steps  [{}]  {}",
                    profile.name,
                    profile.step_count(),
                    intents.join(", "),
                    profile.description
                );
            }
        }

        Commands::Init => {
            let dir = config::init(&config)?;
            info!("Initialized {}", dir.display());
            println!("Initialized {}", dir.display());
        }

        Commands::Config => {
            let content =
                toml::to_string_pretty(&config).map_err(|e| Error::Config(e.to_string()))?;
            println!("{}", content);
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn handle_session_command(action: SessionCommands, config: &Config) -> Result<()> {
    let manager = session_manager(config)?;

    match action {
        SessionCommands::Start => {
            let (session, report) = manager.start().await?;
            println!("{}", session.id);
            println!("{}", report.summary());
            for failure in &report.failed {
                println!("  ✗ {}: {}", failure.task_id, failure.reason);
            }
        }

        SessionCommands::End { id } => {
            let (session, report) = manager.end(&id).await?;
            println!("Session {} ended", session.id);
            println!("{}", report.summary());
            for (task_id, conflict) in &report.conflicts {
                println!("  ⚠ {}: {}", task_id, conflict);
            }
        }

        SessionCommands::Prompt { id, text } => {
            if let Some(context) = manager.submit_prompt(&id, &text.join(" ")).await? {
                println!("{}", context);
            }
        }
    }

    Ok(())
}

async fn handle_hook_command(action: HookCommands, config: &Config) -> Result<()> {
    let dispatcher = HookDispatcher::new(&config.hooks)?;

    match action {
        HookCommands::List => {
            for event in HookEvent::ALL {
                let hooks = dispatcher.active(event);
                if hooks.is_empty() {
                    continue;
                }
                println!("{}:", event);
                for hook in hooks {
                    println!(
                        "  {} ({}{}) {}",
                        hook.name,
                        humantime::format_duration(hook.effective_timeout()),
                        if hook.fail_on_error { ", fail_on_error" } else { "" },
                        hook.command
                    );
                }
            }
        }

        HookCommands::Fire {
            event,
            tool,
            files,
            prompt,
        } => {
            let event: HookEvent = event.parse()?;
            let mut context = HookContext::new();
            if let Some(tool) = &tool {
                context = context.with_tool(tool);
            }
            for file in &files {
                context = context.with_file(file);
            }
            if let Some(prompt) = &prompt {
                context = context.with_prompt(prompt);
            }
            if let Some(root) = &config.tracker.project_root {
                context = context.with_project_root(root.clone());
            }

            let outcomes = dispatcher.dispatch(event, &context).await?;
            for outcome in &outcomes {
                match outcome.warning() {
                    Some(warning) => println!("✗ {}", warning),
                    None => println!("✓ {} ({}ms)", outcome.hook, outcome.duration_ms),
                }
            }
            if let Some(merged) = merged_output(&outcomes) {
                println!("{}", merged);
            }
        }
    }

    Ok(())
}

fn validator(config: &Config) -> WorkflowValidator {
    WorkflowValidator::new(config.catalog(), config.validator.clone()).with_estimator(Box::new(
        HeuristicEstimator::new(config.estimator.clone()),
    ))
}

fn executor(config: &Config) -> Result<WorkflowExecutor> {
    let mut handler = CommandStageHandler::new();
    if let Some(root) = &config.tracker.project_root {
        handler = handler.with_working_dir(root.clone());
    }

    let mut executor = WorkflowExecutor::new(
        config.catalog(),
        Arc::new(FileCheckpointStore::new(config.checkpoint_dir())),
        Arc::new(HookDispatcher::new(&config.hooks)?),
        Arc::new(handler),
        config.executor.clone(),
    );
    if let Some(root) = &config.tracker.project_root {
        executor = executor.with_project_root(root.clone());
    }
    Ok(executor)
}

fn session_manager(config: &Config) -> Result<SessionManager> {
    let tracker: Arc<dyn Tracker> = match config.tracker.kind {
        TrackerKind::Scud => Arc::new(ScudTracker::new(
            config.tracker.project_root.clone(),
            config.tracker.group.clone(),
        )),
        TrackerKind::Memory => Arc::new(MemoryTracker::new()),
    };

    Ok(SessionManager::new(
        config,
        Arc::new(HookDispatcher::new(&config.hooks)?),
        tracker,
    ))
}
