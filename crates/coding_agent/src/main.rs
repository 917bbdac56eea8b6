use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context};
use clap::Parser;
use coding_agent::commands::{execute_slash_command, parse_slash_command, CommandOutcome};
use coding_agent::config::{AgentConfig, ExecutionMode, OperationMode};
use coding_agent::conversation::RunState;
use coding_agent::dispatcher::{Dispatcher, SessionSnapshot};
use coding_agent::gate::AutoApprove;
use coding_agent::paths::{resolve_state_root, StatePaths, STATE_ROOT_ENV_VAR};
use coding_agent::providers::provider_for_config;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "coding_agent=info";

/// Terminal coding agent.
#[derive(Debug, Parser)]
#[command(name = "coding_agent", version)]
struct Cli {
    /// State directory for config, sessions, agents and checkpoints.
    #[arg(long, env = STATE_ROOT_ENV_VAR)]
    home: Option<PathBuf>,

    /// Resume a saved session by name or id.
    #[arg(long, value_name = "SESSION")]
    resume: Option<String>,

    /// Run under a named agent definition.
    #[arg(long, value_name = "NAME")]
    agent: Option<String>,

    /// Start in plan mode.
    #[arg(long)]
    plan: bool,

    /// Run commands without confirmation.
    #[arg(long)]
    yolo: bool,

    /// Completion backend (`openai` or `mock`).
    #[arg(long)]
    provider: Option<String>,

    /// Run a single prompt non-interactively and exit.
    prompt: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let state_root = resolve_state_root(cli.home.clone())?;
    let mut config = AgentConfig::load(&state_root)
        .with_context(|| format!("loading config from {}", state_root.display()))?;
    config.apply_env()?;
    if let Some(provider) = &cli.provider {
        config.provider = provider.clone();
    }
    if cli.plan {
        config.operation_mode = OperationMode::Plan;
    }
    if cli.yolo {
        config.execution_mode = ExecutionMode::Yolo;
    }

    let service = provider_for_config(&config).map_err(|error| anyhow!(error))?;
    let workspace = std::env::current_dir().context("resolving the working directory")?;
    let mut dispatcher = Dispatcher::new(service, config, StatePaths::new(&state_root), workspace);
    if cli.prompt.is_some() {
        dispatcher = dispatcher.with_gate(Arc::new(AutoApprove));
    }

    let mut state = match &cli.resume {
        Some(key) => {
            let mut state = dispatcher.load_session(key)?;
            if cli.agent.is_some() {
                dispatcher.set_agent(&mut state, cli.agent.as_deref())?;
            }
            state
        }
        None => dispatcher.new_run_state(cli.agent.as_deref())?,
    };

    let snapshot: SessionSnapshot = Arc::new(Mutex::new(Some(state.session_record())));
    dispatcher = dispatcher.with_session_snapshot(Arc::clone(&snapshot));
    #[cfg(unix)]
    let _signal_guard = install_exit_handler(&dispatcher, snapshot)?;

    match cli.prompt.clone() {
        Some(prompt) => run_once(&dispatcher, &mut state, &prompt)?,
        None => run_repl(&mut dispatcher, &mut state)?,
    }

    dispatcher.save_session(&state)?;
    warn_abandoned_background(&dispatcher);
    Ok(())
}

/// A compressed turn ends the run: there is no fresh user input to continue with.
fn run_once(dispatcher: &Dispatcher, state: &mut RunState, prompt: &str) -> anyhow::Result<()> {
    let outcome = dispatcher.run_turn(state, prompt)?;
    println!("{}", outcome.into_reply());
    Ok(())
}

fn run_repl(dispatcher: &mut Dispatcher, state: &mut RunState) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    println!("Type /help for commands.");

    loop {
        write!(
            stdout,
            "[{}|{}]> ",
            state.operation_mode.as_str(),
            state.execution_mode.as_str()
        )?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = parse_slash_command(input) {
            match execute_slash_command(dispatcher, state, command) {
                CommandOutcome::Continue(message) => println!("{message}"),
                CommandOutcome::Quit => return Ok(()),
            }
        } else {
            match dispatcher.run_turn(state, input) {
                Ok(outcome) => println!("{}", outcome.into_reply()),
                Err(error) => eprintln!("Error: {error}"),
            }
        }

        dispatcher.publish_snapshot(state);
    }
}

#[cfg(unix)]
fn install_exit_handler(
    dispatcher: &Dispatcher,
    snapshot: SessionSnapshot,
) -> io::Result<coding_agent::signals::SignalHookGuard> {
    let sessions = dispatcher.sessions().clone();
    let background = dispatcher.background().clone();
    coding_agent::signals::install_signal_handlers(move || {
        if let Some(record) = lock_unpoisoned(&snapshot).take() {
            if let Err(error) = sessions.save(record) {
                tracing::warn!(%error, "failed to save session on exit");
            }
        }
        let running = background.running();
        if !running.is_empty() {
            eprintln!(
                "Warning: {} background process(es) left running: {}",
                running.len(),
                describe_handles(&running)
            );
        }
        std::process::exit(130);
    })
}

fn warn_abandoned_background(dispatcher: &Dispatcher) {
    let running = dispatcher.background().running();
    if !running.is_empty() {
        eprintln!(
            "Warning: {} background process(es) still running: {}",
            running.len(),
            describe_handles(&running)
        );
    }
}

fn describe_handles(processes: &[coding_agent::background::ProcessSummary]) -> String {
    processes
        .iter()
        .map(|process| format!("{} ({})", process.handle, process.command))
        .collect::<Vec<_>>()
        .join(", ")
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
