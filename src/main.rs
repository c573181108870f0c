//! Interactive REPL for the flynn coding assistant.
//!
//! Reads one user turn per line, streams the run's events to the
//! terminal, and exposes the background-shell panel through slash
//! commands. Logs go to stderr so streamed model output owns stdout.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use secrecy::SecretString;
use tokio::io::AsyncBufReadExt;
use tokio_stream::StreamExt;
use tracing::info;

use flynn_core::events::AgentEvent;
use flynn_core::ids::SessionId;
use flynn_core::provider::LlmProvider;
use flynn_core::session::Session;
use flynn_core::store::SessionStore;
use flynn_engine::tools::create_default_registry;
use flynn_engine::{
    ConversationOrchestrator, EngineError, OrchestratorConfig, ProcessManager, ShellStatus,
};
use flynn_llm::{AnthropicProvider, LlmApplyEdit, LlmSummarizer, DEFAULT_MODEL};
use flynn_store::{Database, SqliteSessionStore};
use flynn_telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};

const SYSTEM_PROMPT: &str = "\
You are a coding assistant running in the user's terminal. You can read, \
edit, and delete files, search the codebase, and run shell commands in \
the user's working directory. Prefer small, targeted edits. When a task \
needs a long-running command, run it in the background and check its \
output later.";

#[derive(Parser)]
#[command(name = "flynn", version, about = "Terminal coding assistant")]
struct Cli {
    /// Working directory for the session (default: current directory)
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Model to use
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Resume a stored session by id
    #[arg(long)]
    resume: Option<String>,

    /// Session database path (default: <workdir>/.flynn/sessions.db)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Override the built-in system prompt
    #[arg(long)]
    system_prompt: Option<String>,

    /// Initial log filter (e.g. "debug,flynn_engine=trace")
    #[arg(long)]
    log: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let telemetry = init_telemetry(&TelemetryConfig {
        json: cli.json_logs,
        ..TelemetryConfig::default()
    });
    if let Some(directives) = &cli.log {
        telemetry
            .set_filter(directives)
            .map_err(|e| anyhow::anyhow!("invalid --log filter: {e}"))?;
    }

    let workdir = match &cli.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot determine current directory")?,
    };

    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .context("ANTHROPIC_API_KEY is not set")?;
    let provider: Arc<dyn LlmProvider> = Arc::new(AnthropicProvider::new(
        SecretString::from(api_key),
        cli.model.as_str(),
    ));

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| workdir.join(".flynn/sessions.db"));
    let store: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::new(
        Database::open(&db_path).context("failed to open session database")?,
    ));

    let session = match &cli.resume {
        Some(raw) => store
            .load(&SessionId::from_raw(raw.clone()))
            .context("failed to load session")?
            .with_context(|| format!("no stored session with id {raw}"))?,
        None => Session::new(&workdir),
    };
    let session_id = session.id.clone();

    let process_manager = Arc::new(ProcessManager::new());
    let registry = Arc::new(create_default_registry(
        Arc::clone(&process_manager),
        Arc::new(LlmApplyEdit::new(Arc::clone(&provider))),
    ));
    let summarizer = Arc::new(LlmSummarizer::new(Arc::clone(&provider)));

    let orchestrator = ConversationOrchestrator::new(
        session,
        provider,
        registry,
        summarizer,
        OrchestratorConfig {
            system_prompt: Some(cli.system_prompt.clone().unwrap_or_else(|| SYSTEM_PROMPT.to_string())),
            ..OrchestratorConfig::default()
        },
    )
    .with_store(store);

    println!("flynn ({}), session {}", cli.model, session_id);
    println!("type a request, or /help for commands");

    repl(&orchestrator, &process_manager, &telemetry).await?;

    let killed = process_manager.shutdown();
    if killed > 0 {
        info!(killed, "killed running background shells on exit");
    }
    Ok(())
}

async fn repl(
    orchestrator: &ConversationOrchestrator,
    process_manager: &ProcessManager,
    telemetry: &TelemetryGuard,
) -> Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => {}
            "/quit" | "/exit" => break,
            "/help" => print_help(),
            "/shells" => print_shells(process_manager),
            _ if line.starts_with("/output") => {
                print_shell_output(process_manager, line.trim_start_matches("/output").trim());
            }
            _ if line.starts_with("/kill") => {
                let id = line.trim_start_matches("/kill").trim();
                if process_manager.kill(id) {
                    println!("killed {id}");
                } else {
                    println!("{id} is not a running shell");
                }
            }
            _ if line.starts_with("/log") => {
                let directives = line.trim_start_matches("/log").trim();
                match telemetry.set_filter(directives) {
                    Ok(()) => println!("log filter set to {directives:?}"),
                    Err(e) => println!("invalid filter: {e}"),
                }
            }
            _ if line.starts_with('/') => println!("unknown command; try /help"),
            _ => run_turn(orchestrator, line).await,
        }
    }
    Ok(())
}

/// Drive one submitted turn to its terminal event. Ctrl-C aborts the run
/// (not the REPL); the loop keeps reading until the stream closes so the
/// aborted/error event still renders.
async fn run_turn(orchestrator: &ConversationOrchestrator, input: &str) {
    let mut stream = match orchestrator.submit(input, Vec::new()) {
        Ok(stream) => stream,
        Err(EngineError::Busy) => {
            println!("a turn is already running");
            return;
        }
        Err(e) => {
            println!("error: {e}");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                orchestrator.abort();
            }
            event = stream.next() => match event {
                Some(event) => render_event(&event),
                None => break,
            },
        }
    }
}

fn render_event(event: &AgentEvent) {
    match event {
        AgentEvent::TextDelta { delta, .. } => {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        }
        AgentEvent::ToolStarted { tool_name, .. } => {
            println!("\n[{tool_name}]");
        }
        AgentEvent::ToolFinished {
            success,
            preview,
            duration_ms,
            ..
        } => {
            let mark = if *success { "ok" } else { "failed" };
            println!("  {mark}: {preview} ({duration_ms}ms)");
        }
        AgentEvent::CompressionStarted { .. } => {
            println!("\n[compressing older history...]");
        }
        AgentEvent::CompressionComplete {
            tokens_before,
            messages_removed,
            ..
        } => {
            println!("[compressed {messages_removed} messages at {tokens_before} tokens]");
        }
        AgentEvent::FinalText { .. } => {
            // The text already streamed as deltas.
            println!();
        }
        AgentEvent::Aborted { .. } => {
            println!("\n[aborted]");
        }
        AgentEvent::Error { message, .. } => {
            println!("\nerror: {message}");
        }
        AgentEvent::ThinkingStarted { .. }
        | AgentEvent::ThinkingDelta { .. }
        | AgentEvent::ThinkingEnded { .. } => {}
    }
}

fn print_help() {
    println!("  /shells        list background shells");
    println!("  /output <id>   last output lines of a shell");
    println!("  /kill <id>     kill a running shell");
    println!("  /log <filter>  change the log filter (e.g. debug,flynn_engine=trace)");
    println!("  /quit          exit");
}

fn print_shells(process_manager: &ProcessManager) {
    let shells = process_manager.list();
    if shells.is_empty() {
        println!("no background shells");
        return;
    }
    for shell in shells {
        let status = match shell.status {
            ShellStatus::Running => format!("running ({}s)", shell.runtime_secs),
            ShellStatus::Completed => {
                format!("completed (exit {})", shell.exit_code.unwrap_or(-1))
            }
            ShellStatus::Killed => "killed".to_string(),
        };
        println!("  {}  {}  {}", shell.id, status, shell.command);
    }
}

fn print_shell_output(process_manager: &ProcessManager, id: &str) {
    match process_manager.output(id) {
        None => println!("no shell with id {id:?}"),
        Some(output) => {
            if !output.stdout.is_empty() {
                println!("{}", output.stdout);
            }
            if !output.stderr.is_empty() {
                println!("stderr:\n{}", output.stderr);
            }
            if output.stdout.is_empty() && output.stderr.is_empty() {
                println!("(no output yet)");
            }
        }
    }
}
