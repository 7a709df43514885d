//! agentrun CLI - Main entry point

mod render;

use agentrun_foundation::{
    ExecutionOptions, JsonStore, OutputChannel, RunnerConfig, TracingChannel, RUNNER_CONFIG_FILE,
};
use agentrun_task::{
    Executor, ExecutionRecord, HistoryLedger, LiveLogViewer, LogViewPayload, ProcessExecutor,
    StartRequest, StatusTracker, TargetKey, TargetKind, TargetState, ViewerUpdate,
};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use render::EntryPrinter;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// agentrun - run AI agent tasks, follow their logs, review their history
#[derive(Parser, Debug)]
#[command(name = "agentrun")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Override the history document location
    #[arg(long, global = true)]
    history_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an agent or todo and follow its output
    Run(RunArgs),
    /// List recorded executions
    History {
        #[command(flatten)]
        target: TargetFilter,

        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one execution and its log
    Show {
        /// Execution id (a unique prefix is enough)
        id: String,

        /// Print the log view as JSON
        #[arg(long)]
        json: bool,
    },
    /// Follow an execution's log file as it grows
    Watch {
        /// Execution id (a unique prefix is enough)
        id: String,
    },
    /// Drop records whose log file no longer exists
    Cleanup {
        /// Also close runs left running by a previous process
        #[arg(long)]
        interrupted: bool,
    },
    /// Remove one execution record
    Remove {
        /// Execution id (a unique prefix is enough)
        id: String,

        /// Delete the log file as well
        #[arg(long)]
        delete_log: bool,
    },
    /// Remove every record of one target
    Clear {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Show the merged configuration
    Config {
        /// Write default settings to the global config file if it does not exist
        #[arg(long)]
        init: bool,
    },
}

#[derive(clap::Args, Debug, Clone)]
#[group(required = true, multiple = false)]
struct TargetArgs {
    /// Agent id
    #[arg(long)]
    agent: Option<String>,

    /// Todo id
    #[arg(long)]
    todo: Option<String>,
}

impl TargetArgs {
    fn key(&self) -> anyhow::Result<TargetKey> {
        match (&self.agent, &self.todo) {
            (Some(agent), None) => Ok(TargetKey::agent(agent.clone())),
            (None, Some(todo)) => Ok(TargetKey::todo(todo.clone())),
            _ => bail!("exactly one of --agent or --todo is required"),
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
#[group(required = false, multiple = false)]
struct TargetFilter {
    /// Only this agent
    #[arg(long)]
    agent: Option<String>,

    /// Only this todo
    #[arg(long)]
    todo: Option<String>,
}

impl TargetFilter {
    fn key(&self) -> Option<TargetKey> {
        match (&self.agent, &self.todo) {
            (Some(agent), _) => Some(TargetKey::agent(agent.clone())),
            (None, Some(todo)) => Some(TargetKey::todo(todo.clone())),
            (None, None) => None,
        }
    }
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Prompt text (read from stdin when neither --prompt nor --prompt-file is given)
    #[arg(short, long, conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// Definition file used as the prompt; its hash is recorded with the run
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Display name for the history
    #[arg(long)]
    label: Option<String>,

    /// External tool executable
    #[arg(long)]
    executable: Option<String>,

    /// Model to use
    #[arg(long)]
    model: Option<String>,

    /// Permission mode passed to the tool
    #[arg(long)]
    permission_mode: Option<String>,

    /// Additional directory the tool may access (repeatable)
    #[arg(long = "add-dir")]
    add_dirs: Vec<PathBuf>,

    /// Allowed tool (repeatable)
    #[arg(long = "allow-tool")]
    allowed_tools: Vec<String>,

    /// Disallowed tool (repeatable)
    #[arg(long = "disallow-tool")]
    disallowed_tools: Vec<String>,

    /// Text appended to the system prompt
    #[arg(long)]
    append_system_prompt: Option<String>,

    /// Maximum agent turns
    #[arg(long)]
    max_turns: Option<u32>,

    /// Skip the tool's permission prompts
    #[arg(long)]
    dangerously_skip_permissions: bool,

    /// MCP configuration file
    #[arg(long)]
    mcp_config: Option<PathBuf>,

    /// Working directory for the tool
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Do not print the log while running
    #[arg(long)]
    quiet: bool,

    /// Extra arguments passed verbatim to the tool
    #[arg(last = true)]
    extra: Vec<String>,
}

impl RunArgs {
    fn options(&self) -> ExecutionOptions {
        ExecutionOptions {
            model: self.model.clone(),
            permission_mode: self.permission_mode.clone(),
            add_dirs: self.add_dirs.clone(),
            allowed_tools: self.allowed_tools.clone(),
            disallowed_tools: self.disallowed_tools.clone(),
            append_system_prompt: self.append_system_prompt.clone(),
            max_turns: self.max_turns,
            dangerously_skip_permissions: self.dangerously_skip_permissions.then_some(true),
            mcp_config: self.mcp_config.clone(),
            working_dir: self.cwd.clone(),
            extra_args: self.extra.clone(),
            ..ExecutionOptions::default()
        }
    }

    async fn input(&self) -> anyhow::Result<String> {
        if let Some(prompt) = &self.prompt {
            return Ok(prompt.clone());
        }
        if let Some(path) = &self.prompt_file {
            return tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()));
        }
        let mut input = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut tokio::io::stdin(), &mut input)
            .await
            .context("reading prompt from stdin")?;
        Ok(input)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr, so rendered logs on stdout stay clean)
    let log_level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let mut config = RunnerConfig::load().unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config: {}", e);
        RunnerConfig::default()
    });
    if let Some(path) = args.history_file {
        config = config.history_file(path);
    }
    tracing::debug!(
        "executable={} history={}",
        config.executable,
        config.resolved_history_file().display()
    );

    match args.command {
        Command::Run(run) => run_cmd(config, run).await,
        Command::History {
            target,
            limit,
            json,
        } => history_cmd(&config, target.key(), limit, json).await,
        Command::Show { id, json } => show_cmd(&config, &id, json).await,
        Command::Watch { id } => watch_cmd(&config, &id).await,
        Command::Cleanup { interrupted } => cleanup_cmd(&config, interrupted).await,
        Command::Remove { id, delete_log } => remove_cmd(&config, &id, delete_log).await,
        Command::Clear { target } => clear_cmd(&config, target.key()?).await,
        Command::Config { init } => config_cmd(&config, init),
    }
}

async fn open_ledger(config: &RunnerConfig) -> anyhow::Result<Arc<HistoryLedger>> {
    let path = config.resolved_history_file();
    let ledger = HistoryLedger::open(&path, TracingChannel::shared("ledger"))
        .await
        .with_context(|| format!("opening history {}", path.display()))?;
    Ok(Arc::new(ledger))
}

/// Resolve a full id or a unique prefix
async fn find_record(ledger: &HistoryLedger, id: &str) -> anyhow::Result<ExecutionRecord> {
    if let Some(record) = ledger.get_by_id(id).await {
        return Ok(record);
    }
    let matches: Vec<ExecutionRecord> = ledger
        .all_records()
        .await
        .into_iter()
        .filter(|r| r.id.starts_with(id))
        .collect();
    match matches.len() {
        0 => bail!("no execution with id {}", id),
        1 => Ok(matches.into_iter().next().context("record vanished")?),
        n => bail!("id prefix {} is ambiguous ({} executions)", id, n),
    }
}

// ============================================================================
// run
// ============================================================================

async fn run_cmd(mut config: RunnerConfig, args: RunArgs) -> anyhow::Result<()> {
    if let Some(executable) = &args.executable {
        config = config.executable(executable.clone());
    }

    let ledger = open_ledger(&config).await?;
    let recovered = ledger.recover_interrupted().await?;
    if recovered > 0 {
        eprintln!("Closed {} interrupted execution(s) from a previous session", recovered);
    }

    let executor = Arc::new(ProcessExecutor::from_runner_config(
        &config,
        TracingChannel::shared("engine"),
    ));
    if !executor.is_available() {
        bail!(
            "executable '{}' was not found on PATH (set \"executable\" in {} or pass --executable)",
            config.executable,
            RUNNER_CONFIG_FILE
        );
    }

    let channel: Arc<dyn OutputChannel> = TracingChannel::shared("tracker");
    let tracker = StatusTracker::new(
        executor,
        Arc::clone(&ledger),
        config.resolved_log_dir(),
        channel,
    );

    let target = args.target.key()?;
    let mut request = StartRequest::new(target.clone(), args.input().await?).options(args.options());
    if let Some(label) = &args.label {
        request = request.label(label.clone());
    }
    if let Some(path) = &args.prompt_file {
        request = request.source_file(path.clone());
    }

    let mut run = tracker.start(request).await?;
    eprintln!(
        "▶ {} started (execution {}, log {})",
        target,
        &run.record.id[..8],
        run.record.log_file.display()
    );

    let mut printer = EntryPrinter::new();
    let viewer = LiveLogViewer::new(config.viewer.clone(), TracingChannel::shared("viewer"));
    let mut sub = (!args.quiet).then(|| viewer.attach(target.clone(), &run.record.log_file));
    let mut interrupted = false;

    let status = loop {
        tokio::select! {
            status = &mut run.handle => break status.context("execution task failed")?,
            update = next_update(&mut sub) => match update {
                Some(ViewerUpdate::Payload(payload)) => printer.print_new(&payload),
                Some(ViewerUpdate::Error(e)) => eprintln!("⚠ {}", e),
                Some(_) => {}
                None => sub = None,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                eprintln!("\n■ stopping {}...", target);
                tracker.stop(&target).await?;
            }
        }
    };

    if !args.quiet {
        // catch up on lines written after the last viewer update
        if let Ok(content) = tokio::fs::read_to_string(&run.record.log_file).await {
            let payload = LogViewPayload::from_content(&content);
            printer.print_new(&payload);
            eprintln!("{}", render::summary_line(&payload));
        }
    }

    match status.state {
        TargetState::Idle if !interrupted => {
            eprintln!("✓ {} completed", target);
            Ok(())
        }
        TargetState::Idle | TargetState::Paused => {
            eprintln!("■ {} stopped", target);
            Ok(())
        }
        TargetState::Error => bail!(
            "{} failed: {}",
            target,
            status.error.unwrap_or_else(|| "unknown error".to_string())
        ),
        TargetState::Running => bail!("{} is still running", target),
    }
}

async fn next_update(
    sub: &mut Option<agentrun_task::ViewerSubscription>,
) -> Option<ViewerUpdate> {
    match sub {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// history / show / watch
// ============================================================================

async fn history_cmd(
    config: &RunnerConfig,
    target: Option<TargetKey>,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let ledger = open_ledger(config).await?;
    let records = match &target {
        Some(key) => ledger.get_history(key.kind, &key.id, Some(limit)).await,
        None => ledger.all_records().await.into_iter().take(limit).collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No executions found.");
        return Ok(());
    }

    println!("{}", render::history_header());
    println!("{}", "-".repeat(80));
    for record in &records {
        println!("{}", render::history_row(record));
    }
    Ok(())
}

async fn show_cmd(config: &RunnerConfig, id: &str, json: bool) -> anyhow::Result<()> {
    let ledger = open_ledger(config).await?;
    let record = find_record(&ledger, id).await?;

    let content = match tokio::fs::read_to_string(&record.log_file).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("{}", render::record_details(&record));
            println!("\nLog file not found; run `agentrun cleanup` to drop stale records.");
            return Ok(());
        }
        Err(e) => return Err(e).with_context(|| format!("reading {}", record.log_file.display())),
    };
    let payload = LogViewPayload::from_content(&content);

    if json {
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("{}\n", render::record_details(&record));
    EntryPrinter::new().print_new(&payload);
    println!("\n{}", render::summary_line(&payload));
    Ok(())
}

async fn watch_cmd(config: &RunnerConfig, id: &str) -> anyhow::Result<()> {
    let ledger = open_ledger(config).await?;
    let record = find_record(&ledger, id).await?;
    let target = TargetKey::new(record.kind, record.target_id.clone());

    let viewer = LiveLogViewer::new(config.viewer.clone(), TracingChannel::shared("viewer"))
        .with_ledger(Arc::clone(&ledger));
    let mut sub = viewer.attach(target, &record.log_file);
    let mut printer = EntryPrinter::new();

    eprintln!(
        "Watching {} ({}), Ctrl-C to stop",
        record.log_file.display(),
        render::status_badge(record.status)
    );

    loop {
        tokio::select! {
            update = sub.recv() => match update {
                Some(ViewerUpdate::Loading) => {}
                Some(ViewerUpdate::Payload(payload)) => printer.print_new(&payload),
                Some(ViewerUpdate::Error(e)) => eprintln!("⚠ {}", e),
                Some(ViewerUpdate::NotFound { path }) => {
                    eprintln!("Log file {} no longer exists", path.display());
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                sub.close();
                break;
            }
        }
    }
    Ok(())
}

// ============================================================================
// maintenance
// ============================================================================

async fn cleanup_cmd(config: &RunnerConfig, interrupted: bool) -> anyhow::Result<()> {
    let ledger = open_ledger(config).await?;
    if interrupted {
        let closed = ledger.recover_interrupted().await?;
        println!("Closed {} interrupted execution(s).", closed);
    }
    let removed = ledger.cleanup_invalid_records().await?;
    println!("Removed {} record(s) with missing log files.", removed);
    Ok(())
}

async fn remove_cmd(config: &RunnerConfig, id: &str, delete_log: bool) -> anyhow::Result<()> {
    let ledger = open_ledger(config).await?;
    let record = find_record(&ledger, id).await?;
    if record.is_running() {
        bail!("execution {} is still running", record.id);
    }

    ledger.remove_by_id(&record.id).await?;
    if delete_log {
        match tokio::fs::remove_file(&record.log_file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("deleting log file"),
        }
        // other records may share the file
        ledger.remove_by_log_file(&record.log_file).await?;
    }
    println!("Removed execution {}", record.id);
    Ok(())
}

async fn clear_cmd(config: &RunnerConfig, target: TargetKey) -> anyhow::Result<()> {
    let ledger = open_ledger(config).await?;
    if ledger.running_for(target.kind, &target.id).await.is_some() {
        bail!("{} has a running execution", target);
    }
    let removed = ledger.clear_history(target.kind, &target.id).await?;
    let noun = match target.kind {
        TargetKind::Agent => "agent",
        TargetKind::Todo => "todo",
    };
    println!("Removed {} record(s) of {} {}", removed, noun, target.id);
    Ok(())
}

fn config_cmd(config: &RunnerConfig, init: bool) -> anyhow::Result<()> {
    if init {
        let store = JsonStore::global()?;
        if store.exists(RUNNER_CONFIG_FILE) {
            println!(
                "{} already exists",
                store.file_path(RUNNER_CONFIG_FILE).display()
            );
        } else {
            RunnerConfig::default().save_global()?;
            println!("Wrote {}", store.file_path(RUNNER_CONFIG_FILE).display());
        }
    }

    println!("{}", serde_json::to_string_pretty(config)?);
    println!("# log dir:      {}", config.resolved_log_dir().display());
    println!("# history file: {}", config.resolved_history_file().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_parse() {
        let args = Args::try_parse_from([
            "agentrun",
            "run",
            "--agent",
            "reviewer",
            "-p",
            "review the diff",
            "--model",
            "opus",
            "--add-dir",
            "/repo",
            "--allow-tool",
            "Read",
            "--allow-tool",
            "Grep",
            "--dangerously-skip-permissions",
            "--",
            "--extra",
        ])
        .unwrap();

        let Command::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.target.key().unwrap(), TargetKey::agent("reviewer"));
        let options = run.options();
        assert_eq!(options.model.as_deref(), Some("opus"));
        assert_eq!(options.allowed_tools, vec!["Read", "Grep"]);
        assert_eq!(options.dangerously_skip_permissions, Some(true));
        assert_eq!(options.extra_args, vec!["--extra"]);
    }

    #[test]
    fn test_run_requires_one_target() {
        assert!(Args::try_parse_from(["agentrun", "run", "-p", "x"]).is_err());
        assert!(Args::try_parse_from(["agentrun", "run", "--agent", "a", "--todo", "b"]).is_err());
    }

    #[test]
    fn test_history_filter_optional() {
        let args = Args::try_parse_from(["agentrun", "history", "--todo", "t1", "-l", "5"]).unwrap();
        let Command::History { target, limit, .. } = args.command else {
            panic!("expected history");
        };
        assert_eq!(target.key(), Some(TargetKey::todo("t1")));
        assert_eq!(limit, 5);
    }
}
