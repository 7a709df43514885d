//! Process executor - runs the external tool with streamed JSON-Lines output
//!
//! Features:
//! - Input text written to stdin, never passed as an argument
//! - stdout parsed line by line and appended to the execution log before anything else
//! - stderr captured into the same log as Error messages and kept in a bounded buffer
//! - Failure summary composed from exit code, last stream error, stderr and recent output
//! - Graceful stop (SIGTERM on Unix, kill elsewhere) without escalation

use crate::executor::command::CommandSpec;
use crate::executor::{ExecutionSummary, Executor, Reservation};
use crate::log::{ExecutionLogStore, LogWriter};
use crate::stream::{parse, MessageKind, StreamMessage};
use agentrun_foundation::{Error, ExecutionOptions, OutputChannel, Result, RunnerConfig};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Process executor configuration
#[derive(Debug, Clone)]
pub struct ProcessExecutorConfig {
    /// Executable name or path
    pub executable: String,
    /// Options every invocation starts from
    pub defaults: ExecutionOptions,
    /// Most recent stderr fragments kept for the failure summary
    pub stderr_buffer_size: usize,
    /// Most recent output fragments used when stderr is empty
    pub output_sample_size: usize,
}

impl Default for ProcessExecutorConfig {
    fn default() -> Self {
        Self::from(&RunnerConfig::default())
    }
}

impl From<&RunnerConfig> for ProcessExecutorConfig {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            defaults: config.defaults.clone(),
            stderr_buffer_size: config.stderr_buffer_size,
            output_sample_size: config.output_sample_size,
        }
    }
}

/// Handle kept for each reserved or in-flight run
struct RunningProcess {
    run_id: u64,
    pid: Option<u32>,
    stop_tx: Option<oneshot::Sender<()>>,
    /// Taken by the run once it starts
    stop_rx: Option<oneshot::Receiver<()>>,
}

/// Everything seen on stdout during one run
#[derive(Debug, Default)]
struct StdoutDigest {
    messages: usize,
    last_error: Option<String>,
    result_text: Option<String>,
    tokens: Option<u64>,
    samples: VecDeque<String>,
}

#[derive(Debug, Default)]
struct StderrDigest {
    messages: usize,
    fragments: VecDeque<String>,
}

/// Local process executor for the external agent tool
pub struct ProcessExecutor {
    config: ProcessExecutorConfig,

    /// Running processes by task key
    processes: Arc<RwLock<HashMap<String, RunningProcess>>>,

    log_store: ExecutionLogStore,

    channel: Arc<dyn OutputChannel>,

    next_run_id: AtomicU64,
}

impl ProcessExecutor {
    pub fn new(config: ProcessExecutorConfig, channel: Arc<dyn OutputChannel>) -> Self {
        Self {
            config,
            processes: Arc::new(RwLock::new(HashMap::with_capacity(8))),
            log_store: ExecutionLogStore::new(Arc::clone(&channel)),
            channel,
            next_run_id: AtomicU64::new(1),
        }
    }

    /// Create from the loaded runner configuration
    pub fn from_runner_config(config: &RunnerConfig, channel: Arc<dyn OutputChannel>) -> Self {
        Self::new(ProcessExecutorConfig::from(config), channel)
    }

    pub fn config(&self) -> &ProcessExecutorConfig {
        &self.config
    }

    /// Build the invocation for the given per-call options
    pub fn command_for(&self, options: &ExecutionOptions) -> CommandSpec {
        CommandSpec::build(&self.config.executable, &self.config.defaults, options)
    }

    /// Keys of every in-flight run
    pub async fn running_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.processes.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Claim the stop receiver of a reservation; `None` if it was stopped
    async fn claim(&self, reservation: &Reservation) -> Option<oneshot::Receiver<()>> {
        let mut processes = self.processes.write().await;
        match processes.get_mut(reservation.task_key()) {
            Some(process) if process.run_id == reservation.run_id() => process.stop_rx.take(),
            _ => None,
        }
    }

    /// Drop the reservation only if it still belongs to `run_id`
    async fn release_run(&self, task_key: &str, run_id: u64) {
        let mut processes = self.processes.write().await;
        if processes.get(task_key).map(|p| p.run_id) == Some(run_id) {
            processes.remove(task_key);
        }
    }

    async fn run(
        &self,
        task_key: &str,
        run_id: u64,
        mut stop_rx: oneshot::Receiver<()>,
        input: &str,
        options: &ExecutionOptions,
        log_file: &Path,
    ) -> Result<ExecutionSummary> {
        let spec = self.command_for(options);
        let writer = Arc::new(Mutex::new(self.log_store.open_writer(log_file).await?));

        // a stop that landed before the spawn wins
        match stop_rx.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Closed) => {
                self.channel
                    .info(&format!("{} was stopped before it started", task_key));
                return Err(Error::Stopped(task_key.to_string()));
            }
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        self.channel
            .debug(&format!("Executing {}: {}", task_key, spec.display()));

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::spawn(&spec.program, e.to_string()))?;

        {
            let mut processes = self.processes.write().await;
            if let Some(process) = processes.get_mut(task_key) {
                if process.run_id == run_id {
                    process.pid = child.id();
                }
            }
        }

        if let Some(mut stdin) = child.stdin.take() {
            let input = input.to_string();
            let channel = Arc::clone(&self.channel);
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    channel.debug(&format!("stdin closed early: {}", e));
                }
                // drop closes the pipe
            });
        }

        let stdout_handle = child.stdout.take().map(|stdout| {
            spawn_stdout_reader(
                stdout,
                Arc::clone(&writer),
                Arc::clone(&self.channel),
                self.config.output_sample_size,
            )
        });
        let stderr_handle = child.stderr.take().map(|stderr| {
            spawn_stderr_reader(
                stderr,
                Arc::clone(&writer),
                Arc::clone(&self.channel),
                self.config.stderr_buffer_size,
            )
        });

        let mut stop_requested = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                signal = &mut stop_rx, if !stop_requested => {
                    stop_requested = true;
                    if signal.is_ok() {
                        self.channel.info(&format!("Stopping {}", task_key));
                        terminate(&mut child);
                    }
                }
            }
        };

        let stdout = join_reader(stdout_handle).await;
        let stderr = join_reader(stderr_handle).await;

        let message_count = stdout.messages + stderr.messages;
        self.channel.debug(&format!(
            "{} exited with {:?} after {} messages",
            task_key,
            status.code(),
            message_count
        ));

        if status.success() {
            Ok(ExecutionSummary {
                exit_code: status.code().unwrap_or(0),
                message_count,
                result_text: stdout.result_text,
                tokens: stdout.tokens,
                log_file: log_file.to_path_buf(),
            })
        } else {
            let report = FailureReport {
                exit_code: status.code(),
                last_error: stdout.last_error,
                stderr: stderr.fragments.into_iter().collect(),
                output_sample: stdout.samples.into_iter().collect(),
                log_file: log_file.to_path_buf(),
            };
            Err(report.into_error())
        }
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn reserve(&self, task_key: &str) -> Result<Reservation> {
        let mut processes = self.processes.write().await;
        if processes.contains_key(task_key) {
            return Err(Error::AlreadyRunning(task_key.to_string()));
        }
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let (stop_tx, stop_rx) = oneshot::channel();
        processes.insert(
            task_key.to_string(),
            RunningProcess {
                run_id,
                pid: None,
                stop_tx: Some(stop_tx),
                stop_rx: Some(stop_rx),
            },
        );
        Ok(Reservation::new(task_key, run_id))
    }

    async fn execute_reserved(
        &self,
        reservation: Reservation,
        input: &str,
        options: &ExecutionOptions,
        log_file: &Path,
    ) -> Result<ExecutionSummary> {
        let task_key = reservation.task_key();
        let run_id = reservation.run_id();

        let Some(stop_rx) = self.claim(&reservation).await else {
            self.channel
                .info(&format!("{} was stopped before it started", task_key));
            return Err(Error::Stopped(task_key.to_string()));
        };

        let result = self
            .run(task_key, run_id, stop_rx, input, options, log_file)
            .await;
        self.release_run(task_key, run_id).await;

        match &result {
            Err(e) if !e.is_stopped() => {
                self.channel.warn(&format!("{} failed: {}", task_key, e))
            }
            _ => {}
        }
        result
    }

    async fn release(&self, reservation: Reservation) {
        self.release_run(reservation.task_key(), reservation.run_id())
            .await;
    }

    async fn stop(&self, task_key: &str) -> bool {
        let removed = self.processes.write().await.remove(task_key);
        match removed {
            Some(mut process) => {
                if let Some(tx) = process.stop_tx.take() {
                    // the run may already be exiting
                    let _ = tx.send(());
                }
                self.channel.info(&format!(
                    "Stop requested for {} (pid {:?})",
                    task_key, process.pid
                ));
                true
            }
            None => false,
        }
    }

    async fn is_running(&self, task_key: &str) -> bool {
        self.processes.read().await.contains_key(task_key)
    }

    fn is_available(&self) -> bool {
        which::which(&self.config.executable).is_ok()
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

/// Send a graceful termination signal
#[cfg(unix)]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            tracing::debug!(pid, "SIGTERM failed: {}", std::io::Error::last_os_error());
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::debug!("kill failed: {}", e);
    }
}

fn spawn_stdout_reader<R>(
    stdout: R,
    writer: Arc<Mutex<LogWriter>>,
    channel: Arc<dyn OutputChannel>,
    sample_size: usize,
) -> JoinHandle<StdoutDigest>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut digest = StdoutDigest::default();
        let mut reader = BufReader::new(stdout).lines();
        loop {
            let line = match reader.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    channel.warn(&format!("stdout read failed: {}", e));
                    break;
                }
            };
            let message = parse(&line).with_timestamp(Utc::now());
            if let Err(e) = writer.lock().await.append(&message).await {
                channel.error(&format!("Failed to append to execution log: {}", e));
            }
            digest.record(&message, sample_size);
        }
        digest
    })
}

fn spawn_stderr_reader<R>(
    stderr: R,
    writer: Arc<Mutex<LogWriter>>,
    channel: Arc<dyn OutputChannel>,
    buffer_size: usize,
) -> JoinHandle<StderrDigest>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut digest = StderrDigest::default();
        let mut reader = BufReader::new(stderr).lines();
        loop {
            let line = match reader.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    channel.warn(&format!("stderr read failed: {}", e));
                    break;
                }
            };
            let message = StreamMessage::error_text(line.clone()).with_timestamp(Utc::now());
            if let Err(e) = writer.lock().await.append(&message).await {
                channel.error(&format!("Failed to append to execution log: {}", e));
            }
            digest.messages += 1;
            if !line.trim().is_empty() {
                push_bounded(&mut digest.fragments, line, buffer_size);
            }
        }
        digest
    })
}

async fn join_reader<T: Default>(handle: Option<JoinHandle<T>>) -> T {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => T::default(),
    }
}

impl StdoutDigest {
    fn record(&mut self, message: &StreamMessage, sample_size: usize) {
        self.messages += 1;
        if let Some(tokens) = message.tokens {
            self.tokens = Some(self.tokens.unwrap_or(0) + tokens);
        }
        if let Some(error) = message.error_message() {
            self.last_error = Some(error);
        }
        if let Some(result) = message.result_text() {
            self.result_text = Some(result);
        }
        if message.kind != MessageKind::Error {
            push_bounded(&mut self.samples, message.text(), sample_size);
        }
    }
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, capacity: usize) {
    if capacity == 0 {
        return;
    }
    while buffer.len() >= capacity {
        buffer.pop_front();
    }
    buffer.push_back(item);
}

/// Diagnostic summary of a failed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub last_error: Option<String>,
    pub stderr: Vec<String>,
    pub output_sample: Vec<String>,
    pub log_file: PathBuf,
}

impl FailureReport {
    /// Compose the user-facing message
    pub fn message(&self) -> String {
        let mut parts = Vec::with_capacity(4);
        parts.push(match self.exit_code {
            Some(code) => format!("Process exited with code {}", code),
            None => "Process terminated by signal".to_string(),
        });
        if let Some(error) = &self.last_error {
            parts.push(format!("Error: {}", error));
        }
        if !self.stderr.is_empty() {
            parts.push(format!("stderr:\n{}", self.stderr.join("\n")));
        } else if !self.output_sample.is_empty() {
            parts.push(format!("Last output:\n{}", self.output_sample.join("\n")));
        }
        parts.push(format!("Log file: {}", self.log_file.display()));
        parts.join("\n")
    }

    pub fn into_error(self) -> Error {
        Error::Execution {
            exit_code: self.exit_code,
            message: self.message(),
            log_file: self.log_file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrun_foundation::TracingChannel;

    fn report() -> FailureReport {
        FailureReport {
            exit_code: Some(2),
            last_error: None,
            stderr: Vec::new(),
            output_sample: Vec::new(),
            log_file: PathBuf::from("/tmp/run.jsonl"),
        }
    }

    #[test]
    fn test_failure_message_minimal() {
        assert_eq!(
            report().message(),
            "Process exited with code 2\nLog file: /tmp/run.jsonl"
        );
    }

    #[test]
    fn test_failure_message_prefers_stderr_over_sample() {
        let mut r = report();
        r.last_error = Some("rate limited".to_string());
        r.stderr = vec!["boom".to_string()];
        r.output_sample = vec!["partial".to_string()];
        assert_eq!(
            r.message(),
            "Process exited with code 2\nError: rate limited\nstderr:\nboom\nLog file: /tmp/run.jsonl"
        );

        r.stderr.clear();
        assert!(r.message().contains("Last output:\npartial"));
    }

    #[test]
    fn test_failure_into_error() {
        let mut r = report();
        r.exit_code = None;
        let err = r.into_error();
        assert_eq!(err.exit_code(), None);
        assert!(err.to_string().starts_with("Process terminated by signal"));
    }

    #[test]
    fn test_push_bounded_keeps_most_recent() {
        let mut buffer = VecDeque::new();
        for i in 0..15 {
            push_bounded(&mut buffer, i.to_string(), 10);
        }
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.front().map(String::as_str), Some("5"));
        assert_eq!(buffer.back().map(String::as_str), Some("14"));
    }

    #[test]
    fn test_digest_tracks_errors_and_tokens() {
        let mut digest = StdoutDigest::default();
        digest.record(
            &parse(r#"{"type":"assistant","message":{"content":"a","usage":{"output_tokens":3}}}"#),
            5,
        );
        digest.record(
            &parse(r#"{"type":"result","subtype":"error_max_turns","result":"too many turns","usage":{"total_tokens":10}}"#),
            5,
        );
        assert_eq!(digest.messages, 2);
        assert_eq!(digest.tokens, Some(13));
        assert_eq!(digest.last_error.as_deref(), Some("too many turns"));
        assert!(digest.result_text.is_none());
    }

    #[tokio::test]
    async fn test_executor_basics() {
        let executor = ProcessExecutor::new(
            ProcessExecutorConfig::default(),
            TracingChannel::shared("engine"),
        );
        assert_eq!(executor.name(), "process");
        assert!(executor.running_keys().await.is_empty());
        assert!(!executor.is_running("agent:reviewer").await);
        assert!(!executor.stop("agent:reviewer").await);
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = ProcessExecutorConfig {
            executable: "agentrun-definitely-missing-binary".to_string(),
            ..ProcessExecutorConfig::default()
        };
        let executor = ProcessExecutor::new(config, TracingChannel::shared("engine"));
        assert!(!executor.is_available());

        let err = executor
            .execute(
                "agent:x",
                "hello",
                &ExecutionOptions::new(),
                &temp.path().join("x.jsonl"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
        assert!(!executor.is_running("agent:x").await);
    }

    #[tokio::test]
    async fn test_reservation_blocks_duplicate_key() {
        let executor = ProcessExecutor::new(
            ProcessExecutorConfig::default(),
            TracingChannel::shared("engine"),
        );
        let reservation = executor.reserve("todo:t1").await.unwrap();
        assert!(executor.is_running("todo:t1").await);
        assert!(executor.reserve("todo:t1").await.unwrap_err().is_already_running());

        executor.release(reservation).await;
        assert!(!executor.is_running("todo:t1").await);
        assert!(executor.reserve("todo:t1").await.is_ok());
    }

    #[tokio::test]
    async fn test_stopped_reservation_never_spawns() {
        let temp = tempfile::TempDir::new().unwrap();
        // spawning this would fail with Spawn, so Stopped proves no spawn happened
        let config = ProcessExecutorConfig {
            executable: "agentrun-definitely-missing-binary".to_string(),
            ..ProcessExecutorConfig::default()
        };
        let executor = ProcessExecutor::new(config, TracingChannel::shared("engine"));

        let reservation = executor.reserve("agent:reviewer").await.unwrap();
        assert!(executor.stop("agent:reviewer").await);

        let err = executor
            .execute_reserved(
                reservation,
                "hello",
                &ExecutionOptions::new(),
                &temp.path().join("run.jsonl"),
            )
            .await
            .unwrap_err();
        assert!(err.is_stopped());
        assert!(!executor.is_running("agent:reviewer").await);
    }

    #[tokio::test]
    async fn test_stale_release_keeps_newer_reservation() {
        let executor = ProcessExecutor::new(
            ProcessExecutorConfig::default(),
            TracingChannel::shared("engine"),
        );
        let first = executor.reserve("agent:a").await.unwrap();
        assert!(executor.stop("agent:a").await);
        let second = executor.reserve("agent:a").await.unwrap();
        assert_ne!(first.run_id(), second.run_id());

        executor.release(first).await;
        assert!(executor.is_running("agent:a").await);
    }
}
