//! Target Status Tracker - per-target lifecycle on top of the executor and ledger
//!
//! Features:
//! - Reject-if-running start, checked against the status cache and the ledger
//! - Ledger record opened before the process starts and closed exactly once
//! - Stop maps to Idle (agent) or Paused (todo); the ledger records Stopped
//! - Status change broadcast for UI refresh

use crate::executor::{ExecutionSummary, Executor};
use crate::history::{BeginExecution, CompleteExecution, ExecutionRecord, ExecutionStatus, HistoryLedger};
use crate::log::LogWriter;
use crate::state::{TargetState, TargetStatus};
use crate::target::{TargetKey, TargetKind};
use agentrun_foundation::{Error, ExecutionOptions, OutputChannel, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 64;

/// Request to start one execution
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub target: TargetKey,
    /// Text written to the process's stdin
    pub input: String,
    pub label: Option<String>,
    /// Agent or todo definition file
    pub source_file: Option<PathBuf>,
    pub options: ExecutionOptions,
    /// Override for the generated log file location
    pub log_file: Option<PathBuf>,
}

impl StartRequest {
    pub fn new(target: TargetKey, input: impl Into<String>) -> Self {
        Self {
            target,
            input: input.into(),
            label: None,
            source_file: None,
            options: ExecutionOptions::default(),
            log_file: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn source_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_file = Some(path.into());
        self
    }

    pub fn options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// A run that has been started
pub struct StartedRun {
    pub record: ExecutionRecord,
    /// Resolves to the target's status once the run has been settled
    pub handle: JoinHandle<TargetStatus>,
}

impl StartedRun {
    pub fn log_file(&self) -> &Path {
        &self.record.log_file
    }
}

/// Broadcast on every status transition
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub target: TargetKey,
    pub status: TargetStatus,
}

/// Target status tracker
#[derive(Clone)]
pub struct StatusTracker {
    executor: Arc<dyn Executor>,
    ledger: Arc<HistoryLedger>,
    statuses: Arc<Mutex<HashMap<TargetKey, TargetStatus>>>,
    events: broadcast::Sender<StatusEvent>,
    log_dir: PathBuf,
    channel: Arc<dyn OutputChannel>,
}

impl StatusTracker {
    pub fn new(
        executor: Arc<dyn Executor>,
        ledger: Arc<HistoryLedger>,
        log_dir: impl Into<PathBuf>,
        channel: Arc<dyn OutputChannel>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            executor,
            ledger,
            statuses: Arc::new(Mutex::new(HashMap::new())),
            events,
            log_dir: log_dir.into(),
            channel,
        }
    }

    pub fn ledger(&self) -> Arc<HistoryLedger> {
        Arc::clone(&self.ledger)
    }

    pub fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.executor)
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Receive every status change from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Default log location: `<logDir>/<kind>s/<target>/<YYYYMMDD-HHMMSS>-<id8>.jsonl`
    pub fn log_path_for(&self, target: &TargetKey, started: DateTime<Utc>) -> PathBuf {
        let nonce = Uuid::new_v4().simple().to_string();
        self.log_dir.join(target.log_subdir()).join(format!(
            "{}-{}.jsonl",
            started.format("%Y%m%d-%H%M%S"),
            &nonce[..8]
        ))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start an execution for `request.target`
    pub async fn start(&self, request: StartRequest) -> Result<StartedRun> {
        let target = request.target.clone();

        let (record, reservation) = {
            let mut statuses = self.statuses.lock().await;
            if statuses.get(&target).map_or(false, |s| s.state.is_running()) {
                return Err(Error::AlreadyRunning(target.to_string()));
            }
            if let Some(running) = self.ledger.running_for(target.kind, &target.id).await {
                self.channel.warn(&format!(
                    "{} already has running execution {}",
                    target, running.id
                ));
                return Err(Error::AlreadyRunning(target.to_string()));
            }

            // stoppable from here on, before the process exists
            let reservation = self.executor.reserve(&target.task_key()).await?;
            let record = match self.open_record(&target, &request).await {
                Ok(record) => record,
                Err(e) => {
                    self.executor.release(reservation).await;
                    return Err(e);
                }
            };

            let status = statuses
                .entry(target.clone())
                .or_insert_with(|| TargetStatus::idle(target.id.clone()));
            status.begin(record.id.clone(), record.log_file.clone(), record.start_time);
            self.emit(&target, status);
            (record, reservation)
        };

        let tracker = self.clone();
        let history_id = record.id.clone();
        let log_file = record.log_file.clone();
        let handle = tokio::spawn(async move {
            let result = tracker
                .executor
                .execute_reserved(reservation, &request.input, &request.options, &log_file)
                .await;
            tracker.settle(&target, &history_id, result).await
        });

        Ok(StartedRun { record, handle })
    }

    /// Create the log file, then the Running ledger record pointing at it
    async fn open_record(
        &self,
        target: &TargetKey,
        request: &StartRequest,
    ) -> Result<ExecutionRecord> {
        let log_file = request
            .log_file
            .clone()
            .unwrap_or_else(|| self.log_path_for(target, Utc::now()));
        // exists before the record does, so cleanup never sees a dangling path
        drop(LogWriter::open(&log_file).await?);

        let mut begin = BeginExecution::new(target.kind, target.id.clone(), &log_file)
            .metadata("taskKey", target.task_key());
        if let Some(label) = &request.label {
            begin = begin.label(label.clone());
        }
        if let Some(source) = &request.source_file {
            begin = begin.source_file(source.clone());
        }
        self.ledger.begin_execution(begin).await
    }

    /// Apply the executor's outcome to the ledger and the status cache
    async fn settle(
        &self,
        target: &TargetKey,
        history_id: &str,
        result: Result<ExecutionSummary>,
    ) -> TargetStatus {
        let mut statuses = self.statuses.lock().await;

        let (completion, state, error) = match &result {
            Ok(summary) => {
                let mut completion = CompleteExecution::success()
                    .metadata("exitCode", summary.exit_code)
                    .metadata("messageCount", summary.message_count);
                if let Some(tokens) = summary.tokens {
                    completion = completion.metadata("tokens", tokens);
                }
                (completion, TargetState::Idle, None)
            }
            // stop already closed the record
            Err(e) if e.is_stopped() => (CompleteExecution::stopped(), stopped_state(target.kind), None),
            Err(e) => {
                let mut completion = CompleteExecution::failed(e.to_string());
                if let Some(code) = e.exit_code() {
                    completion = completion.metadata("exitCode", code);
                }
                (completion, TargetState::Error, Some(e.to_string()))
            }
        };

        // a stopped record keeps its status; only metadata is merged
        if let Err(e) = self.ledger.complete_execution(history_id, completion).await {
            self.channel
                .error(&format!("Failed to record completion of {}: {}", history_id, e));
        }

        let status = statuses
            .entry(target.clone())
            .or_insert_with(|| TargetStatus::idle(target.id.clone()));

        if status.is_run(history_id) && status.state.is_running() {
            status.finish(state, error);
            match &result {
                Ok(_) => self.channel.info(&format!("{} completed", target)),
                Err(e) => self.channel.warn(&format!("{} failed: {}", target, e)),
            }
            self.emit(target, status);
        } else {
            self.channel
                .debug(&format!("Ignoring late completion of {} for {}", history_id, target));
        }

        status.clone()
    }

    /// Stop the running execution of `target`; `false` if it was not running
    pub async fn stop(&self, target: &TargetKey) -> Result<bool> {
        let mut statuses = self.statuses.lock().await;
        let Some(status) = statuses.get_mut(target) else {
            return Ok(false);
        };
        if !status.state.is_running() {
            return Ok(false);
        }

        // ledger first: a failed write leaves the run untouched
        if let Some(history_id) = status.history_id.clone() {
            self.ledger
                .complete_execution(&history_id, CompleteExecution::stopped())
                .await?;
        }

        if !self.executor.stop(&target.task_key()).await {
            self.channel
                .debug(&format!("{} had no live process to signal", target));
        }

        status.finish(stopped_state(target.kind), None);

        self.channel.info(&format!("{} stopped", target));
        self.emit(target, status);
        Ok(true)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn status(&self, target: &TargetKey) -> TargetStatus {
        self.statuses
            .lock()
            .await
            .get(target)
            .cloned()
            .unwrap_or_else(|| TargetStatus::idle(target.id.clone()))
    }

    pub async fn statuses(&self) -> Vec<(TargetKey, TargetStatus)> {
        let mut all: Vec<(TargetKey, TargetStatus)> = self
            .statuses
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub async fn is_running(&self, target: &TargetKey) -> bool {
        self.status(target).await.state.is_running()
    }

    /// Re-derive the cached status from the ledger when the cache claims
    /// Running but the ledger disagrees
    pub async fn reconcile(&self, target: &TargetKey) -> TargetStatus {
        let mut statuses = self.statuses.lock().await;
        let Some(status) = statuses.get_mut(target) else {
            return TargetStatus::idle(target.id.clone());
        };
        if !status.state.is_running() {
            return status.clone();
        }

        let record = match &status.history_id {
            Some(id) => self.ledger.get_by_id(id).await,
            None => None,
        };
        if record.as_ref().map_or(false, ExecutionRecord::is_running) {
            return status.clone();
        }

        let (state, error) = match &record {
            Some(record) => derive_state(target.kind, record),
            None => (TargetState::Idle, None),
        };
        self.channel.warn(&format!(
            "{} was cached as running but the ledger says {}",
            target,
            record
                .as_ref()
                .map_or("nothing", |r| r.status.as_str())
        ));
        status.finish(state, error);
        self.emit(target, status);
        status.clone()
    }

    fn emit(&self, target: &TargetKey, status: &TargetStatus) {
        // no subscribers is fine
        let _ = self.events.send(StatusEvent {
            target: target.clone(),
            status: status.clone(),
        });
    }
}

/// State a target settles in after an explicit stop
fn stopped_state(kind: TargetKind) -> TargetState {
    match kind {
        TargetKind::Agent => TargetState::Idle,
        TargetKind::Todo => TargetState::Paused,
    }
}

fn derive_state(kind: TargetKind, record: &ExecutionRecord) -> (TargetState, Option<String>) {
    match record.status {
        ExecutionStatus::Running => (TargetState::Running, None),
        ExecutionStatus::Success => (TargetState::Idle, None),
        ExecutionStatus::Failed => (
            TargetState::Error,
            record
                .metadata
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
        ),
        ExecutionStatus::Paused => (TargetState::Paused, None),
        ExecutionStatus::Stopped => (stopped_state(kind), None),
    }
}
