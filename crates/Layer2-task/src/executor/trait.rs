//! Executor trait

use agentrun_foundation::{ExecutionOptions, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Outcome of a run that exited with code 0
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub exit_code: i32,

    /// Lines appended to the log file during this run
    pub message_count: usize,

    /// Text of the final successful `result` message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,

    /// Sum of token counts reported by the stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,

    pub log_file: PathBuf,
}

/// Claim on a task key, taken before the process exists
///
/// A reservation is already visible to `stop` and `is_running`. It is consumed
/// by [`Executor::execute_reserved`] or handed back with [`Executor::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct Reservation {
    task_key: String,
    run_id: u64,
}

impl Reservation {
    pub fn new(task_key: impl Into<String>, run_id: u64) -> Self {
        Self {
            task_key: task_key.into(),
            run_id,
        }
    }

    pub fn task_key(&self) -> &str {
        &self.task_key
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }
}

/// Executor trait - implement to add new execution backends
#[async_trait]
pub trait Executor: Send + Sync {
    /// Claim `task_key`; `AlreadyRunning` if a run holds it
    async fn reserve(&self, task_key: &str) -> Result<Reservation>;

    /// Run a reserved invocation to completion, streaming its output into
    /// `log_file`. Returns `Error::Stopped` without spawning when the
    /// reservation was stopped first.
    async fn execute_reserved(
        &self,
        reservation: Reservation,
        input: &str,
        options: &ExecutionOptions,
        log_file: &Path,
    ) -> Result<ExecutionSummary>;

    /// Give back a reservation that will not be executed
    async fn release(&self, reservation: Reservation);

    /// Reserve `task_key` and run one invocation to completion
    async fn execute(
        &self,
        task_key: &str,
        input: &str,
        options: &ExecutionOptions,
        log_file: &Path,
    ) -> Result<ExecutionSummary> {
        let reservation = self.reserve(task_key).await?;
        self.execute_reserved(reservation, input, options, log_file)
            .await
    }

    /// Signal the run for `task_key` to terminate; `false` if nothing was running
    async fn stop(&self, task_key: &str) -> bool;

    /// Check if a run for `task_key` is in flight
    async fn is_running(&self, task_key: &str) -> bool;

    /// Check if the executor is available
    fn is_available(&self) -> bool;

    /// Get executor name
    fn name(&self) -> &'static str;
}
