//! # agentrun-task
//!
//! Execution orchestration and live log pipeline for agentrun.
//! Launches the external agent tool, persists its streamed output and keeps
//! an auditable history of every run.
//!
//! ## Features
//!
//! - Stream message parsing (JSON-Lines, total over malformed input)
//! - Append-only execution logs
//! - History ledger with crash recovery
//! - Process executor with reject-if-running and graceful stop
//! - Per-target status tracking with change broadcast
//! - **Live log viewer driven by file watching and polling**

pub mod executor;
pub mod history;
pub mod log;
pub mod state;
pub mod stream;
pub mod target;
pub mod tracker;
pub mod viewer;

// Execution
pub use executor::{
    CommandSpec, ExecutionSummary, Executor, FailureReport, ProcessExecutor, ProcessExecutorConfig,
    Reservation,
};

// Stream & log
pub use log::{parse_log_content, ExecutionLogStore, LogWriter};
pub use stream::{parse, MessageKind, Segment, StreamMessage, NO_CONTENT};

// History
pub use history::{
    BeginExecution, CompleteExecution, ExecutionRecord, ExecutionStatus, HistoryLedger,
};

// Targets & status
pub use state::{TargetState, TargetStatus};
pub use target::{TargetKey, TargetKind};
pub use tracker::{StartRequest, StartedRun, StatusEvent, StatusTracker};

// Viewer
pub use viewer::{
    build_view, Debouncer, EntryStatus, LiveLogViewer, LogViewEntry, LogViewPayload,
    ViewerSubscription, ViewerUpdate,
};
