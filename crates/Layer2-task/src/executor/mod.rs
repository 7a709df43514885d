//! Task executors
//!
//! - `ProcessExecutor` - runs the external agent tool and streams its output into the log store
//! - `CommandSpec` - deterministic flag list built from merged execution options

pub mod command;
pub mod process;
pub mod r#trait;

pub use command::{CommandSpec, STREAM_FLAGS};
pub use process::{FailureReport, ProcessExecutor, ProcessExecutorConfig};
pub use r#trait::{ExecutionSummary, Executor, Reservation};
