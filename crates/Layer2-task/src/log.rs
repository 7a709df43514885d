//! Execution Log Store - append-only JSON-Lines persistence
//!
//! Provides:
//! - Per-run [`LogWriter`] held by the process engine, flushed per line
//! - One-shot [`ExecutionLogStore::append`]
//! - Whole-file reads for the live viewer and the CLI

use crate::stream::{parse, StreamMessage};
use agentrun_foundation::{OutputChannel, Result, TracingChannel};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Open append handle to one execution log file
#[derive(Debug)]
pub struct LogWriter {
    path: PathBuf,
    file: File,
    lines_written: usize,
}

impl LogWriter {
    /// Open `path` for appending, creating parent directories as needed.
    /// An existing file is extended, never truncated.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file,
            lines_written: 0,
        })
    }

    /// Write one message as a JSON line and flush
    pub async fn append(&mut self, message: &StreamMessage) -> Result<()> {
        let mut line = message.to_log_line();
        line.push('\n');
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        self.lines_written += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines written through this handle (not counting pre-existing content)
    pub fn lines_written(&self) -> usize {
        self.lines_written
    }
}

/// Execution log store
#[derive(Clone)]
pub struct ExecutionLogStore {
    channel: Arc<dyn OutputChannel>,
}

impl ExecutionLogStore {
    pub fn new(channel: Arc<dyn OutputChannel>) -> Self {
        Self { channel }
    }

    /// Open a writer for the duration of a run
    pub async fn open_writer(&self, path: impl Into<PathBuf>) -> Result<LogWriter> {
        let writer = LogWriter::open(path).await?;
        self.channel
            .debug(&format!("Opened execution log {}", writer.path().display()));
        Ok(writer)
    }

    /// Append a single message to `path`
    pub async fn append(&self, path: &Path, message: &StreamMessage) -> Result<()> {
        let mut writer = LogWriter::open(path).await?;
        writer.append(message).await
    }

    /// Read and parse every non-blank line of `path`, in file order
    pub async fn read_messages(&self, path: &Path) -> Result<Vec<StreamMessage>> {
        let content = fs::read_to_string(path).await?;
        Ok(parse_log_content(&content))
    }
}

impl Default for ExecutionLogStore {
    fn default() -> Self {
        Self::new(TracingChannel::shared("log-store"))
    }
}

/// Parse a JSON-Lines document; blank lines carry no message
pub fn parse_log_content(content: &str) -> Vec<StreamMessage> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse)
        .collect()
}
