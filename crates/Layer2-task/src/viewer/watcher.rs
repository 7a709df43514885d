//! Live log viewer - pushes a fresh view whenever the log file changes
//!
//! Two independent triggers feed one debounced re-parse:
//! - a `notify` watcher on the log file's parent directory, filtered to the file
//! - a coarse polling interval, for filesystems where events are unreliable

use super::debounce::Debouncer;
use super::view::LogViewPayload;
use crate::history::HistoryLedger;
use crate::target::TargetKey;
use agentrun_foundation::{OutputChannel, TracingChannel, ViewerConfig};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const UPDATE_BUFFER: usize = 16;

/// Update delivered to a display surface
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerUpdate {
    /// Attached, first read pending
    Loading,
    Payload(LogViewPayload),
    /// The log file is gone; no further updates follow
    NotFound { path: PathBuf },
    /// Read failed; the viewer keeps watching
    Error(String),
}

/// Attaches subscriptions to execution log files
#[derive(Clone)]
pub struct LiveLogViewer {
    config: ViewerConfig,
    ledger: Option<Arc<HistoryLedger>>,
    channel: Arc<dyn OutputChannel>,
}

impl LiveLogViewer {
    pub fn new(config: ViewerConfig, channel: Arc<dyn OutputChannel>) -> Self {
        Self {
            config,
            ledger: None,
            channel,
        }
    }

    /// Ledger to clean up when an attached log file disappears
    pub fn with_ledger(mut self, ledger: Arc<HistoryLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Start watching `log_file` for `target`
    pub fn attach(&self, target: TargetKey, log_file: impl Into<PathBuf>) -> ViewerSubscription {
        let path = log_file.into();
        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);

        let session = WatchSession {
            target: target.clone(),
            path: path.clone(),
            debounce: Duration::from_millis(self.config.debounce_ms),
            poll_interval: Duration::from_millis(self.config.poll_interval_ms.max(1)),
            ledger: self.ledger.clone(),
            channel: Arc::clone(&self.channel),
            tx,
        };
        let task = tokio::spawn(session.run());

        ViewerSubscription {
            target,
            path,
            rx,
            task,
        }
    }
}

impl Default for LiveLogViewer {
    fn default() -> Self {
        Self::new(ViewerConfig::default(), TracingChannel::shared("viewer"))
    }
}

/// Receiving end of an attached viewer; dropping it stops the watcher
pub struct ViewerSubscription {
    target: TargetKey,
    path: PathBuf,
    rx: mpsc::Receiver<ViewerUpdate>,
    task: JoinHandle<()>,
}

impl ViewerSubscription {
    pub fn target(&self) -> &TargetKey {
        &self.target
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next update; `None` once the viewer has stopped
    pub async fn recv(&mut self) -> Option<ViewerUpdate> {
        self.rx.recv().await
    }

    /// Stop watching; already queued updates can still be received
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ViewerSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Flow {
    Continue,
    Stop,
}

struct WatchSession {
    target: TargetKey,
    path: PathBuf,
    debounce: Duration,
    poll_interval: Duration,
    ledger: Option<Arc<HistoryLedger>>,
    channel: Arc<dyn OutputChannel>,
    tx: mpsc::Sender<ViewerUpdate>,
}

impl WatchSession {
    async fn run(self) {
        if self.tx.send(ViewerUpdate::Loading).await.is_err() {
            return;
        }

        let mut last: Option<LogViewPayload> = None;
        if let Flow::Stop = self.refresh(&mut last).await {
            return;
        }

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<()>();
        let watcher = self.start_watcher(event_tx);

        let mut poll = tokio::time::interval_at(
            tokio::time::Instant::now() + self.poll_interval,
            self.poll_interval,
        );
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut debouncer = Debouncer::new(self.debounce);

        loop {
            tokio::select! {
                _ = self.tx.closed() => break,
                Some(_) = event_rx.recv() => debouncer.trigger(),
                _ = poll.tick() => debouncer.trigger(),
                _ = debouncer.fired(), if debouncer.is_pending() => {
                    if let Flow::Stop = self.refresh(&mut last).await {
                        break;
                    }
                }
            }
        }

        drop(watcher);
        self.channel
            .debug(&format!("Viewer for {} detached", self.target));
    }

    fn start_watcher(&self, event_tx: mpsc::UnboundedSender<()>) -> Option<RecommendedWatcher> {
        let parent = self.path.parent()?.to_path_buf();
        let file_name = self.path.file_name()?.to_os_string();

        let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let relevant = event.paths.is_empty()
                    || event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()));
                if relevant {
                    let _ = event_tx.send(());
                }
            }
        }) {
            Ok(watcher) => watcher,
            Err(e) => {
                self.channel
                    .warn(&format!("File watcher unavailable, polling only: {}", e));
                return None;
            }
        };

        let watch_dir = if parent.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            parent
        };
        if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
            self.channel.warn(&format!(
                "Cannot watch {}, polling only: {}",
                watch_dir.display(),
                e
            ));
            return None;
        }
        Some(watcher)
    }

    /// Re-read the whole file and push the view if it changed
    async fn refresh(&self, last: &mut Option<LogViewPayload>) -> Flow {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let payload = LogViewPayload::from_content(&content);
                if last.as_ref() == Some(&payload) {
                    return Flow::Continue;
                }
                *last = Some(payload.clone());
                self.send(ViewerUpdate::Payload(payload)).await
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.channel.info(&format!(
                    "Log file for {} is gone: {}",
                    self.target,
                    self.path.display()
                ));
                let _ = self
                    .tx
                    .send(ViewerUpdate::NotFound {
                        path: self.path.clone(),
                    })
                    .await;
                if let Some(ledger) = &self.ledger {
                    if let Err(e) = ledger.cleanup_invalid_records().await {
                        self.channel
                            .error(&format!("History cleanup failed: {}", e));
                    }
                }
                Flow::Stop
            }
            Err(e) => {
                self.send(ViewerUpdate::Error(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
                .await
            }
        }
    }

    async fn send(&self, update: ViewerUpdate) -> Flow {
        if self.tx.send(update).await.is_err() {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}
