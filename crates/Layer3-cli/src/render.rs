//! Plain-text rendering for log views and history rows

use agentrun_task::{EntryStatus, ExecutionRecord, ExecutionStatus, LogViewEntry, LogViewPayload, MessageKind};
use chrono::Local;

/// Prints only entries not yet shown
#[derive(Debug, Default)]
pub struct EntryPrinter {
    printed: usize,
}

impl EntryPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print new entries of `payload`; a shrunk file restarts from the top
    pub fn print_new(&mut self, payload: &LogViewPayload) {
        if payload.entries.len() < self.printed {
            println!("--- log file was rewritten ---");
            self.printed = 0;
        }
        for entry in &payload.entries[self.printed..] {
            println!("{}", entry_line(entry));
        }
        self.printed = payload.entries.len();
    }
}

pub fn entry_line(entry: &LogViewEntry) -> String {
    let offset = entry
        .relative_to_start_ms
        .map(|ms| format!("+{:>6.1}s", ms as f64 / 1000.0))
        .unwrap_or_else(|| " ".repeat(8));
    let marker = match entry.status {
        EntryStatus::Error => "✗",
        EntryStatus::Success => "✓",
        EntryStatus::Info => " ",
    };
    let tokens = entry
        .tokens
        .map(|t| format!(" ({} tok)", t))
        .unwrap_or_default();

    let text = entry.text();
    let mut lines = text.lines();
    let first = lines.next().unwrap_or_default();
    let mut out = format!("{} {} {:<9} {}{}", offset, marker, entry.badge, first, tokens);
    for line in lines {
        out.push('\n');
        out.push_str(&" ".repeat(21));
        out.push_str(line);
    }
    out
}

pub fn summary_line(payload: &LogViewPayload) -> String {
    let counts = MessageKind::ALL
        .iter()
        .filter(|kind| payload.count(**kind) > 0)
        .map(|kind| format!("{} {}", payload.count(*kind), kind))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{} entries ({}), {} tokens",
        payload.entries.len(),
        if counts.is_empty() { "none" } else { &counts },
        payload.total_tokens
    )
}

pub fn status_badge(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Running => "⟳ running",
        ExecutionStatus::Success => "✓ success",
        ExecutionStatus::Failed => "✗ failed",
        ExecutionStatus::Stopped => "■ stopped",
        ExecutionStatus::Paused => "⏸ paused",
    }
}

pub fn history_header() -> String {
    format!(
        "{:<10} {:<6} {:<20} {:<11} {:<19} {:>8}",
        "ID", "TYPE", "TARGET", "STATUS", "STARTED", "DURATION"
    )
}

pub fn history_row(record: &ExecutionRecord) -> String {
    let id_short = &record.id[..8.min(record.id.len())];
    let started = record
        .start_time
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S");
    let duration = record
        .duration()
        .map(|d| format_duration_ms(d.num_milliseconds()))
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{:<10} {:<6} {:<20} {:<11} {:<19} {:>8}",
        id_short,
        record.kind,
        truncate(&record.label, 20),
        status_badge(record.status),
        started,
        duration
    )
}

pub fn record_details(record: &ExecutionRecord) -> String {
    let mut out = vec![
        format!("Execution {}", record.id),
        format!("  target:   {}:{} ({})", record.kind, record.target_id, record.label),
        format!("  status:   {}", status_badge(record.status)),
        format!("  started:  {}", record.start_time.with_timezone(&Local)),
    ];
    if let Some(end) = record.end_time {
        out.push(format!("  ended:    {}", end.with_timezone(&Local)));
    }
    if let Some(source) = &record.source_file {
        out.push(format!(
            "  source:   {} {}",
            source.display(),
            record.version_hash.as_deref().unwrap_or("")
        ));
    }
    out.push(format!("  log:      {}", record.log_file.display()));
    if !record.metadata.is_empty() {
        out.push(format!(
            "  metadata: {}",
            serde_json::Value::Object(record.metadata.clone())
        ));
    }
    out.join("\n")
}

fn format_duration_ms(ms: i64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
