//! Log view model - display-ready projection of an execution log

use crate::log::parse_log_content;
use crate::stream::{MessageKind, Segment, StreamMessage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entry outcome for styling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Info,
    Success,
    Error,
}

impl EntryStatus {
    fn of(message: &StreamMessage) -> Self {
        if message.is_error || message.kind == MessageKind::Error {
            EntryStatus::Error
        } else if message.kind == MessageKind::Result {
            EntryStatus::Success
        } else {
            EntryStatus::Info
        }
    }
}

/// One rendered log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogViewEntry {
    pub index: usize,
    pub kind: MessageKind,
    pub badge: String,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Milliseconds since the first timestamped entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_to_start_ms: Option<i64>,
    /// Milliseconds since the previous timestamped entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_previous_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    pub payload: Vec<Segment>,
}

impl LogViewEntry {
    pub fn text(&self) -> String {
        self.payload
            .iter()
            .map(Segment::display_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Whole-file view pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogViewPayload {
    pub entries: Vec<LogViewEntry>,
    pub counts: BTreeMap<MessageKind, usize>,
    pub total_tokens: u64,
    /// Lines in the file, blank ones included
    pub line_count: usize,
}

impl LogViewPayload {
    /// Parse a JSON-Lines document into a view
    pub fn from_content(content: &str) -> Self {
        let mut view = build_view(&parse_log_content(content));
        view.line_count = content.lines().count();
        view
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, kind: MessageKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }
}

/// Build a view from parsed messages, keeping their order
pub fn build_view(messages: &[StreamMessage]) -> LogViewPayload {
    let mut counts: BTreeMap<MessageKind, usize> =
        MessageKind::ALL.iter().map(|kind| (*kind, 0)).collect();
    let mut total_tokens = 0u64;
    let mut start: Option<DateTime<Utc>> = None;
    let mut previous: Option<DateTime<Utc>> = None;

    let entries = messages
        .iter()
        .enumerate()
        .map(|(index, message)| {
            *counts.entry(message.kind).or_insert(0) += 1;
            total_tokens += message.tokens.unwrap_or(0);

            let (relative_to_start_ms, delta_previous_ms) = match message.timestamp {
                Some(ts) => {
                    let first = *start.get_or_insert(ts);
                    let delta = previous.map(|p| (ts - p).num_milliseconds());
                    previous = Some(ts);
                    (Some((ts - first).num_milliseconds()), delta)
                }
                None => (None, None),
            };

            LogViewEntry {
                index,
                kind: message.kind,
                badge: message.kind.badge().to_string(),
                status: EntryStatus::of(message),
                timestamp: message.timestamp,
                relative_to_start_ms,
                delta_previous_ms,
                tokens: message.tokens,
                payload: message.segments.clone(),
            }
        })
        .collect();

    LogViewPayload {
        entries,
        counts,
        total_tokens,
        line_count: messages.len(),
    }
}
