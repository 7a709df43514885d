//! Stream message types
//!
//! One classified unit of output from the external process. The original
//! JSON object is kept so the log store can persist it verbatim.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Placeholder used when a message carries no readable content
pub const NO_CONTENT: &str = "(no content)";

/// Message classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    System,
    Assistant,
    User,
    Result,
    Error,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::System,
        MessageKind::Assistant,
        MessageKind::User,
        MessageKind::Result,
        MessageKind::Error,
    ];

    /// Value of the `type` discriminator
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::System => "system",
            MessageKind::Assistant => "assistant",
            MessageKind::User => "user",
            MessageKind::Result => "result",
            MessageKind::Error => "error",
        }
    }

    /// Display badge
    pub fn badge(&self) -> &'static str {
        match self {
            MessageKind::System => "System",
            MessageKind::Assistant => "Assistant",
            MessageKind::User => "User",
            MessageKind::Result => "Result",
            MessageKind::Error => "Error",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of a message payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    Text {
        text: String,
    },
    Thinking {
        text: String,
    },
    ToolUse {
        name: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    ToolResult {
        content: String,
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
    },
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text { text: text.into() }
    }

    /// Whether the segment has nothing worth showing
    pub fn is_blank(&self) -> bool {
        match self {
            Segment::Text { text } | Segment::Thinking { text } => text.trim().is_empty(),
            Segment::ToolUse { name, .. } => name.trim().is_empty(),
            Segment::ToolResult { .. } => false,
        }
    }

    /// Single-line-ish text rendering
    pub fn display_text(&self) -> String {
        match self {
            Segment::Text { text } => text.clone(),
            Segment::Thinking { text } => format!("(thinking) {}", text),
            Segment::ToolUse { name, input, .. } => {
                if input.is_null() || input.as_object().map_or(false, |o| o.is_empty()) {
                    format!("→ {}", name)
                } else {
                    format!("→ {} {}", name, input)
                }
            }
            Segment::ToolResult {
                content, is_error, ..
            } => {
                if *is_error {
                    format!("← error: {}", content)
                } else {
                    format!("← {}", content)
                }
            }
        }
    }
}

/// A classified message
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub kind: MessageKind,
    pub segments: Vec<Segment>,
    /// Explicit failure signalled by the message itself
    pub is_error: bool,
    pub tokens: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Source object as persisted in the log file
    pub raw: Value,
}

impl StreamMessage {
    /// System message wrapping free text (non-JSON output)
    pub fn system_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let raw = json!({ "type": "system", "message": text });
        Self {
            kind: MessageKind::System,
            segments: vec![Segment::text(non_empty(text))],
            is_error: false,
            tokens: None,
            timestamp: None,
            raw,
        }
    }

    /// Error message wrapping free text (stderr output)
    pub fn error_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let raw = json!({ "type": "error", "error": text });
        Self {
            kind: MessageKind::Error,
            segments: vec![Segment::text(non_empty(text))],
            is_error: true,
            tokens: None,
            timestamp: None,
            raw,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// All segments joined for previews and error summaries
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(Segment::display_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Error text carried by this message, if it reports a failure
    pub fn error_message(&self) -> Option<String> {
        if self.is_error {
            Some(self.text())
        } else {
            None
        }
    }

    /// Final result text of a successful `result` message
    pub fn result_text(&self) -> Option<String> {
        if self.kind == MessageKind::Result && !self.is_error {
            Some(self.text())
        } else {
            None
        }
    }

    /// JSON-Lines representation (no trailing newline)
    pub fn to_log_line(&self) -> String {
        let mut value = match &self.raw {
            Value::Object(map) => Value::Object(map.clone()),
            _ => json!({ "type": self.kind.as_str(), "message": self.text() }),
        };
        if let (Some(ts), Value::Object(map)) = (self.timestamp, &mut value) {
            map.insert(
                "timestamp".to_string(),
                Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        value.to_string()
    }
}

fn non_empty(text: String) -> String {
    if text.trim().is_empty() {
        NO_CONTENT.to_string()
    } else {
        text
    }
}
