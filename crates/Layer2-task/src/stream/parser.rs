//! Stream message parser
//!
//! Turns one line of process output into a [`StreamMessage`]. Total: any
//! input yields exactly one message, non-JSON lines degrade to System.

use super::message::{MessageKind, Segment, StreamMessage, NO_CONTENT};
use super::usage::extract_tokens;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Parse one raw output line
pub fn parse(line: &str) -> StreamMessage {
    let line = line.trim_end_matches(['\r', '\n']);
    match serde_json::from_str::<Value>(line.trim()) {
        Ok(value @ Value::Object(_)) => parse_value(value),
        _ => StreamMessage::system_text(line),
    }
}

/// Classify an already-decoded JSON object
pub fn parse_value(value: Value) -> StreamMessage {
    let Value::Object(ref map) = value else {
        return StreamMessage::system_text(value.to_string());
    };

    let timestamp = map.get("timestamp").and_then(parse_timestamp);
    let tokens = extract_tokens(&value);
    let kind_str = map.get("type").and_then(Value::as_str).unwrap_or_default();

    let (kind, segments, is_error) = match kind_str {
        "system" => (MessageKind::System, system_segments(map), false),
        "assistant" => (MessageKind::Assistant, content_segments(map), false),
        "user" => (MessageKind::User, content_segments(map), false),
        "result" => {
            let (segments, is_error) = result_segments(map);
            (MessageKind::Result, segments, is_error)
        }
        "error" => (MessageKind::Error, error_segments(map), true),
        _ => (
            MessageKind::System,
            vec![Segment::text(compact_without_timestamp(map))],
            false,
        ),
    };

    StreamMessage {
        kind,
        segments: ensure_content(segments),
        is_error,
        tokens,
        timestamp,
        raw: value,
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

// ============================================================================
// Branches
// ============================================================================

fn system_segments(map: &Map<String, Value>) -> Vec<Segment> {
    for key in ["message", "text", "content"] {
        if let Some(text) = map.get(key).and_then(Value::as_str) {
            return vec![Segment::text(text)];
        }
    }

    if let Some(subtype) = map.get("subtype").and_then(Value::as_str) {
        let mut parts = vec![subtype.to_string()];
        if let Some(model) = map.get("model").and_then(Value::as_str) {
            parts.push(format!("model: {}", model));
        }
        if let Some(session) = map.get("session_id").and_then(Value::as_str) {
            parts.push(format!("session: {}", session));
        }
        if let Some(tools) = map.get("tools").and_then(Value::as_array) {
            parts.push(format!("tools: {}", tools.len()));
        }
        return vec![Segment::text(parts.join(" · "))];
    }

    vec![Segment::text(compact_without_timestamp(map))]
}

fn content_segments(map: &Map<String, Value>) -> Vec<Segment> {
    let content = map
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| map.get("content"));

    match content {
        Some(Value::String(text)) => vec![Segment::text(text.clone())],
        Some(Value::Array(blocks)) => blocks.iter().filter_map(block_segment).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![Segment::text(other.to_string())],
    }
}

fn block_segment(block: &Value) -> Option<Segment> {
    let block_type = block.get("type").and_then(Value::as_str).unwrap_or("text");
    match block_type {
        "text" => block
            .get("text")
            .and_then(Value::as_str)
            .map(Segment::text),
        "thinking" => block
            .get("thinking")
            .or_else(|| block.get("text"))
            .and_then(Value::as_str)
            .map(|text| Segment::Thinking {
                text: text.to_string(),
            }),
        "tool_use" => Some(Segment::ToolUse {
            name: block
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("tool")
                .to_string(),
            input: block.get("input").cloned().unwrap_or(Value::Null),
            id: block.get("id").and_then(Value::as_str).map(str::to_string),
        }),
        "tool_result" => Some(Segment::ToolResult {
            content: flatten_content(block.get("content")),
            is_error: block
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            tool_use_id: block
                .get("tool_use_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        other => Some(Segment::text(format!("[{}]", other))),
    }
}

fn result_segments(map: &Map<String, Value>) -> (Vec<Segment>, bool) {
    let subtype = map.get("subtype").and_then(Value::as_str).unwrap_or_default();
    let is_error = map
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || subtype.starts_with("error");

    let text = map
        .get("result")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| error_text(map))
        .or_else(|| {
            if is_error && !subtype.is_empty() {
                Some(subtype.to_string())
            } else {
                None
            }
        });

    (text.map(Segment::text).into_iter().collect(), is_error)
}

fn error_segments(map: &Map<String, Value>) -> Vec<Segment> {
    error_text(map)
        .or_else(|| {
            map.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .map(Segment::text)
        .into_iter()
        .collect()
}

fn error_text(map: &Map<String, Value>) -> Option<String> {
    match map.get("error")? {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(Value::Object(obj.clone()).to_string())),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Tool-result content is either a string or a list of blocks
fn flatten_content(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item.get("text").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => match item.get("type").and_then(Value::as_str) {
                    Some(kind) => format!("[{}]", kind),
                    None => item.to_string(),
                },
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

fn compact_without_timestamp(map: &Map<String, Value>) -> String {
    let mut copy = map.clone();
    copy.remove("timestamp");
    Value::Object(copy).to_string()
}

fn ensure_content(segments: Vec<Segment>) -> Vec<Segment> {
    let segments: Vec<Segment> = segments.into_iter().filter(|s| !s.is_blank()).collect();
    if segments.is_empty() {
        vec![Segment::text(NO_CONTENT)]
    } else {
        segments
    }
}
