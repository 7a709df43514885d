//! Target definition and types
//!
//! A target is a logical task identity (an agent or a todo item) against
//! which at most one execution may run at a time.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Configured agent definition
    Agent,

    /// Todo item executed through an agent
    Todo,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Agent => "agent",
            TargetKind::Todo => "todo",
        }
    }

    /// Directory name used for log files of this kind
    pub fn log_dir_name(&self) -> &'static str {
        match self {
            TargetKind::Agent => "agents",
            TargetKind::Todo => "todos",
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TargetKind {
    type Err = agentrun_foundation::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "agent" => Ok(TargetKind::Agent),
            "todo" => Ok(TargetKind::Todo),
            other => Err(agentrun_foundation::Error::InvalidInput(format!(
                "unknown target kind: {}",
                other
            ))),
        }
    }
}

/// Unique identity of a target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetKey {
    pub kind: TargetKind,
    pub id: String,
}

impl TargetKey {
    pub fn new(kind: TargetKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn agent(id: impl Into<String>) -> Self {
        Self::new(TargetKind::Agent, id)
    }

    pub fn todo(id: impl Into<String>) -> Self {
        Self::new(TargetKind::Todo, id)
    }

    /// Key used by the process engine's running set
    pub fn task_key(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }

    /// Relative log directory for this target, safe as a single path segment
    pub fn log_subdir(&self) -> PathBuf {
        PathBuf::from(self.kind.log_dir_name()).join(sanitize_segment(&self.id))
    }
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Replace anything that is not safe in a file name
fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_key() {
        let key = TargetKey::agent("reviewer");
        assert_eq!(key.task_key(), "agent:reviewer");
        assert_eq!(key.to_string(), "agent:reviewer");
    }

    #[test]
    fn test_log_subdir_is_sanitized() {
        let key = TargetKey::todo("../etc/passwd item");
        let subdir = key.log_subdir();
        assert_eq!(subdir, PathBuf::from("todos").join("_etc_passwd_item"));
        assert_eq!(TargetKey::agent("..").log_subdir(), PathBuf::from("agents").join("_"));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Agent".parse::<TargetKind>().unwrap(), TargetKind::Agent);
        assert_eq!("todo".parse::<TargetKind>().unwrap(), TargetKind::Todo);
        assert!("job".parse::<TargetKind>().is_err());
    }
}
