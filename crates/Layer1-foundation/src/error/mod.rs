//! Error types for agentrun
//!
//! 모든 에러를 중앙에서 관리

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// agentrun 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 저장소 관련
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // 실행 관련
    // ========================================================================
    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    /// Non-zero exit of the external tool. `message` is already composed
    /// for display and always ends with the log file location.
    #[error("{message}")]
    Execution {
        exit_code: Option<i32>,
        message: String,
        log_file: PathBuf,
    },

    #[error("Already running: {0}")]
    AlreadyRunning(String),

    /// The run was stopped before its process was spawned
    #[error("Stopped before start: {0}")]
    Stopped(String),

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 사용자에게 보여줄 수 있는 에러인지 확인
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::Spawn { .. }
                | Error::Execution { .. }
                | Error::AlreadyRunning(_)
                | Error::NotFound(_)
                | Error::InvalidInput(_)
        )
    }

    /// 이미 실행 중이라 거절된 경우
    pub fn is_already_running(&self) -> bool {
        matches!(self, Error::AlreadyRunning(_))
    }

    /// 프로세스 시작 전에 중지된 경우
    pub fn is_stopped(&self) -> bool {
        matches!(self, Error::Stopped(_))
    }

    /// Spawn 에러 생성 헬퍼
    pub fn spawn(program: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Spawn {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Exit code of a failed execution, if the error came from one
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::Execution { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
