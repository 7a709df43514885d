//! # agentrun-foundation
//!
//! Foundation layer for agentrun:
//! - Error: 공통 에러 타입
//! - Channel: 컴포넌트에 주입하는 로그 출력 채널
//! - Config: 통합 설정 (RunnerConfig, ExecutionOptions)
//! - Storage: JsonStore (범용)
//! - Util: 버전 해시

pub mod channel;
pub mod config;
pub mod error;
pub mod storage;
pub mod util;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Channel (로그 출력)
// ============================================================================
pub use channel::{ChannelLevel, ChannelLine, MemoryChannel, OutputChannel, TracingChannel};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{
    ExecutionOptions, RunnerConfig, ViewerConfig, DEFAULT_EXECUTABLE, RUNNER_CONFIG_FILE,
};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::{JsonStore, APP_DIR, PROJECT_DIR};

// ============================================================================
// Util
// ============================================================================
pub use util::{sha256_hex, version_hash, version_hash_file};
