//! Runner Config - 실행 파이프라인 설정
//!
//! 글로벌(~/.config/agentrun/config.json)과 프로젝트(.agentrun/config.json)를
//! 병합해서 사용합니다. 프로젝트 설정이 우선합니다.

use super::ExecutionOptions;
use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 설정 파일명
pub const RUNNER_CONFIG_FILE: &str = "config.json";

/// 기본 실행 파일
pub const DEFAULT_EXECUTABLE: &str = "claude";

// ============================================================================
// Runner Config (통합)
// ============================================================================

/// 실행 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    /// 외부 도구 실행 파일
    #[serde(default = "default_executable")]
    pub executable: String,

    /// 기본 호출 옵션
    #[serde(default)]
    pub defaults: ExecutionOptions,

    /// 실행 로그 디렉토리
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// 히스토리 문서 경로
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_file: Option<PathBuf>,

    /// 라이브 뷰어 설정
    #[serde(default)]
    pub viewer: ViewerConfig,

    /// 보관할 stderr 조각 수
    #[serde(default = "default_stderr_buffer_size")]
    pub stderr_buffer_size: usize,

    /// 실패 요약에 넣을 최근 출력 조각 수
    #[serde(default = "default_output_sample_size")]
    pub output_sample_size: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            defaults: ExecutionOptions::default(),
            log_dir: None,
            history_file: None,
            viewer: ViewerConfig::default(),
            stderr_buffer_size: default_stderr_buffer_size(),
            output_sample_size: default_output_sample_size(),
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 + 프로젝트 병합 로드
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        // 1. 글로벌 설정
        if let Ok(global) = JsonStore::global() {
            if let Some(global_config) = global.load_optional::<RunnerConfig>(RUNNER_CONFIG_FILE)? {
                config.merge(global_config);
            }
        }

        // 2. 프로젝트 설정
        if let Ok(project) = JsonStore::current_project() {
            if let Some(project_config) =
                project.load_optional::<RunnerConfig>(RUNNER_CONFIG_FILE)?
            {
                config.merge(project_config);
            }
        }

        Ok(config)
    }

    /// 특정 저장소에서만 로드
    pub fn load_from(store: &JsonStore) -> Result<Self> {
        let mut config = Self::new();
        if let Some(loaded) = store.load_optional::<RunnerConfig>(RUNNER_CONFIG_FILE)? {
            config.merge(loaded);
        }
        Ok(config)
    }

    /// 글로벌 설정 저장
    pub fn save_global(&self) -> Result<()> {
        let store = JsonStore::global()?;
        store.save(RUNNER_CONFIG_FILE, self)
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// 다른 설정과 병합 (other가 우선)
    pub fn merge(&mut self, other: RunnerConfig) {
        if other.executable != default_executable() {
            self.executable = other.executable;
        }
        self.defaults = self.defaults.merged_with(&other.defaults);
        if other.log_dir.is_some() {
            self.log_dir = other.log_dir;
        }
        if other.history_file.is_some() {
            self.history_file = other.history_file;
        }
        self.viewer.merge(other.viewer);
        if other.stderr_buffer_size != default_stderr_buffer_size() {
            self.stderr_buffer_size = other.stderr_buffer_size;
        }
        if other.output_sample_size != default_output_sample_size() {
            self.output_sample_size = other.output_sample_size;
        }
    }

    // ========================================================================
    // Resolved paths
    // ========================================================================

    /// 실행 로그 디렉토리 (기본: <data_dir>/agentrun/logs)
    pub fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("logs"))
    }

    /// 히스토리 문서 경로 (기본: <data_dir>/agentrun/history.json)
    pub fn resolved_history_file(&self) -> PathBuf {
        self.history_file
            .clone()
            .unwrap_or_else(|| data_dir().join("history.json"))
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn history_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_file = Some(path.into());
        self
    }

    pub fn defaults(mut self, defaults: ExecutionOptions) -> Self {
        self.defaults = defaults;
        self
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(crate::storage::APP_DIR)
}

// ============================================================================
// Viewer Config
// ============================================================================

/// 라이브 로그 뷰어 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerConfig {
    /// 파일 변경 후 재파싱까지 대기 (ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// 폴링 주기 (ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ViewerConfig {
    fn merge(&mut self, other: ViewerConfig) {
        if other.debounce_ms != default_debounce_ms() {
            self.debounce_ms = other.debounce_ms;
        }
        if other.poll_interval_ms != default_poll_interval_ms() {
            self.poll_interval_ms = other.poll_interval_ms;
        }
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_executable() -> String {
    DEFAULT_EXECUTABLE.to_string()
}

fn default_stderr_buffer_size() -> usize {
    10
}

fn default_output_sample_size() -> usize {
    5
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    3000
}
