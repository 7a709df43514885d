//! Config - 통합 설정 관리
//!
//! - `options.rs` - 외부 도구 호출 옵션
//! - `runner.rs` - RunnerConfig 통합 설정

mod options;
mod runner;

pub use options::ExecutionOptions;
pub use runner::{RunnerConfig, ViewerConfig, DEFAULT_EXECUTABLE, RUNNER_CONFIG_FILE};
