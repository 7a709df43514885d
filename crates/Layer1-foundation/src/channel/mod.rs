//! Output Channel - 컴포넌트별 로그 출력 채널
//!
//! 전역 로거 대신 각 컴포넌트가 생성 시점에 채널을 주입받습니다.
//!
//! ```ignore
//! let channel: Arc<dyn OutputChannel> = TracingChannel::shared("ledger");
//! let ledger = HistoryLedger::open(path, channel).await?;
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// ChannelLevel
// ============================================================================

/// 채널 메시지 레벨
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl ChannelLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelLevel::Debug => "debug",
            ChannelLevel::Info => "info",
            ChannelLevel::Warn => "warn",
            ChannelLevel::Error => "error",
        }
    }
}

impl fmt::Display for ChannelLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// OutputChannel Trait
// ============================================================================

/// 로그 출력 채널 trait
///
/// 구현체는 `log` 하나만 제공하면 됩니다.
pub trait OutputChannel: Send + Sync {
    /// 채널 이름 (디버깅용)
    fn name(&self) -> &str;

    /// 메시지 기록
    fn log(&self, level: ChannelLevel, message: &str);

    fn debug(&self, message: &str) {
        self.log(ChannelLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(ChannelLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(ChannelLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(ChannelLevel::Error, message);
    }
}

// ============================================================================
// TracingChannel
// ============================================================================

/// `tracing`으로 전달하는 기본 채널
#[derive(Debug, Clone)]
pub struct TracingChannel {
    component: String,
}

impl TracingChannel {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// `Arc<dyn OutputChannel>`로 바로 생성
    pub fn shared(component: impl Into<String>) -> Arc<dyn OutputChannel> {
        Arc::new(Self::new(component))
    }
}

impl OutputChannel for TracingChannel {
    fn name(&self) -> &str {
        &self.component
    }

    fn log(&self, level: ChannelLevel, message: &str) {
        let component = self.component.as_str();
        match level {
            ChannelLevel::Debug => tracing::debug!(component, "{}", message),
            ChannelLevel::Info => tracing::info!(component, "{}", message),
            ChannelLevel::Warn => tracing::warn!(component, "{}", message),
            ChannelLevel::Error => tracing::error!(component, "{}", message),
        }
    }
}

// ============================================================================
// MemoryChannel
// ============================================================================

/// 기록된 한 줄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLine {
    pub level: ChannelLevel,
    pub message: String,
}

/// 메모리에 기록하는 채널 (테스트, 임베딩용)
#[derive(Debug, Default)]
pub struct MemoryChannel {
    name: String,
    lines: Mutex<Vec<ChannelLine>>,
}

impl MemoryChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lines: Mutex::new(Vec::new()),
        }
    }

    /// 기록된 모든 줄
    pub fn lines(&self) -> Vec<ChannelLine> {
        self.lines.lock().clone()
    }

    /// 특정 레벨에서 문자열을 포함하는 줄이 있는지
    pub fn contains(&self, level: ChannelLevel, needle: &str) -> bool {
        self.lines
            .lock()
            .iter()
            .any(|l| l.level == level && l.message.contains(needle))
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl OutputChannel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn log(&self, level: ChannelLevel, message: &str) {
        self.lines.lock().push(ChannelLine {
            level,
            message: message.to_string(),
        });
    }
}
