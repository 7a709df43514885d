//! History Ledger - 실행 기록의 단일 진실 공급원
//!
//! 모든 실행은 정확히 하나의 [`ExecutionRecord`]를 가집니다.
//! 변경이 있을 때마다 JSON 배열 문서 전체를 다시 씁니다.

use crate::target::TargetKind;
use agentrun_foundation::{version_hash_file, Error, OutputChannel, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

// ============================================================================
// ExecutionStatus
// ============================================================================

/// 실행 기록 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
    Stopped,
    Paused,
}

impl ExecutionStatus {
    /// Running이 아닌 모든 상태
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Stopped => "stopped",
            ExecutionStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ExecutionRecord
// ============================================================================

/// 한 번의 물리적 실행 기록
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// UUID v4, 불변
    pub id: String,

    #[serde(rename = "type")]
    pub kind: TargetKind,

    pub target_id: String,

    /// 표시용 이름
    pub label: String,

    /// 에이전트/할일 정의 파일
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<PathBuf>,

    pub log_file: PathBuf,

    /// 실행 시점의 정의 파일 해시
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_hash: Option<String>,

    pub status: ExecutionStatus,

    pub start_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ExecutionRecord {
    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    pub fn matches(&self, kind: TargetKind, target_id: &str) -> bool {
        self.kind == kind && self.target_id == target_id
    }

    /// 실행 시간 (종료된 경우만)
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    fn merge_metadata(&mut self, metadata: Map<String, Value>) {
        self.metadata.extend(metadata);
    }

    fn close(&mut self, status: ExecutionStatus, end_time: DateTime<Utc>) {
        self.status = status;
        self.end_time = Some(end_time.max(self.start_time));
    }
}

// ============================================================================
// Begin / Complete 요청
// ============================================================================

/// 실행 시작 요청
#[derive(Debug, Clone)]
pub struct BeginExecution {
    pub kind: TargetKind,
    pub target_id: String,
    pub label: Option<String>,
    pub source_file: Option<PathBuf>,
    pub log_file: PathBuf,
    pub metadata: Map<String, Value>,
}

impl BeginExecution {
    pub fn new(kind: TargetKind, target_id: impl Into<String>, log_file: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            target_id: target_id.into(),
            label: None,
            source_file: None,
            log_file: log_file.into(),
            metadata: Map::new(),
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn source_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_file = Some(path.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// 실행 종료 요청
#[derive(Debug, Clone)]
pub struct CompleteExecution {
    pub status: ExecutionStatus,
    pub metadata: Option<Map<String, Value>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl CompleteExecution {
    pub fn new(status: ExecutionStatus) -> Self {
        Self {
            status,
            metadata: None,
            end_time: None,
        }
    }

    pub fn success() -> Self {
        Self::new(ExecutionStatus::Success)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::new(ExecutionStatus::Failed).metadata("error", error.into())
    }

    pub fn stopped() -> Self {
        Self::new(ExecutionStatus::Stopped)
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }
}

// ============================================================================
// HistoryLedger
// ============================================================================

/// 실행 기록 저장소 - history.json 관리
///
/// 레코드 목록은 하나의 mutex 뒤에 있고, 파일 재작성도 그 락을 쥔 채로
/// 수행되므로 문서 쓰기는 직렬화됩니다.
pub struct HistoryLedger {
    path: PathBuf,
    records: Mutex<Vec<ExecutionRecord>>,
    channel: Arc<dyn OutputChannel>,
}

impl HistoryLedger {
    /// history 문서를 열어 로드
    ///
    /// 파일이 없으면 빈 기록으로 시작합니다. 배열이 아니거나 파싱할 수 없는
    /// 문서는 채널에 에러로 보고하고 빈 기록으로 시작합니다.
    pub async fn open(path: impl Into<PathBuf>, channel: Arc<dyn OutputChannel>) -> Result<Self> {
        let path = path.into();
        let records = load_records(&path, channel.as_ref()).await?;

        channel.debug(&format!(
            "Loaded {} execution records from {}",
            records.len(),
            path.display()
        ));

        Ok(Self {
            path,
            records: Mutex::new(records),
            channel,
        })
    }

    /// history 문서 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // 기록 생성 / 종료
    // ========================================================================

    /// 새 실행 기록 생성 (Running)
    pub async fn begin_execution(&self, request: BeginExecution) -> Result<ExecutionRecord> {
        let version_hash = match &request.source_file {
            Some(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || version_hash_file(&path))
                    .await
                    .map_err(|e| Error::Internal(format!("version hash task failed: {}", e)))?
            }
            None => None,
        };

        let record = ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            kind: request.kind,
            label: request.label.unwrap_or_else(|| request.target_id.clone()),
            target_id: request.target_id,
            source_file: request.source_file,
            log_file: request.log_file,
            version_hash,
            status: ExecutionStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            metadata: request.metadata,
        };

        let mut records = self.records.lock().await;
        let mut staged = records.clone();
        staged.push(record.clone());
        self.commit(&mut records, staged).await?;

        self.channel.info(&format!(
            "Execution {} started for {}:{}",
            record.id, record.kind, record.target_id
        ));
        Ok(record)
    }

    /// 실행 종료 기록
    ///
    /// 모르는 id는 `None`. 이미 종료된 기록은 상태를 유지하고 메타데이터만
    /// 병합합니다.
    pub async fn complete_execution(
        &self,
        id: &str,
        completion: CompleteExecution,
    ) -> Result<Option<ExecutionRecord>> {
        let mut records = self.records.lock().await;
        let mut staged = records.clone();
        let Some(record) = staged.iter_mut().find(|r| r.id == id) else {
            self.channel
                .debug(&format!("complete_execution: unknown id {}", id));
            return Ok(None);
        };

        if let Some(metadata) = completion.metadata {
            record.merge_metadata(metadata);
        }

        if record.status.is_terminal() {
            self.channel.debug(&format!(
                "Execution {} already {}, merged metadata only",
                id, record.status
            ));
        } else if !completion.status.is_terminal() {
            self.channel.warn(&format!(
                "Execution {} cannot complete as running, merged metadata only",
                id
            ));
        } else {
            record.close(completion.status, completion.end_time.unwrap_or_else(Utc::now));
            self.channel
                .info(&format!("Execution {} finished: {}", id, record.status));
        }

        let updated = record.clone();
        self.commit(&mut records, staged).await?;
        Ok(Some(updated))
    }

    /// 메타데이터 병합
    pub async fn update_metadata(
        &self,
        id: &str,
        metadata: Map<String, Value>,
    ) -> Result<Option<ExecutionRecord>> {
        let mut records = self.records.lock().await;
        let mut staged = records.clone();
        let Some(record) = staged.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        record.merge_metadata(metadata);
        let updated = record.clone();
        self.commit(&mut records, staged).await?;
        Ok(Some(updated))
    }

    // ========================================================================
    // 조회
    // ========================================================================

    /// 대상의 실행 기록 (최신 시작 순)
    pub async fn get_history(
        &self,
        kind: TargetKind,
        target_id: &str,
        limit: Option<usize>,
    ) -> Vec<ExecutionRecord> {
        let records = self.records.lock().await;
        let mut matching: Vec<ExecutionRecord> = records
            .iter()
            .filter(|r| r.matches(kind, target_id))
            .cloned()
            .collect();
        sort_newest_first(&mut matching);
        if let Some(limit) = limit {
            matching.truncate(limit);
        }
        matching
    }

    pub async fn get_by_id(&self, id: &str) -> Option<ExecutionRecord> {
        self.records
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// 전체 기록 (최신 시작 순)
    pub async fn all_records(&self) -> Vec<ExecutionRecord> {
        let mut all = self.records.lock().await.clone();
        sort_newest_first(&mut all);
        all
    }

    /// 대상의 Running 기록
    pub async fn running_for(&self, kind: TargetKind, target_id: &str) -> Option<ExecutionRecord> {
        self.records
            .lock()
            .await
            .iter()
            .find(|r| r.is_running() && r.matches(kind, target_id))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    // ========================================================================
    // 삭제
    // ========================================================================

    pub async fn remove_by_id(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        let mut records = self.records.lock().await;
        let Some(index) = records.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        let mut staged = records.clone();
        let removed = staged.remove(index);
        self.commit(&mut records, staged).await?;
        self.channel.info(&format!("Removed execution {}", id));
        Ok(Some(removed))
    }

    /// 해당 로그 파일을 가리키는 모든 기록 삭제
    pub async fn remove_by_log_file(&self, log_file: &Path) -> Result<usize> {
        self.remove_where(|r| r.log_file.as_path() == log_file).await
    }

    /// 대상의 모든 기록 삭제
    pub async fn clear_history(&self, kind: TargetKind, target_id: &str) -> Result<usize> {
        self.remove_where(|r| r.matches(kind, target_id)).await
    }

    /// 로그 파일이 사라진 기록 정리
    pub async fn cleanup_invalid_records(&self) -> Result<usize> {
        let mut records = self.records.lock().await;
        let mut kept = Vec::with_capacity(records.len());
        let mut removed = 0;
        for record in records.iter() {
            if fs::try_exists(&record.log_file).await.unwrap_or(false) {
                kept.push(record.clone());
            } else {
                removed += 1;
            }
        }

        if removed > 0 {
            self.commit(&mut records, kept).await?;
            self.channel.info(&format!(
                "Removed {} execution records with missing log files",
                removed
            ));
        }
        Ok(removed)
    }

    /// 이전 프로세스에서 남은 Running 기록을 Stopped로 종료
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let mut records = self.records.lock().await;
        let mut staged = records.clone();
        let now = Utc::now();
        let mut recovered = 0;
        for record in staged.iter_mut().filter(|r| r.is_running()) {
            record.close(ExecutionStatus::Stopped, now);
            record
                .metadata
                .insert("interrupted".to_string(), Value::Bool(true));
            recovered += 1;
        }

        if recovered > 0 {
            self.commit(&mut records, staged).await?;
            self.channel.warn(&format!(
                "Closed {} interrupted executions as stopped",
                recovered
            ));
        }
        Ok(recovered)
    }

    async fn remove_where<F>(&self, predicate: F) -> Result<usize>
    where
        F: Fn(&ExecutionRecord) -> bool,
    {
        let mut records = self.records.lock().await;
        let staged: Vec<ExecutionRecord> =
            records.iter().filter(|r| !predicate(r)).cloned().collect();
        let removed = records.len() - staged.len();
        if removed > 0 {
            self.commit(&mut records, staged).await?;
        }
        Ok(removed)
    }

    // ========================================================================
    // 저장
    // ========================================================================

    /// 디스크에 먼저 쓰고, 성공한 경우에만 메모리에 반영
    async fn commit(
        &self,
        records: &mut Vec<ExecutionRecord>,
        staged: Vec<ExecutionRecord>,
    ) -> Result<()> {
        self.persist(&staged).await?;
        *records = staged;
        Ok(())
    }

    /// 문서 전체 재작성 (임시 파일 → rename)
    async fn persist(&self, records: &[ExecutionRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(records)?;
        let tmp = temp_path(&self.path);
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await.map_err(|e| {
            Error::Storage(format!(
                "failed to replace {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(())
    }
}

async fn load_records(path: &Path, channel: &dyn OutputChannel) -> Result<Vec<ExecutionRecord>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let items = match serde_json::from_str::<Value>(&content) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            channel.error(&format!(
                "History document {} is not an array, starting empty",
                path.display()
            ));
            return Ok(Vec::new());
        }
        Err(e) => {
            channel.error(&format!(
                "History document {} is unreadable ({}), starting empty",
                path.display(),
                e
            ));
            return Ok(Vec::new());
        }
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<ExecutionRecord>(item) {
            Ok(record) => records.push(record),
            Err(e) => channel.warn(&format!("Skipping malformed execution record: {}", e)),
        }
    }
    Ok(records)
}

fn sort_newest_first(records: &mut [ExecutionRecord]) {
    records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrun_foundation::{ChannelLevel, MemoryChannel, TracingChannel};
    use chrono::Duration;
    use tempfile::TempDir;

    async fn ledger(temp: &TempDir) -> HistoryLedger {
        HistoryLedger::open(temp.path().join("history.json"), TracingChannel::shared("ledger"))
            .await
            .unwrap()
    }

    fn touch(temp: &TempDir, name: &str) -> PathBuf {
        let path = temp.path().join(name);
        std::fs::write(&path, "").unwrap();
        path
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let ledger = ledger(&temp).await;
        assert!(ledger.is_empty().await);
        assert!(!ledger.path().exists());
    }

    #[tokio::test]
    async fn test_non_array_document_reports_and_starts_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("history.json");
        std::fs::write(&path, r#"{"records": []}"#).unwrap();

        let channel = Arc::new(MemoryChannel::new("ledger"));
        let ledger = HistoryLedger::open(&path, channel.clone()).await.unwrap();
        assert!(ledger.is_empty().await);
        assert!(channel.contains(ChannelLevel::Error, "not an array"));

        std::fs::write(&path, "[{").unwrap();
        let ledger = HistoryLedger::open(&path, channel.clone()).await.unwrap();
        assert!(ledger.is_empty().await);
        assert!(channel.contains(ChannelLevel::Error, "unreadable"));
    }

    #[tokio::test]
    async fn test_begin_and_complete_persist() {
        let temp = TempDir::new().unwrap();
        let log = touch(&temp, "a.jsonl");
        let ledger = ledger(&temp).await;

        let record = ledger
            .begin_execution(BeginExecution::new(TargetKind::Agent, "reviewer", &log))
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Running);
        assert_eq!(record.label, "reviewer");
        assert!(record.end_time.is_none());
        assert!(Uuid::parse_str(&record.id).is_ok());

        let done = ledger
            .complete_execution(&record.id, CompleteExecution::success().metadata("exitCode", 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Success);
        assert!(done.end_time.unwrap() >= done.start_time);
        assert_eq!(done.metadata["exitCode"], 0);

        // 다시 열어도 동일
        let reopened = ledger_at(ledger.path()).await;
        assert_eq!(reopened.get_by_id(&record.id).await, Some(done));
    }

    async fn ledger_at(path: &Path) -> HistoryLedger {
        HistoryLedger::open(path, TracingChannel::shared("ledger"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_document_format() {
        let temp = TempDir::new().unwrap();
        let log = touch(&temp, "a.jsonl");
        let ledger = ledger(&temp).await;
        ledger
            .begin_execution(BeginExecution::new(TargetKind::Todo, "todo-1", &log).label("Write docs"))
            .await
            .unwrap();

        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(ledger.path()).unwrap()).unwrap();
        let first = &raw.as_array().unwrap()[0];
        assert_eq!(first["type"], "todo");
        assert_eq!(first["status"], "running");
        assert_eq!(first["targetId"], "todo-1");
        assert_eq!(first["label"], "Write docs");
        assert!(first.get("endTime").is_none());
        assert!(first["startTime"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_complete_unknown_id_is_none() {
        let temp = TempDir::new().unwrap();
        let ledger = ledger(&temp).await;
        let result = ledger
            .complete_execution("missing", CompleteExecution::success())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_end_time_clamped_to_start() {
        let temp = TempDir::new().unwrap();
        let log = touch(&temp, "a.jsonl");
        let ledger = ledger(&temp).await;
        let record = ledger
            .begin_execution(BeginExecution::new(TargetKind::Agent, "reviewer", &log))
            .await
            .unwrap();

        let done = ledger
            .complete_execution(
                &record.id,
                CompleteExecution::failed("boom").end_time(record.start_time - Duration::hours(1)),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.end_time, Some(record.start_time));
        assert_eq!(done.metadata["error"], "boom");
    }

    #[tokio::test]
    async fn test_terminal_record_keeps_status() {
        let temp = TempDir::new().unwrap();
        let log = touch(&temp, "a.jsonl");
        let ledger = ledger(&temp).await;
        let record = ledger
            .begin_execution(BeginExecution::new(TargetKind::Todo, "t1", &log))
            .await
            .unwrap();

        let stopped = ledger
            .complete_execution(&record.id, CompleteExecution::stopped())
            .await
            .unwrap()
            .unwrap();

        let late = ledger
            .complete_execution(&record.id, CompleteExecution::success().metadata("exitCode", 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(late.status, ExecutionStatus::Stopped);
        assert_eq!(late.end_time, stopped.end_time);
        assert_eq!(late.metadata["exitCode"], 0);
    }

    #[tokio::test]
    async fn test_history_ordering_and_limit() {
        let temp = TempDir::new().unwrap();
        let log = touch(&temp, "a.jsonl");
        let ledger = ledger(&temp).await;

        let mut ids = Vec::new();
        for _ in 0..3 {
            let record = ledger
                .begin_execution(BeginExecution::new(TargetKind::Agent, "reviewer", &log))
                .await
                .unwrap();
            ledger
                .complete_execution(&record.id, CompleteExecution::success())
                .await
                .unwrap();
            ids.push(record.id);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        ledger
            .begin_execution(BeginExecution::new(TargetKind::Agent, "other", &log))
            .await
            .unwrap();

        let history = ledger.get_history(TargetKind::Agent, "reviewer", None).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, ids[2]);
        assert_eq!(history[2].id, ids[0]);

        let limited = ledger
            .get_history(TargetKind::Agent, "reviewer", Some(1))
            .await;
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, ids[2]);

        assert!(ledger.get_history(TargetKind::Todo, "reviewer", None).await.is_empty());
        assert!(ledger.running_for(TargetKind::Agent, "other").await.is_some());
        assert!(ledger.running_for(TargetKind::Agent, "reviewer").await.is_none());
    }

    #[tokio::test]
    async fn test_update_metadata_merges() {
        let temp = TempDir::new().unwrap();
        let log = touch(&temp, "a.jsonl");
        let ledger = ledger(&temp).await;
        let record = ledger
            .begin_execution(BeginExecution::new(TargetKind::Agent, "a", &log).metadata("model", "opus"))
            .await
            .unwrap();

        let mut extra = Map::new();
        extra.insert("tokens".to_string(), Value::from(42));
        let updated = ledger.update_metadata(&record.id, extra).await.unwrap().unwrap();
        assert_eq!(updated.metadata["model"], "opus");
        assert_eq!(updated.metadata["tokens"], 42);

        assert!(ledger.update_metadata("missing", Map::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_operations() {
        let temp = TempDir::new().unwrap();
        let a = touch(&temp, "a.jsonl");
        let b = touch(&temp, "b.jsonl");
        let ledger = ledger(&temp).await;

        let first = ledger
            .begin_execution(BeginExecution::new(TargetKind::Agent, "x", &a))
            .await
            .unwrap();
        ledger
            .begin_execution(BeginExecution::new(TargetKind::Agent, "x", &a))
            .await
            .unwrap();
        ledger
            .begin_execution(BeginExecution::new(TargetKind::Todo, "y", &b))
            .await
            .unwrap();

        assert_eq!(ledger.remove_by_id(&first.id).await.unwrap().unwrap().id, first.id);
        assert!(ledger.remove_by_id(&first.id).await.unwrap().is_none());

        assert_eq!(ledger.remove_by_log_file(&a).await.unwrap(), 1);
        assert_eq!(ledger.clear_history(TargetKind::Todo, "y").await.unwrap(), 1);
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_cleanup_invalid_records_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let kept = touch(&temp, "kept.jsonl");
        let gone = touch(&temp, "gone.jsonl");
        let ledger = ledger(&temp).await;

        ledger
            .begin_execution(BeginExecution::new(TargetKind::Agent, "a", &kept))
            .await
            .unwrap();
        ledger
            .begin_execution(BeginExecution::new(TargetKind::Agent, "b", &gone))
            .await
            .unwrap();
        std::fs::remove_file(&gone).unwrap();

        assert_eq!(ledger.cleanup_invalid_records().await.unwrap(), 1);
        assert_eq!(ledger.cleanup_invalid_records().await.unwrap(), 0);
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let temp = TempDir::new().unwrap();
        let log = touch(&temp, "a.jsonl");
        let path = {
            let ledger = ledger(&temp).await;
            ledger
                .begin_execution(BeginExecution::new(TargetKind::Todo, "t1", &log))
                .await
                .unwrap();
            ledger.path().to_path_buf()
        };

        let ledger = ledger_at(&path).await;
        assert_eq!(ledger.recover_interrupted().await.unwrap(), 1);
        assert_eq!(ledger.recover_interrupted().await.unwrap(), 0);

        let record = &ledger.all_records().await[0];
        assert_eq!(record.status, ExecutionStatus::Stopped);
        assert_eq!(record.metadata["interrupted"], true);
        assert!(record.end_time.is_some());
        assert!(ledger.running_for(TargetKind::Todo, "t1").await.is_none());
    }

    #[tokio::test]
    async fn test_version_hash_from_source_file() {
        let temp = TempDir::new().unwrap();
        let log = touch(&temp, "a.jsonl");
        let source = temp.path().join("reviewer.md");
        std::fs::write(&source, "# reviewer\nReview the diff.").unwrap();
        let ledger = ledger(&temp).await;

        let record = ledger
            .begin_execution(BeginExecution::new(TargetKind::Agent, "reviewer", &log).source_file(&source))
            .await
            .unwrap();
        assert_eq!(record.version_hash.as_deref().map(str::len), Some(16));

        let missing = ledger
            .begin_execution(
                BeginExecution::new(TargetKind::Agent, "reviewer", &log)
                    .source_file(temp.path().join("nope.md")),
            )
            .await
            .unwrap();
        assert!(missing.version_hash.is_none());
    }

    /// A directory squatting on the temp path makes the next write fail
    fn block_writes(temp: &TempDir) -> PathBuf {
        let blocker = temp.path().join("history.json.tmp");
        std::fs::create_dir(&blocker).unwrap();
        blocker
    }

    #[tokio::test]
    async fn test_failed_begin_leaves_no_running_record() {
        let temp = TempDir::new().unwrap();
        let ledger = ledger(&temp).await;
        let log = touch(&temp, "a.jsonl");

        let blocker = block_writes(&temp);
        let result = ledger
            .begin_execution(BeginExecution::new(TargetKind::Agent, "reviewer", &log))
            .await;
        assert!(result.is_err());
        assert!(ledger.is_empty().await);
        assert!(ledger.running_for(TargetKind::Agent, "reviewer").await.is_none());

        std::fs::remove_dir(&blocker).unwrap();
        let record = ledger
            .begin_execution(BeginExecution::new(TargetKind::Agent, "reviewer", &log))
            .await
            .unwrap();
        assert_eq!(ledger.len().await, 1);
        assert!(record.is_running());
    }

    #[tokio::test]
    async fn test_failed_writes_keep_memory_unchanged() {
        let temp = TempDir::new().unwrap();
        let ledger = ledger(&temp).await;
        let log = touch(&temp, "a.jsonl");
        let record = ledger
            .begin_execution(BeginExecution::new(TargetKind::Todo, "t1", &log))
            .await
            .unwrap();

        let blocker = block_writes(&temp);
        assert!(ledger
            .complete_execution(&record.id, CompleteExecution::success())
            .await
            .is_err());
        assert!(ledger.remove_by_id(&record.id).await.is_err());
        assert!(ledger.recover_interrupted().await.is_err());

        let unchanged = ledger.get_by_id(&record.id).await.unwrap();
        assert_eq!(unchanged, record);

        std::fs::remove_dir(&blocker).unwrap();
        let reopened = HistoryLedger::open(ledger.path(), TracingChannel::shared("ledger"))
            .await
            .unwrap();
        assert_eq!(reopened.get_by_id(&record.id).await, Some(record));
    }
}
