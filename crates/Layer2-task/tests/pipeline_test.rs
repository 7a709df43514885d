//! 파이프라인 통합 테스트 - 셸 스크립트를 외부 도구 대신 실행
//!
//! `cargo test -p agentrun-task --test pipeline_test`

#![cfg(unix)]

use agentrun_foundation::{Error, ExecutionOptions, TracingChannel, ViewerConfig};
use agentrun_task::{
    ExecutionLogStore, ExecutionStatus, Executor, HistoryLedger, LiveLogViewer, LogViewPayload,
    MessageKind, ProcessExecutor, ProcessExecutorConfig, StartRequest, StatusTracker,
    StreamMessage, TargetKey, TargetKind, TargetState, ViewerUpdate,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const SUCCESS_SCRIPT: &str = r#"input=$(cat)
echo '{"type":"system","subtype":"init","model":"test-model"}'
echo "got: $input"
echo ''
echo '{"type":"result","subtype":"success","result":"done","usage":{"total_tokens":7}}'"#;

const FAILING_SCRIPT: &str = r#"cat >/dev/null
echo '{"type":"assistant","message":{"content":"working on it"}}'
echo '{"type":"error","error":"rate limited"}'
echo 'boom' >&2
exit 3"#;

const SLOW_SCRIPT: &str = r#"cat >/dev/null
echo '{"type":"system","message":"working"}'
exec sleep 30"#;

const MARKER_SCRIPT: &str = r#"cat >/dev/null
sleep 1
touch "$MARKER_OUT"
echo '{"type":"result","subtype":"success","result":"marked"}'"#;

const RECORDING_SCRIPT: &str = r#"printf '%s\n' "$@" > "$ARGS_OUT"
cat > "$STDIN_OUT"
echo '{"type":"result","subtype":"success","result":"ok"}'"#;

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-agent.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

struct Pipeline {
    temp: TempDir,
    tracker: StatusTracker,
    executor: Arc<ProcessExecutor>,
    ledger: Arc<HistoryLedger>,
}

async fn pipeline(script: &str) -> Pipeline {
    let temp = TempDir::new().unwrap();
    let executable = write_script(temp.path(), script);

    let ledger = Arc::new(
        HistoryLedger::open(temp.path().join("history.json"), TracingChannel::shared("ledger"))
            .await
            .unwrap(),
    );
    let executor = Arc::new(ProcessExecutor::new(
        ProcessExecutorConfig {
            executable: executable.to_string_lossy().into_owned(),
            ..ProcessExecutorConfig::default()
        },
        TracingChannel::shared("engine"),
    ));
    let tracker = StatusTracker::new(
        executor.clone(),
        ledger.clone(),
        temp.path().join("logs"),
        TracingChannel::shared("tracker"),
    );

    Pipeline {
        temp,
        tracker,
        executor,
        ledger,
    }
}

fn viewer(ledger: Arc<HistoryLedger>) -> LiveLogViewer {
    LiveLogViewer::new(
        ViewerConfig {
            debounce_ms: 20,
            poll_interval_ms: 100,
        },
        TracingChannel::shared("viewer"),
    )
    .with_ledger(ledger)
}

async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("timed out")
}

#[tokio::test]
async fn test_reviewer_success_creates_one_record() {
    let p = pipeline(SUCCESS_SCRIPT).await;
    let target = TargetKey::agent("reviewer");
    assert!(p.executor.is_available());

    let run = p
        .tracker
        .start(StartRequest::new(target.clone(), "review this").label("Reviewer"))
        .await
        .unwrap();
    assert_eq!(run.record.status, ExecutionStatus::Running);
    assert_eq!(p.ledger.len().await, 1);

    let status = within(run.handle).await.unwrap();
    assert_eq!(status.state, TargetState::Idle);
    assert!(status.error.is_none());

    let history = p
        .ledger
        .get_history(TargetKind::Agent, "reviewer", None)
        .await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ExecutionStatus::Success);
    assert!(history[0].end_time.unwrap() >= history[0].start_time);
    assert_eq!(history[0].label, "Reviewer");
    assert_eq!(history[0].metadata["exitCode"], 0);
    assert_eq!(history[0].metadata["messageCount"], 4);
    assert_eq!(history[0].metadata["tokens"], 7);

    let messages = ExecutionLogStore::default()
        .read_messages(&history[0].log_file)
        .await
        .unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1].kind, MessageKind::System);
    assert_eq!(messages[1].text(), "got: review this");
    // the blank line is kept as its own message
    assert_eq!(messages[2].kind, MessageKind::System);
    assert_eq!(messages[2].text(), "(no content)");
    assert_eq!(messages[3].kind, MessageKind::Result);
    assert!(messages.iter().all(|m| m.timestamp.is_some()));
}

#[tokio::test]
async fn test_second_start_while_running_is_rejected() {
    let p = pipeline(SLOW_SCRIPT).await;
    let target = TargetKey::agent("reviewer");

    let run = p
        .tracker
        .start(StartRequest::new(target.clone(), "first"))
        .await
        .unwrap();
    let err = p
        .tracker
        .start(StartRequest::new(target.clone(), "second"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::AlreadyRunning(_)));
    assert_eq!(p.ledger.len().await, 1);

    assert!(p.tracker.stop(&target).await.unwrap());
    within(run.handle).await.unwrap();
}

#[tokio::test]
async fn test_stop_right_after_start_prevents_the_run() {
    let p = pipeline(MARKER_SCRIPT).await;
    let target = TargetKey::agent("reviewer");
    let marker = p.temp.path().join("marker");
    let options = ExecutionOptions::new().env("MARKER_OUT", marker.to_string_lossy());

    let run = p
        .tracker
        .start(StartRequest::new(target.clone(), "first").options(options.clone()))
        .await
        .unwrap();
    assert!(p.executor.is_running(&target.task_key()).await);
    assert!(p.tracker.stop(&target).await.unwrap());
    assert!(!p.executor.is_running(&target.task_key()).await);

    let status = within(run.handle).await.unwrap();
    assert_eq!(status.state, TargetState::Idle);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists());

    let record = p.ledger.get_by_id(&run.record.id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Stopped);

    let second = p
        .tracker
        .start(StartRequest::new(target.clone(), "second").options(options))
        .await
        .unwrap();
    let status = within(second.handle).await.unwrap();
    assert_eq!(status.state, TargetState::Idle);
    assert!(status.error.is_none());
    assert!(marker.exists());

    let history = p
        .ledger
        .get_history(TargetKind::Agent, "reviewer", None)
        .await;
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.status != ExecutionStatus::Failed));
}

#[tokio::test]
async fn test_nonzero_exit_composes_failure() {
    let p = pipeline(FAILING_SCRIPT).await;
    let target = TargetKey::todo("todo-7");

    let run = p
        .tracker
        .start(StartRequest::new(target.clone(), "do it"))
        .await
        .unwrap();
    let status = within(run.handle).await.unwrap();
    assert_eq!(status.state, TargetState::Error);

    let error = status.error.unwrap();
    let expected_tail = format!("Log file: {}", run.record.log_file.display());
    assert!(error.starts_with("Process exited with code 3\nError: rate limited\nstderr:\nboom"));
    assert!(error.ends_with(&expected_tail));

    let record = p.ledger.get_by_id(&run.record.id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.metadata["exitCode"], 3);

    let messages = ExecutionLogStore::default()
        .read_messages(&record.log_file)
        .await
        .unwrap();
    assert!(messages
        .iter()
        .any(|m| m.kind == MessageKind::Error && m.text() == "boom"));
}

#[tokio::test]
async fn test_stop_todo_pauses() {
    let p = pipeline(SLOW_SCRIPT).await;
    let target = TargetKey::todo("long");

    let run = p
        .tracker
        .start(StartRequest::new(target.clone(), "x"))
        .await
        .unwrap();
    // let the process get as far as its first line
    within(async {
        loop {
            let content = std::fs::read_to_string(&run.record.log_file).unwrap_or_default();
            if content.contains("working") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    assert!(p.tracker.stop(&target).await.unwrap());
    assert!(!p.executor.is_running(&target.task_key()).await);
    assert_eq!(p.tracker.status(&target).await.state, TargetState::Paused);

    let status = within(run.handle).await.unwrap();
    assert_eq!(status.state, TargetState::Paused);
    let record = p.ledger.get_by_id(&run.record.id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Stopped);
}

#[tokio::test]
async fn test_invocation_uses_stdin_and_flags() {
    let p = pipeline(RECORDING_SCRIPT).await;
    let args_out = p.temp.path().join("args.txt");
    let stdin_out = p.temp.path().join("stdin.txt");

    let mut options = ExecutionOptions::new()
        .model("opus")
        .allow_tool("Read")
        .env("ARGS_OUT", args_out.to_string_lossy())
        .env("STDIN_OUT", stdin_out.to_string_lossy());
    options.extra_args = vec!["--trailing".to_string()];

    let run = p
        .tracker
        .start(StartRequest::new(TargetKey::agent("rec"), "secret prompt").options(options))
        .await
        .unwrap();
    let status = within(run.handle).await.unwrap();
    assert_eq!(status.state, TargetState::Idle);

    let args: Vec<String> = std::fs::read_to_string(&args_out)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(&args[..4], &["-p", "--output-format", "stream-json", "--verbose"]);
    assert!(args.windows(2).any(|w| w[0] == "--model" && w[1] == "opus"));
    assert!(args.windows(2).any(|w| w[0] == "--allowedTools" && w[1] == "Read"));
    assert_eq!(args.last().map(String::as_str), Some("--trailing"));
    assert!(!args.iter().any(|a| a.contains("secret prompt")));

    assert_eq!(std::fs::read_to_string(&stdin_out).unwrap(), "secret prompt");
}

#[tokio::test]
async fn test_deleted_log_reports_not_found_and_cleans_ledger() {
    let p = pipeline(SUCCESS_SCRIPT).await;
    let target = TargetKey::agent("reviewer");

    let run = p
        .tracker
        .start(StartRequest::new(target.clone(), "x"))
        .await
        .unwrap();
    within(run.handle).await.unwrap();

    let mut sub = viewer(p.ledger.clone()).attach(target, &run.record.log_file);
    assert_eq!(within(sub.recv()).await, Some(ViewerUpdate::Loading));
    match within(sub.recv()).await {
        Some(ViewerUpdate::Payload(payload)) => assert_eq!(payload.entries.len(), 3),
        other => panic!("expected payload, got {:?}", other),
    }

    std::fs::remove_file(&run.record.log_file).unwrap();

    let not_found = within(async {
        loop {
            match sub.recv().await {
                Some(ViewerUpdate::NotFound { path }) => break path,
                Some(_) => continue,
                None => panic!("viewer stopped without reporting not found"),
            }
        }
    })
    .await;
    assert_eq!(not_found, run.record.log_file);

    within(async {
        while !p.ledger.is_empty().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(p.ledger.get_by_id(&run.record.id).await.is_none());
}

#[tokio::test]
async fn test_viewer_follows_appended_messages() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("agents/live/run.jsonl");
    let store = ExecutionLogStore::default();
    store
        .append(&path, &StreamMessage::system_text("start"))
        .await
        .unwrap();

    let ledger = Arc::new(
        HistoryLedger::open(temp.path().join("history.json"), TracingChannel::shared("ledger"))
            .await
            .unwrap(),
    );
    let mut sub = viewer(ledger).attach(TargetKey::agent("live"), &path);

    const N: usize = 20;
    for i in 1..N {
        store
            .append(&path, &StreamMessage::system_text(format!("line {}", i)))
            .await
            .unwrap();
    }

    let last: LogViewPayload = within(async {
        loop {
            if let Some(ViewerUpdate::Payload(payload)) = sub.recv().await {
                if payload.entries.len() == N {
                    break payload;
                }
            }
        }
    })
    .await;

    let texts: Vec<String> = last.entries.iter().map(|e| e.text()).collect();
    assert_eq!(texts[0], "start");
    assert_eq!(texts[N - 1], format!("line {}", N - 1));
    assert!(last.entries.windows(2).all(|w| w[0].index + 1 == w[1].index));
}

#[tokio::test]
async fn test_restart_recovers_interrupted_run() {
    let p = pipeline(SLOW_SCRIPT).await;
    let target = TargetKey::todo("crashy");

    let run = p
        .tracker
        .start(StartRequest::new(target.clone(), "x"))
        .await
        .unwrap();
    let history_file = p.ledger.path().to_path_buf();

    // a second process lifetime opening the same document
    let reopened = HistoryLedger::open(&history_file, TracingChannel::shared("ledger"))
        .await
        .unwrap();
    assert!(reopened.running_for(TargetKind::Todo, "crashy").await.is_some());
    assert_eq!(reopened.recover_interrupted().await.unwrap(), 1);
    assert!(reopened.running_for(TargetKind::Todo, "crashy").await.is_none());

    p.tracker.stop(&target).await.unwrap();
    within(run.handle).await.unwrap();
}
