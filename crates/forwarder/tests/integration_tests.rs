//! 통합 테스트 -- 파일 tail부터 전송, 재시도까지 전체 흐름 검증
//!
//! 실제 파일과 상태 파일을 임시 디렉토리에 만들고, 응답을 직접 제어하는
//! 모의 전송기로 전송 결과를 확인합니다.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tailpipe_core::config::{ReadFrom, TailpipeConfig};
use tailpipe_core::error::TailpipeError;
use tailpipe_core::event::{DeliveryResponse, Event};
use tailpipe_core::pipeline::{BoxFuture, Transmission};
use tailpipe_forwarder::{ForwardReport, ForwarderBuilder};

/// 전송된 이벤트와 응답 코드를 기록하는 모의 전송기
///
/// `throttle_field`가 true인 이벤트는 처음 한 번 429로 응답합니다.
struct MockTransmission {
    sent: Mutex<Vec<(Event, u16)>>,
    throttled: Mutex<HashSet<i64>>,
    responses: Mutex<Option<mpsc::Sender<DeliveryResponse>>>,
}

impl MockTransmission {
    fn new() -> (Arc<Self>, mpsc::Receiver<DeliveryResponse>) {
        let (tx, rx) = mpsc::channel(64);
        let mock = Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            throttled: Mutex::new(HashSet::new()),
            responses: Mutex::new(Some(tx)),
        });
        (mock, rx)
    }

    fn sent(&self) -> Vec<(Event, u16)> {
        self.sent.lock().unwrap().clone()
    }

    fn delivered(&self) -> Vec<Event> {
        self.sent()
            .into_iter()
            .filter(|(_, status)| *status == 200)
            .map(|(event, _)| event)
            .collect()
    }
}

impl Transmission for MockTransmission {
    fn send_presampled(&self, event: Event) -> BoxFuture<'_, Result<(), TailpipeError>> {
        let status = match (event.data.get("throttle"), event.data.get("n")) {
            (Some(flag), Some(n)) if flag == &json!(true) => {
                let n = n.as_i64().unwrap();
                if self.throttled.lock().unwrap().insert(n) { 429 } else { 200 }
            }
            _ => 200,
        };
        self.sent.lock().unwrap().push((event.clone(), status));
        let tx = self.responses.lock().unwrap().clone();

        Box::pin(async move {
            let tx = tx.ok_or_else(|| TailpipeError::Transmission("closed".to_owned()))?;
            let response = DeliveryResponse::with_status(event, status, Duration::from_millis(1));
            tx.send(response)
                .await
                .map_err(|_| TailpipeError::Transmission("response receiver closed".to_owned()))
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        self.responses.lock().unwrap().take();
        Box::pin(async {})
    }
}

fn numbers(events: &[Event]) -> Vec<i64> {
    events.iter().map(|e| e.data["n"].as_i64().unwrap()).collect()
}

fn write_lines(path: &Path, lines: &[serde_json::Value]) {
    let mut content = String::new();
    for line in lines {
        content.push_str(&line.to_string());
        content.push('\n');
    }
    std::fs::write(path, content).unwrap();
}

fn append_lines(path: &Path, lines: &[serde_json::Value]) {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
}

/// 한 번 읽고 끝나는 (stop = true) 설정
fn backfill_config(dir: &Path, paths: &[&Path]) -> TailpipeConfig {
    let mut config = TailpipeConfig::default();
    config.tail.paths = paths.iter().map(|p| p.display().to_string()).collect();
    config.tail.read_from = ReadFrom::Beginning;
    config.tail.stop = true;
    config.tail.statefile = dir.display().to_string();
    config.stats.interval_secs = 0;
    config
}

async fn run_once(config: TailpipeConfig) -> (ForwardReport, Arc<MockTransmission>) {
    let (mock, responses) = MockTransmission::new();
    let forwarder = ForwarderBuilder::new()
        .config(config)
        .transmission(mock.clone(), responses)
        .build()
        .unwrap();
    let report = tokio::time::timeout(Duration::from_secs(10), forwarder.run(CancellationToken::new()))
        .await
        .expect("forwarder did not finish")
        .unwrap();
    (report, mock)
}

async fn wait_for(mock: &MockTransmission, delivered: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while mock.delivered().len() < delivered {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {delivered} events, got {}",
            mock.delivered().len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_ordered_replay() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    let lines: Vec<_> = (0..50).map(|n| json!({ "n": n })).collect();
    write_lines(&log, &lines);

    let (report, mock) = run_once(backfill_config(dir.path(), &[&log])).await;

    assert_eq!(report.inputs, 1);
    assert_eq!(report.failed_inputs, 0);
    assert_eq!(report.sender.sent, 50);
    assert_eq!(numbers(&mock.delivered()), (0..50).collect::<Vec<_>>());
    assert_eq!(report.final_stats.count, 50);
    assert_eq!(report.final_stats.status_codes[&200], 50);
}

#[tokio::test]
async fn test_resume_after_persisted_offset() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    write_lines(&log, &[json!({"n": 0}), json!({"n": 1}), json!({"n": 2})]);

    let (_, first) = run_once(backfill_config(dir.path(), &[&log])).await;
    assert_eq!(numbers(&first.delivered()), vec![0, 1, 2]);

    let state = std::fs::read_to_string(dir.path().join("app.log.tailpipe.state")).unwrap();
    let state: serde_json::Value = serde_json::from_str(&state).unwrap();
    assert_eq!(state["Offset"], json!(std::fs::metadata(&log).unwrap().len()));

    append_lines(&log, &[json!({"n": 3}), json!({"n": 4})]);
    let mut config = backfill_config(dir.path(), &[&log]);
    config.tail.read_from = ReadFrom::Last;
    let (_, second) = run_once(config).await;
    assert_eq!(numbers(&second.delivered()), vec![3, 4]);
}

#[tokio::test]
async fn test_last_without_statefile_starts_at_end() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    write_lines(&log, &[json!({"n": 0}), json!({"n": 1})]);

    let mut config = backfill_config(dir.path(), &[&log]);
    config.tail.read_from = ReadFrom::Last;
    let (report, mock) = run_once(config).await;
    assert_eq!(report.sender.sent, 0);
    assert!(mock.sent().is_empty());
}

#[tokio::test]
async fn test_rotated_file_restarts_at_beginning() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    write_lines(&log, &[json!({"n": 0}), json!({"n": 1}), json!({"n": 2})]);
    run_once(backfill_config(dir.path(), &[&log])).await;

    // 새 파일을 만든 뒤 rename 해서 inode를 바꾼다
    let fresh = dir.path().join("app.log.new");
    write_lines(&fresh, &[json!({"n": 10}), json!({"n": 11})]);
    std::fs::rename(&fresh, &log).unwrap();

    let mut config = backfill_config(dir.path(), &[&log]);
    config.tail.read_from = ReadFrom::Last;
    let (_, mock) = run_once(config).await;
    assert_eq!(numbers(&mock.delivered()), vec![10, 11]);
}

#[tokio::test]
async fn test_follow_across_rename_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    write_lines(&log, &[json!({"n": 0}), json!({"n": 1})]);

    let mut config = backfill_config(dir.path(), &[&log]);
    config.tail.stop = false;
    config.tail.poll = true;
    config.tail.poll_interval_ms = 20;

    let (mock, responses) = MockTransmission::new();
    let forwarder = ForwarderBuilder::new()
        .config(config)
        .transmission(mock.clone(), responses)
        .build()
        .unwrap();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(forwarder.run(shutdown.clone()));

    wait_for(&mock, 2).await;
    append_lines(&log, &[json!({"n": 2})]);
    std::fs::rename(&log, dir.path().join("app.log.1")).unwrap();
    write_lines(&log, &[json!({"n": 3}), json!({"n": 4})]);

    wait_for(&mock, 5).await;
    shutdown.cancel();
    let report = running.await.unwrap().unwrap();

    assert_eq!(numbers(&mock.delivered()), vec![0, 1, 2, 3, 4]);
    assert_eq!(report.failed_inputs, 0);
}

#[tokio::test]
async fn test_field_stages_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    write_lines(
        &log,
        &[json!({"n": 0, "password": "hunter2", "token": "secret", "request": "GET /users/7?page=2 HTTP/1.1"})],
    );

    let mut config = backfill_config(dir.path(), &[&log]);
    config.stages.drop_fields = vec!["password".to_owned()];
    config.stages.scrub_fields = vec!["token".to_owned()];
    config.stages.add_fields = vec!["env=prod".to_owned()];
    config.stages.request_shape = vec!["request".to_owned()];
    config.stages.request_patterns = vec!["/users/:id".to_owned()];

    let (_, mock) = run_once(config).await;
    let events = mock.delivered();
    assert_eq!(events.len(), 1);
    let data = &events[0].data;

    assert!(!data.contains_key("password"));
    assert_eq!(
        data["token"],
        json!("2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b")
    );
    assert_eq!(data["env"], json!("prod"));
    assert_eq!(data["request_shape"], json!("/users/:id?page=?"));
    assert_eq!(data["request_path_id"], json!("7"));
}

#[tokio::test]
async fn test_drop_marker_is_not_sent() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    write_lines(
        &log,
        &[json!({"n": 0, "rate": -1}), json!({"n": 1, "rate": 10}), json!({"n": 2})],
    );

    let mut config = backfill_config(dir.path(), &[&log]);
    config.stages.presampled_field = "rate".to_owned();
    let (report, mock) = run_once(config).await;

    assert_eq!(report.sender.dropped, 1);
    let events = mock.delivered();
    assert_eq!(numbers(&events), vec![1, 2]);
    assert_eq!(events[0].sample_rate, 10);
    assert_eq!(events[1].sample_rate, 0);
}

#[tokio::test]
async fn test_throttled_events_are_resent_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    let lines: Vec<_> = (0..6)
        .map(|n| json!({"n": n, "rate": 4, "throttle": n % 2 == 0}))
        .collect();
    write_lines(&log, &lines);

    let mut config = backfill_config(dir.path(), &[&log]);
    // 재시도가 끝나기 전에 기본 큐가 닫히지 않도록 따라가기 모드로 실행
    config.tail.stop = false;
    config.tail.poll = true;
    config.tail.poll_interval_ms = 20;
    config.stages.presampled_field = "rate".to_owned();
    config.sender.retry_on_failure = true;
    config.sender.pool_size = 10;

    let (mock, responses) = MockTransmission::new();
    let forwarder = ForwarderBuilder::new()
        .config(config)
        .transmission(mock.clone(), responses)
        .build()
        .unwrap();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(forwarder.run(shutdown.clone()));

    wait_for(&mock, 6).await;
    shutdown.cancel();
    let report = running.await.unwrap().unwrap();

    let sent = mock.sent();
    let throttled: Vec<_> = sent.iter().filter(|(_, s)| *s == 429).collect();
    assert_eq!(throttled.len(), 3);
    assert_eq!(report.sender.retried, 3);
    assert_eq!(report.sender.sent, 9);

    let mut delivered = numbers(&mock.delivered());
    delivered.sort_unstable();
    assert_eq!(delivered, vec![0, 1, 2, 3, 4, 5]);
    for event in mock.delivered() {
        assert_eq!(event.sample_rate, 4);
    }
}

#[tokio::test]
async fn test_throttled_events_without_retry_are_final() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    write_lines(&log, &[json!({"n": 0, "throttle": true}), json!({"n": 1})]);

    let (report, mock) = run_once(backfill_config(dir.path(), &[&log])).await;
    assert_eq!(report.sender.retried, 0);
    assert_eq!(mock.sent().len(), 2);
    assert_eq!(numbers(&mock.delivered()), vec![1]);
    assert_eq!(report.final_stats.status_codes[&429], 1);
}

#[tokio::test]
async fn test_multi_file_fan_in() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.log");
    let b = dir.path().join("b.log");
    write_lines(&a, &(0..20).map(|n| json!({"n": n, "src": "a"})).collect::<Vec<_>>());
    write_lines(&b, &(0..20).map(|n| json!({"n": n, "src": "b"})).collect::<Vec<_>>());

    let glob = dir.path().join("*.log");
    let mut config = backfill_config(dir.path(), &[]);
    config.tail.paths = vec![glob.display().to_string()];
    let (report, mock) = run_once(config).await;

    assert_eq!(report.inputs, 2);
    let events = mock.delivered();
    assert_eq!(events.len(), 40);
    for src in ["a", "b"] {
        let from_src: Vec<_> = events
            .iter()
            .filter(|e| e.data["src"] == json!(src))
            .cloned()
            .collect();
        assert_eq!(numbers(&from_src), (0..20).collect::<Vec<_>>(), "{src}");
    }

    // 각 파일의 상태 파일이 디렉토리 안에 생긴다
    assert!(dir.path().join("a.log.tailpipe.state").exists());
    assert!(dir.path().join("b.log.tailpipe.state").exists());
}

#[tokio::test]
async fn test_unparseable_lines_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    std::fs::write(&log, "{\"n\":0}\nnot json\n\n{\"n\":1}\n").unwrap();

    let (_, mock) = run_once(backfill_config(dir.path(), &[&log])).await;
    assert_eq!(numbers(&mock.delivered()), vec![0, 1]);
}

#[tokio::test]
async fn test_line_prefix_fields_are_merged() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("app.log");
    std::fs::write(&log, "2024-01-15T12:00:00Z stdout {\"n\":0}\n").unwrap();

    let mut config = backfill_config(dir.path(), &[&log]);
    config.parser.prefix_regex = r"(?P<logged_at>\S+) (?P<stream>\S+) ".to_owned();
    let (_, mock) = run_once(config).await;

    let events = mock.delivered();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].data["stream"], json!("stdout"));
    assert_eq!(events[0].data["logged_at"], json!("2024-01-15T12:00:00Z"));
}

#[tokio::test]
async fn test_missing_file_with_stop_fails_input() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.log");

    let (report, mock) = run_once(backfill_config(dir.path(), &[&missing])).await;
    assert_eq!(report.failed_inputs, 1);
    assert!(mock.sent().is_empty());
}

#[tokio::test]
async fn test_missing_file_is_awaited_while_following() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("late.log");

    let mut config = backfill_config(dir.path(), &[&log]);
    config.tail.stop = false;
    config.tail.poll = true;
    config.tail.poll_interval_ms = 20;

    let (mock, responses) = MockTransmission::new();
    let forwarder = ForwarderBuilder::new()
        .config(config)
        .transmission(mock.clone(), responses)
        .build()
        .unwrap();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(forwarder.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    write_lines(&log, &[json!({"n": 0})]);
    wait_for(&mock, 1).await;

    shutdown.cancel();
    let report = running.await.unwrap().unwrap();
    assert_eq!(report.failed_inputs, 0);
}
