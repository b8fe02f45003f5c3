//! 우선순위 전송 루프
//!
//! 세 개의 큐를 엄격한 우선순위로 처리합니다.
//!
//! 1. 지연 신호: 받은 시간만큼 잠듭니다 (서버 스로틀링 백오프).
//! 2. 재시도 큐: 재전송할 이벤트를 먼저 보냅니다.
//! 3. 기본 큐: 새 이벤트를 보냅니다.
//! 4. 모두 비어 있으면 유휴 주기만큼 기다린 뒤 다시 확인합니다.
//!
//! 기본 큐가 닫히고 비면 루프가 끝납니다. 이때 재시도 큐에 남은 이벤트는
//! 버려지고 개수가 로그에 남습니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tailpipe_core::config::SenderConfig;
use tailpipe_core::event::Event;
use tailpipe_core::metrics as m;
use tailpipe_core::pipeline::Transmission;

/// 기본 큐 용량 배수 (pool_size 기준)
const PRIMARY_CAPACITY_FACTOR: usize = 10;
/// 재시도/지연 큐 용량 배수 (pool_size 기준)
const RETRY_CAPACITY_FACTOR: usize = 2;

/// 재시도 요청을 보내는 쪽 핸들
#[derive(Debug, Clone)]
pub struct RetryQueues {
    /// 재전송할 이벤트
    pub events: mpsc::Sender<Event>,
    /// 전송 전 대기 시간 신호
    pub delays: mpsc::Sender<Duration>,
}

/// 전송 루프가 끝난 뒤의 집계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderReport {
    /// 전송기에 넘긴 이벤트 수 (재시도 포함)
    pub sent: u64,
    /// 샘플레이트 -1로 버린 이벤트 수
    pub dropped: u64,
    /// 재시도 큐에서 보낸 이벤트 수
    pub retried: u64,
    /// 종료 시 재시도 큐에 남아 버린 이벤트 수
    pub discarded: u64,
}

/// 우선순위 전송 루프
pub struct Sender {
    transmission: Arc<dyn Transmission>,
    primary: mpsc::Receiver<Event>,
    retry: mpsc::Receiver<Event>,
    delays: mpsc::Receiver<Duration>,
    idle_interval: Duration,
}

impl Sender {
    /// 전송 루프와 입력 큐를 생성합니다.
    ///
    /// 반환값은 (전송 루프, 기본 큐 송신측, 재시도 큐 송신측)입니다.
    /// 기본 큐의 모든 송신측이 drop되면 루프가 종료됩니다.
    pub fn new(
        transmission: Arc<dyn Transmission>,
        config: &SenderConfig,
    ) -> (Self, mpsc::Sender<Event>, RetryQueues) {
        let pool = config.pool_size.max(1);
        let (primary_tx, primary) = mpsc::channel(pool * PRIMARY_CAPACITY_FACTOR);
        let (retry_tx, retry) = mpsc::channel(pool * RETRY_CAPACITY_FACTOR);
        let (delay_tx, delays) = mpsc::channel(pool * RETRY_CAPACITY_FACTOR);

        let sender = Self {
            transmission,
            primary,
            retry,
            delays,
            idle_interval: Duration::from_millis(config.idle_interval_ms.max(1)),
        };
        let queues = RetryQueues {
            events: retry_tx,
            delays: delay_tx,
        };
        (sender, primary_tx, queues)
    }

    /// 기본 큐가 닫힐 때까지 이벤트를 보냅니다.
    pub async fn run(self) -> SenderReport {
        let Self {
            transmission,
            mut primary,
            mut retry,
            mut delays,
            idle_interval,
        } = self;
        let mut report = SenderReport::default();

        loop {
            tokio::select! {
                biased;
                Some(delay) = delays.recv() => {
                    debug!(delay_ms = delay.as_millis() as u64, "backing off");
                    tokio::time::sleep(delay).await;
                }
                Some(event) = retry.recv() => {
                    report.retried += 1;
                    metrics::counter!(m::SENDER_RETRIES_TOTAL).increment(1);
                    send_one(transmission.as_ref(), event, &mut report).await;
                }
                next = primary.recv() => match next {
                    Some(event) => send_one(transmission.as_ref(), event, &mut report).await,
                    None => break,
                },
                _ = tokio::time::sleep(idle_interval) => {}
            }
        }

        // 재시도 큐에 남은 이벤트는 보내지 않는다
        while retry.try_recv().is_ok() {
            report.discarded += 1;
        }
        drop(retry);
        drop(delays);
        if report.discarded > 0 {
            metrics::counter!(m::SENDER_RETRIES_DISCARDED_TOTAL).increment(report.discarded);
            warn!(discarded = report.discarded, "discarding events left in the retry queue");
        }

        transmission.close().await;
        info!(
            sent = report.sent,
            dropped = report.dropped,
            retried = report.retried,
            "sender finished"
        );
        report
    }
}

async fn send_one(transmission: &dyn Transmission, event: Event, report: &mut SenderReport) {
    if event.is_dropped() {
        report.dropped += 1;
        metrics::counter!(m::SENDER_EVENTS_DROPPED_TOTAL).increment(1);
        return;
    }

    match transmission.send_presampled(event).await {
        Ok(()) => {
            report.sent += 1;
            metrics::counter!(m::SENDER_EVENTS_SENT_TOTAL).increment(1);
        }
        Err(e) => warn!(error = %e, "transmission rejected event"),
    }
}
