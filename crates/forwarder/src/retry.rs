//! 전송 응답 처리 및 재시도 결정
//!
//! 모든 응답은 통계에 반영됩니다. 재시도가 켜져 있고 상태 코드가 429 또는 500이면
//! 전송 루프에 `1000 / pool_size` ms 지연 신호를 보내고 원본 이벤트를 재시도 큐에 넣습니다.
//! 재시도 횟수 제한이나 지수 백오프는 없습니다.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use tailpipe_core::config::SenderConfig;
use tailpipe_core::event::DeliveryResponse;

use crate::sender::RetryQueues;
use crate::stats::StatsAggregator;

/// 재시도 대상 상태 코드인지 확인합니다.
pub fn is_retryable(status_code: u16) -> bool {
    matches!(status_code, 429 | 500)
}

/// 풀 크기에 따른 백오프 시간
pub fn backoff_for(pool_size: usize) -> Duration {
    let pool = u64::try_from(pool_size.max(1)).unwrap_or(u64::MAX);
    Duration::from_millis(1000 / pool)
}

/// 응답 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 통계만 반영하고 끝
    Finalized,
    /// 재시도 큐에 다시 넣음
    Requeued,
    /// 재시도 대상이지만 전송 루프가 이미 끝나 버림
    Abandoned,
}

/// 응답 처리기
pub struct RetryCoordinator {
    retry_enabled: bool,
    backoff: Duration,
    stats: StatsAggregator,
    queues: RetryQueues,
}

impl RetryCoordinator {
    /// 새 처리기를 생성합니다.
    pub fn new(config: &SenderConfig, stats: StatsAggregator, queues: RetryQueues) -> Self {
        Self {
            retry_enabled: config.retry_on_failure,
            backoff: backoff_for(config.pool_size),
            stats,
            queues,
        }
    }

    /// 응답 하나를 처리합니다.
    pub async fn handle(&self, response: DeliveryResponse) -> Outcome {
        self.stats.update(&response);

        if !self.retry_enabled || !is_retryable(response.status_code) {
            return Outcome::Finalized;
        }

        debug!(
            status = response.status_code,
            backoff_ms = self.backoff.as_millis() as u64,
            "requeueing throttled event"
        );
        // 재시도 하나마다 지연 신호 하나
        if self.queues.delays.send(self.backoff).await.is_err() {
            return self.abandon();
        }
        if self.queues.events.send(response.metadata).await.is_err() {
            return self.abandon();
        }
        Outcome::Requeued
    }

    fn abandon(&self) -> Outcome {
        warn!("sender already finished, dropping retryable event");
        Outcome::Abandoned
    }

    /// 응답 채널이 닫힐 때까지 응답을 처리합니다.
    pub async fn run(self, mut responses: mpsc::Receiver<DeliveryResponse>) {
        while let Some(response) = responses.recv().await {
            self.handle(response).await;
        }
        debug!("response channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use tailpipe_core::event::Event;

    fn queues(capacity: usize) -> (RetryQueues, mpsc::Receiver<Event>, mpsc::Receiver<Duration>) {
        let (events, events_rx) = mpsc::channel(capacity);
        let (delays, delays_rx) = mpsc::channel(capacity);
        (RetryQueues { events, delays }, events_rx, delays_rx)
    }

    fn config(retry: bool, pool_size: usize) -> SenderConfig {
        SenderConfig {
            retry_on_failure: retry,
            pool_size,
            ..SenderConfig::default()
        }
    }

    fn response(status: u16) -> DeliveryResponse {
        let mut event = Event::new(DateTime::<Utc>::UNIX_EPOCH);
        event.sample_rate = 4;
        event.data.insert("id".to_owned(), json!("abc"));
        DeliveryResponse::with_status(event, status, Duration::from_millis(1))
    }

    #[test]
    fn retryable_codes() {
        assert!(is_retryable(429));
        assert!(is_retryable(500));
        assert!(!is_retryable(200));
        assert!(!is_retryable(502));
        assert!(!is_retryable(400));
    }

    #[test]
    fn backoff_divides_one_second_by_pool() {
        assert_eq!(backoff_for(10), Duration::from_millis(100));
        assert_eq!(backoff_for(3), Duration::from_millis(333));
        assert_eq!(backoff_for(0), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn throttled_event_is_requeued_unchanged() {
        let (q, mut events, mut delays) = queues(4);
        let stats = StatsAggregator::new();
        let coordinator = RetryCoordinator::new(&config(true, 10), stats.clone(), q);

        let resp = response(429);
        let original = resp.metadata.clone();
        assert_eq!(coordinator.handle(resp).await, Outcome::Requeued);

        assert_eq!(delays.recv().await.unwrap(), Duration::from_millis(100));
        let requeued = events.recv().await.unwrap();
        assert_eq!(requeued, original);
        assert_eq!(requeued.sample_rate, 4);
        assert_eq!(stats.snapshot().status_codes[&429], 1);
    }

    #[tokio::test]
    async fn every_requeue_signals_backoff_beyond_queue_capacity() {
        // pool_size 1 -> 지연 큐 용량 2
        let (q, mut events, mut delays) = queues(2);
        let coordinator = RetryCoordinator::new(&config(true, 1), StatsAggregator::new(), q);

        let drain = tokio::spawn(async move {
            let (mut signals, mut requeued) = (0, 0);
            loop {
                tokio::select! {
                    Some(delay) = delays.recv() => {
                        assert_eq!(delay, Duration::from_millis(1000));
                        signals += 1;
                    }
                    Some(_) = events.recv() => requeued += 1,
                    else => break,
                }
            }
            (signals, requeued)
        });

        for _ in 0..5 {
            assert_eq!(coordinator.handle(response(429)).await, Outcome::Requeued);
        }
        drop(coordinator);

        let (signals, requeued) = drain.await.unwrap();
        assert_eq!(requeued, 5);
        assert_eq!(signals, 5);
    }

    #[tokio::test]
    async fn success_and_permanent_errors_are_finalized() {
        let (q, mut events, _delays) = queues(4);
        let stats = StatsAggregator::new();
        let coordinator = RetryCoordinator::new(&config(true, 10), stats.clone(), q);

        assert_eq!(coordinator.handle(response(200)).await, Outcome::Finalized);
        assert_eq!(coordinator.handle(response(400)).await, Outcome::Finalized);
        assert!(events.try_recv().is_err());
        assert_eq!(stats.snapshot().count, 2);
    }

    #[tokio::test]
    async fn disabled_retry_only_counts() {
        let (q, mut events, _delays) = queues(4);
        let coordinator = RetryCoordinator::new(&config(false, 10), StatsAggregator::new(), q);
        assert_eq!(coordinator.handle(response(500)).await, Outcome::Finalized);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_sender_abandons_retry() {
        let (q, events, delays) = queues(4);
        drop(events);
        drop(delays);
        let coordinator = RetryCoordinator::new(&config(true, 10), StatsAggregator::new(), q);
        assert_eq!(coordinator.handle(response(500)).await, Outcome::Abandoned);
    }

    #[tokio::test]
    async fn run_drains_until_channel_closes() {
        let (q, mut events, _delays) = queues(4);
        let stats = StatsAggregator::new();
        let coordinator = RetryCoordinator::new(&config(true, 10), stats.clone(), q);
        let (tx, rx) = mpsc::channel(4);

        tx.send(response(200)).await.unwrap();
        tx.send(response(429)).await.unwrap();
        drop(tx);
        coordinator.run(rx).await;

        assert_eq!(stats.snapshot().count, 2);
        assert!(events.recv().await.is_some());
    }
}
