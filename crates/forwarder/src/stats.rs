//! 전송 응답 통계
//!
//! [`StatsAggregator`]는 응답 처리 태스크가 갱신하고 리포터 태스크가 주기적으로
//! 스냅샷을 찍어 로그로 남긴 뒤 초기화합니다. 두 태스크는 하나의 mutex를 공유합니다.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tailpipe_core::event::DeliveryResponse;
use tailpipe_core::metrics as m;

/// 누적 응답 통계 (플러시마다 초기화)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseStats {
    /// 응답 수
    pub count: u64,
    /// 상태 코드별 응답 수
    pub status_codes: BTreeMap<u16, u64>,
    /// 응답 본문별 수 (앞뒤 공백 제거)
    pub bodies: BTreeMap<String, u64>,
    /// 에러 메시지별 수
    pub errors: BTreeMap<String, u64>,
    /// 가장 빠른 응답 시간
    pub min_duration: Duration,
    /// 가장 느린 응답 시간
    pub max_duration: Duration,
    /// 응답 시간 합계
    pub sum_duration: Duration,
}

impl ResponseStats {
    fn record(&mut self, response: &DeliveryResponse) {
        if self.count == 0 {
            self.min_duration = response.duration;
            self.max_duration = response.duration;
        } else {
            self.min_duration = self.min_duration.min(response.duration);
            self.max_duration = self.max_duration.max(response.duration);
        }
        self.count += 1;
        self.sum_duration += response.duration;

        *self.status_codes.entry(response.status_code).or_default() += 1;
        let body = String::from_utf8_lossy(&response.body).trim().to_owned();
        *self.bodies.entry(body).or_default() += 1;
        if let Some(err) = &response.err {
            *self.errors.entry(err.clone()).or_default() += 1;
        }
    }

    /// 평균 응답 시간 (응답이 없으면 0)
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        self.sum_duration / u32::try_from(self.count).unwrap_or(u32::MAX)
    }
}

/// 스레드 안전한 응답 통계 집계기
#[derive(Debug, Clone, Default)]
pub struct StatsAggregator {
    inner: Arc<Mutex<ResponseStats>>,
}

impl StatsAggregator {
    /// 새 집계기를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ResponseStats> {
        // 통계는 손상되어도 계속 사용할 수 있다
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 응답 하나를 반영합니다.
    pub fn update(&self, response: &DeliveryResponse) {
        metrics::counter!(m::RESPONSES_TOTAL, m::LABEL_STATUS => response.status_code.to_string())
            .increment(1);
        self.lock().record(response);
    }

    /// 현재 통계를 복사해 반환합니다.
    pub fn snapshot(&self) -> ResponseStats {
        self.lock().clone()
    }

    /// 현재 통계를 꺼내고 초기화합니다.
    pub fn take(&self) -> ResponseStats {
        std::mem::take(&mut *self.lock())
    }

    /// 통계를 로그로 남기고 초기화합니다.
    pub fn flush(&self) -> ResponseStats {
        let stats = self.take();
        info!(
            total = stats.count,
            slowest_ms = stats.max_duration.as_millis() as u64,
            fastest_ms = stats.min_duration.as_millis() as u64,
            average_ms = stats.average().as_millis() as u64,
            status_codes = ?stats.status_codes,
            bodies = ?stats.bodies,
            errors = ?stats.errors,
            "delivery summary"
        );
        stats
    }

    /// `interval`마다 통계를 출력하고, `done`이 취소되면 마지막으로 한 번 더 출력합니다.
    ///
    /// `interval`이 0이면 주기 출력 없이 종료 시에만 출력합니다.
    /// 마지막으로 출력한 통계를 반환합니다.
    pub async fn run_reporter(self, interval: Duration, done: CancellationToken) -> ResponseStats {
        if interval.is_zero() {
            done.cancelled().await;
        } else {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = done.cancelled() => break,
                    _ = ticker.tick() => {
                        self.flush();
                    }
                }
            }
        }
        self.flush()
    }
}
