//! 이벤트 모델 -- 파이프라인을 흐르는 기본 단위
//!
//! [`Event`]는 파서가 생성하고 각 스테이지를 거쳐 전송기로 이동합니다.
//! 채널 전송 시 소유권이 함께 넘어가므로 한 시점에 하나의 태스크만 이벤트를 수정합니다.
//!
//! [`DeliveryResponse`]는 전송 협력자가 돌려주는 결과이며,
//! `metadata`에 원본 이벤트를 그대로 담아 재시도에 사용합니다.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 이벤트 필드 맵 (키는 이벤트 안에서 유일)
pub type EventData = serde_json::Map<String, serde_json::Value>;

/// 샘플레이트 -1: 전송하지 않고 버림
pub const SAMPLE_RATE_DROP: i32 = -1;
/// 샘플레이트 0: 미설정, 1로 취급
pub const SAMPLE_RATE_UNSET: i32 = 0;

/// 파이프라인 이벤트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// 이벤트 발생 시각
    pub timestamp: DateTime<Utc>,
    /// 샘플레이트 마커 (-1 드롭, 0 미설정, N>0 이미 1/N 샘플링됨)
    pub sample_rate: i32,
    /// 필드 데이터
    pub data: EventData,
}

impl Event {
    /// 빈 데이터로 새 이벤트를 생성합니다.
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            sample_rate: SAMPLE_RATE_UNSET,
            data: EventData::new(),
        }
    }

    /// 주어진 데이터로 이벤트를 생성합니다.
    pub fn with_data(timestamp: DateTime<Utc>, data: EventData) -> Self {
        Self {
            timestamp,
            sample_rate: SAMPLE_RATE_UNSET,
            data,
        }
    }

    /// 전송하지 말아야 하는 이벤트인지 확인합니다.
    pub fn is_dropped(&self) -> bool {
        self.sample_rate == SAMPLE_RATE_DROP
    }

    /// 전송 시 사용할 샘플레이트를 반환합니다.
    ///
    /// 0(미설정)은 1로 취급합니다. 드롭 마커(-1)는 호출 전에 걸러야 합니다.
    pub fn effective_sample_rate(&self) -> u32 {
        u32::try_from(self.sample_rate).unwrap_or(1).max(1)
    }

    /// 문자열 필드를 조회합니다.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(serde_json::Value::as_str)
    }
}

/// 전송 결과
///
/// `metadata`는 원본 이벤트를 되돌려 주므로 재시도 시 그대로 재전송할 수 있습니다.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP 상태 코드
    pub status_code: u16,
    /// 응답 본문
    pub body: Bytes,
    /// 전송 소요 시간
    pub duration: Duration,
    /// 전송 에러 메시지 (있는 경우)
    pub err: Option<String>,
    /// 원본 이벤트
    pub metadata: Event,
}

impl DeliveryResponse {
    /// 성공 응답을 생성합니다.
    pub fn ok(metadata: Event, duration: Duration) -> Self {
        Self {
            status_code: 200,
            body: Bytes::new(),
            duration,
            err: None,
            metadata,
        }
    }

    /// 상태 코드를 지정해 응답을 생성합니다.
    pub fn with_status(metadata: Event, status_code: u16, duration: Duration) -> Self {
        Self {
            status_code,
            body: Bytes::new(),
            duration,
            err: None,
            metadata,
        }
    }
}
