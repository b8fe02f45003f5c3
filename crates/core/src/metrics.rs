//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 컴포넌트는 이 상수를 사용하여 `metrics::counter!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `tailpipe_`
//! - 컴포넌트명: `tail_`, `parser_`, `sender_`, `responses_`
//! - 접미어: `_total` (counter)

/// 상태 코드 레이블 키
pub const LABEL_STATUS: &str = "status";

// ─── Tailer 메트릭 ────────────────────────────────────────────────

/// Tail: 읽은 라인 수 (counter)
pub const TAIL_LINES_READ_TOTAL: &str = "tailpipe_tail_lines_read_total";

/// Tail: 감지된 로테이션 수 (counter)
pub const TAIL_ROTATIONS_TOTAL: &str = "tailpipe_tail_rotations_total";

/// Tail: 상태 파일 기록 실패 수 (counter)
pub const TAIL_STATEFILE_WRITE_ERRORS_TOTAL: &str = "tailpipe_tail_statefile_write_errors_total";

// ─── Parser 메트릭 ────────────────────────────────────────────────

/// Parser: 파싱 에러 수 (counter)
pub const PARSER_ERRORS_TOTAL: &str = "tailpipe_parser_errors_total";

// ─── Sender 메트릭 ────────────────────────────────────────────────

/// Sender: 전송된 이벤트 수 (counter)
pub const SENDER_EVENTS_SENT_TOTAL: &str = "tailpipe_sender_events_sent_total";

/// Sender: 샘플레이트 -1로 버려진 이벤트 수 (counter)
pub const SENDER_EVENTS_DROPPED_TOTAL: &str = "tailpipe_sender_events_dropped_total";

/// Sender: 재시도 큐에서 재전송된 이벤트 수 (counter)
pub const SENDER_RETRIES_TOTAL: &str = "tailpipe_sender_retries_total";

/// Sender: 종료 시 재시도 큐에 남아 버려진 이벤트 수 (counter)
pub const SENDER_RETRIES_DISCARDED_TOTAL: &str = "tailpipe_sender_retries_discarded_total";

// ─── Response 메트릭 ──────────────────────────────────────────────

/// Responses: 상태 코드별 응답 수 (counter, label: status)
pub const RESPONSES_TOTAL: &str = "tailpipe_responses_total";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 메트릭 레코더 설치 직후 한 번 호출합니다.
pub fn describe_all() {
    use metrics::describe_counter;

    describe_counter!(TAIL_LINES_READ_TOTAL, "Lines read from tailed inputs");
    describe_counter!(TAIL_ROTATIONS_TOTAL, "Log rotations detected by inode change");
    describe_counter!(
        TAIL_STATEFILE_WRITE_ERRORS_TOTAL,
        "Failed statefile writes"
    );
    describe_counter!(PARSER_ERRORS_TOTAL, "Lines skipped because they failed to parse");
    describe_counter!(SENDER_EVENTS_SENT_TOTAL, "Events handed to the transmission");
    describe_counter!(
        SENDER_EVENTS_DROPPED_TOTAL,
        "Events dropped because of sample rate -1"
    );
    describe_counter!(SENDER_RETRIES_TOTAL, "Events resent from the retry queue");
    describe_counter!(
        SENDER_RETRIES_DISCARDED_TOTAL,
        "Events left in the retry queue at shutdown"
    );
    describe_counter!(RESPONSES_TOTAL, "Delivery responses by status code");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_share_prefix() {
        for name in [
            TAIL_LINES_READ_TOTAL,
            TAIL_ROTATIONS_TOTAL,
            TAIL_STATEFILE_WRITE_ERRORS_TOTAL,
            PARSER_ERRORS_TOTAL,
            SENDER_EVENTS_SENT_TOTAL,
            SENDER_EVENTS_DROPPED_TOTAL,
            SENDER_RETRIES_TOTAL,
            SENDER_RETRIES_DISCARDED_TOTAL,
            RESPONSES_TOTAL,
        ] {
            assert!(name.starts_with("tailpipe_"), "{name}");
            assert!(name.ends_with("_total"), "{name}");
        }
    }

    #[test]
    fn describe_all_without_recorder_is_noop() {
        describe_all();
    }
}
