//! tailpipe 포워더 -- 로그 파일 tail, 이벤트 변환, 우선순위 전송, 재시도, 통계
//!
//! # 모듈 구성
//!
//! - [`tail`]: glob 확장, 파일/표준입력 tailer, 상태 파일 영속화와 로테이션 감지
//! - [`parser`]: 라인 파서 레지스트리 (JSON)
//! - [`stage`]: presampled/drop/scrub/add/reshape 변환 스테이지와 체인
//! - [`sender`]: 지연 신호 > 재시도 > 기본 큐 우선순위 전송 루프
//! - [`retry`]: 응답 검사와 재시도 결정
//! - [`stats`]: 응답 통계 집계와 주기 출력
//! - [`transmission`]: 표준 출력 전송기
//! - [`pipeline`]: 전체 흐름 오케스트레이션
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! Tailer -> Parser -> StageChain -> Sender -> Transmission
//!   |                                ^            |
//! StateStore                    RetryCoordinator <- responses -> StatsAggregator
//! ```

pub mod error;
pub mod parser;
pub mod pipeline;
pub mod retry;
pub mod sender;
pub mod stage;
pub mod stats;
pub mod tail;
pub mod transmission;

// --- 주요 타입 re-export ---

// 오케스트레이션
pub use pipeline::{ForwardReport, Forwarder, ForwarderBuilder};

// 에러
pub use error::ForwarderError;

// tail
pub use tail::state::{StateStore, TailState};
pub use tail::{TailInput, TailOptions};

// 스테이지
pub use stage::{Stage, StageChain};

// 전송
pub use retry::RetryCoordinator;
pub use sender::{RetryQueues, Sender, SenderReport};
pub use stats::{ResponseStats, StatsAggregator};
pub use transmission::StdoutTransmission;

// 파서
pub use parser::JsonParser;
