//! tailpipe 공통 크레이트
//!
//! 로그 tail/전송 에이전트의 모든 크레이트가 공유하는 타입, trait, 에러, 설정을 정의합니다.
//!
//! - [`event`]: 파이프라인 이벤트와 전송 응답
//! - [`pipeline`]: 외부 협력자(파서, 전송기) trait
//! - [`config`]: `tailpipe.toml` 설정
//! - [`clock`]: 주입 가능한 시간 소스
//! - [`prefix`]: 라인 접두어 추출
//! - [`metrics`]: 메트릭 이름 상수

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod prefix;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, ParseError, PipelineError, TailpipeError};

// 설정
pub use config::{QueryMode, ReadFrom, TailpipeConfig};

// 이벤트
pub use event::{DeliveryResponse, Event, EventData};

// 파이프라인 trait
pub use pipeline::{BoxFuture, LineParser, Transmission};

// 시간 소스
pub use clock::{Clock, ManualClock, SystemClock};

pub use prefix::LinePrefix;
