//! 포워더 에러 타입
//!
//! [`ForwarderError`]는 tail, 상태 저장, 스테이지 구성, 전송 과정에서 발생하는 에러를 표현합니다.
//! `From<ForwarderError> for TailpipeError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use tailpipe_core::error::{ConfigError, PipelineError, TailpipeError};

/// 포워더 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    /// 설정 에러 (시작 전에만 발생하며 치명적)
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 알 수 없는 파서 이름
    #[error("unknown parser: {0}")]
    UnknownParser(String),

    /// 잘못된 glob 패턴
    #[error("invalid glob pattern '{pattern}': {reason}")]
    Glob {
        /// 패턴
        pattern: String,
        /// 에러 사유
        reason: String,
    },

    /// 상태 파일 에러
    #[error("statefile error: {path}: {reason}")]
    StateFile {
        /// 상태 파일 경로
        path: String,
        /// 에러 사유
        reason: String,
    },

    /// tail 대상 파일 에러
    #[error("tail error: {path}: {reason}")]
    Tail {
        /// 파일 경로
        path: String,
        /// 에러 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// 코어 에러
    #[error(transparent)]
    Core(#[from] TailpipeError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ForwarderError> for TailpipeError {
    fn from(err: ForwarderError) -> Self {
        match err {
            ForwarderError::Core(inner) => inner,
            ForwarderError::Io(inner) => TailpipeError::Io(inner),
            ForwarderError::Config { field, reason } => {
                TailpipeError::Config(ConfigError::InvalidValue { field, reason })
            }
            other => TailpipeError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
