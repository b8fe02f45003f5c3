//! 에러 타입 -- 도메인별 에러 정의

/// tailpipe 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum TailpipeError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 파싱 에러
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// 전송 에러
    #[error("transmission error: {0}")]
    Transmission(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),
}

/// 파싱 에러
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// 파싱 실패
    #[error("parse failed at offset {offset}: {reason}")]
    Failed { offset: usize, reason: String },

    /// 입력 데이터 초과
    #[error("input too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts_to_top_level() {
        let err: TailpipeError = ConfigError::InvalidValue {
            field: "tail.read_from".to_owned(),
            reason: "must be one of: beginning, end, last".to_owned(),
        }
        .into();
        assert!(matches!(err, TailpipeError::Config(_)));
        assert!(err.to_string().contains("tail.read_from"));
    }

    #[test]
    fn parse_error_display_includes_offset() {
        let err = ParseError::Failed {
            offset: 7,
            reason: "unexpected token".to_owned(),
        };
        assert_eq!(err.to_string(), "parse failed at offset 7: unexpected token");
    }
}
