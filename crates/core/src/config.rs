//! 설정 관리 -- tailpipe.toml 파싱 및 런타임 설정
//!
//! [`TailpipeConfig`]는 모든 컴포넌트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`TAILPIPE_TAIL_READ_FROM=beginning` 형식)
//! 3. 설정 파일 (`tailpipe.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), tailpipe_core::error::TailpipeError> {
//! use tailpipe_core::config::TailpipeConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = TailpipeConfig::load("tailpipe.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = TailpipeConfig::parse("[tail]\npaths = [\"/var/log/app.log\"]")?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, TailpipeError};

/// tailpipe 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TailpipeConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 파일 tail 설정
    #[serde(default)]
    pub tail: TailConfig,
    /// 파서 설정
    #[serde(default)]
    pub parser: ParserConfig,
    /// 변환 스테이지 설정
    #[serde(default)]
    pub stages: StagesConfig,
    /// 전송기 설정
    #[serde(default)]
    pub sender: SenderConfig,
    /// 전송 통계 설정
    #[serde(default)]
    pub stats: StatsConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl TailpipeConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TailpipeError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, TailpipeError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TailpipeError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                TailpipeError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, TailpipeError> {
        toml::from_str(toml_str).map_err(|e| {
            TailpipeError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `TAILPIPE_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "TAILPIPE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "TAILPIPE_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "TAILPIPE_GENERAL_PID_FILE");

        // Tail
        override_csv(&mut self.tail.paths, "TAILPIPE_TAIL_PATHS");
        override_parsed(&mut self.tail.read_from, "TAILPIPE_TAIL_READ_FROM");
        override_parsed(&mut self.tail.stop, "TAILPIPE_TAIL_STOP");
        override_parsed(&mut self.tail.poll, "TAILPIPE_TAIL_POLL");
        override_parsed(
            &mut self.tail.poll_interval_ms,
            "TAILPIPE_TAIL_POLL_INTERVAL_MS",
        );
        override_string(&mut self.tail.statefile, "TAILPIPE_TAIL_STATEFILE");
        override_parsed(
            &mut self.tail.atomic_statefile,
            "TAILPIPE_TAIL_ATOMIC_STATEFILE",
        );

        // Parser
        override_string(&mut self.parser.name, "TAILPIPE_PARSER_NAME");
        override_string(&mut self.parser.prefix_regex, "TAILPIPE_PARSER_PREFIX_REGEX");
        override_string(
            &mut self.parser.timestamp_field,
            "TAILPIPE_PARSER_TIMESTAMP_FIELD",
        );

        // Stages
        override_string(
            &mut self.stages.presampled_field,
            "TAILPIPE_STAGES_PRESAMPLED_FIELD",
        );
        override_csv(&mut self.stages.drop_fields, "TAILPIPE_STAGES_DROP_FIELDS");
        override_csv(&mut self.stages.scrub_fields, "TAILPIPE_STAGES_SCRUB_FIELDS");
        override_csv(&mut self.stages.add_fields, "TAILPIPE_STAGES_ADD_FIELDS");
        override_csv(
            &mut self.stages.request_shape,
            "TAILPIPE_STAGES_REQUEST_SHAPE",
        );
        override_string(&mut self.stages.shape_prefix, "TAILPIPE_STAGES_SHAPE_PREFIX");
        override_csv(
            &mut self.stages.request_patterns,
            "TAILPIPE_STAGES_REQUEST_PATTERNS",
        );
        override_csv(
            &mut self.stages.request_query_keys,
            "TAILPIPE_STAGES_REQUEST_QUERY_KEYS",
        );

        // Sender
        override_parsed(&mut self.sender.pool_size, "TAILPIPE_SENDER_POOL_SIZE");
        override_parsed(
            &mut self.sender.retry_on_failure,
            "TAILPIPE_SENDER_RETRY_ON_FAILURE",
        );
        override_parsed(
            &mut self.sender.idle_interval_ms,
            "TAILPIPE_SENDER_IDLE_INTERVAL_MS",
        );
        override_parsed(
            &mut self.sender.block_on_response,
            "TAILPIPE_SENDER_BLOCK_ON_RESPONSE",
        );

        // Stats
        override_parsed(&mut self.stats.interval_secs, "TAILPIPE_STATS_INTERVAL_SECS");

        // Metrics
        override_parsed(&mut self.metrics.enabled, "TAILPIPE_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "TAILPIPE_METRICS_LISTEN_ADDR");
        override_parsed(&mut self.metrics.port, "TAILPIPE_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), TailpipeError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.tail.poll_interval_ms == 0 {
            return Err(invalid("tail.poll_interval_ms", "must be greater than 0"));
        }

        if self.parser.name.is_empty() {
            return Err(invalid("parser.name", "parser name must not be empty"));
        }

        if self.sender.pool_size == 0 {
            return Err(invalid("sender.pool_size", "must be greater than 0"));
        }

        if self.sender.idle_interval_ms == 0 {
            return Err(invalid("sender.idle_interval_ms", "must be greater than 0"));
        }

        self.stages.parsed_add_fields()?;

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> TailpipeError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 기록하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
        }
    }
}

/// tail 시작 위치 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadFrom {
    /// 파일 처음부터
    Beginning,
    /// 파일 끝부터 (새로 추가되는 라인만)
    End,
    /// 상태 파일에 기록된 위치부터
    #[default]
    Last,
}

impl FromStr for ReadFrom {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "beginning" => Ok(Self::Beginning),
            "end" => Ok(Self::End),
            "last" => Ok(Self::Last),
            other => Err(ConfigError::InvalidValue {
                field: "tail.read_from".to_owned(),
                reason: format!("'{other}' must be one of: beginning, end, last"),
            }),
        }
    }
}

impl fmt::Display for ReadFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Beginning => write!(f, "beginning"),
            Self::End => write!(f, "end"),
            Self::Last => write!(f, "last"),
        }
    }
}

/// 파일 tail 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// tail할 파일 경로 또는 glob 패턴 (`-`는 표준 입력)
    pub paths: Vec<String>,
    /// 시작 위치 정책
    pub read_from: ReadFrom,
    /// EOF에서 종료할지 여부 (false면 계속 따라감)
    pub stop: bool,
    /// 폴링 방식으로 파일 변화를 감시할지 여부
    pub poll: bool,
    /// 폴링 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 상태 파일 경로 또는 디렉토리 (빈 문자열이면 임시 디렉토리)
    pub statefile: String,
    /// 상태 파일을 임시 파일 + rename 방식으로 기록할지 여부
    pub atomic_statefile: bool,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            read_from: ReadFrom::Last,
            stop: false,
            poll: false,
            poll_interval_ms: 1000,
            statefile: String::new(),
            atomic_statefile: false,
        }
    }
}

/// 파서 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// 파서 이름 (json)
    pub name: String,
    /// 모든 라인 앞의 공통 접두어 정규식 (이름 있는 그룹 필수, 빈 문자열이면 미사용)
    pub prefix_regex: String,
    /// 타임스탬프 필드명
    pub timestamp_field: String,
    /// 파서별 추가 옵션
    pub options: BTreeMap<String, String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            name: "json".to_owned(),
            prefix_regex: String::new(),
            timestamp_field: "timestamp".to_owned(),
            options: BTreeMap::new(),
        }
    }
}

/// 요청 쿼리 키 추출 모드
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// 쿼리 키를 추출하지 않음
    None,
    /// 허용 목록에 있는 키만 추출
    #[default]
    Whitelist,
    /// 모든 키 추출
    All,
}

/// 변환 스테이지 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    /// 샘플레이트를 담고 있는 필드명 (빈 문자열이면 미사용)
    pub presampled_field: String,
    /// 삭제할 필드 목록
    pub drop_fields: Vec<String>,
    /// SHA-256으로 해시할 필드 목록
    pub scrub_fields: Vec<String>,
    /// 추가할 필드 목록 (`key=value`)
    pub add_fields: Vec<String>,
    /// 요청 라인으로 해석할 필드 목록
    pub request_shape: Vec<String>,
    /// 요청 분해 결과 필드명 앞에 붙일 접두어
    pub shape_prefix: String,
    /// 경로 패턴 목록 (예: `/users/:id`)
    pub request_patterns: Vec<String>,
    /// 쿼리 키 추출 모드
    pub request_query_mode: QueryMode,
    /// 허용 쿼리 키 목록 (whitelist 모드)
    pub request_query_keys: Vec<String>,
}

impl StagesConfig {
    /// `add_fields` 항목을 (키, 값) 쌍으로 분리합니다.
    pub fn parsed_add_fields(&self) -> Result<Vec<(String, String)>, ConfigError> {
        self.add_fields
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
                _ => Err(ConfigError::InvalidValue {
                    field: "stages.add_fields".to_owned(),
                    reason: format!("'{entry}' must have the form key=value"),
                }),
            })
            .collect()
    }
}

/// 전송기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// 동시 전송 풀 크기 (큐 용량과 백오프 계산에 사용)
    pub pool_size: usize,
    /// 429/500 응답을 재시도할지 여부
    pub retry_on_failure: bool,
    /// 보낼 것이 없을 때 대기 주기 (밀리초)
    pub idle_interval_ms: u64,
    /// 응답 채널이 가득 찼을 때 전송을 막을지 여부
    pub block_on_response: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            retry_on_failure: false,
            idle_interval_ms: 100,
            block_on_response: true,
        }
    }
}

/// 전송 통계 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// 통계 출력 주기 (초, 0이면 주기 출력 비활성화)
    pub interval_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 리슨 주소
    pub listen_addr: String,
    /// 리슨 포트
    pub port: u16,
    /// 엔드포인트 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9464,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: FromStr>(target: &mut T, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse value from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
