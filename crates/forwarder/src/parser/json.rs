//! JSON 라인 파서
//!
//! 한 줄에 JSON 객체 하나를 파싱해 최상위 필드를 그대로 이벤트 데이터로 사용합니다.
//! 타임스탬프는 설정된 필드(RFC 3339 문자열 또는 유닉스 초)에서 읽고,
//! 없거나 해석할 수 없으면 주입된 시계의 현재 시각을 사용합니다.
//!
//! # 옵션 (`[parser.options]`)
//! - `max_input_size`: 한 줄의 최대 바이트 수 (기본 1MB)

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tailpipe_core::clock::Clock;
use tailpipe_core::config::ParserConfig;
use tailpipe_core::error::{ConfigError, ParseError, TailpipeError};
use tailpipe_core::event::{Event, EventData};
use tailpipe_core::metrics as m;
use tailpipe_core::pipeline::{BoxFuture, LineParser};
use tailpipe_core::prefix::LinePrefix;

/// 기본 최대 입력 크기 (1MB)
const DEFAULT_MAX_INPUT_SIZE: usize = 1024 * 1024;

/// JSON 라인 파서
pub struct JsonParser {
    /// 타임스탬프 필드명
    timestamp_field: String,
    /// 최대 허용 입력 크기 (바이트)
    max_input_size: usize,
    clock: Arc<dyn Clock>,
}

impl JsonParser {
    /// 새 파서를 생성합니다.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            timestamp_field: "timestamp".to_owned(),
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
            clock,
        }
    }

    /// 한 줄을 이벤트로 변환합니다. 접두어 필드가 있으면 먼저 병합합니다.
    pub fn parse_line(&self, line: &str, prefix_fields: EventData) -> Result<Event, ParseError> {
        if line.len() > self.max_input_size {
            return Err(ParseError::TooLarge {
                size: line.len(),
                max: self.max_input_size,
            });
        }

        let value: Value = serde_json::from_str(line).map_err(|e| ParseError::Failed {
            offset: e.column(),
            reason: e.to_string(),
        })?;
        let Value::Object(object) = value else {
            return Err(ParseError::Failed {
                offset: 0,
                reason: "expected JSON object at top level".to_owned(),
            });
        };

        let timestamp = object
            .get(&self.timestamp_field)
            .and_then(parse_timestamp)
            .unwrap_or_else(|| self.clock.now());

        let mut data = prefix_fields;
        data.extend(object);
        Ok(Event::with_data(timestamp, data))
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let secs = n.as_f64()?;
            let nanos = (secs.fract() * 1e9) as u32;
            Utc.timestamp_opt(secs.trunc() as i64, nanos).single()
        }
        _ => None,
    }
}

impl LineParser for JsonParser {
    fn format_name(&self) -> &str {
        "json"
    }

    fn init(&mut self, config: &ParserConfig) -> Result<(), TailpipeError> {
        if !config.timestamp_field.is_empty() {
            self.timestamp_field.clone_from(&config.timestamp_field);
        }
        if let Some(raw) = config.options.get("max_input_size") {
            self.max_input_size = raw.parse().map_err(|_| ConfigError::InvalidValue {
                field: "parser.options.max_input_size".to_owned(),
                reason: format!("'{raw}' is not a byte count"),
            })?;
        }
        Ok(())
    }

    fn process_lines<'a>(
        &'a self,
        mut lines: mpsc::Receiver<String>,
        send: mpsc::Sender<Event>,
        prefix: Option<&'a LinePrefix>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            while let Some(line) = lines.recv().await {
                if line.is_empty() {
                    continue;
                }

                let (fields, body) = match prefix {
                    Some(prefix) => prefix.split(&line),
                    None => (EventData::new(), line.as_str()),
                };

                match self.parse_line(body, fields) {
                    Ok(event) => {
                        if send.send(event).await.is_err() {
                            debug!("event receiver closed, stopping parser");
                            return;
                        }
                    }
                    Err(e) => {
                        metrics::counter!(m::PARSER_ERRORS_TOTAL).increment(1);
                        warn!(error = %e, line = %truncate(&line, 200), "skipping unparseable line");
                    }
                }
            }
        })
    }
}

fn truncate(line: &str, max: usize) -> &str {
    match line.char_indices().nth(max) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}
