//! 요청 라인 reshape 스테이지
//!
//! `"GET /users/42?page=2 HTTP/1.1"` 같은 요청 문자열을 분해해
//! 메서드, 경로, 쿼리, 경로 변수, 정규화된 shape 필드를 이벤트에 추가합니다.
//!
//! # 패턴 문법
//! - `:name` 한 경로 세그먼트를 `name` 변수로 캡처
//! - `*` 임의의 문자열
//!
//! 패턴은 선언 순서대로 검사하며 처음 일치한 패턴이 경로 shape가 됩니다.
//! 일치하는 패턴이 없으면 경로 자체가 shape입니다.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;
use tracing::trace;
use url::Url;

use tailpipe_core::config::{QueryMode, StagesConfig};
use tailpipe_core::event::{Event, EventData};

use super::Stage;
use crate::error::ForwarderError;

/// 상대 경로 해석에 사용하는 기준 URL
const BASE_URL: &str = "http://localhost";

/// reshape 공통 옵션
#[derive(Debug, Clone, Default)]
pub struct ShapeOptions {
    /// 추가되는 필드 이름 접두어
    pub prefix: String,
    /// 쿼리 값 필드 생성 모드
    pub query_mode: QueryMode,
    /// `whitelist` 모드에서 값을 남길 쿼리 키
    pub query_keys: Vec<String>,
}

impl ShapeOptions {
    /// 설정에서 옵션을 생성합니다.
    pub fn from_config(config: &StagesConfig) -> Self {
        Self {
            prefix: config.shape_prefix.clone(),
            query_mode: config.request_query_mode,
            query_keys: config.request_query_keys.clone(),
        }
    }
}

/// 컴파일된 경로 패턴
#[derive(Debug, Clone)]
struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    fn compile(source: &str) -> Result<Self, ForwarderError> {
        let regex = Regex::new(&pattern_to_regex(source)).map_err(|e| ForwarderError::Config {
            field: "stages.request_patterns".to_owned(),
            reason: format!("invalid pattern '{source}': {e}"),
        })?;
        Ok(Self {
            source: source.to_owned(),
            regex,
        })
    }
}

/// `:name`과 `*`를 포함한 패턴을 앵커된 정규식으로 변환합니다.
fn pattern_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ':' => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    out.push(':');
                } else {
                    out.push_str(&format!("(?P<{name}>[^/]+)"));
                }
            }
            '*' => out.push_str(".*"),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}

/// 분해된 요청 라인
struct RequestLine<'a> {
    method: Option<&'a str>,
    protocol: Option<&'a str>,
    uri: &'a str,
}

impl<'a> RequestLine<'a> {
    fn split(value: &'a str) -> Self {
        let parts: Vec<&str> = value.split_whitespace().collect();
        match parts.as_slice() {
            &[method, uri, protocol] => Self {
                method: Some(method),
                protocol: Some(protocol),
                uri,
            },
            _ => Self {
                method: None,
                protocol: None,
                uri: value.trim(),
            },
        }
    }
}

/// 요청 문자열 필드를 분해하는 스테이지
#[derive(Debug, Clone)]
pub struct RequestShaper {
    field: String,
    patterns: Vec<PathPattern>,
    options: ShapeOptions,
}

impl RequestShaper {
    /// 새 스테이지를 생성합니다. 패턴이 잘못되었으면 에러를 반환합니다.
    pub fn new(
        field: impl Into<String>,
        patterns: &[String],
        options: ShapeOptions,
    ) -> Result<Self, ForwarderError> {
        let patterns = patterns
            .iter()
            .map(|p| PathPattern::compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            field: field.into(),
            patterns,
            options,
        })
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}{}_{}", self.options.prefix, self.field, suffix)
    }

    /// 요청 문자열을 분해한 필드 목록을 반환합니다. 파싱 실패 시 `None`.
    fn shape(&self, value: &str) -> Option<EventData> {
        let request = RequestLine::split(value);
        let url = parse_uri(request.uri)?;
        let mut out = EventData::new();

        if let Some(method) = request.method {
            out.insert(self.key("method"), Value::from(method));
        }
        if let Some(protocol) = request.protocol {
            out.insert(self.key("protocol_version"), Value::from(protocol));
        }
        out.insert(self.key("uri"), Value::from(request.uri));

        let path = url.path();
        out.insert(self.key("path"), Value::from(path));

        let pathshape = match self.patterns.iter().find_map(|p| p.regex.captures(path).map(|c| (p, c))) {
            Some((pattern, captures)) => {
                for name in pattern.regex.capture_names().flatten() {
                    if let Some(m) = captures.name(name) {
                        out.insert(self.key(&format!("path_{name}")), Value::from(m.as_str()));
                    }
                }
                pattern.source.clone()
            }
            None => path.to_owned(),
        };

        let mut query: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (k, v) in url.query_pairs() {
            query.entry(k.into_owned()).or_default().push(v.into_owned());
        }
        if let Some(raw) = url.query().filter(|q| !q.is_empty()) {
            out.insert(self.key("query"), Value::from(raw));
        }

        for (key, values) in &query {
            let keep = match self.options.query_mode {
                QueryMode::None => false,
                QueryMode::Whitelist => self.options.query_keys.iter().any(|k| k == key),
                QueryMode::All => true,
            };
            if keep {
                let mut values = values.clone();
                values.sort();
                out.insert(self.key(&format!("query_{key}")), Value::from(values.join(", ")));
            }
        }

        let queryshape = query
            .keys()
            .map(|k| format!("{k}=?"))
            .collect::<Vec<_>>()
            .join("&");
        let shape = if queryshape.is_empty() {
            pathshape.clone()
        } else {
            format!("{pathshape}?{queryshape}")
        };

        out.insert(self.key("shape"), Value::from(shape));
        out.insert(self.key("pathshape"), Value::from(pathshape));
        if !queryshape.is_empty() {
            out.insert(self.key("queryshape"), Value::from(queryshape));
        }
        Some(out)
    }
}

/// 절대 경로(`/...`) 또는 절대 URL만 허용합니다.
fn parse_uri(uri: &str) -> Option<Url> {
    if uri.starts_with('/') && !uri.starts_with("//") {
        Url::parse(BASE_URL).ok()?.join(uri).ok()
    } else {
        Url::parse(uri).ok().filter(|u| u.has_host())
    }
}

impl Stage for RequestShaper {
    fn name(&self) -> &str {
        "reshape"
    }

    fn apply(&self, mut event: Event) -> Option<Event> {
        let Some(value) = event.get_str(&self.field) else {
            return Some(event);
        };
        match self.shape(value) {
            Some(fields) => event.data.extend(fields),
            None => trace!(field = %self.field, "request value did not parse, passing through"),
        }
        Some(event)
    }
}
