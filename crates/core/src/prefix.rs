//! 라인 접두어 추출
//!
//! 모든 라인 앞에 붙는 공통 접두어(예: 컨테이너 런타임이 붙이는 시각/스트림 표시)를
//! 이름 있는 그룹을 가진 정규식으로 떼어내고, 그룹 값을 이벤트 필드로 돌려줍니다.

use regex::Regex;

use crate::error::{ConfigError, TailpipeError};
use crate::event::EventData;

/// 컴파일된 라인 접두어 패턴
#[derive(Debug, Clone)]
pub struct LinePrefix {
    regex: Regex,
}

impl LinePrefix {
    /// 접두어 정규식을 컴파일합니다.
    ///
    /// 패턴은 라인 맨 앞에 고정됩니다. 이름 있는 그룹이 하나도 없으면 거부합니다.
    pub fn new(pattern: &str) -> Result<Self, TailpipeError> {
        let anchored = if pattern.starts_with('^') {
            pattern.to_owned()
        } else {
            format!("^(?:{pattern})")
        };
        let regex = Regex::new(&anchored).map_err(|e| ConfigError::InvalidValue {
            field: "parser.prefix_regex".to_owned(),
            reason: e.to_string(),
        })?;
        if regex.capture_names().flatten().next().is_none() {
            return Err(ConfigError::InvalidValue {
                field: "parser.prefix_regex".to_owned(),
                reason: "pattern must contain at least one named group".to_owned(),
            }
            .into());
        }
        Ok(Self { regex })
    }

    /// 라인에서 접두어를 분리합니다.
    ///
    /// 매칭되면 (그룹 필드, 나머지 라인)을, 아니면 (빈 필드, 원본 라인)을 반환합니다.
    pub fn split<'l>(&self, line: &'l str) -> (EventData, &'l str) {
        let mut fields = EventData::new();
        let Some(caps) = self.regex.captures(line) else {
            return (fields, line);
        };

        for name in self.regex.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                fields.insert(name.to_owned(), m.as_str().into());
            }
        }

        let end = caps.get(0).map_or(0, |m| m.end());
        (fields, &line[end..])
    }
}
