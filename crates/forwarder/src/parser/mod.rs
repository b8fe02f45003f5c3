//! 라인 파서 레지스트리
//!
//! 설정의 `parser.name`으로 [`LineParser`] 구현을 선택합니다.
//! 파서는 파일마다 새로 생성되며, 알 수 없는 이름이나 잘못된 옵션은
//! 태스크를 띄우기 전에 에러가 됩니다.

pub mod json;

use std::sync::Arc;

use tailpipe_core::clock::Clock;
use tailpipe_core::config::ParserConfig;
use tailpipe_core::pipeline::LineParser;

use crate::error::ForwarderError;
pub use json::JsonParser;

/// 지원하는 파서 이름 목록
pub const AVAILABLE_PARSERS: &[&str] = &["json"];

/// 설정된 이름의 파서를 생성하고 초기화합니다.
pub fn new_parser(
    config: &ParserConfig,
    clock: Arc<dyn Clock>,
) -> Result<Box<dyn LineParser>, ForwarderError> {
    let mut parser: Box<dyn LineParser> = match config.name.as_str() {
        "json" => Box::new(JsonParser::new(clock)),
        other => return Err(ForwarderError::UnknownParser(other.to_owned())),
    };
    parser.init(config)?;
    Ok(parser)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tailpipe_core::clock::SystemClock;

    #[test]
    fn builds_json_parser() {
        let parser = new_parser(&ParserConfig::default(), Arc::new(SystemClock)).unwrap();
        assert_eq!(parser.format_name(), "json");
    }

    #[test]
    fn unknown_parser_is_rejected() {
        let config = ParserConfig {
            name: "nginx".to_owned(),
            ..ParserConfig::default()
        };
        let err = new_parser(&config, Arc::new(SystemClock)).err().unwrap();
        assert!(matches!(err, ForwarderError::UnknownParser(name) if name == "nginx"));
    }

    #[test]
    fn every_listed_parser_builds() {
        for name in AVAILABLE_PARSERS {
            let config = ParserConfig {
                name: (*name).to_owned(),
                ..ParserConfig::default()
            };
            assert!(new_parser(&config, Arc::new(SystemClock)).is_ok(), "{name}");
        }
    }
}
