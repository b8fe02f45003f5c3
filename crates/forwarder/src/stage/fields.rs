//! 필드 단위 스테이지: presampled, drop, scrub, add

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use tailpipe_core::event::Event;

use super::Stage;

/// 로그 필드 값으로 샘플레이트를 설정합니다.
///
/// 필드 값은 정수 또는 정수 문자열이어야 하며, 그렇지 않으면 이벤트는 그대로 통과합니다.
#[derive(Debug, Clone)]
pub struct PresampledField {
    field: String,
}

impl PresampledField {
    /// 새 스테이지를 생성합니다.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Stage for PresampledField {
    fn name(&self) -> &str {
        "presampled"
    }

    fn apply(&self, mut event: Event) -> Option<Event> {
        let rate = match event.data.get(&self.field) {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        match rate.and_then(|r| i32::try_from(r).ok()) {
            Some(rate) => event.sample_rate = rate,
            None => {
                if event.data.contains_key(&self.field) {
                    debug!(field = %self.field, "presampled field is not an integer, ignoring");
                }
            }
        }
        Some(event)
    }
}

/// 필드를 삭제합니다.
#[derive(Debug, Clone)]
pub struct DropField {
    field: String,
}

impl DropField {
    /// 새 스테이지를 생성합니다.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Stage for DropField {
    fn name(&self) -> &str {
        "drop"
    }

    fn apply(&self, mut event: Event) -> Option<Event> {
        event.data.remove(&self.field);
        Some(event)
    }
}

/// 필드 값을 SHA-256 해시(소문자 hex)로 치환합니다.
///
/// 문자열은 원문을, 그 외 값은 JSON 표현을 해시합니다.
/// 같은 이벤트에 두 번 적용하면 해시의 해시가 됩니다.
#[derive(Debug, Clone)]
pub struct ScrubField {
    field: String,
}

impl ScrubField {
    /// 새 스테이지를 생성합니다.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Stage for ScrubField {
    fn name(&self) -> &str {
        "scrub"
    }

    fn apply(&self, mut event: Event) -> Option<Event> {
        if let Some(value) = event.data.get_mut(&self.field) {
            let digest = match &*value {
                Value::String(s) => sha256_hex(s.as_bytes()),
                other => sha256_hex(other.to_string().as_bytes()),
            };
            *value = Value::String(digest);
        }
        Some(event)
    }
}

/// 바이트열의 SHA-256 해시를 소문자 hex 문자열로 반환합니다.
pub fn sha256_hex(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}

/// 고정 문자열 필드를 추가합니다 (기존 값은 덮어씀).
#[derive(Debug, Clone)]
pub struct AddField {
    key: String,
    value: String,
}

impl AddField {
    /// 새 스테이지를 생성합니다.
    pub fn new(key: String, value: String) -> Self {
        Self { key, value }
    }
}

impl Stage for AddField {
    fn name(&self) -> &str {
        "add"
    }

    fn apply(&self, mut event: Event) -> Option<Event> {
        event
            .data
            .insert(self.key.clone(), Value::String(self.value.clone()));
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;
    use serde_json::json;
    use tailpipe_core::event::EventData;

    const SECRET_SHA256: &str = "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b";

    fn event_with(key: &str, value: Value) -> Event {
        let mut data = EventData::new();
        data.insert(key.to_owned(), value);
        Event::with_data(DateTime::<Utc>::UNIX_EPOCH, data)
    }

    #[test]
    fn drop_removes_field() {
        let out = DropField::new("password")
            .apply(event_with("password", json!("hunter2")))
            .unwrap();
        assert!(out.data.is_empty());
    }

    #[test]
    fn drop_missing_field_is_noop() {
        let input = event_with("user", json!("bob"));
        let out = DropField::new("password").apply(input.clone()).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn scrub_hashes_string() {
        let out = ScrubField::new("token")
            .apply(event_with("token", json!("secret")))
            .unwrap();
        let hashed = out.get_str("token").unwrap();
        assert_eq!(hashed, SECRET_SHA256);
        assert_eq!(hashed.len(), 64);
        assert!(hashed.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn scrub_is_not_idempotent() {
        let stage = ScrubField::new("token");
        let once = stage.apply(event_with("token", json!("secret"))).unwrap();
        let twice = stage.apply(once.clone()).unwrap();
        assert_ne!(once.data["token"], twice.data["token"]);
        assert_eq!(twice.get_str("token").unwrap(), sha256_hex(SECRET_SHA256.as_bytes()));
    }

    #[test]
    fn scrub_hashes_json_text_of_numbers() {
        let out = ScrubField::new("id")
            .apply(event_with("id", json!(42)))
            .unwrap();
        assert_eq!(out.get_str("id").unwrap(), sha256_hex(b"42"));
    }

    #[test]
    fn scrub_missing_field_is_noop() {
        let input = event_with("user", json!("bob"));
        assert_eq!(ScrubField::new("token").apply(input.clone()), Some(input));
    }

    #[test]
    fn add_overwrites_existing_value() {
        let out = AddField::new("env".to_owned(), "prod".to_owned())
            .apply(event_with("env", json!(1)))
            .unwrap();
        assert_eq!(out.data["env"], json!("prod"));
    }

    #[test]
    fn presampled_reads_integer_and_string() {
        let stage = PresampledField::new("rate");
        assert_eq!(stage.apply(event_with("rate", json!(10))).unwrap().sample_rate, 10);
        assert_eq!(stage.apply(event_with("rate", json!("25"))).unwrap().sample_rate, 25);
        assert_eq!(stage.apply(event_with("rate", json!(-1))).unwrap().sample_rate, -1);
    }

    #[test]
    fn presampled_ignores_non_integers() {
        let stage = PresampledField::new("rate");
        assert_eq!(stage.apply(event_with("rate", json!("lots"))).unwrap().sample_rate, 0);
        assert_eq!(stage.apply(event_with("other", json!(5))).unwrap().sample_rate, 0);
    }

    proptest! {
        #[test]
        fn drop_never_leaves_field(key in "[a-z]{1,8}", value in ".*", other in "[A-Z]{1,8}") {
            let mut input = event_with(&key, json!(value));
            input.data.insert(other.clone(), json!(1));
            let out = DropField::new(key.clone()).apply(input).unwrap();
            prop_assert!(!out.data.contains_key(&key));
            prop_assert!(out.data.contains_key(&other));
        }

        #[test]
        fn add_always_sets_value(key in "[a-z]{1,8}", value in ".*", existing in any::<i64>()) {
            let input = event_with(&key, json!(existing));
            let out = AddField::new(key.clone(), value.clone()).apply(input).unwrap();
            prop_assert_eq!(out.get_str(&key), Some(value.as_str()));
        }
    }
}
