use serde::{Deserialize, Serialize};

/// API shapes a model server endpoint can expose.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApiKind {
    Completion,
    Chat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One logical request to a model server. Produced by a workload generator,
/// consumed exactly once by the dispatcher. Only the backend adapter branches
/// on the variant; everything else treats it as opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "api", rename_all = "lowercase")]
pub enum RequestDescriptor {
    Completion {
        prompt: String,
        max_tokens: u64,
    },
    Chat {
        messages: Vec<ChatMessage>,
        max_tokens: u64,
    },
}

/// Backend-specific response payload. The dispatcher never inspects this;
/// the report aggregator pulls numeric fields out of it by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseInfo(pub serde_json::Map<String, serde_json::Value>);

impl ResponseInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(serde_json::Value::as_f64)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_kind_round_trips_through_strings() {
        let parsed: ApiKind = "completion".parse().unwrap_or(ApiKind::Chat);
        assert_eq!(parsed, ApiKind::Completion);
        assert_eq!(ApiKind::Chat.to_string(), "chat");
    }

    #[test]
    fn response_info_extracts_numbers() {
        let mut info = ResponseInfo::new();
        info.insert("output_len", 42u64);
        info.insert("output_text", "hello");
        assert_eq!(info.number("output_len"), Some(42.0));
        assert_eq!(info.number("output_text"), None);
        assert_eq!(info.text("output_text"), Some("hello"));
    }
}
