use serde::{Deserialize, Serialize};

/// Discord webhook 请求体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub content: String,
}

impl WebhookPayload {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let json = serde_json::to_string(&WebhookPayload::new("あけた")).unwrap();
        assert_eq!(json, r#"{"content":"あけた"}"#);
    }
}
