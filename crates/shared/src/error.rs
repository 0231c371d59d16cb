use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error body the kiosk services return on non-2xx responses, e.g.
/// `{"status": "DB_ERROR", "message": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiError {
    pub fn new(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            message: Some(message.into()),
        }
    }

    /// Human-readable detail for a structured body: its `message` when present,
    /// otherwise the compact JSON text.
    pub fn describe(body: &Value) -> String {
        match serde_json::from_value::<ApiError>(body.clone()) {
            Ok(ApiError {
                message: Some(message),
                ..
            }) if !message.trim().is_empty() => message,
            _ => body.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn describe_prefers_message_field() {
        let body = serde_json::to_value(ApiError::new("DB_ERROR", "duplicate entry")).expect("json");
        assert_eq!(ApiError::describe(&body), "duplicate entry");
    }

    #[test]
    fn describe_falls_back_to_json_text() {
        assert_eq!(ApiError::describe(&json!({"error": "boom"})), r#"{"error":"boom"}"#);
        assert_eq!(ApiError::describe(&json!("plain")), r#""plain""#);
    }
}
