use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request envelope accepted on the duplex event channel.
///
/// ```json
/// { "event": "<op>", "uuid": "<client-uuid>", "client": "<client-id>",
///   "parameter": { ... per-op ... } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub event: String,
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default)]
    pub parameter: Value,
}

/// Response envelope mirroring the request's `uuid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub event: String,
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn success(event: impl Into<String>, uuid: impl Into<String>, response: Value) -> Self {
        Self {
            event: event.into(),
            uuid: uuid.into(),
            response: Some(response),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(event: impl Into<String>, uuid: impl Into<String>, error: ErrorPayload) -> Self {
        Self {
            event: event.into(),
            uuid: uuid.into(),
            response: None,
            error: Some(error),
        }
    }
}

/// The `error` field of a failed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_minimal_envelope() {
        let raw = r#"{"event":"logout","uuid":"u-1"}"#;
        let env: RequestEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.event, "logout");
        assert_eq!(env.client, None);
        assert!(env.parameter.is_null());
    }

    #[test]
    fn success_envelope_omits_error_field() {
        let env = ResponseEnvelope::success("get", "u-1", serde_json::json!({"id": "d1"}));
        let value = serde_json::to_value(&env).unwrap();
        assert!(value.get("error").is_none());
    }
}
