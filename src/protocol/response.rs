use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome tag carried by every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::Error => write!(f, "ERROR"),
        }
    }
}

/// JSON response body sent back for every command.
///
/// Wire shapes:
///
/// - list: `{"status":"OK","data":[...]}`
/// - upload: `{"status":"OK"}`
/// - download: `{"status":"OK","data_file":"<base64>"}`
/// - failure: `{"status":"ERROR","data":"<message>"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_file: Option<String>,
}

impl Response {
    /// Bare success, used for uploads.
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            data: None,
            data_file: None,
        }
    }

    pub fn ok_with_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ok()
        }
    }

    pub fn ok_with_file(encoded: String) -> Self {
        Self {
            data_file: Some(encoded),
            ..Self::ok()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            data: Some(Value::String(message.into())),
            data_file: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Human-readable failure detail from the `data` field.
    pub fn error_message(&self) -> String {
        match &self.data {
            Some(Value::String(message)) => message.clone(),
            Some(other) => other.to_string(),
            None => "unknown error".to_string(),
        }
    }

    /// Serialize to the JSON payload (without the sentinel).
    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing a plain struct of strings and JSON values cannot fail;
        // fall back to a static error body rather than panicking.
        serde_json::to_vec(self).unwrap_or_else(|_| {
            br#"{"status":"ERROR","data":"response serialization failed"}"#.to_vec()
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
