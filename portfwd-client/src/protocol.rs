//! Control socket wire format
//!
//! Each connection carries exactly one request line and one response line,
//! both JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Socket file name inside the portfwd home directory
pub const CONTROL_SOCKET: &str = "control.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    home.join(CONTROL_SOCKET)
}

/// Requests the daemon understands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlRequest {
    /// Start a rule from the daemon's store
    #[serde(rename = "start-rule")]
    StartRule { name: String },
    #[serde(rename = "stop-rule")]
    StopRule { name: String },
    /// List every running rule
    #[serde(rename = "status")]
    Status,
    /// Re-read the store and bring running rules in line with it
    #[serde(rename = "reload")]
    Reload,
}

/// Reply to a [`ControlRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    /// Success status: true for ok, false for error
    pub success: bool,
    /// Response data or error message
    pub data: serde_json::Value,
}

impl ControlResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            data: serde_json::Value::String(message.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_value(ControlRequest::StartRule {
            name: "web".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "start-rule", "name": "web"}));

        let json = serde_json::to_value(ControlRequest::Status).unwrap();
        assert_eq!(json, serde_json::json!({"type": "status"}));
    }

    #[test]
    fn test_parse_request_line() {
        let request: ControlRequest =
            serde_json::from_str(r#"{"type":"stop-rule","name":"dns"}"#).unwrap();
        assert_eq!(
            request,
            ControlRequest::StopRule {
                name: "dns".to_string()
            }
        );

        assert!(serde_json::from_str::<ControlRequest>(r#"{"type":"explode"}"#).is_err());
    }

    #[test]
    fn test_error_response_carries_message() {
        let response = ControlResponse::error("no running rule named 'web'");
        assert!(!response.success);
        assert_eq!(response.data, "no running rule named 'web'");
    }
}
