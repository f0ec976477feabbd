//! Hub wire messages
//!
//! One JSON object per WebSocket text frame. `type` is an open string set;
//! the constants in [`types`] name the ones this crate sends or handles.

use crate::error::{Result, TraceFlowError};
use crate::event::lenient_opt_string;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Known message types
pub mod types {
    pub const REGISTER: &str = "register";
    pub const RPC_REQUEST: &str = "rpc_request";
    pub const RPC_RESPONSE: &str = "rpc_response";
    pub const COMMAND: &str = "command";
    pub const REQUEST: &str = "request";
    pub const RESPONSE: &str = "response";
    pub const TRACE_UPDATE: &str = "trace_update";
    pub const AI_SERVER_STARTED: &str = "ai_server_started";
    pub const AI_SERVER_STOPPED: &str = "ai_server_stopped";
    /// Handler key matching every type
    pub const WILDCARD: &str = "*";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub from_project: Option<String>,
    #[serde(
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<String>,
}

impl HubMessage {
    pub fn new(message_type: &str) -> Self {
        Self {
            message_type: message_type.to_string(),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// RPC request addressed to another project
    pub fn rpc_request(target: &str, command: &str, args: Value, request_id: &str) -> Self {
        Self {
            message_type: types::RPC_REQUEST.to_string(),
            data: serde_json::json!({ "project_id": target }),
            command: Some(command.to_string()),
            args: Some(args),
            request_id: Some(request_id.to_string()),
            ..Self::default()
        }
    }

    /// Response echoing the request's id
    pub fn rpc_response(request_id: &str, result: Value) -> Self {
        Self {
            message_type: types::RPC_RESPONSE.to_string(),
            data: result,
            request_id: Some(request_id.to_string()),
            ..Self::default()
        }
    }

    pub fn register(payload: &RegisterPayload) -> Self {
        Self::new(types::REGISTER).with_data(serde_json::to_value(payload).unwrap_or(Value::Null))
    }

    /// Decode one frame. Only non-JSON or non-object text is rejected.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(TraceFlowError::Malformed(
                "hub message is not a JSON object".to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Fill the timestamp (epoch seconds) if the sender left it empty
    pub fn stamped(mut self) -> Self {
        if self.timestamp.is_none() {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            self.timestamp = Some(format!("{secs:.3}"));
        }
        self
    }

    pub fn is_type(&self, message_type: &str) -> bool {
        self.message_type == message_type
    }
}

/// Announcement sent right after the socket opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterPayload {
    /// Unique per process
    pub project_id: String,
    pub project_name: String,
    pub project_path: String,
    pub ide: String,
    pub capabilities: Vec<String>,
    pub pid: u32,
}

impl RegisterPayload {
    pub fn new(
        instance_id: &str,
        project_name: &str,
        project_path: &Path,
        ide: &str,
        capabilities: &[String],
    ) -> Self {
        Self {
            project_id: instance_id.to_string(),
            project_name: project_name.to_string(),
            project_path: project_path.display().to_string(),
            ide: ide.to_string(),
            capabilities: capabilities.to_vec(),
            pid: std::process::id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_rpc_request() {
        let msg = HubMessage::parse(
            r#"{"type":"rpc_request","request_id":"r1","command":"get_dead_code","args":{"limit":5},"from_project":"other"}"#,
        )
        .unwrap();
        assert!(msg.is_type(types::RPC_REQUEST));
        assert_eq!(msg.request_id.as_deref(), Some("r1"));
        assert_eq!(msg.command.as_deref(), Some("get_dead_code"));
        assert_eq!(msg.args, Some(json!({"limit": 5})));
        assert_eq!(msg.from_project.as_deref(), Some("other"));
    }

    #[test]
    fn test_parse_is_lenient() {
        let msg = HubMessage::parse(r#"{"type":"x","request_id":42,"timestamp":"2024-01-01T12:00:00","extra":true}"#).unwrap();
        assert_eq!(msg.request_id.as_deref(), Some("42"));
        assert_eq!(msg.timestamp.as_deref(), Some("2024-01-01T12:00:00"));
        assert!(msg.data.is_null());

        let empty = HubMessage::parse("{}").unwrap();
        assert_eq!(empty.message_type, "");
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(HubMessage::parse("not json").is_err());
        assert!(HubMessage::parse("[1,2]").is_err());
    }

    #[test]
    fn test_response_serialization_skips_empty_fields() {
        let msg = HubMessage::rpc_response("abc", json!({"total_calls": 1}));
        let value: Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(
            value,
            json!({"type": "rpc_response", "request_id": "abc", "data": {"total_calls": 1}})
        );
    }

    #[test]
    fn test_register_payload() {
        let payload = RegisterPayload::new(
            "id-1",
            "demo",
            Path::new("/work/demo"),
            "trueflow-cli",
            &["trace".to_string(), "dead_code".to_string()],
        );
        let msg = HubMessage::register(&payload);
        assert!(msg.is_type(types::REGISTER));
        assert_eq!(msg.data["project_id"], "id-1");
        assert_eq!(msg.data["project_path"], "/work/demo");
        assert_eq!(msg.data["capabilities"], json!(["trace", "dead_code"]));
    }

    #[test]
    fn test_stamped_keeps_existing_timestamp() {
        let mut msg = HubMessage::new("x");
        msg.timestamp = Some("t".to_string());
        assert_eq!(msg.stamped().timestamp.as_deref(), Some("t"));
        assert!(HubMessage::new("y").stamped().timestamp.is_some());
    }
}
