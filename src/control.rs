//! Control-message channel between the project and this compute server
//!
//! Inbound frames are JSON objects tagged by `event`. Copy requests carry an
//! optional `id` that the reply echoes back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ApiError;

/// Inbound control messages this crate acts on
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControlMessage {
	/// Run a full sync cycle now
	ComputeServerSyncRequest,

	/// Pull explicit paths from the project, bypassing reconciliation
	CopyFromProjectToComputeServer {
		paths: Vec<String>,
		#[serde(default)]
		id: Option<String>,
	},

	/// Push explicit paths to the project, bypassing reconciliation
	CopyFromComputeServerToProject {
		paths: Vec<String>,
		#[serde(default)]
		id: Option<String>,
	},
}

impl ControlMessage {
	/// Parse a raw frame; returns None for frames addressed to someone else
	pub fn parse(raw: &str) -> Result<Option<Self>, ApiError> {
		let value: serde_json::Value =
			json5::from_str(raw).map_err(|e| ApiError::Decode { message: e.to_string() })?;
		let event = match value.get("event").and_then(|e| e.as_str()) {
			Some(event) => event,
			None => return Ok(None),
		};
		if !KNOWN_EVENTS.contains(&event) {
			return Ok(None);
		}
		serde_json::from_value(value).map(Some).map_err(ApiError::from)
	}
}

const KNOWN_EVENTS: [&str; 3] = [
	"compute_server_sync_request",
	"copy_from_project_to_compute_server",
	"copy_from_compute_server_to_project",
];

/// Correlated reply to a copy request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ControlAck {
	Success { id: String },
	Error { id: String, error: String },
}

/// Bidirectional message channel to the project
#[async_trait]
pub trait ControlChannel: Send + Sync {
	/// Start receiving raw inbound frames
	fn subscribe(&self) -> mpsc::UnboundedReceiver<String>;

	/// Send a reply frame
	async fn send(&self, ack: ControlAck) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_sync_request() {
		let msg = ControlMessage::parse(r#"{"event": "compute_server_sync_request"}"#).unwrap();
		assert_eq!(msg, Some(ControlMessage::ComputeServerSyncRequest));
	}

	#[test]
	fn test_parse_copy_request_with_id() {
		let msg = ControlMessage::parse(
			r#"{event: "copy_from_project_to_compute_server", paths: ["a", "b/c"], id: "17"}"#,
		)
		.unwrap();
		assert_eq!(
			msg,
			Some(ControlMessage::CopyFromProjectToComputeServer {
				paths: vec!["a".to_string(), "b/c".to_string()],
				id: Some("17".to_string()),
			})
		);
	}

	#[test]
	fn test_parse_ignores_other_events() {
		assert_eq!(ControlMessage::parse(r#"{"event": "ping"}"#).unwrap(), None);
		assert_eq!(ControlMessage::parse(r#"{"foo": 1}"#).unwrap(), None);
	}

	#[test]
	fn test_parse_rejects_garbage() {
		assert!(ControlMessage::parse("not json").is_err());
		assert!(ControlMessage::parse(r#"{"event": "copy_from_compute_server_to_project"}"#)
			.is_err());
	}

	#[test]
	fn test_ack_shape() {
		let ok = serde_json::to_value(ControlAck::Success { id: "1".to_string() }).unwrap();
		assert_eq!(ok, serde_json::json!({"event": "success", "id": "1"}));
		let err = serde_json::to_value(ControlAck::Error {
			id: "2".to_string(),
			error: "nope".to_string(),
		})
		.unwrap();
		assert_eq!(err, serde_json::json!({"event": "error", "id": "2", "error": "nope"}));
	}
}

// vim: ts=4
