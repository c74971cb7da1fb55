//! Project API collaborator
//!
//! The project side owns the authoritative reconciliation; this crate only
//! describes the calls it makes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::types::TransferManifest;

/// Method used to persist the detailed sync status
pub const SET_DETAILED_STATE: &str = "v2/compute/set-detailed-state";

/// Method used to read the detailed sync status back
pub const GET_DETAILED_STATE: &str = "v2/compute/get-detailed-state";

/// Arguments of the project-side `syncFS` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFsRequest {
	/// Project-relative path of the serialized compute state
	pub compute_state_json: String,

	pub exclude: Vec<String>,

	#[serde(rename = "compute_server_id")]
	pub compute_server_id: u64,

	/// Compute server wall clock in milliseconds, for skew correction
	pub now: i64,
}

/// Calls the compute server makes against its project
#[async_trait]
pub trait ProjectApi: Send + Sync {
	/// Reconcile the compute state against the project's and return what to move
	async fn sync_fs(&self, request: SyncFsRequest) -> Result<TransferManifest, ApiError>;

	/// Ask the project to route sync-request control messages here
	async fn compute_server_sync_register(&self, compute_server_id: u64) -> Result<(), ApiError>;

	/// Generic RPC entry point
	async fn call(
		&self,
		method: &str,
		args: serde_json::Value,
	) -> Result<serde_json::Value, ApiError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_request_field_names() {
		let req = SyncFsRequest {
			compute_state_json: ".compute-servers/4/compute-state.json.lz4".to_string(),
			exclude: vec!["scratch".to_string()],
			compute_server_id: 4,
			now: 1000,
		};
		let json = serde_json::to_value(&req).unwrap();
		assert_eq!(json["computeStateJson"], ".compute-servers/4/compute-state.json.lz4");
		assert_eq!(json["compute_server_id"], 4);
		assert_eq!(json["now"], 1000);
	}
}

// vim: ts=4
