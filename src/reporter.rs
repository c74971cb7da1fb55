//! Detailed sync status publication
//!
//! Status updates go to the project's status store under a fixed name. They
//! are throttled and best effort: a failed update is logged and dropped.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{ProjectApi, GET_DETAILED_STATE, SET_DETAILED_STATE};
use crate::logging::*;
use crate::types::DetailedState;
use crate::utils::Throttle;

/// Name the status is stored under
pub const STATUS_NAME: &str = "filesystem-sync";

/// Updates closer together than this are coalesced
pub const REPORT_WINDOW: Duration = Duration::from_millis(1500);

pub struct StateReporter {
	api: Arc<dyn ProjectApi>,
	compute_server_id: u64,
	throttle: Throttle<DetailedState>,
}

impl StateReporter {
	pub fn new(api: Arc<dyn ProjectApi>, compute_server_id: u64) -> Self {
		let sink_api = Arc::clone(&api);
		let throttle = Throttle::new(REPORT_WINDOW, move |status: DetailedState| {
			let api = Arc::clone(&sink_api);
			async move {
				publish(api.as_ref(), compute_server_id, status).await;
			}
		});
		StateReporter { api, compute_server_id, throttle }
	}

	/// Queue a status update
	pub fn report(&self, status: DetailedState) {
		debug!("status: {} {:?}", status.state, status.progress);
		self.throttle.call(status);
	}

	/// Last published status, or None if unknown or unreadable
	pub async fn get(&self) -> Option<DetailedState> {
		let args = json!({ "id": self.compute_server_id, "name": STATUS_NAME });
		match self.api.call(GET_DETAILED_STATE, args).await {
			Ok(serde_json::Value::Null) => None,
			Ok(value) => match serde_json::from_value::<DetailedState>(value) {
				Ok(status) => Some(status),
				Err(e) => {
					warn!("Unreadable detailed state: {}", e);
					None
				}
			},
			Err(e) => {
				warn!("Failed to get detailed state: {}", e);
				None
			}
		}
	}
}

async fn publish(api: &dyn ProjectApi, compute_server_id: u64, status: DetailedState) {
	let mut args = match serde_json::to_value(&status) {
		Ok(v) => v,
		Err(e) => {
			warn!("Cannot encode detailed state: {}", e);
			return;
		}
	};
	if let Some(obj) = args.as_object_mut() {
		obj.insert("id".to_string(), json!(compute_server_id));
		obj.insert("name".to_string(), json!(STATUS_NAME));
	}
	if let Err(e) = api.call(SET_DETAILED_STATE, args).await {
		warn!("Failed to report sync state '{}': {}", status.state, e);
	}
}


// vim: ts=4
