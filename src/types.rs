//! Shared data types: filesystem snapshots, transfer manifests and status records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Snapshot of a tree: relative path -> signed change time in milliseconds.
///
/// Positive values are the last metadata change of a present path; negative
/// values mark a deletion, the magnitude being the time of the delete. The
/// snapshot is rebuilt from scratch on every cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilesystemState {
	entries: BTreeMap<String, i64>,
}

impl FilesystemState {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record a present path
	pub fn insert_present(&mut self, path: String, ctime_ms: i64) {
		self.entries.insert(path, ctime_ms.abs().max(1));
	}

	/// Record a deleted path; replaces any positive entry
	pub fn insert_deleted(&mut self, path: String, deleted_at_ms: i64) {
		self.entries.insert(path, -(deleted_at_ms.abs().max(1)));
	}

	pub fn get(&self, path: &str) -> Option<i64> {
		self.entries.get(path).copied()
	}

	pub fn contains(&self, path: &str) -> bool {
		self.entries.contains_key(path)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Paths recorded as deleted, in sorted order
	pub fn deleted_paths(&self) -> Vec<String> {
		self.entries.iter().filter(|(_, t)| **t < 0).map(|(p, _)| p.clone()).collect()
	}
}

/// The three action sets returned by the project for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransferManifest {
	/// Paths to delete from the compute server's upper layer
	pub remove_from_compute: Vec<String>,

	/// Paths to push to the project
	pub copy_from_compute: Vec<String>,

	/// Project-relative path of a null-delimited list of files to pull
	pub copy_from_project_tar: Option<String>,
}

impl TransferManifest {
	pub fn is_empty(&self) -> bool {
		self.remove_from_compute.is_empty()
			&& self.copy_from_compute.is_empty()
			&& self.copy_from_project_tar.is_none()
	}
}

/// Status record persisted through the project API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailedState {
	pub state: String,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub extra: Option<String>,

	/// 0-100
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub progress: Option<u8>,

	/// Seconds until the UI should consider the status stale
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timeout: Option<u64>,
}

impl DetailedState {
	pub fn new(state: impl Into<String>) -> Self {
		DetailedState { state: state.into(), ..Default::default() }
	}

	pub fn with_progress(mut self, progress: u8) -> Self {
		self.progress = Some(progress.min(100));
		self
	}

	pub fn with_timeout(mut self, timeout: u64) -> Self {
		self.timeout = Some(timeout);
		self
	}

	pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
		self.extra = Some(extra.into());
		self
	}
}

/// Lifecycle state of a SyncFs instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
	Init,
	Ready,
	Sync,
	Closed,
}

impl fmt::Display for SyncState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SyncState::Init => "init",
			SyncState::Ready => "ready",
			SyncState::Sync => "sync",
			SyncState::Closed => "closed",
		};
		write!(f, "{}", name)
	}
}

/// Phases of a single sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
	Scanning,
	Exchanging,
	Removing,
	Pulling,
	Pushing { files: usize },
	ReadTracking,
}

impl SyncPhase {
	/// Status record announcing this phase
	pub fn status(&self) -> DetailedState {
		match self {
			SyncPhase::Scanning => {
				DetailedState::new("get-compute-state").with_progress(0).with_timeout(10)
			}
			SyncPhase::Exchanging => {
				DetailedState::new("send-state-to-project").with_progress(20).with_timeout(10)
			}
			SyncPhase::Removing => {
				DetailedState::new("remove-files").with_progress(30).with_timeout(60)
			}
			SyncPhase::Pulling => {
				DetailedState::new("receive-files-from-project").with_progress(50).with_timeout(60)
			}
			SyncPhase::Pushing { files } => {
				DetailedState::new(format!("send-{}-files-to-project", files))
					.with_progress(70)
					.with_timeout(60)
			}
			SyncPhase::ReadTracking => {
				DetailedState::new("update-read-tracking").with_progress(90).with_timeout(30)
			}
		}
	}
}

/// What a completed cycle actually did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
	/// Stale upper-layer copies of whiteout-deleted paths that were removed
	pub whiteouts_applied: usize,
	/// Paths the project asked to remove, whether or not they still existed
	pub removed: usize,
	pub pushed: usize,
	pub pulled: bool,
}

impl CycleSummary {
	/// Whether the project asked for any deletion or transfer
	pub fn did_work(&self) -> bool {
		self.removed > 0 || self.pushed > 0 || self.pulled
	}
}


// vim: ts=4
