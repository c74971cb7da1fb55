//! State reconciliation with the project
//!
//! Each cycle the upper layer is scanned, the snapshot is written into the
//! scratch area where the project can read it, and the project answers with
//! the three action lists. The project is authoritative for conflicts: this
//! side never compares timestamps itself.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use lz4_flex::frame::{FrameDecoder, FrameEncoder};

use crate::api::{ProjectApi, SyncFsRequest};
use crate::config::{Compression, ExcludeSet, Options};
use crate::error::SyncFsError;
use crate::logging::*;
use crate::scanner;
use crate::types::{FilesystemState, TransferManifest};

pub struct Reconciler {
	api: Arc<dyn ProjectApi>,
	upper: PathBuf,
	lower: PathBuf,
	exclude: ExcludeSet,
	scratch_dir: PathBuf,
	scratch_rel: String,
	compression: Compression,
	compute_server_id: u64,
}

impl Reconciler {
	pub fn new(options: &Options, api: Arc<dyn ProjectApi>) -> Result<Self, SyncFsError> {
		Ok(Reconciler {
			api,
			upper: options.upper.clone(),
			lower: options.lower.clone(),
			exclude: options.exclude_set(),
			scratch_dir: options.scratch_dir(),
			scratch_rel: options.scratch_rel(),
			compression: options.codec()?,
			compute_server_id: options.compute_server_id,
		})
	}

	/// Scan the upper layer off the async executor
	pub async fn scan(&self) -> Result<FilesystemState, SyncFsError> {
		let upper = self.upper.clone();
		let lower = self.lower.clone();
		let exclude = self.exclude.clone();
		let state = tokio::task::spawn_blocking(move || {
			scanner::compute_state(&upper, &lower, &exclude)
		})
		.await
		.map_err(|e| SyncFsError::Other { message: format!("scan task failed: {}", e) })??;
		Ok(state)
	}

	/// Persist the snapshot to the scratch area; returns its project-relative path
	pub async fn write_state(&self, state: &FilesystemState) -> Result<String, SyncFsError> {
		let name = self.compression.state_file_name();
		let bytes = encode_state(state, self.compression)?;
		tokio::fs::create_dir_all(&self.scratch_dir).await?;
		tokio::fs::write(self.scratch_dir.join(name), &bytes).await?;
		debug!("Wrote {} ({} bytes, {} entries)", name, bytes.len(), state.len());
		Ok(format!("{}/{}", self.scratch_rel, name))
	}

	/// Hand the snapshot to the project and get back what to move
	pub async fn exchange(&self, state: &FilesystemState) -> Result<TransferManifest, SyncFsError> {
		let compute_state_json = self.write_state(state).await?;
		let request = SyncFsRequest {
			compute_state_json,
			exclude: self.exclude.entries().to_vec(),
			compute_server_id: self.compute_server_id,
			now: now_ms(),
		};
		let manifest = self.api.sync_fs(request).await?;
		info!(
			"Project requested {} removals, {} pushes, pull: {}",
			manifest.remove_from_compute.len(),
			manifest.copy_from_compute.len(),
			manifest.copy_from_project_tar.is_some()
		);
		Ok(manifest)
	}

	/// Non-directory paths the scan marked deleted that linger in the upper layer
	pub fn stale_upper_copies(&self, state: &FilesystemState) -> Vec<String> {
		state
			.deleted_paths()
			.into_iter()
			.filter(|p| {
				self.upper.join(p).symlink_metadata().map(|m| !m.is_dir()).unwrap_or(false)
			})
			.collect()
	}
}

/// Wall clock in milliseconds
pub fn now_ms() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Serialize a snapshot as JSON, framed with lz4 when enabled
pub fn encode_state(
	state: &FilesystemState,
	compression: Compression,
) -> Result<Vec<u8>, SyncFsError> {
	match compression {
		Compression::None => Ok(serde_json::to_vec(state)?),
		Compression::Lz4 => {
			let mut encoder = FrameEncoder::new(Vec::new());
			serde_json::to_writer(&mut encoder, state)?;
			encoder.flush()?;
			encoder.finish().map_err(|e| SyncFsError::Other {
				message: format!("lz4 encode failed: {}", e),
			})
		}
	}
}

pub fn decode_state(bytes: &[u8], compression: Compression) -> Result<FilesystemState, SyncFsError> {
	match compression {
		Compression::None => Ok(serde_json::from_slice(bytes)?),
		Compression::Lz4 => {
			let mut json = Vec::new();
			FrameDecoder::new(bytes).read_to_end(&mut json)?;
			Ok(serde_json::from_slice(&json)?)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::ApiError;
	use async_trait::async_trait;
	use std::sync::Mutex;
	use tempfile::TempDir;

	#[derive(Default)]
	struct Project {
		requests: Mutex<Vec<SyncFsRequest>>,
	}

	#[async_trait]
	impl ProjectApi for Project {
		async fn sync_fs(&self, request: SyncFsRequest) -> Result<TransferManifest, ApiError> {
			self.requests.lock().unwrap().push(request);
			Ok(TransferManifest {
				copy_from_compute: vec!["a".to_string()],
				..Default::default()
			})
		}

		async fn compute_server_sync_register(&self, _id: u64) -> Result<(), ApiError> {
			Ok(())
		}

		async fn call(
			&self,
			_method: &str,
			_args: serde_json::Value,
		) -> Result<serde_json::Value, ApiError> {
			Ok(serde_json::Value::Null)
		}
	}

	fn options(root: &TempDir, compression: Option<&str>) -> Options {
		let mut opts = Options::new(
			root.path().join("lower"),
			root.path().join("upper"),
			root.path().join("mnt"),
			uuid::Uuid::nil(),
			3,
		);
		opts.compression = compression.map(|c| c.to_string());
		opts.exclude = vec!["cache".to_string()];
		std::fs::create_dir_all(&opts.upper).unwrap();
		opts
	}

	#[tokio::test]
	async fn test_exchange_writes_lz4_state_and_calls_project() {
		let root = TempDir::new().unwrap();
		let opts = options(&root, Some("lz4"));
		std::fs::write(opts.upper.join("a"), b"x").unwrap();
		let project = Arc::new(Project::default());
		let reconciler = Reconciler::new(&opts, project.clone()).unwrap();

		let state = reconciler.scan().await.unwrap();
		let manifest = reconciler.exchange(&state).await.unwrap();
		assert_eq!(manifest.copy_from_compute, vec!["a".to_string()]);

		let requests = project.requests.lock().unwrap();
		assert_eq!(requests[0].compute_state_json, ".compute-servers/3/compute-state.json.lz4");
		assert_eq!(requests[0].exclude, vec!["cache".to_string()]);
		assert_eq!(requests[0].compute_server_id, 3);
		assert!(requests[0].now > 0);

		let written =
			std::fs::read(opts.scratch_dir().join("compute-state.json.lz4")).unwrap();
		let decoded = decode_state(&written, Compression::Lz4).unwrap();
		assert_eq!(decoded, state);
		assert!(decoded.get("a").unwrap() > 0);
	}

	#[tokio::test]
	async fn test_uncompressed_state_is_plain_json() {
		let root = TempDir::new().unwrap();
		let opts = options(&root, Some("none"));
		let reconciler = Reconciler::new(&opts, Arc::new(Project::default())).unwrap();
		let rel = reconciler.write_state(&FilesystemState::new()).await.unwrap();
		assert_eq!(rel, ".compute-servers/3/compute-state.json");
		let written = std::fs::read_to_string(opts.scratch_dir().join("compute-state.json")).unwrap();
		assert_eq!(written, "{}");
	}

	#[tokio::test]
	async fn test_scan_fails_without_upper() {
		let root = TempDir::new().unwrap();
		let mut opts = options(&root, None);
		opts.upper = root.path().join("missing");
		let reconciler = Reconciler::new(&opts, Arc::new(Project::default())).unwrap();
		assert!(reconciler.scan().await.is_err());
	}

	#[test]
	fn test_stale_upper_copies() {
		let root = TempDir::new().unwrap();
		let opts = options(&root, None);
		std::fs::write(opts.upper.join("lingering"), b"").unwrap();
		std::fs::create_dir(opts.upper.join("recreated")).unwrap();
		let reconciler = Reconciler::new(&opts, Arc::new(Project::default())).unwrap();

		let mut state = FilesystemState::new();
		state.insert_deleted("lingering".to_string(), 10);
		state.insert_deleted("gone".to_string(), 10);
		state.insert_deleted("recreated".to_string(), 10);
		assert_eq!(reconciler.stale_upper_copies(&state), vec!["lingering".to_string()]);
	}
}

// vim: ts=4
