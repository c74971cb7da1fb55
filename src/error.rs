//! Error types for SyncFS operations

use std::error::Error;
use std::fmt;
use std::io;

use crate::types::SyncState;

/// Main error type for sync operations
#[derive(Debug)]
pub enum SyncFsError {
	/// Overlay or bind mount failed
	Mount(MountError),

	/// Project API call failed
	Api(ApiError),

	/// Archive transfer failed
	Transfer(TransferError),

	/// I/O error
	Io(io::Error),

	/// Invalid configuration
	InvalidConfig { message: String },

	/// A cycle is already running
	AlreadySyncing,

	/// Sync requested outside the ready state
	NotReady { state: SyncState },

	/// The exclude list turns syncing off for this instance
	SyncDisabled,

	/// A cycle failed; message is already truncated for status reporting
	CycleFailed { message: String },

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for SyncFsError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncFsError::Mount(e) => write!(f, "Mount error: {}", e),
			SyncFsError::Api(e) => write!(f, "API error: {}", e),
			SyncFsError::Transfer(e) => write!(f, "Transfer error: {}", e),
			SyncFsError::Io(e) => write!(f, "I/O error: {}", e),
			SyncFsError::InvalidConfig { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
			SyncFsError::AlreadySyncing => write!(f, "sync currently in progress"),
			SyncFsError::NotReady { state } => {
				write!(f, "can only sync when state is ready but state is \"{}\"", state)
			}
			SyncFsError::SyncDisabled => write!(f, "sync is disabled by the exclude list"),
			SyncFsError::CycleFailed { message } => write!(f, "{}", message),
			SyncFsError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncFsError {}

impl From<io::Error> for SyncFsError {
	fn from(e: io::Error) -> Self {
		SyncFsError::Io(e)
	}
}

impl From<MountError> for SyncFsError {
	fn from(e: MountError) -> Self {
		SyncFsError::Mount(e)
	}
}

impl From<ApiError> for SyncFsError {
	fn from(e: ApiError) -> Self {
		SyncFsError::Api(e)
	}
}

impl From<TransferError> for SyncFsError {
	fn from(e: TransferError) -> Self {
		SyncFsError::Transfer(e)
	}
}

impl From<serde_json::Error> for SyncFsError {
	fn from(e: serde_json::Error) -> Self {
		SyncFsError::Other { message: format!("JSON error: {}", e) }
	}
}

/// Errors raised while running mount tooling
#[derive(Debug)]
pub enum MountError {
	/// The mount tool could not be started
	Spawn { cmd: String, source: io::Error },

	/// The mount tool exited unsuccessfully
	CommandFailed { cmd: String, status: Option<i32>, stderr: String },

	/// Preparing a directory failed
	Io(io::Error),
}

impl fmt::Display for MountError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MountError::Spawn { cmd, source } => write!(f, "Failed to spawn '{}': {}", cmd, source),
			MountError::CommandFailed { cmd, status, stderr } => match status {
				Some(code) => write!(f, "'{}' exited with status {}: {}", cmd, code, stderr.trim()),
				None => write!(f, "'{}' terminated by signal: {}", cmd, stderr.trim()),
			},
			MountError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for MountError {}

impl From<io::Error> for MountError {
	fn from(e: io::Error) -> Self {
		MountError::Io(e)
	}
}

/// Errors returned by the project API collaborator
#[derive(Debug)]
pub enum ApiError {
	/// Remote call returned an error
	Call { method: String, message: String },

	/// Response could not be decoded
	Decode { message: String },

	/// Transport to the project is down
	Disconnected,
}

impl fmt::Display for ApiError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ApiError::Call { method, message } => write!(f, "{} failed: {}", method, message),
			ApiError::Decode { message } => write!(f, "Failed to decode response: {}", message),
			ApiError::Disconnected => write!(f, "Project connection is down"),
		}
	}
}

impl Error for ApiError {}

impl From<serde_json::Error> for ApiError {
	fn from(e: serde_json::Error) -> Self {
		ApiError::Decode { message: e.to_string() }
	}
}

/// Errors from the archive stream and the transfer engine
#[derive(Debug)]
pub enum TransferError {
	/// tar could not be started
	Spawn { cmd: String, source: io::Error },

	/// One side of the tar pipeline failed
	TarFailed { side: &'static str, status: Option<i32>, stderr: String },

	/// Path rejected before touching the filesystem
	InvalidPath { path: String },

	/// I/O error (manifest files, local removal)
	Io(io::Error),
}

impl fmt::Display for TransferError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransferError::Spawn { cmd, source } => {
				write!(f, "Failed to spawn '{}': {}", cmd, source)
			}
			TransferError::TarFailed { side, status, stderr } => match status {
				Some(code) => write!(f, "tar {} exited with status {}: {}", side, code, stderr.trim()),
				None => write!(f, "tar {} terminated by signal: {}", side, stderr.trim()),
			},
			TransferError::InvalidPath { path } => write!(f, "Invalid path: {}", path),
			TransferError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for TransferError {}

impl From<io::Error> for TransferError {
	fn from(e: io::Error) -> Self {
		TransferError::Io(e)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_already_syncing_message() {
		assert_eq!(SyncFsError::AlreadySyncing.to_string(), "sync currently in progress");
	}

	#[test]
	fn test_not_ready_names_state() {
		let err = SyncFsError::NotReady { state: SyncState::Closed };
		assert!(err.to_string().contains("\"closed\""));
	}

	#[test]
	fn test_tar_failed_display() {
		let err = TransferError::TarFailed {
			side: "extract",
			status: Some(2),
			stderr: "tar: foo: Cannot open\n".to_string(),
		};
		assert_eq!(err.to_string(), "tar extract exited with status 2: tar: foo: Cannot open");
	}

	#[test]
	fn test_nested_conversion() {
		let err: SyncFsError = ApiError::Disconnected.into();
		assert!(matches!(err, SyncFsError::Api(ApiError::Disconnected)));
	}
}

// vim: ts=4
