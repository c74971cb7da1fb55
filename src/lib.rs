//! # SyncFS - Overlay Filesystem Sync for Compute Servers
//!
//! A compute server works on a unionfs-fuse overlay: the project's files form
//! the read-only lower layer and local changes land in a writable upper layer.
//! SyncFS keeps both sides converged. Each cycle it scans the upper layer
//! (whiteouts included), hands the snapshot to the project, and carries out
//! the removals, pulls and pushes the project answers with.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use syncfs::{Collaborators, Options, ProcessRunner, ProcessTar, SyncFs};
//!
//! let options = Options::load("syncfs.toml".as_ref())?;
//! let sync = SyncFs::new(
//!     options.clone(),
//!     Collaborators {
//!         api: my_project_api,
//!         tar: Arc::new(ProcessTar::new(&options.upper, "/home/project")),
//!         channel: my_control_channel,
//!         runner: Box::new(ProcessRunner),
//!     },
//! )?;
//! sync.init().await?;
//! // ...
//! sync.close().await;
//! ```

pub mod api;
pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod mount;
pub mod reconcile;
pub mod reporter;
pub mod scanner;
pub mod scheduler;
pub mod syncfs;
pub mod transfer;
pub mod types;
pub mod utils;

// Re-export commonly used types and functions
pub use api::{ProjectApi, SyncFsRequest};
pub use config::{Compression, ExcludeSet, Options};
pub use control::{ControlAck, ControlChannel, ControlMessage};
pub use error::{ApiError, MountError, SyncFsError, TransferError};
pub use mount::{CommandRunner, ProcessRunner};
pub use syncfs::{Collaborators, SyncFs};
pub use transfer::{ProcessTar, TarArgs, TarStream};
pub use types::{CycleSummary, DetailedState, FilesystemState, SyncState, TransferManifest};

// vim: ts=4
