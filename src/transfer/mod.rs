//! Bulk file transfer between the compute server and the project
//!
//! Bytes move as tar streams. Every transfer names its files explicitly in a
//! null-delimited list (`--files-from ... --null --verbatim-files-from`), so
//! there is no globbing, and cycle transfers use `--no-recursion` because the
//! lists already contain every child of a listed directory. Extraction uses
//! `--delay-directory-restore` so directory mtimes survive child extraction.

pub mod codec;
pub mod process;

pub use codec::{wrap, Lz4Tar};
pub use process::ProcessTar;

use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{Options, WHITEOUT_DIR};
use crate::error::{SyncFsError, TransferError};
use crate::logging::*;

/// Arguments for the two ends of a tar pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TarArgs {
	/// Arguments of the archiving side (`tar -c ...`)
	pub create_args: Vec<String>,

	/// Arguments of the extracting side (`tar -x ...`)
	pub extract_args: Vec<String>,
}

impl TarArgs {
	pub fn new<C, E>(create: C, extract: E) -> Self
	where
		C: IntoIterator,
		C::Item: Into<String>,
		E: IntoIterator,
		E::Item: Into<String>,
	{
		TarArgs {
			create_args: create.into_iter().map(Into::into).collect(),
			extract_args: extract.into_iter().map(Into::into).collect(),
		}
	}
}

/// Archive stream between the two sides.
///
/// `send` archives on the compute server and extracts in the project;
/// `get` archives in the project and extracts on the compute server.
#[async_trait]
pub trait TarStream: Send + Sync {
	async fn send(&self, args: TarArgs) -> Result<(), TransferError>;
	async fn get(&self, args: TarArgs) -> Result<(), TransferError>;
}

const PUSH_MANIFEST: &str = "copy-to-project";
const READ_TRACKING: &str = "read-tracking";

/// Executes removals, pushes and pulls for one compute server
pub struct TransferEngine {
	tar: Arc<dyn TarStream>,
	upper: PathBuf,
	scratch_dir: PathBuf,
	scratch_rel: String,
	read_tracking_file: Option<PathBuf>,
}

impl TransferEngine {
	/// Wraps `tar` with the configured codec
	pub fn new(options: &Options, tar: Arc<dyn TarStream>) -> Result<Self, SyncFsError> {
		Ok(TransferEngine {
			tar: wrap(tar, options.codec()?),
			upper: options.upper.clone(),
			scratch_dir: options.scratch_dir(),
			scratch_rel: options.scratch_rel(),
			read_tracking_file: options.read_tracking_file.clone(),
		})
	}

	/// Delete paths from the upper layer. Returns how many existed.
	pub async fn remove_local(&self, paths: &[String]) -> Result<usize, TransferError> {
		let mut removed = 0;
		for path in paths {
			let rel = safe_relative(path)?;
			let target = self.upper.join(rel);
			let meta = match tokio::fs::symlink_metadata(&target).await {
				Ok(m) => m,
				Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
				Err(e) => return Err(e.into()),
			};
			let result = if meta.is_dir() {
				tokio::fs::remove_dir_all(&target).await
			} else {
				tokio::fs::remove_file(&target).await
			};
			match result {
				Ok(()) => removed += 1,
				Err(e) if e.kind() == io::ErrorKind::NotFound => {}
				Err(e) => return Err(e.into()),
			}
		}
		debug!("Removed {} of {} paths from {}", removed, paths.len(), self.upper.display());
		Ok(removed)
	}

	/// Push files listed by the project to the project
	pub async fn push(&self, paths: &[String]) -> Result<(), TransferError> {
		let manifest = self.scratch_dir.join(PUSH_MANIFEST);
		write_manifest(&manifest, paths).await?;
		info!("Sending {} files to project", paths.len());
		let args = TarArgs::new(
			listed_create_args(&manifest.display().to_string(), false),
			["--delay-directory-restore", "-x"],
		);
		self.tar.send(args).await
	}

	/// Pull files named in a manifest the project already wrote
	pub async fn pull(&self, manifest_rel: &str) -> Result<(), TransferError> {
		info!("Receiving files listed in {}", manifest_rel);
		let args = TarArgs::new(
			listed_create_args(manifest_rel, false),
			["--delay-directory-restore", "-x"],
		);
		self.tar.get(args).await
	}

	/// Ship the read-tracking list to the project and fetch those files.
	///
	/// Only an optimization: every failure is logged and swallowed.
	pub async fn update_read_tracking(&self) {
		let source = match &self.read_tracking_file {
			Some(f) => f.clone(),
			None => return,
		};
		match self.relocate_read_tracking(&source).await {
			Ok(true) => {}
			Ok(false) => {
				debug!("No read tracking file at {}", source.display());
				return;
			}
			Err(e) => {
				warn!("Failed to move read tracking file {}: {}", source.display(), e);
				return;
			}
		}

		let list = format!("{}/{}", self.scratch_rel, READ_TRACKING);
		let args = TarArgs::new(listed_create_args(&list, false), ["--keep-newer-files", "-x"]);
		if let Err(e) = self.tar.get(args).await {
			warn!("Read tracking transfer failed: {}", e);
		}
	}

	/// Atomically take the current list, then move it into the scratch area
	async fn relocate_read_tracking(&self, source: &Path) -> io::Result<bool> {
		let name = source.file_name().and_then(|n| n.to_str()).unwrap_or("read-tracking");
		let tmp = source.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()));
		match tokio::fs::rename(source, &tmp).await {
			Ok(()) => {}
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
			Err(e) => return Err(e),
		}
		tokio::fs::create_dir_all(&self.scratch_dir).await?;
		let copied = tokio::fs::copy(&tmp, self.scratch_dir.join(READ_TRACKING)).await;
		let cleanup = tokio::fs::remove_file(&tmp).await;
		copied?;
		cleanup?;
		Ok(true)
	}

	/// One-off push of explicit paths, directories included recursively
	pub async fn copy_to_project(&self, paths: &[String]) -> Result<(), TransferError> {
		for path in paths {
			safe_relative(path)?;
		}
		let manifest = self.scratch_dir.join(format!("{}.{}", PUSH_MANIFEST, Uuid::new_v4()));
		write_manifest(&manifest, paths).await?;
		let args = TarArgs::new(
			listed_create_args(&manifest.display().to_string(), true),
			["--delay-directory-restore", "-x"],
		);
		let result = self.tar.send(args).await;
		discard(&manifest).await;
		result
	}

	/// One-off pull of explicit paths, directories included recursively
	pub async fn copy_from_project(&self, paths: &[String]) -> Result<(), TransferError> {
		for path in paths {
			safe_relative(path)?;
		}
		let name = format!("copy-from-project.{}", Uuid::new_v4());
		let manifest = self.scratch_dir.join(&name);
		write_manifest(&manifest, paths).await?;
		let args = TarArgs::new(
			listed_create_args(&format!("{}/{}", self.scratch_rel, name), true),
			["--delay-directory-restore", "-x"],
		);
		let result = self.tar.get(args).await;
		discard(&manifest).await;
		result
	}
}

/// `tar -c` arguments reading names from a null-delimited list
fn listed_create_args(list: &str, recursive: bool) -> Vec<String> {
	let mut args = vec!["-c".to_string(), "--null".to_string()];
	if !recursive {
		args.push("--no-recursion".to_string());
	}
	args.push("--verbatim-files-from".to_string());
	args.push("--files-from".to_string());
	args.push(list.to_string());
	args
}

async fn write_manifest(path: &Path, paths: &[String]) -> Result<(), TransferError> {
	if let Some(parent) = path.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}
	let mut buf = Vec::with_capacity(paths.iter().map(|p| p.len() + 1).sum());
	for p in paths {
		buf.extend_from_slice(p.as_bytes());
		buf.push(0);
	}
	tokio::fs::write(path, buf).await?;
	Ok(())
}

async fn discard(path: &Path) {
	if let Err(e) = tokio::fs::remove_file(path).await {
		debug!("Could not remove {}: {}", path.display(), e);
	}
}

/// Reject paths that would escape the tree or touch overlay bookkeeping
pub fn safe_relative(path: &str) -> Result<&Path, TransferError> {
	let invalid = || TransferError::InvalidPath { path: path.to_string() };
	let p = Path::new(path);
	if path.is_empty() || p.is_absolute() {
		return Err(invalid());
	}
	let mut first = true;
	for component in p.components() {
		match component {
			Component::Normal(name) => {
				if first && name == WHITEOUT_DIR {
					return Err(invalid());
				}
				first = false;
			}
			Component::CurDir => {}
			_ => return Err(invalid()),
		}
	}
	if first {
		return Err(invalid());
	}
	Ok(p)
}


// vim: ts=4
