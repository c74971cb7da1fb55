//! Tar pipeline between two local directories
//!
//! Used when the project tree is reachable as a plain directory (a shared
//! mount, or tests). `tar -c` runs in one root and its output is piped into
//! `tar -x` running in the other.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::{TarArgs, TarStream};
use crate::error::TransferError;
use crate::logging::*;

pub struct ProcessTar {
	compute_root: PathBuf,
	project_root: PathBuf,
	program: String,
}

impl ProcessTar {
	/// `compute_root` is normally the upper layer, `project_root` the project home
	pub fn new(compute_root: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
		ProcessTar {
			compute_root: compute_root.into(),
			project_root: project_root.into(),
			program: "tar".to_string(),
		}
	}

	/// Use a different tar binary (e.g. `gtar`)
	pub fn with_program(mut self, program: impl Into<String>) -> Self {
		self.program = program.into();
		self
	}

	async fn pipe(&self, from: &Path, to: &Path, args: TarArgs) -> Result<(), TransferError> {
		tokio::fs::create_dir_all(to).await?;
		debug!(
			"{} {} ({}) | {} {} ({})",
			self.program,
			args.create_args.join(" "),
			from.display(),
			self.program,
			args.extract_args.join(" "),
			to.display()
		);

		let spawn_err = |args: &[String]| {
			let cmd = format!("{} {}", self.program, args.join(" "));
			move |source: std::io::Error| TransferError::Spawn { cmd, source }
		};

		let mut create = Command::new(&self.program)
			.args(&args.create_args)
			.current_dir(from)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
			.map_err(spawn_err(args.create_args.as_slice()))?;
		let mut extract = Command::new(&self.program)
			.args(&args.extract_args)
			.current_dir(to)
			.stdin(Stdio::piped())
			.stdout(Stdio::null())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
			.map_err(spawn_err(args.extract_args.as_slice()))?;

		let (mut reader, mut writer) = match (create.stdout.take(), extract.stdin.take()) {
			(Some(r), Some(w)) => (r, w),
			_ => {
				return Err(TransferError::Io(std::io::Error::new(
					std::io::ErrorKind::BrokenPipe,
					"tar pipes unavailable",
				)))
			}
		};
		let copy = async move {
			let copied = tokio::io::copy(&mut reader, &mut writer).await;
			// closing stdin lets the extractor finish
			drop(writer);
			copied
		};

		let (copied, created, extracted) =
			tokio::join!(copy, create.wait_with_output(), extract.wait_with_output());
		let created = created?;
		let extracted = extracted?;

		if !created.status.success() {
			return Err(TransferError::TarFailed {
				side: "create",
				status: created.status.code(),
				stderr: String::from_utf8_lossy(&created.stderr).into_owned(),
			});
		}
		if !extracted.status.success() {
			return Err(TransferError::TarFailed {
				side: "extract",
				status: extracted.status.code(),
				stderr: String::from_utf8_lossy(&extracted.stderr).into_owned(),
			});
		}
		let bytes = copied?;
		debug!("tar pipeline moved {} bytes", bytes);
		Ok(())
	}
}

#[async_trait]
impl TarStream for ProcessTar {
	async fn send(&self, args: TarArgs) -> Result<(), TransferError> {
		self.pipe(&self.compute_root, &self.project_root, args).await
	}

	async fn get(&self, args: TarArgs) -> Result<(), TransferError> {
		self.pipe(&self.project_root, &self.compute_root, args).await
	}
}

// vim: ts=4
