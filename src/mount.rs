//! Overlay mount management
//!
//! The merged view is a unionfs-fuse mount of the upper layer (read-write)
//! over the lower layer (read-only). Excluded top-level directories bypass the
//! overlay: each gets a backing directory under `data` that is bind-mounted
//! over both the merged view and the upper layer.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::config::{ExcludeSet, Options};
use crate::error::MountError;
use crate::logging::*;

/// Mount options for unionfs-fuse; allow_other lets root bind mounts show through
const UNIONFS_OPTIONS: &str = "allow_other,auto_unmount,nonempty,large_read,cow,max_files=32768";

/// Runs external mount tooling
#[async_trait]
pub trait CommandRunner: Send + Sync {
	/// Run `program` with `args`, failing on a non-zero exit
	async fn run(&self, program: &str, args: &[String]) -> Result<(), MountError>;
}

/// Runs commands as child processes
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
	async fn run(&self, program: &str, args: &[String]) -> Result<(), MountError> {
		let cmd = format!("{} {}", program, args.join(" "));
		debug!("exec: {}", cmd);
		let output = tokio::process::Command::new(program)
			.args(args)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::piped())
			.output()
			.await
			.map_err(|e| MountError::Spawn { cmd: cmd.clone(), source: e })?;

		if output.status.success() {
			Ok(())
		} else {
			Err(MountError::CommandFailed {
				cmd,
				status: output.status.code(),
				stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
			})
		}
	}
}

/// Sets up and tears down the overlay and the excluded bind mounts
pub struct MountManager {
	runner: Box<dyn CommandRunner>,
	lower: PathBuf,
	upper: PathBuf,
	mount: PathBuf,
	data: PathBuf,
	exclude: ExcludeSet,
	use_sudo: bool,
}

impl MountManager {
	pub fn new(options: &Options, runner: Box<dyn CommandRunner>) -> Self {
		MountManager {
			runner,
			lower: options.lower.clone(),
			upper: options.upper.clone(),
			mount: options.mount.clone(),
			data: options.data.clone(),
			exclude: options.exclude_set(),
			use_sudo: needs_sudo(),
		}
	}

	/// Run privileged commands directly instead of through sudo
	pub fn without_sudo(mut self) -> Self {
		self.use_sudo = false;
		self
	}

	/// Mount the overlay. Failure here is fatal for the session.
	pub async fn mount(&self) -> Result<(), MountError> {
		tokio::fs::create_dir_all(&self.upper).await?;
		tokio::fs::create_dir_all(&self.mount).await?;
		let branches = format!("{}=RW:{}=RO", self.upper.display(), self.lower.display());
		info!("Mounting overlay {} at {}", branches, self.mount.display());
		self.runner
			.run(
				"unionfs-fuse",
				&[
					"-o".to_string(),
					UNIONFS_OPTIONS.to_string(),
					branches,
					self.mount.display().to_string(),
				],
			)
			.await
	}

	/// Bind-mount a backing directory over each excluded bare name.
	///
	/// Nothing is bound when the exclude list disables sync altogether.
	pub async fn bind_excludes(&self) -> Result<(), MountError> {
		if self.exclude.disables_sync() {
			info!("Sync disabled by exclude list; skipping bind mounts");
			return Ok(());
		}
		for name in self.exclude.bind_names() {
			let source = self.data.join(name);
			let targets = [self.mount.join(name), self.upper.join(name)];
			tokio::fs::create_dir_all(&source).await?;
			for target in &targets {
				// The upper copy must exist so whiteout tracking does not trip over it
				tokio::fs::create_dir_all(target).await?;
			}
			let src = path_arg(&source);
			for target in &targets {
				info!("Bind mounting {} at {}", source.display(), target.display());
				let dst = path_arg(target);
				self.privileged(&["mount", "--bind", src.as_str(), dst.as_str()]).await?;
			}
		}
		Ok(())
	}

	/// Undo bind mounts, then the overlay. Failures are logged, never returned.
	pub async fn unmount(&self) {
		if !self.exclude.disables_sync() {
			for name in self.exclude.bind_names().into_iter().rev() {
				for target in [self.upper.join(name), self.mount.join(name)] {
					let dst = path_arg(&target);
					if let Err(e) = self.privileged(&["umount", "-l", dst.as_str()]).await {
						warn!("Failed to unmount {}: {}", target.display(), e);
					}
				}
			}
		}
		let args = vec!["-uz".to_string(), path_arg(&self.mount)];
		if let Err(e) = self.runner.run("fusermount", &args).await {
			warn!("Failed to unmount overlay at {}: {}", self.mount.display(), e);
		}
	}

	async fn privileged(&self, command: &[&str]) -> Result<(), MountError> {
		let (program, rest) = match (self.use_sudo, command.split_first()) {
			(true, _) => ("sudo", command),
			(false, Some((first, rest))) => (*first, rest),
			(false, None) => return Ok(()),
		};
		let args: Vec<String> = rest.iter().map(|s| s.to_string()).collect();
		self.runner.run(program, &args).await
	}
}

/// Mount commands go through sudo unless we already run as root
fn needs_sudo() -> bool {
	!nix::unistd::geteuid().is_root()
}

fn path_arg(path: &Path) -> String {
	path.display().to_string()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::{Arc, Mutex};
	use tempfile::TempDir;
	use uuid::Uuid;

	#[derive(Clone, Default)]
	struct Recorder {
		calls: Arc<Mutex<Vec<String>>>,
		fail: Option<&'static str>,
	}

	#[async_trait]
	impl CommandRunner for Recorder {
		async fn run(&self, program: &str, args: &[String]) -> Result<(), MountError> {
			let line = format!("{} {}", program, args.join(" "));
			self.calls.lock().unwrap().push(line.clone());
			match self.fail {
				Some(p) if p == program => Err(MountError::CommandFailed {
					cmd: line,
					status: Some(1),
					stderr: "boom".to_string(),
				}),
				_ => Ok(()),
			}
		}
	}

	fn setup(exclude: &[&str]) -> (TempDir, Options) {
		let root = TempDir::new().unwrap();
		let mut opts = Options::new(
			root.path().join("lower"),
			root.path().join("upper"),
			root.path().join("mnt"),
			Uuid::nil(),
			1,
		);
		opts.data = root.path().join("data");
		opts.exclude = exclude.iter().map(|s| s.to_string()).collect();
		(root, opts)
	}

	#[tokio::test]
	async fn test_mount_invokes_unionfs() {
		let (_root, opts) = setup(&[]);
		let rec = Recorder::default();
		let manager = MountManager::new(&opts, Box::new(rec.clone())).without_sudo();
		manager.mount().await.unwrap();

		let calls = rec.calls.lock().unwrap();
		assert_eq!(calls.len(), 1);
		assert!(calls[0].starts_with("unionfs-fuse -o allow_other"));
		assert!(calls[0].contains("=RW:"));
	}

	#[tokio::test]
	async fn test_mount_failure_propagates() {
		let (_root, opts) = setup(&[]);
		let rec = Recorder { fail: Some("unionfs-fuse"), ..Default::default() };
		let manager = MountManager::new(&opts, Box::new(rec));
		assert!(manager.mount().await.is_err());
	}

	#[tokio::test]
	async fn test_bind_excludes_only_bare_names() {
		let (_root, opts) = setup(&["scratch", ".cache", "a/b"]);
		let rec = Recorder::default();
		let manager = MountManager::new(&opts, Box::new(rec.clone())).without_sudo();
		manager.bind_excludes().await.unwrap();

		let calls = rec.calls.lock().unwrap();
		assert_eq!(calls.len(), 2);
		assert!(calls.iter().all(|c| c.starts_with("mount --bind") && c.contains("scratch")));
		assert!(opts.upper.join("scratch").is_dir());
		assert!(opts.data.join("scratch").is_dir());
	}

	#[tokio::test]
	async fn test_sudo_prefix() {
		let (_root, opts) = setup(&["scratch"]);
		let rec = Recorder::default();
		let mut manager = MountManager::new(&opts, Box::new(rec.clone()));
		manager.use_sudo = true;
		manager.bind_excludes().await.unwrap();
		assert!(rec.calls.lock().unwrap()[0].starts_with("sudo mount --bind"));
	}

	#[tokio::test]
	async fn test_sudo_follows_effective_uid() {
		let (_root, opts) = setup(&["scratch"]);
		let rec = Recorder::default();
		let manager = MountManager::new(&opts, Box::new(rec.clone()));
		assert_eq!(manager.use_sudo, needs_sudo());
		manager.bind_excludes().await.unwrap();

		let first = rec.calls.lock().unwrap()[0].clone();
		let as_root = nix::unistd::Uid::effective().is_root();
		assert_eq!(first.starts_with("sudo mount --bind"), !as_root);
		assert_eq!(first.starts_with("mount --bind"), as_root);
	}

	#[tokio::test]
	async fn test_unmount_swallows_errors() {
		let (_root, opts) = setup(&["scratch"]);
		let rec = Recorder { fail: Some("fusermount"), ..Default::default() };
		let manager = MountManager::new(&opts, Box::new(rec.clone())).without_sudo();
		manager.unmount().await;

		let calls = rec.calls.lock().unwrap();
		assert_eq!(calls.len(), 3);
		assert!(calls[0].starts_with("umount -l"));
		assert!(calls[2].starts_with("fusermount -uz"));
	}

	#[tokio::test]
	async fn test_disabled_sync_skips_binds() {
		let (_root, opts) = setup(&["scratch", "~"]);
		let rec = Recorder::default();
		let manager = MountManager::new(&opts, Box::new(rec.clone())).without_sudo();
		manager.bind_excludes().await.unwrap();
		manager.unmount().await;

		let calls = rec.calls.lock().unwrap();
		assert_eq!(calls.len(), 1);
		assert!(calls[0].starts_with("fusermount"));
	}
}

// vim: ts=4
