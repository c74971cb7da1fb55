//! Configuration for a SyncFS instance
//!
//! `Options` describes one (project, compute server) pairing: the three overlay
//! directories, sync interval bounds, the exclude list and transfer settings.
//! It can be built in code or loaded from a TOML / JSON / JSON5 file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::SyncFsError;

/// Directory inside the upper layer where unionfs-fuse keeps whiteouts
pub const WHITEOUT_DIR: &str = ".unionfs-fuse";

/// Suffix unionfs-fuse appends to whiteout markers
pub const WHITEOUT_SUFFIX: &str = "_HIDDEN~";

/// Project-relative directory holding per-compute-server scratch files
pub const SCRATCH_DIR: &str = ".compute-servers";

pub const DEFAULT_SYNC_INTERVAL_MIN_S: f64 = 10.0;
pub const DEFAULT_SYNC_INTERVAL_MAX_S: f64 = 30.0;

/// Upper bound for either interval setting (one day)
pub const SYNC_INTERVAL_CEILING_S: f64 = 86_400.0;

// ============================================================================
// OPTIONS
// ============================================================================

/// Options for one SyncFs instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
	/// Read-only lower layer: the project tree as seen locally
	pub lower: PathBuf,

	/// Writable upper layer
	pub upper: PathBuf,

	/// Where the merged view is mounted
	pub mount: PathBuf,

	#[serde(alias = "project_id")]
	pub project_id: Uuid,

	#[serde(alias = "compute_server_id")]
	pub compute_server_id: u64,

	/// Lower bound of the adaptive interval, seconds
	#[serde(default = "default_interval_min", alias = "sync_interval_min")]
	pub sync_interval_min: f64,

	/// Upper bound of the adaptive interval, seconds
	#[serde(default = "default_interval_max", alias = "sync_interval_max")]
	pub sync_interval_max: f64,

	/// Top-level names (or relative paths) never synced
	#[serde(default)]
	pub exclude: Vec<String>,

	/// File the overlay appends recently read paths to
	#[serde(default, alias = "read_tracking_file")]
	pub read_tracking_file: Option<PathBuf>,

	/// Archive codec: "lz4" (default), or null / "" / "none" to disable
	#[serde(default = "default_compression")]
	pub compression: Option<String>,

	/// Backing area for bind-mounted excluded directories
	#[serde(default = "default_data")]
	pub data: PathBuf,
}

fn default_interval_min() -> f64 {
	DEFAULT_SYNC_INTERVAL_MIN_S
}

fn default_interval_max() -> f64 {
	DEFAULT_SYNC_INTERVAL_MAX_S
}

fn default_compression() -> Option<String> {
	Some("lz4".to_string())
}

fn default_data() -> PathBuf {
	PathBuf::from("/data")
}

impl Options {
	/// Options with defaults for everything but the required fields
	pub fn new(
		lower: impl Into<PathBuf>,
		upper: impl Into<PathBuf>,
		mount: impl Into<PathBuf>,
		project_id: Uuid,
		compute_server_id: u64,
	) -> Self {
		Options {
			lower: lower.into(),
			upper: upper.into(),
			mount: mount.into(),
			project_id,
			compute_server_id,
			sync_interval_min: DEFAULT_SYNC_INTERVAL_MIN_S,
			sync_interval_max: DEFAULT_SYNC_INTERVAL_MAX_S,
			exclude: vec![],
			read_tracking_file: None,
			compression: default_compression(),
			data: default_data(),
		}
	}

	/// Load options from a `.toml`, `.json` or `.json5` file
	pub fn load(path: &Path) -> Result<Self, SyncFsError> {
		let contents = std::fs::read_to_string(path)?;
		let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
		let options: Options = match ext {
			"toml" => toml::from_str(&contents).map_err(|e| SyncFsError::InvalidConfig {
				message: format!("{}: {}", path.display(), e),
			})?,
			"json" | "json5" => json5::from_str(&contents).map_err(|e| {
				SyncFsError::InvalidConfig { message: format!("{}: {}", path.display(), e) }
			})?,
			other => {
				return Err(SyncFsError::InvalidConfig {
					message: format!("Unsupported config format '{}' ({})", other, path.display()),
				})
			}
		};
		options.validate()?;
		Ok(options)
	}

	/// Check the options for values the engine cannot work with
	pub fn validate(&self) -> Result<(), SyncFsError> {
		let invalid = |message: String| Err(SyncFsError::InvalidConfig { message });

		for (name, dir) in
			[("lower", &self.lower), ("upper", &self.upper), ("mount", &self.mount), ("data", &self.data)]
		{
			if dir.as_os_str().is_empty() {
				return invalid(format!("{} directory must not be empty", name));
			}
		}
		if self.compute_server_id == 0 {
			return invalid("compute_server_id must be positive".to_string());
		}
		for (name, value) in
			[("syncIntervalMin", self.sync_interval_min), ("syncIntervalMax", self.sync_interval_max)]
		{
			if !value.is_finite() || value > SYNC_INTERVAL_CEILING_S {
				return invalid(format!(
					"{} must be a finite number of seconds up to {}, got {}",
					name, SYNC_INTERVAL_CEILING_S, value
				));
			}
		}
		if !(self.sync_interval_min > 0.0) {
			return invalid(format!(
				"syncIntervalMin must be greater than 0, got {}",
				self.sync_interval_min
			));
		}
		if self.sync_interval_max < self.sync_interval_min {
			return invalid(format!(
				"syncIntervalMax ({}) must be at least syncIntervalMin ({})",
				self.sync_interval_max, self.sync_interval_min
			));
		}
		self.codec()?;
		Ok(())
	}

	/// Parsed compression codec
	pub fn codec(&self) -> Result<Compression, SyncFsError> {
		Compression::parse(self.compression.as_deref())
	}

	pub fn exclude_set(&self) -> ExcludeSet {
		ExcludeSet::new(&self.exclude)
	}

	/// Scratch directory for this compute server, relative to the project home
	pub fn scratch_rel(&self) -> String {
		format!("{}/{}", SCRATCH_DIR, self.compute_server_id)
	}

	/// Scratch directory as reachable through the lower layer
	pub fn scratch_dir(&self) -> PathBuf {
		self.lower.join(SCRATCH_DIR).join(self.compute_server_id.to_string())
	}

	pub fn error_file(&self) -> PathBuf {
		self.scratch_dir().join("error.txt")
	}
}

// ============================================================================
// COMPRESSION
// ============================================================================

/// Codec applied transparently to every archive stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
	None,
	Lz4,
}

impl Compression {
	/// Unset, empty and "none" disable compression; anything but "lz4" is an error
	pub fn parse(value: Option<&str>) -> Result<Self, SyncFsError> {
		match value {
			None | Some("") | Some("none") => Ok(Compression::None),
			Some("lz4") => Ok(Compression::Lz4),
			Some(other) => Err(SyncFsError::InvalidConfig {
				message: format!("invalid compression '{}'; only 'lz4' is supported", other),
			}),
		}
	}

	/// File name of the serialized compute state for this codec
	pub fn state_file_name(&self) -> &'static str {
		match self {
			Compression::None => "compute-state.json",
			Compression::Lz4 => "compute-state.json.lz4",
		}
	}
}

// ============================================================================
// EXCLUDES
// ============================================================================

/// Membership rules for the exclude list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludeSet {
	entries: Vec<String>,
}

impl ExcludeSet {
	pub fn new(entries: &[String]) -> Self {
		let entries = entries
			.iter()
			.map(|e| {
				let trimmed = e.trim_end_matches('/');
				if trimmed.is_empty() {
					e.clone()
				} else {
					trimmed.to_string()
				}
			})
			.collect();
		ExcludeSet { entries }
	}

	/// `.` or `~` in the list switches sync off entirely
	pub fn disables_sync(&self) -> bool {
		self.entries.iter().any(|e| e == "." || e == "~")
	}

	/// Entries that get their own bind mount: no slash, no leading dot, not `~`
	pub fn bind_names(&self) -> Vec<&str> {
		self.entries
			.iter()
			.filter(|e| !e.is_empty() && !e.contains('/') && !e.starts_with('.') && !e.starts_with('~'))
			.map(|e| e.as_str())
			.collect()
	}

	/// True if `rel` is an entry or lies below one
	pub fn contains(&self, rel: &str) -> bool {
		self.entries.iter().any(|e| {
			rel == e || (rel.len() > e.len() && rel.starts_with(e.as_str()) && rel[e.len()..].starts_with('/'))
		})
	}

	pub fn entries(&self) -> &[String] {
		&self.entries
	}
}


// vim: ts=4
