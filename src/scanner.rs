//! Tree scanner: builds a `FilesystemState` from the overlay's upper layer
//!
//! Present paths come from walking the upper layer. Deletions come from the
//! whiteout markers unionfs-fuse leaves in `<upper>/.unionfs-fuse`: a marker
//! `a/b_HIDDEN~` means `a/b` was removed from the merged view. When the lower
//! layer still holds `a/b` as a directory, everything below it is reported as
//! deleted too, since removing a directory leaves a single marker.

use std::borrow::Cow;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::config::{ExcludeSet, SCRATCH_DIR, WHITEOUT_DIR, WHITEOUT_SUFFIX};
use crate::logging::*;
use crate::types::FilesystemState;

/// Last metadata change of a path in milliseconds
pub fn change_time_ms(meta: &fs::Metadata) -> i64 {
	meta.ctime() * 1000 + meta.ctime_nsec() / 1_000_000
}

/// Scan the upper layer and its whiteouts.
///
/// Fails only if `upper` itself cannot be read; unreadable subdirectories
/// are logged and skipped.
pub fn compute_state(
	upper: &Path,
	lower: &Path,
	exclude: &ExcludeSet,
) -> io::Result<FilesystemState> {
	let mut state = FilesystemState::new();
	fs::read_dir(upper)?;
	walk(upper, upper, exclude, &mut |rel, meta| {
		state.insert_present(rel, change_time_ms(meta));
	});

	let whiteouts = upper.join(WHITEOUT_DIR);
	if whiteouts.is_dir() {
		apply_whiteouts(&whiteouts, lower, exclude, &mut state);
	}
	debug!(
		"Scanned {}: {} entries, {} deletions",
		upper.display(),
		state.len(),
		state.deleted_paths().len()
	);
	Ok(state)
}

/// Scan a plain tree without whiteout handling
pub fn scan_tree(root: &Path, exclude: &ExcludeSet) -> io::Result<FilesystemState> {
	let mut state = FilesystemState::new();
	fs::read_dir(root)?;
	walk(root, root, exclude, &mut |rel, meta| {
		state.insert_present(rel, change_time_ms(meta));
	});
	Ok(state)
}

fn apply_whiteouts(whiteouts: &Path, lower: &Path, exclude: &ExcludeSet, state: &mut FilesystemState) {
	let mut markers: Vec<(String, i64)> = Vec::new();
	collect_markers(whiteouts, whiteouts, &mut markers);

	for (path, deleted_at) in markers {
		if is_reserved(&path) || exclude.contains(&path) {
			continue;
		}
		state.insert_deleted(path.clone(), deleted_at);

		// A removed directory leaves one marker; report what was below it.
		let lower_path = lower.join(&path);
		let is_lower_dir =
			fs::symlink_metadata(&lower_path).map(|m| m.is_dir()).unwrap_or(false);
		if is_lower_dir {
			let mut below: Vec<String> = Vec::new();
			walk(lower, &lower_path, exclude, &mut |rel, _| below.push(rel));
			for rel in below {
				if !state.contains(&rel) {
					state.insert_deleted(rel, deleted_at);
				}
			}
		}
	}
}

fn collect_markers(base: &Path, dir: &Path, markers: &mut Vec<(String, i64)>) {
	let entries = match fs::read_dir(dir) {
		Ok(e) => e,
		Err(e) => {
			warn!("Cannot read whiteout directory {}: {}", dir.display(), e);
			return;
		}
	};

	for entry_result in entries {
		let entry = match entry_result {
			Ok(e) => e,
			Err(e) => {
				debug!("Error reading whiteout entry: {}", e);
				continue;
			}
		};
		let path = entry.path();
		let meta = match fs::symlink_metadata(&path) {
			Ok(m) => m,
			Err(e) => {
				debug!("Whiteout {} vanished during scan: {}", path.display(), e);
				continue;
			}
		};
		let rel = match relative(base, &path) {
			Some(r) => r,
			None => continue,
		};

		if let Some(target) = rel.strip_suffix(WHITEOUT_SUFFIX) {
			if !target.is_empty() {
				markers.push((target.to_string(), change_time_ms(&meta)));
			}
		} else if meta.is_dir() {
			// Plain directories only mirror the layout of deeper markers
			collect_markers(base, &path, markers);
		}
	}
}

/// Depth-first walk below `dir`, reporting paths relative to `base`
fn walk(
	base: &Path,
	dir: &Path,
	exclude: &ExcludeSet,
	visit: &mut dyn FnMut(String, &fs::Metadata),
) {
	let entries = match fs::read_dir(dir) {
		Ok(e) => e,
		Err(e) => {
			warn!("Cannot read directory {}: {}", dir.display(), e);
			return;
		}
	};

	for entry_result in entries {
		let entry = match entry_result {
			Ok(e) => e,
			Err(e) => {
				debug!("Error reading directory entry: {}", e);
				continue;
			}
		};
		let path = entry.path();
		let rel = match relative(base, &path) {
			Some(r) => r,
			None => continue,
		};
		if is_reserved(&rel) || exclude.contains(&rel) {
			continue;
		}

		let meta = match fs::symlink_metadata(&path) {
			Ok(m) => m,
			Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
			Err(e) => {
				warn!("Cannot access {}: {}", path.display(), e);
				continue;
			}
		};

		let is_dir = meta.is_dir();
		visit(rel, &meta);
		if is_dir {
			walk(base, &path, exclude, visit);
		}
	}
}

/// Overlay bookkeeping and scratch files are never synced
fn is_reserved(rel: &str) -> bool {
	let top = rel.split('/').next().unwrap_or(rel);
	top == WHITEOUT_DIR || top == SCRATCH_DIR
}

/// Slash-joined path below `base`. Names that are not valid UTF-8 are kept
/// with replacement characters so they still show up in the state.
fn relative(base: &Path, path: &Path) -> Option<String> {
	let rel = path.strip_prefix(base).ok()?;
	let parts: Vec<Cow<'_, str>> = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect();
	if parts.is_empty() {
		return None;
	}
	if parts.iter().any(|p| matches!(p, Cow::Owned(_))) {
		warn!("Path {} is not valid UTF-8; reporting it as {}", path.display(), parts.join("/"));
	}
	Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_scan_tree_reports_files_and_dirs() {
		let root = TempDir::new().unwrap();
		fs::create_dir_all(root.path().join("a/b")).unwrap();
		fs::write(root.path().join("a/b/c.txt"), b"x").unwrap();
		fs::write(root.path().join("top.txt"), b"y").unwrap();

		let state = scan_tree(root.path(), &ExcludeSet::default()).unwrap();
		for p in ["a", "a/b", "a/b/c.txt", "top.txt"] {
			assert!(state.get(p).unwrap() > 0, "{} should be present", p);
		}
		assert_eq!(state.len(), 4);
	}

	#[test]
	fn test_reserved_directories_are_skipped() {
		let root = TempDir::new().unwrap();
		fs::create_dir_all(root.path().join(".compute-servers/1")).unwrap();
		fs::create_dir_all(root.path().join(".unionfs-fuse")).unwrap();
		fs::write(root.path().join("keep"), b"").unwrap();

		let state = scan_tree(root.path(), &ExcludeSet::default()).unwrap();
		assert_eq!(state.len(), 1);
		assert!(state.contains("keep"));
	}

	#[test]
	fn test_nested_marker_maps_to_unsuffixed_path() {
		let upper = TempDir::new().unwrap();
		let lower = TempDir::new().unwrap();
		fs::create_dir_all(upper.path().join(".unionfs-fuse/sub")).unwrap();
		fs::write(upper.path().join(".unionfs-fuse/sub/x.txt_HIDDEN~"), b"").unwrap();

		let state = compute_state(upper.path(), lower.path(), &ExcludeSet::default()).unwrap();
		assert!(state.get("sub/x.txt").unwrap() < 0);
		assert!(!state.contains("sub"));
	}

	#[test]
	fn test_missing_upper_is_an_error() {
		let lower = TempDir::new().unwrap();
		let missing = lower.path().join("nope");
		assert!(compute_state(&missing, lower.path(), &ExcludeSet::default()).is_err());
	}

	#[test]
	fn test_relative_joins_with_slashes() {
		let base = Path::new("/u");
		assert_eq!(relative(base, Path::new("/u/a/b")), Some("a/b".to_string()));
		assert_eq!(relative(base, Path::new("/u")), None);
	}

	#[test]
	fn test_non_utf8_names_are_kept() {
		use std::ffi::OsStr;
		use std::os::unix::ffi::OsStrExt;

		let root = TempDir::new().unwrap();
		fs::write(root.path().join(OsStr::from_bytes(b"caf\xe9.txt")), b"x").unwrap();
		let dir = root.path().join(OsStr::from_bytes(b"d\xffir"));
		fs::create_dir(&dir).unwrap();
		fs::write(dir.join("inner.txt"), b"y").unwrap();
		fs::write(root.path().join("ok.txt"), b"z").unwrap();

		let state = scan_tree(root.path(), &ExcludeSet::default()).unwrap();
		assert_eq!(state.len(), 4);
		assert!(state.get("caf\u{FFFD}.txt").unwrap() > 0);
		assert!(state.contains("d\u{FFFD}ir"));
		assert!(state.contains("d\u{FFFD}ir/inner.txt"));
		assert!(state.contains("ok.txt"));
	}
}

// vim: ts=4
