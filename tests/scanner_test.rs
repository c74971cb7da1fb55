/// Scanner behavior on realistic overlay layouts
///
/// Upper and lower layers are plain directories here; whiteout markers are
/// created by hand the way unionfs-fuse lays them out.
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

use syncfs::config::ExcludeSet;
use syncfs::scanner::{change_time_ms, compute_state};

fn layers() -> (TempDir, std::path::PathBuf, std::path::PathBuf) {
	let root = TempDir::new().unwrap();
	let upper = root.path().join("upper");
	let lower = root.path().join("lower");
	fs::create_dir_all(&upper).unwrap();
	fs::create_dir_all(&lower).unwrap();
	(root, upper, lower)
}

fn whiteout(upper: &Path, rel: &str) -> i64 {
	let marker = upper.join(".unionfs-fuse").join(format!("{}_HIDDEN~", rel));
	fs::create_dir_all(marker.parent().unwrap()).unwrap();
	fs::write(&marker, b"").unwrap();
	change_time_ms(&fs::symlink_metadata(&marker).unwrap())
}

fn no_excludes() -> ExcludeSet {
	ExcludeSet::new(&[])
}

#[test]
fn test_modified_file_never_goes_back_in_time() {
	let (_root, upper, lower) = layers();
	fs::write(upper.join("notes.txt"), b"one").unwrap();
	let first = compute_state(&upper, &lower, &no_excludes()).unwrap();

	std::thread::sleep(Duration::from_millis(20));
	fs::write(upper.join("notes.txt"), b"two").unwrap();
	let second = compute_state(&upper, &lower, &no_excludes()).unwrap();

	let before = first.get("notes.txt").unwrap();
	let after = second.get("notes.txt").unwrap();
	assert!(before > 0);
	assert!(after >= before, "{} < {}", after, before);
}

#[test]
fn test_whiteout_marks_file_deleted_at_marker_time() {
	let (_root, upper, lower) = layers();
	fs::write(lower.join("deleted.txt"), b"old").unwrap();
	let marker_time = whiteout(&upper, "deleted.txt");

	let state = compute_state(&upper, &lower, &no_excludes()).unwrap();
	let value = state.get("deleted.txt").expect("deleted.txt missing");
	assert!(value < 0);
	assert_eq!(value.abs(), marker_time);
	assert!(!state.contains(".unionfs-fuse"));
}

#[test]
fn test_whiteout_wins_over_upper_copy() {
	let (_root, upper, lower) = layers();
	fs::write(upper.join("deleted.txt"), b"stale").unwrap();
	whiteout(&upper, "deleted.txt");

	let state = compute_state(&upper, &lower, &no_excludes()).unwrap();
	assert!(state.get("deleted.txt").unwrap() < 0);
}

#[test]
fn test_deleted_directory_reports_every_descendant() {
	let (_root, upper, lower) = layers();
	fs::create_dir_all(lower.join("project/src")).unwrap();
	fs::write(lower.join("project/README"), b"").unwrap();
	fs::write(lower.join("project/src/main.c"), b"").unwrap();
	let marker_time = whiteout(&upper, "project");

	let state = compute_state(&upper, &lower, &no_excludes()).unwrap();
	for path in ["project", "project/README", "project/src", "project/src/main.c"] {
		assert_eq!(state.get(path), Some(-marker_time), "{}", path);
	}
	assert_eq!(state.deleted_paths().len(), 4);
}

#[test]
fn test_nested_whiteout() {
	let (_root, upper, lower) = layers();
	fs::create_dir_all(upper.join("a/b")).unwrap();
	whiteout(&upper, "a/b/c.txt");

	let state = compute_state(&upper, &lower, &no_excludes()).unwrap();
	assert!(state.get("a").unwrap() > 0);
	assert!(state.get("a/b").unwrap() > 0);
	assert!(state.get("a/b/c.txt").unwrap() < 0);
}

#[test]
fn test_excluded_and_scratch_paths_are_skipped() {
	let (_root, upper, lower) = layers();
	fs::create_dir_all(upper.join("scratch/deep")).unwrap();
	fs::create_dir_all(upper.join(".compute-servers/4")).unwrap();
	fs::write(upper.join("kept"), b"").unwrap();
	whiteout(&upper, "scratch/gone");

	let exclude = ExcludeSet::new(&["scratch/".to_string()]);
	let state = compute_state(&upper, &lower, &exclude).unwrap();
	assert!(state.contains("kept"));
	assert!(!state.contains("scratch"));
	assert!(!state.contains("scratch/deep"));
	assert!(!state.contains("scratch/gone"));
	assert!(!state.contains(".compute-servers"));
	assert_eq!(state.len(), 1);
}

#[test]
fn test_missing_upper_is_an_error() {
	let (root, _upper, lower) = layers();
	assert!(compute_state(&root.path().join("nope"), &lower, &no_excludes()).is_err());
}

// vim: ts=4
