//! Canonical path and file-info types shared across the engine
//!
//! `Path` is a logical, forward-slash-rooted name together with the AES key
//! handle (if any) inherited from the nearest enclosing encrypted folder.
//! `FileInfo` is the uniform record produced by each of the three sources
//! (local filesystem, remote store, durable cache) that the resolver compares.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::keyring::FolderKey;

/// A logical path rooted at the account's synchronized subtree, e.g. `/a/b.txt`.
///
/// Carries the AES folder key inherited from the nearest enclosing encrypted
/// folder. Encrypted-ness is a property of the folder subtree, not of the
/// individual file: once a key is set on a directory, every descendant
/// `Path` produced while walking it carries the same key unchanged.
#[derive(Debug, Clone)]
pub struct Path {
	pub name: String,
	pub key: Option<FolderKey>,
}

impl Path {
	pub fn root() -> Self {
		Path { name: "/".to_string(), key: None }
	}

	pub fn new(name: impl Into<String>, key: Option<FolderKey>) -> Self {
		Path { name: name.into(), key }
	}

	pub fn is_encrypted(&self) -> bool {
		self.key.is_some()
	}

	/// Join a child entry name onto this path's name (parent is always a directory).
	pub fn child(&self, entry: &str) -> Path {
		let name = if self.name.ends_with('/') {
			format!("{}{}", self.name, entry)
		} else {
			format!("{}/{}", self.name, entry)
		};
		Path { name, key: self.key.clone() }
	}

	/// Basename with leading directories stripped.
	pub fn basename(&self) -> &str {
		self.name.rsplit('/').next().unwrap_or(&self.name)
	}
}

impl fmt::Display for Path {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.name)
	}
}

/// What kind of entry a `FileInfo` describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
	Absent,
	File,
	Directory,
}

/// The uniform metadata record produced from any of the three sources
/// (local filesystem, remote store, durable cache).
///
/// `modified` and `size` are meaningless when `kind == Kind::Absent`; callers
/// must check `kind` first. `has_keys` is only ever set by the remote source,
/// for directories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
	pub kind: Kind,
	/// UTC instant truncated to whole seconds (invariant 1).
	pub modified: i64,
	/// Byte length for files, child count for directories.
	pub size: u64,
	pub has_keys: bool,
}

impl FileInfo {
	pub fn absent() -> Self {
		FileInfo { kind: Kind::Absent, modified: 0, size: 0, has_keys: false }
	}

	pub fn file(modified: i64, size: u64) -> Self {
		FileInfo { kind: Kind::File, modified, size, has_keys: false }
	}

	pub fn directory(modified: i64, child_count: u64, has_keys: bool) -> Self {
		FileInfo { kind: Kind::Directory, modified, size: child_count, has_keys }
	}

	pub fn is_absent(&self) -> bool {
		self.kind == Kind::Absent
	}

	pub fn is_file(&self) -> bool {
		self.kind == Kind::File
	}

	pub fn is_directory(&self) -> bool {
		self.kind == Kind::Directory
	}
}

/// Truncate a `SystemTime`-derived Unix timestamp to whole seconds, per
/// invariant 1 ("modified is in UTC and truncated to whole seconds").
pub fn truncate_to_seconds(unix_seconds_with_fraction: f64) -> i64 {
	unix_seconds_with_fraction.floor() as i64
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn path_child_appends_with_single_slash() {
		let root = Path::root();
		let child = root.child("hello.txt");
		assert_eq!(child.name, "/hello.txt");
	}

	#[test]
	fn path_child_inherits_key() {
		let key = FolderKey { key: [1u8; 32], iv: [2u8; 16] };
		let parent = Path::new("/secret", Some(key.clone()));
		let child = parent.child("a.txt");
		assert!(child.is_encrypted());
		assert_eq!(child.key.unwrap().key, key.key);
	}

	#[test]
	fn basename_strips_directories() {
		let p = Path::new("/a/b/c.txt", None);
		assert_eq!(p.basename(), "c.txt");
	}

	#[test]
	fn file_info_absent_has_absent_kind() {
		let fi = FileInfo::absent();
		assert!(fi.is_absent());
	}
}

// vim: ts=4
