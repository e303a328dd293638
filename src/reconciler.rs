//! Directory-level set union producing a work queue of `Path`s
//!
//! Ported from `original_source/lox/session.py::_reconcile`: list both sides
//! of a directory, sweep stale temp-file siblings while listing the local
//! side, and union the two name sets. Sibling order is unspecified; callers
//! must not depend on it.

use std::fs;
use std::path::Path as FsPath;

use crate::client::RemoteClient;
use crate::error::{ActionError, ClientError};
use crate::logging::*;
use crate::model::Path;

/// Prefixes used for this engine's own temporary siblings.
/// A listing that finds one of these left over from an interrupted transfer
/// deletes it instead of treating it as a user file.
const TEMP_PREFIXES: [&str; 3] = [".download_", ".encrypt_", ".decrypt_"];

pub fn is_temp_name(entry: &str) -> bool {
	TEMP_PREFIXES.iter().any(|p| entry.starts_with(p))
}

/// List both sides of `path.name` and return the union of child names as
/// fully-qualified `Path`s (inheriting `path`'s folder key), in unspecified
/// order.
///
/// `local_root` is the filesystem root the account's tree is mounted under.
pub async fn reconcile(local_root: &FsPath, client: &RemoteClient, path: &Path) -> Result<Vec<Path>, ActionError> {
	let local_names = list_local(local_root, path)?;
	let remote_names = list_remote(client, path).await?;

	let mut names: Vec<String> = local_names;
	for name in remote_names {
		if !names.contains(&name) {
			names.push(name);
		}
	}

	Ok(names.into_iter().map(|name| Path::new(name, path.key.clone())).collect())
}

fn list_local(local_root: &FsPath, path: &Path) -> Result<Vec<String>, ActionError> {
	let dir = join_local(local_root, &path.name);

	if !dir.exists() {
		return Ok(Vec::new());
	}
	if !dir.is_dir() {
		return Err(ActionError::Client(ClientError::Protocol {
			message: format!("not a directory (local): {}", path.name),
		}));
	}

	let mut names = Vec::new();
	for entry in fs::read_dir(&dir)? {
		let entry = entry?;
		let entry_name = entry.file_name().to_string_lossy().into_owned();
		if entry_name.starts_with('.') {
			if is_temp_name(&entry_name) {
				let stale = dir.join(&entry_name);
				info!("cleaning up stale temp file {}", stale.display());
				let _ = if entry.path().is_dir() {
					fs::remove_dir_all(&stale)
				} else {
					fs::remove_file(&stale)
				};
			}
			continue;
		}
		names.push(path.child(&entry_name).name);
	}
	Ok(names)
}

async fn list_remote(client: &RemoteClient, path: &Path) -> Result<Vec<String>, ActionError> {
	let meta = client.meta(&path.name).await?;
	match meta {
		None => Ok(Vec::new()),
		Some(meta) if !meta.is_dir => Err(ActionError::Client(ClientError::Protocol {
			message: format!("not a directory (remote): {}", path.name),
		})),
		Some(meta) => Ok(meta.children.unwrap_or_default().into_iter().map(|c| c.path).collect()),
	}
}

pub fn join_local(local_root: &FsPath, logical_name: &str) -> std::path::PathBuf {
	local_root.join(logical_name.trim_start_matches('/'))
}


// vim: ts=4
