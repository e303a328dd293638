//! The thirteen action executors and the `FileInfo` gathering they share
//!
//! Each executor is grounded on its `original_source/lox/session.py`
//! counterpart (`_same`/`_walk`/`_update_cache`/`_update_and_walk`/
//! `_download`/`_upload`/`_delete_local`/`_delete_remote`/`_conflict`/
//! `_strange`/`_not_resolved`). Ordering invariant: any action
//! that mutates both sides completes the remote mutation first, then the
//! local mutation, then the cache write — if a step fails, no cache write
//! happens and the next tick re-enters the same resolver row.

use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::cache::Cache;
use crate::client::RemoteClient;
use crate::error::ActionError;
use crate::keyring::Keyring;
use crate::logging::*;
use crate::model::{FileInfo, Kind, Path};
use crate::reconciler::{self, join_local};
use crate::resolver::Action;

/// Owns the four durable collaborators (filesystem root, remote client,
/// cache, keyring) for one account and executes resolved actions against
/// them. One `Engine` per session; never shared across accounts or threads
/// (the work queue is drained serially by a single worker).
pub struct Engine {
	pub local_root: PathBuf,
	pub client: RemoteClient,
	pub cache: Cache,
	pub keyring: Keyring,
	pub encrypt_default: bool,
}

impl Engine {
	/// Stat `path` on the local filesystem. Absent if nothing exists there.
	pub fn file_info_local(&self, path: &Path) -> Result<FileInfo, ActionError> {
		let full = join_local(&self.local_root, &path.name);
		let meta = match fs::symlink_metadata(&full) {
			Ok(m) => m,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FileInfo::absent()),
			Err(e) => return Err(e.into()),
		};

		let modified = meta
			.modified()?
			.duration_since(UNIX_EPOCH)
			.unwrap_or_default()
			.as_secs() as i64;

		if meta.is_dir() {
			let count = fs::read_dir(&full)?.count() as u64;
			Ok(FileInfo::directory(modified, count, false))
		} else {
			Ok(FileInfo::file(modified, meta.len()))
		}
	}

	/// Fetch `path`'s metadata from the remote store. Absent on 404.
	pub async fn file_info_remote(&self, path: &Path) -> Result<FileInfo, ActionError> {
		match self.client.meta(&path.name).await? {
			None => Ok(FileInfo::absent()),
			Some(meta) => {
				let modified = parse_modified(&meta.modified_at)?;
				if meta.is_dir {
					let count = meta.children.as_ref().map(|c| c.len()).unwrap_or(0) as u64;
					Ok(FileInfo::directory(modified, count, meta.has_keys))
				} else {
					Ok(FileInfo::file(modified, meta.size))
				}
			}
		}
	}

	/// Look up the last-known-synced `FileInfo`. Absent if never cached.
	pub fn file_info_cache(&self, path: &Path) -> Result<FileInfo, ActionError> {
		Ok(self.cache.get(&path.name)?.unwrap_or_else(FileInfo::absent))
	}

	/// Reconcile `path`'s children and hand back the union, ready to enqueue.
	pub async fn reconcile(&self, path: &Path) -> Result<Vec<Path>, ActionError> {
		reconciler::reconcile(&self.local_root, &self.client, path).await
	}

	/// Execute the action the resolver selected for `path`, pushing any
	/// children onto `queue` (directories produce more work; files do not).
	pub async fn run(&mut self, path: Path, action: Action, queue: &mut VecDeque<Path>) -> Result<(), ActionError> {
		match action {
			Action::Same => Ok(()),
			Action::Walk => self.walk(&path, queue).await,
			Action::UpdateCache => self.update_cache(&path),
			Action::UpdateCacheThenWalk => {
				self.update_cache(&path)?;
				self.walk(&path, queue).await
			}
			Action::Download => self.download(&path, queue).await,
			Action::Upload => self.upload(&path, queue).await,
			Action::DeleteLocal => self.delete_local(&path),
			Action::DeleteRemote => self.delete_remote(&path).await,
			Action::Conflict => self.conflict(&path, queue).await,
			Action::Strange => {
				error!("resolving '{}' led to a strange situation (nothing exists anywhere)", path.name);
				Ok(())
			}
			Action::NotResolved => {
				error!("path '{}' could not be resolved", path.name);
				Ok(())
			}
		}
	}

	async fn walk(&self, path: &Path, queue: &mut VecDeque<Path>) -> Result<(), ActionError> {
		queue.extend(self.reconcile(path).await?);
		Ok(())
	}

	fn update_cache(&self, path: &Path) -> Result<(), ActionError> {
		let local = self.file_info_local(path)?;
		if local.is_absent() {
			self.cache.remove(&path.name)?;
		} else {
			self.cache.set(&path.name, &local)?;
		}
		Ok(())
	}

	async fn download(&mut self, path: &Path, queue: &mut VecDeque<Path>) -> Result<(), ActionError> {
		let meta = match self.client.meta(&path.name).await? {
			Some(meta) => meta,
			None => {
				warn!("download({}) but remote metadata vanished mid-tick", path.name);
				return Ok(());
			}
		};

		let target = join_local(&self.local_root, &path.name);

		if meta.is_dir {
			if !target.exists() {
				fs::create_dir_all(&target)?;
			}
			return self.walk(path, queue).await;
		}

		if path.is_encrypted() {
			self.keyring.open(&self.client).await?;
		}

		info!("download {}", path.name);
		let bytes = self.client.download(&path.name).await?;
		let download_tmp = tmp_sibling(&target, "download");
		fs::write(&download_tmp, &bytes)?;

		if path.is_encrypted() {
			let fk = path.key.as_ref().expect("is_encrypted implies a key");
			let decrypt_tmp = tmp_sibling(&target, "decrypt");
			let mut input = fs::File::open(&download_tmp)?;
			let mut output = fs::File::create(&decrypt_tmp)?;
			crate::keyring::decrypt_file(fk, &mut input, &mut output)?;
			drop(input);
			drop(output);
			fs::remove_file(&download_tmp)?;
			fs::rename(&decrypt_tmp, &target)?;
		} else {
			fs::rename(&download_tmp, &target)?;
		}

		let modified = parse_modified(&meta.modified_at)?;
		filetime::set_file_mtime(&target, filetime::FileTime::from_unix_time(modified, 0))?;

		let info = self.file_info_local(path)?;
		self.cache.set(&path.name, &info)?;
		Ok(())
	}

	async fn upload(&mut self, path: &Path, queue: &mut VecDeque<Path>) -> Result<(), ActionError> {
		let full = join_local(&self.local_root, &path.name);
		let meta = fs::symlink_metadata(&full)?;

		if meta.is_dir() {
			info!("upload (create folder) {}", path.name);
			self.client.create_folder(&path.name).await?;

			let mut effective_path = path.clone();
			if self.encrypt_default && path.key.is_none() {
				self.keyring.open(&self.client).await?;
				let fk = self.keyring.new_folder_key();
				let (wrapped_key, wrapped_iv) = self.keyring.wrap_folder_key(&fk)?;
				self.client.set_key(&path.name, &wrapped_key, &wrapped_iv, None).await?;
				effective_path = Path::new(path.name.clone(), Some(fk));
			}

			let info = self.file_info_local(&effective_path)?;
			self.cache.set(&effective_path.name, &info)?;
			return self.walk(&effective_path, queue).await;
		}

		let content_type = mime_guess::from_path(&full)
			.first()
			.map(|m| m.essence_str().to_string())
			.unwrap_or_else(|| "application/octet-stream".to_string());

		let bytes = if path.is_encrypted() {
			self.keyring.open(&self.client).await?;
			let fk = path.key.as_ref().expect("is_encrypted implies a key");

			// Pad the local plaintext to a 16-byte boundary in place before
			// encrypting, mirroring `_aes_pad(filename_in)` in the original:
			// the stored ciphertext and the local file must end up the same
			// size, or the next tick's size comparison never agrees again.
			let mut plaintext = fs::read(&full)?;
			crate::keyring::aes_pad_whole_file(&mut plaintext);
			fs::write(&full, &plaintext)?;

			let encrypt_tmp = tmp_sibling(&full, "encrypt");
			{
				let mut input = plaintext.as_slice();
				let mut output = fs::File::create(&encrypt_tmp)?;
				crate::keyring::encrypt_file(fk, &mut input, &mut output)?;
			}
			let bytes = fs::read(&encrypt_tmp)?;
			fs::remove_file(&encrypt_tmp)?;
			bytes
		} else {
			fs::read(&full)?
		};

		info!("upload {}", path.name);
		self.client.upload(&path.name, &content_type, bytes).await?;

		let meta = self
			.client
			.meta(&path.name)
			.await?
			.ok_or_else(|| ActionError::Client(crate::error::ClientError::Protocol {
				message: format!("upload({}) succeeded but meta() returned nothing", path.name),
			}))?;
		let modified = parse_modified(&meta.modified_at)?;
		filetime::set_file_mtime(&full, filetime::FileTime::from_unix_time(modified, 0))?;

		let info = self.file_info_local(path)?;
		self.cache.set(&path.name, &info)?;
		Ok(())
	}

	fn delete_local(&self, path: &Path) -> Result<(), ActionError> {
		let full = join_local(&self.local_root, &path.name);
		if full.is_dir() {
			for entry in fs::read_dir(&full)? {
				let entry = entry?;
				let child = path.child(&entry.file_name().to_string_lossy());
				self.delete_local(&child)?;
			}
			fs::remove_dir(&full)?;
		} else {
			fs::remove_file(&full)?;
		}
		self.cache.remove(&path.name)?;
		Ok(())
	}

	async fn delete_remote(&mut self, path: &Path) -> Result<(), ActionError> {
		let meta = match self.client.meta(&path.name).await? {
			Some(meta) => meta,
			None => {
				self.cache.remove(&path.name)?;
				return Ok(());
			}
		};

		if meta.is_share {
			let invitations = self.client.invitations().await?;
			if let Some(invite) = invitations.into_iter().find(|i| i.share.item.path == path.name) {
				self.client.invite_revoke(&invite.id).await?;
			}
			self.cache.remove(&path.name)?;
			return Ok(());
		}

		if meta.is_dir {
			for child in meta.children.unwrap_or_default() {
				let child_path = path.child_from_full(&child.path);
				Box::pin(self.delete_remote(&child_path)).await?;
			}
		}
		self.client.delete(&path.name).await?;
		self.cache.remove(&path.name)?;
		Ok(())
	}

	async fn conflict(&mut self, path: &Path, queue: &mut VecDeque<Path>) -> Result<(), ActionError> {
		let full = join_local(&self.local_root, &path.name);
		let conflict_logical = conflict_name(&path.name);
		let conflict_full = join_local(&self.local_root, &conflict_logical);

		info!("conflict: renaming local {} to {}", path.name, conflict_logical);
		fs::rename(&full, &conflict_full)?;

		self.download(path, queue).await?;

		let conflict_path = Path::new(conflict_logical, path.key.clone());
		self.upload(&conflict_path, queue).await
	}
}

fn parse_modified(modified_at: &str) -> Result<i64, ActionError> {
	chrono::DateTime::parse_from_rfc3339(modified_at)
		.map(|dt| dt.timestamp())
		.map_err(|e| {
			ActionError::Client(crate::error::ClientError::Protocol {
				message: format!("unparseable modified_at '{}': {}", modified_at, e),
			})
		})
}

/// `.{state}_<hex6>.<basename>`, matching `get_tmp_name` in the original.
fn tmp_sibling(target: &std::path::Path, state: &str) -> PathBuf {
	let dir = target.parent().unwrap_or_else(|| std::path::Path::new("."));
	let name = target.file_name().unwrap_or_default().to_string_lossy();
	dir.join(format!(".{}_{}.{}", state, random_hex6(), name))
}

/// `<base>_conflict_<hex6><ext>`, stripping any existing `_conflict_<hex6>`
/// suffix first so repeated conflicts on the same stem don't chain
/// (`get_conflict_name` in the original).
fn conflict_name(logical_name: &str) -> String {
	let (dir, filename) = match logical_name.rfind('/') {
		Some(idx) => (&logical_name[..idx], &logical_name[idx + 1..]),
		None => ("", logical_name),
	};
	let (base, ext) = splitext(filename);
	let base = strip_existing_conflict_suffix(base);
	let new_name = format!("{}_conflict_{}{}", base, random_hex6(), ext);
	if dir.is_empty() {
		new_name
	} else {
		format!("{}/{}", dir, new_name)
	}
}

/// Python's `os.path.splitext`: split at the last `.`, but never at position
/// 0 (so a leading-dot name like `.bashrc` has no extension).
fn splitext(filename: &str) -> (&str, &str) {
	match filename.rfind('.') {
		Some(idx) if idx > 0 => (&filename[..idx], &filename[idx..]),
		_ => (filename, ""),
	}
}

fn strip_existing_conflict_suffix(base: &str) -> &str {
	// "_conflict_" (10 chars) + 6 hex chars = 16 trailing chars.
	if base.len() >= 16 {
		let tail_start = base.len() - 16;
		if &base[tail_start..tail_start + 10] == "_conflict_" {
			return &base[..tail_start];
		}
	}
	base
}

fn random_hex6() -> String {
	let mut bytes = [0u8; 3];
	OsRng.fill_bytes(&mut bytes);
	hex::encode(bytes)
}

impl Path {
	/// Build a child `Path` from a full logical name the remote already
	/// gave us (as opposed to `child`, which appends a bare entry name onto
	/// this path). Inherits this path's folder key.
	fn child_from_full(&self, full_name: &str) -> Path {
		Path::new(full_name.to_string(), self.key.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn splitext_matches_python_semantics() {
		assert_eq!(splitext("a.txt"), ("a", ".txt"));
		assert_eq!(splitext("archive.tar.gz"), ("archive.tar", ".gz"));
		assert_eq!(splitext("noext"), ("noext", ""));
		assert_eq!(splitext(".bashrc"), (".bashrc", ""));
	}

	#[test]
	fn conflict_name_appends_suffix() {
		let name = conflict_name("/a/b/c.txt");
		assert!(name.starts_with("/a/b/c_conflict_"));
		assert!(name.ends_with(".txt"));
	}

	#[test]
	fn conflict_name_is_idempotent_up_to_hex() {
		let once = conflict_name("/a/b/c.txt");
		let twice = conflict_name(&once);
		// base stem must not grow: strip both hex suffixes and compare.
		let base_once = strip_existing_conflict_suffix(splitext(once.rsplit('/').next().unwrap()).0);
		let base_twice = strip_existing_conflict_suffix(splitext(twice.rsplit('/').next().unwrap()).0);
		assert_eq!(base_once, base_twice);
		assert_eq!(base_once, "c");
	}

	#[test]
	fn tmp_sibling_uses_dotted_prefix() {
		let target = std::path::Path::new("/a/b/c.txt");
		let name = tmp_sibling(target, "download");
		let name = name.to_string_lossy();
		assert!(name.starts_with("/a/b/.download_"));
		assert!(name.ends_with(".c.txt"));
	}
}

// vim: ts=4
