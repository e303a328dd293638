//! Durable last-known-synced cache
//!
//! Maps a `Path` name to the `FileInfo` observed the last time this engine
//! successfully reconciled it, plus two sentinel rows (`local_root`,
//! `api_version`) checked on every open. A sentinel mismatch clears the
//! whole store — the only supported invalidation.

use redb::ReadableTable;
use redb::TableDefinition;
use std::path::Path as FsPath;

use crate::error::CacheError;
use crate::logging::*;
use crate::model::FileInfo;

const FILES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("files");
const SENTINEL_TABLE: TableDefinition<&str, &str> = TableDefinition::new("sentinel");

const SENTINEL_LOCAL_ROOT: &str = "local_root";
const SENTINEL_API_VERSION: &str = "api_version";

/// Durable key→`FileInfo` map backed by `redb`, one database file per account.
pub struct Cache {
	db: redb::Database,
}

impl Cache {
	/// Open (or create) the cache at `db_path`. If the stored `local_root` or
	/// `api_version` sentinel disagrees with the ones given here, the whole
	/// store is cleared and the new sentinels are written.
	pub fn open(db_path: &FsPath, local_root: &str, api_version: &str) -> Result<Self, CacheError> {
		let db = redb::Database::create(db_path)?;

		{
			let write_txn = db.begin_write()?;
			{
				let _ = write_txn.open_table(FILES_TABLE)?;
				let _ = write_txn.open_table(SENTINEL_TABLE)?;
			}
			write_txn.commit()?;
		}

		let cache = Cache { db };
		cache.reconcile_sentinels(local_root, api_version)?;
		Ok(cache)
	}

	fn reconcile_sentinels(&self, local_root: &str, api_version: &str) -> Result<(), CacheError> {
		let (stored_root, stored_version) = {
			let read_txn = self.db.begin_read()?;
			let table = read_txn.open_table(SENTINEL_TABLE)?;
			let root = table.get(SENTINEL_LOCAL_ROOT)?.map(|v| v.value().to_string());
			let version = table.get(SENTINEL_API_VERSION)?.map(|v| v.value().to_string());
			(root, version)
		};

		let matches = stored_root.as_deref() == Some(local_root) && stored_version.as_deref() == Some(api_version);

		if !matches {
			warn!("cache sentinels disagree with configuration, clearing cache");
			let write_txn = self.db.begin_write()?;
			{
				let mut files = write_txn.open_table(FILES_TABLE)?;
				clear_table(&mut files)?;
				let mut sentinel = write_txn.open_table(SENTINEL_TABLE)?;
				clear_table_str(&mut sentinel)?;
				sentinel.insert(SENTINEL_LOCAL_ROOT, local_root)?;
				sentinel.insert(SENTINEL_API_VERSION, api_version)?;
			}
			write_txn.commit()?;
		}

		Ok(())
	}

	/// Fetch the cached `FileInfo` for `name`, or `None` if there is no entry.
	pub fn get(&self, name: &str) -> Result<Option<FileInfo>, CacheError> {
		let read_txn = self.db.begin_read()?;
		let table = read_txn.open_table(FILES_TABLE)?;
		match table.get(name)? {
			Some(entry) => {
				let info: FileInfo = bincode::deserialize(entry.value())?;
				Ok(Some(info))
			}
			None => Ok(None),
		}
	}

	/// Overwrite the cache entry for `name`.
	pub fn set(&self, name: &str, info: &FileInfo) -> Result<(), CacheError> {
		let bytes = bincode::serialize(info)?;
		let write_txn = self.db.begin_write()?;
		{
			let mut table = write_txn.open_table(FILES_TABLE)?;
			table.insert(name, bytes.as_slice())?;
		}
		write_txn.commit()?;
		Ok(())
	}

	/// Remove the cache entry for `name`. Removing an absent key is a no-op.
	pub fn remove(&self, name: &str) -> Result<(), CacheError> {
		let write_txn = self.db.begin_write()?;
		{
			let mut table = write_txn.open_table(FILES_TABLE)?;
			table.remove(name)?;
		}
		write_txn.commit()?;
		Ok(())
	}
}

fn clear_table(table: &mut redb::Table<&str, &[u8]>) -> Result<(), CacheError> {
	let keys: Vec<String> = {
		let mut iter = table.iter()?;
		let mut keys = Vec::new();
		while let Some(entry) = iter.next() {
			let (key, _) = entry?;
			keys.push(key.value().to_string());
		}
		keys
	};
	for key in keys {
		table.remove(key.as_str())?;
	}
	Ok(())
}

fn clear_table_str(table: &mut redb::Table<&str, &str>) -> Result<(), CacheError> {
	let keys: Vec<String> = {
		let mut iter = table.iter()?;
		let mut keys = Vec::new();
		while let Some(entry) = iter.next() {
			let (key, _) = entry?;
			keys.push(key.value().to_string());
		}
		keys
	};
	for key in keys {
		table.remove(key.as_str())?;
	}
	Ok(())
}


// vim: ts=4
