//! Cooperative single-process lock per account directory
//!
//! One account must never be driven by two processes at once: a second
//! `Session` racing the first against the same local tree and cache would
//! corrupt both. Scoped to one lock file per account's config directory
//! rather than one global lock for the whole process.

use std::error::Error;
use std::path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Global lock file path - used for signal handler cleanup
static LOCK_FILE_PATH: OnceLock<std::sync::Mutex<Option<path::PathBuf>>> = OnceLock::new();

/// Exclusive lock on one account's config directory. Removed on drop or on
/// termination signal.
pub struct AccountLock {
	path: path::PathBuf,
}

impl AccountLock {
	/// Acquire the lock, failing if another process already holds it.
	pub fn acquire(account_dir: &path::Path) -> Result<Self, Box<dyn Error>> {
		let lock_path = account_dir.join(".lox-sync.lock");

		if lock_path.exists() {
			let _pid_str = std::fs::read_to_string(&lock_path)?;
			return Err(format!(
				"account already syncing (lock file exists at {}). \
                 If this is stale, delete the lock file manually.",
				lock_path.display()
			)
			.into());
		}

		let pid = std::process::id();
		std::fs::write(&lock_path, pid.to_string())?;

		let lock_storage_mutex = LOCK_FILE_PATH.get_or_init(|| std::sync::Mutex::new(None));
		if let Ok(mut lock_storage) = lock_storage_mutex.lock() {
			*lock_storage = Some(lock_path.clone());
		}

		Ok(AccountLock { path: lock_path })
	}

	fn remove_now(&self) {
		let _ = std::fs::remove_file(&self.path);
		if let Ok(mut lock_storage) = LOCK_FILE_PATH.get().unwrap().lock() {
			*lock_storage = None;
		}
	}
}

impl Drop for AccountLock {
	fn drop(&mut self) {
		self.remove_now();
	}
}

/// Spawn a task that removes the active lock file and exits on SIGTERM/SIGINT.
pub fn setup_signal_handlers() {
	tokio::spawn(async {
		use tokio::signal;

		let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("failed to install SIGTERM handler: {}", e);
				return;
			}
		};

		let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("failed to install SIGINT handler: {}", e);
				return;
			}
		};

		tokio::select! {
			_ = sigterm.recv() => {
				debug!("received SIGTERM, cleaning up lock file");
				cleanup_lock_file();
				std::process::exit(130);
			}
			_ = sigint.recv() => {
				debug!("received SIGINT, cleaning up lock file");
				cleanup_lock_file();
				std::process::exit(130);
			}
		}
	});
}

fn cleanup_lock_file() {
	if let Some(lock_storage_mutex) = LOCK_FILE_PATH.get() {
		if let Ok(lock_storage) = lock_storage_mutex.lock() {
			if let Some(lock_path) = lock_storage.as_ref() {
				let _ = std::fs::remove_file(lock_path);
				info!("lock file cleaned up on signal termination: {}", lock_path.display());
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	#[test]
	fn test_lock_creation() {
		let temp_dir = TempDir::new().unwrap();
		let lock = AccountLock::acquire(temp_dir.path()).unwrap();

		assert!(lock.path.exists());

		let content = fs::read_to_string(&lock.path).unwrap();
		assert_eq!(content, std::process::id().to_string());
	}

	#[test]
	fn test_lock_cleanup_on_drop() {
		let temp_dir = TempDir::new().unwrap();
		let lock_path = {
			let lock = AccountLock::acquire(temp_dir.path()).unwrap();
			let path = lock.path.clone();
			assert!(path.exists());
			path
		};

		assert!(!lock_path.exists());
	}

	#[test]
	fn test_lock_prevents_concurrent_access() {
		let temp_dir = TempDir::new().unwrap();
		let _lock1 = AccountLock::acquire(temp_dir.path()).unwrap();

		let result = AccountLock::acquire(temp_dir.path());
		assert!(result.is_err());
		if let Err(e) = result {
			assert!(e.to_string().contains("already syncing"));
		}
	}
}

// vim: ts=4
