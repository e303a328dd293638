//! Scheduling, cancellation, error classification and status reporting (C8)
//!
//! One `Session` owns one account's `Engine` (Reconciler/Cache/Keyring/
//! Client set. Ported from `original_source/lox/session.py`'s
//! `LoxSession.run`/`.sync`, re-expressed as a `tokio::task` instead of a
//! `threading.Thread` — cancellation is a plain
//! `Arc<AtomicBool>` checked between queue items and raced against the
//! interval sleep with `tokio::select!`, mirroring the original's
//! `threading.Event.wait(timeout)`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::actions::Engine;
use crate::error::{ActionError, ErrorClass, SessionError};
use crate::logging::*;
use crate::model::Path;
use crate::resolver::resolve;

/// Published by the session loop so any number of observers (a status
/// command, the out-of-scope GUI) can subscribe without the engine knowing
/// about them — the idiomatic replacement for the original's plain
/// `self.status` string field polled by the GUI indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
	Initialized,
	Running { since: i64 },
	Waiting { since: i64 },
	Stopped,
	Error { message: String },
}

/// A cooperative cancellation flag, checked at the top of the drain loop and
/// on wakeup from the interval sleep. An in-flight action always completes;
/// there is no mid-transfer interrupt.
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
	pub fn new() -> Self {
		CancelHandle(Arc::new(AtomicBool::new(false)))
	}

	pub fn cancel(&self) {
		self.0.store(true, Ordering::Relaxed);
	}

	fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::Relaxed)
	}
}

impl Default for CancelHandle {
	fn default() -> Self {
		Self::new()
	}
}

pub struct Session {
	account: String,
	engine: Engine,
	interval_secs: u64,
	cancel: CancelHandle,
	status_tx: watch::Sender<SessionStatus>,
}

impl Session {
	pub fn new(account: impl Into<String>, engine: Engine, interval_secs: u64) -> (Self, watch::Receiver<SessionStatus>, CancelHandle) {
		let (status_tx, status_rx) = watch::channel(SessionStatus::Initialized);
		let cancel = CancelHandle::new();
		let session = Session { account: account.into(), engine, interval_secs, cancel: cancel.clone(), status_tx };
		(session, status_rx, cancel)
	}

	fn set_status(&self, status: SessionStatus) {
		let _ = self.status_tx.send(status);
	}

	/// Drive the session until cancelled or, for a one-shot interval of 0,
	/// after the first pass completes.
	pub async fn run(mut self) {
		if 0 < self.interval_secs && self.interval_secs < 60 {
			warn!("account '{}': interval is {}s, this is short", self.account, self.interval_secs);
		}
		info!("account '{}': session started", self.account);

		loop {
			if self.cancel.is_cancelled() {
				break;
			}

			self.set_status(SessionStatus::Running { since: now() });
			match self.tick().await {
				Ok(()) => {}
				Err(SessionError::Offline { message }) => {
					error!("account '{}': {}", self.account, message);
				}
				Err(SessionError::Fatal { message }) => {
					error!("account '{}': fatal error, terminating session: {}", self.account, message);
					self.set_status(SessionStatus::Error { message });
					break;
				}
			}

			if self.interval_secs == 0 {
				break;
			}

			self.set_status(SessionStatus::Waiting { since: now() });
			tokio::select! {
				_ = tokio::time::sleep(Duration::from_secs(self.interval_secs)) => {}
				_ = wait_for_cancel(&self.cancel) => {}
			}
		}

		info!("account '{}': session stopped", self.account);
		self.set_status(SessionStatus::Stopped);
	}

	/// One reconcile/drain pass starting at the account root.
	async fn tick(&mut self) -> Result<(), SessionError> {
		let root = Path::root();
		let mut queue: VecDeque<Path> = self.engine.reconcile(&root).await.map_err(|e| SessionError::Offline {
			message: format!("reconcile(root) failed: {}", e),
		})?;

		while let Some(path) = queue.pop_front() {
			if self.cancel.is_cancelled() {
				break;
			}

			if let Err(e) = self.process_one(path, &mut queue).await {
				match e.classify() {
					ErrorClass::Skip => warn!("account '{}': skipping path: {}", self.account, e),
					ErrorClass::RetryTick => {
						return Err(SessionError::Offline { message: e.to_string() });
					}
					ErrorClass::Fatal => {
						return Err(SessionError::Fatal { message: e.to_string() });
					}
				}
			}
		}

		Ok(())
	}

	async fn process_one(&mut self, mut path: Path, queue: &mut VecDeque<Path>) -> Result<(), ActionError> {
		let local = self.engine.file_info_local(&path)?;
		let remote = self.engine.file_info_remote(&path).await?;
		let cached = self.engine.file_info_cache(&path)?;

		if remote.has_keys && path.key.is_none() {
			info!("fetching keys for '{}'", path.name);
			self.engine.keyring.open(&self.engine.client).await?;
			let key_resp = self.engine.client.get_key(&path.name).await?;
			let fk = self.engine.keyring.unwrap_folder_key(&key_resp.key, &key_resp.iv)?;
			path = Path::new(path.name.clone(), Some(fk));
		}

		let action = resolve(&local, &remote, &cached);
		debug!("resolving '{}' leads to {:?}", path.name, action);
		self.engine.run(path, action, queue).await
	}
}

async fn wait_for_cancel(cancel: &CancelHandle) {
	loop {
		if cancel.is_cancelled() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(200)).await;
	}
}

fn now() -> i64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs() as i64
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cancel_handle_starts_uncancelled() {
		let handle = CancelHandle::new();
		assert!(!handle.is_cancelled());
		handle.cancel();
		assert!(handle.is_cancelled());
	}

	#[test]
	fn cancel_handle_clone_shares_state() {
		let handle = CancelHandle::new();
		let clone = handle.clone();
		clone.cancel();
		assert!(handle.is_cancelled());
	}
}

// vim: ts=4
