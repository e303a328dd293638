//! Error types for sync operations

use std::error::Error;
use std::fmt;
use std::io;

/// Main error type for sync operations
///
/// This is the unified error type that encompasses all sync-related errors.
/// It contains both direct variants for common errors and nested variants
/// for domain-specific errors.
#[derive(Debug)]
pub enum EngineError {
	/// Local I/O error
	Io(io::Error),

	/// Invalid configuration
	InvalidConfig { message: String },

	/// Lock acquisition failed
	LockFailed { message: String },

	/// Session was cancelled
	Cancelled,

	/// Remote client error (nested)
	Client(ClientError),

	/// Cache error (nested)
	Cache(CacheError),

	/// Keyring error (nested)
	Keyring(KeyringError),

	/// Action execution error (nested)
	Action(ActionError),

	/// Session loop error (nested)
	Session(SessionError),

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for EngineError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			EngineError::Io(e) => write!(f, "I/O error: {}", e),
			EngineError::InvalidConfig { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
			EngineError::LockFailed { message } => {
				write!(f, "Lock acquisition failed: {}", message)
			}
			EngineError::Cancelled => write!(f, "Session cancelled"),
			EngineError::Client(e) => write!(f, "Remote client error: {}", e),
			EngineError::Cache(e) => write!(f, "Cache error: {}", e),
			EngineError::Keyring(e) => write!(f, "Keyring error: {}", e),
			EngineError::Action(e) => write!(f, "Action error: {}", e),
			EngineError::Session(e) => write!(f, "Session error: {}", e),
			EngineError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for EngineError {}

impl From<io::Error> for EngineError {
	fn from(e: io::Error) -> Self {
		EngineError::Io(e)
	}
}

impl From<String> for EngineError {
	fn from(e: String) -> Self {
		EngineError::Other { message: e }
	}
}

impl From<ClientError> for EngineError {
	fn from(e: ClientError) -> Self {
		EngineError::Client(e)
	}
}

impl From<CacheError> for EngineError {
	fn from(e: CacheError) -> Self {
		EngineError::Cache(e)
	}
}

impl From<KeyringError> for EngineError {
	fn from(e: KeyringError) -> Self {
		EngineError::Keyring(e)
	}
}

impl From<ActionError> for EngineError {
	fn from(e: ActionError) -> Self {
		EngineError::Action(e)
	}
}

impl From<SessionError> for EngineError {
	fn from(e: SessionError) -> Self {
		EngineError::Session(e)
	}
}

/// Errors from talking to the remote object store
#[derive(Debug)]
pub enum ClientError {
	/// Connection-level failure: DNS, refused, timed out
	Transport { message: String },

	/// Unexpected status code or malformed response body
	Protocol { message: String },

	/// The remote reported the path doesn't exist
	NotFound { path: String },

	/// 401/403 from the remote store
	Auth { message: String },

	/// Unrecoverable: unsupported auth scheme, permanently rejected credentials
	Fatal { message: String },
}

impl fmt::Display for ClientError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ClientError::Transport { message } => write!(f, "transport error: {}", message),
			ClientError::Protocol { message } => write!(f, "protocol error: {}", message),
			ClientError::NotFound { path } => write!(f, "not found: {}", path),
			ClientError::Auth { message } => write!(f, "authentication error: {}", message),
			ClientError::Fatal { message } => write!(f, "fatal error: {}", message),
		}
	}
}

impl Error for ClientError {}

impl From<reqwest::Error> for ClientError {
	fn from(e: reqwest::Error) -> Self {
		if e.is_timeout() || e.is_connect() {
			ClientError::Transport { message: e.to_string() }
		} else {
			ClientError::Protocol { message: e.to_string() }
		}
	}
}

/// Errors from the durable local cache
#[derive(Debug)]
pub enum CacheError {
	/// The backing database could not be opened, read or written
	Backend { message: String },

	/// A stored entry failed to deserialize
	Corrupted { message: String },
}

impl fmt::Display for CacheError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CacheError::Backend { message } => write!(f, "cache backend error: {}", message),
			CacheError::Corrupted { message } => write!(f, "cache corrupted: {}", message),
		}
	}
}

impl Error for CacheError {}

impl From<bincode::Error> for CacheError {
	fn from(e: bincode::Error) -> Self {
		CacheError::Corrupted { message: e.to_string() }
	}
}

macro_rules! impl_cache_backend_from {
	($t:ty) => {
		impl From<$t> for CacheError {
			fn from(e: $t) -> Self {
				CacheError::Backend { message: e.to_string() }
			}
		}
	};
}

impl_cache_backend_from!(redb::DatabaseError);
impl_cache_backend_from!(redb::TransactionError);
impl_cache_backend_from!(redb::TableError);
impl_cache_backend_from!(redb::StorageError);
impl_cache_backend_from!(redb::CommitError);

/// Errors from the per-account keyring and file encryption
#[derive(Debug)]
pub enum KeyringError {
	/// Could not read or write the keyring's backing files
	Io { message: String },

	/// Local and remote private keys disagree; this is treated as fatal
	PrivateKeyMismatch,

	/// Key generation, wrapping or unwrapping failed
	Crypto { message: String },

	/// Remote user record could not be parsed
	InvalidUserRecord { message: String },
}

impl fmt::Display for KeyringError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			KeyringError::Io { message } => write!(f, "keyring I/O error: {}", message),
			KeyringError::PrivateKeyMismatch => {
				write!(f, "local and remote private keys disagree")
			}
			KeyringError::Crypto { message } => write!(f, "cryptographic error: {}", message),
			KeyringError::InvalidUserRecord { message } => {
				write!(f, "invalid remote user record: {}", message)
			}
		}
	}
}

impl Error for KeyringError {}

impl From<io::Error> for KeyringError {
	fn from(e: io::Error) -> Self {
		KeyringError::Io { message: e.to_string() }
	}
}

/// Errors raised while executing a resolved action
#[derive(Debug)]
pub enum ActionError {
	Client(ClientError),
	Cache(CacheError),
	Keyring(KeyringError),
	Io(io::Error),
}

impl fmt::Display for ActionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ActionError::Client(e) => write!(f, "{}", e),
			ActionError::Cache(e) => write!(f, "{}", e),
			ActionError::Keyring(e) => write!(f, "{}", e),
			ActionError::Io(e) => write!(f, "{}", e),
		}
	}
}

impl Error for ActionError {}

impl From<ClientError> for ActionError {
	fn from(e: ClientError) -> Self {
		ActionError::Client(e)
	}
}

impl From<CacheError> for ActionError {
	fn from(e: CacheError) -> Self {
		ActionError::Cache(e)
	}
}

impl From<KeyringError> for ActionError {
	fn from(e: KeyringError) -> Self {
		ActionError::Keyring(e)
	}
}

impl From<io::Error> for ActionError {
	fn from(e: io::Error) -> Self {
		ActionError::Io(e)
	}
}

/// How the session loop should react to a failed action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
	/// Skip this path, keep draining the queue
	Skip,
	/// Abort the rest of this tick, retry from the next interval
	RetryTick,
	/// Terminate the session
	Fatal,
}

impl ActionError {
	/// Classify this error to decide how the session loop should react.
	pub fn classify(&self) -> ErrorClass {
		match self {
			ActionError::Client(ClientError::Protocol { .. }) => ErrorClass::Skip,
			ActionError::Client(ClientError::NotFound { .. }) => ErrorClass::Skip,
			ActionError::Client(ClientError::Transport { .. }) => ErrorClass::RetryTick,
			ActionError::Client(ClientError::Auth { .. }) => ErrorClass::RetryTick,
			ActionError::Client(ClientError::Fatal { .. }) => ErrorClass::Fatal,
			ActionError::Cache(_) => ErrorClass::Fatal,
			ActionError::Keyring(KeyringError::PrivateKeyMismatch) => ErrorClass::Fatal,
			ActionError::Keyring(_) => ErrorClass::Fatal,
			ActionError::Io(e) if e.kind() == io::ErrorKind::NotFound => ErrorClass::Skip,
			// permission denied, ENOSPC and friends: treated like a transport
			// failure on the affected path, retried on the next tick.
			ActionError::Io(_) => ErrorClass::RetryTick,
		}
	}
}

/// Errors that end a session loop's tick or the session itself
#[derive(Debug)]
pub enum SessionError {
	/// A `Transport`/IO-class error aborted the tick; the account is
	/// presumed offline. The next interval retries from scratch.
	Offline { message: String },

	/// A `Fatal`-class error terminated the session (not the process).
	Fatal { message: String },
}

impl fmt::Display for SessionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SessionError::Offline { message } => write!(f, "tick aborted, offline: {}", message),
			SessionError::Fatal { message } => write!(f, "session terminated: {}", message),
		}
	}
}

impl Error for SessionError {}

// vim: ts=4
