//! Per-account configuration (C1 ambient layer)
//!
//! Ported from `original_source/lox/config.py`'s `METADATA` table. The
//! original stores settings in an encrypted, password-protected pickle with
//! change-tracking dict wrappers (`SectionSettings`/`Sections`) so the GUI
//! can detect dirty fields before re-encrypting; that persistence mechanism
//! is out of scope here, so this is a plain TOML file
//! loaded with serde, one `[accounts.<name>]` table per account, layered as
//! built-in defaults -> file -> environment overrides.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path as FsPath, PathBuf};

use crate::error::EngineError;

/// `auth_type` metadata option, in the original's declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
	Localbox,
	Oauth2,
	Saml,
}

impl Default for AuthType {
	fn default() -> Self {
		AuthType::Localbox
	}
}

/// `log_level` metadata option. `Traffic` (the original's "log every HTTP
/// request/response body" level) maps onto `tracing::Level::TRACE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	None,
	Error,
	Warn,
	Info,
	Debug,
	Traffic,
}

impl Default for LogLevel {
	// METADATA default index is 1 -> "error"
	fn default() -> Self {
		LogLevel::Error
	}
}

impl LogLevel {
	pub fn as_tracing_filter(self) -> &'static str {
		match self {
			LogLevel::None => "off",
			LogLevel::Error => "error",
			LogLevel::Warn => "warn",
			LogLevel::Info => "info",
			LogLevel::Debug => "debug",
			LogLevel::Traffic => "trace",
		}
	}
}

fn default_interval() -> u64 {
	300
}

fn default_true() -> bool {
	true
}

/// One account's settings, matching `config.py`'s `METADATA` fields plus the
/// `verify_tls` field this crate adds (the original never offers to disable
/// certificate validation; this crate does, defaulted on).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Account {
	pub local_dir: PathBuf,
	pub remote_url: String,
	pub auth_type: AuthType,
	pub encrypt: bool,
	pub username: String,
	pub password: String,
	#[serde(rename = "interval")]
	pub interval_secs: u64,
	pub log_level: LogLevel,
	pub verify_tls: bool,
}

impl Default for Account {
	fn default() -> Self {
		Account {
			local_dir: PathBuf::new(),
			remote_url: String::new(),
			auth_type: AuthType::default(),
			encrypt: false,
			username: String::new(),
			password: String::new(),
			interval_secs: default_interval(),
			log_level: LogLevel::default(),
			verify_tls: default_true(),
		}
	}
}

impl Account {
	fn validate(&self, name: &str) -> Result<(), EngineError> {
		if self.local_dir.as_os_str().is_empty() {
			return Err(EngineError::InvalidConfig {
				message: format!("account '{}': local_dir is required", name),
			});
		}
		if self.remote_url.is_empty() {
			return Err(EngineError::InvalidConfig {
				message: format!("account '{}': remote_url is required", name),
			});
		}
		if self.username.is_empty() {
			return Err(EngineError::InvalidConfig {
				message: format!("account '{}': username is required", name),
			});
		}
		Ok(())
	}

	/// Apply `LOX_<ACCOUNT>_<FIELD>` environment overrides, uppercased, the
	/// account name's non-alphanumerics replaced with `_`.
	fn apply_env_overrides(&mut self, name: &str) {
		let prefix = format!("LOX_{}_", env_key(name));
		if let Ok(v) = std::env::var(format!("{}PASSWORD", prefix)) {
			self.password = v;
		}
		if let Ok(v) = std::env::var(format!("{}USERNAME", prefix)) {
			self.username = v;
		}
		if let Ok(v) = std::env::var(format!("{}REMOTE_URL", prefix)) {
			self.remote_url = v;
		}
		if let Ok(v) = std::env::var(format!("{}INTERVAL", prefix)) {
			if let Ok(secs) = v.parse() {
				self.interval_secs = secs;
			}
		}
	}
}

fn env_key(name: &str) -> String {
	name.chars().map(|c| if c.is_alphanumeric() { c.to_ascii_uppercase() } else { '_' }).collect()
}

/// Top-level configuration: a named set of accounts, each driving one
/// `Session`. Grounded in `config.py`'s module-level `settings` dict keyed
/// by account/profile name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	#[serde(rename = "accounts")]
	pub accounts: HashMap<String, Account>,
}

impl Config {
	/// Load from a TOML file, then apply per-account environment overrides.
	/// Missing file is not an error: an empty `Config` is returned so a
	/// caller on first run can fall back to CLI-provided account details.
	pub fn load(path: &FsPath) -> Result<Self, EngineError> {
		let mut config = match fs::read_to_string(path) {
			Ok(text) => toml::from_str::<Config>(&text)
				.map_err(|e| EngineError::InvalidConfig { message: format!("{}: {}", path.display(), e) })?,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
			Err(e) => return Err(EngineError::Io(e)),
		};

		for (name, account) in config.accounts.iter_mut() {
			account.apply_env_overrides(name);
			account.validate(name)?;
		}

		Ok(config)
	}

	pub fn save(&self, path: &FsPath) -> Result<(), EngineError> {
		let text = toml::to_string_pretty(self)
			.map_err(|e| EngineError::InvalidConfig { message: e.to_string() })?;
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(path, text)?;
		Ok(())
	}
}

/// `~/.lox/config.toml`, this crate's default config file location (the
/// original keeps its encrypted blob at `~/.lox/lox.cfg`).
pub fn default_config_path() -> Result<PathBuf, EngineError> {
	let home = std::env::var("HOME")
		.map_err(|_| EngineError::InvalidConfig { message: "HOME is not set".into() })?;
	Ok(PathBuf::from(home).join(".lox").join("config.toml"))
}


// vim: ts=4
