use clap::{Arg, Command};
use std::error::Error;
use std::path::PathBuf;

use lox_sync::actions::Engine;
use lox_sync::cache::Cache;
use lox_sync::client::RemoteClient;
use lox_sync::config::{self, Account, Config};
use lox_sync::keyring::Keyring;
use lox_sync::lock::{self, AccountLock};
use lox_sync::logging::{self, *};
use lox_sync::reconciler;
use lox_sync::session::Session;

/// One account's config directory: `~/.lox/<name>/`, holding the keyring
/// files, the lock file and the redb cache.
fn account_dir(account_name: &str) -> Result<PathBuf, Box<dyn Error>> {
	let home = std::env::var("HOME")?;
	Ok(PathBuf::from(home).join(".lox").join(account_name))
}

fn build_engine(name: &str, account: &Account) -> Result<Engine, Box<dyn Error>> {
	let dir = account_dir(name)?;
	std::fs::create_dir_all(&dir)?;

	let token_url = format!("{}/oauth/v2/token", account.remote_url.trim_end_matches('/'));
	let client = RemoteClient::new(
		account.remote_url.clone(),
		token_url,
		account.username.clone(),
		account.password.clone(),
		account.verify_tls,
	)?;

	let cache_path = dir.join("cache.redb");
	let cache = Cache::open(&cache_path, account.local_dir.to_string_lossy().as_ref(), "v1")?;

	let keyring = Keyring::new(name.to_string(), dir.clone(), account.password.clone());

	Ok(Engine {
		local_root: account.local_dir.clone(),
		client,
		cache,
		keyring,
		encrypt_default: account.encrypt,
	})
}

/// List the local tree under an account without talking to the remote;
/// supplements the two-sided reconcile with an offline diagnostic.
fn dump_local(root: &std::path::Path, prefix: &str) -> std::io::Result<()> {
	let mut entries: Vec<_> = std::fs::read_dir(root)?.filter_map(|e| e.ok()).collect();
	entries.sort_by_key(|e| e.file_name());
	for entry in entries {
		let name = entry.file_name().to_string_lossy().into_owned();
		if name.starts_with('.') && reconciler::is_temp_name(&name) {
			continue;
		}
		let full = format!("{}/{}", prefix, name);
		let meta = entry.metadata()?;
		if meta.is_dir() {
			println!("{}/", full);
			dump_local(&entry.path(), &full)?;
		} else {
			println!("{} ({} bytes)", full, meta.len());
		}
	}
	Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = Command::new("lox-sync")
		.version("0.3.0")
		.author("Szilard Hajba <szilu@symbion.hu>")
		.about("Desktop synchronization agent for a Localbox-style object store")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.help("Path to the accounts config file (default ~/.lox/config.toml)"),
		)
		.arg(
			Arg::new("log-level")
				.long("log-level")
				.value_name("LEVEL")
				.help("Log level: error, warn, info, debug, trace (overrides account log_level)"),
		)
		.subcommand(Command::new("sync").about("Run all configured accounts until interrupted"))
		.subcommand(
			Command::new("dump")
				.about("List an account's local tree without syncing")
				.arg(Arg::new("account").required(true)),
		)
		.get_matches();

	let config_path = match matches.get_one::<String>("config") {
		Some(p) => PathBuf::from(p),
		None => config::default_config_path()?,
	};
	let cfg = Config::load(&config_path)?;

	let default_filter = matches
		.get_one::<String>("log-level")
		.map(|s| s.as_str())
		.unwrap_or_else(|| {
			cfg.accounts.values().next().map(|a| a.log_level.as_tracing_filter()).unwrap_or("info")
		});
	logging::init_tracing(default_filter);

	match matches.subcommand() {
		Some(("dump", sub)) => {
			let name = sub.get_one::<String>("account").expect("required");
			let account = cfg
				.accounts
				.get(name)
				.ok_or_else(|| format!("no such account '{}' in {}", name, config_path.display()))?;
			dump_local(&account.local_dir, "")?;
			Ok(())
		}
		Some(("sync", _)) => run_all_accounts(cfg).await,
		_ => unreachable!("subcommand_required"),
	}
}

async fn run_all_accounts(cfg: Config) -> Result<(), Box<dyn Error>> {
	if cfg.accounts.is_empty() {
		warn!("no accounts configured, nothing to do");
		return Ok(());
	}

	lock::setup_signal_handlers();

	let mut locks = Vec::new();
	let mut handles = Vec::new();

	for (name, account) in cfg.accounts.iter() {
		let dir = account_dir(name)?;
		std::fs::create_dir_all(&dir)?;
		let account_lock = match AccountLock::acquire(&dir) {
			Ok(lock) => lock,
			Err(e) => {
				error!("account '{}': {}", name, e);
				continue;
			}
		};
		locks.push(account_lock);

		let engine = match build_engine(name, account) {
			Ok(engine) => engine,
			Err(e) => {
				error!("account '{}': failed to start: {}", name, e);
				continue;
			}
		};

		let (session, mut status_rx, _cancel) = Session::new(name.clone(), engine, account.interval_secs);
		let account_name = name.clone();
		handles.push(tokio::spawn(async move {
			let status_task = tokio::spawn(async move {
				while status_rx.changed().await.is_ok() {
					debug!("account '{}': status {:?}", account_name, status_rx.borrow());
				}
			});
			session.run().await;
			status_task.abort();
		}));
	}

	futures::future::join_all(handles).await;

	drop(locks);
	Ok(())
}

// vim: ts=4
