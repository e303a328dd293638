//! Logging prelude module for convenient access to tracing macros.
//!
//! This module provides convenient re-exports of common tracing macros
//! to reduce verbosity and maintain consistency across the codebase.
//!
//! # Usage
//!
//! ```ignore
//! use crate::logging::*;
//!
//! info!("This is an info message");
//! warn!("This is a warning");
//! error!("An error occurred");
//! debug!("Debug information");
//! trace!("Detailed trace information");
//! ```

pub use tracing::{debug, error, info, trace, warn};

/// Initialize the tracing subscriber with environment filter support.
///
/// `default_filter` is used unless `RUST_LOG` is set, so an account's
/// configured `log_level` is the fallback and `RUST_LOG` always wins:
///
/// ```bash
/// RUST_LOG=debug lox-sync sync
/// RUST_LOG=lox_sync::session=trace lox-sync sync
/// ```
pub fn init_tracing(default_filter: &str) {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
		)
		.with_writer(std::io::stderr)
		.init();
}
