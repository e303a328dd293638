//! # lox-sync - desktop synchronization agent
//!
//! Reconciles a local directory against a remote HTTP JSON object store,
//! one `Session` per configured account. A pure `resolver::resolve` maps
//! each `(local, remote, cached)` `FileInfo` triple onto one of thirteen
//! `actions::Engine` executors; results are committed to a durable `Cache`
//! so an interrupted run resumes rather than re-diffing from scratch.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use lox_sync::config::Config;
//! use lox_sync::session::Session;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(&lox_sync::config::default_config_path()?)?;
//!     // build one Engine + Session per account, as main.rs does, and
//!     // await session.run().
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod actions;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod keyring;
pub mod lock;
pub mod logging;
pub mod model;
pub mod reconciler;
pub mod resolver;
pub mod session;

pub use actions::Engine;
pub use config::{Account, Config};
pub use error::{ActionError, EngineError, ErrorClass, SessionError as EngineSessionError};
pub use model::{FileInfo, Kind, Path};
pub use resolver::{resolve, Action};
pub use session::{CancelHandle, Session, SessionStatus};

// vim: ts=4
