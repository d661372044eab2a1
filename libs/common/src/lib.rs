//! Common service plumbing
//!
//! Shared by the gateway binaries:
//! - logging bootstrap (console + daily rolling file, runtime level reload)
//! - graceful shutdown signal
//! - SQLite pool client
//! - common command-line arguments

pub mod bootstrap_args;
pub mod logging;
pub mod shutdown;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use bootstrap_args::ServiceArgs;

// Re-export CLI dependencies when cli feature is enabled
#[cfg(feature = "cli")]
pub use clap;

#[cfg(feature = "cli")]
pub use clap::{Args, Parser};
