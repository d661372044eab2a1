//! Voltage Archive - Bounded Event Storage
//!
//! Keeps the last N samples of one archived series in memory while every
//! accepted sample is appended durably:
//! - [`EventStorage`]: the bounded window, event-id cursor and busy guard
//! - [`RowStore`]: durable row backend abstraction
//! - [`SqliteTableStore`]: one table per series
//! - [`SqliteColumnStore`]: one wide table per device, one column per series,
//!   one row per sample
//! - [`MemoryRowStore`]: in-process backend for tests and simulation
//!
//! # Architecture
//!
//! ```text
//! append / refresh ──▶ EventStorage ──insert──▶ RowStore (SQLite)
//!                          │                       │
//!                     window (N)  ◀──init (top N)──┘
//!                          │
//!      get_last_event / content        get_event / get_events ──▶ RowStore
//! ```

mod entry;
mod error;
mod sqlite;
mod storage;
mod store;

pub use entry::{Candidate, EventEntry};
pub use error::{ArchiveError, Result};
pub use sqlite::{
    check_series_name, quote_ident, series_table, SqliteColumnStore, SqliteTableStore,
    SERIES_SEPARATOR,
};
pub use storage::EventStorage;
pub use store::{MemoryRowStore, RowStore};
