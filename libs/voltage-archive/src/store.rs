//! Durable row store abstraction

use crate::entry::EventEntry;
use crate::error::{ArchiveError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Append-only rows of one archived series
///
/// Rows are `(eventId, tickId, value)` with `eventId` unique. Implementations:
/// - `SqliteTableStore`: one table per series
/// - `SqliteColumnStore`: one column pair per series in a shared device table
/// - `MemoryRowStore`: in-memory backend for testing
#[async_trait]
pub trait RowStore: Send + Sync + 'static {
    /// Series name, used in logs and errors
    fn name(&self) -> &str;

    async fn create_if_absent(&self) -> Result<()>;

    async fn insert(&self, entry: &EventEntry) -> Result<()>;

    /// Up to `limit` rows, highest `eventId` first
    async fn latest(&self, limit: usize) -> Result<Vec<EventEntry>>;

    /// Highest stored `eventId`, 0 when empty
    async fn max_event_id(&self) -> Result<u64>;

    /// Latest row with `tickId <= tick_id`
    async fn at_or_before(&self, tick_id: u64) -> Result<Option<EventEntry>>;

    /// Rows with `from <= tickId <= to`, newest first
    async fn range(&self, from: u64, to: u64) -> Result<Vec<EventEntry>>;

    /// Remove the series and all its rows
    async fn drop_series(&self) -> Result<()>;
}

/// Rows held in process memory
#[derive(Debug)]
pub struct MemoryRowStore {
    name: String,
    rows: Mutex<Vec<EventEntry>>,
    failing: AtomicBool,
}

impl MemoryRowStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Seed rows as if written by an earlier run
    pub fn with_rows(name: impl Into<String>, rows: Vec<EventEntry>) -> Self {
        let store = Self::new(name);
        *store.rows.lock() = rows;
        store
    }

    /// Make every subsequent insert fail (simulated disk error)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    /// Snapshot of every stored row in insertion order
    pub fn rows(&self) -> Vec<EventEntry> {
        self.rows.lock().clone()
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_if_absent(&self) -> Result<()> {
        Ok(())
    }

    async fn insert(&self, entry: &EventEntry) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ArchiveError::Storage(format!(
                "simulated write failure on {}",
                self.name
            )));
        }
        let mut rows = self.rows.lock();
        if rows.iter().any(|row| row.event_id == entry.event_id) {
            return Err(ArchiveError::Storage(format!(
                "duplicate eventId {} in {}",
                entry.event_id, self.name
            )));
        }
        rows.push(*entry);
        Ok(())
    }

    async fn latest(&self, limit: usize) -> Result<Vec<EventEntry>> {
        let mut rows = self.rows.lock().clone();
        rows.sort_by(|a, b| b.event_id.cmp(&a.event_id));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn max_event_id(&self) -> Result<u64> {
        Ok(self
            .rows
            .lock()
            .iter()
            .map(|row| row.event_id)
            .max()
            .unwrap_or(0))
    }

    async fn at_or_before(&self, tick_id: u64) -> Result<Option<EventEntry>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|row| row.tick_id <= tick_id)
            .max_by_key(|row| (row.tick_id, row.event_id))
            .copied())
    }

    async fn range(&self, from: u64, to: u64) -> Result<Vec<EventEntry>> {
        let mut rows: Vec<EventEntry> = self
            .rows
            .lock()
            .iter()
            .filter(|row| row.tick_id >= from && row.tick_id <= to)
            .copied()
            .collect();
        rows.sort_by(|a, b| (b.tick_id, b.event_id).cmp(&(a.tick_id, a.event_id)));
        Ok(rows)
    }

    async fn drop_series(&self) -> Result<()> {
        self.rows.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn entry(event_id: u64, tick_id: u64, value: f64) -> EventEntry {
        EventEntry {
            event_id,
            tick_id,
            value,
        }
    }

    #[tokio::test]
    async fn test_memory_queries() {
        let store = MemoryRowStore::with_rows(
            "t",
            vec![entry(1, 10, 1.0), entry(2, 20, 2.0), entry(3, 30, 3.0)],
        );

        assert_eq!(store.max_event_id().await.unwrap(), 3);
        assert_eq!(
            store.latest(2).await.unwrap(),
            vec![entry(3, 30, 3.0), entry(2, 20, 2.0)]
        );
        assert_eq!(
            store.at_or_before(25).await.unwrap(),
            Some(entry(2, 20, 2.0))
        );
        assert_eq!(store.at_or_before(5).await.unwrap(), None);
        assert_eq!(
            store.range(10, 20).await.unwrap(),
            vec![entry(2, 20, 2.0), entry(1, 10, 1.0)]
        );
    }

    #[tokio::test]
    async fn test_memory_failure_switch() {
        let store = MemoryRowStore::new("t");
        store.set_failing(true);
        assert!(store.insert(&entry(1, 1, 1.0)).await.is_err());
        store.set_failing(false);
        store.insert(&entry(1, 1, 1.0)).await.unwrap();
        assert!(store.insert(&entry(1, 2, 2.0)).await.is_err());
        assert_eq!(store.row_count(), 1);
    }
}
