//! Bounded event storage

use crate::entry::{Candidate, EventEntry};
use crate::error::{ArchiveError, Result};
use crate::store::RowStore;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// In-memory window over the most recent rows
struct Window {
    entries: BTreeMap<u64, EventEntry>,
    capacity: usize,
    /// Last allocated event id
    cursor: u64,
}

impl Window {
    fn insert(&mut self, entry: EventEntry) {
        self.entries.insert(entry.event_id, entry);
        self.evict();
    }

    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_first();
        }
    }

    fn contains(&self, candidate: &Candidate) -> bool {
        self.entries.values().any(|entry| entry.matches(candidate))
    }

    fn last(&self) -> Option<EventEntry> {
        self.entries.last_key_value().map(|(_, entry)| *entry)
    }
}

/// Clears the busy flag when a structural operation ends
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Bounded window of one archived series backed by a durable [`RowStore`]
///
/// - `eventId` is allocated here, strictly increasing, never by callers
/// - values that are not strictly positive are never stored
/// - the window is updated only after the durable write succeeded
/// - `refresh`, `change_buffer_size` and `init` are mutually exclusive and
///   fail fast with [`ArchiveError::Busy`] instead of queueing
pub struct EventStorage {
    store: Arc<dyn RowStore>,
    window: Mutex<Option<Window>>,
    busy: AtomicBool,
}

impl EventStorage {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self {
            store,
            window: Mutex::new(None),
            busy: AtomicBool::new(false),
        }
    }

    /// Build and initialize in one step
    pub async fn open(store: Arc<dyn RowStore>, capacity: usize) -> Result<Self> {
        let storage = Self::new(store);
        storage.init(capacity).await?;
        Ok(storage)
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    fn acquire(&self) -> Result<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| ArchiveError::Busy(self.name().to_string()))?;
        Ok(BusyGuard(&self.busy))
    }

    fn not_initialized(&self) -> ArchiveError {
        ArchiveError::NotInitialized(self.name().to_string())
    }

    fn with_window<T>(&self, f: impl FnOnce(&mut Window) -> T) -> Result<T> {
        let mut guard = self.window.lock();
        match guard.as_mut() {
            Some(window) => Ok(f(window)),
            None => Err(self.not_initialized()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.window.lock().is_some()
    }

    /// A structural operation is in flight
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Rebuild the window from the `capacity` most recent durable rows.
    ///
    /// Always reconstructs from storage, so calling it again after a crash
    /// or a failed write resynchronizes the window.
    pub async fn init(&self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(ArchiveError::InvalidCapacity);
        }
        let _guard = self.acquire()?;

        self.store.create_if_absent().await?;
        let rows = self.store.latest(capacity).await?;
        let cursor = self.store.max_event_id().await?;

        let entries: BTreeMap<u64, EventEntry> =
            rows.into_iter().map(|row| (row.event_id, row)).collect();
        debug!(
            "Archive {} loaded {} rows, last event {}",
            self.name(),
            entries.len(),
            cursor
        );

        *self.window.lock() = Some(Window {
            entries,
            capacity,
            cursor,
        });
        Ok(())
    }

    /// Append one sample.
    ///
    /// Returns `None` without touching storage when `value` is not strictly
    /// positive.
    pub async fn append(&self, tick_id: u64, value: f64) -> Result<Option<EventEntry>> {
        let event_id = self.with_window(|window| {
            if value > 0.0 {
                window.cursor += 1;
                Some(window.cursor)
            } else {
                None
            }
        })?;

        let Some(event_id) = event_id else {
            return Ok(None);
        };

        let entry = EventEntry {
            event_id,
            tick_id,
            value,
        };
        self.store.insert(&entry).await?;
        self.with_window(|window| window.insert(entry))?;
        Ok(Some(entry))
    }

    /// Offer the latest observation of every slot.
    ///
    /// Exactly `capacity` candidates are expected. A candidate is appended
    /// unless its `(tickId, value)` pair is already in the window or its
    /// value is not positive. Accepted candidates are written last input
    /// first; event ids follow input order, so the last accepted input gets
    /// the highest id. Returns the new entries in write order.
    pub async fn refresh(&self, candidates: &[Candidate]) -> Result<Vec<EventEntry>> {
        if !self.is_initialized() {
            return Err(self.not_initialized());
        }
        let _guard = self.acquire()?;

        let planned = self.with_window(|window| {
            if candidates.len() != window.capacity {
                return Err(ArchiveError::CandidateCount {
                    expected: window.capacity,
                    actual: candidates.len(),
                });
            }

            let mut accepted: Vec<Candidate> = Vec::new();
            for candidate in candidates.iter().rev() {
                let duplicate = window.contains(candidate) || accepted.contains(candidate);
                if candidate.value > 0.0 && !duplicate {
                    accepted.push(*candidate);
                }
            }

            // Reserve one id block: the first input owns the lowest id
            let base = window.cursor;
            let count = accepted.len() as u64;
            window.cursor += count;

            Ok(accepted
                .into_iter()
                .enumerate()
                .map(|(position, candidate)| EventEntry {
                    event_id: base + count - position as u64,
                    tick_id: candidate.tick_id,
                    value: candidate.value,
                })
                .collect::<Vec<_>>())
        })??;

        let mut appended = Vec::with_capacity(planned.len());
        for entry in planned {
            self.store.insert(&entry).await?;
            self.with_window(|window| window.insert(entry))?;
            appended.push(entry);
        }

        if !appended.is_empty() {
            debug!("Archive {} refreshed {} entries", self.name(), appended.len());
        }
        Ok(appended)
    }

    /// Resize the window. Shrinking evicts the oldest entries immediately.
    pub fn change_buffer_size(&self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(ArchiveError::InvalidCapacity);
        }
        if !self.is_initialized() {
            return Err(self.not_initialized());
        }
        let _guard = self.acquire()?;

        self.with_window(|window| {
            window.capacity = capacity;
            window.evict();
        })?;
        info!("Archive {} buffer size changed to {}", self.name(), capacity);
        Ok(())
    }

    /// Entry with the highest event id in the window
    pub fn get_last_event(&self) -> Result<Option<EventEntry>> {
        self.with_window(|window| window.last())
    }

    pub fn get_last_event_tick(&self) -> Result<Option<u64>> {
        Ok(self.get_last_event()?.map(|entry| entry.tick_id))
    }

    /// Durable value as of `tick_id`: the latest row at or before it
    pub async fn get_event(&self, tick_id: u64) -> Result<Option<EventEntry>> {
        if !self.is_initialized() {
            return Err(self.not_initialized());
        }
        self.store.at_or_before(tick_id).await
    }

    /// Durable rows with `from <= tickId <= to`, newest first.
    /// Inverted bounds yield an empty list.
    pub async fn get_events(&self, from: u64, to: u64) -> Result<Vec<EventEntry>> {
        if !self.is_initialized() {
            return Err(self.not_initialized());
        }
        if from > to {
            return Ok(Vec::new());
        }
        self.store.range(from, to).await
    }

    /// Last allocated event id
    pub fn last_event_id(&self) -> Result<u64> {
        self.with_window(|window| window.cursor)
    }

    /// Current window in ascending event id order
    pub fn content(&self) -> Result<Vec<EventEntry>> {
        self.with_window(|window| window.entries.values().copied().collect())
    }

    pub fn capacity(&self) -> Result<usize> {
        self.with_window(|window| window.capacity)
    }

    pub fn len(&self) -> Result<usize> {
        self.with_window(|window| window.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove the durable series and forget the window
    pub async fn drop_series(&self) -> Result<()> {
        let _guard = self.acquire()?;
        self.store.drop_series().await?;
        *self.window.lock() = None;
        info!("Archive {} dropped", self.name());
        Ok(())
    }
}
