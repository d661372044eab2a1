//! Per-device archive wiring
//!
//! Each archived variable or calculated element owns one [`EventStorage`]
//! series. Where the rows live depends on the backend:
//! - SQLite, table layout: one table `<device>/<series>` per series
//! - SQLite, column layout: one table `<device>`, one column per series
//! - memory: a [`MemoryRowStore`] per series, kept in a shared registry
//!
//! Device, variable and element ids may not contain [`SERIES_SEPARATOR`].

use crate::error::{AcqError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use voltage_archive::{
    series_table, ArchiveError, EventEntry, EventStorage, MemoryRowStore, RowStore,
    SqliteColumnStore, SqliteTableStore, SERIES_SEPARATOR,
};

/// Reject ids that cannot name an archive series
pub fn check_id(what: &str, id: &str) -> Result<()> {
    if id.contains(SERIES_SEPARATOR) {
        return Err(AcqError::config(format!(
            "{} id '{}' must not contain '{}'",
            what, id, SERIES_SEPARATOR
        )));
    }
    Ok(())
}

/// Row layout of the SQLite archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveLayout {
    #[default]
    Table,
    Column,
}

/// Registry of in-memory row stores, shared across device rebuilds
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    stores: Arc<DashMap<String, Arc<MemoryRowStore>>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store of `device`/`series`, if it was ever opened
    pub fn store(&self, device: &str, series: &str) -> Option<Arc<MemoryRowStore>> {
        self.stores
            .get(&Self::key(device, series))
            .map(|entry| Arc::clone(entry.value()))
    }

    fn key(device: &str, series: &str) -> String {
        format!("{}{}{}", device, SERIES_SEPARATOR, series)
    }

    fn get_or_create(&self, device: &str, series: &str) -> Arc<MemoryRowStore> {
        let key = Self::key(device, series);
        Arc::clone(
            self.stores
                .entry(key.clone())
                .or_insert_with(|| Arc::new(MemoryRowStore::new(key)))
                .value(),
        )
    }
}

#[derive(Clone)]
pub enum ArchiveBackend {
    Sqlite {
        pool: SqlitePool,
        layout: ArchiveLayout,
    },
    Memory(MemoryArchive),
}

/// Archive series of one device
pub struct DeviceArchive {
    backend: ArchiveBackend,
    device_id: String,
    capacity: usize,
    series: HashMap<String, EventStorage>,
}

impl DeviceArchive {
    pub fn new(backend: ArchiveBackend, device_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            backend,
            device_id: device_id.into(),
            capacity,
            series: HashMap::new(),
        }
    }

    fn store_for(&self, series_id: &str) -> Result<Arc<dyn RowStore>> {
        let store: Arc<dyn RowStore> = match &self.backend {
            ArchiveBackend::Sqlite {
                pool,
                layout: ArchiveLayout::Table,
            } => Arc::new(SqliteTableStore::new(
                pool.clone(),
                series_table(&self.device_id, series_id)?,
            )?),
            ArchiveBackend::Sqlite {
                pool,
                layout: ArchiveLayout::Column,
            } => Arc::new(SqliteColumnStore::new(
                pool.clone(),
                &self.device_id,
                series_id,
            )?),
            ArchiveBackend::Memory(registry) => {
                registry.get_or_create(&self.device_id, series_id)
            },
        };
        Ok(store)
    }

    /// Open a series and load its window; no-op when already open
    pub async fn open_series(&mut self, series_id: &str) -> Result<()> {
        if self.series.contains_key(series_id) {
            return Ok(());
        }
        let storage = EventStorage::open(self.store_for(series_id)?, self.capacity).await?;
        debug!(
            "Archive series {} opened for device {} (last event {})",
            series_id,
            self.device_id,
            storage.last_event_id()?
        );
        self.series.insert(series_id.to_string(), storage);
        Ok(())
    }

    /// Delete a series' durable rows; no-op for unknown series
    pub async fn drop_series(&mut self, series_id: &str) -> Result<()> {
        if let Some(storage) = self.series.get(series_id) {
            storage.drop_series().await?;
            self.series.remove(series_id);
            info!(
                "Archive series {} dropped for device {}",
                series_id, self.device_id
            );
        }
        Ok(())
    }

    pub fn series(&self, series_id: &str) -> Option<&EventStorage> {
        self.series.get(series_id)
    }

    pub fn contains(&self, series_id: &str) -> bool {
        self.series.contains_key(series_id)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append to an open series; `Ok(None)` for unknown series or rejected values
    pub async fn append(&self, series_id: &str, tick: u64, value: f64) -> Result<Option<EventEntry>> {
        match self.series.get(series_id) {
            Some(storage) => Ok(storage.append(tick, value).await?),
            None => Ok(None),
        }
    }

    /// Highest tick held in any open series window
    pub fn last_tick(&self) -> Option<u64> {
        self.series
            .values()
            .filter_map(|storage| storage.content().ok())
            .flatten()
            .map(|entry| entry.tick_id)
            .max()
    }

    /// Resize every series window.
    ///
    /// Every series is checked before any window changes, so the device
    /// capacity and the series windows stay in step.
    pub fn change_buffer_size(&mut self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(ArchiveError::InvalidCapacity.into());
        }
        for storage in self.series.values() {
            if !storage.is_initialized() {
                return Err(ArchiveError::NotInitialized(storage.name().to_string()).into());
            }
            if storage.is_busy() {
                return Err(ArchiveError::Busy(storage.name().to_string()).into());
            }
        }
        for storage in self.series.values() {
            storage.change_buffer_size(capacity)?;
        }
        self.capacity = capacity;
        Ok(())
    }
}
