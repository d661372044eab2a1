//! Integration tests for EventStorage over SQLite row stores
//!
//! Uses a single-connection in-memory pool so every query sees the same
//! database, plus a temp file for restart behaviour.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::sync::Arc;
use voltage_archive::{
    ArchiveError, Candidate, EventEntry, EventStorage, RowStore, SqliteColumnStore,
    SqliteTableStore,
};

async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database")
}

fn entry(event_id: u64, tick_id: u64, value: f64) -> EventEntry {
    EventEntry {
        event_id,
        tick_id,
        value,
    }
}

async fn seed_table(pool: &SqlitePool, table: &str, rows: &[(i64, i64, f64)]) {
    sqlx::query(&format!(
        "CREATE TABLE \"{}\" (eventId INTEGER PRIMARY KEY, tickId INTEGER, value REAL)",
        table
    ))
    .execute(pool)
    .await
    .unwrap();
    for (event_id, tick_id, value) in rows {
        sqlx::query(&format!(
            "INSERT INTO \"{}\" (eventId, tickId, value) VALUES (?, ?, ?)",
            table
        ))
        .bind(event_id)
        .bind(tick_id)
        .bind(value)
        .execute(pool)
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn test_init_loads_seeded_rows() {
    let pool = memory_pool().await;
    seed_table(
        &pool,
        "events",
        &[(1, 100, 1.5), (2, 101, 2.5), (3, 102, 3.5), (4, 103, 4.5)],
    )
    .await;

    let store = Arc::new(SqliteTableStore::new(pool, "events").unwrap());
    let storage = EventStorage::open(store, 4).await.unwrap();

    assert_eq!(storage.last_event_id().unwrap(), 4);
    assert_eq!(
        storage.content().unwrap(),
        vec![
            entry(1, 100, 1.5),
            entry(2, 101, 2.5),
            entry(3, 102, 3.5),
            entry(4, 103, 4.5),
        ]
    );
}

#[tokio::test]
async fn test_init_holds_min_of_capacity_and_rows() {
    let pool = memory_pool().await;
    let rows: Vec<(i64, i64, f64)> = (1..=7).map(|i| (i, i * 10, i as f64)).collect();
    seed_table(&pool, "events", &rows).await;

    let store = Arc::new(SqliteTableStore::new(pool.clone(), "events").unwrap());
    let small = EventStorage::open(store.clone(), 3).await.unwrap();
    let ids: Vec<u64> = small.content().unwrap().iter().map(|e| e.event_id).collect();
    assert_eq!(ids, vec![5, 6, 7]);

    let large = EventStorage::open(store, 20).await.unwrap();
    assert_eq!(large.len().unwrap(), 7);
    assert_eq!(large.last_event_id().unwrap(), 7);
}

#[tokio::test]
async fn test_refresh_skips_zero_and_reverses_ids() {
    let pool = memory_pool().await;
    let store = Arc::new(SqliteTableStore::new(pool, "events").unwrap());
    let storage = EventStorage::open(store.clone(), 3).await.unwrap();

    let appended = storage
        .refresh(&[
            Candidate::new(10, 5.0),
            Candidate::new(11, 0.0),
            Candidate::new(12, 7.0),
        ])
        .await
        .unwrap();

    assert_eq!(appended.len(), 2);
    assert_eq!(appended[0], entry(2, 12, 7.0));
    assert_eq!(appended[1], entry(1, 10, 5.0));
    assert_eq!(store.max_event_id().await.unwrap(), 2);
}

#[tokio::test]
async fn test_get_event_is_as_of_query() {
    let pool = memory_pool().await;
    let store = Arc::new(SqliteTableStore::new(pool, "events").unwrap());
    let storage = EventStorage::open(store, 2).await.unwrap();

    storage.append(10, 1.0).await.unwrap();
    storage.append(20, 2.0).await.unwrap();
    storage.append(30, 3.0).await.unwrap();

    // window only holds the last two, history still answers from storage
    assert_eq!(storage.len().unwrap(), 2);
    assert_eq!(storage.get_event(15).await.unwrap(), Some(entry(1, 10, 1.0)));
    assert_eq!(storage.get_event(30).await.unwrap(), Some(entry(3, 30, 3.0)));
    assert_eq!(storage.get_event(5).await.unwrap(), None);

    let events = storage.get_events(10, 20).await.unwrap();
    assert_eq!(events, vec![entry(2, 20, 2.0), entry(1, 10, 1.0)]);
    assert!(storage.get_events(30, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_zero_never_written() {
    let pool = memory_pool().await;
    let store = Arc::new(SqliteTableStore::new(pool, "events").unwrap());
    let storage = EventStorage::open(store.clone(), 2).await.unwrap();

    assert_eq!(storage.append(1, 0.0).await.unwrap(), None);
    assert_eq!(store.max_event_id().await.unwrap(), 0);
    assert!(store.latest(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_column_layout_shares_device_table() {
    let pool = memory_pool().await;
    let temp = Arc::new(SqliteColumnStore::new(pool.clone(), "plc1", "temp").unwrap());
    let level = Arc::new(SqliteColumnStore::new(pool.clone(), "plc1", "level").unwrap());

    let temp_storage = EventStorage::open(temp.clone(), 5).await.unwrap();
    let level_storage = EventStorage::open(level.clone(), 5).await.unwrap();

    temp_storage.append(1, 21.5).await.unwrap();
    level_storage.append(1, 3.0).await.unwrap();
    temp_storage.append(2, 22.0).await.unwrap();

    assert_eq!(
        temp.latest(10).await.unwrap(),
        vec![entry(2, 2, 22.0), entry(1, 1, 21.5)]
    );
    assert_eq!(level.latest(10).await.unwrap(), vec![entry(1, 1, 3.0)]);
    assert_eq!(level.at_or_before(2).await.unwrap(), Some(entry(1, 1, 3.0)));

    // re-opening sees the persisted columns
    let reopened = EventStorage::open(temp.clone(), 5).await.unwrap();
    assert_eq!(reopened.last_event_id().unwrap(), 2);

    level_storage.drop_series().await.unwrap();
    let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info('plc1')")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert!(columns.contains(&"temp".to_string()));
    assert!(!columns.contains(&"level".to_string()));
    assert!(!columns.contains(&"level/eid".to_string()));
    let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM plc1 WHERE \"temp\" IS NULL")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(orphans, 0);
}

#[tokio::test]
async fn test_column_names_do_not_collide() {
    let pool = memory_pool().await;
    let a = Arc::new(SqliteColumnStore::new(pool.clone(), "plc1", "a").unwrap());
    let a_eid = Arc::new(SqliteColumnStore::new(pool.clone(), "plc1", "a_eid").unwrap());
    assert!(matches!(
        SqliteColumnStore::new(pool.clone(), "plc1", "a/eid"),
        Err(ArchiveError::InvalidIdentifier(_))
    ));

    let a_storage = EventStorage::open(a.clone(), 5).await.unwrap();
    let a_eid_storage = EventStorage::open(a_eid.clone(), 5).await.unwrap();
    a_storage.append(1, 5.0).await.unwrap();
    a_eid_storage.append(2, 9.0).await.unwrap();

    assert_eq!(a_storage.get_events(0, 10).await.unwrap(), vec![entry(1, 1, 5.0)]);
    assert_eq!(a_eid_storage.get_events(0, 10).await.unwrap(), vec![entry(1, 2, 9.0)]);
}

#[tokio::test]
async fn test_column_layout_keeps_every_sample() {
    let dir = tempfile::tempdir().unwrap();
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("archive.db"))
        .create_if_missing(true);

    {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await
            .unwrap();
        let store = Arc::new(SqliteColumnStore::new(pool.clone(), "plc1", "temp").unwrap());
        let storage = EventStorage::open(store.clone(), 4).await.unwrap();
        storage.append(5, 3.0).await.unwrap();
        storage.append(5, 4.0).await.unwrap();

        assert_eq!(
            store.latest(10).await.unwrap(),
            vec![entry(2, 5, 4.0), entry(1, 5, 3.0)]
        );
        assert_eq!(storage.get_event(5).await.unwrap(), Some(entry(2, 5, 4.0)));
        pool.close().await;
    }

    // a later run writing the same tick adds a row next to the old ones
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    let store = Arc::new(SqliteColumnStore::new(pool, "plc1", "temp").unwrap());
    let storage = EventStorage::open(store.clone(), 4).await.unwrap();
    assert_eq!(
        storage.content().unwrap(),
        vec![entry(1, 5, 3.0), entry(2, 5, 4.0)]
    );

    storage.append(5, 9.0).await.unwrap();
    assert_eq!(
        store.latest(10).await.unwrap(),
        vec![entry(3, 5, 9.0), entry(2, 5, 4.0), entry(1, 5, 3.0)]
    );
}

#[tokio::test]
async fn test_restart_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.db");
    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true);

    {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await
            .unwrap();
        let store = Arc::new(SqliteTableStore::new(pool.clone(), "plc1_temp").unwrap());
        let storage = EventStorage::open(store, 2).await.unwrap();
        for tick in 1..=3u64 {
            storage.append(tick, tick as f64 * 1.5).await.unwrap();
        }
        pool.close().await;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    let store = Arc::new(SqliteTableStore::new(pool, "plc1_temp").unwrap());
    let storage = EventStorage::open(store, 2).await.unwrap();

    assert_eq!(storage.last_event_id().unwrap(), 3);
    assert_eq!(
        storage.content().unwrap(),
        vec![entry(2, 2, 3.0), entry(3, 3, 4.5)]
    );
    let next = storage.append(4, 6.0).await.unwrap().unwrap();
    assert_eq!(next.event_id, 4);
}

#[tokio::test]
async fn test_concurrent_refresh_is_rejected() {
    let pool = memory_pool().await;
    let store = Arc::new(SqliteTableStore::new(pool, "events").unwrap());
    let storage = Arc::new(EventStorage::open(store, 1).await.unwrap());

    let mut outcomes = Vec::new();
    let handles: Vec<_> = (1..=8u64)
        .map(|tick| {
            let storage = storage.clone();
            tokio::spawn(async move { storage.refresh(&[Candidate::new(tick, 1.0)]).await })
        })
        .collect();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    // every call either succeeded or failed fast, never interleaved
    for outcome in &outcomes {
        assert!(matches!(outcome, Ok(_) | Err(ArchiveError::Busy(_))));
    }
    let appended: usize = outcomes
        .iter()
        .filter_map(|o| o.as_ref().ok())
        .map(|v| v.len())
        .sum();
    assert_eq!(storage.last_event_id().unwrap(), appended as u64);
}
