//! SQLite row stores
//!
//! Two layouts are supported:
//! - table per series: `"<device>/<series>" (eventId INTEGER PRIMARY KEY, tickId INTEGER, value REAL)`
//! - column per series: `"<device>" (rowId INTEGER PRIMARY KEY AUTOINCREMENT, tickId INTEGER,
//!   "<series>" REAL, "<series>/eid" INTEGER, ...)`
//!
//! Every append writes a new row in either layout; stored rows are never
//! updated. [`SERIES_SEPARATOR`] may not appear in device or series names,
//! which keeps derived table and column names unique.

use crate::entry::EventEntry;
use crate::error::{ArchiveError, Result};
use crate::store::RowStore;
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::debug;

/// Joins device and series names in derived identifiers
pub const SERIES_SEPARATOR: char = '/';

/// Reject names that would make derived identifiers ambiguous
pub fn check_series_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(SERIES_SEPARATOR) {
        return Err(ArchiveError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Table name of `series` under the table-per-series layout
pub fn series_table(device: &str, series: &str) -> Result<String> {
    check_series_name(device)?;
    check_series_name(series)?;
    Ok(format!("{}{}{}", device, SERIES_SEPARATOR, series))
}

/// Quote a SQLite identifier
pub fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() || name.contains('\0') {
        return Err(ArchiveError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

fn hydrate(row: &SqliteRow) -> Result<EventEntry> {
    Ok(EventEntry {
        event_id: row.try_get::<i64, _>("eventId")? as u64,
        tick_id: row.try_get::<i64, _>("tickId")? as u64,
        value: row.try_get::<f64, _>("value")?,
    })
}

// ============================================================================
// Table per series
// ============================================================================

pub struct SqliteTableStore {
    pool: SqlitePool,
    name: String,
    table: String,
}

impl SqliteTableStore {
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Result<Self> {
        let name = table.into();
        let table = quote_ident(&name)?;
        Ok(Self { pool, name, table })
    }
}

#[async_trait]
impl RowStore for SqliteTableStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_if_absent(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                eventId INTEGER PRIMARY KEY,
                tickId INTEGER NOT NULL,
                value REAL NOT NULL
            )
            "#,
            self.table
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert(&self, entry: &EventEntry) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (eventId, tickId, value) VALUES (?, ?, ?)",
            self.table
        ))
        .bind(entry.event_id as i64)
        .bind(entry.tick_id as i64)
        .bind(entry.value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest(&self, limit: usize) -> Result<Vec<EventEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT eventId, tickId, CAST(value AS REAL) AS value
            FROM {}
            ORDER BY eventId DESC
            LIMIT ?
            "#,
            self.table
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(hydrate).collect()
    }

    async fn max_event_id(&self) -> Result<u64> {
        let row = sqlx::query(&format!(
            "SELECT COALESCE(MAX(eventId), 0) AS maxId FROM {}",
            self.table
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("maxId")? as u64)
    }

    async fn at_or_before(&self, tick_id: u64) -> Result<Option<EventEntry>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT eventId, tickId, CAST(value AS REAL) AS value
            FROM {}
            WHERE tickId <= ?
            ORDER BY tickId DESC, eventId DESC
            LIMIT 1
            "#,
            self.table
        ))
        .bind(tick_id as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(hydrate).transpose()
    }

    async fn range(&self, from: u64, to: u64) -> Result<Vec<EventEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT eventId, tickId, CAST(value AS REAL) AS value
            FROM {}
            WHERE tickId BETWEEN ? AND ?
            ORDER BY tickId DESC, eventId DESC
            "#,
            self.table
        ))
        .bind(from as i64)
        .bind(to as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(hydrate).collect()
    }

    async fn drop_series(&self) -> Result<()> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.table))
            .execute(&self.pool)
            .await?;
        debug!("Dropped archive table {}", self.name);
        Ok(())
    }
}

// ============================================================================
// Column per series
// ============================================================================

pub struct SqliteColumnStore {
    pool: SqlitePool,
    name: String,
    table: String,
    value_column: String,
    id_column: String,
}

impl SqliteColumnStore {
    /// Series `column` inside the shared device table `table`
    pub fn new(pool: SqlitePool, table: &str, column: &str) -> Result<Self> {
        check_series_name(column)?;
        Ok(Self {
            pool,
            name: format!("{}{}{}", table, SERIES_SEPARATOR, column),
            table: quote_ident(table)?,
            value_column: quote_ident(column)?,
            id_column: quote_ident(&format!("{}{}eid", column, SERIES_SEPARATOR))?,
        })
    }

    async fn existing_columns(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", self.table))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(ArchiveError::from))
            .map(|name| name.and_then(|n| quote_ident(&n)))
            .collect()
    }

    fn select_columns(&self) -> String {
        format!(
            "{} AS eventId, tickId, CAST({} AS REAL) AS value",
            self.id_column, self.value_column
        )
    }
}

#[async_trait]
impl RowStore for SqliteColumnStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_if_absent(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                rowId INTEGER PRIMARY KEY AUTOINCREMENT,
                tickId INTEGER NOT NULL
            )
            "#,
            self.table
        ))
        .execute(&self.pool)
        .await?;

        let existing = self.existing_columns().await?;
        for (column, sql_type) in [(&self.value_column, "REAL"), (&self.id_column, "INTEGER")] {
            if !existing.contains(column) {
                sqlx::query(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    self.table, column, sql_type
                ))
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn insert(&self, entry: &EventEntry) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (tickId, {}, {}) VALUES (?, ?, ?)",
            self.table, self.value_column, self.id_column
        ))
        .bind(entry.tick_id as i64)
        .bind(entry.value)
        .bind(entry.event_id as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest(&self, limit: usize) -> Result<Vec<EventEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {columns}
            FROM {table}
            WHERE {id} IS NOT NULL
            ORDER BY {id} DESC
            LIMIT ?
            "#,
            columns = self.select_columns(),
            table = self.table,
            id = self.id_column
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(hydrate).collect()
    }

    async fn max_event_id(&self) -> Result<u64> {
        let row = sqlx::query(&format!(
            "SELECT COALESCE(MAX({}), 0) AS maxId FROM {}",
            self.id_column, self.table
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("maxId")? as u64)
    }

    async fn at_or_before(&self, tick_id: u64) -> Result<Option<EventEntry>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {columns}
            FROM {table}
            WHERE {id} IS NOT NULL AND tickId <= ?
            ORDER BY tickId DESC, {id} DESC
            LIMIT 1
            "#,
            columns = self.select_columns(),
            table = self.table,
            id = self.id_column
        ))
        .bind(tick_id as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(hydrate).transpose()
    }

    async fn range(&self, from: u64, to: u64) -> Result<Vec<EventEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {columns}
            FROM {table}
            WHERE {id} IS NOT NULL AND tickId BETWEEN ? AND ?
            ORDER BY tickId DESC, {id} DESC
            "#,
            columns = self.select_columns(),
            table = self.table,
            id = self.id_column
        ))
        .bind(from as i64)
        .bind(to as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(hydrate).collect()
    }

    async fn drop_series(&self) -> Result<()> {
        let existing = self.existing_columns().await?;
        if existing.contains(&self.id_column) {
            // Rows carry one series each
            sqlx::query(&format!(
                "DELETE FROM {} WHERE {} IS NOT NULL",
                self.table, self.id_column
            ))
            .execute(&self.pool)
            .await?;
        }
        for column in [&self.value_column, &self.id_column] {
            if existing.contains(column) {
                sqlx::query(&format!("ALTER TABLE {} DROP COLUMN {}", self.table, column))
                    .execute(&self.pool)
                    .await?;
            }
        }
        debug!("Dropped archive column {}", self.name);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("plc1_temp").unwrap(), "\"plc1_temp\"");
        assert_eq!(quote_ident("a\"b").unwrap(), "\"a\"\"b\"");
        assert!(quote_ident("").is_err());
    }

    #[test]
    fn test_series_names_cannot_collide() {
        assert_eq!(series_table("plc1", "temp").unwrap(), "plc1/temp");
        assert!(series_table("a/b", "c").is_err());
        assert!(series_table("a", "b/c").is_err());
        assert!(check_series_name("").is_err());
    }
}
