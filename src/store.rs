use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde_json::Value;

use crate::error::PersistenceError;
use crate::merge::MergeResult;
use crate::util::now_utc_string;

pub const DB_SCHEMA_VERSION: &str = "0.1.0";

/// A parsed record with a stable key inside its collection.
pub trait Record: Serialize {
    fn key(&self) -> &str;
}

/// Lookup and upsert by `(collection, key)`.
pub trait RecordStore {
    fn find_by_key(&mut self, collection: &str, key: &str) -> Result<Option<Value>, PersistenceError>;

    /// Writes `record`, reporting whether the key already existed.
    fn upsert(&mut self, collection: &str, key: &str, record: &Value) -> Result<MergeResult, PersistenceError>;

    /// Makes pending writes durable.
    fn flush(&mut self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: HashMap<(String, String), Value>,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn get(&self, collection: &str, key: &str) -> Option<&Value> {
        self.records.get(&(collection.to_string(), key.to_string()))
    }
}

impl RecordStore for MemoryStore {
    fn find_by_key(&mut self, collection: &str, key: &str) -> Result<Option<Value>, PersistenceError> {
        Ok(self.get(collection, key).cloned())
    }

    fn upsert(&mut self, collection: &str, key: &str, record: &Value) -> Result<MergeResult, PersistenceError> {
        let previous = self
            .records
            .insert((collection.to_string(), key.to_string()), record.clone());
        Ok(match previous {
            Some(_) => MergeResult::Updated,
            None => MergeResult::Created,
        })
    }
}

/// Records stored as JSON text in a local SQLite database.
///
/// Upserts are grouped into transactions of `batch_size` writes; call
/// [`RecordStore::flush`] to commit the tail.
pub struct SqliteStore {
    connection: Connection,
    batch_size: usize,
    pending: usize,
}

impl SqliteStore {
    pub fn open(path: &Path, batch_size: usize) -> Result<Self> {
        let connection =
            Connection::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        configure_connection(&connection)?;
        Self::with_connection(connection, batch_size)
    }

    pub fn with_connection(connection: Connection, batch_size: usize) -> Result<Self> {
        ensure_schema(&connection)?;
        Ok(Self {
            connection,
            batch_size: batch_size.max(1),
            pending: 0,
        })
    }

    pub fn count(&self, collection: &str) -> Result<i64> {
        let count = self.connection.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1",
            [collection],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Opens a batch transaction unless one is already open. A failed
    /// statement leaves the transaction open, so the connection state is
    /// checked rather than the write counter.
    fn begin_if_idle(&mut self) -> rusqlite::Result<()> {
        if self.connection.is_autocommit() {
            self.connection.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    fn commit(&mut self) -> rusqlite::Result<()> {
        if !self.connection.is_autocommit() {
            self.connection.execute_batch("COMMIT")?;
        }
        self.pending = 0;
        Ok(())
    }

    fn write(&mut self, collection: &str, key: &str, body: &str) -> rusqlite::Result<MergeResult> {
        self.begin_if_idle()?;

        let exists = self
            .connection
            .query_row(
                "SELECT 1 FROM records WHERE collection = ?1 AND key = ?2",
                params![collection, key],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        self.connection.execute(
            "
            INSERT INTO records(collection, key, body, updated_at)
            VALUES(?1, ?2, ?3, ?4)
            ON CONFLICT(collection, key) DO UPDATE SET
              body=excluded.body,
              updated_at=excluded.updated_at
            ",
            params![collection, key, body, now_utc_string()],
        )?;
        self.pending += 1;

        if self.pending >= self.batch_size {
            self.commit()?;
        }

        Ok(if exists {
            MergeResult::Updated
        } else {
            MergeResult::Created
        })
    }
}

impl RecordStore for SqliteStore {
    fn find_by_key(&mut self, collection: &str, key: &str) -> Result<Option<Value>, PersistenceError> {
        let body: Option<String> = self
            .connection
            .query_row(
                "SELECT body FROM records WHERE collection = ?1 AND key = ?2",
                params![collection, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| PersistenceError::new(collection, key, err))?;

        body.map(|body| serde_json::from_str(&body))
            .transpose()
            .map_err(|err| PersistenceError::new(collection, key, err))
    }

    fn upsert(&mut self, collection: &str, key: &str, record: &Value) -> Result<MergeResult, PersistenceError> {
        let body = serde_json::to_string(record).map_err(|err| PersistenceError::new(collection, key, err))?;
        self.write(collection, key, &body)
            .map_err(|err| PersistenceError::new(collection, key, err))
    }

    fn flush(&mut self) -> Result<(), PersistenceError> {
        let pending = self.pending;
        self.commit()
            .map_err(|err| PersistenceError::commit(pending, err))
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS records (
              collection TEXT NOT NULL,
              key TEXT NOT NULL,
              body TEXT NOT NULL,
              updated_at TEXT NOT NULL,
              PRIMARY KEY (collection, key)
            );

            CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection);
            ",
        )
        .context("failed to initialize record store schema")?;

    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now_utc_string()],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn memory_sqlite(batch_size: usize) -> SqliteStore {
        SqliteStore::with_connection(Connection::open_in_memory().unwrap(), batch_size).unwrap()
    }

    #[test]
    fn memory_store_reports_created_then_updated() {
        let mut store = MemoryStore::default();
        let record = json!({"key": "1000000"});
        assert_eq!(store.len(), 0);

        assert_eq!(store.find_by_key("jmdict", "1000000").unwrap(), None);
        assert_eq!(store.upsert("jmdict", "1000000", &record).unwrap(), MergeResult::Created);
        assert_eq!(store.upsert("jmdict", "1000000", &record).unwrap(), MergeResult::Updated);
        assert_eq!(store.find_by_key("jmdict", "1000000").unwrap(), Some(record));
        assert_eq!(store.find_by_key("jmnedict", "1000000").unwrap(), None);
    }

    #[test]
    fn sqlite_store_round_trips_records_per_collection() {
        let mut store = memory_sqlite(2);
        let kanji = json!({"key": "4e9c", "stroke_counts": [7]});
        let updated = json!({"key": "4e9c", "stroke_counts": [7, 6]});

        assert_eq!(store.upsert("kanji", "4e9c", &kanji).unwrap(), MergeResult::Created);
        assert_eq!(store.upsert("kanji", "4e9c", &updated).unwrap(), MergeResult::Updated);
        assert_eq!(store.upsert("jmdict", "4e9c", &kanji).unwrap(), MergeResult::Created);
        store.flush().unwrap();

        assert_eq!(store.find_by_key("kanji", "4e9c").unwrap(), Some(updated));
        assert_eq!(store.find_by_key("jmdict", "4e9c").unwrap(), Some(kanji));
        assert_eq!(store.count("kanji").unwrap(), 1);
        assert_eq!(store.count("jmnedict").unwrap(), 0);
    }

    #[test]
    fn sqlite_store_sees_uncommitted_writes_within_a_batch() {
        let mut store = memory_sqlite(100);
        store.upsert("kanji", "4e00", &json!({"key": "4e00"})).unwrap();

        assert!(store.find_by_key("kanji", "4e00").unwrap().is_some());
        store.flush().unwrap();
        store.flush().unwrap();
    }

    #[test]
    fn sqlite_store_recovers_from_a_rejected_write() {
        let mut store = memory_sqlite(100);
        store
            .connection
            .execute_batch(
                "CREATE TRIGGER reject_key BEFORE INSERT ON records
                 WHEN NEW.key = 'bad'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let err = store.upsert("kanji", "bad", &json!({"key": "bad"})).unwrap_err();
        assert!(err.to_string().contains("kanji/bad"));

        assert_eq!(
            store.upsert("kanji", "good", &json!({"key": "good"})).unwrap(),
            MergeResult::Created
        );
        store.flush().unwrap();

        assert!(store.connection.is_autocommit());
        assert_eq!(store.count("kanji").unwrap(), 1);
        assert!(store.find_by_key("kanji", "bad").unwrap().is_none());
    }

    #[test]
    fn failed_write_keeps_earlier_writes_in_the_same_batch() {
        let mut store = memory_sqlite(100);
        store
            .connection
            .execute_batch(
                "CREATE TRIGGER reject_key BEFORE INSERT ON records
                 WHEN NEW.key = 'bad'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        store.upsert("kanji", "4e00", &json!({"key": "4e00"})).unwrap();
        assert!(store.upsert("kanji", "bad", &json!({"key": "bad"})).is_err());
        store.upsert("kanji", "4e9c", &json!({"key": "4e9c"})).unwrap();
        store.flush().unwrap();

        assert_eq!(store.count("kanji").unwrap(), 2);
    }
}
