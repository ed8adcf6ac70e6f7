use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::ingest::DEFAULT_DB_FILENAME;
use crate::commands::inventory::MANIFEST_FILENAME;
use crate::model::SourceInventoryManifest;
use crate::util::read_json;

pub fn run(args: StatusArgs) -> Result<()> {
    let inventory_path = args.cache_root.join("manifests").join(MANIFEST_FILENAME);
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join(DEFAULT_DB_FILENAME));

    info!(cache_root = %args.cache_root.display(), "status requested");

    if inventory_path.exists() {
        let inventory: SourceInventoryManifest = read_json(&inventory_path)?;
        info!(
            generated_at = %inventory.generated_at,
            source_directory = %inventory.source_directory,
            source_count = inventory.source_count,
            "loaded inventory manifest"
        );
        for source in &inventory.sources {
            info!(
                kind = source.kind.as_str(),
                filename = %source.filename,
                bytes = source.bytes,
                sha256 = %source.sha256,
                "inventoried source"
            );
        }
    } else {
        warn!(path = %inventory_path.display(), "inventory manifest missing");
    }

    if db_path.exists() {
        let conn = Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("failed to open {}", db_path.display()))?;

        let schema_version = metadata_value(&conn, "db_schema_version")?.unwrap_or_default();
        let updated_at = metadata_value(&conn, "db_updated_at")?.unwrap_or_default();
        info!(
            path = %db_path.display(),
            schema_version = %schema_version,
            updated_at = %updated_at,
            "database status"
        );

        for (collection, count) in collection_counts(&conn)? {
            info!(collection = %collection, records = count, "collection status");
        }
    } else {
        warn!(path = %db_path.display(), "database file missing");
    }

    Ok(())
}

fn metadata_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| row.get(0))
        .optional()?;
    Ok(value)
}

fn collection_counts(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn
        .prepare("SELECT collection, COUNT(*) FROM records GROUP BY collection ORDER BY collection")
        .context("failed to query collection counts")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DB_SCHEMA_VERSION, RecordStore, SqliteStore};

    #[test]
    fn reports_counts_per_collection_and_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edingest.sqlite");

        let mut store = SqliteStore::open(&path, 10).unwrap();
        for (collection, key) in [("kanji", "4e00"), ("kanji", "4e9c"), ("jmdict", "1000000")] {
            store
                .upsert(collection, key, &serde_json::json!({ "key": key }))
                .unwrap();
        }
        store.flush().unwrap();
        drop(store);

        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY).unwrap();
        assert_eq!(
            collection_counts(&conn).unwrap(),
            vec![("jmdict".to_string(), 1), ("kanji".to_string(), 2)]
        );
        assert_eq!(
            metadata_value(&conn, "db_schema_version").unwrap().as_deref(),
            Some(DB_SCHEMA_VERSION)
        );
        assert_eq!(metadata_value(&conn, "missing").unwrap(), None);
    }
}
