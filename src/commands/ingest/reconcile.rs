use std::error::Error as _;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::error::{ParseError, PersistenceError};
use crate::merge::{MergeResult, merge};
use crate::model::SourceCounts;
use crate::store::{Record, RecordStore};

const PROGRESS_INTERVAL: usize = 10_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    pub keep_going: bool,
}

/// Drains one record stream into `store`, merging each record with whatever
/// is already stored under its key.
pub fn reconcile<S, R, I>(
    store: &mut S,
    collection: &str,
    document: &str,
    records: I,
    options: ReconcileOptions,
) -> Result<SourceCounts>
where
    S: RecordStore,
    R: Record,
    I: IntoIterator<Item = Result<R, ParseError>>,
{
    let mut counts = SourceCounts::default();

    for item in records {
        let record = match item {
            Ok(record) => record,
            Err(err) if !err.is_fatal() => {
                counts.skipped += 1;
                warn!(document = %document, error = %err, "skipped malformed element");
                continue;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to ingest {document}"));
            }
        };
        counts.produced += 1;

        match upsert_record(store, collection, &record) {
            Ok(MergeResult::Created) => counts.created += 1,
            Ok(MergeResult::Updated) => counts.updated += 1,
            Err(err) if options.keep_going => {
                counts.failed += 1;
                warn!(
                    document = %document,
                    error = %err,
                    cause = %err.source().map(ToString::to_string).unwrap_or_default(),
                    "failed to store record; continuing"
                );
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to ingest {document}"));
            }
        }

        if counts.produced % PROGRESS_INTERVAL == 0 {
            info!(
                document = %document,
                produced = counts.produced,
                created = counts.created,
                updated = counts.updated,
                skipped = counts.skipped,
                "ingest progress"
            );
        }
    }

    store
        .flush()
        .with_context(|| format!("failed to flush records from {document}"))?;

    Ok(counts)
}

/// Fetch, merge and write back a single record.
pub fn upsert_record<S, R>(store: &mut S, collection: &str, record: &R) -> Result<MergeResult, PersistenceError>
where
    S: RecordStore + ?Sized,
    R: Record,
{
    let key = record.key();
    let incoming = serde_json::to_value(record).map_err(|err| PersistenceError::new(collection, key, err))?;
    let existing = store.find_by_key(collection, key)?;
    let (merged, expected) = merge(existing, incoming);
    let reported = store.upsert(collection, key, &merged)?;

    if reported != expected {
        warn!(
            collection = %collection,
            key = %key,
            expected = ?expected,
            reported = ?reported,
            "store disagreed with merge about record existence"
        );
    }

    Ok(reported)
}
