use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, info, warn};

use super::reconcile::{ReconcileOptions, reconcile};
use crate::cli::{IngestArgs, IngestTarget};
use crate::commands::inventory;
use crate::kanji::{self, CharacterStream};
use crate::lexical::{DictionaryKind, EntryStream};
use crate::model::{
    IngestPaths, IngestRunManifest, SourceCounts, SourceEntry, SourceInventoryManifest,
    SourceKind, SourceReport,
};
use crate::radicals::RadicalIndex;
use crate::store::{DB_SCHEMA_VERSION, MemoryStore, RecordStore, SqliteStore};
use crate::symbols::SymbolTable;
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

pub const DEFAULT_DB_FILENAME: &str = "edingest.sqlite";

pub fn run(args: IngestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let cache_root = args.cache_root.clone();
    let manifest_dir = cache_root.join("manifests");
    let ingest_manifest_path = args.ingest_manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!(
            "ingest_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| cache_root.join(DEFAULT_DB_FILENAME));

    info!(
        source_dir = %args.source_dir.display(),
        run_id = %run_id,
        dry_run = args.dry_run,
        "starting ingest"
    );

    let inventory = inventory::build_manifest(&args.source_dir)?;
    if !args.dry_run {
        let inventory_path = manifest_dir.join(inventory::MANIFEST_FILENAME);
        write_json_pretty(&inventory_path, &inventory)?;
        info!(
            path = %inventory_path.display(),
            source_count = inventory.source_count,
            "refreshed inventory manifest"
        );
    }

    let mut warnings = Vec::new();
    let plan = plan_sources(&args.sources, &inventory, &mut warnings)?;

    let radicals = if plan.iter().any(|(target, _)| *target == IngestTarget::Kanjidic) {
        load_radicals(&args, &inventory, &mut warnings)?
    } else {
        RadicalIndex::default()
    };

    let options = ReconcileOptions {
        keep_going: args.keep_going,
    };
    let sources = if args.dry_run {
        let mut store = MemoryStore::default();
        let reports = ingest_sources(&mut store, &args.source_dir, &plan, &radicals, options)?;
        info!(records = store.len(), "dry-run kept records in memory only");
        reports
    } else {
        ensure_directory(&cache_root)?;
        let mut store = SqliteStore::open(&db_path, args.batch_size)?;
        ingest_sources(&mut store, &args.source_dir, &plan, &radicals, options)?
    };

    for report in &sources {
        if report.counts.failed > 0 {
            warnings.push(format!(
                "{}: {} records failed to store",
                report.filename, report.counts.failed
            ));
        }
        if report.counts.unresolved_symbols > 0 {
            warnings.push(format!(
                "{}: {} tags did not resolve to an entity code",
                report.filename, report.counts.unresolved_symbols
            ));
        }
    }

    let manifest = IngestRunManifest {
        manifest_version: 1,
        run_id,
        db_schema_version: DB_SCHEMA_VERSION.to_string(),
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_ingest_command(&args),
        dry_run: args.dry_run,
        paths: IngestPaths {
            cache_root: cache_root.display().to_string(),
            manifest_dir: manifest_dir.display().to_string(),
            source_directory: args.source_dir.display().to_string(),
            db_path: db_path.display().to_string(),
        },
        radical_index_size: radicals.len(),
        sources,
        warnings,
    };

    if args.dry_run {
        info!(
            sources = manifest.sources.len(),
            warnings = manifest.warnings.len(),
            "ingest dry-run complete"
        );
        return Ok(());
    }

    write_json_pretty(&ingest_manifest_path, &manifest)?;
    info!(path = %ingest_manifest_path.display(), "wrote ingest run manifest");
    info!(
        sources = manifest.sources.len(),
        warnings = manifest.warnings.len(),
        "ingest completed"
    );

    Ok(())
}

/// Resolves the requested targets against the inventory. Targets named on the
/// command line must exist; with no selection every present document is used.
pub(super) fn plan_sources(
    requested: &[IngestTarget],
    inventory: &SourceInventoryManifest,
    warnings: &mut Vec<String>,
) -> Result<Vec<(IngestTarget, SourceEntry)>> {
    let explicit = !requested.is_empty();
    let targets: &[IngestTarget] = if explicit { requested } else { &IngestTarget::ALL };

    let mut plan: Vec<(IngestTarget, SourceEntry)> = Vec::new();
    for &target in targets {
        if plan.iter().any(|(planned, _)| *planned == target) {
            continue;
        }
        match inventory.find(target.source_kind()) {
            Some(entry) => plan.push((target, entry.clone())),
            None if explicit => bail!(
                "no {} source found in {}",
                target.as_str(),
                inventory.source_directory
            ),
            None => {
                warn!(source = target.as_str(), "source not present; skipping");
                warnings.push(format!("{} source not present", target.as_str()));
            }
        }
    }

    if plan.is_empty() {
        bail!(
            "no ingestible sources found in {}",
            inventory.source_directory
        );
    }

    Ok(plan)
}

/// Loads KRADFILE then KRADFILE2 into one index, so the newer table wins for
/// glyphs present in both.
fn load_radicals(
    args: &IngestArgs,
    inventory: &SourceInventoryManifest,
    warnings: &mut Vec<String>,
) -> Result<RadicalIndex> {
    let mut index = RadicalIndex::default();

    for kind in [SourceKind::Kradfile, SourceKind::Kradfile2] {
        if let Some(entry) = inventory.find(kind) {
            let path = args.source_dir.join(&entry.filename);
            index
                .load_into(&path, &args.radical_encoding)
                .with_context(|| format!("failed to load radical table {}", path.display()))?;
        }
    }

    if index.is_empty() {
        warn!("no radical tables found; character records will carry no decomposition");
        warnings.push("no radical tables found".to_string());
    }

    Ok(index)
}

fn ingest_sources<S: RecordStore>(
    store: &mut S,
    source_dir: &Path,
    plan: &[(IngestTarget, SourceEntry)],
    radicals: &RadicalIndex,
    options: ReconcileOptions,
) -> Result<Vec<SourceReport>> {
    let mut reports = Vec::with_capacity(plan.len());

    for (target, entry) in plan {
        let path = source_dir.join(&entry.filename);
        info!(path = %path.display(), source = target.as_str(), "ingesting source");

        let (collection, counts) = match target {
            IngestTarget::Kanjidic => {
                let mut stream = CharacterStream::open(&path, radicals)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                let mut counts =
                    reconcile(store, kanji::COLLECTION, &entry.filename, stream.by_ref(), options)?;
                counts.elements = stream.elements_seen();
                (kanji::COLLECTION, counts)
            }
            IngestTarget::Jmdict => ingest_lexical(store, &path, &entry.filename, DictionaryKind::Word, options)?,
            IngestTarget::Jmnedict => ingest_lexical(store, &path, &entry.filename, DictionaryKind::Name, options)?,
        };

        info!(
            document = %entry.filename,
            collection = collection,
            elements = counts.elements,
            produced = counts.produced,
            created = counts.created,
            updated = counts.updated,
            skipped = counts.skipped,
            failed = counts.failed,
            unresolved_symbols = counts.unresolved_symbols,
            "source ingested"
        );

        reports.push(SourceReport {
            source: entry.kind,
            filename: entry.filename.clone(),
            collection: collection.to_string(),
            sha256: entry.sha256.clone(),
            counts,
        });
    }

    Ok(reports)
}

fn ingest_lexical<S: RecordStore>(
    store: &mut S,
    path: &Path,
    document: &str,
    kind: DictionaryKind,
    options: ReconcileOptions,
) -> Result<(&'static str, SourceCounts)> {
    let mut stream = EntryStream::open(path, kind)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut counts = reconcile(store, kind.collection(), document, stream.by_ref(), options)?;
    counts.elements = stream.elements_seen();
    counts.unresolved_symbols = stream.unresolved_symbols();
    debug!(
        document = %document,
        symbols = stream.symbols().map_or(0, SymbolTable::len),
        "entity table used for tag decoding"
    );
    Ok((kind.collection(), counts))
}

pub(super) fn render_ingest_command(args: &IngestArgs) -> String {
    let mut command = vec![
        "edingest".to_string(),
        "ingest".to_string(),
        "--source-dir".to_string(),
        args.source_dir.display().to_string(),
        "--cache-root".to_string(),
        args.cache_root.display().to_string(),
    ];

    if let Some(path) = &args.db_path {
        command.push("--db-path".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.ingest_manifest_path {
        command.push("--ingest-manifest-path".to_string());
        command.push(path.display().to_string());
    }
    for source in &args.sources {
        command.push("--source".to_string());
        command.push(source.as_str().to_string());
    }
    if !args.radical_encoding.eq_ignore_ascii_case(crate::radicals::DEFAULT_ENCODING) {
        command.push("--radical-encoding".to_string());
        command.push(args.radical_encoding.clone());
    }
    command.push("--batch-size".to_string());
    command.push(args.batch_size.to_string());
    if args.keep_going {
        command.push("--keep-going".to_string());
    }
    if args.dry_run {
        command.push("--dry-run".to_string());
    }

    command.join(" ")
}
