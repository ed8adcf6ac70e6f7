use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::{info, warn};

use crate::cli::InventoryArgs;
use crate::model::{SourceEntry, SourceInventoryManifest, SourceKind};
use crate::util::{digest_file, now_utc_string, write_json_pretty};

pub const MANIFEST_FILENAME: &str = "source_inventory.json";

pub fn run(args: InventoryArgs) -> Result<()> {
    let manifest = build_manifest(&args.source_dir)?;

    if args.dry_run {
        info!(
            source_count = manifest.source_count,
            source = %manifest.source_directory,
            "inventory dry-run complete"
        );
        return Ok(());
    }

    let manifest_path = args
        .manifest_path
        .unwrap_or_else(|| args.cache_root.join("manifests").join(MANIFEST_FILENAME));

    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote inventory manifest");
    info!(source_count = manifest.source_count, "inventory completed");

    Ok(())
}

pub fn build_manifest(source_dir: &Path) -> Result<SourceInventoryManifest> {
    let pattern = Regex::new(r"(?i)^(kanjidic2|jmnedict|jmdict|kradfile2|kradfile)")
        .context("failed to compile source filename regex")?;

    let mut paths = discover_files(source_dir)?;
    paths.sort();

    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for path in paths {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToOwned::to_owned)
            .with_context(|| format!("invalid UTF-8 filename: {}", path.display()))?;

        let Some(kind) = classify(&filename, &pattern) else {
            continue;
        };
        if !seen.insert(kind) {
            warn!(
                kind = kind.as_str(),
                filename = %filename,
                "ignoring additional source of the same kind"
            );
            continue;
        }

        let digest = digest_file(&path)?;
        sources.push(SourceEntry {
            kind,
            filename,
            bytes: digest.bytes,
            sha256: digest.sha256,
        });
    }

    if sources.is_empty() {
        bail!("no dictionary sources found in {}", source_dir.display());
    }

    Ok(SourceInventoryManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        source_directory: source_dir.display().to_string(),
        source_count: sources.len(),
        sources,
    })
}

/// Maps a filename to its source kind. Compressed archives are not
/// recognised.
pub fn classify(filename: &str, pattern: &Regex) -> Option<SourceKind> {
    let lowered = filename.to_ascii_lowercase();
    if lowered.ends_with(".gz") || lowered.ends_with(".zip") {
        return None;
    }

    let prefix = pattern.captures(&lowered)?.get(1)?.as_str().to_string();
    match prefix.as_str() {
        "kanjidic2" => Some(SourceKind::Kanjidic),
        "jmdict" => Some(SourceKind::Jmdict),
        "jmnedict" => Some(SourceKind::Jmnedict),
        "kradfile2" => Some(SourceKind::Kradfile2),
        "kradfile" => Some(SourceKind::Kradfile),
        _ => None,
    }
}

fn discover_files(source_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    let entries = fs::read_dir(source_dir)
        .with_context(|| format!("failed to read {}", source_dir.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", source_dir.display()))?;
        let path = entry.path();

        if entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            files.push(path);
        }
    }

    Ok(files)
}
