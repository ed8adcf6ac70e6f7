use serde::{Deserialize, Serialize};

/// A recognised source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Kanjidic,
    Jmdict,
    Jmnedict,
    Kradfile,
    Kradfile2,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kanjidic => "kanjidic",
            Self::Jmdict => "jmdict",
            Self::Jmnedict => "jmnedict",
            Self::Kradfile => "kradfile",
            Self::Kradfile2 => "kradfile2",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub kind: SourceKind,
    pub filename: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInventoryManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub source_directory: String,
    pub source_count: usize,
    pub sources: Vec<SourceEntry>,
}

impl SourceInventoryManifest {
    pub fn find(&self, kind: SourceKind) -> Option<&SourceEntry> {
        self.sources.iter().find(|entry| entry.kind == kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCounts {
    pub elements: usize,
    pub produced: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub unresolved_symbols: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: SourceKind,
    pub filename: String,
    pub collection: String,
    pub sha256: String,
    pub counts: SourceCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestPaths {
    pub cache_root: String,
    pub manifest_dir: String,
    pub source_directory: String,
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub db_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub dry_run: bool,
    pub paths: IngestPaths,
    pub radical_index_size: usize,
    pub sources: Vec<SourceReport>,
    pub warnings: Vec<String>,
}
