use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::model::SourceKind;
use crate::radicals::DEFAULT_ENCODING;

#[derive(Parser, Debug)]
#[command(
    name = "edingest",
    version,
    about = "Ingest EDRDG dictionary sources into normalized records"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Inventory(InventoryArgs),
    Ingest(IngestArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    #[arg(long, default_value = "data/edrdg")]
    pub source_dir: PathBuf,

    #[arg(long, default_value = ".cache/edingest")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[arg(long, default_value = "data/edrdg")]
    pub source_dir: PathBuf,

    #[arg(long, default_value = ".cache/edingest")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub ingest_manifest_path: Option<PathBuf>,

    #[arg(long = "source", value_enum)]
    pub sources: Vec<IngestTarget>,

    #[arg(long, default_value = DEFAULT_ENCODING)]
    pub radical_encoding: String,

    #[arg(long, default_value_t = 1000)]
    pub batch_size: usize,

    #[arg(long, default_value_t = false)]
    pub keep_going: bool,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

/// Documents that produce records. Radical tables are loaded on demand for
/// `kanjidic`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum IngestTarget {
    Kanjidic,
    Jmdict,
    Jmnedict,
}

impl IngestTarget {
    pub const ALL: [IngestTarget; 3] = [Self::Kanjidic, Self::Jmdict, Self::Jmnedict];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kanjidic => "kanjidic",
            Self::Jmdict => "jmdict",
            Self::Jmnedict => "jmnedict",
        }
    }

    pub fn source_kind(self) -> SourceKind {
        match self {
            Self::Kanjidic => SourceKind::Kanjidic,
            Self::Jmdict => SourceKind::Jmdict,
            Self::Jmnedict => SourceKind::Jmnedict,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/edingest")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}
