mod reconcile;
mod run;

pub use run::{DEFAULT_DB_FILENAME, run};
