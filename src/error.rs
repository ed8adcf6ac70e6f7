use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading a source document.
///
/// `Structural` covers a single malformed element; the surrounding stream
/// keeps going. Everything else means the document itself is unreadable.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode {document}: {reason}")]
    Format { document: String, reason: String },

    #[error("malformed <{element}> in {document} near byte {position}: {reason}")]
    Structural {
        document: String,
        element: &'static str,
        position: u64,
        reason: String,
    },
}

impl ParseError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Structural { .. })
    }
}

/// A tag whose text does not map back to a declared entity code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unresolved symbol {text:?}")]
pub struct UnresolvedSymbol {
    pub text: String,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("record store failure for {collection}/{key}")]
    Record {
        collection: String,
        key: String,
        #[source]
        source: BoxError,
    },

    /// A batch of already accepted writes could not be made durable.
    #[error("failed to commit {pending} pending record writes")]
    Commit {
        pending: usize,
        #[source]
        source: BoxError,
    },
}

impl PersistenceError {
    pub fn new<E>(collection: &str, key: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Record {
            collection: collection.to_string(),
            key: key.to_string(),
            source: Box::new(source),
        }
    }

    pub fn commit<E>(pending: usize, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Commit {
            pending,
            source: Box::new(source),
        }
    }
}
